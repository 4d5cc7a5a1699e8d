//! Tool-call guardrails (§4.3 "Guardrails").
//!
//! Allow/deny glob lists over namespaced tool IDs (`mcp.<server>.<tool>`),
//! plus the round/call/timeout/size limits (R, C, T, S) the orchestrator
//! enforces independently of one another.

use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use lg_config::McpGuardrailConfig;
use lg_types::{AppError, AppResult};

/// Compiled form of `McpGuardrailConfig`'s glob lists plus the R/C/T/S
/// limits, ready for per-request enforcement.
pub struct ToolGuardrails {
    allow: GlobSet,
    allow_is_empty: bool,
    deny: GlobSet,
    max_tool_rounds: u32,
    max_tool_calls_per_round: u32,
    default_tool_timeout: Duration,
    max_tool_result_bytes: usize,
}

impl ToolGuardrails {
    pub fn from_config(config: &McpGuardrailConfig) -> AppResult<Self> {
        Ok(Self {
            allow: build_globset(&config.allow_tools)?,
            allow_is_empty: config.allow_tools.is_empty(),
            deny: build_globset(&config.deny_tools)?,
            max_tool_rounds: config.max_tool_rounds,
            max_tool_calls_per_round: config.max_tool_calls_per_round,
            default_tool_timeout: config.default_tool_timeout,
            max_tool_result_bytes: config.max_tool_result_bytes,
        })
    }

    /// Empty allow list means "all allowed"; deny is applied after allow and
    /// always wins (§4.3 "Guardrails").
    pub fn is_allowed(&self, tool_id: &str) -> bool {
        let allowed = self.allow_is_empty || self.allow.is_match(tool_id);
        allowed && !self.deny.is_match(tool_id)
    }

    pub fn max_tool_rounds(&self) -> u32 {
        self.max_tool_rounds
    }

    /// §4.3 step 4a: "Reject the round with a terminal error if count > C".
    /// Unlike a single denied/unknown/timed-out tool call, this aborts the
    /// whole orchestration rather than feeding a tool-result message back.
    pub fn check_round_size(&self, call_count: usize) -> AppResult<()> {
        if call_count > self.max_tool_calls_per_round as usize {
            return Err(AppError::ToolDenied(format!(
                "round contains {call_count} tool calls, exceeding the configured maximum of {}",
                self.max_tool_calls_per_round
            )));
        }
        Ok(())
    }

    /// §4.3 "Timeout per tool is max(T, tool-declared timeout)".
    pub fn effective_timeout(&self, declared: Option<Duration>) -> Duration {
        match declared {
            Some(d) => d.max(self.default_tool_timeout),
            None => self.default_tool_timeout,
        }
    }

    /// Truncates `text` to at most `S` bytes on a UTF-8 boundary, returning
    /// whether truncation occurred so the caller can record it (§4.3
    /// "recording whether truncation occurred").
    pub fn truncate_result(&self, text: &str) -> (String, bool) {
        if text.len() <= self.max_tool_result_bytes {
            return (text.to_string(), false);
        }
        let mut end = self.max_tool_result_bytes;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        (text[..end].to_string(), true)
    }
}

fn build_globset(patterns: &[String]) -> AppResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| AppError::Config(format!("invalid tool guardrail glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| AppError::Config(format!("failed to compile tool guardrail globs: {e}")))
}
