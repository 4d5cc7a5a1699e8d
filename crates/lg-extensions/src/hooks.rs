//! Hook manager for middleware and observer extensions (§4.4.4).
//!
//! Middleware extensions register `http.request` hooks matched by
//! `path_prefix`; observer extensions register `llm.response` hooks that run
//! after a response is produced. Hook execution errors are logged but never
//! abort the request (§4.4.4 "do not abort the request").

use std::path::PathBuf;

use chrono::Utc;
use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::manifest::{ExtensionType, HookEvent, RedactionMode, RedactionRule};
use crate::registry::ManifestRegistry;

#[derive(Clone)]
pub struct HookManager {
    manifests: ManifestRegistry,
}

impl HookManager {
    pub fn new(manifests: ManifestRegistry) -> Self {
        Self { manifests }
    }

    /// Runs every enabled middleware extension's matching `http.request`
    /// hooks for an inbound request. Best-effort: a failing hook is logged
    /// and skipped, the others still run.
    pub async fn run_http_request_hooks(&self, path: &str, request_id: &str, client_ip: Option<&str>) {
        for manifest in self.manifests.get_by_type(ExtensionType::Middleware) {
            let Some(dir) = self.manifests.dir_of(&manifest.name) else {
                continue;
            };
            for hook in &manifest.hooks {
                if hook.event != HookEvent::HttpRequest {
                    continue;
                }
                let matches = match &hook.match_predicate {
                    Some(m) => path.starts_with(&m.path_prefix),
                    None => true,
                };
                if !matches {
                    continue;
                }
                if let Err(e) = self
                    .run_http_action(&hook.action, &dir, &hook.redact, path, request_id, client_ip)
                    .await
                {
                    tracing::warn!(
                        extension = %manifest.name,
                        action = %hook.action,
                        error = %e,
                        "http.request hook failed"
                    );
                }
            }
        }
    }

    async fn run_http_action(
        &self,
        action: &str,
        dir: &std::path::Path,
        redact: &[RedactionRule],
        path: &str,
        request_id: &str,
        client_ip: Option<&str>,
    ) -> std::io::Result<()> {
        match action {
            "audit.log" => {
                let mut record = serde_json::json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "request_id": request_id,
                    "path": path,
                    "client_ip": client_ip,
                });
                apply_redactions(&mut record, redact);
                append_jsonl(&audit_log_path(dir), &record).await
            }
            other => {
                tracing::debug!(action = other, "unrecognised http.request hook action, skipping");
                Ok(())
            }
        }
    }

    /// Runs every enabled observer extension's `llm.response` hooks after a
    /// chat completion is produced.
    pub async fn run_llm_response_hooks(
        &self,
        request_id: &str,
        model: &str,
        usage: Option<&Value>,
    ) {
        for manifest in self.manifests.get_by_type(ExtensionType::Observer) {
            let Some(dir) = self.manifests.dir_of(&manifest.name) else {
                continue;
            };
            for hook in &manifest.hooks {
                if hook.event != HookEvent::LlmResponse {
                    continue;
                }
                if let Err(e) = self
                    .run_llm_action(&hook.action, &manifest.config, &dir, request_id, model, usage)
                    .await
                {
                    tracing::warn!(
                        extension = %manifest.name,
                        action = %hook.action,
                        error = %e,
                        "llm.response hook failed"
                    );
                }
            }
        }
    }

    async fn run_llm_action(
        &self,
        action: &str,
        config: &serde_json::Map<String, Value>,
        dir: &std::path::Path,
        request_id: &str,
        model: &str,
        usage: Option<&Value>,
    ) -> std::io::Result<()> {
        match action {
            "usage.track" => {
                let prompt_tokens = usage.and_then(|u| u.get("prompt_tokens")).cloned();
                let completion_tokens = usage.and_then(|u| u.get("completion_tokens")).cloned();
                let record = serde_json::json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "request_id": request_id,
                    "model": model,
                    "prompt_tokens": prompt_tokens,
                    "completion_tokens": completion_tokens,
                    "estimated_cost_usd": 0.0,
                });
                let path = usage_report_path(dir, config);
                append_jsonl(&path, &record).await
            }
            other => {
                tracing::debug!(action = other, "unrecognised llm.response hook action, skipping");
                Ok(())
            }
        }
    }
}

fn audit_log_path(ext_dir: &std::path::Path) -> PathBuf {
    ext_dir
        .join("var")
        .join("audit")
        .join(format!("audit-{}.jsonl", Utc::now().format("%Y-%m-%d")))
}

fn usage_report_path(ext_dir: &std::path::Path, config: &serde_json::Map<String, Value>) -> PathBuf {
    match config.get("report_path").and_then(Value::as_str) {
        Some(p) => ext_dir.join(p),
        None => ext_dir.join("var").join("usage").join("usage.jsonl"),
    }
}

async fn append_jsonl(path: &std::path::Path, record: &Value) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    let mut line = serde_json::to_string(record).unwrap_or_default();
    line.push('\n');
    file.write_all(line.as_bytes()).await
}

/// Applies declared redaction rules to a JSON-lines record before it's
/// written (§4.4.4, §9 "Sensitive-value redaction"). Selectors are simple
/// dot paths into the record's top-level object.
fn apply_redactions(record: &mut Value, rules: &[RedactionRule]) {
    for rule in rules {
        if let Some(slot) = record.pointer_mut(&format!("/{}", rule.selector.replace('.', "/"))) {
            match rule.mode {
                RedactionMode::Remove => *slot = Value::String("<redacted>".to_string()),
                RedactionMode::Truncate { len } => {
                    if let Value::String(s) = slot {
                        if s.len() > len {
                            *s = format!("{}...<redacted>", &s[..len.min(s.len())]);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_remove_replaces_value() {
        let mut record = serde_json::json!({"client_ip": "10.0.0.1", "path": "/v1/chat"});
        apply_redactions(
            &mut record,
            &[RedactionRule {
                selector: "client_ip".to_string(),
                mode: RedactionMode::Remove,
            }],
        );
        assert_eq!(record["client_ip"], "<redacted>");
        assert_eq!(record["path"], "/v1/chat");
    }

    #[test]
    fn redaction_truncate_shortens_long_strings() {
        let mut record = serde_json::json!({"path": "/v1/chat/completions/extra/long/path"});
        apply_redactions(
            &mut record,
            &[RedactionRule {
                selector: "path".to_string(),
                mode: RedactionMode::Truncate { len: 8 },
            }],
        );
        assert!(record["path"].as_str().unwrap().starts_with("/v1/chat"));
        assert!(record["path"].as_str().unwrap().ends_with("<redacted>"));
    }

    #[tokio::test]
    async fn append_jsonl_creates_parent_dirs_and_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("var/audit/audit-test.jsonl");
        append_jsonl(&path, &serde_json::json!({"a": 1})).await.unwrap();
        append_jsonl(&path, &serde_json::json!({"a": 2})).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
