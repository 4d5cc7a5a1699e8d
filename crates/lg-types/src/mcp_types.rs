//! MCP-related types shared across crates.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw tool definition as discovered from an MCP server's `tools/list` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "inputSchema")]
    pub input_schema: Value,

    /// Per-tool timeout the server declared, if any (§4.3: "max(T, tool
    /// declared timeout)").
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout_secs: Option<u64>,
}

/// A tool namespaced as `mcp.<server>.<tool>`, unique across all connected
/// MCP servers. The call counter is observable via `/v1/extensions` metrics
/// and increments on every invocation (§4.3 "Observable side-effects").
#[derive(Debug)]
pub struct ToolDescriptor {
    pub id: String,
    pub server_name: String,
    pub tool_name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub timeout_secs: Option<u64>,
    call_count: AtomicU64,
}

impl ToolDescriptor {
    pub fn new(server_name: &str, tool: McpTool) -> Self {
        Self {
            id: format!("mcp.{}.{}", server_name, tool.name),
            server_name: server_name.to_string(),
            tool_name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
            timeout_secs: tool.timeout_secs,
            call_count: AtomicU64::new(0),
        }
    }

    pub fn record_call(&self) -> u64 {
        self.call_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl Clone for ToolDescriptor {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            server_name: self.server_name.clone(),
            tool_name: self.tool_name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            timeout_secs: self.timeout_secs,
            call_count: AtomicU64::new(self.call_count()),
        }
    }
}

/// Health state of one MCP server connection (§3 "MCP server record").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub state: HealthState,
    pub last_checked: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            state: HealthState::Unknown,
            last_checked: Utc::now(),
            last_error: None,
        }
    }
}
