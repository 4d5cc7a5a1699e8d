//! MCP server registry: lifecycle, discovery, health monitoring, and tool
//! invocation (§3 "MCP server record", §5 "Health monitoring").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use lg_types::mcp_types::{HealthRecord, HealthState, McpTool, ToolDescriptor};
use lg_types::{AppError, AppResult};

use crate::transport::{HttpTransport, StdioTransport, Transport};

/// How a configured MCP server is reached (§3 "transport descriptor"). SSE
/// is named in the spec as reserved and is not implemented here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransportDescriptor {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_max_connections")]
        max_connections: usize,
    },
}

fn default_max_connections() -> usize {
    4
}

/// One entry from an MCP server manifest (§3 "MCP server record"). Reading
/// such a manifest off disk is an external-collaborator concern (§1
/// non-goals: "configuration file parsing"); `load_descriptors_from_yaml`
/// below is a thin convenience for callers, not a configuration subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportDescriptor,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

pub fn load_descriptors_from_yaml(contents: &str) -> AppResult<Vec<McpServerDescriptor>> {
    serde_yaml::from_str(contents)
        .map_err(|e| AppError::ManifestInvalid(format!("invalid MCP server manifest: {e}")))
}

struct ServerRecord {
    transport: Arc<dyn Transport>,
    health: RwLock<HealthRecord>,
    tools: RwLock<Vec<Arc<ToolDescriptor>>>,
}

/// Process-wide MCP server registry (§5 "shared-resource policy": the MCP
/// server registry and connection pool are process-wide singletons).
#[derive(Clone)]
pub struct McpManager {
    servers: Arc<DashMap<String, Arc<ServerRecord>>>,
}

impl McpManager {
    pub fn new() -> Self {
        Self {
            servers: Arc::new(DashMap::new()),
        }
    }

    /// Starts the transport, registers the server, then runs initial tool
    /// discovery.
    pub async fn register(&self, descriptor: &McpServerDescriptor) -> AppResult<()> {
        let transport: Arc<dyn Transport> = match &descriptor.transport {
            TransportDescriptor::Stdio { command, args, env } => {
                Arc::new(StdioTransport::spawn(command, args, env).await?)
            }
            TransportDescriptor::Http {
                url,
                headers,
                max_connections,
            } => Arc::new(HttpTransport::new(url.clone(), headers.clone(), *max_connections)?),
        };

        let record = Arc::new(ServerRecord {
            transport,
            health: RwLock::new(HealthRecord::default()),
            tools: RwLock::new(Vec::new()),
        });

        self.servers.insert(descriptor.name.clone(), record);
        self.discover(
            &descriptor.name,
            Duration::from_secs(descriptor.connect_timeout_secs),
        )
        .await?;
        Ok(())
    }

    /// Stops the server's transport and evicts its tool descriptors
    /// atomically (§3 "Tool descriptor" invariant: descriptors are evicted
    /// atomically on server removal).
    pub async fn unregister(&self, server_name: &str) -> AppResult<()> {
        if let Some((_, record)) = self.servers.remove(server_name) {
            record.transport.close().await?;
        }
        Ok(())
    }

    /// Calls `tools/list` and stores the discovered inventory (§3
    /// "discovered inventories"). Resources and prompt templates follow the
    /// same MCP shape but have no gateway-side consumer, so only tool
    /// discovery is wired through.
    async fn discover(&self, server_name: &str, timeout: Duration) -> AppResult<()> {
        let record = self
            .servers
            .get(server_name)
            .map(|r| r.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("MCP server '{server_name}' not registered")))?;

        let result = record.transport.call("tools/list", None, timeout).await?;
        let tools: Vec<McpTool> = serde_json::from_value(
            result.get("tools").cloned().unwrap_or(serde_json::Value::Array(vec![])),
        )
        .map_err(|e| {
            AppError::UpstreamUnavailable(format!(
                "malformed tools/list response from '{server_name}': {e}"
            ))
        })?;

        let descriptors: Vec<Arc<ToolDescriptor>> = tools
            .into_iter()
            .map(|t| Arc::new(ToolDescriptor::new(server_name, t)))
            .collect();
        *record.tools.write() = descriptors;
        Ok(())
    }

    /// Aggregated tool inventory across every registered server — the raw
    /// material the orchestrator filters through guardrails (§4.3 step 1).
    pub fn list_tool_descriptors(&self) -> Vec<Arc<ToolDescriptor>> {
        self.servers
            .iter()
            .flat_map(|entry| entry.value().tools.read().clone())
            .collect()
    }

    pub fn find_tool(&self, tool_id: &str) -> Option<Arc<ToolDescriptor>> {
        self.list_tool_descriptors().into_iter().find(|t| t.id == tool_id)
    }

    /// Executes `mcp.<server>.<tool>` via its owning transport (§4.3 step
    /// 4b). `timeout` should already be `max(T, tool-declared timeout)` —
    /// computed by the caller, which also knows the configured default.
    pub async fn call_tool(
        &self,
        tool_id: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> AppResult<String> {
        let descriptor = self
            .find_tool(tool_id)
            .ok_or_else(|| AppError::ToolDenied(format!("unknown tool '{tool_id}'")))?;
        let record = self.servers.get(&descriptor.server_name).ok_or_else(|| {
            AppError::ToolExecutionFailed(tool_id.to_string(), "owning server no longer registered".into())
        })?;

        let params = serde_json::json!({ "name": descriptor.tool_name, "arguments": arguments });
        let result = record.value().transport.call("tools/call", Some(params), timeout).await?;
        descriptor.record_call();

        Ok(render_tool_result(&result))
    }

    pub fn health_of(&self, server_name: &str) -> Option<HealthRecord> {
        self.servers.get(server_name).map(|r| r.value().health.read().clone())
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Background health probe named in §5 "Health monitoring": never
    /// blocks request handling, probes at `interval` with `timeout`, logs
    /// state transitions.
    pub fn spawn_health_monitor(
        &self,
        interval: Duration,
        timeout: Duration,
    ) -> (tokio::task::JoinHandle<()>, CancellationToken) {
        let manager = self.clone();
        let token = CancellationToken::new();
        let stop = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => manager.probe_all(timeout).await,
                }
            }
        });
        (handle, token)
    }

    async fn probe_all(&self, timeout: Duration) {
        for server_name in self.server_names() {
            let Some(record) = self.servers.get(&server_name).map(|r| r.value().clone()) else {
                continue;
            };
            let outcome = record.transport.call("ping", None, timeout).await;
            let mut health = record.health.write();
            let previous_state = health.state;
            *health = match outcome {
                Ok(_) => HealthRecord {
                    state: HealthState::Healthy,
                    last_checked: chrono::Utc::now(),
                    last_error: None,
                },
                Err(e) => HealthRecord {
                    state: HealthState::Unhealthy,
                    last_checked: chrono::Utc::now(),
                    last_error: Some(e.to_string()),
                },
            };
            if previous_state != health.state {
                tracing::info!(
                    server = %server_name,
                    from = ?previous_state,
                    to = ?health.state,
                    "MCP server health transition"
                );
            }
        }
    }

    /// Closes every transport; tolerant of servers already closed (§5
    /// "Transport close is idempotent"). Called during graceful shutdown.
    pub async fn shutdown(&self) {
        for entry in self.servers.iter() {
            if let Err(e) = entry.value().transport.close().await {
                tracing::warn!(server = %entry.key(), error = %e, "error closing MCP transport during shutdown");
            }
        }
    }
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new()
    }
}

/// MCP tool results carry a `content` array of typed blocks; join any text
/// blocks for the tool-role message, falling back to raw JSON for
/// non-textual results.
fn render_tool_result(result: &serde_json::Value) -> String {
    if let Some(content) = result.get("content").and_then(|c| c.as_array()) {
        let text: Vec<String> = content
            .iter()
            .filter_map(|block| block.get("text").and_then(|t| t.as_str()).map(str::to_string))
            .collect();
        if !text.is_empty() {
            return text.join("\n");
        }
    }
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tools_descriptor(name: &str) -> McpServerDescriptor {
        McpServerDescriptor {
            name: name.to_string(),
            transport: TransportDescriptor::Stdio {
                command: "sh".into(),
                args: vec![
                    "-c".into(),
                    r#"while IFS= read -r line; do
                        echo '{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"echo","inputSchema":{"type":"object"}}]}}'
                    done"#
                        .into(),
                ],
                env: HashMap::new(),
            },
            connect_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn register_discovers_and_namespaces_tools() {
        let manager = McpManager::new();
        manager.register(&echo_tools_descriptor("fs")).await.unwrap();

        let tools = manager.list_tool_descriptors();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].id, "mcp.fs.echo");
    }

    #[tokio::test]
    async fn unregister_evicts_that_servers_tools() {
        let manager = McpManager::new();
        manager.register(&echo_tools_descriptor("fs")).await.unwrap();
        manager.unregister("fs").await.unwrap();
        assert!(manager.list_tool_descriptors().is_empty());
    }

    #[tokio::test]
    async fn call_tool_rejects_unknown_id() {
        let manager = McpManager::new();
        let result = manager
            .call_tool("mcp.fs.nonexistent", serde_json::json!({}), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(AppError::ToolDenied(_))));
    }

    #[test]
    fn loads_descriptors_from_yaml() {
        let yaml = r#"
- name: fs
  transport: stdio
  command: mcp-fs-server
  args: ["--root", "/tmp"]
- name: web
  transport: http
  url: "http://localhost:9000/rpc"
"#;
        let descriptors = load_descriptors_from_yaml(yaml).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].name, "fs");
        assert!(matches!(descriptors[1].transport, TransportDescriptor::Http { .. }));
    }

    #[test]
    fn render_tool_result_joins_text_blocks() {
        let result = serde_json::json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        assert_eq!(render_tool_result(&result), "a\nb");
    }
}
