//! MCP transports (§5 "MCP transports").
//!
//! A `stdio` transport owns a child process and exchanges newline-delimited
//! JSON-RPC over its standard streams, correlating requests to responses by
//! ID. An `http` transport POSTs JSON-RPC bodies, relying on `reqwest`'s
//! pooled `Client` for per-server connection reuse. Close is idempotent on
//! both.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use lg_types::{AppError, AppResult};

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, method: &str, params: Option<Value>, timeout: Duration) -> AppResult<Value>;
    async fn close(&self) -> AppResult<()>;
}

pub struct StdioTransport {
    next_id: AtomicI64,
    stdin: AsyncMutex<tokio::process::ChildStdin>,
    pending: Arc<DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    child: AsyncMutex<Option<Child>>,
    reader_handle: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
    closed: AtomicBool,
}

impl StdioTransport {
    pub async fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> AppResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AppError::UpstreamUnavailable(format!("failed to spawn MCP server '{command}': {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::InternalError("MCP child stdin was not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::InternalError("MCP child stdout was not piped".into()))?;

        let pending: Arc<DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>> = Arc::new(DashMap::new());
        let pending_for_reader = pending.clone();

        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(&line) {
                            Ok(response) => {
                                if let Some((_, sender)) = pending_for_reader.remove(&response.id) {
                                    let _ = sender.send(response);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to parse MCP stdio response line");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "MCP stdio read error");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            next_id: AtomicI64::new(1),
            stdin: AsyncMutex::new(stdin),
            pending,
            child: AsyncMutex::new(Some(child)),
            reader_handle: AsyncMutex::new(Some(reader_handle)),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn call(&self, method: &str, params: Option<Value>, timeout: Duration) -> AppResult<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::UpstreamUnavailable("MCP stdio transport is closed".into()));
        }

        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::Relaxed) as u64);
        let request = JsonRpcRequest::new(method, params, id.clone());
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        let mut line = serde_json::to_string(&request).map_err(AppError::Serialization)?;
        line.push('\n');
        {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await.map_err(AppError::Io)?;
            stdin.flush().await.map_err(AppError::Io)?;
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(AppError::UpstreamUnavailable(
                    "MCP stdio transport closed mid-call".into(),
                ))
            }
            Err(_) => {
                self.pending.remove(&id);
                return Err(AppError::ToolTimeout(method.to_string(), timeout));
            }
        };

        response
            .into_result()
            .map_err(|e| AppError::ToolExecutionFailed(method.to_string(), e.to_string()))
    }

    async fn close(&self) -> AppResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
        }
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

/// JSON-RPC over HTTP POST, one `reqwest::Client` per server so idle
/// connections are pooled per the §5 "per-server pool with a configurable
/// max" rule.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    next_id: AtomicI64,
}

impl HttpTransport {
    pub fn new(
        url: impl Into<String>,
        headers: HashMap<String, String>,
        max_connections: usize,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(max_connections.max(1))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build MCP HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            headers,
            next_id: AtomicI64::new(1),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, method: &str, params: Option<Value>, timeout: Duration) -> AppResult<Value> {
        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::Relaxed) as u64);
        let request = JsonRpcRequest::new(method, params, id);

        let mut builder = self.client.post(&self.url).json(&request).timeout(timeout);
        for (key, value) in &self.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "MCP HTTP transport returned {}",
                response.status()
            )));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("malformed MCP response: {e}")))?;

        body.into_result()
            .map_err(|e| AppError::ToolExecutionFailed(method.to_string(), e.to_string()))
    }

    /// HTTP transports hold no persistent connection to tear down; closing
    /// is a no-op, kept for interface symmetry with `StdioTransport`.
    async fn close(&self) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stdio_round_trips_a_single_call() {
        let script = r#"while IFS= read -r line; do echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'; done"#;
        let transport = StdioTransport::spawn("sh", &["-c".to_string(), script.to_string()], &HashMap::new())
            .await
            .unwrap();

        let result = transport
            .call("ping", None, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn stdio_call_times_out_when_server_is_silent() {
        let transport = StdioTransport::spawn("sh", &["-c".to_string(), "cat >/dev/null".to_string()], &HashMap::new())
            .await
            .unwrap();

        let result = transport.call("ping", None, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(AppError::ToolTimeout(_, _))));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn stdio_close_is_idempotent() {
        let transport = StdioTransport::spawn("sh", &["-c".to_string(), "cat".to_string()], &HashMap::new())
            .await
            .unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }
}
