//! Shared application state (§3, §5 "Shared-resource policy").
//!
//! Every field here is a process-wide singleton for the lifetime of the
//! server: the cache, rate limiter, MCP registry, and extension registries
//! are all built once in `main` and cloned cheaply (an `Arc` or an
//! already-`Clone` handle type) into every request.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use lg_cache::Cache;
use lg_config::Config;
use lg_extensions::{HookManager, LlmHandler, ManifestRegistry, ModuleRegistry, RouteTable, WorkflowExecutor};
use lg_guardrails::ToolGuardrails;
use lg_mcp::McpManager;
use lg_monitoring::AccessLogger;
use lg_ratelimit::RateLimiter;
use lg_types::{AppError, AppResult};
use lg_upstream::OllamaClient;

/// Wraps `OllamaClient` behind the `LlmHandler` trait so the extension
/// engine's `llm.chat` step shares the gateway's own upstream connection
/// rather than opening a second one (§4.4.5).
pub struct UpstreamLlmHandler {
    upstream: OllamaClient,
}

impl UpstreamLlmHandler {
    pub fn new(upstream: OllamaClient) -> Self {
        Self { upstream }
    }
}

#[async_trait]
impl LlmHandler for UpstreamLlmHandler {
    async fn chat(&self, model: &str, messages: Vec<Value>, options: Value) -> AppResult<Value> {
        let mut body = options;
        if !body.is_object() {
            body = Value::Object(Default::default());
        }
        let obj = body.as_object_mut().expect("forced to object above");
        obj.insert("model".to_string(), Value::String(model.to_string()));
        obj.insert("messages".to_string(), Value::Array(messages));

        let request_id = uuid::Uuid::new_v4().to_string();
        self.upstream.chat_completion(body, &request_id).await
    }
}

/// Shared state handed to every axum handler. Cheap to clone: every field is
/// already an `Arc` or a handle type backed by one.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<Cache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub upstream: OllamaClient,
    pub mcp: Option<McpManager>,
    pub guardrails: Arc<ToolGuardrails>,
    pub manifests: ManifestRegistry,
    pub modules: ModuleRegistry,
    pub routes: RouteTable,
    pub hooks: HookManager,
    pub executor: WorkflowExecutor,
    pub access_log: Arc<AccessLogger>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Finds the directory an extension's manifest lives in, or the standard
    /// "extension not found" error (§4.4.1).
    pub fn extension_dir(&self, name: &str) -> AppResult<PathBuf> {
        self.manifests
            .dir_of(name)
            .ok_or_else(|| AppError::ExtensionNotFound(name.to_string()))
    }
}
