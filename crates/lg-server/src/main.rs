//! Process entrypoint: loads configuration, builds every process-wide
//! singleton, mounts discovered extensions, and drives the HTTP server
//! through startup, request serving, and graceful shutdown (§4.1 "Graceful
//! shutdown", §6 "Exit codes").

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use lg_cache::Cache;
use lg_config::Config;
use lg_extensions::{
    builtin_manifests, discovery, HookManager, ManifestRegistry, ModuleRegistry, RouteTable, WorkflowExecutor,
};
use lg_guardrails::ToolGuardrails;
use lg_mcp::{load_descriptors_from_yaml, McpManager};
use lg_monitoring::{init_logging, AccessLogger};
use lg_ratelimit::RateLimiter;
use lg_server::state::{AppState, UpstreamLlmHandler};
use lg_upstream::OllamaClient;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let secrets = config.api_key.iter().cloned().collect::<Vec<_>>();
    init_logging(&config, secrets);

    match run(config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);

    let cache = Cache::new(config.cache_capacity, config.cache_ttl);
    let (cache_task, cache_stop) = cache.spawn_eviction_sweep(std::time::Duration::from_secs(30));

    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_rps));

    let upstream = OllamaClient::new(config.ollama_host.clone(), config.upstream_timeout)?;

    let mcp = if config.mcp_enabled {
        let manager = McpManager::new();
        if let Some(path) = &config.mcp_servers_file {
            match std::fs::read_to_string(path) {
                Ok(contents) => match load_descriptors_from_yaml(&contents) {
                    Ok(descriptors) => {
                        for descriptor in &descriptors {
                            if let Err(e) = manager.register(descriptor).await {
                                tracing::warn!(server = %descriptor.name, error = %e, "failed to register MCP server");
                            }
                        }
                    }
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "invalid MCP servers file"),
                },
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not read MCP servers file"),
            }
        }
        Some(manager)
    } else {
        None
    };
    let mcp_health_task = mcp
        .as_ref()
        .map(|m| m.spawn_health_monitor(config.mcp_health_check_interval, config.mcp_guardrails.default_tool_timeout));

    let guardrails = Arc::new(ToolGuardrails::from_config(&config.mcp_guardrails)?);

    let manifests = ManifestRegistry::new();
    for manifest in builtin_manifests() {
        manifests.register(manifest, config.extensions_dir.clone())?;
    }

    let modules = ModuleRegistry::new();
    let routes = RouteTable::new();

    let (discovered, discovery_errors) = discovery::discover_manifests(&config.extensions_dir)?;
    for err in &discovery_errors {
        tracing::warn!(error = %err, "extension manifest skipped during startup discovery");
    }
    for found in discovered {
        let name = found.manifest.name.clone();
        let endpoints = found.manifest.endpoints.clone();
        if let Err(e) = manifests.register_or_update(found.manifest, found.dir) {
            tracing::warn!(extension = %name, error = %e, "failed to register discovered extension");
            continue;
        }
        if !endpoints.is_empty() {
            if let Err(e) = routes.register(&name, &endpoints) {
                tracing::warn!(extension = %name, error = %e, "failed to mount extension endpoints");
            }
        }
    }
    let (discovered_modules, module_errors) = discovery::discover_modules(&config.extensions_dir)?;
    for err in &module_errors {
        tracing::warn!(error = %err, "agentic module skipped during startup discovery");
    }
    for found in discovered_modules {
        modules.register(found.module, found.dir);
    }

    let hooks = HookManager::new(manifests.clone());
    let llm_handler = Arc::new(UpstreamLlmHandler::new(upstream.clone()));
    let executor = WorkflowExecutor::new(llm_handler, manifests.clone(), modules.clone());

    let access_log = Arc::new(AccessLogger::new(
        config.access_log_dir.clone(),
        config.access_log_retention_days,
    )?);

    let shutdown = CancellationToken::new();

    let state = AppState {
        config: config.clone(),
        cache: cache.clone(),
        rate_limiter,
        upstream,
        mcp,
        guardrails,
        manifests,
        modules,
        routes,
        hooks,
        executor,
        access_log,
        shutdown: shutdown.clone(),
    };

    let app = lg_server::build_router(state.clone());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(
                port = config.port,
                error = %e,
                "failed to bind listen port; LlamaGate runs as a single instance per port"
            );
            return Err(e.into());
        }
    };
    tracing::info!(port = config.port, "LlamaGate listening");

    let shutdown_signal = shutdown.clone();
    let serve = axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(async move {
            wait_for_termination_signal().await;
            shutdown_signal.cancel();
        });

    let shutdown_timeout = config.shutdown_timeout;
    let drained = tokio::time::timeout(shutdown_timeout, serve).await;

    cache_stop.cancel();
    let _ = cache_task.await;
    if let Some((health_task, health_stop)) = mcp_health_task {
        health_stop.cancel();
        let _ = health_task.await;
    }
    if let Some(mcp) = &state.mcp {
        mcp.shutdown().await;
    }

    match drained {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            tracing::error!("forced shutdown: in-flight requests did not drain within the shutdown timeout");
            Err("shutdown timeout exceeded".into())
        }
    }
}

/// Waits for SIGINT (Ctrl-C, all platforms) or SIGTERM (Unix only) so the
/// gateway can drain in-flight requests before the process exits (§4.1
/// "Graceful shutdown").
async fn wait_for_termination_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}
