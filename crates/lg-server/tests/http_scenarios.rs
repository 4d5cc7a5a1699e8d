//! End-to-end HTTP scenarios against a real `axum::serve` instance bound to
//! an ephemeral port, backed by a `wiremock` stand-in for Ollama. Exercises
//! the concrete scenarios from §8: auth rejection, cache hits, and rate
//! limiting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lg_cache::Cache;
use lg_config::{Config, McpGuardrailConfig};
use lg_extensions::{HookManager, ManifestRegistry, ModuleRegistry, RouteTable, WorkflowExecutor};
use lg_guardrails::ToolGuardrails;
use lg_monitoring::AccessLogger;
use lg_ratelimit::RateLimiter;
use lg_server::state::{AppState, UpstreamLlmHandler};
use lg_upstream::OllamaClient;

struct TestServer {
    base_url: String,
    // Held for the server's lifetime: dropping these deletes the
    // directories the running server reads/writes from.
    _extensions_dir: tempfile::TempDir,
    _access_log_dir: tempfile::TempDir,
}

async fn spawn_server(ollama_host: String, api_key: Option<String>, rate_limit_rps: u32) -> TestServer {
    let extensions_tmp = tempfile::tempdir().unwrap();
    let access_log_tmp = tempfile::tempdir().unwrap();
    let extensions_dir = extensions_tmp.path().to_path_buf();
    let access_log_dir = access_log_tmp.path().to_path_buf();

    let config = Arc::new(Config {
        ollama_host,
        port: 0,
        api_key,
        rate_limit_rps,
        debug: false,
        log_file: None,
        tls_enabled: false,
        tls_cert_file: None,
        tls_key_file: None,
        upstream_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(5),
        mcp_enabled: false,
        mcp_guardrails: McpGuardrailConfig::default(),
        mcp_servers_file: None,
        mcp_health_check_interval: Duration::from_secs(30),
        extensions_upsert_enabled: false,
        extensions_dir,
        cache_capacity: 100,
        cache_ttl: Duration::from_secs(60),
        access_log_dir,
        access_log_retention_days: 1,
    });

    let cache = Cache::new(config.cache_capacity, config.cache_ttl);
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_rps));
    let upstream = OllamaClient::new(config.ollama_host.clone(), config.upstream_timeout).unwrap();
    let guardrails = Arc::new(ToolGuardrails::from_config(&config.mcp_guardrails).unwrap());
    let manifests = ManifestRegistry::new();
    let modules = ModuleRegistry::new();
    let routes = RouteTable::new();
    let hooks = HookManager::new(manifests.clone());
    let llm_handler = Arc::new(UpstreamLlmHandler::new(upstream.clone()));
    let executor = WorkflowExecutor::new(llm_handler, manifests.clone(), modules.clone());
    let access_log = Arc::new(AccessLogger::new(config.access_log_dir.clone(), config.access_log_retention_days).unwrap());

    let state = AppState {
        config,
        cache,
        rate_limiter,
        upstream,
        mcp: None,
        guardrails,
        manifests,
        modules,
        routes,
        hooks,
        executor,
        access_log,
        shutdown: CancellationToken::new(),
    };

    let app = lg_server::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .ok();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        _extensions_dir: extensions_tmp,
        _access_log_dir: access_log_tmp,
    }
}

#[tokio::test]
async fn auth_reject_returns_401_with_openai_shaped_body() {
    let ollama = MockServer::start().await;
    let server = spawn_server(ollama.uri(), Some("sk-test".to_string()), 50).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat/completions", server.base_url))
        .header("X-Api-Key", "wrong")
        .json(&serde_json::json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Invalid API key");
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(body["error"]["request_id"].is_string());
}

#[tokio::test]
async fn health_endpoint_is_exempt_from_auth() {
    let ollama = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
        .mount(&ollama)
        .await;
    let server = spawn_server(ollama.uri(), Some("sk-test".to_string()), 50).await;

    let response = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn cache_hit_avoids_a_second_upstream_call() {
    let ollama = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        })))
        .expect(1)
        .mount(&ollama)
        .await;

    let server = spawn_server(ollama.uri(), None, 50).await;
    let client = reqwest::Client::new();
    let payload = serde_json::json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]});

    let first = client
        .post(format!("{}/v1/chat/completions", server.base_url))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    assert!(first.headers().get("cache-hit").is_none());
    let first_body: serde_json::Value = first.json().await.unwrap();

    let second = client
        .post(format!("{}/v1/chat/completions", server.base_url))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers().get("cache-hit").unwrap(), "1");
    let second_body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(first_body, second_body);

    // `expect(1)` on the wiremock registration above fails the test on drop
    // if a second upstream call was made.
    ollama.verify().await;
}

#[tokio::test]
async fn rate_limit_denies_excess_requests_with_retry_after() {
    let ollama = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        })))
        .mount(&ollama)
        .await;

    let server = spawn_server(ollama.uri(), None, 2).await;
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    let mut retry_after = None;
    for i in 0..5 {
        let payload = serde_json::json!({"model": "m", "messages": [{"role": "user", "content": format!("req-{i}")}]});
        let response = client
            .post(format!("{}/v1/chat/completions", server.base_url))
            .json(&payload)
            .send()
            .await
            .unwrap();
        if response.status() == 429 {
            retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
        }
        statuses.push(response.status().as_u16());
    }

    let successes = statuses.iter().filter(|&&s| s == 200).count();
    let denials = statuses.iter().filter(|&&s| s == 429).count();
    assert!(successes <= 2, "expected at most 2 successes, got {successes} in {statuses:?}");
    assert!(denials >= 1, "expected at least one 429, got {statuses:?}");
    assert_eq!(retry_after.as_deref(), Some("1"));
}
