//! End-to-end tests against a real HTTP mock backend (wiremock), covering
//! the paths the inline unit tests in `lib.rs` can't reach without a server:
//! successful health probes, non-2xx passthrough, and the streaming proxy.

use std::time::Duration;

use futures_util::StreamExt;
use lg_types::AppError;
use lg_upstream::OllamaClient;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn health_check_succeeds_against_a_reachable_tags_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri(), Duration::from_secs(5)).unwrap();
    let check = client.health_check().await;
    assert!(check.healthy);
    assert!(check.error.is_none());
}

#[tokio::test]
async fn list_models_reshapes_ollama_tags_into_openai_shape() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{"name": "llama3"}]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri(), Duration::from_secs(5)).unwrap();
    let models = client.list_models().await.unwrap();
    assert_eq!(models["object"], "list");
    assert_eq!(models["data"][0]["id"], "llama3");
    assert_eq!(models["data"][0]["owned_by"], "ollama");
}

#[tokio::test]
async fn chat_completion_forwards_body_and_returns_upstream_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri(), Duration::from_secs(5)).unwrap();
    let body = serde_json::json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]});
    let response = client.chat_completion(body, "req-1").await.unwrap();
    assert_eq!(response["choices"][0]["message"]["content"], "hello");
}

#[tokio::test]
async fn chat_completion_passes_through_non_2xx_as_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": "model not found"
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri(), Duration::from_secs(5)).unwrap();
    let body = serde_json::json!({"model": "missing", "messages": []});
    let err = client.chat_completion(body, "req-2").await.unwrap_err();
    match err {
        AppError::UpstreamError { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body["error"], "model not found");
        }
        other => panic!("expected UpstreamError, got {other:?}"),
    }
}

#[tokio::test]
async fn stream_chat_completion_forwards_sse_frames_in_order() {
    let server = MockServer::start().await;
    let body = "data: {\"chunk\":1}\ndata: {\"chunk\":2}\ndata: [DONE]\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "text/event-stream")
                .append_header("content-type", "text/event-stream"),
        )
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri(), Duration::from_secs(5)).unwrap();
    let payload = serde_json::json!({"model": "m", "messages": []});
    let stream = client
        .stream_chat_completion(payload, "req-3", CancellationToken::new())
        .await
        .unwrap();

    let lines: Vec<String> = stream
        .map(|chunk| String::from_utf8_lossy(&chunk.unwrap()).trim_end().to_string())
        .filter(|l| !l.is_empty())
        .collect()
        .await;

    assert_eq!(lines, vec!["data: {\"chunk\":1}", "data: {\"chunk\":2}", "data: [DONE]"]);
}

#[tokio::test]
async fn stream_chat_completion_stops_reading_once_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("data: {\"chunk\":1}\n", "text/event-stream"))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri(), Duration::from_secs(5)).unwrap();
    let cancellation = CancellationToken::new();
    cancellation.cancel();
    let payload = serde_json::json!({"model": "m", "messages": []});
    let stream = client
        .stream_chat_completion(payload, "req-4", cancellation)
        .await
        .unwrap();

    let lines: Vec<_> = stream.collect().await;
    assert!(lines.is_empty(), "a pre-cancelled stream should yield no frames");
}
