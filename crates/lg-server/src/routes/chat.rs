//! `POST /v1/chat/completions` (§4.1.1): the gateway's core proxy handler.

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use futures_util::StreamExt;
use serde_json::Value;

use lg_orchestrator::orchestrate;
use lg_types::chat::ChatCompletionRequest;
use lg_types::{AppError, RequestContext};
use lg_upstream::OllamaClient;

use crate::state::AppState;

pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let request_id = ctx.request_id.clone();

    if let Err(e) = request.validate() {
        return e.into_response_with_request_id(&request_id);
    }

    let tools_active = state.mcp.as_ref().is_some_and(|m| !m.is_empty());

    if request.stream {
        if tools_active {
            return AppError::InvalidRequest(
                "streaming is not supported while tool calling is active".to_string(),
            )
            .into_response_with_request_id(&request_id);
        }
        return stream_response(&state.upstream, &request, &request_id, ctx.cancellation.clone()).await;
    }

    let fingerprint = match request.cache_fingerprint() {
        Ok(fp) => fp,
        Err(e) => return e.into_response_with_request_id(&request_id),
    };

    if let Some(cached) = state.cache.get(&fingerprint) {
        return cached_response(cached);
    }

    let result = match state.mcp.as_ref().filter(|_| tools_active) {
        Some(mcp) => orchestrate(&request, &request_id, mcp, &state.guardrails, &state.upstream).await,
        None => pass_through(&state.upstream, &request, &request_id).await,
    };

    let usage = match &result {
        Ok(body) => body.get("usage").cloned(),
        Err(_) => None,
    };
    state
        .hooks
        .run_llm_response_hooks(&request_id, &request.model, usage.as_ref())
        .await;

    match result {
        Ok(body) => {
            if let Ok(bytes) = serde_json::to_vec(&body) {
                state.cache.put(fingerprint, bytes, None);
            }
            Json(body).into_response()
        }
        Err(e) => e.into_response_with_request_id(&request_id),
    }
}

async fn pass_through(
    upstream: &OllamaClient,
    request: &ChatCompletionRequest,
    request_id: &str,
) -> lg_types::AppResult<Value> {
    let body = serde_json::to_value(request)?;
    upstream.chat_completion(body, request_id).await
}

fn cached_response(bytes: Vec<u8>) -> Response {
    Response::builder()
        .status(200)
        .header(header::CONTENT_TYPE, "application/json")
        .header("Cache-Hit", "1")
        .body(Body::from(bytes))
        .expect("static headers and byte body never fail to build")
}

async fn stream_response(
    upstream: &OllamaClient,
    request: &ChatCompletionRequest,
    request_id: &str,
    cancellation: tokio_util::sync::CancellationToken,
) -> Response {
    let body = match serde_json::to_value(request) {
        Ok(v) => v,
        Err(e) => return lg_types::AppError::from(e).into_response_with_request_id(request_id),
    };

    match upstream.stream_chat_completion(body, request_id, cancellation).await {
        Ok(stream) => {
            let byte_stream = stream.map(|item| item.map_err(std::io::Error::other));
            Response::builder()
                .status(200)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from_stream(byte_stream))
                .expect("static headers and byte stream never fail to build")
        }
        Err(e) => e.into_response_with_request_id(request_id),
    }
}
