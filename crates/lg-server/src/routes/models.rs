//! `GET /v1/models` (§6): reshapes Ollama's local model list into the
//! OpenAI-compatible `{"object":"list","data":[...]}` envelope.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::Extension;

use lg_types::RequestContext;

use crate::state::AppState;

pub async fn list_models(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
    match state.upstream.list_models().await {
        Ok(body) => Json(body).into_response(),
        Err(err) => err.into_response_with_request_id(&ctx.request_id),
    }
}
