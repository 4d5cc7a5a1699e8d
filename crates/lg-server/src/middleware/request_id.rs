//! Request-ID middleware (§4.1 "Request-ID").
//!
//! Reads `X-Request-ID`, falling back to a fresh v4 UUID; stores a
//! [`RequestContext`] in the request extensions for downstream handlers and
//! middleware, and echoes the final ID on the response.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;

use lg_types::RequestContext;

use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn request_id_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let header_value = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let ctx = RequestContext::with_request_id(header_value.as_deref(), client_ip, state.shutdown.child_token());
    let request_id = ctx.request_id.clone();
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
