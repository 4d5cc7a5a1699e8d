//! Catch-all invoker for dynamically mounted workflow endpoints (§4.4.6).
//!
//! Axum's router can't de-register a route once mounted, so every possible
//! `/v1/extensions/:name/*rest` request funnels through this single handler,
//! which consults [`lg_extensions::RouteTable`] to decide whether the route
//! is still live.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::Method;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde_json::Value;

use lg_extensions::manifest::HttpMethod;
use lg_types::{AppError, RequestContext};

use crate::routes::extensions::run_extension;
use crate::state::AppState;
use crate::types::ExecuteResponse;

fn to_http_method(method: &Method) -> Option<HttpMethod> {
    match method.as_str() {
        "GET" => Some(HttpMethod::Get),
        "POST" => Some(HttpMethod::Post),
        "PUT" => Some(HttpMethod::Put),
        "DELETE" => Some(HttpMethod::Delete),
        "PATCH" => Some(HttpMethod::Patch),
        "HEAD" => Some(HttpMethod::Head),
        "OPTIONS" => Some(HttpMethod::Options),
        _ => None,
    }
}

pub async fn dynamic_invoke(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    method: Method,
    Path((name, rest)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    body: Option<Json<Value>>,
) -> Response {
    let full_path = format!("/v1/extensions/{name}/{rest}");
    let Some(http_method) = to_http_method(&method) else {
        return AppError::NotFound(full_path).into_response_with_request_id(&ctx.request_id);
    };

    let Some(_route) = state.routes.lookup(http_method, &full_path) else {
        return AppError::NotFound(format!("no dynamic endpoint registered at {full_path}"))
            .into_response_with_request_id(&ctx.request_id);
    };

    match run_extension(&state, &name, query, body.map(|Json(v)| v)).await {
        Ok(data) => Json(ExecuteResponse { success: true, data }).into_response(),
        Err(e) => e.into_response_with_request_id(&ctx.request_id),
    }
}
