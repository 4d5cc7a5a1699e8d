//! `/v1/extensions*` management endpoints (§4.4.1, §4.4.7).

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde_json::{Map, Value};

use lg_extensions::manifest::ExtensionManifest;
use lg_extensions::{discovery, ExecutionContext};
use lg_types::{AppError, RequestContext};

use crate::state::AppState;
use crate::types::{ExecuteResponse, ExtensionListResponse, ExtensionSummary, RefreshResponse};

fn summarize(m: &ExtensionManifest, enabled: bool) -> ExtensionSummary {
    let extension_type = match m.extension_type {
        lg_extensions::manifest::ExtensionType::Workflow => "workflow",
        lg_extensions::manifest::ExtensionType::Middleware => "middleware",
        lg_extensions::manifest::ExtensionType::Observer => "observer",
    };
    ExtensionSummary {
        name: m.name.clone(),
        version: m.version.clone(),
        description: m.description.clone(),
        extension_type,
        enabled,
        builtin: m.builtin,
    }
}

pub async fn list_extensions(State(state): State<AppState>) -> Json<ExtensionListResponse> {
    let extensions = state
        .manifests
        .list()
        .into_iter()
        .map(|m| {
            let enabled = state.manifests.is_enabled(&m.name).unwrap_or(false);
            summarize(&m, enabled)
        })
        .collect();
    Json(ExtensionListResponse { extensions })
}

pub async fn get_extension(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(name): Path<String>,
) -> Response {
    match state.manifests.get(&name) {
        Some(manifest) => {
            let enabled = state.manifests.is_enabled(&name).unwrap_or(false);
            Json(summarize(&manifest, enabled)).into_response()
        }
        None => AppError::ExtensionNotFound(name).into_response_with_request_id(&ctx.request_id),
    }
}

/// `POST /v1/extensions/:name/execute` (§4.4.6's invoker logic, applied to
/// the management entry point rather than a per-endpoint dynamic route).
pub async fn execute_extension(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Option<Json<Value>>,
) -> Response {
    match run_extension(&state, &name, query, body.map(|Json(v)| v)).await {
        Ok(data) => Json(ExecuteResponse { success: true, data }).into_response(),
        Err(e) => e.into_response_with_request_id(&ctx.request_id),
    }
}

pub async fn run_extension(
    state: &AppState,
    name: &str,
    query: HashMap<String, String>,
    body: Option<Value>,
) -> lg_types::AppResult<Value> {
    if !state.manifests.is_enabled(name)? {
        return Err(AppError::ExtensionDisabled(name.to_string()));
    }
    let manifest = state
        .manifests
        .get(name)
        .ok_or_else(|| AppError::ExtensionNotFound(name.to_string()))?;
    if manifest.extension_type != lg_extensions::manifest::ExtensionType::Workflow {
        return Err(AppError::InvalidRequest(format!(
            "extension '{name}' is not a workflow"
        )));
    }
    let dir = state.extension_dir(name)?;

    let mut inputs = Map::new();
    for (k, v) in query {
        inputs.insert(k, Value::String(v));
    }
    if let Some(Value::Object(body_map)) = body {
        for (k, v) in body_map {
            inputs.insert(k, v);
        }
    }

    let manifest_path = dir.join("manifest.yaml").display().to_string();
    let ctx = ExecutionContext::root(manifest_path);
    state.executor.execute(&manifest, &dir, inputs, &ctx).await
}

/// `POST /v1/extensions/refresh` (§4.4.7).
pub async fn refresh_extensions(State(state): State<AppState>) -> Response {
    let mut report = RefreshResponse::default();

    let (discovered, manifest_errors) = match discovery::discover_manifests(&state.config.extensions_dir) {
        Ok(result) => result,
        Err(e) => {
            return AppError::InternalError(format!("extension discovery failed: {e}"))
                .into_response_with_request_id("refresh");
        }
    };
    report.errors.extend(manifest_errors);

    let discovered_names: std::collections::HashSet<String> =
        discovered.iter().map(|d| d.manifest.name.clone()).collect();

    let previously_known: Vec<String> = state
        .manifests
        .list()
        .into_iter()
        .filter(|m| !m.builtin)
        .map(|m| m.name)
        .collect();

    for name in &previously_known {
        if !discovered_names.contains(name) {
            state.routes.unregister_all(name);
            if state.manifests.unregister(name).is_ok() {
                report.removed.push(name.clone());
            }
        }
    }

    for found in discovered {
        let name = found.manifest.name.clone();
        let previous = state.manifests.get(&name);
        let unchanged = previous
            .as_ref()
            .is_some_and(|existing| manifests_equal(existing, &found.manifest));
        let is_update = previous.is_some();
        state.routes.unregister_all(&name);
        match state.manifests.register_or_update(found.manifest.clone(), found.dir) {
            Ok(()) => {
                if !found.manifest.endpoints.is_empty() {
                    if let Err(e) = state.routes.register(&name, &found.manifest.endpoints) {
                        report.errors.push(format!("{name}: {e}"));
                        continue;
                    }
                }
                if is_update {
                    if !unchanged {
                        report.updated.push(name);
                    }
                } else {
                    report.added.push(name);
                }
            }
            Err(e) => report.errors.push(format!("{name}: {e}")),
        }
    }

    let (modules, module_errors) = match discovery::discover_modules(&state.config.extensions_dir) {
        Ok(result) => result,
        Err(e) => {
            report.errors.push(format!("module discovery failed: {e}"));
            (Vec::new(), Vec::new())
        }
    };
    report.errors.extend(module_errors);
    for found in modules {
        state.modules.register(found.module, found.dir);
    }

    report.total = report.added.len() + report.updated.len() + report.removed.len();

    let status = if report.errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::PARTIAL_CONTENT
    };
    (status, Json(report)).into_response()
}

/// `PUT /v1/extensions/:name` (§4.4.7), feature-gated by
/// `EXTENSIONS_UPSERT_ENABLED`.
pub async fn upsert_extension(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(name): Path<String>,
    body: String,
) -> Response {
    if !state.config.extensions_upsert_enabled {
        return (
            StatusCode::NOT_IMPLEMENTED,
            Json(serde_json::json!({
                "error": {
                    "message": "extension upsert is not enabled on this gateway",
                    "type": "invalid_request_error",
                    "code": "UPSERT_NOT_CONFIGURED",
                    "request_id": ctx.request_id,
                }
            })),
        )
            .into_response();
    }

    let manifest: ExtensionManifest = match parse_manifest_body(&body) {
        Ok(m) => m,
        Err(e) => return AppError::ManifestInvalid(e).into_response_with_request_id(&ctx.request_id),
    };
    if manifest.name != name {
        return AppError::InvalidRequest(format!(
            "manifest name '{}' does not match path parameter '{name}'",
            manifest.name
        ))
        .into_response_with_request_id(&ctx.request_id);
    }

    let dir = state.config.extensions_dir.join(&name);
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        return AppError::InternalError(format!("failed to create extension directory: {e}"))
            .into_response_with_request_id(&ctx.request_id);
    }
    let manifest_yaml = match serde_yaml::to_string(&manifest) {
        Ok(y) => y,
        Err(e) => {
            return AppError::InternalError(format!("failed to serialize manifest: {e}"))
                .into_response_with_request_id(&ctx.request_id)
        }
    };
    if let Err(e) = tokio::fs::write(dir.join("manifest.yaml"), manifest_yaml).await {
        return AppError::InternalError(format!("failed to write manifest: {e}"))
            .into_response_with_request_id(&ctx.request_id);
    }

    state.routes.unregister_all(&name);
    if let Err(e) = state.manifests.register_or_update(manifest.clone(), dir) {
        return e.into_response_with_request_id(&ctx.request_id);
    }
    if !manifest.endpoints.is_empty() {
        if let Err(e) = state.routes.register(&name, &manifest.endpoints) {
            return e.into_response_with_request_id(&ctx.request_id);
        }
    }

    Json(serde_json::json!({"success": true, "name": name})).into_response()
}

/// Content equality for the refresh idempotence check (§8: a second refresh
/// with no filesystem change must produce an empty `updated` list).
/// `ExtensionManifest` carries no `PartialEq` impl (some nested fields are
/// free-form YAML/JSON), so compare via their serialized representation.
fn manifests_equal(a: &ExtensionManifest, b: &ExtensionManifest) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn parse_manifest_body(body: &str) -> Result<ExtensionManifest, String> {
    let manifest: ExtensionManifest = if body.trim_start().starts_with('{') {
        serde_json::from_str(body).map_err(|e| e.to_string())?
    } else {
        serde_yaml::from_str(body).map_err(|e| e.to_string())?
    };
    manifest.validate().map_err(|e| e.to_string())?;
    Ok(manifest)
}
