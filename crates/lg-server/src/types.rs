//! Wire types for the extensions API and health probe (§4.1, §4.4.6, §4.4.7).

use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "status")]
pub enum HealthResponse {
    #[serde(rename = "healthy")]
    Healthy {
        ollama: &'static str,
        ollama_host: String,
    },
    #[serde(rename = "unhealthy")]
    Unhealthy {
        error: String,
        ollama_host: String,
    },
}

/// One entry of `GET /v1/extensions` (§4.4.1 `List`).
#[derive(Debug, Serialize, ToSchema)]
pub struct ExtensionSummary {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(rename = "type")]
    pub extension_type: &'static str,
    pub enabled: bool,
    pub builtin: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExtensionListResponse {
    pub extensions: Vec<ExtensionSummary>,
}

/// `POST /v1/extensions/:name/execute` and every dynamically mounted
/// workflow endpoint (§4.4.6) share this envelope.
#[derive(Debug, Serialize, ToSchema)]
pub struct ExecuteResponse {
    pub success: bool,
    pub data: serde_json::Value,
}

/// `POST /v1/extensions/refresh` (§4.4.7).
#[derive(Debug, Serialize, ToSchema, Default)]
pub struct RefreshResponse {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub errors: Vec<String>,
    pub total: usize,
}
