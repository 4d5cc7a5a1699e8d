//! OpenAPI document served at `GET /openapi.json` (SPEC_FULL §4.1.y).
//!
//! Ambient, not named by the wire contract itself: the gateway's own clients
//! still benefit from a machine-readable description of the OpenAI-compatible
//! surface, the way the teacher documents its own proxy routes.

use utoipa::OpenApi;

use lg_types::chat::{
    ChatCompletionRequest, ChatMessage, MessageContent, Role, ToolCall, ToolCallFunction, ToolDefinition,
    ToolFunctionDefinition,
};

use crate::types::{ExecuteResponse, ExtensionListResponse, ExtensionSummary, HealthResponse, RefreshResponse};

#[derive(OpenApi)]
#[openapi(
    paths(),
    components(schemas(
        ChatCompletionRequest,
        ChatMessage,
        MessageContent,
        Role,
        ToolCall,
        ToolCallFunction,
        ToolDefinition,
        ToolFunctionDefinition,
        HealthResponse,
        ExtensionSummary,
        ExtensionListResponse,
        ExecuteResponse,
        RefreshResponse,
    )),
    tags(
        (name = "chat", description = "OpenAI-compatible chat completions"),
        (name = "extensions", description = "YAML extension engine management"),
    )
)]
pub struct ApiDoc;
