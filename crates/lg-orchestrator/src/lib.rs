//! Multi-round MCP tool-calling orchestrator (§4.3).
//!
//! Exposes MCP tools to the model via the OpenAI `tools` field, executes the
//! tool calls the model emits, feeds results back, and bounds the loop at
//! `R` rounds.

use std::time::Duration;

use lg_guardrails::ToolGuardrails;
use lg_mcp::McpManager;
use lg_types::chat::ChatCompletionRequest;
use lg_types::{AppError, AppResult};
use lg_upstream::OllamaClient;
use serde_json::Value;

/// Runs the tool-calling loop for one request (§4.3 "Algorithm (one
/// request)"). If no tools survive guardrail filtering, or the first
/// response carries no tool calls, this degenerates to a single
/// pass-through call, matching §4.1.1 step 2's "else pass-through to
/// upstream".
pub async fn orchestrate(
    request: &ChatCompletionRequest,
    request_id: &str,
    mcp: &McpManager,
    guardrails: &ToolGuardrails,
    upstream: &OllamaClient,
) -> AppResult<Value> {
    let tool_defs = filtered_tool_definitions(mcp, guardrails);

    let mut messages = serde_json::to_value(&request.messages)?
        .as_array()
        .cloned()
        .unwrap_or_default();

    let mut response = call_upstream(upstream, request, &messages, &tool_defs, request_id).await?;
    let mut assistant_message = extract_assistant_message(&response)?;

    if tool_defs.is_empty() || extract_tool_calls(&assistant_message).is_empty() {
        return Ok(response);
    }

    for round in 1..=guardrails.max_tool_rounds() {
        let tool_calls = extract_tool_calls(&assistant_message);
        guardrails.check_round_size(tool_calls.len())?;

        tracing::debug!(request_id, round, calls = tool_calls.len(), "tool round starting");

        messages.push(assistant_message.clone());
        for call in &tool_calls {
            messages.push(execute_one_call(request_id, call, mcp, guardrails).await);
        }

        response = call_upstream(upstream, request, &messages, &tool_defs, request_id).await?;
        assistant_message = extract_assistant_message(&response)?;

        if extract_tool_calls(&assistant_message).is_empty() {
            return Ok(response);
        }
    }

    Ok(exhausted_round_budget_response(response))
}

fn filtered_tool_definitions(mcp: &McpManager, guardrails: &ToolGuardrails) -> Vec<Value> {
    mcp.list_tool_descriptors()
        .into_iter()
        .filter(|tool| guardrails.is_allowed(&tool.id))
        .map(|tool| {
            let mut function = serde_json::json!({
                "name": tool.id,
                "parameters": tool.input_schema,
            });
            if let Some(description) = &tool.description {
                function["description"] = Value::String(description.clone());
            }
            serde_json::json!({ "type": "function", "function": function })
        })
        .collect()
}

async fn call_upstream(
    upstream: &OllamaClient,
    request: &ChatCompletionRequest,
    messages: &[Value],
    tool_defs: &[Value],
    request_id: &str,
) -> AppResult<Value> {
    let mut body = serde_json::to_value(request)?;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("messages".to_string(), Value::Array(messages.to_vec()));
        if tool_defs.is_empty() {
            obj.remove("tools");
        } else {
            obj.insert("tools".to_string(), Value::Array(tool_defs.to_vec()));
        }
    }
    upstream.chat_completion(body, request_id).await
}

fn extract_assistant_message(response: &Value) -> AppResult<Value> {
    response
        .pointer("/choices/0/message")
        .filter(|v| v.is_object())
        .cloned()
        .ok_or_else(|| AppError::UpstreamUnavailable("upstream response missing choices[0].message".into()))
}

fn extract_tool_calls(message: &Value) -> Vec<Value> {
    message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Executes one model-emitted tool call and wraps the outcome in a `tool`
/// role message (§4.3 step 4b/4c). Failures never abort the loop here — they
/// become a structured error string in the tool result, per §4.3 "Failure
/// semantics".
async fn execute_one_call(
    request_id: &str,
    call: &Value,
    mcp: &McpManager,
    guardrails: &ToolGuardrails,
) -> Value {
    let tool_call_id = call.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let tool_id = call
        .pointer("/function/name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let arguments_raw = call
        .pointer("/function/arguments")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let outcome = resolve_and_execute(&tool_id, arguments_raw, mcp, guardrails).await;
    let content = match &outcome {
        Ok(text) => text.clone(),
        Err(e) => format!("error: {e}"),
    };

    tracing::info!(
        request_id,
        tool_id,
        tool_call_id,
        ok = outcome.is_ok(),
        "tool call completed"
    );

    serde_json::json!({
        "role": "tool",
        "tool_call_id": tool_call_id,
        "content": content,
    })
}

async fn resolve_and_execute(
    tool_id: &str,
    arguments_raw: &str,
    mcp: &McpManager,
    guardrails: &ToolGuardrails,
) -> AppResult<String> {
    if !guardrails.is_allowed(tool_id) {
        return Err(AppError::ToolDenied(tool_id.to_string()));
    }

    let descriptor = mcp
        .find_tool(tool_id)
        .ok_or_else(|| AppError::ToolDenied(format!("unknown tool '{tool_id}'")))?;

    let arguments: Value = serde_json::from_str(arguments_raw).map_err(|e| {
        AppError::ToolExecutionFailed(tool_id.to_string(), format!("invalid JSON arguments: {e}"))
    })?;

    let validator = jsonschema::JSONSchema::compile(&descriptor.input_schema).map_err(|e| {
        AppError::ToolExecutionFailed(tool_id.to_string(), format!("invalid tool schema: {e}"))
    })?;
    if !validator.is_valid(&arguments) {
        return Err(AppError::ToolExecutionFailed(
            tool_id.to_string(),
            "arguments failed schema validation".to_string(),
        ));
    }

    let timeout = guardrails.effective_timeout(descriptor.timeout_secs.map(Duration::from_secs));
    let result = mcp.call_tool(tool_id, arguments, timeout).await?;

    let (truncated, was_truncated) = guardrails.truncate_result(&result);
    if was_truncated {
        tracing::debug!(tool_id, "tool result truncated to configured byte limit");
    }
    Ok(truncated)
}

/// §4.3 step 5: "return the last assistant response with a synthetic note
/// that the round budget was exhausted".
fn exhausted_round_budget_response(mut response: Value) -> Value {
    const NOTE: &str = "\n\n[round budget exhausted: tool-calling loop stopped without converging]";
    if let Some(content) = response.pointer_mut("/choices/0/message/content") {
        match content {
            Value::String(existing) => existing.push_str(NOTE),
            _ => *content = Value::String(NOTE.trim_start().to_string()),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use lg_config::McpGuardrailConfig;
    use std::collections::HashMap;

    fn guardrails(allow: &[&str], deny: &[&str]) -> ToolGuardrails {
        ToolGuardrails::from_config(&McpGuardrailConfig {
            max_tool_rounds: 3,
            max_tool_calls_per_round: 2,
            default_tool_timeout: Duration::from_secs(5),
            max_tool_result_bytes: 1024,
            allow_tools: allow.iter().map(|s| s.to_string()).collect(),
            deny_tools: deny.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    #[test]
    fn extract_assistant_message_reads_first_choice() {
        let response = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hi"}}]
        });
        let message = extract_assistant_message(&response).unwrap();
        assert_eq!(message["content"], "hi");
    }

    #[test]
    fn extract_assistant_message_errors_on_malformed_upstream_body() {
        let response = serde_json::json!({"choices": []});
        assert!(extract_assistant_message(&response).is_err());
    }

    #[test]
    fn extract_tool_calls_defaults_to_empty() {
        let message = serde_json::json!({"role": "assistant", "content": "hi"});
        assert!(extract_tool_calls(&message).is_empty());
    }

    #[test]
    fn exhausted_round_budget_appends_note_to_string_content() {
        let response = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "partial answer"}}]
        });
        let response = exhausted_round_budget_response(response);
        let content = response.pointer("/choices/0/message/content").unwrap().as_str().unwrap();
        assert!(content.starts_with("partial answer"));
        assert!(content.contains("round budget exhausted"));
    }

    #[tokio::test]
    async fn resolve_and_execute_rejects_denied_tool() {
        let mcp = McpManager::new();
        let guardrails = guardrails(&[], &["mcp.fs.*"]);
        let result = resolve_and_execute("mcp.fs.read", "{}", &mcp, &guardrails).await;
        assert!(matches!(result, Err(AppError::ToolDenied(_))));
    }

    #[tokio::test]
    async fn resolve_and_execute_rejects_unknown_tool() {
        let mcp = McpManager::new();
        let guardrails = guardrails(&[], &[]);
        let result = resolve_and_execute("mcp.fs.nonexistent", "{}", &mcp, &guardrails).await;
        assert!(matches!(result, Err(AppError::ToolDenied(_))));
    }

    #[tokio::test]
    async fn resolve_and_execute_rejects_malformed_json_arguments() {
        let mcp = McpManager::new();
        mcp.register(&lg_mcp::McpServerDescriptor {
            name: "fs".into(),
            transport: lg_mcp::TransportDescriptor::Stdio {
                command: "sh".into(),
                args: vec![
                    "-c".into(),
                    r#"while IFS= read -r line; do echo '{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"read","inputSchema":{"type":"object"}}]}}'; done"#
                        .into(),
                ],
                env: HashMap::new(),
            },
            connect_timeout_secs: 5,
        })
        .await
        .unwrap();

        let guardrails = guardrails(&[], &[]);
        let result = resolve_and_execute("mcp.fs.read", "not json", &mcp, &guardrails).await;
        assert!(matches!(result, Err(AppError::ToolExecutionFailed(_, _))));
    }
}
