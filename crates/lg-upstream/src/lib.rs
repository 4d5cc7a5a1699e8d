//! HTTP client for the Ollama upstream backend (§4.1, §4.1.x).
//!
//! Ollama's OpenAI-compatible surface is used directly: `/v1/chat/completions`
//! for completions, streaming or not. `/api/tags`, Ollama's native
//! tag-listing endpoint, backs both the `/health` probe and `/v1/models`
//! (reshaped into the OpenAI `models.list` shape per §4.1).

use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use lg_types::{AppError, AppResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub healthy: bool,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagsModel>,
}

#[derive(Debug, Deserialize)]
struct TagsModel {
    name: String,
}

fn reshape_tags(tags: TagsResponse) -> Value {
    let data: Vec<Value> = tags
        .models
        .into_iter()
        .map(|m| {
            serde_json::json!({
                "id": m.name,
                "object": "model",
                "created": 0,
                "owned_by": "ollama",
            })
        })
        .collect();
    serde_json::json!({ "object": "list", "data": data })
}

/// Thin HTTP client over an Ollama instance's OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// §4.1 `/health`: a short GET of the tag-list endpoint.
    pub async fn health_check(&self) -> HealthCheck {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => HealthCheck {
                healthy: true,
                error: None,
            },
            Ok(response) => HealthCheck {
                healthy: false,
                error: Some(format!("HTTP {}", response.status())),
            },
            Err(e) => HealthCheck {
                healthy: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// `GET /v1/models`: fetches Ollama's native tag list and reshapes each
    /// entry per §4.1.
    pub async fn list_models(&self) -> AppResult<Value> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("malformed tags response: {e}")))?;

        Ok(reshape_tags(tags))
    }

    /// Non-streaming chat-completions proxy. `body` is the full JSON request
    /// (model/messages, and in the tool-orchestrator's case the filtered
    /// `tools` array); `stream` is forced to `false` regardless of what the
    /// caller set.
    pub async fn chat_completion(&self, mut body: Value, request_id: &str) -> AppResult<Value> {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stream".to_string(), Value::Bool(false));
        }

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("X-Request-ID", request_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("malformed upstream response: {e}")))
    }

    /// Streaming chat-completions proxy (§4.1.1 "if stream=true"). Forwards
    /// the upstream's already-OpenAI-shaped SSE frames through unchanged,
    /// buffering partial lines across HTTP byte chunks, and stops reading as
    /// soon as `cancellation` fires (client disconnect or shutdown, per §4.1
    /// "Failure semantics").
    pub async fn stream_chat_completion(
        &self,
        mut body: Value,
        request_id: &str,
        cancellation: CancellationToken,
    ) -> AppResult<impl Stream<Item = AppResult<Bytes>>> {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stream".to_string(), Value::Bool(true));
        }

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("X-Request-ID", request_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let line_buffer = Mutex::new(String::new());

        let framed = response
            .bytes_stream()
            .take_until(async move { cancellation.cancelled().await })
            .map(move |chunk| -> AppResult<Vec<Bytes>> {
                let chunk = chunk.map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
                let text = String::from_utf8_lossy(&chunk);

                let mut buffer = line_buffer.lock();
                buffer.push_str(&text);

                let mut lines = Vec::new();
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    lines.push(Bytes::from(line));
                }
                Ok(lines)
            })
            .flat_map(|result| {
                let items: Vec<AppResult<Bytes>> = match result {
                    Ok(lines) => lines.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                futures::stream::iter(items)
            });

        Ok(framed)
    }
}

/// §4.1 "Upstream non-2xx -> body passed through with 502".
async fn upstream_error(response: reqwest::Response) -> AppError {
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    AppError::UpstreamError { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshapes_tags_into_openai_model_list() {
        let tags = TagsResponse {
            models: vec![
                TagsModel { name: "llama3".into() },
                TagsModel { name: "mistral".into() },
            ],
        };
        let reshaped = reshape_tags(tags);
        assert_eq!(reshaped["object"], "list");
        assert_eq!(reshaped["data"][0]["id"], "llama3");
        assert_eq!(reshaped["data"][0]["object"], "model");
        assert_eq!(reshaped["data"][0]["created"], 0);
        assert_eq!(reshaped["data"][0]["owned_by"], "ollama");
        assert_eq!(reshaped["data"][1]["id"], "mistral");
    }

    #[test]
    fn empty_tag_list_reshapes_to_empty_data() {
        let reshaped = reshape_tags(TagsResponse { models: vec![] });
        assert_eq!(reshaped["data"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[tokio::test]
    async fn health_check_reports_connection_error_without_panicking() {
        // Port 1 is reserved and unroutable, so this deterministically fails
        // to connect instead of racing a real server.
        let client = OllamaClient::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        let health = client.health_check().await;
        assert!(!health.healthy);
        assert!(health.error.is_some());
    }
}
