//! OpenAI-compatible LLM client.
//!
//! Talks to the OpenAI Chat Completions API and any endpoint that speaks the
//! same protocol (Ollama, vLLM, Together, ...), in both streaming SSE and
//! non-streaming modes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::streaming::sse_delta_stream;
use crate::llm::types::{ChatRequest, ChatResponse, Message, Role, ToolCall, ToolDefinition};
use crate::llm::{ChatModel, DeltaStream};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Configuration for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub api_key: String,
    /// Base URL, without the trailing `/chat/completions`.
    pub base_url: String,
    /// Used when a request leaves `model` empty.
    pub default_model: String,
    /// Used when a request leaves `max_tokens` unset. `None` omits the field.
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl LlmClientConfig {
    /// Configuration for the OpenAI API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::openai_compatible(api_key, model, OPENAI_BASE_URL)
    }

    /// Configuration for any OpenAI-compatible API.
    pub fn openai_compatible(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            default_model: model.into(),
            max_tokens: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the Chat Completions API.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client. Fails when the API key is empty.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::MissingApiKey {
                provider: "openai".into(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    /// The model used when a request does not name one.
    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    // -- request building ----------------------------------------------------

    /// Build the JSON body for the Chat Completions API.
    fn build_request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let model = if request.model.is_empty() {
            self.config.default_model.as_str()
        } else {
            request.model.as_str()
        };

        let mut body = json!({
            "model": model,
            "messages": messages_to_openai(&request.messages),
        });

        if let Some(max_tokens) = request.max_tokens.or(self.config.max_tokens) {
            body["max_tokens"] = json!(max_tokens);
        }

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        if !request.tools.is_empty() {
            body["tools"] = tools_to_openai(&request.tools);
            body["tool_choice"] = json!("auto");
        }

        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    /// POST `body` to `{base_url}/chat/completions`, failing on non-2xx.
    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("invalid authorization header: {e}"),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(url = %url, model = %body["model"], "sending LLM request");

        let resp = self
            .http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::LlmRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }

        Ok(resp)
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_request_body(request, false);
        let resp = self.send(&body).await?;

        let text = resp.text().await.map_err(|e| AgentError::LlmRequestFailed {
            reason: format!("failed to read response body: {e}"),
        })?;

        let v: Value = serde_json::from_str(&text).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid JSON response: {e}"),
        })?;

        parse_openai_response(&v)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream> {
        let body = self.build_request_body(request, true);
        let resp = self.send(&body).await?;
        Ok(sse_delta_stream(resp.bytes_stream()))
    }
}

// ===========================================================================
// Wire format conversion (free functions)
// ===========================================================================

/// Convert messages to the OpenAI wire format.
///
/// Tool calls travel in `assistant.tool_calls` with their arguments as a
/// JSON string; tool results use `role: "tool"` with a `tool_call_id`.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System | Role::User => json!({
                "role": msg.role.as_str(),
                "content": msg.content,
            }),
            Role::Assistant if msg.tool_calls.is_empty() => json!({
                "role": "assistant",
                "content": msg.content,
            }),
            Role::Assistant => {
                let tool_calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments,
                            }
                        })
                    })
                    .collect();

                let mut m = json!({
                    "role": "assistant",
                    "tool_calls": tool_calls,
                });
                if !msg.content.is_empty() {
                    m["content"] = json!(msg.content);
                }
                m
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id,
                "content": msg.content,
            }),
        })
        .collect()
}

/// Convert tool definitions into `{"type": "function", "function": {...}}`.
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();
    json!(tool_values)
}

/// Parse a non-streaming Chat Completions response.
///
/// Tool-call arguments are kept as the raw string the model produced;
/// validating them is the executor's job.
pub fn parse_openai_response(v: &Value) -> Result<ChatResponse> {
    let choice = &v["choices"][0];
    let message = &choice["message"];

    if message.is_null() {
        return Err(AgentError::LlmParseFailed {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or_default().to_owned(),
                    name: tc["function"]["name"]
                        .as_str()
                        .unwrap_or_default()
                        .to_owned(),
                    arguments: tc["function"]["arguments"]
                        .as_str()
                        .unwrap_or_default()
                        .to_owned(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content: message["content"].as_str().unwrap_or_default().to_owned(),
        tool_calls,
        finish_reason: choice["finish_reason"].as_str().map(str::to_owned),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
