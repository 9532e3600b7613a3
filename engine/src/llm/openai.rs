//! OpenAI-compatible streaming backend
//!
//! Talks to any `/chat/completions` endpoint that supports `stream: true`
//! (OpenAI, DeepSeek, Qwen, vLLM, Ollama's compatibility layer) and parses
//! the server-sent events until `[DONE]`.

use super::{
    ChatRequest, DeltaStream, LLMError, Message, MessageRole, ModelBackend, StreamDelta,
    ToolCallFragment,
};
use crate::config::LLMConfig;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, trace};

pub struct OpenAiBackend {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            client: reqwest::Client::new(),
            request_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(600),
        }
    }

    /// Build a backend from the `[llm]` section, resolving the API key
    pub fn from_config(config: &LLMConfig) -> Self {
        Self::new(&config.base_url, &config.model, config.resolve_api_key())
    }

    /// Bound the time until response headers arrive
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bound the silence between two streamed events
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    fn payload(&self, request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(wire_message).collect();

        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|schema| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": schema.name,
                            "description": schema.description,
                            "parameters": schema.parameters,
                        }
                    })
                })
                .collect();
            payload["tools"] = Value::Array(tools);
        }

        payload
    }
}

fn wire_message(msg: &Message) -> Value {
    match msg.role {
        MessageRole::Assistant if !msg.tool_calls.is_empty() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments },
                    })
                })
                .collect();
            json!({ "role": "assistant", "content": msg.content, "tool_calls": calls })
        }
        MessageRole::Tool => json!({
            "role": "tool",
            "content": msg.content,
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
        }),
        role => json!({ "role": role.to_string(), "content": msg.content }),
    }
}

#[derive(Debug, Deserialize)]
struct ChunkData {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    #[serde(default)]
    function: ChunkFunction,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

/// Parse one SSE data payload into a delta. Keepalive chunks yield `None`.
fn parse_chunk(data: &str) -> super::Result<Option<StreamDelta>> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| LLMError::ParseError(format!("{}: {}", e, data)))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Err(LLMError::StreamError(message));
    }

    let chunk: ChunkData =
        serde_json::from_value(value).map_err(|e| LLMError::ParseError(e.to_string()))?;

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };
    let delta = choice.delta;

    let tool_calls: Vec<ToolCallFragment> = delta
        .tool_calls
        .into_iter()
        .map(|call| ToolCallFragment {
            index: call.index,
            id: call.id.filter(|id| !id.is_empty()),
            name: call.function.name,
            arguments: call.function.arguments,
        })
        .collect();

    let content = delta.content.filter(|c| !c.is_empty());
    let reasoning = delta.reasoning_content.filter(|r| !r.is_empty());

    if content.is_none() && reasoning.is_none() && tool_calls.is_empty() {
        return Ok(None);
    }

    Ok(Some(StreamDelta {
        content,
        reasoning,
        tool_calls,
    }))
}

fn map_send_error(e: reqwest::Error) -> LLMError {
    if e.is_timeout() {
        LLMError::Timeout
    } else {
        LLMError::NetworkError(e.to_string())
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_chat(&self, request: ChatRequest) -> super::Result<DeltaStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = self.payload(&request);

        debug!(
            "Requesting streamed turn: {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = tokio::time::timeout(self.request_timeout, builder.send())
            .await
            .map_err(|_| LLMError::Timeout)?
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                code if code >= 500 => LLMError::ServerError {
                    status: code,
                    message: text,
                },
                _ => LLMError::InvalidRequest(text),
            });
        }

        let events = response.bytes_stream().eventsource().boxed();
        let idle_timeout = self.idle_timeout;

        let deltas = futures::stream::unfold(Some(events), move |state| async move {
            let mut events = state?;
            loop {
                let event = match tokio::time::timeout(idle_timeout, events.next()).await {
                    Err(_) => return Some((Err(LLMError::Timeout), None)),
                    Ok(None) => return None,
                    Ok(Some(Err(e))) => {
                        return Some((Err(LLMError::StreamError(e.to_string())), None))
                    }
                    Ok(Some(Ok(event))) => event,
                };

                let data = event.data.trim();
                trace!("SSE data: {}", data);
                if data == "[DONE]" {
                    return None;
                }
                if data.is_empty() {
                    continue;
                }

                match parse_chunk(data) {
                    Ok(Some(delta)) => return Some((Ok(delta), Some(events))),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), None)),
                }
            }
        });

        Ok(Box::pin(deltas))
    }
}
