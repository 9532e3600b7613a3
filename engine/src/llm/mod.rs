//! Model Backend Abstraction Layer
//!
//! This module provides the streaming contract between the orchestrator and a
//! language-model backend. A backend receives the transcript plus the tool
//! catalog and answers with an ordered stream of incremental deltas. Each
//! delta may carry answer text, provider reasoning text and tool-call
//! fragments keyed by a per-turn index.

use async_trait::async_trait;
use futures::Stream;
use sdk::types::ToolSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

pub mod openai;

pub use openai::OpenAiBackend;

/// Result type for model backend operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during model backend operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Stream error: {0}")]
    StreamError(String),
}

impl LLMError {
    /// Whether a retry of the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded
                | Self::ServerError { .. }
                | Self::NetworkError(_)
                | Self::Timeout
        )
    }
}

/// Message in a conversation transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: MessageRole,

    /// Content of the message. May be empty for assistant messages that
    /// only carry tool calls.
    pub content: String,

    /// Tool calls requested by an assistant message, in request order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Optional tool call ID for tool result messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message requesting tool calls
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(MessageRole::Assistant, content)
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a new tool result message
    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,

    /// Assistant message
    Assistant,

    /// System message
    System,

    /// Tool result message
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Tool call request from the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this tool call within the turn
    pub id: String,

    /// Fully-qualified name of the tool to call
    pub name: String,

    /// Arguments to pass to the tool (raw JSON string)
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// A request for one streamed model turn
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,

    /// Tool catalog offered to the model. Empty disables tool calling.
    pub tools: Vec<ToolSchema>,

    pub temperature: f64,

    pub max_tokens: u32,
}

/// One fragment of a tool call, identified by its per-turn index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: usize,

    #[serde(default)]
    pub id: Option<String>,

    /// Slice of the tool name
    #[serde(default)]
    pub name: Option<String>,

    /// Slice of the argument string
    #[serde(default)]
    pub arguments: Option<String>,
}

/// One incremental delta of a streamed model turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    /// Answer text fragment (may contain reasoning markers)
    pub content: Option<String>,

    /// Provider-side reasoning fragment
    pub reasoning: Option<String>,

    pub tool_calls: Vec<ToolCallFragment>,
}

impl StreamDelta {
    /// A delta carrying only a content fragment
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    /// A delta carrying only a reasoning fragment
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Self::default()
        }
    }

    /// A delta carrying only tool-call fragments
    pub fn tool_calls(fragments: Vec<ToolCallFragment>) -> Self {
        Self {
            tool_calls: fragments,
            ..Self::default()
        }
    }
}

/// The ordered delta stream of one model turn
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send>>;

/// Model backend trait that all backends must implement
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Returns the name of the backend (e.g., "openai")
    fn name(&self) -> &str;

    /// Start a streamed model turn
    ///
    /// # Arguments
    /// * `request` - Transcript, tool catalog and sampling parameters
    ///
    /// # Returns
    /// * `Ok(DeltaStream)` - Once the backend accepted the request
    /// * `Err(LLMError)` - If the request could not be established. Errors
    ///   raised after this point arrive as stream items.
    async fn stream_chat(&self, request: ChatRequest) -> Result<DeltaStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");
        assert_eq!(user_msg.tool_call_id, None);

        let assistant_msg = Message::assistant_with_tools(
            "",
            vec![ToolCall::new("call_1", "shell_execute", "{}")],
        );
        assert_eq!(assistant_msg.role, MessageRole::Assistant);
        assert_eq!(assistant_msg.tool_calls.len(), 1);

        let tool_msg = Message::tool_result("result", "call_123");
        assert_eq!(tool_msg.role, MessageRole::Tool);
        assert_eq!(tool_msg.tool_call_id, Some("call_123".to_string()));
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let msg = Message::user("test");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));

        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, deserialized);
    }

    #[test]
    fn test_transient_errors() {
        assert!(LLMError::RateLimitExceeded.is_transient());
        assert!(LLMError::Timeout.is_transient());
        assert!(LLMError::NetworkError("reset".into()).is_transient());
        assert!(LLMError::ServerError {
            status: 502,
            message: "bad gateway".into()
        }
        .is_transient());

        assert!(!LLMError::AuthenticationFailed("no key".into()).is_transient());
        assert!(!LLMError::InvalidRequest("bad".into()).is_transient());
        assert!(!LLMError::ParseError("junk".into()).is_transient());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(MessageRole::Tool.to_string(), "tool");
        assert_eq!(MessageRole::System.to_string(), "system");
    }
}
