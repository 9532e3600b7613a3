//! Events surfaced to the caller of a conversation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

/// One event of a conversation, serialized with a `type` discriminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Reasoning text
    Think { content: String, partial: bool },

    /// Answer text
    Say { content: String, partial: bool },

    /// A tool is about to be invoked (arguments already redacted)
    ToolCall { tool_name: String, arguments: Value },

    /// A tool finished (result already redacted)
    ToolResult { tool_name: String, result: Value },

    /// Orchestrator notices such as truncation
    ProcessInfo { message: String },

    /// Terminal failure
    Error {
        content: String,
        token_stats: TokenStats,
    },

    /// Terminal success
    Complete {
        think: String,
        say: String,
        token_stats: TokenStats,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCallRecord>>,
    },
}

impl StreamEvent {
    /// Whether this event ends the conversation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Complete { .. })
    }

    /// The `type` discriminator
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Think { .. } => "think",
            Self::Say { .. } => "say",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ProcessInfo { .. } => "process_info",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }
}

/// A tool invocation as reported in collected mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: Value,
    #[serde(default)]
    pub result: Option<Value>,
}

/// Estimated token accounting for one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenStats {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub api_calls: u64,
    pub tool_calls: u64,
    pub elapsed_seconds: f64,
    pub start_time: DateTime<Utc>,
    #[serde(skip)]
    started: Option<Instant>,
}

impl Default for TokenStats {
    fn default() -> Self {
        Self::start()
    }
}

impl TokenStats {
    /// Begin accounting now
    pub fn start() -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            api_calls: 0,
            tool_calls: 0,
            elapsed_seconds: 0.0,
            start_time: Utc::now(),
            started: Some(Instant::now()),
        }
    }

    /// Account for one model request carrying `prompt_tokens` of transcript
    pub fn record_request(&mut self, prompt_tokens: usize) {
        self.api_calls += 1;
        self.prompt_tokens += prompt_tokens as u64;
        self.refresh();
    }

    pub fn record_completion(&mut self, completion_tokens: usize) {
        self.completion_tokens += completion_tokens as u64;
        self.refresh();
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
        self.refresh();
    }

    /// Recompute the derived totals. Elapsed time never decreases.
    pub fn refresh(&mut self) {
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
        if let Some(started) = self.started {
            self.elapsed_seconds = self
                .elapsed_seconds
                .max(started.elapsed().as_secs_f64());
        }
    }
}
