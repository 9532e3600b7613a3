//! Conversation orchestration
//!
//! The agent drives a multi-turn exchange between the model backend and the
//! capability registry, surfacing every step as a [`StreamEvent`].

pub mod compress;
pub mod core;
pub mod events;
pub mod preprocess;
pub mod redact;
pub mod stream;

pub use self::core::{AgentCore, CallerIdentity, ChatMode, EventStream, ITERATION_LIMIT_FALLBACK};
pub use events::{StreamEvent, TokenStats, ToolCallRecord};
pub use preprocess::PromptPreprocessor;
pub use redact::{Redactor, REDACTED};
