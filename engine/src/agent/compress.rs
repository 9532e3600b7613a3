//! Transcript budgeting
//!
//! Token counts are estimates: character count divided by a configurable
//! characters-per-token ratio.

use crate::llm::{Message, MessageRole};
use serde_json::{json, Value};

/// Number of top-level keys kept in a compressed tool message
const COMPRESSED_KEY_LIMIT: usize = 10;

/// Estimate the token count of `text`
pub fn estimate_tokens(text: &str, chars_per_token: f64) -> usize {
    if chars_per_token <= 0.0 {
        return 0;
    }
    (text.chars().count() as f64 / chars_per_token) as usize
}

/// Estimate the token count of a whole transcript as sent to the model
pub fn transcript_tokens(messages: &[Message], chars_per_token: f64) -> usize {
    messages
        .iter()
        .map(|m| {
            let serialized = serde_json::to_string(m).unwrap_or_default();
            estimate_tokens(&serialized, chars_per_token)
        })
        .sum()
}

/// Limits applied by [`compress_history`]
#[derive(Debug, Clone, Copy)]
pub struct CompressionLimits {
    pub max_history_tokens: usize,
    pub compress_message_tokens: usize,
    pub chars_per_token: f64,
}

/// Shrink oversized tool messages when the transcript exceeds its budget.
///
/// Only tool messages whose own estimate exceeds `compress_message_tokens`
/// and whose content is JSON are rewritten, into a summary listing at most
/// ten top-level keys. Returns the number of messages rewritten.
pub fn compress_history(messages: &mut [Message], limits: &CompressionLimits) -> usize {
    let total = transcript_tokens(messages, limits.chars_per_token);
    if total <= limits.max_history_tokens {
        return 0;
    }

    let mut compressed = 0;
    for message in messages.iter_mut() {
        if message.role != MessageRole::Tool {
            continue;
        }
        if estimate_tokens(&message.content, limits.chars_per_token) <= limits.compress_message_tokens
        {
            continue;
        }
        let Ok(parsed) = serde_json::from_str::<Value>(&message.content) else {
            continue;
        };

        let keys: Vec<&String> = match &parsed {
            Value::Object(map) => map.keys().take(COMPRESSED_KEY_LIMIT).collect(),
            _ => Vec::new(),
        };
        message.content = json!({
            "compressed": true,
            "keys": keys,
            "note": "Large tool result compressed to save context",
        })
        .to_string();
        compressed += 1;
    }

    if compressed > 0 {
        tracing::info!(
            "Compressed {} tool messages (transcript estimate {} > {})",
            compressed,
            total,
            limits.max_history_tokens
        );
    }
    compressed
}

/// Build the stand-in for a serialized tool result longer than `max_chars`.
///
/// Returns `None` when the result fits.
pub fn truncate_result(serialized: &str, max_chars: usize) -> Option<Value> {
    let original_length = serialized.chars().count();
    if original_length <= max_chars {
        return None;
    }

    let prefix: String = serialized.chars().take(max_chars).collect();
    Some(json!({
        "success": true,
        "chunked": false,
        "truncated": true,
        "original_length": original_length,
        "data": format!(
            "{}\n\n... [data too large, truncated, original length: {} chars]",
            prefix, original_length
        ),
        "message": format!(
            "Result too large ({} chars), truncated to the first {} chars",
            original_length, max_chars
        ),
    }))
}
