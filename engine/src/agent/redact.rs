//! Redaction of values surfaced to the caller

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Replacement for sensitive values
pub const REDACTED: &str = "***REDACTED***";

/// Strings at most this long are never redacted by content
const CONTENT_REDACTION_MIN_CHARS: usize = 50;

/// Masks sensitive values in tool arguments and results.
///
/// A value is masked when its key contains one of the configured terms, or
/// when it is a long string mentioning a term. Every other string is cleaned
/// of non-printable characters. Redacting twice gives the same result as
/// redacting once.
#[derive(Debug, Clone)]
pub struct Redactor {
    terms: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(["access_token", "token", "password", "secret", "api_key"])
    }
}

impl Redactor {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { terms }
    }

    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, inner) in map {
                    let replaced = if self.is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        self.redact(inner)
                    };
                    out.insert(key.clone(), replaced);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            Value::String(s) => Value::String(self.redact_str(s)),
            other => other.clone(),
        }
    }

    fn is_sensitive_key(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.terms.iter().any(|term| key.contains(term.as_str()))
    }

    fn redact_str(&self, s: &str) -> String {
        let cleaned = clean_text(s);
        if cleaned.chars().count() > CONTENT_REDACTION_MIN_CHARS
            && cleaned.chars().any(char::is_alphanumeric)
        {
            let lowered = cleaned.to_lowercase();
            if self.terms.iter().any(|term| lowered.contains(term.as_str())) {
                return REDACTED.to_string();
            }
        }
        cleaned
    }
}

/// Non-printable characters: the Unicode "Other" and "Separator" categories
/// (control, format, private-use, unassigned, line/paragraph/space
/// separators), except the ASCII space and the `\n` `\r` `\t` whitespace.
fn non_printable() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[[\p{C}\p{Z}]&&[^ \n\r\t]]").expect("valid non-printable regex")
    })
}

/// Keep printable characters plus newline, carriage return and tab
pub fn clean_text(s: &str) -> String {
    non_printable().replace_all(s, "").into_owned()
}
