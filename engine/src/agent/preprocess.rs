//! Prompt expressions
//!
//! Expands `@{...}` expressions in a prompt before it reaches the model:
//!
//! - `@{file(path)}` inlines a file below the web root
//! - `@{api(url)}` inlines the body of an HTTP GET
//!
//! Failures are inlined as bracketed notes rather than raised.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

fn expression_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@\{([^}]+)\}").expect("valid expression regex"))
}

pub struct PromptPreprocessor {
    web_root: PathBuf,
    client: reqwest::Client,
}

impl PromptPreprocessor {
    pub fn new(web_root: impl Into<PathBuf>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            web_root: web_root.into(),
            client,
        }
    }

    /// Replace every expression in `prompt` with its expansion
    pub async fn process(&self, prompt: &str) -> String {
        let pattern = expression_pattern();
        let mut out = String::with_capacity(prompt.len());
        let mut last = 0;

        for captures in pattern.captures_iter(prompt) {
            let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            out.push_str(&prompt[last..whole.start()]);
            out.push_str(&self.evaluate(inner.as_str().trim()).await);
            last = whole.end();
        }
        out.push_str(&prompt[last..]);
        out
    }

    async fn evaluate(&self, expression: &str) -> String {
        if let Some(arg) = call_argument(expression, "file") {
            self.read_file(&arg).await
        } else if let Some(arg) = call_argument(expression, "api") {
            self.fetch(&arg).await
        } else {
            format!("[unknown expression: {}]", expression)
        }
    }

    async fn read_file(&self, relative: &str) -> String {
        let Some(path) = confine(&self.web_root, relative) else {
            tracing::warn!("Rejected file expression outside web root: {}", relative);
            return format!("[file not found: {}]", relative);
        };
        if !path.is_file() {
            return format!("[file not found: {}]", relative);
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => format!("[file read error: {}]", e),
        }
    }

    async fn fetch(&self, url: &str) -> String {
        let result = async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            response.text().await
        }
        .await;

        match result {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("Prompt api expression failed for {}: {}", url, e);
                format!("[API call error: {}]", e)
            }
        }
    }
}

/// Extract the quoted-or-bare argument of `name(...)`
fn call_argument(expression: &str, name: &str) -> Option<String> {
    let rest = expression.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?.trim();
    Some(inner.trim_matches(|c| c == '"' || c == '\'').to_string())
}

/// Join `relative` onto `root`, refusing absolute paths and parent components
fn confine(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return None;
    }
    Some(root.join(relative))
}
