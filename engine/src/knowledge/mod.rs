//! Retrieval augmentation
//!
//! Before the first model turn the orchestrator may ask a [`Retriever`] for
//! documents related to the prompt and prepend them to the question. Any
//! retrieval failure leaves the prompt untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod chroma;

pub use chroma::ChromaRetriever;

/// Errors raised by a retrieval backend. Never escape [`RetrievalHook`].
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Retrieval request failed: {0}")]
    Request(String),

    #[error("Retrieval backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed retrieval response: {0}")]
    Malformed(String),
}

/// One ranked document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Distance to the query; smaller is closer
    #[serde(default)]
    pub distance: Option<f64>,
}

/// A document-retrieval backend
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `n_results` documents ranked by relevance
    async fn retrieve(
        &self,
        query: &str,
        n_results: usize,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError>;
}

/// Prompt rewriting on top of a [`Retriever`]
#[derive(Clone)]
pub struct RetrievalHook {
    retriever: Arc<dyn Retriever>,
    n_results: usize,
}

impl RetrievalHook {
    pub fn new(retriever: Arc<dyn Retriever>, n_results: usize) -> Self {
        Self {
            retriever,
            n_results,
        }
    }

    /// Prepend retrieved documents to `prompt`.
    ///
    /// Returns the prompt unchanged when it is blank, when nothing was found,
    /// or when retrieval failed.
    pub async fn augment(&self, prompt: &str) -> String {
        if prompt.trim().is_empty() {
            return prompt.to_string();
        }

        match self.retriever.retrieve(prompt, self.n_results).await {
            Ok(documents) if !documents.is_empty() => {
                tracing::debug!("Augmenting prompt with {} documents", documents.len());
                format_augmented(prompt, &documents)
            }
            Ok(_) => prompt.to_string(),
            Err(e) => {
                tracing::warn!("Knowledge base retrieval failed: {}", e);
                prompt.to_string()
            }
        }
    }
}

fn format_augmented(prompt: &str, documents: &[RetrievedDocument]) -> String {
    let blocks: Vec<String> = documents
        .iter()
        .enumerate()
        .map(|(i, doc)| format!("[{}] {}", i + 1, doc.content.trim()))
        .collect();

    format!(
        "Reference knowledge base content:\n{}\n\n---\nUser question: {}",
        blocks.join("\n\n"),
        prompt
    )
}
