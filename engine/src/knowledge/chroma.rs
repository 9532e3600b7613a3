//! Chroma HTTP retriever

use super::{RetrievalError, RetrievedDocument, Retriever};
use crate::config::KnowledgeBaseConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Queries a Chroma collection over its REST API
pub struct ChromaRetriever {
    base_url: String,
    collection: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Vec<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Value>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f64>>>>,
}

impl ChromaRetriever {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client,
        }
    }

    pub fn from_config(config: &KnowledgeBaseConfig) -> Self {
        Self::new(&config.base_url, &config.collection_name)
    }
}

/// Flatten the first result row of a query response
fn flatten(response: QueryResponse) -> Vec<RetrievedDocument> {
    let ids = response.ids.into_iter().next().unwrap_or_default();
    let documents = response.documents.into_iter().next().unwrap_or_default();
    let metadatas = response
        .metadatas
        .and_then(|rows| rows.into_iter().next())
        .unwrap_or_default();
    let distances = response
        .distances
        .and_then(|rows| rows.into_iter().next())
        .unwrap_or_default();

    documents
        .into_iter()
        .enumerate()
        .filter_map(|(i, content)| {
            let content = content?;
            Some(RetrievedDocument {
                id: ids.get(i).cloned().unwrap_or_default(),
                content,
                metadata: metadatas.get(i).cloned().flatten().unwrap_or(Value::Null),
                distance: distances.get(i).copied().flatten(),
            })
        })
        .collect()
}

#[async_trait]
impl Retriever for ChromaRetriever {
    async fn retrieve(
        &self,
        query: &str,
        n_results: usize,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let url = format!(
            "{}/api/v1/collections/{}/query",
            self.base_url, self.collection
        );
        let payload = json!({
            "query_texts": [query],
            "n_results": n_results,
            "include": ["documents", "metadatas", "distances"],
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RetrievalError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;

        Ok(flatten(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_first_row() {
        let response: QueryResponse = serde_json::from_value(json!({
            "ids": [["a", "b", "c"]],
            "documents": [["first", null, "third"]],
            "metadatas": [[{"source": "wiki"}, null, null]],
            "distances": [[0.1, 0.2, 0.3]]
        }))
        .unwrap();

        let docs = flatten(response);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "a");
        assert_eq!(docs[0].metadata["source"], "wiki");
        assert_eq!(docs[1].id, "c");
        assert_eq!(docs[1].distance, Some(0.3));
    }

    #[test]
    fn test_flatten_empty_response() {
        let response: QueryResponse = serde_json::from_value(json!({})).unwrap();
        assert!(flatten(response).is_empty());
    }
}
