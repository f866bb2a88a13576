//! Client for the external semantic-search endpoint.
//!
//! Embedding computation and vector similarity live behind this
//! interface; the core never sees a vector. The [`SemanticIndex`] trait
//! is what the search agent consumes — production callers use
//! [`HttpSemanticIndex`], tests substitute a fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::models::ContentNode;

/// Request shape accepted by the endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexQuery {
    pub query: String,
    pub limit: usize,
    pub threshold: f64,
    pub include_parent: bool,
}

/// One raw similarity hit. `parent` is populated when the request asked
/// for parent context and the node has one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHit {
    pub node: ContentNode,
    pub similarity: f64,
    #[serde(default)]
    pub parent: Option<ContentNode>,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    results: Vec<IndexHit>,
}

/// Opaque semantic-search capability consumed by the search agent.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Run one similarity query. Hits come back in descending similarity
    /// order. Any failure is fatal for the calling search.
    async fn search(&self, query: &IndexQuery) -> Result<Vec<IndexHit>, SearchError>;
}

/// HTTP implementation posting the query as JSON to a configured endpoint.
pub struct HttpSemanticIndex {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSemanticIndex {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SemanticIndex for HttpSemanticIndex {
    async fn search(&self, query: &IndexQuery) -> Result<Vec<IndexHit>, SearchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::Endpoint {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: IndexResponse = response.json().await?;
        Ok(parsed.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_serializes_with_camel_case_keys() {
        let q = IndexQuery {
            query: "refund policy".to_string(),
            limit: 100,
            threshold: 0.0,
            include_parent: true,
        };
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["includeParent"], serde_json::json!(true));
        assert_eq!(json["limit"], serde_json::json!(100));
    }

    #[test]
    fn response_parses_with_optional_parent() {
        let body = serde_json::json!({
            "results": [{
                "node": {
                    "id": "n1",
                    "uri": "source://plaintext/a#0",
                    "content": {"text": "hello there", "format": "plain"},
                    "metadata": {"title": null, "author": null,
                                 "createdAt": "2024-01-01T00:00:00Z",
                                 "wordCount": 2, "tags": [], "extra": null},
                    "source": {"sourceType": "plaintext", "adapter": "plaintext",
                               "sourceId": "a"}
                },
                "similarity": 0.91
            }]
        });
        let parsed: IndexResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert!(parsed.results[0].parent.is_none());
        assert!((parsed.results[0].similarity - 0.91).abs() < 1e-9);
    }
}
