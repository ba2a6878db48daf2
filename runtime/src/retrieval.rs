use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::SearchConfig;

const EMBEDDINGS_API_VERSION: &str = "2024-02-01";
const SEARCH_API_VERSION: &str = "2023-11-01";

/// A previously validated query shown to the model as illustration. Never executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundingExample {
    pub sql_query: String,
}

impl GroundingExample {
    pub fn new(sql_query: impl Into<String>) -> Self {
        Self {
            sql_query: sql_query.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding request failed: {0}")]
    Embedding(String),
    #[error("search request failed: {0}")]
    Search(String),
    #[error("malformed search response: {0}")]
    Malformed(String),
}

/// Keeps "search failed" distinct from "nothing similar found".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalOutcome {
    Examples(Vec<GroundingExample>),
    NoMatches,
    Failed(String),
}

impl RetrievalOutcome {
    /// Examples to interpolate; empty for both `NoMatches` and `Failed`.
    pub fn examples(&self) -> &[GroundingExample] {
        match self {
            RetrievalOutcome::Examples(examples) => examples,
            RetrievalOutcome::NoMatches | RetrievalOutcome::Failed(_) => &[],
        }
    }
}

impl From<Result<Vec<GroundingExample>, RetrievalError>> for RetrievalOutcome {
    fn from(result: Result<Vec<GroundingExample>, RetrievalError>) -> Self {
        match result {
            Ok(examples) if examples.is_empty() => RetrievalOutcome::NoMatches,
            Ok(examples) => RetrievalOutcome::Examples(examples),
            Err(err) => RetrievalOutcome::Failed(err.to_string()),
        }
    }
}

#[async_trait]
pub trait ExampleRetriever: Send + Sync {
    /// Up to k examples, most similar first. Hits without a query are skipped.
    async fn retrieve(&self, question: &str) -> Result<Vec<GroundingExample>, RetrievalError>;
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "@search.rerankerScore", default)]
    reranker_score: Option<f64>,
    #[serde(rename = "@search.score", default)]
    score: Option<f64>,
    #[serde(default)]
    metadata: Option<Value>,
}

impl SearchHit {
    fn rank(&self) -> f64 {
        self.reranker_score.or(self.score).unwrap_or(f64::MIN)
    }

    /// `metadata` is stored either as a JSON string or as an object.
    fn sql_query(&self) -> Option<String> {
        let metadata = match self.metadata.as_ref()? {
            Value::String(raw) => serde_json::from_str::<Value>(raw).ok()?,
            other => other.clone(),
        };
        metadata
            .get("sqlQuery")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|query| !query.is_empty())
            .map(str::to_string)
    }
}

/// Semantic-hybrid search: embed the question, then send text plus vector to the index.
pub struct AzureSearchRetriever {
    http: reqwest::Client,
    config: SearchConfig,
}

impl AzureSearchRetriever {
    pub fn new(http: reqwest::Client, config: SearchConfig) -> Self {
        Self { http, config }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={EMBEDDINGS_API_VERSION}",
            self.config.embedding_endpoint.trim_end_matches('/'),
            self.config.embedding_deployment
        );
        let response = self
            .http
            .post(url)
            .header("api-key", &self.config.embedding_key)
            .json(&json!({ "input": text }))
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RetrievalError::Embedding(format!(
                "status {}",
                response.status()
            )));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| RetrievalError::Malformed("no embedding returned".to_string()))
    }

    fn search_body(&self, question: &str, vector: Vec<f32>) -> Value {
        json!({
            "search": question,
            "top": self.config.top_k,
            "queryType": "semantic",
            "semanticConfiguration": self.config.semantic_configuration,
            "searchFields": self.config.content_field,
            "select": "id,metadata",
            "vectorQueries": [{
                "kind": "vector",
                "vector": vector,
                "fields": self.config.vector_field,
                "k": self.config.top_k,
            }],
        })
    }
}

#[async_trait]
impl ExampleRetriever for AzureSearchRetriever {
    async fn retrieve(&self, question: &str) -> Result<Vec<GroundingExample>, RetrievalError> {
        let vector = self.embed(question).await?;
        let url = format!(
            "{}/indexes/{}/docs/search?api-version={SEARCH_API_VERSION}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index
        );
        let response = self
            .http
            .post(url)
            .header("api-key", &self.config.api_key)
            .json(&self.search_body(question, vector))
            .send()
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RetrievalError::Search(format!("status {}", response.status())));
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;

        let mut hits = parsed.value;
        hits.sort_by(|a, b| b.rank().total_cmp(&a.rank()));
        let examples: Vec<GroundingExample> = hits
            .iter()
            .filter_map(SearchHit::sql_query)
            .take(self.config.top_k)
            .map(GroundingExample::new)
            .collect();

        tracing::info!(count = examples.len(), "retrieved grounding examples");
        Ok(examples)
    }
}
