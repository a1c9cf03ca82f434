//! Shared similarity-index client
//!
//! The index itself is a remote service shared by every bank node. This module
//! defines the [`IndexClient`] contract the pipeline depends on, the wire
//! types, and two implementations:
//! - [`http::HttpIndexClient`]: JSON/HTTP client for the remote service
//! - [`memory::InMemoryIndex`]: brute-force in-process index for local runs and tests
//!
//! Every call returns an explicit `Result<_, IndexError>`; callers decide
//! whether to log and continue. Nothing here retries.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::EmbeddedRecord;

/// Index client errors
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Index call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Index API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Index not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Index creation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(rename = "type")]
    pub index_type: String,
    pub dimension: usize,
}

impl IndexConfig {
    pub fn ivfflat(dimension: usize) -> Self {
        Self {
            index_type: "ivfflat".to_string(),
            dimension,
        }
    }
}

/// Result of a create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Acknowledgement of a batch upsert
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertAck {
    pub upserted: usize,
}

/// One neighbor returned by a query
///
/// Numeric fields are kept as raw JSON: a malformed value from the service is
/// the classifier's problem (treated as absent), not a parse failure of the
/// whole response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub distance: Option<Value>,
    #[serde(default)]
    pub score: Option<Value>,
    #[serde(default)]
    pub similarity: Option<Value>,
    #[serde(default)]
    pub metadata: Value,
}

impl Neighbor {
    /// Neighbor id as a string (string or numeric ids)
    pub fn id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Origin recorded in the neighbor's metadata
    pub fn origin(&self) -> Option<&str> {
        self.metadata.get("bank_id").and_then(Value::as_str)
    }

    /// Id digest recorded in the neighbor's metadata
    pub fn id_digest(&self) -> Option<&str> {
        self.metadata.get("tx_ref").and_then(Value::as_str)
    }

    /// Raw similarity field: `score`, falling back to `similarity`
    pub fn raw_score(&self) -> Option<&Value> {
        self.score
            .as_ref()
            .filter(|v| !v.is_null())
            .or(self.similarity.as_ref().filter(|v| !v.is_null()))
    }
}

/// Per-query ordered neighbor lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<Vec<Neighbor>>,
}

impl QueryResponse {
    /// Parse a service response
    ///
    /// Accepts the nested `{"results": [[...], ...]}` shape and, for a
    /// single-vector query, a flat `{"results": [...]}` list.
    pub fn from_value(value: Value, query_count: usize) -> Result<Self, IndexError> {
        let results = value
            .get("results")
            .cloned()
            .ok_or_else(|| IndexError::Parse("response has no 'results' field".to_string()))?;

        let is_flat = results
            .as_array()
            .map(|groups| groups.iter().any(Value::is_object))
            .unwrap_or(false);

        if is_flat {
            if query_count != 1 {
                return Err(IndexError::Parse(format!(
                    "flat result list returned for {} query vectors",
                    query_count
                )));
            }
            let group: Vec<Neighbor> = serde_json::from_value(results)
                .map_err(|e| IndexError::Parse(e.to_string()))?;
            return Ok(Self {
                results: vec![group],
            });
        }

        let results: Vec<Vec<Neighbor>> =
            serde_json::from_value(results).map_err(|e| IndexError::Parse(e.to_string()))?;
        Ok(Self { results })
    }
}

/// Contract of the shared similarity index
#[async_trait]
pub trait IndexClient: Send + Sync {
    async fn create_index(&self, name: &str, config: &IndexConfig) -> Result<CreateOutcome, IndexError>;

    async fn delete_index(&self, name: &str) -> Result<(), IndexError>;

    async fn list_indexes(&self) -> Result<Vec<String>, IndexError>;

    /// Ask the service to retrain the index
    async fn train(&self, name: &str) -> Result<(), IndexError>;

    async fn batch_upsert(&self, name: &str, records: &[EmbeddedRecord]) -> Result<UpsertAck, IndexError>;

    /// Query `top_k` neighbors for each vector, in input order
    async fn batch_query(&self, name: &str, vectors: &[Vec<f32>], top_k: usize) -> Result<QueryResponse, IndexError>;
}

/// Bound an index call by a caller-supplied timeout
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, IndexError>
where
    F: Future<Output = Result<T, IndexError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(IndexError::Timeout(limit)),
    }
}

/// Prepare the shared index at node startup
///
/// With `recreate` the index is dropped (errors ignored) and created fresh;
/// otherwise it is created only when the service does not list it.
pub async fn ensure_index(
    client: &dyn IndexClient,
    name: &str,
    config: &IndexConfig,
    recreate: bool,
) -> Result<CreateOutcome, IndexError> {
    if recreate {
        match client.delete_index(name).await {
            Ok(()) => info!(index = name, "Deleted existing index"),
            Err(e) => warn!(index = name, error = %e, "Could not delete index (may not exist)"),
        }
    } else {
        match client.list_indexes().await {
            Ok(indexes) if indexes.iter().any(|i| i == name) => {
                info!(index = name, "Index exists");
                return Ok(CreateOutcome::AlreadyExists);
            }
            Ok(_) => info!(index = name, "Index missing, creating"),
            Err(e) => warn!(index = name, error = %e, "Could not list indexes, attempting create"),
        }
    }

    let outcome = client.create_index(name, config).await?;
    match outcome {
        CreateOutcome::Created => info!(index = name, dimension = config.dimension, "Index created"),
        CreateOutcome::AlreadyExists => info!(index = name, "Index already exists, continuing"),
    }
    Ok(outcome)
}
