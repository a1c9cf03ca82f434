//! In-process brute-force index
//!
//! Used when no remote endpoint is configured and by the test suite. Exact
//! Euclidean search over every stored vector; `train` only counts calls.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{CreateOutcome, IndexClient, IndexConfig, IndexError, Neighbor, QueryResponse, UpsertAck};
use crate::models::EmbeddedRecord;

struct StoredIndex {
    dimension: usize,
    /// Insertion order is kept so equal distances rank deterministically
    records: Vec<EmbeddedRecord>,
    positions: HashMap<String, usize>,
    train_calls: u64,
}

impl StoredIndex {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: Vec::new(),
            positions: HashMap::new(),
            train_calls: 0,
        }
    }

    fn upsert(&mut self, record: EmbeddedRecord) {
        match self.positions.get(&record.id) {
            Some(&pos) => self.records[pos] = record,
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn nearest(&self, query: &[f32], top_k: usize) -> Vec<Neighbor> {
        let mut scored: Vec<(f64, &EmbeddedRecord)> = self
            .records
            .iter()
            .map(|r| (euclidean(query, &r.vector), r))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        scored
            .into_iter()
            .take(top_k)
            .map(|(distance, record)| Neighbor {
                id: Some(Value::String(record.id.clone())),
                distance: Some(Value::from(distance)),
                score: None,
                similarity: None,
                metadata: serde_json::to_value(&record.metadata).unwrap_or(Value::Null),
            })
            .collect()
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Brute-force Euclidean index held in memory
#[derive(Default)]
pub struct InMemoryIndex {
    indexes: RwLock<HashMap<String, StoredIndex>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of train calls received by `name`
    pub async fn train_count(&self, name: &str) -> u64 {
        self.indexes
            .read()
            .await
            .get(name)
            .map(|i| i.train_calls)
            .unwrap_or(0)
    }

    /// Number of records stored in `name`
    pub async fn len(&self, name: &str) -> usize {
        self.indexes
            .read()
            .await
            .get(name)
            .map(|i| i.records.len())
            .unwrap_or(0)
    }

    /// Whether `name` exists and holds a record with `id`
    pub async fn contains(&self, name: &str, id: &str) -> bool {
        self.indexes
            .read()
            .await
            .get(name)
            .map(|i| i.positions.contains_key(id))
            .unwrap_or(false)
    }
}

fn check_dimension(expected: usize, actual: usize, what: &str) -> Result<(), IndexError> {
    if expected != actual {
        return Err(IndexError::InvalidRequest(format!(
            "{} has dimension {}, index expects {}",
            what, actual, expected
        )));
    }
    Ok(())
}

#[async_trait]
impl IndexClient for InMemoryIndex {
    async fn create_index(&self, name: &str, config: &IndexConfig) -> Result<CreateOutcome, IndexError> {
        if config.dimension == 0 {
            return Err(IndexError::InvalidRequest("dimension must be at least 1".to_string()));
        }
        let mut indexes = self.indexes.write().await;
        if indexes.contains_key(name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        indexes.insert(name.to_string(), StoredIndex::new(config.dimension));
        Ok(CreateOutcome::Created)
    }

    async fn delete_index(&self, name: &str) -> Result<(), IndexError> {
        self.indexes
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IndexError::NotFound(name.to_string()))
    }

    async fn list_indexes(&self) -> Result<Vec<String>, IndexError> {
        let mut names: Vec<String> = self.indexes.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn train(&self, name: &str) -> Result<(), IndexError> {
        let mut indexes = self.indexes.write().await;
        let index = indexes
            .get_mut(name)
            .ok_or_else(|| IndexError::NotFound(name.to_string()))?;
        index.train_calls += 1;
        Ok(())
    }

    async fn batch_upsert(&self, name: &str, records: &[EmbeddedRecord]) -> Result<UpsertAck, IndexError> {
        let mut indexes = self.indexes.write().await;
        let index = indexes
            .get_mut(name)
            .ok_or_else(|| IndexError::NotFound(name.to_string()))?;

        // Validate everything first so a bad record leaves the index untouched.
        for record in records {
            check_dimension(index.dimension, record.vector.len(), &format!("record {}", record.id))?;
        }
        for record in records {
            index.upsert(record.clone());
        }
        Ok(UpsertAck {
            upserted: records.len(),
        })
    }

    async fn batch_query(&self, name: &str, vectors: &[Vec<f32>], top_k: usize) -> Result<QueryResponse, IndexError> {
        let indexes = self.indexes.read().await;
        let index = indexes
            .get(name)
            .ok_or_else(|| IndexError::NotFound(name.to_string()))?;

        let mut results = Vec::with_capacity(vectors.len());
        for (i, vector) in vectors.iter().enumerate() {
            check_dimension(index.dimension, vector.len(), &format!("query vector {}", i))?;
            results.push(index.nearest(vector, top_k));
        }
        Ok(QueryResponse { results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordMetadata;

    fn record(id: &str, origin: &str, vector: Vec<f32>) -> EmbeddedRecord {
        EmbeddedRecord {
            id: id.to_string(),
            vector,
            metadata: RecordMetadata {
                origin: origin.to_string(),
                id_digest: effin_common::crypto::id_digest(id),
                encrypted_vector_token: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_create_twice_reports_existing() {
        let index = InMemoryIndex::new();
        let config = IndexConfig::ivfflat(2);
        assert_eq!(index.create_index("i", &config).await.unwrap(), CreateOutcome::Created);
        assert_eq!(index.create_index("i", &config).await.unwrap(), CreateOutcome::AlreadyExists);
        assert_eq!(index.list_indexes().await.unwrap(), vec!["i".to_string()]);
    }

    #[tokio::test]
    async fn test_query_orders_by_distance() {
        let index = InMemoryIndex::new();
        index.create_index("i", &IndexConfig::ivfflat(2)).await.unwrap();
        index
            .batch_upsert(
                "i",
                &[
                    record("far", "bank2", vec![0.0, 1.0]),
                    record("near", "bank3", vec![1.0, 0.1]),
                ],
            )
            .await
            .unwrap();

        let response = index.batch_query("i", &[vec![1.0, 0.0]], 5).await.unwrap();
        let group = &response.results[0];
        assert_eq!(group.len(), 2);
        assert_eq!(group[0].id().as_deref(), Some("near"));
        assert_eq!(group[0].origin(), Some("bank3"));
        assert_eq!(group[1].id().as_deref(), Some("far"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let index = InMemoryIndex::new();
        index.create_index("i", &IndexConfig::ivfflat(2)).await.unwrap();
        index.batch_upsert("i", &[record("a", "bank1", vec![1.0, 0.0])]).await.unwrap();
        index.batch_upsert("i", &[record("a", "bank1", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(index.len("i").await, 1);
        let response = index.batch_query("i", &[vec![0.0, 1.0]], 1).await.unwrap();
        let distance = response.results[0][0].distance.as_ref().and_then(Value::as_f64).unwrap();
        assert!(distance < 1e-9);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejects_whole_batch() {
        let index = InMemoryIndex::new();
        index.create_index("i", &IndexConfig::ivfflat(2)).await.unwrap();
        let result = index
            .batch_upsert(
                "i",
                &[record("ok", "bank1", vec![1.0, 0.0]), record("bad", "bank1", vec![1.0])],
            )
            .await;
        assert!(matches!(result, Err(IndexError::InvalidRequest(_))));
        assert_eq!(index.len("i").await, 0);
    }

    #[tokio::test]
    async fn test_missing_index_is_not_found() {
        let index = InMemoryIndex::new();
        assert!(matches!(index.train("nope").await, Err(IndexError::NotFound(_))));
        assert!(matches!(index.delete_index("nope").await, Err(IndexError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_train_counts_calls() {
        let index = InMemoryIndex::new();
        index.create_index("i", &IndexConfig::ivfflat(2)).await.unwrap();
        index.train("i").await.unwrap();
        index.train("i").await.unwrap();
        assert_eq!(index.train_count("i").await, 2);
    }
}
