//! Per-worker batch accumulator
//!
//! Owned by a single worker and never shared, so it needs no locking. A batch
//! that never fills is not flushed unless the worker's optional flush timer
//! or shutdown flush drains it.

use crate::models::EmbeddedRecord;

pub struct BatchAccumulator {
    max_size: usize,
    records: Vec<EmbeddedRecord>,
}

impl BatchAccumulator {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            records: Vec::with_capacity(max_size),
        }
    }

    /// Append a record; returns `true` once the batch is full
    pub fn add(&mut self, record: EmbeddedRecord) -> bool {
        self.records.push(record);
        self.records.len() >= self.max_size
    }

    /// Take everything added since the last drain, in append order
    pub fn drain(&mut self) -> Vec<EmbeddedRecord> {
        std::mem::replace(&mut self.records, Vec::with_capacity(self.max_size))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordMetadata;

    fn record(id: &str) -> EmbeddedRecord {
        EmbeddedRecord {
            id: id.to_string(),
            vector: vec![1.0, 0.0],
            metadata: RecordMetadata {
                origin: "bank1".to_string(),
                id_digest: String::new(),
                encrypted_vector_token: String::new(),
            },
        }
    }

    fn ids(records: &[EmbeddedRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_add_reports_full_at_max_size() {
        let mut batch = BatchAccumulator::new(3);
        assert!(!batch.add(record("a")));
        assert!(!batch.add(record("b")));
        assert!(batch.add(record("c")));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_drain_returns_records_in_order_and_resets() {
        let mut batch = BatchAccumulator::new(10);
        batch.add(record("a"));
        batch.add(record("b"));

        let drained = batch.drain();
        assert_eq!(ids(&drained), vec!["a", "b"]);
        assert!(batch.is_empty());

        batch.add(record("c"));
        assert_eq!(ids(&batch.drain()), vec!["c"]);
        assert!(batch.drain().is_empty());
    }

    #[test]
    fn test_partial_batch_is_held_until_drained() {
        // Flushing is size-driven: a batch below max_size just waits.
        let mut batch = BatchAccumulator::new(32);
        for i in 0..31 {
            assert!(!batch.add(record(&i.to_string())));
        }
        assert_eq!(batch.len(), 31);
    }

    #[test]
    fn test_zero_size_treated_as_one() {
        let mut batch = BatchAccumulator::new(0);
        assert_eq!(batch.max_size(), 1);
        assert!(batch.add(record("a")));
    }
}
