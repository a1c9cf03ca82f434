//! Embedded records submitted to the shared index

use serde::{Deserialize, Serialize};

/// Metadata stored next to each vector in the shared index
///
/// Never carries the raw transaction id: other institutions only see the
/// origin, a one-way id digest, and an encrypted copy of the vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(rename = "bank_id")]
    pub origin: String,
    #[serde(rename = "tx_ref")]
    pub id_digest: String,
    #[serde(rename = "enc_vec")]
    pub encrypted_vector_token: String,
}

/// A transaction after embedding and normalization
///
/// Owned by one worker until its batch is flushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedRecord {
    /// Index id (= transaction id)
    pub id: String,
    /// Unit-norm fingerprint
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}
