//! Domain models shared by the node and the ledger tools
//!
//! - [`Transaction`]: one financial transaction as produced by a source
//! - [`Alert`]: a cross-institution similarity hit
//! - [`AuditEntry`]: one line of the encrypted audit ledger

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// A financial transaction record
///
/// Immutable once created and consumed exactly once by the pipeline.
/// `is_fraud` is simulation ground truth: it is written to the local audit
/// ledger but never sent to the shared index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction id
    #[serde(rename = "tx_id")]
    pub id: String,
    /// Creation time, float seconds since the Unix epoch
    pub timestamp: f64,
    /// Transaction amount
    pub amount: f64,
    pub merchant_category: String,
    pub location: String,
    pub device_fingerprint: String,
    /// Numeric behavioural signature supplied by the source
    #[serde(rename = "feature_signature")]
    pub signature: Vec<f64>,
    /// Submitting institution
    #[serde(rename = "bank_id")]
    pub origin: String,
    /// Ground-truth label (simulation only)
    pub is_fraud: bool,
}

impl Transaction {
    /// Check the fields the fingerprint transform depends on
    ///
    /// Rejects empty ids/origins and non-finite numbers so a malformed record
    /// is skipped with a log entry instead of poisoning a batch.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidInput("transaction id is empty".to_string()));
        }
        if self.origin.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "transaction {} has no origin",
                self.id
            )));
        }
        if !self.timestamp.is_finite() {
            return Err(Error::InvalidInput(format!(
                "transaction {} has non-finite timestamp",
                self.id
            )));
        }
        if !self.amount.is_finite() {
            return Err(Error::InvalidInput(format!(
                "transaction {} has non-finite amount",
                self.id
            )));
        }
        if let Some(pos) = self.signature.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "transaction {} has non-finite signature component at {}",
                self.id, pos
            )));
        }
        Ok(())
    }
}

/// Cross-institution alert
///
/// Created exactly once per (query record, qualifying neighbor) pair and never
/// mutated after it is written to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    /// Transaction that was queried
    pub tx_id: String,
    /// Index id of the matching neighbor, when the index reported one
    pub matched_id: Option<String>,
    /// Neighbor distance as reported by the index (lower = closer)
    pub distance: Option<f64>,
    /// Neighbor similarity as reported by the index (higher = closer)
    pub score: Option<f64>,
    /// Origin of the querying transaction
    #[serde(rename = "bank_id")]
    pub origin: String,
    /// Origin of the matching neighbor
    #[serde(rename = "matched_bank")]
    pub matched_origin: Option<String>,
    /// Id digest of the matching neighbor (never the raw id)
    #[serde(rename = "matched_tx_ref")]
    pub matched_id_digest: Option<String>,
    /// Float seconds since the Unix epoch
    pub timestamp: f64,
}

/// "Processed" ledger record, written once per transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEntry {
    #[serde(rename = "bank_id")]
    pub origin: String,
    pub tx_id: String,
    pub timestamp: f64,
    pub is_fraud: bool,
}

impl ProcessedEntry {
    pub fn for_transaction(tx: &Transaction, timestamp: f64) -> Self {
        Self {
            origin: tx.origin.clone(),
            tx_id: tx.id.clone(),
            timestamp,
            is_fraud: tx.is_fraud,
        }
    }
}

/// One line of the audit ledger
///
/// Serialized with an `event` tag: `tx_processed` or `alert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEntry {
    TxProcessed(ProcessedEntry),
    Alert(Alert),
}

impl AuditEntry {
    /// Origin that wrote this entry
    pub fn origin(&self) -> &str {
        match self {
            AuditEntry::TxProcessed(p) => &p.origin,
            AuditEntry::Alert(a) => &a.origin,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            AuditEntry::TxProcessed(p) => p.timestamp,
            AuditEntry::Alert(a) => a.timestamp,
        }
    }
}
