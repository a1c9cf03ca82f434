//! Audit sinks
//!
//! The ledger is append-only: one line per [`AuditEntry`], each line the
//! base64 AES-GCM token of the entry's JSON. Entries are never rewritten.
//! Writers are expected to bound each `append` with a timeout.

pub mod summary;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info};

use effin_common::crypto::LedgerCipher;
use effin_common::{AuditEntry, Error, Result};

pub use summary::LedgerSummary;

/// Durable destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<()>;
}

/// Encrypted append-only ledger file
pub struct EncryptedLedger {
    path: PathBuf,
    cipher: LedgerCipher,
    file: Mutex<File>,
}

impl EncryptedLedger {
    /// Open (or create) the ledger at `path` for appending
    pub async fn open(path: impl AsRef<Path>, cipher: LedgerCipher) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!("Audit ledger: {}", path.display());

        Ok(Self {
            path,
            cipher,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for EncryptedLedger {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let json = serde_json::to_vec(entry)?;
        let mut line = self.cipher.encrypt(&json)?;
        line.push('\n');

        // One writer at a time keeps lines whole.
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(origin = entry.origin(), "Audit entry appended");
        Ok(())
    }
}

/// In-memory sink, for local runs without a ledger and for tests
#[derive(Default, Clone)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything appended so far
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}

/// One line of a ledger as read back
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerLine {
    Entry(AuditEntry),
    /// Line could not be decrypted or decoded with the supplied key
    DecryptFailed { line: usize },
}

/// Read and decrypt a ledger
///
/// With `tail = Some(n)` only the last `n` non-empty lines are returned.
/// Undecryptable lines are reported, not fatal.
pub async fn read_ledger(path: &Path, cipher: &LedgerCipher, tail: Option<usize>) -> Result<Vec<LedgerLine>> {
    let file = File::open(path)
        .await
        .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("{}: {}", path.display(), e))))?;

    let mut raw = Vec::new();
    let mut lines = BufReader::new(file).lines();
    let mut number = 0usize;
    while let Some(line) = lines.next_line().await? {
        number += 1;
        let line = line.trim().to_string();
        if !line.is_empty() {
            raw.push((number, line));
        }
    }

    let skip = match tail {
        Some(n) => raw.len().saturating_sub(n),
        None => 0,
    };

    Ok(raw
        .into_iter()
        .skip(skip)
        .map(|(number, line)| decode_line(cipher, &line, number))
        .collect())
}

fn decode_line(cipher: &LedgerCipher, line: &str, number: usize) -> LedgerLine {
    cipher
        .decrypt(line)
        .ok()
        .and_then(|plain| serde_json::from_slice::<AuditEntry>(&plain).ok())
        .map(LedgerLine::Entry)
        .unwrap_or(LedgerLine::DecryptFailed { line: number })
}
