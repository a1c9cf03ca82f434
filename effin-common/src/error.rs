//! Common error types for EFFIN

use thiserror::Error;

/// Common result type for EFFIN operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across EFFIN crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Encryption, decryption or key handling error
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Invalid input (malformed transaction, bad parameter)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
