//! # EFFIN Common Library
//!
//! Shared code for every EFFIN bank node and tool:
//! - Error type and Result alias
//! - Node configuration (TOML, environment, defaults)
//! - Domain models (transactions, alerts, audit entries)
//! - Event types and the EventBus used for alert streaming
//! - Crypto helpers (id digests, ledger cipher)
//! - SSE and time utilities

pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod models;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
pub use models::{Alert, AuditEntry, Transaction};
