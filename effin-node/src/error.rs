//! Error types for effin-node
//!
//! [`PipelineError`] is what a worker logs when one step of processing fails;
//! it never leaves the worker. [`ApiError`] is the HTTP surface's error.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::index::IndexError;

/// Worker state in which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embed,
    Upsert,
    Train,
    Query,
    Classify,
    Audit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Embed => "embed",
            Stage::Upsert => "upsert",
            Stage::Train => "train",
            Stage::Query => "query",
            Stage::Classify => "classify",
            Stage::Audit => "audit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure cause inside a pipeline step
#[derive(Debug, Error)]
pub enum PipelineCause {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Common(#[from] effin_common::Error),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// A failed pipeline step, with the transactions it affected
#[derive(Debug, Error)]
#[error("{stage} failed for {} transaction(s): {cause}", .tx_ids.len())]
pub struct PipelineError {
    pub stage: Stage,
    pub tx_ids: Vec<String>,
    #[source]
    pub cause: PipelineCause,
}

impl PipelineError {
    pub fn new(stage: Stage, tx_ids: Vec<String>, cause: impl Into<PipelineCause>) -> Self {
        Self {
            stage,
            tx_ids,
            cause: cause.into(),
        }
    }

    /// Failure affecting a single transaction
    pub fn single(stage: Stage, tx_id: &str, cause: impl Into<PipelineCause>) -> Self {
        Self::new(stage, vec![tx_id.to_string()], cause)
    }

    /// Comma-separated ids for log lines
    pub fn tx_id_list(&self) -> String {
        self.tx_ids.join(",")
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// effin-common error
    #[error("Common error: {0}")]
    Common(#[from] effin_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
