//! Shared test helpers for effin-node integration tests
//!
//! - `VectorEncoder`: fingerprint = the transaction's signature, zero-padded,
//!   so tests choose exact vectors and distances
//! - `FlakyIndex`: in-memory index whose calls can be made to fail
//! - `SlowAuditSink`: audit sink that never answers in time
//! - `FakeIndexServer`: HTTP index service on an ephemeral port

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use effin_common::config::Thresholds;
use effin_common::crypto::LedgerCipher;
use effin_common::events::EventBus;
use effin_common::{AuditEntry, Error, Result, Transaction};

use effin_node::audit::{AuditSink, MemoryAuditSink};
use effin_node::encoder::FingerprintTransform;
use effin_node::index::memory::InMemoryIndex;
use effin_node::index::{CreateOutcome, IndexClient, IndexConfig, IndexError, QueryResponse, UpsertAck};
use effin_node::models::EmbeddedRecord;
use effin_node::pipeline::{AlertClassifier, PipelineMetrics, TrainCoordinator, WorkerContext, WorkerSettings};

pub const INDEX: &str = "test_index";
pub const DIMENSION: usize = 4;
pub const API_KEY: &str = "test-api-key";

pub fn tx(id: &str, origin: &str, signature: &[f64]) -> Transaction {
    Transaction {
        id: id.to_string(),
        timestamp: 1_700_000_000.0,
        amount: 100.0,
        merchant_category: "GroceryMart".to_string(),
        location: "Pune".to_string(),
        device_fingerprint: "devA".to_string(),
        signature: signature.to_vec(),
        origin: origin.to_string(),
        is_fraud: false,
    }
}

/// Fingerprint is the signature itself
pub struct VectorEncoder {
    pub dimension: usize,
}

impl FingerprintTransform for VectorEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, tx: &Transaction) -> Result<Vec<f32>> {
        tx.validate()?;
        if tx.signature.len() > self.dimension {
            return Err(Error::InvalidInput(format!("{} too long", tx.id)));
        }
        let mut v: Vec<f32> = tx.signature.iter().map(|x| *x as f32).collect();
        v.resize(self.dimension, 0.0);
        Ok(v)
    }
}

pub fn settings(batch_size: usize) -> WorkerSettings {
    WorkerSettings {
        index_name: INDEX.to_string(),
        batch_size,
        top_k: 5,
        request_timeout: Duration::from_secs(5),
        audit_timeout: Duration::from_secs(5),
        flush_interval: None,
        flush_on_shutdown: true,
        debug_neighbors: true,
    }
}

pub fn test_cipher() -> LedgerCipher {
    LedgerCipher::from_key_bytes(&[7u8; 32]).unwrap()
}

/// Index pre-created with `DIMENSION`
pub async fn memory_index() -> Arc<InMemoryIndex> {
    let index = Arc::new(InMemoryIndex::new());
    index.create_index(INDEX, &IndexConfig::ivfflat(DIMENSION)).await.unwrap();
    index
}

/// Worker collaborators for `origin`, with a fresh coordinator and metrics
pub fn context(
    origin: &str,
    settings: WorkerSettings,
    index: Arc<dyn IndexClient>,
    audit: Arc<dyn AuditSink>,
    train_after: u64,
) -> WorkerContext {
    WorkerContext {
        settings: Arc::new(settings),
        encoder: Arc::new(VectorEncoder { dimension: DIMENSION }),
        index,
        audit,
        coordinator: Arc::new(TrainCoordinator::new(train_after)),
        classifier: Arc::new(AlertClassifier::new(
            origin,
            Thresholds {
                similarity: 0.7,
                distance: 0.3,
            },
        )),
        metrics: Arc::new(PipelineMetrics::new()),
        events: EventBus::new(100),
        cipher: test_cipher(),
    }
}

pub fn alerts_of(entries: &[AuditEntry]) -> Vec<effin_common::Alert> {
    entries
        .iter()
        .filter_map(|e| match e {
            AuditEntry::Alert(a) => Some(a.clone()),
            _ => None,
        })
        .collect()
}

pub fn processed_ids(entries: &[AuditEntry]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|e| match e {
            AuditEntry::TxProcessed(p) => Some(p.tx_id.clone()),
            _ => None,
        })
        .collect()
}

pub fn memory_audit() -> Arc<MemoryAuditSink> {
    Arc::new(MemoryAuditSink::new())
}

// ============================================================================
// Failing doubles
// ============================================================================

/// In-memory index with switchable failures
#[derive(Default)]
pub struct FlakyIndex {
    pub inner: InMemoryIndex,
    pub fail_upsert: AtomicBool,
    pub fail_query: AtomicBool,
    pub fail_train: AtomicBool,
}

impl FlakyIndex {
    pub async fn new() -> Arc<Self> {
        let index = Arc::new(Self::default());
        index
            .inner
            .create_index(INDEX, &IndexConfig::ivfflat(DIMENSION))
            .await
            .unwrap();
        index
    }

    fn unavailable() -> IndexError {
        IndexError::Api {
            status: 503,
            body: "service unavailable".to_string(),
        }
    }
}

#[async_trait]
impl IndexClient for FlakyIndex {
    async fn create_index(&self, name: &str, config: &IndexConfig) -> std::result::Result<CreateOutcome, IndexError> {
        self.inner.create_index(name, config).await
    }

    async fn delete_index(&self, name: &str) -> std::result::Result<(), IndexError> {
        self.inner.delete_index(name).await
    }

    async fn list_indexes(&self) -> std::result::Result<Vec<String>, IndexError> {
        self.inner.list_indexes().await
    }

    async fn train(&self, name: &str) -> std::result::Result<(), IndexError> {
        if self.fail_train.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.train(name).await
    }

    async fn batch_upsert(&self, name: &str, records: &[EmbeddedRecord]) -> std::result::Result<UpsertAck, IndexError> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.batch_upsert(name, records).await
    }

    async fn batch_query(
        &self,
        name: &str,
        vectors: &[Vec<f32>],
        top_k: usize,
    ) -> std::result::Result<QueryResponse, IndexError> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.batch_query(name, vectors, top_k).await
    }
}

/// Audit sink that takes far longer than any test timeout
pub struct SlowAuditSink;

#[async_trait]
impl AuditSink for SlowAuditSink {
    async fn append(&self, _entry: &AuditEntry) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

/// Records processed entries but refuses every alert
#[derive(Clone, Default)]
pub struct AlertRejectingSink {
    pub inner: MemoryAuditSink,
}

#[async_trait]
impl AuditSink for AlertRejectingSink {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        match entry {
            AuditEntry::Alert(_) => Err(Error::Internal("ledger volume full".to_string())),
            AuditEntry::TxProcessed(_) => self.inner.append(entry).await,
        }
    }
}

// ============================================================================
// Fake HTTP index service
// ============================================================================

#[derive(Clone)]
struct FakeState {
    index: Arc<InMemoryIndex>,
    fail_queries: Arc<AtomicBool>,
}

/// HTTP index service backed by an [`InMemoryIndex`]
pub struct FakeIndexServer {
    pub base_url: String,
    pub index: Arc<InMemoryIndex>,
    pub fail_queries: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for FakeIndexServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("x-api-key").and_then(|v| v.to_str().ok()) == Some(API_KEY)
}

fn index_error_response(err: IndexError) -> Response {
    let status = match err {
        IndexError::NotFound(_) => StatusCode::NOT_FOUND,
        IndexError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"detail": err.to_string()}))).into_response()
}

fn str_field<'a>(body: &'a Value, name: &str) -> &'a str {
    body.get(name).and_then(Value::as_str).unwrap_or_default()
}

async fn create(State(state): State<FakeState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let config: IndexConfig = match serde_json::from_value(body["index_config"].clone()) {
        Ok(c) => c,
        Err(e) => return (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
    };
    match state.index.create_index(str_field(&body, "index_name"), &config).await {
        Ok(CreateOutcome::Created) => Json(json!({"status": "created"})).into_response(),
        Ok(CreateOutcome::AlreadyExists) => {
            (StatusCode::CONFLICT, Json(json!({"detail": "index exists"}))).into_response()
        }
        Err(e) => index_error_response(e),
    }
}

async fn delete(State(state): State<FakeState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.index.delete_index(str_field(&body, "index_name")).await {
        Ok(()) => Json(json!({"status": "deleted"})).into_response(),
        Err(e) => index_error_response(e),
    }
}

async fn list(State(state): State<FakeState>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.index.list_indexes().await {
        Ok(names) => Json(json!({"indexes": names})).into_response(),
        Err(e) => index_error_response(e),
    }
}

async fn train(State(state): State<FakeState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.index.train(str_field(&body, "index_name")).await {
        Ok(()) => Json(json!({"status": "training"})).into_response(),
        Err(e) => index_error_response(e),
    }
}

async fn upsert(State(state): State<FakeState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let items: Vec<EmbeddedRecord> = match serde_json::from_value(body["items"].clone()) {
        Ok(items) => items,
        Err(e) => return (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
    };
    match state.index.batch_upsert(str_field(&body, "index_name"), &items).await {
        Ok(ack) => Json(json!({"upserted": ack.upserted})).into_response(),
        Err(e) => index_error_response(e),
    }
}

async fn query(State(state): State<FakeState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.fail_queries.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "query backend down").into_response();
    }
    let vectors: Vec<Vec<f32>> = match serde_json::from_value(body["query_vectors"].clone()) {
        Ok(v) => v,
        Err(e) => return (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
    };
    let top_k = body["top_k"].as_u64().unwrap_or(5) as usize;
    match state.index.batch_query(str_field(&body, "index_name"), &vectors, top_k).await {
        Ok(response) => Json(json!({"results": response.results})).into_response(),
        Err(e) => index_error_response(e),
    }
}

impl FakeIndexServer {
    pub async fn start() -> Self {
        let index = Arc::new(InMemoryIndex::new());
        let fail_queries = Arc::new(AtomicBool::new(false));
        let state = FakeState {
            index: Arc::clone(&index),
            fail_queries: Arc::clone(&fail_queries),
        };

        let app = Router::new()
            .route("/v1/indexes/create", post(create))
            .route("/v1/indexes/delete", post(delete))
            .route("/v1/indexes/list", get(list))
            .route("/v1/indexes/train", post(train))
            .route("/v1/vectors/upsert", post(upsert))
            .route("/v1/vectors/query", post(query))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            index,
            fail_queries,
            handle,
        }
    }
}
