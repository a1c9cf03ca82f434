//! Worker task
//!
//! Each worker loops over:
//! `WAIT_ITEM -> EMBED -> ACCUMULATE -> [FLUSH -> UPSERT -> MAYBE_TRAIN -> QUERY -> CLASSIFY -> AUDIT]`
//!
//! A failure in any step is logged with the affected transaction ids and the
//! worker goes back to waiting. Nothing a single transaction or a single
//! network call does can end the loop; only a closed, drained queue can.
//! Cancellation switches the worker to draining: it stops the flush ticker but
//! keeps dequeuing until the producer has dropped its sender and every queued
//! record has been handled.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use effin_common::config::NodeConfig;
use effin_common::crypto::{id_digest, LedgerCipher};
use effin_common::events::{EffinEvent, EventBus};
use effin_common::models::ProcessedEntry;
use effin_common::time::now_seconds;
use effin_common::{Alert, AuditEntry, Transaction};

use super::batch::BatchAccumulator;
use super::classifier::AlertClassifier;
use super::coordinator::{TrainCoordinator, TrainDecision};
use super::metrics::PipelineMetrics;
use super::scheduler::QueueReceiver;
use crate::audit::AuditSink;
use crate::encoder::{normalize, FingerprintTransform};
use crate::error::{PipelineCause, PipelineError, Stage};
use crate::index::{with_timeout, IndexClient};
use crate::models::{EmbeddedRecord, RecordMetadata};

/// Settings a worker reads on every iteration
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub index_name: String,
    pub batch_size: usize,
    pub top_k: usize,
    pub request_timeout: Duration,
    pub audit_timeout: Duration,
    pub flush_interval: Option<Duration>,
    pub flush_on_shutdown: bool,
    pub debug_neighbors: bool,
}

impl WorkerSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            index_name: config.index.name.clone(),
            batch_size: config.pipeline.batch_size,
            top_k: config.pipeline.top_k,
            request_timeout: config.index.request_timeout,
            audit_timeout: config.pipeline.audit_timeout,
            flush_interval: config.pipeline.flush_interval,
            flush_on_shutdown: config.pipeline.flush_on_shutdown,
            debug_neighbors: config.debug_neighbors,
        }
    }
}

/// Collaborators shared by every worker
#[derive(Clone)]
pub struct WorkerContext {
    pub settings: Arc<WorkerSettings>,
    pub encoder: Arc<dyn FingerprintTransform>,
    pub index: Arc<dyn IndexClient>,
    pub audit: Arc<dyn AuditSink>,
    pub coordinator: Arc<TrainCoordinator>,
    pub classifier: Arc<AlertClassifier>,
    pub metrics: Arc<PipelineMetrics>,
    pub events: EventBus,
    pub cipher: LedgerCipher,
}

/// Outcome of one flushed batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub upserted: usize,
    pub alerts: usize,
    pub trained: bool,
    /// Alerts raised but not written to the ledger
    pub audit_failures: usize,
}

pub struct Worker {
    name: String,
    ctx: WorkerContext,
    batch: BatchAccumulator,
}

impl Worker {
    pub fn new(name: impl Into<String>, ctx: WorkerContext) -> Self {
        let batch = BatchAccumulator::new(ctx.settings.batch_size);
        Self {
            name: name.into(),
            ctx,
            batch,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records waiting in this worker's batch
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Run until the queue is closed and drained
    ///
    /// `cancel` marks the start of shutdown; records already queued are still
    /// processed.
    pub async fn run(mut self, queue: QueueReceiver, cancel: CancellationToken) {
        info!(worker = %self.name, "Worker started");
        let mut ticker = self.ctx.settings.flush_interval.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut draining = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled(), if !draining => {
                    draining = true;
                    ticker = None;
                    info!(worker = %self.name, queued = queue.depth(), "Shutdown requested, draining queue");
                    continue;
                }
                _ = next_tick(&mut ticker) => {
                    if !self.batch.is_empty() {
                        debug!(worker = %self.name, pending = self.batch.len(), "Flush interval elapsed");
                        self.flush_pending().await;
                    }
                    continue;
                }
                item = queue.dequeue() => item,
            };

            match next {
                Some(tx) => self.handle(tx).await,
                None => {
                    info!(worker = %self.name, "Queue closed");
                    break;
                }
            }
        }

        if self.ctx.settings.flush_on_shutdown && !self.batch.is_empty() {
            info!(worker = %self.name, pending = self.batch.len(), "Flushing partial batch on shutdown");
            self.flush_pending().await;
        } else if !self.batch.is_empty() {
            warn!(worker = %self.name, dropped = self.batch.len(), "Dropping partial batch on shutdown");
        }
        info!(worker = %self.name, "Worker stopped");
    }

    /// Process one dequeued transaction
    pub async fn handle(&mut self, tx: Transaction) {
        let record = match self.embed(&tx) {
            Ok(record) => record,
            Err(e) => {
                self.ctx.metrics.record_failed();
                error!(worker = %self.name, tx_id = %tx.id, stage = %e.stage, error = %e, "Skipping transaction");
                return;
            }
        };

        if self.batch.add(record) {
            self.flush_pending().await;
        }

        self.ctx.metrics.record_processed();
        let entry = AuditEntry::TxProcessed(ProcessedEntry::for_transaction(&tx, now_seconds()));
        if let Err(e) = self.append_audit(&entry, &tx.id).await {
            self.ctx.metrics.record_audit_failed();
            error!(worker = %self.name, tx_id = %tx.id, error = %e, "Processed entry not audited");
        }
        self.ctx.events.emit_lossy(EffinEvent::TransactionProcessed {
            worker: self.name.clone(),
            tx_id: tx.id.clone(),
            timestamp: chrono::Utc::now(),
        });
    }

    /// EMBED: fingerprint, normalize and wrap in index metadata
    fn embed(&self, tx: &Transaction) -> Result<EmbeddedRecord, PipelineError> {
        let mut vector = self
            .ctx
            .encoder
            .embed(tx)
            .map_err(|e| PipelineError::single(Stage::Embed, &tx.id, e))?;
        normalize(&mut vector);

        let encrypted_vector_token = self
            .ctx
            .cipher
            .encrypt_vector(&vector)
            .map_err(|e| PipelineError::single(Stage::Embed, &tx.id, e))?;

        Ok(EmbeddedRecord {
            id: tx.id.clone(),
            vector,
            metadata: RecordMetadata {
                origin: tx.origin.clone(),
                id_digest: id_digest(&tx.id),
                encrypted_vector_token,
            },
        })
    }

    /// Drain the batch and flush it, logging any failure
    async fn flush_pending(&mut self) {
        let records = self.batch.drain();
        let size = records.len();
        match self.flush(records).await {
            Ok(report) => {
                if report.audit_failures > 0 {
                    warn!(
                        worker = %self.name,
                        batch_size = size,
                        alerts = report.alerts,
                        unaudited = report.audit_failures,
                        "Batch flushed, some alerts missing from the ledger"
                    );
                } else {
                    debug!(worker = %self.name, batch_size = size, alerts = report.alerts, "Batch flushed");
                }
                self.ctx.events.emit_lossy(EffinEvent::BatchFlushed {
                    worker: self.name.clone(),
                    size,
                    alerts: report.alerts,
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(e) => {
                self.ctx.metrics.record_batch_failed();
                error!(
                    worker = %self.name,
                    stage = %e.stage,
                    batch_size = size,
                    tx_ids = %e.tx_id_list(),
                    error = %e.cause,
                    "Batch dropped"
                );
                self.ctx.events.emit_lossy(EffinEvent::BatchFailed {
                    worker: self.name.clone(),
                    stage: e.stage.to_string(),
                    size,
                    message: e.cause.to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    /// UPSERT -> MAYBE_TRAIN -> QUERY -> CLASSIFY -> AUDIT for one batch
    pub async fn flush(&self, records: Vec<EmbeddedRecord>) -> Result<FlushReport, PipelineError> {
        if records.is_empty() {
            return Ok(FlushReport::default());
        }
        let settings = &self.ctx.settings;
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();

        // UPSERT
        let ack = with_timeout(
            settings.request_timeout,
            self.ctx.index.batch_upsert(&settings.index_name, &records),
        )
        .await
        .map_err(|e| PipelineError::new(Stage::Upsert, ids.clone(), e))?;
        self.ctx.metrics.record_upserts(ack.upserted);

        // MAYBE_TRAIN
        let trained = match self.ctx.coordinator.record_upserts(records.len()) {
            TrainDecision::TrainNow => {
                self.train().await;
                true
            }
            TrainDecision::NoOp => false,
        };

        // QUERY
        let vectors: Vec<Vec<f32>> = records.into_iter().map(|r| r.vector).collect();
        let started = Instant::now();
        let response = with_timeout(
            settings.request_timeout,
            self.ctx.index.batch_query(&settings.index_name, &vectors, settings.top_k),
        )
        .await
        .map_err(|e| PipelineError::new(Stage::Query, ids.clone(), e))?;
        self.ctx.metrics.record_query(vectors.len(), started.elapsed());

        if response.results.len() != ids.len() {
            warn!(
                worker = %self.name,
                expected = ids.len(),
                got = response.results.len(),
                "Query returned a different number of result groups"
            );
        }

        // CLASSIFY
        let mut alerts: Vec<Alert> = Vec::new();
        for (tx_id, group) in ids.iter().zip(&response.results) {
            if settings.debug_neighbors {
                for n in group {
                    debug!(worker = %self.name, tx_id = %tx_id, neighbor = ?n, "Neighbor");
                }
            }
            alerts.extend(self.ctx.classifier.classify(tx_id, group, now_seconds()));
        }

        // AUDIT
        let mut audit_failures = 0;
        for alert in &alerts {
            self.ctx.metrics.record_alert();
            warn!(
                target: "effin::alerts",
                alert_id = %alert.alert_id,
                tx_id = %alert.tx_id,
                bank_id = %alert.origin,
                matched_bank = alert.matched_origin.as_deref().unwrap_or("?"),
                matched_tx_ref = alert.matched_id_digest.as_deref().unwrap_or("?"),
                distance = ?alert.distance,
                score = ?alert.score,
                "ALERT"
            );
            if let Err(e) = self.append_audit(&AuditEntry::Alert(alert.clone()), &alert.tx_id).await {
                self.ctx.metrics.record_audit_failed();
                error!(worker = %self.name, tx_id = %alert.tx_id, alert_id = %alert.alert_id, error = %e, "Alert not audited");
                audit_failures += 1;
            }
            self.ctx.events.emit_lossy(EffinEvent::AlertRaised { alert: alert.clone() });
        }

        Ok(FlushReport {
            upserted: ack.upserted,
            alerts: alerts.len(),
            trained,
            audit_failures,
        })
    }

    /// Issue a train call; failure is logged and swallowed
    async fn train(&self) {
        let settings = &self.ctx.settings;
        let result = with_timeout(settings.request_timeout, self.ctx.index.train(&settings.index_name)).await;
        let succeeded = result.is_ok();
        match result {
            Ok(()) => info!(worker = %self.name, index = %settings.index_name, "Index train requested"),
            Err(e) => warn!(worker = %self.name, index = %settings.index_name, error = %e, "Index train failed"),
        }
        self.ctx.metrics.record_train(succeeded);
        self.ctx.events.emit_lossy(EffinEvent::IndexTrainRequested {
            worker: self.name.clone(),
            succeeded,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Append with the configured bound on latency
    async fn append_audit(&self, entry: &AuditEntry, tx_id: &str) -> Result<(), PipelineError> {
        let limit = self.ctx.settings.audit_timeout;
        match tokio::time::timeout(limit, self.ctx.audit.append(entry)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PipelineError::single(Stage::Audit, tx_id, e)),
            Err(_) => Err(PipelineError::single(Stage::Audit, tx_id, PipelineCause::Timeout(limit))),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
