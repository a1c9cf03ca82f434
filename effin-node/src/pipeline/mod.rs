//! Streaming batch pipeline
//!
//! Source -> bounded queue -> N workers, each running
//! embed -> normalize -> accumulate -> [upsert -> maybe train -> query -> classify -> audit].
//!
//! Shared state is limited to the queue, the train coordinator and the
//! metrics; batches belong to one worker each.

pub mod batch;
pub mod classifier;
pub mod coordinator;
pub mod metrics;
pub mod scheduler;
pub mod worker;

use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use effin_common::config::NodeConfig;
use effin_common::crypto::LedgerCipher;
use effin_common::events::EventBus;

use crate::audit::AuditSink;
use crate::encoder::FingerprintTransform;
use crate::index::IndexClient;

pub use batch::BatchAccumulator;
pub use classifier::{AlertClassifier, Criterion, Verdict};
pub use coordinator::{TrainCoordinator, TrainDecision};
pub use self::metrics::{MetricsSnapshot, PipelineMetrics};
pub use scheduler::{transaction_queue, QueueClosed, QueueDepth, QueueReceiver, QueueSender};
pub use worker::{FlushReport, Worker, WorkerContext, WorkerSettings};

/// The worker pool and the state it shares
pub struct Pipeline {
    ctx: WorkerContext,
    workers: usize,
}

impl Pipeline {
    /// Wire a pipeline from resolved configuration
    pub fn new(
        config: &NodeConfig,
        encoder: Arc<dyn FingerprintTransform>,
        index: Arc<dyn IndexClient>,
        audit: Arc<dyn AuditSink>,
        cipher: LedgerCipher,
        events: EventBus,
    ) -> Self {
        let ctx = WorkerContext {
            settings: Arc::new(WorkerSettings::from_config(config)),
            encoder,
            index,
            audit,
            coordinator: Arc::new(TrainCoordinator::new(config.pipeline.train_after)),
            classifier: Arc::new(AlertClassifier::new(config.bank_id.clone(), config.thresholds)),
            metrics: Arc::new(PipelineMetrics::new()),
            events,
            cipher,
        };
        Self {
            ctx,
            workers: config.pipeline.workers.max(1),
        }
    }

    /// Build from an explicit context (tests and embedders)
    pub fn with_context(ctx: WorkerContext, workers: usize) -> Self {
        Self {
            ctx,
            workers: workers.max(1),
        }
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.ctx.metrics)
    }

    pub fn coordinator(&self) -> Arc<TrainCoordinator> {
        Arc::clone(&self.ctx.coordinator)
    }

    /// Spawn `workers` long-lived worker tasks draining `queue`
    pub fn spawn(&self, queue: &QueueReceiver, cancel: &CancellationToken) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for i in 0..self.workers {
            let worker = Worker::new(format!("worker-{}", i), self.ctx.clone());
            set.spawn(worker.run(queue.clone(), cancel.clone()));
        }
        info!(workers = self.workers, "Pipeline workers spawned");
        set
    }
}
