//! effin-node library
//!
//! A bank node: turns a stream of transactions into fingerprints, shares them
//! through a common similarity index, and raises alerts when another bank has
//! already indexed something close.

pub mod api;
pub mod audit;
pub mod encoder;
pub mod error;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod source;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use effin_common::events::{EffinEvent, EventBus};
use effin_common::Alert;

use crate::pipeline::{PipelineMetrics, QueueDepth};

/// Alerts kept in memory for `/alerts/recent`
pub const RECENT_ALERTS_CAPACITY: usize = 500;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub bank_id: String,
    pub event_bus: EventBus,
    pub metrics: Arc<PipelineMetrics>,
    pub queue_depth: QueueDepth,
    pub recent_alerts: Arc<RwLock<VecDeque<Alert>>>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        bank_id: impl Into<String>,
        event_bus: EventBus,
        metrics: Arc<PipelineMetrics>,
        queue_depth: QueueDepth,
    ) -> Self {
        Self {
            bank_id: bank_id.into(),
            event_bus,
            metrics,
            queue_depth,
            recent_alerts: Arc::new(RwLock::new(VecDeque::with_capacity(RECENT_ALERTS_CAPACITY))),
            startup_time: Utc::now(),
        }
    }

    /// Keep the most recent alerts from the event bus
    ///
    /// Runs until the bus closes.
    pub fn spawn_alert_recorder(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.event_bus.subscribe();
        let recent = Arc::clone(&self.recent_alerts);
        tokio::spawn(async move {
            use tokio::sync::broadcast::error::RecvError;
            loop {
                match rx.recv().await {
                    Ok(EffinEvent::AlertRaised { alert }) => {
                        let mut recent = recent.write().await;
                        if recent.len() == RECENT_ALERTS_CAPACITY {
                            recent.pop_front();
                        }
                        recent.push_back(alert);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Alert recorder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::metrics_routes())
        .merge(api::alert_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
