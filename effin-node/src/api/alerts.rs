//! Alert feed
//!
//! `GET /alerts/events` streams `AlertRaised` events over SSE;
//! `GET /alerts/recent?limit=N` returns the newest alerts held in memory.

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    routing::get,
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;

use effin_common::events::EffinEvent;
use effin_common::sse::create_event_sse_stream;
use effin_common::Alert;

use crate::error::{ApiError, ApiResult};
use crate::{AppState, RECENT_ALERTS_CAPACITY};

const DEFAULT_RECENT_LIMIT: usize = 50;

/// GET /alerts/events
pub async fn alert_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    create_event_sse_stream(&state.event_bus, "alerts", |event| {
        matches!(event, EffinEvent::AlertRaised { .. })
    })
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

/// GET /alerts/recent
///
/// Newest first.
pub async fn recent_alerts(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<Vec<Alert>>> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    if limit == 0 || limit > RECENT_ALERTS_CAPACITY {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            RECENT_ALERTS_CAPACITY
        )));
    }

    let recent = state.recent_alerts.read().await;
    Ok(Json(recent.iter().rev().take(limit).cloned().collect()))
}

pub fn alert_routes() -> Router<AppState> {
    Router::new()
        .route("/alerts/events", get(alert_event_stream))
        .route("/alerts/recent", get(recent_alerts))
}
