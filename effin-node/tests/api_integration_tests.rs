//! Integration tests for effin-node HTTP endpoints

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;
use uuid::Uuid;

use effin_common::events::{EffinEvent, EventBus};
use effin_common::Alert;
use effin_node::pipeline::{transaction_queue, PipelineMetrics};
use effin_node::AppState;

/// Test helper: state for bank "bankA" with an empty queue
fn create_test_state() -> AppState {
    let (sender, _receiver) = transaction_queue(16);
    AppState::new(
        "bankA",
        EventBus::new(100),
        Arc::new(PipelineMetrics::new()),
        sender.depth_handle(),
    )
}

fn alert(tx_id: &str) -> Alert {
    Alert {
        alert_id: Uuid::new_v4(),
        tx_id: tx_id.to_string(),
        matched_id: Some(format!("{}-match", tx_id)),
        distance: Some(0.1),
        score: None,
        origin: "bankA".to_string(),
        matched_origin: Some("bankB".to_string()),
        matched_id_digest: Some("digest".to_string()),
        timestamp: 1_700_000_000.0,
    }
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, axum::body::Bytes) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

#[tokio::test]
async fn test_health_endpoint() {
    let state = create_test_state();
    state.metrics.record_processed();
    state.metrics.record_alert();
    let app = effin_node::build_router(state);

    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "effin-node");
    assert_eq!(json["bank_id"], "bankA");
    assert_eq!(json["queue_depth"], 0);
    assert_eq!(json["processed"], 1);
    assert_eq!(json["alerts"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint_is_prometheus_text() {
    let state = create_test_state();
    state.metrics.record_upserts(3);
    state.metrics.record_query(3, Duration::from_millis(20));
    let app = effin_node::build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("effin_upserts_total 3"));
    assert!(text.contains("effin_queries_total 3"));
    assert!(text.contains("effin_query_latency_seconds_count 1"));
}

#[tokio::test]
async fn test_recent_alerts_newest_first() {
    let state = create_test_state();
    let recorder = state.spawn_alert_recorder();

    for id in ["tx-1", "tx-2", "tx-3"] {
        state
            .event_bus
            .emit(EffinEvent::AlertRaised { alert: alert(id) })
            .unwrap();
    }

    // Wait for the recorder to catch up
    for _ in 0..50 {
        if state.recent_alerts.read().await.len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let app = effin_node::build_router(state);
    let (status, body) = get(app, "/alerts/recent?limit=2").await;
    assert_eq!(status, StatusCode::OK);

    let alerts: Vec<Alert> = serde_json::from_slice(&body).unwrap();
    let ids: Vec<&str> = alerts.iter().map(|a| a.tx_id.as_str()).collect();
    assert_eq!(ids, vec!["tx-3", "tx-2"]);

    recorder.abort();
}

#[tokio::test]
async fn test_recent_alerts_rejects_zero_limit() {
    let app = effin_node::build_router(create_test_state());

    let (status, body) = get(app, "/alerts/recent?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_recent_alerts_limit_bounds() {
    let (status, body) = get(effin_node::build_router(create_test_state()), "/alerts/recent?limit=501").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], "BAD_REQUEST");

    // The upper bound itself is accepted
    let (status, body) = get(effin_node::build_router(create_test_state()), "/alerts/recent?limit=500").await;
    assert_eq!(status, StatusCode::OK);
    let alerts: Vec<Alert> = serde_json::from_slice(&body).unwrap();
    assert!(alerts.is_empty());
}

#[tokio::test]
async fn test_alert_stream_is_event_stream() {
    let app = effin_node::build_router(create_test_state());

    let response = app
        .oneshot(Request::builder().uri("/alerts/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = effin_node::build_router(create_test_state());
    let (status, _) = get(app, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
