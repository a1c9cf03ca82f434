//! Server-Sent Events (SSE) utilities

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::events::{EffinEvent, EventBus};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Stream events from the bus that pass `filter` to an SSE client
///
/// Sends a `ConnectionStatus` event first, then forwards matching events as
/// JSON with the event type as SSE event name. Lagging clients skip the events
/// they missed.
pub fn create_event_sse_stream<F>(
    bus: &EventBus,
    stream_name: &'static str,
    filter: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    F: Fn(&EffinEvent) -> bool + Send + 'static,
{
    info!("New SSE client connected to {}", stream_name);
    let mut rx = bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !filter(&event) {
                        continue;
                    }
                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            debug!("SSE: Broadcasting {} event", event_type);
                            yield Ok(Event::default().event(event_type).data(json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE: {} client lagged, skipped {} events", stream_name, skipped);
                }
                Err(RecvError::Closed) => {
                    info!("SSE: {} event bus closed", stream_name);
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
