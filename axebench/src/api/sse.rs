//! Server-Sent Events stream of benchmark events
//!
//! A new client first receives the current status, then every event
//! published on the session's bus. Lagging clients skip the events they
//! missed rather than slowing the run.

use crate::api::server::AppContext;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use axebench_common::events::BenchEvent;
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// GET /events - SSE event stream
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New SSE client connected");

    // Subscribe before reading the status so nothing falls in between
    let rx = ctx.session.bus().subscribe();
    let initial = ctx.session.controller().status_event().await;

    let live = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("SSE stream error: {:?}", e);
                None
            }
        }
    });

    let events = stream::once(async move { initial })
        .chain(live)
        .filter_map(|event| async move { to_sse(&event) })
        .map(Ok);

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_sse(event: &BenchEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axebench_common::events::LogLevel;

    #[test]
    fn test_events_serialize_for_sse() {
        assert!(to_sse(&BenchEvent::log(LogLevel::Info, "hello")).is_some());
        assert!(to_sse(&BenchEvent::error("Benchmark failed", Some("timeout".into()))).is_some());
    }
}
