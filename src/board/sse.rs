//! Wire encoding for the change feed. Events leave as SSE data frames
//! carrying an `{type, timestamp, data}` JSON envelope; heartbeats leave as
//! comment frames, which browsers' `EventSource` silently ignores.

use std::convert::Infallible;

use axum::response::sse::{Event, Sse};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use super::feed::{FeedEvent, FeedFrame};

/// Wrap a feed event in the wire envelope: the serialized event (already
/// shaped `{type, data}`) gains a top-level send timestamp.
fn envelope(event: &FeedEvent) -> Result<serde_json::Value, serde_json::Error> {
    let mut value = serde_json::to_value(event)?;
    if let Some(map) = value.as_object_mut() {
        map.insert(
            "timestamp".to_string(),
            serde_json::Value::String(now_millis()),
        );
    }
    Ok(value)
}

/// Current UTC time in the same millisecond ISO-8601 shape the storage
/// layer writes.
fn now_millis() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

fn frame_event(event: &FeedEvent) -> Event {
    match envelope(event) {
        Ok(value) => Event::default().data(value.to_string()),
        Err(e) => {
            // keep the stream alive; one bad payload becomes a comment
            tracing::warn!("Failed to serialize {} event: {}", event.kind(), e);
            Event::default().comment("serialization-error")
        }
    }
}

/// Adapt a feed channel into an SSE response body.
pub fn sse_response(
    rx: mpsc::Receiver<FeedFrame>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|frame| {
        let event = match frame {
            FeedFrame::Event(event) => frame_event(&event),
            FeedFrame::Heartbeat => Event::default().comment("heartbeat"),
        };
        Ok(event)
    });
    Sse::new(stream)
}
