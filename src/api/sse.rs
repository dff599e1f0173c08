//! Server-Sent Events support

use crate::conversation::{ChatEvent, ConversationSnapshot};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert broadcast stream to SSE stream
pub fn sse_stream(
    snapshot: ConversationSnapshot,
    broadcast_rx: tokio::sync::broadcast::Receiver<ChatEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Create stream that starts with the current snapshot then broadcasts
    let init = futures::stream::iter(init_event(&snapshot).map(Ok));

    let broadcasts = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(event) => chat_event_to_axum(&event).map(Ok),
        Err(_) => None, // Skip lagged messages
    });

    let combined = init.chain(broadcasts);

    Sse::new(combined).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn init_event(snapshot: &ConversationSnapshot) -> Option<Event> {
    Event::default()
        .event("init")
        .json_data(snapshot)
        .inspect_err(|e| tracing::warn!(error = %e, "Failed to encode snapshot"))
        .ok()
}

pub fn event_name(event: &ChatEvent) -> &'static str {
    match event {
        ChatEvent::MessageAppended { .. } => "message_appended",
        ChatEvent::MessageUpdated { .. } => "message_updated",
        ChatEvent::StateChange { .. } => "state_change",
        ChatEvent::Reset { .. } => "reset",
    }
}

fn chat_event_to_axum(event: &ChatEvent) -> Option<Event> {
    Event::default()
        .event(event_name(event))
        .json_data(event)
        .inspect_err(|e| tracing::warn!(error = %e, "Failed to encode event"))
        .ok()
}
