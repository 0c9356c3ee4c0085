use std::future::Future;
use std::pin::Pin;

use super::{Event, EventSink};

/// Event sink that logs one structured `tracing` event per credential
/// lifecycle/upstream-attempt event, the ambient logging path for everything
/// the HTTP layer's request span doesn't already cover.
pub struct TerminalEventSink;

impl TerminalEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for TerminalEventSink {
    fn write<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match serde_json::to_string(event) {
                Ok(line) => tracing::info!(target: "gateway_provider_core::events", event = %line),
                Err(err) => tracing::warn!(target: "gateway_provider_core::events", %err, "failed to serialize event"),
            }
        })
    }
}
