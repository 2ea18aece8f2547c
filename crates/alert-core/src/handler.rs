//! Handler and collector traits.

use async_trait::async_trait;

use crate::event::Event;

/// A subscriber to alert events on a topic.
///
/// Handlers take action on an event (write a file, call an API, re-emit
/// onto another topic). Failures are reported through `tracing`, never
/// returned to the fan-out: one failing handler must not block or fail
/// the others.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Take action on the event.
    async fn handle(&self, event: &Event);

    /// Release any resources held by the handler. Called when the handler
    /// is deregistered or the service shuts down. Must be idempotent.
    async fn close(&self) {}
}

/// Accepts events for processing, the sole entry point to the pipeline.
///
/// Implemented by the alert service; handlers that re-emit events
/// (aggregate, publish) hold a collector rather than the service itself.
#[async_trait]
pub trait EventCollector: Send + Sync {
    /// Collect a new event. Errors indicate storage failures; callers
    /// should report them but keep their own processing loop alive.
    async fn collect(&self, event: Event) -> anyhow::Result<()>;
}
