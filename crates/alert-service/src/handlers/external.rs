//! External-suppression wrapper.

use std::sync::Arc;

use alert_core::{Event, Handler};
use async_trait::async_trait;
use tracing::debug;

/// Wraps a handler that notifies an outside system, dropping events
/// flagged as internal-only (e.g. synthetic aggregates).
pub struct ExternalHandler {
    inner: Arc<dyn Handler>,
}

impl ExternalHandler {
    #[must_use]
    pub fn new(inner: Arc<dyn Handler>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Handler for ExternalHandler {
    async fn handle(&self, event: &Event) {
        if event.no_external {
            debug!(
                topic = %event.topic,
                event = %event.state.id,
                "suppressing internal-only event"
            );
            return;
        }
        self.inner.handle(event).await;
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_core::{EventState, Level};
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn handle(&self, event: &Event) {
            self.seen.lock().unwrap().push(event.state.id.clone());
        }
    }

    #[tokio::test]
    async fn test_suppresses_internal_events() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let handler = ExternalHandler::new(recorder.clone());

        let mut internal = Event::new(
            "t",
            EventState {
                id: "internal".to_string(),
                level: Level::Warning,
                ..EventState::default()
            },
        );
        internal.no_external = true;
        handler.handle(&internal).await;

        let visible = Event::new(
            "t",
            EventState {
                id: "visible".to_string(),
                level: Level::Warning,
                ..EventState::default()
            },
        );
        handler.handle(&visible).await;

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["visible"]);
    }
}
