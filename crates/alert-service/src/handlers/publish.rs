//! Publish decorator: re-emits every event onto other topics.

use std::sync::Arc;

use alert_core::{Event, EventCollector, Handler};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::error;

use crate::error::ServiceError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishHandlerConfig {
    /// Topics each event is cloned onto.
    pub topics: Vec<String>,
}

/// Stateless fan-out: each handled event is re-submitted once per
/// configured topic, a write amplification of N per input.
pub struct PublishHandler {
    topics: Vec<String>,
    collector: Arc<dyn EventCollector>,
}

impl PublishHandler {
    pub fn new(
        config: PublishHandlerConfig,
        collector: Arc<dyn EventCollector>,
    ) -> Result<Self, ServiceError> {
        if config.topics.is_empty() {
            return Err(ServiceError::InvalidConfig(
                "publish handler requires at least one topic".to_string(),
            ));
        }
        Ok(Self {
            topics: config.topics,
            collector,
        })
    }
}

#[async_trait]
impl Handler for PublishHandler {
    async fn handle(&self, event: &Event) {
        for topic in &self.topics {
            let mut clone = event.clone();
            clone.topic = topic.clone();
            if let Err(err) = self.collector.collect(clone).await {
                error!(
                    from = %event.topic,
                    to = %topic,
                    event = %event.state.id,
                    error = %err,
                    "failed to publish event"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_core::{EventState, Level};
    use std::sync::Mutex;

    struct VecCollector {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventCollector for VecCollector {
        async fn collect(&self, event: Event) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publishes_to_every_topic() {
        let collector = Arc::new(VecCollector {
            events: Mutex::new(Vec::new()),
        });
        let handler = PublishHandler::new(
            PublishHandlerConfig {
                topics: vec!["a".to_string(), "b".to_string()],
            },
            collector.clone(),
        )
        .unwrap();

        let event = Event::new(
            "src",
            EventState {
                id: "e1".to_string(),
                level: Level::Warning,
                ..EventState::default()
            },
        );
        handler.handle(&event).await;

        let published = collector.events.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "a");
        assert_eq!(published[1].topic, "b");
        assert_eq!(published[0].state.id, "e1");
    }

    #[test]
    fn test_requires_topics() {
        let collector = Arc::new(VecCollector {
            events: Mutex::new(Vec::new()),
        });
        assert!(PublishHandler::new(PublishHandlerConfig { topics: vec![] }, collector).is_err());
    }
}
