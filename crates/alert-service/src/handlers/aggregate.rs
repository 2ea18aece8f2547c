//! Aggregation decorator: coalesces bursts of events into one synthetic
//! event per interval.
//!
//! Each instance owns one background worker driven by a ticker. `handle`
//! is a blocking send into a capacity-1 channel, so a busy worker
//! backpressures the collect path for its topic; that is contract, not
//! accident. `close` is two-phase: signal cancellation, then join the
//! worker, after which no further emission can happen. Events buffered
//! in a partial window at close are discarded, not flushed.

use std::sync::Arc;
use std::time::Duration;

use alert_core::{Event, EventCollector, EventState, Handler};
use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::ServiceError;

fn default_id() -> String {
    "aggregate".to_string()
}

fn default_message() -> String {
    "Received {{count}} events in the last {{interval}}.".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateHandlerConfig {
    /// Topic the synthetic aggregate event is emitted onto.
    pub topic: String,
    /// ID of the synthetic event.
    #[serde(default = "default_id")]
    pub id: String,
    /// Aggregation window, e.g. `"10s"`.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Message template; `count` and `interval` are in scope.
    #[serde(default = "default_message")]
    pub message: String,
}

pub struct AggregateHandler {
    tx: mpsc::Sender<Event>,
    closing: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AggregateHandler {
    /// Validate the config, compile the message template and spawn the
    /// aggregation worker.
    pub fn start(
        config: AggregateHandlerConfig,
        collector: Arc<dyn EventCollector>,
    ) -> Result<Arc<Self>, ServiceError> {
        if config.topic.is_empty() {
            return Err(ServiceError::InvalidConfig(
                "aggregate handler requires a topic".to_string(),
            ));
        }
        if config.interval.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "aggregate interval must be positive".to_string(),
            ));
        }
        let mut templates = Handlebars::new();
        templates.register_template_string("message", &config.message)?;

        let (tx, rx) = mpsc::channel(1);
        let closing = CancellationToken::new();
        let worker = tokio::spawn(run(rx, closing.clone(), config, templates, collector));
        Ok(Arc::new(Self {
            tx,
            closing,
            worker: Mutex::new(Some(worker)),
        }))
    }
}

#[async_trait]
impl Handler for AggregateHandler {
    async fn handle(&self, event: &Event) {
        tokio::select! {
            () = self.closing.cancelled() => {}
            res = self.tx.send(event.clone()) => {
                if res.is_err() {
                    error!(topic = %event.topic, "aggregate worker is gone, dropping event");
                }
            }
        }
    }

    async fn close(&self) {
        self.closing.cancel();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if worker.await.is_err() {
                error!("aggregate worker panicked");
            }
        }
    }
}

async fn run(
    mut rx: mpsc::Receiver<Event>,
    closing: CancellationToken,
    config: AggregateHandlerConfig,
    templates: Handlebars<'static>,
    collector: Arc<dyn EventCollector>,
) {
    let start = tokio::time::Instant::now() + config.interval;
    let mut ticker = tokio::time::interval_at(start, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut window: Vec<Event> = Vec::new();
    loop {
        tokio::select! {
            () = closing.cancelled() => return,
            event = rx.recv() => match event {
                Some(event) => window.push(event),
                None => return,
            },
            _ = ticker.tick() => {
                if window.is_empty() {
                    continue;
                }
                flush(&mut window, &config, &templates, collector.as_ref()).await;
            }
        }
    }
}

/// Collapse the window into one synthetic event and re-emit it.
async fn flush(
    window: &mut Vec<Event>,
    config: &AggregateHandlerConfig,
    templates: &Handlebars<'static>,
    collector: &dyn EventCollector,
) {
    let events = std::mem::take(window);
    let mut state = EventState {
        id: config.id.clone(),
        ..EventState::default()
    };
    let mut details = Vec::with_capacity(events.len());
    // Internal-only unless at least one source event was externally
    // visible.
    let mut no_external = true;
    for event in &events {
        state.level = state.level.max(event.state.level);
        state.time = state.time.max(event.state.time);
        state.duration = state.duration.max(event.state.duration);
        details.push(event.state.message.clone());
        no_external = no_external && event.no_external;
    }
    state.details = details.join("\n");
    let scope = json!({
        "count": events.len(),
        "interval": humantime::format_duration(config.interval).to_string(),
    });
    match templates.render("message", &scope) {
        Ok(message) => state.message = message,
        Err(err) => {
            error!(topic = %config.topic, error = %err, "failed to render aggregate message");
        }
    }

    let mut aggregate = Event::new(config.topic.clone(), state);
    aggregate.no_external = no_external;
    if let Err(err) = collector.collect(aggregate).await {
        error!(topic = %config.topic, error = %err, "failed to emit aggregate event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_core::Level;
    use std::sync::Mutex as StdMutex;

    struct VecCollector {
        events: StdMutex<Vec<Event>>,
    }

    impl VecCollector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: StdMutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut self.events.lock().unwrap())
        }
    }

    #[async_trait]
    impl EventCollector for VecCollector {
        async fn collect(&self, event: Event) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn config(interval: Duration) -> AggregateHandlerConfig {
        AggregateHandlerConfig {
            topic: "agg".to_string(),
            id: default_id(),
            interval,
            message: default_message(),
        }
    }

    fn event(id: &str, level: Level, no_external: bool) -> Event {
        let mut e = Event::new(
            "src",
            EventState {
                id: id.to_string(),
                message: format!("{id} fired"),
                level,
                ..EventState::default()
            },
        );
        e.no_external = no_external;
        e
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_collapses_to_one_event() {
        let collector = VecCollector::new();
        let handler = AggregateHandler::start(config(Duration::from_secs(1)), collector.clone())
            .unwrap();

        handler.handle(&event("a", Level::Warning, true)).await;
        handler.handle(&event("b", Level::Critical, true)).await;
        handler.handle(&event("c", Level::Info, true)).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let emitted = collector.take();
        assert_eq!(emitted.len(), 1);
        let agg = &emitted[0];
        assert_eq!(agg.topic, "agg");
        assert_eq!(agg.state.id, "aggregate");
        assert_eq!(agg.state.level, Level::Critical);
        assert!(agg.state.message.contains('3'));
        assert!(agg.state.details.contains("a fired"));
        assert!(agg.no_external);

        handler.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_externally_visible_source_marks_aggregate_visible() {
        let collector = VecCollector::new();
        let handler = AggregateHandler::start(config(Duration::from_secs(1)), collector.clone())
            .unwrap();

        handler.handle(&event("a", Level::Warning, true)).await;
        handler.handle(&event("b", Level::Warning, false)).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let emitted = collector.take();
        assert_eq!(emitted.len(), 1);
        assert!(!emitted[0].no_external);

        handler.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_window_emits_nothing() {
        let collector = VecCollector::new();
        let handler = AggregateHandler::start(config(Duration::from_secs(1)), collector.clone())
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(collector.take().is_empty());
        handler.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_discards_partial_window_and_is_idempotent() {
        let collector = VecCollector::new();
        let handler = AggregateHandler::start(config(Duration::from_secs(60)), collector.clone())
            .unwrap();

        handler.handle(&event("a", Level::Warning, true)).await;
        handler.close().await;
        handler.close().await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(collector.take().is_empty());
        // After close, handle drops events instead of blocking forever.
        handler.handle(&event("b", Level::Warning, true)).await;
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(matches!(
            AggregateHandler::start(config(Duration::ZERO), VecCollector::new()),
            Err(ServiceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bad_template_rejected() {
        let mut c = config(Duration::from_secs(1));
        c.message = "{{#if}}".to_string();
        assert!(matches!(
            AggregateHandler::start(c, VecCollector::new()),
            Err(ServiceError::Template(_))
        ));
    }
}
