//! Topic registry: per-topic event state and handler fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::RwLock;
use tracing::error;

use crate::event::{Event, EventState, TopicState};
use crate::handler::Handler;
use crate::level::Level;

/// Returns true when `id` matches the shell-style glob `pattern`.
/// An empty pattern matches everything; an invalid pattern matches nothing.
#[must_use]
pub fn pattern_match(pattern: &str, id: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    glob::Pattern::new(pattern).is_ok_and(|p| p.matches(id))
}

/// The registry of live topics.
///
/// The registry lock guards only the name→topic map; all per-topic work
/// happens under that topic's own lock after the lookup.
#[derive(Default)]
pub struct Topics {
    topics: StdRwLock<HashMap<String, Arc<Topic>>>,
}

impl Topics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live topic.
    #[must_use]
    pub fn topic(&self, id: &str) -> Option<Arc<Topic>> {
        self.topics.read().unwrap().get(id).cloned()
    }

    fn get_or_create(&self, id: &str) -> Arc<Topic> {
        if let Some(t) = self.topic(id) {
            return t;
        }
        let mut topics = self.topics.write().unwrap();
        // Check again under the write lock.
        topics
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Topic::new(id)))
            .clone()
    }

    /// Collect an event: update the topic's state for the event's ID and
    /// fan the event out to every handler registered on the topic, in
    /// registration order. The topic is created if absent.
    pub async fn collect(&self, event: Event) {
        let topic = self.get_or_create(&event.topic);
        topic.collect(event).await;
    }

    /// Update an event's state without invoking any handlers.
    pub async fn update_event(&self, topic: &str, state: EventState) {
        self.get_or_create(topic).update_event(state).await;
    }

    /// Bulk-load a topic's event states, replacing any current ones.
    /// Never triggers handler fan-out; used at startup and when a closed
    /// topic is restored.
    pub async fn restore_topic(&self, topic: &str, events: HashMap<String, EventState>) {
        self.get_or_create(topic).restore(events).await;
    }

    /// Current state of a single event.
    pub async fn event_state(&self, topic: &str, event: &str) -> Option<EventState> {
        match self.topic(topic) {
            Some(t) => t.event_state(event).await,
            None => None,
        }
    }

    /// All events of `topic` at or above `min_level`, or `None` for an
    /// unknown topic.
    pub async fn event_states(
        &self,
        topic: &str,
        min_level: Level,
    ) -> Option<HashMap<String, EventState>> {
        match self.topic(topic) {
            Some(t) => Some(t.event_states(min_level).await),
            None => None,
        }
    }

    /// Snapshot of every topic whose name matches `pattern` and whose max
    /// level is at least `min_level`.
    pub async fn topic_states(
        &self,
        pattern: &str,
        min_level: Level,
    ) -> HashMap<String, TopicState> {
        let matched: Vec<Arc<Topic>> = {
            let topics = self.topics.read().unwrap();
            topics
                .values()
                .filter(|t| pattern_match(pattern, t.id()))
                .cloned()
                .collect()
        };
        let mut res = HashMap::with_capacity(matched.len());
        for topic in matched {
            let state = topic.state().await;
            if state.level >= min_level {
                res.insert(topic.id().to_string(), state);
            }
        }
        res
    }

    /// Remove a topic from the registry entirely. Registered handler
    /// instances are dropped from the fan-out but not closed; their
    /// lifecycle belongs to whoever constructed them.
    pub async fn delete_topic(&self, topic: &str) {
        let removed = self.topics.write().unwrap().remove(topic);
        if let Some(t) = removed {
            t.clear_handlers().await;
        }
    }

    /// Register a handler on a topic, creating the topic if needed.
    /// Registering the same instance twice is a no-op.
    pub async fn register_handler(&self, topic: &str, handler: Arc<dyn Handler>) {
        self.get_or_create(topic).add_handler(handler).await;
    }

    /// Remove a handler from a topic. Returns whether it was registered.
    pub async fn deregister_handler(&self, topic: &str, handler: &Arc<dyn Handler>) -> bool {
        match self.topic(topic) {
            Some(t) => t.remove_handler(handler).await,
            None => false,
        }
    }

    /// Atomically swap `old` for `new` on a topic: no event observes both
    /// handlers registered, and none observes neither.
    pub async fn replace_handler(
        &self,
        topic: &str,
        old: &Arc<dyn Handler>,
        new: Arc<dyn Handler>,
    ) {
        self.get_or_create(topic).replace_handler(old, new).await;
    }

    /// Drop every topic from the registry.
    pub async fn close(&self) {
        let all: Vec<Arc<Topic>> = {
            let mut topics = self.topics.write().unwrap();
            topics.drain().map(|(_, t)| t).collect()
        };
        for t in all {
            t.clear_handlers().await;
        }
    }
}

struct TopicInner {
    events: HashMap<String, EventState>,
    /// `(level, id)` pairs sorted descending by level, ascending by id;
    /// always consistent with `events` after any mutation.
    sorted: Vec<(Level, String)>,
    handlers: Vec<Arc<dyn Handler>>,
}

/// One alert topic: the current state of its events plus its registered
/// handlers, guarded by the topic's own lock.
pub struct Topic {
    id: String,
    collected: AtomicU64,
    inner: RwLock<TopicInner>,
}

impl Topic {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            collected: AtomicU64::new(0),
            inner: RwLock::new(TopicInner {
                events: HashMap::new(),
                sorted: Vec::new(),
                handlers: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of events collected on this topic since it was created.
    #[must_use]
    pub fn collected(&self) -> u64 {
        self.collected.load(Ordering::Relaxed)
    }

    pub async fn state(&self) -> TopicState {
        TopicState {
            level: self.max_level().await,
            collected: self.collected(),
        }
    }

    /// The level of the most severe current event, `OK` when empty.
    pub async fn max_level(&self) -> Level {
        let inner = self.inner.read().await;
        inner.sorted.first().map_or(Level::Ok, |(level, _)| *level)
    }

    pub async fn event_state(&self, event: &str) -> Option<EventState> {
        self.inner.read().await.events.get(event).cloned()
    }

    /// Events at or above `min_level`. The severity-sorted index locates
    /// the cut point with a binary search rather than a full scan.
    pub async fn event_states(&self, min_level: Level) -> HashMap<String, EventState> {
        let inner = self.inner.read().await;
        let cut = inner
            .sorted
            .partition_point(|(level, _)| *level >= min_level);
        inner.sorted[..cut]
            .iter()
            .filter_map(|(_, id)| inner.events.get(id).map(|s| (id.clone(), s.clone())))
            .collect()
    }

    async fn collect(&self, mut event: Event) {
        let prev = self.update_event(event.state.clone()).await;
        event.set_previous_state(prev);
        self.collected.fetch_add(1, Ordering::Relaxed);
        self.handle_event(&event).await;
    }

    /// Invoke every handler synchronously in registration order. Each call
    /// is independent: a panicking handler is reported and the fan-out
    /// continues. The handler list is snapshotted in one critical section
    /// and the lock released before any handler runs, so a concurrent
    /// replacement still delivers each event to exactly one of old and
    /// new, and a handler may collect back into its own topic without
    /// deadlocking on the topic lock.
    async fn handle_event(&self, event: &Event) {
        let handlers: Vec<Arc<dyn Handler>> = self.inner.read().await.handlers.clone();
        for handler in &handlers {
            if AssertUnwindSafe(handler.handle(event))
                .catch_unwind()
                .await
                .is_err()
            {
                error!(
                    topic = %self.id,
                    event = %event.state.id,
                    "handler panicked while handling event"
                );
            }
        }
    }

    /// Store the latest state for the event's ID, replacing it wholesale.
    /// Returns the previous state when the ID was already present.
    pub async fn update_event(&self, state: EventState) -> Option<EventState> {
        let mut inner = self.inner.write().await;
        let prev = inner.events.insert(state.id.clone(), state.clone());
        let need_sort = match &prev {
            None => {
                inner.sorted.push((state.level, state.id.clone()));
                true
            }
            Some(p) if p.level != state.level => {
                if let Some(entry) = inner.sorted.iter_mut().find(|(_, id)| *id == state.id) {
                    entry.0 = state.level;
                }
                true
            }
            Some(_) => false,
        };
        if need_sort {
            inner
                .sorted
                .sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        }
        prev
    }

    async fn restore(&self, events: HashMap<String, EventState>) {
        let mut inner = self.inner.write().await;
        let mut sorted: Vec<(Level, String)> = events
            .values()
            .map(|s| (s.level, s.id.clone()))
            .collect();
        sorted.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        inner.events = events;
        inner.sorted = sorted;
    }

    async fn add_handler(&self, handler: Arc<dyn Handler>) {
        let mut inner = self.inner.write().await;
        if inner.handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return;
        }
        inner.handlers.push(handler);
    }

    async fn remove_handler(&self, handler: &Arc<dyn Handler>) -> bool {
        let mut inner = self.inner.write().await;
        match inner.handlers.iter().position(|h| Arc::ptr_eq(h, handler)) {
            Some(pos) => {
                inner.handlers.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Single critical section: remove `old` (if present) and add `new`,
    /// so no fan-out snapshot can see both handlers or neither.
    async fn replace_handler(&self, old: &Arc<dyn Handler>, new: Arc<dyn Handler>) {
        let mut inner = self.inner.write().await;
        if let Some(pos) = inner.handlers.iter().position(|h| Arc::ptr_eq(h, old)) {
            inner.handlers.remove(pos);
        }
        if !inner.handlers.iter().any(|h| Arc::ptr_eq(h, &new)) {
            inner.handlers.push(new);
        }
    }

    async fn clear_handlers(&self) {
        self.inner.write().await.handlers.clear();
    }
}
