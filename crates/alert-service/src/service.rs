//! The alert service: binds persisted handler specs to live handlers,
//! collects events into durable topic state, and drives topic lifecycle
//! and startup load.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use alert_core::{pattern_match, Event, EventCollector, EventState, Handler, Level, Topics, TopicState};
use alert_store::{
    migrate_topic_store_v1_v2, HandlerSpec, HandlerSpecDao, TopicStore,
};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::error::ServiceError;
use crate::registry::{FactoryContext, HandlerRegistry};

const LOAD_PAGE_SIZE: usize = 100;

/// Service configuration.
pub struct ServiceConfig {
    /// Path of the topic store file.
    pub store_path: PathBuf,
    /// Whether topic state is persisted and restored. Disabled in
    /// ephemeral deployments; handler specs are always persisted.
    pub persist_topics: bool,
    /// Handler kinds administratively turned off. Their specs are
    /// accepted and stored but no live handler is constructed.
    pub disabled_kinds: HashSet<String>,
}

impl ServiceConfig {
    #[must_use]
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            persist_topics: true,
            disabled_kinds: HashSet::new(),
        }
    }
}

/// The live pairing of a persisted spec to its constructed handler
/// chain. `handler` is `None` when the spec's kind is disabled.
#[derive(Clone)]
struct HandlerBinding {
    spec: HandlerSpec,
    handler: Option<Arc<dyn Handler>>,
}

#[derive(Default)]
struct ServiceState {
    /// topic → handler id → live binding.
    handlers: HashMap<String, HashMap<String, HandlerBinding>>,
    /// Topics removed from the live registry but whose durable state is
    /// kept; the next event for one lazily restores it.
    closed_topics: HashSet<String>,
}

/// Top-level orchestrator over the topic registry, the durable store and
/// the handler dispatch registry.
pub struct Service {
    topics: Arc<Topics>,
    store: Arc<TopicStore>,
    specs: HandlerSpecDao,
    registry: HandlerRegistry,
    persist_topics: bool,
    disabled_kinds: HashSet<String>,
    state: RwLock<ServiceState>,
    weak: Weak<Service>,
}

impl Service {
    /// Open the service: migrate the topic store if needed, then load and
    /// activate every persisted handler spec and restore persisted topic
    /// state (without handler fan-out).
    pub async fn open(
        config: ServiceConfig,
        registry: HandlerRegistry,
    ) -> Result<Arc<Self>, ServiceError> {
        migrate_topic_store_v1_v2(&config.store_path)?;
        let store = Arc::new(TopicStore::open(&config.store_path)?);
        let specs = HandlerSpecDao::new(store.clone());
        let service = Arc::new_cyclic(|weak| Service {
            topics: Arc::new(Topics::new()),
            store,
            specs,
            registry,
            persist_topics: config.persist_topics,
            disabled_kinds: config.disabled_kinds,
            state: RwLock::new(ServiceState::default()),
            weak: weak.clone(),
        });
        service.load_saved_handler_specs().await?;
        service.load_saved_topic_states().await?;
        info!(store = %config.store_path.display(), "alert service open");
        Ok(service)
    }

    /// An [`EventCollector`] feeding this service, for handlers that
    /// re-emit events and for external producers.
    #[must_use]
    pub fn collector(&self) -> Arc<dyn EventCollector> {
        Arc::new(ServiceCollector {
            service: self.weak.clone(),
        })
    }

    async fn load_saved_handler_specs(&self) -> Result<(), ServiceError> {
        let mut offset = 0;
        loop {
            let page = self.specs.list("*", "", offset, LOAD_PAGE_SIZE)?;
            let n = page.len();
            for spec in page {
                let topic = spec.topic.clone();
                let id = spec.id.clone();
                // A spec that no longer constructs (kind removed, options
                // invalid) must not prevent startup.
                if let Err(err) = self.activate_spec(spec).await {
                    error!(
                        topic = %topic,
                        handler = %id,
                        error = %err,
                        "failed to activate saved handler spec"
                    );
                }
            }
            if n < LOAD_PAGE_SIZE {
                break;
            }
            offset += n;
        }
        Ok(())
    }

    async fn load_saved_topic_states(&self) -> Result<(), ServiceError> {
        if !self.persist_topics {
            return Ok(());
        }
        let topics = self.store.topics()?;
        let count = topics.len();
        for topic in topics {
            let events = self.store.events(&topic)?;
            self.topics.restore_topic(&topic, events).await;
        }
        if count > 0 {
            info!(topics = count, "restored persisted topic state");
        }
        Ok(())
    }

    fn build_binding(&self, spec: HandlerSpec) -> Result<HandlerBinding, ServiceError> {
        let ctx = FactoryContext {
            collector: self.collector(),
        };
        let handler = self.registry.build(&spec, &ctx, &self.disabled_kinds)?;
        Ok(HandlerBinding { spec, handler })
    }

    /// Install an already-persisted spec without writing it again.
    async fn activate_spec(&self, spec: HandlerSpec) -> Result<(), ServiceError> {
        let binding = self.build_binding(spec)?;
        let topic = binding.spec.topic.clone();
        let id = binding.spec.id.clone();
        let mut state = self.state.write().await;
        if let Some(handler) = binding.handler.clone() {
            self.topics.register_handler(&topic, handler).await;
        }
        state.handlers.entry(topic).or_default().insert(id, binding);
        Ok(())
    }

    /// Persist and activate a new handler spec.
    ///
    /// The handler is constructed before any lock is taken or anything is
    /// persisted; construction failure leaves no partial state.
    pub async fn register_handler_spec(&self, spec: HandlerSpec) -> Result<(), ServiceError> {
        spec.validate()?;
        let binding = self.build_binding(spec)?;
        let topic = binding.spec.topic.clone();
        let id = binding.spec.id.clone();
        let mut state = self.state.write().await;
        if state
            .handlers
            .get(&topic)
            .is_some_and(|m| m.contains_key(&id))
        {
            return Err(ServiceError::HandlerExists { topic, id });
        }
        self.specs.create(&binding.spec)?;
        if let Some(handler) = binding.handler.clone() {
            self.topics.register_handler(&topic, handler).await;
        }
        state.handlers.entry(topic).or_default().insert(id, binding);
        Ok(())
    }

    /// Replace the spec for `(topic, id)` with `spec`.
    ///
    /// The topic may not change. If the ID changes, the store sees a
    /// create-new + delete-old rather than a rename. The live swap is a
    /// single replace in the topic registry, so delivery neither gaps nor
    /// duplicates; the old handler is closed after it is out of the
    /// fan-out.
    pub async fn update_handler_spec(
        &self,
        topic: &str,
        id: &str,
        spec: HandlerSpec,
    ) -> Result<(), ServiceError> {
        spec.validate()?;
        if spec.topic != topic {
            return Err(ServiceError::TopicChanged);
        }
        let new_binding = self.build_binding(spec)?;
        let new_id = new_binding.spec.id.clone();

        let mut state = self.state.write().await;
        let old = state
            .handlers
            .get(topic)
            .and_then(|m| m.get(id))
            .cloned()
            .ok_or_else(|| ServiceError::NoSuchHandler {
                topic: topic.to_string(),
                id: id.to_string(),
            })?;
        if new_id != id
            && state
                .handlers
                .get(topic)
                .is_some_and(|m| m.contains_key(&new_id))
        {
            return Err(ServiceError::HandlerExists {
                topic: topic.to_string(),
                id: new_id,
            });
        }

        if new_id == id {
            self.specs.replace(&new_binding.spec)?;
        } else {
            self.specs.create(&new_binding.spec)?;
            self.specs.delete(topic, id)?;
        }

        match (&old.handler, &new_binding.handler) {
            (Some(old_h), Some(new_h)) => {
                self.topics.replace_handler(topic, old_h, new_h.clone()).await;
            }
            (Some(old_h), None) => {
                self.topics.deregister_handler(topic, old_h).await;
            }
            (None, Some(new_h)) => {
                self.topics.register_handler(topic, new_h.clone()).await;
            }
            (None, None) => {}
        }
        if let Some(map) = state.handlers.get_mut(topic) {
            map.remove(id);
            map.insert(new_id, new_binding);
        }
        drop(state);

        if let Some(old_h) = old.handler {
            old_h.close().await;
        }
        Ok(())
    }

    /// Deactivate and delete a handler spec. Removing an absent spec is
    /// not an error.
    pub async fn deregister_handler_spec(&self, topic: &str, id: &str) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        self.specs.delete(topic, id)?;
        let removed = state.handlers.get_mut(topic).and_then(|m| m.remove(id));
        if state.handlers.get(topic).is_some_and(HashMap::is_empty) {
            state.handlers.remove(topic);
        }
        if let Some(binding) = &removed {
            if let Some(handler) = &binding.handler {
                self.topics.deregister_handler(topic, handler).await;
            }
        }
        drop(state);
        if let Some(binding) = removed {
            if let Some(handler) = binding.handler {
                handler.close().await;
            }
        }
        Ok(())
    }

    /// The persisted spec for `(topic, id)`, from the in-memory table.
    pub async fn handler_spec(&self, topic: &str, id: &str) -> Option<HandlerSpec> {
        let state = self.state.read().await;
        state
            .handlers
            .get(topic)
            .and_then(|m| m.get(id))
            .map(|b| b.spec.clone())
    }

    /// All specs on `topic` whose ID matches `pattern`, sorted by ID.
    pub async fn handler_specs(&self, topic: &str, pattern: &str) -> Vec<HandlerSpec> {
        let state = self.state.read().await;
        let mut specs: Vec<HandlerSpec> = state
            .handlers
            .get(topic)
            .map(|m| {
                m.values()
                    .filter(|b| pattern_match(pattern, &b.spec.id))
                    .map(|b| b.spec.clone())
                    .collect()
            })
            .unwrap_or_default();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }

    /// Register a handler directly, bypassing specs and persistence.
    /// The caller owns the handler's lifecycle.
    pub async fn register_anon_handler(&self, topic: &str, handler: Arc<dyn Handler>) {
        self.topics.register_handler(topic, handler).await;
    }

    /// Remove a directly-registered handler. Returns whether it was
    /// registered. The handler is not closed.
    pub async fn deregister_anon_handler(&self, topic: &str, handler: &Arc<dyn Handler>) -> bool {
        self.topics.deregister_handler(topic, handler).await
    }

    /// Collect an event: restore its topic if it was closed, update topic
    /// state, fan out to handlers, then persist.
    ///
    /// An event that resolves to OK deletes its durable record rather
    /// than overwriting it; the in-memory state is kept for display.
    pub async fn collect(&self, event: Event) -> Result<(), ServiceError> {
        self.restore_closed_topic(&event.topic).await?;
        let topic = event.topic.clone();
        let state = event.state.clone();
        self.topics.collect(event).await;
        if self.persist_topics {
            if state.level == Level::Ok {
                self.store.delete_event(&topic, &state.id)?;
            } else {
                self.store.put_event(&topic, &state)?;
            }
        }
        Ok(())
    }

    /// Update an event's state without handler fan-out. Unlike `collect`
    /// this persists unconditionally, OK included.
    pub async fn update_event(&self, topic: &str, state: EventState) -> Result<(), ServiceError> {
        self.topics.update_event(topic, state.clone()).await;
        if self.persist_topics {
            self.store.put_event(topic, &state)?;
        }
        Ok(())
    }

    async fn restore_closed_topic(&self, topic: &str) -> Result<(), ServiceError> {
        if !self.state.read().await.closed_topics.contains(topic) {
            return Ok(());
        }
        let mut state = self.state.write().await;
        // Check again under the write lock.
        if !state.closed_topics.remove(topic) {
            return Ok(());
        }
        self.restore_locked(&state, topic).await
    }

    async fn restore_locked(&self, state: &ServiceState, topic: &str) -> Result<(), ServiceError> {
        let events = if self.persist_topics {
            self.store.events(topic)?
        } else {
            HashMap::new()
        };
        self.topics.restore_topic(topic, events).await;
        if let Some(map) = state.handlers.get(topic) {
            for binding in map.values() {
                if let Some(handler) = &binding.handler {
                    self.topics.register_handler(topic, handler.clone()).await;
                }
            }
        }
        Ok(())
    }

    /// Drop a topic from the live registry while keeping its durable
    /// state; the next event for it restores it from the store.
    pub async fn close_topic(&self, topic: &str) {
        let mut state = self.state.write().await;
        state.closed_topics.insert(topic.to_string());
        self.topics.delete_topic(topic).await;
    }

    /// Eagerly restore a topic from the store, re-registering its spec
    /// handlers. Never triggers handler fan-out.
    pub async fn restore_topic(&self, topic: &str) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        state.closed_topics.remove(topic);
        self.restore_locked(&state, topic).await
    }

    /// Remove a topic and its durable state entirely.
    pub async fn delete_topic(&self, topic: &str) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        state.closed_topics.remove(topic);
        self.topics.delete_topic(topic).await;
        if self.persist_topics {
            self.store.delete_topic(topic)?;
        }
        Ok(())
    }

    pub async fn topic_state(&self, topic: &str) -> Option<TopicState> {
        match self.topics.topic(topic) {
            Some(t) => Some(t.state().await),
            None => None,
        }
    }

    pub async fn topic_states(
        &self,
        pattern: &str,
        min_level: Level,
    ) -> HashMap<String, TopicState> {
        self.topics.topic_states(pattern, min_level).await
    }

    pub async fn event_state(&self, topic: &str, event: &str) -> Option<EventState> {
        self.topics.event_state(topic, event).await
    }

    pub async fn event_states(
        &self,
        topic: &str,
        min_level: Level,
    ) -> Option<HashMap<String, EventState>> {
        self.topics.event_states(topic, min_level).await
    }

    /// Shut down: drop every topic and close every spec handler.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        self.topics.close().await;
        state.closed_topics.clear();
        let bindings: Vec<HandlerBinding> = state
            .handlers
            .drain()
            .flat_map(|(_, m)| m.into_values())
            .collect();
        drop(state);
        for binding in bindings {
            if let Some(handler) = binding.handler {
                handler.close().await;
            }
        }
    }
}

/// Feeds events into the service it was created from. Holds a weak
/// reference so handler chains never keep a shut-down service alive.
struct ServiceCollector {
    service: Weak<Service>,
}

#[async_trait]
impl EventCollector for ServiceCollector {
    async fn collect(&self, event: Event) -> anyhow::Result<()> {
        match self.service.upgrade() {
            Some(service) => {
                service.collect(event).await?;
                Ok(())
            }
            None => anyhow::bail!("alert service is closed"),
        }
    }
}
