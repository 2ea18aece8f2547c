//! The kind→factory dispatch registry.
//!
//! Maps a spec's `kind` discriminator to a factory that decodes the
//! kind-specific options and constructs the live handler. Built at
//! service construction, not hard-coded into the service itself, so
//! callers can add their own kinds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alert_core::{EventCollector, Handler};
use alert_store::HandlerSpec;
use serde::de::DeserializeOwned;

use crate::error::ServiceError;
use crate::handlers::aggregate::{AggregateHandler, AggregateHandlerConfig};
use crate::handlers::exec::{ExecHandler, ExecHandlerConfig};
use crate::handlers::external::ExternalHandler;
use crate::handlers::log::{LogHandler, LogHandlerConfig};
use crate::handlers::matching::MatchHandler;
use crate::handlers::post::{PostHandler, PostHandlerConfig};
use crate::handlers::publish::{PublishHandler, PublishHandlerConfig};
use crate::handlers::tcp::{TcpHandler, TcpHandlerConfig};

/// Collaborators a factory may need beyond the spec itself.
pub struct FactoryContext {
    /// Entry point for handlers that re-emit events (aggregate, publish).
    pub collector: Arc<dyn EventCollector>,
}

type Factory =
    Box<dyn Fn(&HandlerSpec, &FactoryContext) -> Result<Arc<dyn Handler>, ServiceError> + Send + Sync>;

struct KindEntry {
    /// Kinds that notify an outside system get the external-suppression
    /// wrapper so internal-only events never leave the process.
    external: bool,
    factory: Factory,
}

/// Registry of handler kinds.
#[derive(Default)]
pub struct HandlerRegistry {
    kinds: HashMap<String, KindEntry>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `kind`, replacing any previous one.
    pub fn register(
        &mut self,
        kind: &str,
        external: bool,
        factory: impl Fn(&HandlerSpec, &FactoryContext) -> Result<Arc<dyn Handler>, ServiceError>
            + Send
            + Sync
            + 'static,
    ) {
        self.kinds.insert(
            kind.to_string(),
            KindEntry {
                external,
                factory: Box::new(factory),
            },
        );
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Construct the full decorator chain for a spec.
    ///
    /// An unknown kind is a hard error. A kind in `disabled` yields
    /// `Ok(None)`: the spec is accepted and persisted but no live handler
    /// exists, and in particular no match wrapper is applied.
    pub fn build(
        &self,
        spec: &HandlerSpec,
        ctx: &FactoryContext,
        disabled: &HashSet<String>,
    ) -> Result<Option<Arc<dyn Handler>>, ServiceError> {
        let entry = self
            .kinds
            .get(&spec.kind)
            .ok_or_else(|| ServiceError::UnknownKind(spec.kind.clone()))?;
        if disabled.contains(&spec.kind) {
            return Ok(None);
        }
        let mut handler = (entry.factory)(spec, ctx)?;
        if entry.external {
            handler = Arc::new(ExternalHandler::new(handler));
        }
        if !spec.match_expr.is_empty() {
            handler = Arc::new(MatchHandler::new(&spec.match_expr, handler)?);
        }
        Ok(Some(handler))
    }
}

/// Decode a spec's options map into a kind-specific config. Unknown keys
/// fail decoding via `deny_unknown_fields` on every config type.
pub(crate) fn decode_options<T: DeserializeOwned>(
    kind: &str,
    options: &serde_json::Map<String, serde_json::Value>,
) -> Result<T, ServiceError> {
    serde_json::from_value(serde_json::Value::Object(options.clone())).map_err(|source| {
        ServiceError::InvalidOptions {
            kind: kind.to_string(),
            source,
        }
    })
}

/// The registry of built-in kinds.
#[must_use]
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("log", true, |spec, _ctx| {
        let config: LogHandlerConfig = decode_options(&spec.kind, &spec.options)?;
        Ok(Arc::new(LogHandler::new(config)?))
    });
    registry.register("exec", true, |spec, _ctx| {
        let config: ExecHandlerConfig = decode_options(&spec.kind, &spec.options)?;
        Ok(Arc::new(ExecHandler::new(config)?))
    });
    registry.register("tcp", true, |spec, _ctx| {
        let config: TcpHandlerConfig = decode_options(&spec.kind, &spec.options)?;
        Ok(Arc::new(TcpHandler::new(config)?))
    });
    registry.register("post", true, |spec, _ctx| {
        let config: PostHandlerConfig = decode_options(&spec.kind, &spec.options)?;
        Ok(Arc::new(PostHandler::new(config)?))
    });
    registry.register("aggregate", false, |spec, ctx| {
        let config: AggregateHandlerConfig = decode_options(&spec.kind, &spec.options)?;
        Ok(AggregateHandler::start(config, ctx.collector.clone())?)
    });
    registry.register("publish", false, |spec, ctx| {
        let config: PublishHandlerConfig = decode_options(&spec.kind, &spec.options)?;
        // A handler that republishes onto its own topic would re-enter
        // collection for every event it receives, forever.
        if config.topics.iter().any(|t| *t == spec.topic) {
            return Err(ServiceError::InvalidConfig(format!(
                "publish handler on topic {:?} cannot publish back to it",
                spec.topic
            )));
        }
        Ok(Arc::new(PublishHandler::new(config, ctx.collector.clone())?))
    });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_core::Event;
    use async_trait::async_trait;
    use serde_json::json;

    struct NullCollector;

    #[async_trait]
    impl EventCollector for NullCollector {
        async fn collect(&self, _event: Event) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn ctx() -> FactoryContext {
        FactoryContext {
            collector: Arc::new(NullCollector),
        }
    }

    fn spec(kind: &str, options: serde_json::Value) -> HandlerSpec {
        HandlerSpec {
            id: "h1".to_string(),
            topic: "t1".to_string(),
            kind: kind.to_string(),
            options: options.as_object().unwrap().clone(),
            match_expr: String::new(),
        }
    }

    #[tokio::test]
    async fn test_unknown_kind_is_an_error() {
        let registry = default_registry();
        let result = registry.build(&spec("carrier-pigeon", json!({})), &ctx(), &HashSet::new());
        assert!(matches!(result, Err(ServiceError::UnknownKind(_))));
    }

    #[tokio::test]
    async fn test_disabled_kind_builds_no_handler() {
        let registry = default_registry();
        let disabled: HashSet<String> = ["log".to_string()].into();
        let built = registry
            .build(
                &spec("log", json!({"path": "/var/log/alerts.log"})),
                &ctx(),
                &disabled,
            )
            .unwrap();
        assert!(built.is_none());
    }

    #[tokio::test]
    async fn test_unknown_option_key_is_an_error() {
        let registry = default_registry();
        let result = registry.build(
            &spec("log", json!({"path": "/var/log/alerts.log", "colour": "red"})),
            &ctx(),
            &HashSet::new(),
        );
        assert!(matches!(result, Err(ServiceError::InvalidOptions { .. })));
    }

    #[tokio::test]
    async fn test_publish_back_to_own_topic_rejected() {
        let registry = default_registry();
        let result = registry.build(
            &spec("publish", json!({"topics": ["t1", "other"]})),
            &ctx(),
            &HashSet::new(),
        );
        assert!(matches!(result, Err(ServiceError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_invalid_match_expression_fails_build() {
        let registry = default_registry();
        let mut s = spec("log", json!({"path": "/var/log/alerts.log"}));
        s.match_expr = "frobnicate() == TRUE".to_string();
        let result = registry.build(&s, &ctx(), &HashSet::new());
        assert!(matches!(result, Err(ServiceError::Match(_))));
    }
}
