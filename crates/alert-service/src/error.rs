//! Service error types.

use alert_store::{SpecError, StoreError};
use thiserror::Error;

use crate::handlers::matching::MatchError;

/// Errors from spec validation, handler construction and orchestration.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    InvalidSpec(#[from] SpecError),

    /// The spec names a kind absent from the dispatch registry.
    #[error("unknown handler kind {0:?}")]
    UnknownKind(String),

    /// The spec's options failed to decode into the kind's config.
    /// Unknown option keys are a hard error, not ignored.
    #[error("invalid options for handler kind {kind:?}: {source}")]
    InvalidOptions {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// A decoded config failed its own validation.
    #[error("invalid handler configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error("invalid message template: {0}")]
    Template(#[from] Box<handlebars::TemplateError>),

    #[error("handler {id:?} already exists on topic {topic:?}")]
    HandlerExists { topic: String, id: String },

    #[error("no handler {id:?} exists on topic {topic:?}")]
    NoSuchHandler { topic: String, id: String },

    /// Updates may not move a handler to a different topic.
    #[error("cannot change the topic of an existing handler")]
    TopicChanged,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<handlebars::TemplateError> for ServiceError {
    fn from(err: handlebars::TemplateError) -> Self {
        Self::Template(Box::new(err))
    }
}
