//! Alert orchestration.
//!
//! Binds persisted [`alert_store::HandlerSpec`]s to live
//! [`alert_core::Handler`] instances through a kind→factory dispatch
//! registry, decorates them (match expression, aggregation, publish,
//! external-suppression), and drives the [`Service`]: event collection
//! with durable topic state, topic lifecycle, and startup load.

pub mod error;
pub mod handlers;
pub mod registry;
pub mod service;

pub use error::ServiceError;
pub use handlers::matching::MatchError;
pub use registry::{default_registry, FactoryContext, HandlerRegistry};
pub use service::{Service, ServiceConfig};

pub use alert_core::{Event, EventCollector, EventState, Handler, Level, TopicState};
pub use alert_store::HandlerSpec;
