//! In-memory alerting core: the event data model and the topic registry.
//!
//! An alert [`Event`] carries a topic name, the event's current
//! [`EventState`] (severity, message, timing) and an opaque result payload.
//! The [`Topics`] registry keeps the latest state of every event per topic
//! and fans each collected event out to the [`Handler`]s registered on that
//! topic.
//!
//! This crate owns no durable state; persistence and handler construction
//! live in the service layer.

pub mod event;
pub mod handler;
pub mod level;
pub mod topic;

pub use event::{AlertData, Event, EventData, EventState, TopicState};
pub use handler::{EventCollector, Handler};
pub use level::{Level, ParseLevelError};
pub use topic::{pattern_match, Topic, Topics};
