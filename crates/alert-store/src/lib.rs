//! Durable storage for the alerting core.
//!
//! Backed by `redb`: a single-file embedded key-value store with ACID
//! read/write transactions. Named tables stand in for buckets.
//!
//! Two schema generations exist for topic state:
//!
//! * **V1** — one flat `topic_states` table, one JSON blob per topic
//!   wrapped in a `{version, value}` envelope.
//! * **V2** — one table per topic (`topic/<name>`), one independently
//!   JSON-encoded [`alert_core::EventState`] per event ID. Enables
//!   per-event upsert/delete without rewriting the whole topic blob.
//!
//! [`migrate`] converts between the two generations, online and
//! reversible, with a file-level backup on upgrade.

pub mod dao;
pub mod envelope;
pub mod error;
pub mod migrate;
pub mod store;

pub use dao::{HandlerSpec, HandlerSpecDao, SpecError, TopicStateV1};
pub use error::StoreError;
pub use migrate::{
    migrate_topic_store_v1_v2, migrate_topic_store_v2_v1, TOPIC_STORE_VERSION_2,
    TOPIC_STORE_VERSION_KEY,
};
pub use store::TopicStore;
