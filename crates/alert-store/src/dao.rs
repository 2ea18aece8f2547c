//! Handler spec records and the legacy (V1) topic-state records.
//!
//! Changes to these structures can break existing stored data; every
//! value is wrapped in the [`crate::envelope`] version envelope so old
//! generations stay decodable or fail loudly.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use alert_core::EventState;
use redb::{ReadableTable, TableError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope;
use crate::error::StoreError;
use crate::store::{TopicStore, HANDLER_SPECS, TOPIC_STATES_V1};

static VALID_HANDLER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-\._\p{L}0-9]+$").expect("handler id pattern"));
static VALID_TOPIC_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-:\._\p{L}0-9]+$").expect("topic id pattern"));

/// Spec validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("handler topic must contain only letters, numbers, '-', ':', '.' and '_': {0:?}")]
    InvalidTopic(String),
    #[error("handler ID must contain only letters, numbers, '-', '.' and '_': {0:?}")]
    InvalidId(String),
    #[error("handler kind must not be empty")]
    EmptyKind,
}

/// Declarative, persisted description of a handler: everything needed to
/// construct a live instance. `(topic, id)` is the unique key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerSpec {
    pub id: String,
    pub topic: String,
    /// Discriminator into the handler dispatch table.
    pub kind: String,
    /// Kind-specific configuration.
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
    /// Optional boolean match expression gating delivery.
    #[serde(default, rename = "match", skip_serializing_if = "String::is_empty")]
    pub match_expr: String,
}

const HANDLER_SPEC_VERSION: u32 = 2;

impl HandlerSpec {
    pub fn validate(&self) -> Result<(), SpecError> {
        if !VALID_TOPIC_ID.is_match(&self.topic) {
            return Err(SpecError::InvalidTopic(self.topic.clone()));
        }
        if !VALID_HANDLER_ID.is_match(&self.id) {
            return Err(SpecError::InvalidId(self.id.clone()));
        }
        if self.kind.is_empty() {
            return Err(SpecError::EmptyKind);
        }
        Ok(())
    }

    /// The store key for a `(topic, id)` pair.
    #[must_use]
    pub fn full_id(topic: &str, id: &str) -> String {
        format!("{topic}/{id}")
    }

    fn key(&self) -> String {
        Self::full_id(&self.topic, &self.id)
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        envelope::encode(HANDLER_SPEC_VERSION, self)
    }

    fn decode(data: &[u8]) -> Result<Self, StoreError> {
        let (version, value) = envelope::decode(data)?;
        match version {
            HANDLER_SPEC_VERSION => Ok(serde_json::from_value(value)?),
            other => Err(StoreError::UnknownVersion(other)),
        }
    }
}

/// Key-value backed access to persisted [`HandlerSpec`]s.
pub struct HandlerSpecDao {
    store: Arc<TopicStore>,
}

impl HandlerSpecDao {
    #[must_use]
    pub fn new(store: Arc<TopicStore>) -> Self {
        Self { store }
    }

    /// Fetch one spec; `None` when absent.
    pub fn get(&self, topic: &str, id: &str) -> Result<Option<HandlerSpec>, StoreError> {
        let txn = self.store.db().begin_read()?;
        let table = match txn.open_table(HANDLER_SPECS) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let key = HandlerSpec::full_id(topic, id);
        match table.get(key.as_str())? {
            Some(guard) => Ok(Some(HandlerSpec::decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Persist a new spec.
    /// [`StoreError::HandlerSpecExists`] if the key is already taken.
    pub fn create(&self, spec: &HandlerSpec) -> Result<(), StoreError> {
        let data = spec.encode()?;
        let key = spec.key();
        let txn = self.store.db().begin_write()?;
        {
            let mut table = txn.open_table(HANDLER_SPECS)?;
            if table.get(key.as_str())?.is_some() {
                return Err(StoreError::HandlerSpecExists);
            }
            table.insert(key.as_str(), data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Replace an existing spec.
    /// [`StoreError::NoHandlerSpecExists`] if the key is absent.
    pub fn replace(&self, spec: &HandlerSpec) -> Result<(), StoreError> {
        let data = spec.encode()?;
        let key = spec.key();
        let txn = self.store.db().begin_write()?;
        {
            let mut table = txn.open_table(HANDLER_SPECS)?;
            if table.get(key.as_str())?.is_none() {
                return Err(StoreError::NoHandlerSpecExists);
            }
            table.insert(key.as_str(), data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Delete a spec. Deleting an absent spec is not an error.
    pub fn delete(&self, topic: &str, id: &str) -> Result<(), StoreError> {
        let key = HandlerSpec::full_id(topic, id);
        let txn = self.store.db().begin_write()?;
        {
            let mut table = txn.open_table(HANDLER_SPECS)?;
            table.remove(key.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// List specs whose `(topic, id)` key glob-matches `topic`/`pattern`,
    /// in key order. `offset` and `limit` are pagination bounds; more
    /// results may exist when exactly `limit` items are returned.
    pub fn list(
        &self,
        topic: &str,
        pattern: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<HandlerSpec>, StoreError> {
        let pattern = if pattern.is_empty() { "*" } else { pattern };
        let full = HandlerSpec::full_id(topic, pattern);
        let matcher = glob::Pattern::new(&full).ok();
        let txn = self.store.db().begin_read()?;
        let table = match txn.open_table(HANDLER_SPECS) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut specs = Vec::new();
        let mut skipped = 0;
        for item in table.iter()? {
            let (key, value) = item?;
            let matched = matcher
                .as_ref()
                .is_some_and(|m| m.matches(key.value()));
            if !matched {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            specs.push(HandlerSpec::decode(value.value())?);
            if specs.len() == limit {
                break;
            }
        }
        Ok(specs)
    }
}

/// Legacy V1 topic-state record: the whole topic as one JSON blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicStateV1 {
    pub topic: String,
    #[serde(rename = "event-states", default)]
    pub event_states: HashMap<String, EventState>,
}

pub(crate) const TOPIC_STATE_V1_VERSION: u32 = 1;

pub(crate) fn encode_topic_state_v1(state: &TopicStateV1) -> Result<Vec<u8>, StoreError> {
    envelope::encode(TOPIC_STATE_V1_VERSION, state)
}

pub(crate) fn decode_topic_state_v1(data: &[u8]) -> Result<TopicStateV1, StoreError> {
    let (version, value) = envelope::decode(data)?;
    match version {
        TOPIC_STATE_V1_VERSION => Ok(serde_json::from_value(value)?),
        other => Err(StoreError::UnknownVersion(other)),
    }
}

impl TopicStore {
    /// Write a V1 topic-state record. Used to seed legacy stores in tests
    /// and by the downgrade migration's verification path.
    pub fn put_topic_state_v1(&self, state: &TopicStateV1) -> Result<(), StoreError> {
        let data = encode_topic_state_v1(state)?;
        let txn = self.db().begin_write()?;
        {
            let mut table = txn.open_table(TOPIC_STATES_V1)?;
            table.insert(state.topic.as_str(), data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// All V1 topic-state records, in topic order.
    pub fn topic_states_v1(&self) -> Result<Vec<TopicStateV1>, StoreError> {
        let txn = self.db().begin_read()?;
        let table = match txn.open_table(TOPIC_STATES_V1) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut states = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            states.push(decode_topic_state_v1(value.value())?);
        }
        Ok(states)
    }
}
