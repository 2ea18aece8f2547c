//! The topic-state store: one bucket (table) per topic, one JSON-encoded
//! event state per event ID, plus a small `versions` table for schema
//! markers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use alert_core::EventState;
use redb::{Database, ReadableTable, TableDefinition, TableError, TableHandle};

use crate::error::StoreError;

pub(crate) const VERSIONS: TableDefinition<&str, &str> = TableDefinition::new("versions");
pub(crate) const HANDLER_SPECS: TableDefinition<&str, &[u8]> = TableDefinition::new("handler_specs");
pub(crate) const TOPIC_STATES_V1: TableDefinition<&str, &[u8]> = TableDefinition::new("topic_states");

/// Topic buckets are namespaced so they cannot collide with the fixed
/// tables above.
pub(crate) const TOPIC_BUCKET_PREFIX: &str = "topic/";

pub(crate) fn topic_table_name(topic: &str) -> String {
    format!("{TOPIC_BUCKET_PREFIX}{topic}")
}

/// Durable store for topic state and handler specs.
pub struct TopicStore {
    db: Database,
    path: PathBuf,
}

impl TopicStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path)?;
        Ok(Self { db, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    /// Read a version marker. Absent keys are `None`, not an error.
    pub fn version(&self, key: &str) -> Result<Option<String>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(VERSIONS) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(table.get(key)?.map(|guard| guard.value().to_string()))
    }

    /// Set a version marker.
    pub fn set_version(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VERSIONS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Upsert one event's state in its topic bucket.
    pub fn put_event(&self, topic: &str, state: &EventState) -> Result<(), StoreError> {
        let data = serde_json::to_vec(state)?;
        let name = topic_table_name(topic);
        let def = TableDefinition::<&str, &[u8]>::new(&name);
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(def)?;
            table.insert(state.id.as_str(), data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Delete one event's durable record. Deleting an absent event or an
    /// absent topic is a no-op.
    pub fn delete_event(&self, topic: &str, event: &str) -> Result<(), StoreError> {
        let name = topic_table_name(topic);
        let def = TableDefinition::<&str, &[u8]>::new(&name);
        let txn = self.db.begin_write()?;
        {
            let mut table = match txn.open_table(def) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            table.remove(event)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Drop a topic's entire bucket.
    pub fn delete_topic(&self, topic: &str) -> Result<(), StoreError> {
        let name = topic_table_name(topic);
        let def = TableDefinition::<&str, &[u8]>::new(&name);
        let txn = self.db.begin_write()?;
        txn.delete_table(def)?;
        txn.commit()?;
        Ok(())
    }

    /// Names of every persisted topic.
    pub fn topics(&self) -> Result<Vec<String>, StoreError> {
        let txn = self.db.begin_read()?;
        let mut names: Vec<String> = txn
            .list_tables()?
            .filter_map(|handle| {
                handle
                    .name()
                    .strip_prefix(TOPIC_BUCKET_PREFIX)
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Load every persisted event state for a topic. An absent topic
    /// yields an empty map.
    pub fn events(&self, topic: &str) -> Result<HashMap<String, EventState>, StoreError> {
        let name = topic_table_name(topic);
        let def = TableDefinition::<&str, &[u8]>::new(&name);
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(def) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(HashMap::new()),
            Err(err) => return Err(err.into()),
        };
        let mut events = HashMap::new();
        for item in table.iter()? {
            let (key, value) = item?;
            let mut state: EventState = serde_json::from_slice(value.value())?;
            if state.id.is_empty() {
                state.id = key.value().to_string();
            }
            events.insert(key.value().to_string(), state);
        }
        Ok(events)
    }
}
