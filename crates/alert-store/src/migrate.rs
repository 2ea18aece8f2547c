//! Topic-store schema migrations.
//!
//! The upgrade (V1 to V2) takes a file-level backup first and restores
//! it if anything goes wrong, so a half-migrated store is never left
//! behind. The downgrade (V2 to V1) runs in a single transaction and
//! needs no backup.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use redb::{ReadableTable, TableHandle};
use tracing::{error, info, warn};

use crate::dao::{decode_topic_state_v1, encode_topic_state_v1, TopicStateV1};
use crate::error::StoreError;
use crate::store::{topic_table_name, TopicStore, TOPIC_BUCKET_PREFIX, TOPIC_STATES_V1, VERSIONS};

pub const TOPIC_STORE_VERSION_KEY: &str = "topic_store_version";
pub const TOPIC_STORE_VERSION_2: &str = "2";

const MIGRATE_PAGE_SIZE: usize = 100;

fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".v1.bak");
    PathBuf::from(name)
}

/// Copy `src` to `dst`, refusing to overwrite an existing `dst`.
fn copy_exclusive(src: &Path, dst: &Path) -> Result<(), StoreError> {
    let mut reader = fs::File::open(src)?;
    let mut writer = match fs::OpenOptions::new().write(true).create_new(true).open(dst) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StoreError::BackupExists(dst.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };
    io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    Ok(())
}

/// Upgrade the store at `path` from the V1 layout (one blob per topic)
/// to the V2 layout (one bucket per topic, one record per event).
///
/// Safe to call on every startup: an already-migrated or brand-new
/// store is a no-op apart from stamping the version marker. Fails with
/// [`StoreError::BackupExists`] if a previous upgrade left its backup
/// file behind; that file must be inspected and removed by hand.
pub fn migrate_topic_store_v1_v2(path: &Path) -> Result<(), StoreError> {
    if !path.exists() {
        // Nothing to convert. Stamp the new store so later runs skip this.
        let store = TopicStore::open(path)?;
        store.set_version(TOPIC_STORE_VERSION_KEY, TOPIC_STORE_VERSION_2)?;
        return Ok(());
    }

    {
        let store = TopicStore::open(path)?;
        if store.version(TOPIC_STORE_VERSION_KEY)?.as_deref() == Some(TOPIC_STORE_VERSION_2) {
            info!(path = %path.display(), "topic store already at version 2");
            return Ok(());
        }
    }

    let bak = backup_path(path);
    copy_exclusive(path, &bak)?;
    info!(path = %path.display(), backup = %bak.display(), "migrating topic store to version 2");

    let store = TopicStore::open(path)?;
    match convert_v1_to_v2(&store) {
        Ok(migrated) => {
            drop(store);
            info!(topics = migrated, "topic store migration complete");
            if let Err(err) = fs::remove_file(&bak) {
                warn!(backup = %bak.display(), error = %err, "failed to remove migration backup");
            }
            Ok(())
        }
        Err(err) => {
            // Put the original file back so the next start retries cleanly.
            drop(store);
            if let Err(restore_err) = fs::rename(&bak, path) {
                error!(
                    backup = %bak.display(),
                    error = %restore_err,
                    "failed to restore topic store backup"
                );
            }
            Err(err)
        }
    }
}

fn convert_v1_to_v2(store: &TopicStore) -> Result<usize, StoreError> {
    let txn = store.db().begin_write()?;
    let mut migrated = 0;
    let mut last_key: Option<String> = None;
    loop {
        let mut page: Vec<TopicStateV1> = Vec::new();
        {
            let table = txn.open_table(TOPIC_STATES_V1)?;
            let start: Bound<&str> = match &last_key {
                Some(key) => Bound::Excluded(key.as_str()),
                None => Bound::Unbounded,
            };
            for item in table.range::<&str>((start, Bound::Unbounded))? {
                let (_, value) = item?;
                page.push(decode_topic_state_v1(value.value())?);
                if page.len() == MIGRATE_PAGE_SIZE {
                    break;
                }
            }
        }
        if page.is_empty() {
            break;
        }
        last_key = page.last().map(|state| state.topic.clone());
        for state in page {
            let name = topic_table_name(&state.topic);
            let def = redb::TableDefinition::<&str, &[u8]>::new(&name);
            // Opening the table is what creates it; topics with no
            // events still get their bucket.
            let mut bucket = txn.open_table(def)?;
            for (id, mut event) in state.event_states {
                if event.id.is_empty() {
                    event.id = id.clone();
                }
                let data = serde_json::to_vec(&event)?;
                bucket.insert(id.as_str(), data.as_slice())?;
            }
            migrated += 1;
        }
    }
    txn.delete_table(TOPIC_STATES_V1)?;
    {
        let mut versions = txn.open_table(VERSIONS)?;
        versions.insert(TOPIC_STORE_VERSION_KEY, TOPIC_STORE_VERSION_2)?;
    }
    txn.commit()?;
    Ok(migrated)
}

/// Downgrade the store at `path` from the V2 layout back to V1.
///
/// A no-op unless the store is marked as version 2. Runs in a single
/// transaction, so it either completes or leaves the store untouched.
pub fn migrate_topic_store_v2_v1(path: &Path) -> Result<(), StoreError> {
    let store = TopicStore::open(path)?;
    if store.version(TOPIC_STORE_VERSION_KEY)?.as_deref() != Some(TOPIC_STORE_VERSION_2) {
        info!(path = %path.display(), "topic store is not at version 2, nothing to downgrade");
        return Ok(());
    }

    let txn = store.db().begin_write()?;
    let topics: Vec<String> = txn
        .list_tables()?
        .filter_map(|handle| {
            handle
                .name()
                .strip_prefix(TOPIC_BUCKET_PREFIX)
                .map(str::to_string)
        })
        .collect();

    let mut states = Vec::with_capacity(topics.len());
    for topic in &topics {
        let name = topic_table_name(topic);
        let def = redb::TableDefinition::<&str, &[u8]>::new(&name);
        let mut state = TopicStateV1 {
            topic: topic.clone(),
            ..TopicStateV1::default()
        };
        {
            let bucket = txn.open_table(def)?;
            for item in bucket.iter()? {
                let (key, value) = item?;
                let event = serde_json::from_slice(value.value())?;
                state.event_states.insert(key.value().to_string(), event);
            }
        }
        txn.delete_table(def)?;
        states.push(state);
    }
    {
        let mut table = txn.open_table(TOPIC_STATES_V1)?;
        for state in &states {
            let data = encode_topic_state_v1(state)?;
            table.insert(state.topic.as_str(), data.as_slice())?;
        }
    }
    {
        let mut versions = txn.open_table(VERSIONS)?;
        versions.remove(TOPIC_STORE_VERSION_KEY)?;
    }
    txn.commit()?;
    info!(topics = states.len(), "topic store downgraded to version 1");
    Ok(())
}
