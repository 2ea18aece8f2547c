//! Alert event types.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::level::Level;

fn unix_epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// The current status of one alert event within a topic.
///
/// `id` is the event's stable key inside its topic (typically a
/// measurement or series identity). Later updates with the same `id`
/// replace the state wholesale; it is never partially updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventState {
    /// Stable key inside the topic. Stored records may omit it; the store
    /// fills it back in from the record key on load.
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
    #[serde(default = "unix_epoch")]
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub duration: Duration,
    #[serde(default)]
    pub level: Level,
}

impl Default for EventState {
    fn default() -> Self {
        Self {
            id: String::new(),
            message: String::new(),
            details: String::new(),
            time: DateTime::UNIX_EPOCH,
            duration: Duration::ZERO,
            level: Level::Ok,
        }
    }
}

/// Contextual data attached to an event by its producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// Measurement name.
    #[serde(default)]
    pub name: String,
    /// Name of the task that generated this event.
    #[serde(default)]
    pub task_name: String,
    /// Concatenation of all group-by tags, or `nil` when ungrouped.
    #[serde(default)]
    pub group: String,
    /// Tags of the alerting series, used by match expressions.
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Fields of the alerting data point.
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
    /// Opaque result payload carried through to handlers.
    #[serde(default)]
    pub result: serde_json::Value,
}

/// One alert event flowing through the collection pipeline.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub state: EventState,
    pub data: EventData,
    /// Suppresses delivery to handlers that notify outside systems.
    /// Set on synthetic events (e.g. aggregates) that are internal-only.
    pub no_external: bool,
    previous_state: Option<EventState>,
}

impl Event {
    #[must_use]
    pub fn new(topic: impl Into<String>, state: EventState) -> Self {
        Self {
            topic: topic.into(),
            state,
            data: EventData::default(),
            no_external: false,
            previous_state: None,
        }
    }

    /// The state this event's ID held before this event was applied,
    /// populated by the topic registry during collection.
    #[must_use]
    pub fn previous_state(&self) -> Option<&EventState> {
        self.previous_state.as_ref()
    }

    /// Level of the previous state, `OK` when the event is new.
    #[must_use]
    pub fn previous_level(&self) -> Level {
        self.previous_state
            .as_ref()
            .map_or(Level::Ok, |s| s.level)
    }

    pub(crate) fn set_previous_state(&mut self, prev: Option<EventState>) {
        self.previous_state = prev;
    }

    /// The JSON wire form handlers emit to outside systems.
    #[must_use]
    pub fn alert_data(&self) -> AlertData {
        AlertData {
            id: self.state.id.clone(),
            message: self.state.message.clone(),
            details: self.state.details.clone(),
            time: self.state.time,
            duration: self.state.duration,
            level: self.state.level,
            data: self.data.result.clone(),
            previous_level: self.previous_level(),
        }
    }
}

/// Flattened, JSON-encodable view of an event, the consistent data format
/// written by the log, exec, tcp and post handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertData {
    pub id: String,
    pub message: String,
    pub details: String,
    pub time: DateTime<Utc>,
    pub duration: Duration,
    pub level: Level,
    pub data: serde_json::Value,
    #[serde(rename = "previousLevel")]
    pub previous_level: Level,
}

/// Snapshot of one topic: its most severe current level and how many
/// events it has collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicState {
    pub level: Level,
    pub collected: u64,
}
