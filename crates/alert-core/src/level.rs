//! Alert severity levels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity of an alert event, ordered from least to most severe.
///
/// The text form is the upper-case name (`OK`, `INFO`, `WARNING`,
/// `CRITICAL`) and is used both on the wire and in match expressions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    /// Normal operation, clears an active alert.
    #[default]
    Ok,
    /// Informational, no action required.
    Info,
    /// Something needs attention.
    Warning,
    /// Immediate action required.
    Critical,
}

impl Level {
    /// All levels, in severity order.
    pub const ALL: [Level; 4] = [Level::Ok, Level::Info, Level::Warning, Level::Critical];

    /// Display name for this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown level name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown alert level {0:?}")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OK" => Ok(Self::Ok),
            "INFO" => Ok(Self::Info),
            "WARNING" => Ok(Self::Warning),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}
