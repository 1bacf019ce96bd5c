pub mod protocol;

use std::collections::BTreeMap;

use ordered_float::NotNan;
use serde::{Serialize, Serializer};

// We use `Box<str>` for strings that are never grown after construction.
type BoxStr = Box<str>;

/// Severity of a status event, as understood by the remote store.
///
/// Serialized as its integer level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Something went wrong: broken packets, failed sensors, missing data.
    Error = 0,
    /// Progress notices such as startup and connection attempts.
    Info = 1,
    /// The link is established and data is flowing.
    Success = 2,
}

impl Severity {
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.level())
    }
}

/// An entry for the remote error/status channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub level: Severity,
    pub message: BoxStr,
    #[serde(serialize_with = "unix_seconds")]
    pub time: jiff::Timestamp,
}

impl StatusEvent {
    pub fn new(level: Severity, message: impl Into<BoxStr>) -> Self {
        Self {
            level,
            message: message.into(),
            time: jiff::Timestamp::now(),
        }
    }

    pub fn error(message: impl Into<BoxStr>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn info(message: impl Into<BoxStr>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn success(message: impl Into<BoxStr>) -> Self {
        Self::new(Severity::Success, message)
    }
}

/// Mean value of every metric collected during one report interval.
///
/// Serialized as a flat object: one field per metric plus `time`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    #[serde(flatten)]
    pub metrics: BTreeMap<BoxStr, NotNan<f64>>,
    #[serde(serialize_with = "unix_seconds")]
    pub time: jiff::Timestamp,
}

impl Summary {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).map(|v| v.into_inner())
    }
}

/// Seconds since the Unix epoch as a float, the timestamp format of the store.
pub fn unix_seconds<S: Serializer>(
    timestamp: &jiff::Timestamp,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(timestamp.as_duration().as_secs_f64())
}
