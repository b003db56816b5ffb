use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a declared resource inside one topology.
///
/// Logical ids are unique per topology and survive renames of the
/// generated physical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    pub fn new(id: impl Into<String>) -> Self {
        LogicalId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalId {
    fn from(s: &str) -> Self {
        LogicalId(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp_ms: i64,
    pub message: String,
}

impl LogEntry {
    pub fn new(id: impl Into<String>, timestamp_ms: i64, message: impl Into<String>) -> Self {
        LogEntry {
            id: id.into(),
            timestamp_ms,
            message: message.into(),
        }
    }
}

/// A log entry on its way through a delivery pipeline, tagged with the
/// group it came from and, for cross-account submissions, the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardRecord {
    pub source_group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    pub timestamp_ms: i64,
    pub message: String,
}
