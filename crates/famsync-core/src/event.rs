//! Sync events
//!
//! Events are hints that something changed on another device. Receivers
//! should treat them as a reason to refetch, never as the data itself.

use serde::{Deserialize, Serialize};

/// Events exchanged between devices of the same user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Family members were added, edited or removed
    People,
    /// Vaccination schedules changed
    Shots,
    /// Medicine schedules or doses changed
    Medicine,
    /// As-needed medicine log changed
    Prn,
    /// Sharing grants changed
    Sharing,
    /// A row changed in a watched table
    RawChange { table: String },
    /// Any event type this build doesn't know about
    #[serde(other)]
    Unknown,
}

impl SyncEvent {
    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::People => "people",
            SyncEvent::Shots => "shots",
            SyncEvent::Medicine => "medicine",
            SyncEvent::Prn => "prn",
            SyncEvent::Sharing => "sharing",
            SyncEvent::RawChange { .. } => "raw_change",
            SyncEvent::Unknown => "unknown",
        }
    }

    /// Build an event from its wire name
    ///
    /// `raw_change` needs a table, so it is only accepted when one is given.
    pub fn from_kind(kind: &str, table: Option<&str>) -> Option<Self> {
        let event = match kind {
            "people" => SyncEvent::People,
            "shots" => SyncEvent::Shots,
            "medicine" => SyncEvent::Medicine,
            "prn" => SyncEvent::Prn,
            "sharing" => SyncEvent::Sharing,
            "raw_change" => SyncEvent::RawChange {
                table: table?.to_string(),
            },
            _ => return None,
        };
        Some(event)
    }
}

/// Kind of row-level change reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}
