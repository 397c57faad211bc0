//! Core session types shared across the workspace

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Durable identifier assigned by the backend store
pub type SessionId = i64;

/// Time one instrument stayed connected during a procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub name: String,
    pub duration_minutes: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

/// Accessory press counter (clutch pedal and friends)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClutchEntry {
    pub name: String,
    pub count: u32,
}

/// One procedure record, durable (from a snapshot) or live (pushed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Absent while the session is an unfinished live record.
    pub id: Option<SessionId>,
    pub procedure_name: String,
    pub operator_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_image: Option<String>,
    pub start_date: String,
    pub start_time: String,
    /// Combined start instant. `None` marks an unparsable date/time pair.
    pub started_at: Option<NaiveDateTime>,
    pub duration_minutes: f64,
    pub usage_entries: Vec<UsageEntry>,
    pub clutch_entries: Vec<ClutchEntry>,
    pub is_live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Session {
    /// True once the backend has assigned a permanent id.
    pub fn is_durable(&self) -> bool {
        self.id.is_some()
    }

    /// False when the start date/time could not be combined.
    pub fn has_valid_timestamp(&self) -> bool {
        self.started_at.is_some()
    }

    /// Total minutes across all usage entries
    pub fn total_usage_minutes(&self) -> f64 {
        self.usage_entries.iter().map(|u| u.duration_minutes).sum()
    }

    /// Total accessory presses
    pub fn total_clutch_count(&self) -> u32 {
        self.clutch_entries.iter().map(|c| c.count).sum()
    }
}

/// Newest-first ordering on the combined start instant.
///
/// Undated sessions compare equal to each other and after every dated one,
/// so a stable sort leaves them in arrival order.
pub fn newest_first(a: &Session, b: &Session) -> Ordering {
    match (a.started_at, b.started_at) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Synchronizer lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Uninitialized,
    Loading,
    Idle,
    Live,
}
