use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// Lamport clock tuple used to order concurrent writes: higher counter wins,
/// ties broken by origin id so every replica resolves the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
    pub counter: u64,
    pub origin: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldEntry {
    pub value: JsonValue,
    /// Per-field Lamport stamp. This is what wins or loses a merge — never
    /// advanced by the server, just compared against the incoming write.
    pub stamp: Stamp,
    /// Document-wide sync sequence number assigned when this field was last
    /// written. Unrelated to `stamp`: used only to answer "what changed since
    /// version N", never to decide which write wins.
    pub version: u64,
}

/// One client-submitted write: `path` is a flat key into the document's
/// top-level map (nested structure lives inside the JSON value itself).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrdtUpdate {
    pub path: String,
    pub value: JsonValue,
    pub counter: u64,
    pub origin: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrdtSnapshotEntry {
    pub path: String,
    pub value: JsonValue,
    pub counter: i64,
    pub origin: Uuid,
}

#[derive(Debug, FromRow)]
pub struct CrdtDocRow {
    pub workspace_id: Uuid,
    pub path: String,
    pub value: JsonValue,
    pub counter: i64,
    pub origin: Uuid,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub path: String,
    pub value: JsonValue,
    pub stamp: Stamp,
    pub version: u64,
    pub applied_at: DateTime<Utc>,
}

/// Response to a `sync_request`: either the delta since the caller's last
/// known counter, or a full snapshot when the delta can't be reconstructed
/// from the in-memory history ring (first join, or a gap wider than the
/// ring's capacity).
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub entries: Vec<CrdtSnapshotEntry>,
    pub full_snapshot: bool,
    pub counter: u64,
}
