use crate::features::crdt::models::CrdtSnapshotEntry;
use crate::features::presence::models::{CursorPosition, PresenceEntry, SelectionRange};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire messages a client may send over the workspace socket. The very first
/// frame on a freshly upgraded connection must be `Auth`; anything else sent
/// first is rejected and the socket is closed (see `connection::handle_socket`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth { token: String },
    Join,
    Leave,
    CursorMove(CursorPosition),
    SelectionChange(SelectionRange),
    /// Edits to the pipeline-definition portion of the document. Carries the
    /// same `(path, value, counter)` shape as `StateUpdate`; kept as a
    /// distinct frame so clients can route pipeline edits and generic state
    /// edits through separate handlers without overloading one tag.
    PipelineUpdate { path: String, value: serde_json::Value, counter: u64 },
    StateUpdate { path: String, value: serde_json::Value, counter: u64 },
    /// Sent on reconnect with the counter last seen before the drop, so the
    /// room can answer with a delta instead of replaying the whole document.
    SyncRequest { since_version: u64 },
    Ping,
}

/// Wire messages the hub pushes to connected clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(clippy::large_enum_variant)]
pub enum ServerMessage {
    AuthOk { user_id: Uuid, workspace_id: Uuid, can_edit: bool },
    Error { message: String },
    UserJoined { entry: PresenceEntry },
    UserLeft { user_id: Uuid },
    PresenceList { roster: Vec<PresenceEntry> },
    CursorUpdated { user_id: Uuid, cursor: CursorPosition },
    SelectionUpdated { user_id: Uuid, selection: SelectionRange },
    PipelineUpdated { path: String, value: serde_json::Value, counter: u64, origin: Uuid },
    StateUpdated { path: String, value: serde_json::Value, counter: u64, origin: Uuid },
    /// Reply to `SyncRequest`, and the payload sent right after `Join`:
    /// either the full document or, if the gap since the caller's last known
    /// counter could be reconstructed from history, just the delta.
    FullSnapshot { entries: Vec<CrdtSnapshotEntry>, full_snapshot: bool, counter: u64 },
    Pong,
}
