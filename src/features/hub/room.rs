use crate::features::crdt::engine::CrdtEngine;
use crate::features::crdt::models::CrdtUpdate;
use crate::features::hub::protocol::{ClientMessage, ServerMessage};
use crate::features::presence::models::{CursorPosition, SelectionRange};
use crate::features::presence::service::PresenceService;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

const SLOW_CONSUMER_DROP_THRESHOLD: u32 = 50;

pub enum RoomCommand {
    Join {
        conn_id: Uuid,
        user_id: Uuid,
        display_name: String,
        can_edit: bool,
        outbound: mpsc::Sender<ServerMessage>,
        live_updates: watch::Sender<Option<ServerMessage>>,
    },
    Leave { conn_id: Uuid, user_id: Uuid },
    Inbound { user_id: Uuid, message: ClientMessage },
}

struct ConnectionSlot {
    user_id: Uuid,
    can_edit: bool,
    outbound: mpsc::Sender<ServerMessage>,
    /// Cursor/selection broadcasts skip the ordered mailbox entirely: a
    /// `watch` channel only ever holds the latest value, so a slow consumer
    /// loses intermediate updates automatically instead of either blocking
    /// the room or requiring us to reach into a full mailbox to evict an
    /// older one.
    live_updates: watch::Sender<Option<ServerMessage>>,
    dropped: u32,
}

/// One actor per workspace room, single-threaded over its mailbox so
/// concurrent edits from many connections are serialized without an
/// explicit lock: everything that touches room state runs on this task.
pub struct Room {
    workspace_id: Uuid,
    crdt: CrdtEngine,
    presence: PresenceService,
    connections: HashMap<Uuid, ConnectionSlot>,
}

impl Room {
    pub fn new(workspace_id: Uuid, crdt: CrdtEngine, presence: PresenceService) -> Self {
        Self { workspace_id, crdt, presence, connections: HashMap::new() }
    }

    pub async fn run(mut self, mut mailbox: mpsc::Receiver<RoomCommand>) {
        while let Some(cmd) = mailbox.recv().await {
            match cmd {
                RoomCommand::Join { conn_id, user_id, display_name, can_edit, outbound, live_updates } => {
                    self.handle_join(conn_id, user_id, display_name, can_edit, outbound, live_updates).await;
                }
                RoomCommand::Leave { conn_id, user_id } => {
                    self.handle_leave(conn_id, user_id);
                }
                RoomCommand::Inbound { user_id, message } => {
                    self.handle_inbound(user_id, message).await;
                }
            }
            if self.connections.is_empty() {
                tracing::debug!(workspace_id = %self.workspace_id, "room emptied, actor exiting");
                break;
            }
        }
    }

    async fn handle_join(
        &mut self,
        conn_id: Uuid,
        user_id: Uuid,
        display_name: String,
        can_edit: bool,
        outbound: mpsc::Sender<ServerMessage>,
        live_updates: watch::Sender<Option<ServerMessage>>,
    ) {
        let entry = self.presence.join(self.workspace_id, user_id, display_name);
        let sync = self.crdt.sync_request(self.workspace_id, None).await.unwrap_or(
            crate::features::crdt::models::SyncResult { entries: Vec::new(), full_snapshot: true, counter: 0 },
        );
        let roster = self.presence.roster(self.workspace_id);

        let _ = outbound.send(ServerMessage::PresenceList { roster }).await;
        let _ = outbound
            .send(ServerMessage::FullSnapshot { entries: sync.entries, full_snapshot: sync.full_snapshot, counter: sync.counter })
            .await;
        self.connections.insert(conn_id, ConnectionSlot { user_id, can_edit, outbound, live_updates, dropped: 0 });
        self.broadcast(ServerMessage::UserJoined { entry }, Some(conn_id));
    }

    fn handle_leave(&mut self, conn_id: Uuid, user_id: Uuid) {
        self.evict_connection(conn_id, user_id);
    }

    fn evict_connection(&mut self, conn_id: Uuid, user_id: Uuid) {
        self.connections.remove(&conn_id);
        let still_connected = self.connections.values().any(|c| c.user_id == user_id);
        if !still_connected {
            self.presence.leave(self.workspace_id, user_id);
            self.broadcast(ServerMessage::UserLeft { user_id }, None);
        }
    }

    /// Viewers may only read (sync/ping); any mutating frame from a
    /// connection without edit rights is rejected instead of applied.
    fn sender_can_edit(&self, user_id: Uuid) -> bool {
        self.connections.values().any(|c| c.user_id == user_id && c.can_edit)
    }

    fn send_to_user(&self, user_id: Uuid, message: ServerMessage) {
        if let Some(slot) = self.connections.values().find(|c| c.user_id == user_id) {
            let _ = slot.outbound.try_send(message);
        }
    }

    async fn handle_inbound(&mut self, user_id: Uuid, message: ClientMessage) {
        match message {
            ClientMessage::Auth { .. } => {
                // Only valid as the very first frame, handled during the
                // upgrade handshake before the room ever sees this message.
            }
            ClientMessage::Join => {
                // Idempotent: the connection already joined to receive this
                // frame at all, since `handle_inbound` only runs on an
                // already-registered connection.
            }
            ClientMessage::Leave => {
                if let Some((&conn_id, _)) = self.connections.iter().find(|(_, slot)| slot.user_id == user_id) {
                    self.evict_connection(conn_id, user_id);
                }
            }
            ClientMessage::PipelineUpdate { path, value, counter } => {
                self.apply_and_broadcast(user_id, path, value, counter, true).await;
            }
            ClientMessage::StateUpdate { path, value, counter } => {
                self.apply_and_broadcast(user_id, path, value, counter, false).await;
            }
            ClientMessage::SyncRequest { since_version } => {
                match self.crdt.sync_request(self.workspace_id, Some(since_version)).await {
                    Ok(sync) => self.send_to_user(
                        user_id,
                        ServerMessage::FullSnapshot { entries: sync.entries, full_snapshot: sync.full_snapshot, counter: sync.counter },
                    ),
                    Err(e) => tracing::warn!(error = %e, "sync request failed"),
                }
            }
            ClientMessage::CursorMove(cursor) => {
                self.handle_cursor_update(user_id, cursor);
            }
            ClientMessage::SelectionChange(selection) => {
                self.handle_selection_update(user_id, selection);
            }
            ClientMessage::Ping => {
                self.send_to_user(user_id, ServerMessage::Pong);
            }
        }
    }

    async fn apply_and_broadcast(&mut self, user_id: Uuid, path: String, value: serde_json::Value, counter: u64, pipeline: bool) {
        if !self.sender_can_edit(user_id) {
            self.send_to_user(user_id, ServerMessage::Error { message: "viewers cannot mutate workspace state".into() });
            return;
        }
        let update = CrdtUpdate { path: path.clone(), value: value.clone(), counter, origin: user_id };
        match self.crdt.apply_update(self.workspace_id, update).await {
            Ok(true) => {
                let applied_counter = self.crdt.field_version(self.workspace_id, &path).unwrap_or(counter);
                let message = if pipeline {
                    ServerMessage::PipelineUpdated { path, value, counter: applied_counter, origin: user_id }
                } else {
                    ServerMessage::StateUpdated { path, value, counter: applied_counter, origin: user_id }
                };
                self.broadcast(message, None);
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "crdt update failed"),
        }
    }

    fn handle_cursor_update(&mut self, user_id: Uuid, cursor: CursorPosition) {
        match self.presence.update_cursor(self.workspace_id, user_id, cursor.clone()) {
            Ok(true) => self.broadcast_live(ServerMessage::CursorUpdated { user_id, cursor }),
            Ok(false) => {}
            Err(e) => tracing::debug!(error = %e, "cursor update for unknown presence entry"),
        }
    }

    fn handle_selection_update(&mut self, user_id: Uuid, selection: SelectionRange) {
        if self.presence.update_selection(self.workspace_id, user_id, selection.clone()).is_ok() {
            self.broadcast_live(ServerMessage::SelectionUpdated { user_id, selection });
        }
    }

    /// Fans `message` out to every connection except `exclude` over the
    /// ordered mailbox. A full outbound channel is a dropped message, not a
    /// blocked room: connections past `SLOW_CONSUMER_DROP_THRESHOLD`
    /// consecutive drops are closed.
    fn broadcast(&mut self, message: ServerMessage, exclude: Option<Uuid>) {
        let mut slow = Vec::new();
        for (conn_id, slot) in self.connections.iter_mut() {
            if Some(*conn_id) == exclude {
                continue;
            }
            match slot.outbound.try_send(message.clone()) {
                Ok(()) => slot.dropped = 0,
                Err(_) => {
                    slot.dropped += 1;
                    if slot.dropped >= SLOW_CONSUMER_DROP_THRESHOLD {
                        slow.push((*conn_id, slot.user_id));
                    }
                }
            }
        }
        for (conn_id, user_id) in slow {
            tracing::warn!(workspace_id = %self.workspace_id, %conn_id, "closing slow consumer");
            self.evict_connection(conn_id, user_id);
        }
    }

    /// Fans a high-frequency cursor/selection update out through each
    /// connection's `watch` channel, which always keeps the newest value: a
    /// slow consumer sees its oldest unread update overwritten rather than
    /// the fresh one getting silently dropped in favor of a stale queued one.
    fn broadcast_live(&mut self, message: ServerMessage) {
        for slot in self.connections.values() {
            let _ = slot.live_updates.send(Some(message.clone()));
        }
    }
}

pub const ROOM_MAILBOX_CAPACITY: usize = 1024;
