use crate::features::crdt::engine::CrdtEngine;
use crate::features::hub::room::{Room, RoomCommand, ROOM_MAILBOX_CAPACITY};
use crate::features::presence::service::PresenceService;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Process-wide map of live rooms. A room actor is spawned on first join and
/// exits (dropping its mailbox sender from the map) once its last connection
/// leaves, so idle workspaces cost nothing between sessions.
#[derive(Clone)]
pub struct HubRegistry {
    rooms: Arc<DashMap<Uuid, mpsc::Sender<RoomCommand>>>,
    crdt: CrdtEngine,
    presence: PresenceService,
    outbound_capacity: usize,
}

impl HubRegistry {
    pub fn new(crdt: CrdtEngine, presence: PresenceService, outbound_capacity: usize) -> Self {
        Self { rooms: Arc::new(DashMap::new()), crdt, presence, outbound_capacity }
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    pub fn room_mailbox(&self, workspace_id: Uuid) -> mpsc::Sender<RoomCommand> {
        if let Some(sender) = self.rooms.get(&workspace_id) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        let (tx, rx) = mpsc::channel(ROOM_MAILBOX_CAPACITY);
        let room = Room::new(workspace_id, self.crdt.clone(), self.presence.clone());
        tokio::spawn(room.run(rx));
        self.rooms.insert(workspace_id, tx.clone());
        tx
    }

    /// Forces eviction of every live connection in a room ahead of workspace
    /// teardown. Dropping the mailbox sender from the map lets the actor
    /// drain and exit once its connections notice the channel closed.
    pub fn evict_room(&self, workspace_id: Uuid) {
        self.rooms.remove(&workspace_id);
    }

    pub fn active_room_count(&self) -> usize {
        self.rooms.len()
    }
}
