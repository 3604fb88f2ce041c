use crate::features::presence::models::{next_available_color, CursorPosition, PresenceEntry, PresenceStatus, SelectionRange};
use chrono::Utc;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

const CURSOR_BROADCAST_MIN_INTERVAL: Duration = Duration::from_millis(80);

#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("not present in this workspace")]
    NotPresent,
}

/// Ephemeral, in-memory only: presence never touches Postgres. A crash loses
/// the roster, which is fine since every client re-announces on reconnect.
#[derive(Clone)]
pub struct PresenceService {
    rooms: std::sync::Arc<DashMap<Uuid, DashMap<Uuid, PresenceEntry>>>,
    idle_after: Duration,
    away_after: Duration,
    evict_after: Duration,
}

impl PresenceService {
    pub fn new(idle_after_secs: i64, away_after_secs: i64, evict_after_secs: i64) -> Self {
        Self {
            rooms: std::sync::Arc::new(DashMap::new()),
            idle_after: Duration::from_secs(idle_after_secs.max(0) as u64),
            away_after: Duration::from_secs(away_after_secs.max(0) as u64),
            evict_after: Duration::from_secs(evict_after_secs.max(0) as u64),
        }
    }

    pub fn join(&self, workspace_id: Uuid, user_id: Uuid, display_name: String) -> PresenceEntry {
        let room = self.rooms.entry(workspace_id).or_default();
        let colors_in_use: Vec<String> = room.iter().map(|e| e.value().color.clone()).collect();
        let color = next_available_color(colors_in_use.iter().map(String::as_str), user_id);
        let entry = PresenceEntry {
            user_id,
            display_name,
            color,
            status: PresenceStatus::Active,
            cursor: None,
            selection: None,
            joined_at: Utc::now(),
            last_seen: Instant::now(),
            last_cursor_broadcast: None,
        };
        room.insert(user_id, entry.clone());
        entry
    }

    pub fn leave(&self, workspace_id: Uuid, user_id: Uuid) {
        if let Some(room) = self.rooms.get(&workspace_id) {
            room.remove(&user_id);
        }
    }

    pub fn roster(&self, workspace_id: Uuid) -> Vec<PresenceEntry> {
        self.rooms
            .get(&workspace_id)
            .map(|room| room.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    /// Updates the cursor if the caller hasn't broadcast one within the
    /// coalescing window. Returns `true` when the update should actually be
    /// forwarded to the hub; `false` means it was coalesced (caller should
    /// drop it, not send a fresh broadcast).
    pub fn update_cursor(&self, workspace_id: Uuid, user_id: Uuid, cursor: CursorPosition) -> Result<bool, PresenceError> {
        let room = self.rooms.get(&workspace_id).ok_or(PresenceError::NotPresent)?;
        let mut entry = room.get_mut(&user_id).ok_or(PresenceError::NotPresent)?;
        let now = Instant::now();
        let should_broadcast = entry
            .last_cursor_broadcast
            .map(|last| now.duration_since(last) >= CURSOR_BROADCAST_MIN_INTERVAL)
            .unwrap_or(true);
        entry.cursor = Some(cursor);
        entry.last_seen = now;
        entry.status = PresenceStatus::Active;
        if should_broadcast {
            entry.last_cursor_broadcast = Some(now);
        }
        Ok(should_broadcast)
    }

    pub fn update_selection(&self, workspace_id: Uuid, user_id: Uuid, selection: SelectionRange) -> Result<(), PresenceError> {
        let room = self.rooms.get(&workspace_id).ok_or(PresenceError::NotPresent)?;
        let mut entry = room.get_mut(&user_id).ok_or(PresenceError::NotPresent)?;
        entry.selection = Some(selection);
        entry.last_seen = Instant::now();
        entry.status = PresenceStatus::Active;
        Ok(())
    }

    /// Steps every entry through active -> idle -> away -> evicted as its
    /// silence grows, and drops stragglers past `evict_after`. Call
    /// periodically from a background tick, one per workspace or in bulk.
    pub fn tick(&self) {
        let now = Instant::now();
        for room in self.rooms.iter() {
            room.retain(|_, entry| now.duration_since(entry.last_seen) < self.evict_after);
            for mut entry in room.iter_mut() {
                let silence = now.duration_since(entry.last_seen);
                entry.status = if silence >= self.away_after {
                    PresenceStatus::Away
                } else if silence >= self.idle_after {
                    PresenceStatus::Idle
                } else {
                    PresenceStatus::Active
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_assigns_distinct_palette_colors() {
        let presence = PresenceService::new(30, 300, 900);
        let workspace_id = Uuid::new_v4();
        let a = presence.join(workspace_id, Uuid::new_v4(), "Alice".into());
        let b = presence.join(workspace_id, Uuid::new_v4(), "Bob".into());
        assert_ne!(a.color, b.color);
    }

    #[test]
    fn leave_removes_from_roster() {
        let presence = PresenceService::new(30, 300, 900);
        let workspace_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        presence.join(workspace_id, user_id, "Alice".into());
        presence.leave(workspace_id, user_id);
        assert!(presence.roster(workspace_id).is_empty());
    }

    #[test]
    fn cursor_updates_coalesce_within_window() {
        let presence = PresenceService::new(30, 300, 900);
        let workspace_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        presence.join(workspace_id, user_id, "Alice".into());
        let first = presence
            .update_cursor(workspace_id, user_id, CursorPosition { doc_path: "a".into(), offset: 1 })
            .unwrap();
        let second = presence
            .update_cursor(workspace_id, user_id, CursorPosition { doc_path: "a".into(), offset: 2 })
            .unwrap();
        assert!(first);
        assert!(!second);
    }
}
