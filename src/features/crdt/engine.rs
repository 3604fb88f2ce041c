use crate::features::crdt::models::{
    CrdtDocRow, CrdtSnapshotEntry, CrdtUpdate, FieldEntry, HistoryEntry, Stamp, SyncResult,
};
use axum::http::StatusCode;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CrdtError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CrdtError {
    pub fn to_status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

struct WorkspaceDoc {
    fields: DashMap<String, FieldEntry>,
    history: Mutex<VecDeque<HistoryEntry>>,
    history_capacity: usize,
    dirty: DashMap<String, ()>,
    /// Document-wide sync sequence number. Bumped once per accepted write and
    /// used only to answer "what changed since N" in `sync_request` — it
    /// never participates in the per-field merge decision, so it can't be
    /// used by a client to force a write through.
    version: AtomicU64,
}

impl WorkspaceDoc {
    fn new(history_capacity: usize) -> Self {
        Self {
            fields: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            dirty: DashMap::new(),
            version: AtomicU64::new(0),
        }
    }
}

/// One last-writer-wins JSON map per workspace. Concurrent writes to the same
/// `path` are resolved purely by comparing `(counter, origin)` stamps — no
/// operational transform, no vector clocks — which keeps merge trivial at the
/// cost of losing one side of a true concurrent edit to the same field.
/// Acceptable here since the unit of conflict is a whole field, not a
/// character range.
#[derive(Clone)]
pub struct CrdtEngine {
    pool: PgPool,
    docs: Arc<DashMap<Uuid, Arc<WorkspaceDoc>>>,
    history_capacity: usize,
}

impl CrdtEngine {
    pub fn new(pool: PgPool, history_capacity: usize) -> Self {
        Self { pool, docs: Arc::new(DashMap::new()), history_capacity }
    }

    async fn doc_for(&self, workspace_id: Uuid) -> Result<Arc<WorkspaceDoc>, CrdtError> {
        if let Some(doc) = self.docs.get(&workspace_id) {
            return Ok(doc.clone());
        }
        let rows: Vec<CrdtDocRow> = sqlx::query_as("SELECT * FROM crdt_docs WHERE workspace_id = $1")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;
        let doc = Arc::new(WorkspaceDoc::new(self.history_capacity));
        for row in rows {
            doc.fields.insert(
                row.path,
                FieldEntry {
                    value: row.value,
                    stamp: Stamp { counter: row.counter as u64, origin: row.origin },
                    version: 0,
                },
            );
        }
        self.docs.insert(workspace_id, doc.clone());
        Ok(doc)
    }

    /// Applies `update` by comparing its raw `(counter, origin)` stamp
    /// directly against the field's current stamp — the server never
    /// advances a client's counter before comparing it, since doing so would
    /// make every write "win" regardless of how stale the counter it claims
    /// is. A field's own counter only ever grows via `max(existing, incoming)`
    /// on an accepted write, so replicas converge on the same stamp
    /// regardless of application order. Returns `true` when applied (the
    /// caller should rebroadcast), `false` when the field's current stamp
    /// already dominates (the caller should drop it).
    pub async fn apply_update(&self, workspace_id: Uuid, update: CrdtUpdate) -> Result<bool, CrdtError> {
        let doc = self.doc_for(workspace_id).await?;

        let existing_counter = doc.fields.get(&update.path).map(|e| e.stamp.counter).unwrap_or(0);
        let new_stamp = Stamp { counter: existing_counter.max(update.counter), origin: update.origin };

        let applied = match doc.fields.get(&update.path) {
            Some(existing) if existing.stamp >= new_stamp => false,
            _ => true,
        };

        if applied {
            let version = doc.version.fetch_add(1, Ordering::SeqCst) + 1;
            doc.fields.insert(
                update.path.clone(),
                FieldEntry { value: update.value.clone(), stamp: new_stamp, version },
            );
            doc.dirty.insert(update.path.clone(), ());

            let mut history = doc.history.lock().unwrap();
            if history.len() == doc.history_capacity {
                history.pop_front();
            }
            history.push_back(HistoryEntry {
                path: update.path,
                value: update.value,
                stamp: new_stamp,
                version,
                applied_at: Utc::now(),
            });
        }

        Ok(applied)
    }

    /// Incremental sync: returns only fields touched since `since_version`,
    /// read straight off the history ring. When the ring has already wrapped
    /// past `since_version` (or the caller has no baseline), the gap can't be
    /// reconstructed from history alone and a `full_snapshot` is returned
    /// instead — this is also the path taken on first join.
    pub async fn sync_request(&self, workspace_id: Uuid, since_version: Option<u64>) -> Result<SyncResult, CrdtError> {
        let doc = self.doc_for(workspace_id).await?;
        let current_version = doc.version.load(Ordering::SeqCst);

        if let Some(since) = since_version {
            let history = doc.history.lock().unwrap();
            let oldest_in_ring = history.front().map(|e| e.version);
            let ring_covers_gap = oldest_in_ring.map(|oldest| oldest <= since + 1).unwrap_or(since == current_version);

            if ring_covers_gap {
                let updates: Vec<CrdtSnapshotEntry> = history
                    .iter()
                    .filter(|e| e.version > since)
                    .map(|e| CrdtSnapshotEntry {
                        path: e.path.clone(),
                        value: e.value.clone(),
                        counter: e.version as i64,
                        origin: e.stamp.origin,
                    })
                    .collect();
                return Ok(SyncResult { entries: updates, full_snapshot: false, counter: current_version });
            }
        }

        let entries = doc
            .fields
            .iter()
            .map(|e| CrdtSnapshotEntry {
                path: e.key().clone(),
                value: e.value().value.clone(),
                counter: e.value().version as i64,
                origin: e.value().stamp.origin,
            })
            .collect();
        Ok(SyncResult { entries, full_snapshot: true, counter: current_version })
    }

    /// Current sync version of one field, if it's been written since boot.
    /// Used by the room actor right after a successful `apply_update` to
    /// learn the version it was just stamped with, without re-scanning the
    /// whole field map.
    pub fn field_version(&self, workspace_id: Uuid, path: &str) -> Option<u64> {
        self.docs.get(&workspace_id).and_then(|doc| doc.fields.get(path).map(|e| e.version))
    }

    pub async fn recent_history(&self, workspace_id: Uuid, limit: usize) -> Result<Vec<HistoryEntry>, CrdtError> {
        let doc = self.doc_for(workspace_id).await?;
        let history = doc.history.lock().unwrap();
        Ok(history.iter().rev().take(limit).cloned().collect())
    }

    pub fn snapshot_in_memory(&self, workspace_id: Uuid) -> Vec<CrdtSnapshotEntry> {
        self.docs
            .get(&workspace_id)
            .map(|doc| {
                doc.fields
                    .iter()
                    .map(|e| CrdtSnapshotEntry {
                        path: e.key().clone(),
                        value: e.value().value.clone(),
                        counter: e.value().version as i64,
                        origin: e.value().stamp.origin,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Flushes dirty fields for one workspace to Postgres. Call from a
    /// periodic background tick and once more during workspace teardown so
    /// the snapshot on disk matches the in-memory state before the room is
    /// torn down.
    pub async fn persist_tick(&self, workspace_id: Uuid) -> Result<(), CrdtError> {
        let Some(doc) = self.docs.get(&workspace_id) else { return Ok(()) };
        let dirty_paths: Vec<String> = doc.dirty.iter().map(|e| e.key().clone()).collect();
        if dirty_paths.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for path in &dirty_paths {
            let Some(entry) = doc.fields.get(path) else { continue };
            sqlx::query(
                "INSERT INTO crdt_docs (workspace_id, path, value, counter, origin, updated_at)
                 VALUES ($1, $2, $3, $4, $5, now())
                 ON CONFLICT (workspace_id, path) DO UPDATE SET
                    value = excluded.value, counter = excluded.counter, origin = excluded.origin, updated_at = now()
                 WHERE crdt_docs.counter <= excluded.counter",
            )
            .bind(workspace_id)
            .bind(path)
            .bind(&entry.value)
            .bind(entry.stamp.counter as i64)
            .bind(entry.stamp.origin)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        for path in dirty_paths {
            doc.dirty.remove(&path);
        }
        Ok(())
    }

    /// Workspaces with a live in-memory document, i.e. ones touched since
    /// boot. Used by the periodic persist tick to know what to flush without
    /// scanning Postgres.
    pub fn active_workspace_ids(&self) -> Vec<Uuid> {
        self.docs.iter().map(|e| *e.key()).collect()
    }

    /// Persists everything, then drops the in-memory document so the next
    /// access rebuilds it fresh from Postgres. Used by workspace teardown.
    pub async fn evict(&self, workspace_id: Uuid) -> Result<(), CrdtError> {
        self.persist_tick(workspace_id).await?;
        self.docs.remove(&workspace_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_counter_wins_over_lower() {
        let a = Stamp { counter: 1, origin: Uuid::nil() };
        let b = Stamp { counter: 2, origin: Uuid::nil() };
        assert!(b > a);
    }

    #[test]
    fn tie_broken_by_origin() {
        let low_origin = Uuid::from_u128(1);
        let high_origin = Uuid::from_u128(2);
        let a = Stamp { counter: 5, origin: low_origin };
        let b = Stamp { counter: 5, origin: high_origin };
        assert!(b > a);
    }
}
