use omics_control_plane::features::auth::models::RegisterUser;
use omics_control_plane::features::crdt::models::CrdtUpdate;
use omics_control_plane::features::crdt::CrdtEngine;
use omics_control_plane::features::workspace::models::CreateWorkspaceRequest;
use sqlx::PgPool;
use uuid::Uuid;

mod common;

async fn seeded_workspace(services: &common::TestServices) -> Uuid {
    let owner = services
        .auth
        .register(RegisterUser { email: "pi-crdt@example.com".into(), password: "Correct-Horse-9".into() }, None)
        .await
        .unwrap();
    services
        .workspaces
        .create_workspace(owner.id, CreateWorkspaceRequest { name: "crdt-doc".into(), description: None })
        .await
        .unwrap()
        .id
}

/// Two editors race to set the same key at the same client timestamp.
/// The lexicographically greater origin wins, and the loser's write is
/// dropped silently rather than erroring.
#[sqlx::test]
async fn two_writer_tie_breaks_by_origin_and_drops_the_loser(pool: PgPool) {
    let services = common::setup_services(pool.clone()).await;
    let workspace_id = seeded_workspace(&services).await;

    let engine = CrdtEngine::new(pool, 100);
    let u1 = Uuid::from_u128(1);
    let u2 = Uuid::from_u128(2);

    let applied_1 = engine
        .apply_update(workspace_id, CrdtUpdate { path: "pipeline.step".into(), value: serde_json::json!("from-u1"), counter: 5, origin: u1 })
        .await
        .unwrap();
    assert!(applied_1);

    // u2's write at the same counter has the lexicographically greater
    // origin, so it must win even though it arrives second.
    let applied_2 = engine
        .apply_update(workspace_id, CrdtUpdate { path: "pipeline.step".into(), value: serde_json::json!("from-u2"), counter: 5, origin: u2 })
        .await
        .unwrap();
    assert!(applied_2);

    let snapshot = engine.sync_request(workspace_id, None).await.unwrap();
    let entry = snapshot.entries.iter().find(|e| e.path == "pipeline.step").unwrap();
    assert_eq!(entry.value, serde_json::json!("from-u2"));

    // A write claiming a stale counter must lose and not appear again.
    let applied_stale = engine
        .apply_update(workspace_id, CrdtUpdate { path: "pipeline.step".into(), value: serde_json::json!("stale"), counter: 1, origin: u1 })
        .await
        .unwrap();
    assert!(!applied_stale);
}

/// Any permutation of applying the same multiset of updates to two fresh
/// replicas must converge to the same field map.
#[sqlx::test]
async fn replicas_converge_regardless_of_application_order(pool: PgPool) {
    let services = common::setup_services(pool.clone()).await;
    let workspace_a = seeded_workspace(&services).await;
    let workspace_b = seeded_workspace(&services).await;

    let updates = vec![
        CrdtUpdate { path: "a".into(), value: serde_json::json!(1), counter: 1, origin: Uuid::from_u128(10) },
        CrdtUpdate { path: "b".into(), value: serde_json::json!(2), counter: 2, origin: Uuid::from_u128(11) },
        CrdtUpdate { path: "a".into(), value: serde_json::json!(3), counter: 3, origin: Uuid::from_u128(12) },
        CrdtUpdate { path: "c".into(), value: serde_json::json!(4), counter: 1, origin: Uuid::from_u128(13) },
    ];

    let engine_a = CrdtEngine::new(pool.clone(), 100);
    for u in updates.iter().cloned() {
        engine_a.apply_update(workspace_a, u).await.unwrap();
    }

    let mut reversed = updates.clone();
    reversed.reverse();
    let engine_b = CrdtEngine::new(pool, 100);
    for u in reversed {
        engine_b.apply_update(workspace_b, u).await.unwrap();
    }

    let mut snap_a = engine_a.sync_request(workspace_a, None).await.unwrap().entries;
    let mut snap_b = engine_b.sync_request(workspace_b, None).await.unwrap().entries;
    snap_a.sort_by(|x, y| x.path.cmp(&y.path));
    snap_b.sort_by(|x, y| x.path.cmp(&y.path));

    let values_a: Vec<_> = snap_a.into_iter().map(|e| (e.path, e.value)).collect();
    let values_b: Vec<_> = snap_b.into_iter().map(|e| (e.path, e.value)).collect();
    assert_eq!(values_a, values_b);
}

/// `apply_update(k,v,ts)` followed by `sync_request(since = v.counter)`
/// returns no entry for `k` — already-seen updates aren't replayed.
#[sqlx::test]
async fn sync_since_latest_counter_omits_already_seen_update(pool: PgPool) {
    let services = common::setup_services(pool.clone()).await;
    let workspace_id = seeded_workspace(&services).await;
    let engine = CrdtEngine::new(pool, 100);

    engine
        .apply_update(workspace_id, CrdtUpdate { path: "k".into(), value: serde_json::json!("v"), counter: 1, origin: Uuid::from_u128(1) })
        .await
        .unwrap();

    let sync = engine.sync_request(workspace_id, None).await.unwrap();
    let entry = sync.entries.iter().find(|e| e.path == "k").unwrap();

    let follow_up = engine.sync_request(workspace_id, Some(entry.counter as u64)).await.unwrap();
    assert!(follow_up.entries.iter().all(|e| e.path != "k"));
}
