use omics_control_plane::features::audit::models::AuditQuery;
use sqlx::PgPool;

mod common;

#[sqlx::test]
async fn log_writes_are_queryable_newest_first(pool: PgPool) {
    let audit = omics_control_plane::features::audit::AuditService::new(pool);

    audit.log(None, "workspace.create", "workspace", None, "success", None, None, None, None).await.unwrap();
    audit.log(None, "workspace.delete", "workspace", None, "success", None, None, None, None).await.unwrap();

    let page = audit.query(AuditQuery {
        user_id: None,
        target_type: Some("workspace".into()),
        action: None,
        result: None,
        since: None,
        until: None,
        cursor_created_at: None,
        cursor_id: None,
        limit: None,
    }).await.unwrap();

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.records[0].action, "workspace.delete");
    assert_eq!(page.records[1].action, "workspace.create");
}

#[sqlx::test]
async fn pagination_cursor_advances_through_all_pages_without_duplicates(pool: PgPool) {
    let audit = omics_control_plane::features::audit::AuditService::new(pool);

    for i in 0..5 {
        audit
            .log(None, &format!("job.submit.{i}"), "job", None, "success", None, None, None, None)
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor = (None, None);
    loop {
        let page = audit.query(AuditQuery {
            user_id: None,
            target_type: Some("job".into()),
            action: None,
            result: None,
            since: None,
            until: None,
            cursor_created_at: cursor.0,
            cursor_id: cursor.1,
            limit: Some(2),
        }).await.unwrap();

        seen.extend(page.records.iter().map(|r| r.action.clone()));
        match (page.next_cursor_created_at, page.next_cursor_id) {
            (Some(c), Some(id)) => cursor = (Some(c), Some(id)),
            _ => break,
        }
    }

    assert_eq!(seen.len(), 5);
    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 5);
}
