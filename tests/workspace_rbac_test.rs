use omics_control_plane::features::auth::models::RegisterUser;
use omics_control_plane::features::rbac::Permission;
use omics_control_plane::features::workspace::models::{CreateWorkspaceRequest, WorkspaceRole};
use omics_control_plane::features::workspace::WorkspaceError;
use sqlx::PgPool;

mod common;

async fn register(services: &common::TestServices, email: &str) -> uuid::Uuid {
    services
        .auth
        .register(RegisterUser { email: email.into(), password: "Correct-Horse-9".into() }, None)
        .await
        .expect("register")
        .id
}

#[sqlx::test]
async fn new_user_has_viewer_role_and_no_workspace_permission(pool: PgPool) {
    let services = common::setup_services(pool.clone()).await;
    let user_id = register(&services, "viewer@example.com").await;

    let user: omics_control_plane::features::auth::models::User =
        sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(user_id).fetch_one(&pool).await.unwrap();

    let allowed = services.rbac.check(user_id, user.roles_version, Permission::WorkspaceDelete).await.unwrap();
    assert!(!allowed);
}

#[sqlx::test]
async fn create_workspace_seeds_exactly_one_owner(pool: PgPool) {
    let services = common::setup_services(pool).await;
    let owner_id = register(&services, "owner@example.com").await;

    let workspace = services
        .workspaces
        .create_workspace(owner_id, CreateWorkspaceRequest { name: "multi-omics study".into(), description: None })
        .await
        .unwrap();

    let members = services.workspaces.list_members(workspace.id, owner_id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, WorkspaceRole::Owner);
}

#[sqlx::test]
async fn invite_then_set_role_then_owner_cannot_leave_without_transfer(pool: PgPool) {
    let services = common::setup_services(pool).await;
    let owner_id = register(&services, "pi@example.com").await;
    let analyst_id = register(&services, "analyst@example.com").await;

    let workspace = services
        .workspaces
        .create_workspace(owner_id, CreateWorkspaceRequest { name: "rnaseq".into(), description: None })
        .await
        .unwrap();

    services.workspaces.invite_member(workspace.id, owner_id, analyst_id, WorkspaceRole::Viewer).await.unwrap();

    let err = services
        .workspaces
        .invite_member(workspace.id, owner_id, analyst_id, WorkspaceRole::Editor)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::AlreadyMember));

    // Sole owner cannot leave.
    let err = services.workspaces.leave_workspace(workspace.id, owner_id).await.unwrap_err();
    assert!(matches!(err, WorkspaceError::LastOwner));

    // Transfer ownership, then the former owner can leave.
    services.workspaces.set_member_role(workspace.id, owner_id, analyst_id, WorkspaceRole::Owner).await.unwrap();
    services.workspaces.leave_workspace(workspace.id, owner_id).await.unwrap();

    let members = services.workspaces.list_members(workspace.id, analyst_id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, analyst_id);
    assert_eq!(members[0].role, WorkspaceRole::Owner);
}

#[sqlx::test]
async fn viewer_cannot_rename_workspace(pool: PgPool) {
    let services = common::setup_services(pool).await;
    let owner_id = register(&services, "owner2@example.com").await;
    let viewer_id = register(&services, "viewer2@example.com").await;

    let workspace = services
        .workspaces
        .create_workspace(owner_id, CreateWorkspaceRequest { name: "proteomics".into(), description: None })
        .await
        .unwrap();
    services.workspaces.invite_member(workspace.id, owner_id, viewer_id, WorkspaceRole::Viewer).await.unwrap();

    let err = services
        .workspaces
        .update_workspace(
            workspace.id,
            viewer_id,
            omics_control_plane::features::workspace::models::UpdateWorkspaceRequest {
                name: Some("renamed".into()),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::Forbidden));
}
