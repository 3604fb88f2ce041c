use omics_control_plane::features::auth::models::RegisterUser;
use omics_control_plane::features::rbac::{Permission, RbacError};
use sqlx::PgPool;

mod common;

#[sqlx::test]
async fn create_role_then_assign_grants_its_permissions(pool: PgPool) {
    let services = common::setup_services(pool.clone()).await;
    let user = services
        .auth
        .register(RegisterUser { email: "curator@example.com".into(), password: "Correct-Horse-9".into() }, None)
        .await
        .unwrap();

    services.rbac.create_role("Curator", vec![Permission::DataRead, Permission::DataWrite]).await.unwrap();
    services.rbac.assign_role(user.id, "Curator").await.unwrap();

    let refreshed: omics_control_plane::features::auth::models::User =
        sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(user.id).fetch_one(&pool).await.unwrap();

    assert!(services.rbac.check(user.id, refreshed.roles_version, Permission::DataWrite).await.unwrap());
    assert!(!services.rbac.check(user.id, refreshed.roles_version, Permission::SystemAdmin).await.unwrap());
}

#[sqlx::test]
async fn creating_a_role_with_a_name_already_in_use_is_rejected(pool: PgPool) {
    let services = common::setup_services(pool).await;
    services.rbac.create_role("Curator", vec![Permission::DataRead]).await.unwrap();

    let err = services.rbac.create_role("Curator", vec![Permission::DataWrite]).await.unwrap_err();
    assert!(matches!(err, RbacError::RoleExists));
}

#[sqlx::test]
async fn deleting_a_role_still_assigned_to_a_user_is_refused(pool: PgPool) {
    let services = common::setup_services(pool.clone()).await;
    let user = services
        .auth
        .register(RegisterUser { email: "assignee@example.com".into(), password: "Correct-Horse-9".into() }, None)
        .await
        .unwrap();

    let role = services.rbac.create_role("Temp", vec![Permission::DataRead]).await.unwrap();
    services.rbac.assign_role(user.id, "Temp").await.unwrap();

    let err = services.rbac.delete_role(role.id).await.unwrap_err();
    assert!(matches!(err, RbacError::RoleInUse));

    services.rbac.remove_role(user.id, "Temp").await.unwrap();
    services.rbac.delete_role(role.id).await.unwrap();
    assert!(matches!(services.rbac.get_role(role.id).await.unwrap_err(), RbacError::RoleNotFound));
}

/// A freshly-registered user is seeded with exactly the Viewer role, so
/// stale permission checks against an old `roles_version` fail open to a
/// recheck rather than granting access from a cache hit.
#[sqlx::test]
async fn roles_version_bump_invalidates_a_cached_decision(pool: PgPool) {
    let services = common::setup_services(pool.clone()).await;
    let user = services
        .auth
        .register(RegisterUser { email: "cache-check@example.com".into(), password: "Correct-Horse-9".into() }, None)
        .await
        .unwrap();

    let before: omics_control_plane::features::auth::models::User =
        sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(user.id).fetch_one(&pool).await.unwrap();
    assert!(!services.rbac.check(user.id, before.roles_version, Permission::DataWrite).await.unwrap());

    services.rbac.create_role("Writer", vec![Permission::DataWrite]).await.unwrap();
    services.rbac.assign_role(user.id, "Writer").await.unwrap();

    let after: omics_control_plane::features::auth::models::User =
        sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(user.id).fetch_one(&pool).await.unwrap();
    assert!(after.roles_version > before.roles_version);
    assert!(services.rbac.check(user.id, after.roles_version, Permission::DataWrite).await.unwrap());
}
