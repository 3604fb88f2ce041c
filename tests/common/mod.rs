use omics_control_plane::config::Config;
use omics_control_plane::features::audit::AuditService;
use omics_control_plane::features::auth::mfa::MfaService;
use omics_control_plane::features::auth::service::AuthService;
use omics_control_plane::features::jobs::ledger::ResourceLedger;
use omics_control_plane::features::jobs::queue::JobQueue;
use omics_control_plane::features::kv::{KvCache, MokaCache};
use omics_control_plane::features::rbac::RbacService;
use omics_control_plane::features::users::UserService;
use omics_control_plane::features::workspace::WorkspaceService;
use sqlx::PgPool;
use std::sync::Arc;

#[allow(dead_code)]
pub struct TestServices {
    pub auth: AuthService,
    pub users: UserService,
    pub rbac: RbacService,
    pub audit: AuditService,
    pub workspaces: WorkspaceService,
    pub mfa: MfaService,
    pub cache: Arc<dyn KvCache>,
}

/// Builds one of every service against a shared transactional pool, mirroring
/// the grounding codebase's `setup_services` helper: real Postgres, a fresh
/// in-process cache per test, no mocks for the wiring itself.
pub async fn setup_services(pool: PgPool) -> TestServices {
    let cache: Arc<dyn KvCache> = Arc::new(MokaCache::default());
    let audit = AuditService::new(pool.clone());
    let rbac = RbacService::new(pool.clone(), cache.clone(), 60, audit.clone());
    rbac.seed_default_roles().await.expect("seed default roles");

    let mfa = MfaService::new(pool.clone(), "TestIssuer".to_string(), 30, 1);
    let config = test_config();
    let auth = AuthService::new(pool.clone(), config, mfa.clone(), rbac.clone(), audit.clone());
    let users = UserService::new(pool.clone(), audit.clone());
    let workspaces = WorkspaceService::new(pool.clone(), audit.clone());

    TestServices { auth, users, rbac, audit, workspaces, mfa, cache }
}

pub fn test_config() -> Config {
    Config::test_defaults()
}

#[allow(dead_code)]
pub fn test_ledger() -> ResourceLedger {
    ResourceLedger::new(8, 64_000, 0)
}

#[allow(dead_code)]
pub fn test_queue(pool: PgPool) -> JobQueue {
    JobQueue::new(pool)
}
