use axum::{routing::get, Router};
use omics_control_plane::config;
use omics_control_plane::features;
use omics_control_plane::features::auth::routes::MfaState;
use omics_control_plane::features::hub::routes::HubState;
use omics_control_plane::features::jobs::routes::JobState;
use omics_control_plane::features::rate_limit::routes::RateLimitAdminState;
use omics_control_plane::features::users::routes::UserState;
use omics_control_plane::features::workspace::routes::WorkspaceState;
use omics_control_plane::middleware;
use omics_control_plane::utils;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    config::init();
    let mut config = match config::Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            if let Ok(s) = std::fs::read_to_string("config/default.toml") {
                eprintln!("Contents of config/default.toml:\n{}", s);
                match toml::from_str::<config::Config>(&s) {
                    Ok(cfg) => {
                        eprintln!("Parsed config/default.toml via toml::from_str, continuing with fallback config");
                        cfg
                    }
                    Err(parse_err) => {
                        eprintln!("Failed to parse config/default.toml with toml::from_str: {}", parse_err);
                        panic!("Failed to load config: {}", e);
                    }
                }
            } else {
                eprintln!("Could not read config/default.toml from working directory");
                panic!("Failed to load config: {}", e);
            }
        }
    };

    if !utils::jwt_keys::check_keys_exist() {
        println!("JWT keys not found. Generating new keys...");
        utils::jwt_keys::generate_and_save_keys().expect("Failed to generate JWT keys");
    } else if let Ok(age) = utils::key_rotation::get_key_age() {
        if utils::key_rotation::is_key_expired(age, 7_776_000) {
            println!("JWT keys are expired. Rotating keys...");
            utils::key_rotation::rotate_keys().expect("Failed to rotate JWT keys");
        }
    }

    if (config.jwt_private_key.trim().is_empty() || config.jwt_public_key.trim().is_empty())
        && utils::jwt_keys::check_keys_exist()
    {
        if let Ok((priv_pem, pub_pem)) = utils::jwt_keys::load_keys(&config) {
            config.jwt_private_key = priv_pem;
            config.jwt_public_key = pub_pem;
        }
    }

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .idle_timeout(std::time::Duration::from_secs(600))
        .max_lifetime(std::time::Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database (connection timed out or refused)");

    sqlx::migrate!().run(&pool).await.expect("Failed to run migrations");

    let config_arc = Arc::new(config.clone());

    let cache: Arc<dyn features::kv::KvCache> = match &config.redis_url {
        Some(url) => {
            let redis = features::kv::RedisCache::connect(url)
                .await
                .expect("Failed to connect to Redis");
            tracing::info!("using Redis-backed kv cache");
            Arc::new(redis)
        }
        None => {
            tracing::info!("using in-process moka kv cache (single node)");
            Arc::new(features::kv::MokaCache::default())
        }
    };

    let audit_service = features::audit::AuditService::new(pool.clone());
    let rbac_service =
        features::rbac::RbacService::new(pool.clone(), cache.clone(), config.rbac_cache_ttl_secs, audit_service.clone());
    rbac_service.seed_default_roles().await.expect("failed to seed default roles");

    let mfa_service = features::auth::mfa::MfaService::new(
        pool.clone(),
        "OmicsControlPlane".to_string(),
        config.mfa_code_step,
        config.mfa_code_skew,
    );
    let auth_service = features::auth::service::AuthService::new(
        pool.clone(),
        config.clone(),
        mfa_service.clone(),
        rbac_service.clone(),
        audit_service.clone(),
    );
    let user_service = features::users::service::UserService::new(pool.clone(), audit_service.clone());
    let workspace_service = features::workspace::service::WorkspaceService::new(pool.clone(), audit_service.clone());
    let crdt_engine = features::crdt::CrdtEngine::new(pool.clone(), config.crdt_history_capacity);
    let presence_service = features::presence::PresenceService::new(
        config.presence_idle_threshold_secs,
        config.presence_away_threshold_secs,
        config.presence_evict_threshold_secs,
    );
    let hub_registry = features::hub::HubRegistry::new(crdt_engine.clone(), presence_service.clone(), config.room_outbound_buffer);
    let rate_limit_service = features::rate_limit::RateLimitService::new(pool.clone(), cache.clone());

    let job_queue = features::jobs::queue::JobQueue::new(pool.clone());
    let resource_ledger = Arc::new(
        features::jobs::ResourceLedger::reconcile_from_running_jobs(
            &pool,
            config.worker_cores_total,
            config.worker_memory_total,
            0,
        )
        .await
        .expect("failed to reconcile resource ledger against running jobs"),
    );
    let job_driver_registry = features::jobs::JobDriverRegistry::new();
    let runner_tuning = features::jobs::runner::RunnerTuning::from_config(&config);
    let worker_id = format!("runner-{}", uuid::Uuid::new_v4());
    let job_runner = features::jobs::JobRunner::new(
        job_queue.clone(),
        resource_ledger.clone(),
        job_driver_registry,
        worker_id,
        runner_tuning,
    );

    let runner_handle = job_runner.clone();
    tokio::spawn(async move { runner_handle.run_forever().await });

    let presence_tick = presence_service.clone();
    let presence_interval = config.presence_tick_interval_secs.max(1);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(presence_interval));
        loop {
            ticker.tick().await;
            presence_tick.tick();
        }
    });

    let crdt_persist = crdt_engine.clone();
    let persist_interval = config.crdt_persist_interval_secs.max(1);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(persist_interval));
        loop {
            ticker.tick().await;
            for workspace_id in crdt_persist.active_workspace_ids() {
                if let Err(e) = crdt_persist.persist_tick(workspace_id).await {
                    tracing::warn!(%workspace_id, error = %e, "failed to persist crdt document");
                }
            }
        }
    });

    let workspace_state = WorkspaceState {
        workspaces: workspace_service.clone(),
        hub: hub_registry.clone(),
        crdt: crdt_engine.clone(),
        jobs: job_queue.clone(),
    };
    let hub_state = HubState {
        registry: hub_registry.clone(),
        crdt: crdt_engine.clone(),
        presence: presence_service.clone(),
        workspaces: workspace_service.clone(),
        users: user_service.clone(),
        config: config_arc.clone(),
    };
    let user_state = UserState { users: user_service.clone(), rbac: rbac_service.clone() };
    let audit_state = features::audit::routes::AuditState { audit: audit_service.clone(), rbac: rbac_service.clone() };
    let rate_limit_admin_state = RateLimitAdminState { rate_limit: rate_limit_service.clone(), rbac: rbac_service.clone() };
    let job_state = JobState {
        queue: job_queue.clone(),
        ledger: resource_ledger.clone(),
        rbac: rbac_service.clone(),
        audit: audit_service.clone(),
    };
    let mfa_state = MfaState { mfa: mfa_service.clone(), users: user_service.clone() };

    let authed = || {
        axum::middleware::from_fn(middleware::auth::auth_middleware)
    };

    let api_router = Router::new()
        .route("/health", get(health_check))
        .nest(
            "/auth",
            Router::new()
                .merge(features::auth::routes::public_auth_routes().with_state(auth_service.clone()))
                .merge(
                    features::auth::routes::protected_auth_routes()
                        .with_state(auth_service.clone())
                        .layer(authed())
                        .layer(axum::middleware::from_fn(middleware::csrf::validate_csrf)),
                )
                .merge(
                    features::auth::routes::mfa_self_service_routes()
                        .with_state(mfa_state)
                        .layer(authed())
                        .layer(axum::middleware::from_fn(middleware::csrf::validate_csrf)),
                ),
        )
        .merge(
            features::workspace::workspace_routes()
                .with_state(workspace_state)
                .layer(authed())
                .layer(axum::middleware::from_fn(middleware::csrf::validate_csrf)),
        )
        .merge(
            features::crdt::crdt_routes()
                .with_state(crdt_engine.clone())
                .layer(authed())
                .layer(axum::middleware::from_fn(middleware::csrf::validate_csrf)),
        )
        .merge(features::hub::hub_routes().with_state(hub_state))
        .merge(
            features::users::routes::user_routes()
                .with_state(user_state)
                .layer(authed())
                .layer(axum::middleware::from_fn(middleware::csrf::validate_csrf)),
        )
        .nest(
            "/rbac",
            features::rbac::routes::role_routes()
                .with_state(rbac_service.clone())
                .layer(authed())
                .layer(axum::middleware::from_fn(middleware::csrf::validate_csrf)),
        )
        .nest(
            "/admin",
            Router::new()
                .merge(features::audit::routes::audit_routes().with_state(audit_state))
                .merge(features::rate_limit::public_rate_limit_routes().with_state(rate_limit_admin_state))
                .layer(authed())
                .layer(axum::middleware::from_fn(middleware::csrf::validate_csrf)),
        )
        .merge(
            features::jobs::job_routes()
                .with_state(job_state)
                .layer(authed())
                .layer(axum::middleware::from_fn(middleware::csrf::validate_csrf)),
        );

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_router)
        .layer(tower_cookies::CookieManagerLayer::new())
        .layer(axum::Extension(config_arc))
        .layer(axum::Extension(pool.clone()))
        .layer(axum::middleware::from_fn_with_state(
            rate_limit_service.clone(),
            features::rate_limit::middleware::rate_limit_middleware,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    "http://localhost:5373".parse::<axum::http::HeaderValue>().unwrap(),
                    "http://localhost:3000".parse::<axum::http::HeaderValue>().unwrap(),
                    "http://127.0.0.1:5373".parse::<axum::http::HeaderValue>().unwrap(),
                    "http://127.0.0.1:3000".parse::<axum::http::HeaderValue>().unwrap(),
                ])
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::COOKIE,
                    axum::http::header::SET_COOKIE,
                    axum::http::header::ACCEPT,
                    axum::http::HeaderName::from_static("x-csrf-token"),
                ])
                .allow_credentials(true),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], 5300));
    tracing::info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .unwrap();
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "OK",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
