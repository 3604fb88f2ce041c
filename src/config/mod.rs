use dotenv::dotenv;
use serde::Deserialize;
use std::{env, fs};

/// Every tunable named in the external-interfaces configuration table, layered
/// `config/default.toml` < `config/{RUN_MODE}.toml` < `APP_`-prefixed env vars.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,

    // Token signer
    pub jwt_secret: String,
    pub jwt_private_key: String,
    pub jwt_public_key: String,
    /// access_token_ttl, in seconds.
    pub jwt_expiry: i64,
    /// refresh_token_ttl, in seconds.
    pub refresh_token_expiry: i64,

    // MFA
    pub mfa_code_step: u64,
    pub mfa_code_skew: u8,

    // Session hub
    pub room_outbound_buffer: usize,
    pub hub_auth_timeout_secs: u64,

    // CRDT engine
    pub crdt_history_capacity: usize,
    pub crdt_persist_interval_secs: u64,

    // Presence tracker
    pub presence_tick_interval_secs: u64,
    pub presence_idle_threshold_secs: i64,
    pub presence_away_threshold_secs: i64,
    pub presence_evict_threshold_secs: i64,

    // Job scheduler / runner
    pub job_max_retries: i32,
    pub job_backoff_base_secs: u64,
    pub job_backoff_cap_secs: u64,
    pub cancel_grace_period_secs: u64,
    pub progress_persist_interval_secs: u64,
    pub job_starvation_threshold_secs: i64,

    // Resource ledger
    pub worker_cores_total: i64,
    pub worker_memory_total: i64,

    // RBAC cache
    pub rbac_cache_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        resolve_database_url_from_env();
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::Environment::with_prefix("APP"));

        if let Ok(env) = env::var("RUN_MODE") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        let config = builder.build()?;

        config.try_deserialize()
    }
}

impl Config {
    /// Fixed, non-secret values for unit and integration tests that need a
    /// `Config` but don't exercise the fields they override (callers
    /// typically fill in `jwt_private_key`/`jwt_public_key` themselves).
    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/test".to_string(),
            redis_url: None,
            jwt_secret: "test-secret".to_string(),
            jwt_private_key: String::new(),
            jwt_public_key: String::new(),
            jwt_expiry: 900,
            refresh_token_expiry: 1_209_600,
            mfa_code_step: 30,
            mfa_code_skew: 1,
            room_outbound_buffer: 256,
            hub_auth_timeout_secs: 10,
            crdt_history_capacity: 500,
            crdt_persist_interval_secs: 5,
            presence_tick_interval_secs: 5,
            presence_idle_threshold_secs: 30,
            presence_away_threshold_secs: 300,
            presence_evict_threshold_secs: 900,
            job_max_retries: 5,
            job_backoff_base_secs: 2,
            job_backoff_cap_secs: 300,
            cancel_grace_period_secs: 10,
            progress_persist_interval_secs: 5,
            job_starvation_threshold_secs: 60,
            worker_cores_total: 64,
            worker_memory_total: 256 * 1024,
            rbac_cache_ttl_secs: 60,
        }
    }
}

fn resolve_database_url_from_env() {
    if env::var("APP_DATABASE_URL").is_ok() {
        return;
    }

    if let Ok(database_url) = env::var("DATABASE_URL") {
        env::set_var("APP_DATABASE_URL", database_url);
        return;
    }

    let password = env::var("DB_PASSWORD_FILE")
        .ok()
        .and_then(|path| fs::read_to_string(path).ok())
        .map(|value| value.trim().to_string());

    if let Some(password) = password {
        let host = env::var("DB_HOST").unwrap_or_else(|_| "db".to_string());
        let port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let user = env::var("DB_USER").unwrap_or_else(|_| "app".to_string());
        let name = env::var("DB_NAME").unwrap_or_else(|_| "app_db".to_string());
        let url = format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            user, password, host, port, name
        );
        env::set_var("APP_DATABASE_URL", url);
    }
}

pub fn init() {
    dotenv().ok();
}
