pub mod audit;
pub mod auth;
pub mod crdt;
pub mod hub;
pub mod jobs;
pub mod kv;
pub mod presence;
pub mod rate_limit;
pub mod rbac;
pub mod users;
pub mod workspace;
