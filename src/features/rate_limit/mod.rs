pub mod middleware;
pub mod models;
pub mod routes;
pub mod service;

pub use models::*;
pub use routes::public_rate_limit_routes;
pub use service::RateLimitService;
