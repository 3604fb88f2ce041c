pub mod connection;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod routes;

pub use registry::HubRegistry;
pub use routes::{hub_routes, HubState};

use axum::http::StatusCode;
use thiserror::Error;

/// Presence/CRDT/workspace errors surfacing from the upgrade handshake
/// already map to their own status codes; this variant covers failures
/// intrinsic to the socket transport itself.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("room unavailable")]
    RoomUnavailable,
}

impl HubError {
    pub fn to_status_code(&self) -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
