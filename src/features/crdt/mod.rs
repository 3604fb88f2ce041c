pub mod engine;
pub mod models;
pub mod routes;

pub use engine::{CrdtEngine, CrdtError};
pub use models::{CrdtUpdate, Stamp};
pub use routes::crdt_routes;
