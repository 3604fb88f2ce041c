pub mod models;
pub mod routes;
pub mod service;

pub use models::{Permission, Role};
pub use service::{RbacError, RbacService};
