pub mod models;
pub mod routes;
pub mod service;

pub use models::AuditRecord;
pub use service::{AuditError, AuditService};
