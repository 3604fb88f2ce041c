pub mod models;
pub mod service;

pub use models::{CursorPosition, PresenceEntry, PresenceStatus, SelectionRange};
pub use service::{PresenceError, PresenceService};
