pub mod models;
pub mod routes;
pub mod service;

pub use models::{Workspace, WorkspaceMember, WorkspaceRole};
pub use routes::workspace_routes;
pub use service::{WorkspaceError, WorkspaceService};
