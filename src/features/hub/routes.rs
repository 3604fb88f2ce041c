use crate::config::Config;
use crate::features::crdt::engine::CrdtEngine;
use crate::features::hub::connection::handle_socket;
use crate::features::hub::registry::HubRegistry;
use crate::features::presence::service::PresenceService;
use crate::features::users::service::UserService;
use crate::features::workspace::service::WorkspaceService;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct HubState {
    pub registry: HubRegistry,
    pub crdt: CrdtEngine,
    pub presence: PresenceService,
    pub workspaces: WorkspaceService,
    pub users: UserService,
    pub config: Arc<Config>,
}

pub fn hub_routes() -> Router<HubState> {
    Router::new().route("/ws/workspaces/:workspace_id", get(ws_upgrade_handler))
}

/// Upgrades unconditionally; authentication happens over the socket itself
/// once it's open (see `connection::handle_socket`), since the wire protocol
/// requires `auth` to be the first frame rather than a pre-upgrade query
/// parameter.
async fn ws_upgrade_handler(
    State(state): State<HubState>,
    Path(workspace_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, workspace_id))
}
