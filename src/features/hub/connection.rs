use crate::features::auth::jwt::validate_jwt;
use crate::features::hub::protocol::{ClientMessage, ServerMessage};
use crate::features::hub::room::RoomCommand;
use crate::features::hub::routes::HubState;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

async fn send_json(sink: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) {
    if let Ok(text) = serde_json::to_string(message) {
        let _ = sink.send(Message::Text(text)).await;
    }
}

/// Drives one upgraded socket end to end. The first frame must be `Auth`,
/// received within `hub_auth_timeout_secs` of the upgrade completing — browsers
/// can't set custom headers on the WebSocket handshake itself, so the bearer
/// token travels as the first application frame instead of the
/// `Authorization` header the rest of the API uses. Once authenticated, joins
/// the room and pumps inbound/outbound frames until either side closes.
pub async fn handle_socket(socket: WebSocket, state: HubState, workspace_id: Uuid) {
    let (mut sink, mut stream) = socket.split();
    let auth_timeout = Duration::from_secs(state.config.hub_auth_timeout_secs);

    let first_frame = match tokio::time::timeout(auth_timeout, stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => {
            send_json(&mut sink, &ServerMessage::Error { message: "auth frame not received in time".into() }).await;
            return;
        }
    };

    let token = match serde_json::from_str::<ClientMessage>(&first_frame) {
        Ok(ClientMessage::Auth { token }) => token,
        _ => {
            send_json(&mut sink, &ServerMessage::Error { message: "first frame must be auth".into() }).await;
            return;
        }
    };

    let claims = match validate_jwt(&token, &state.config) {
        Ok(claims) => claims,
        Err(_) => {
            send_json(&mut sink, &ServerMessage::Error { message: "invalid token".into() }).await;
            return;
        }
    };

    let user = match state.users.find_by_id(claims.sub).await {
        Ok(user) => user,
        Err(_) => {
            send_json(&mut sink, &ServerMessage::Error { message: "unknown user".into() }).await;
            return;
        }
    };
    if !user.is_active || user.roles_version != claims.roles_version {
        send_json(&mut sink, &ServerMessage::Error { message: "token stale: roles changed or account deactivated".into() }).await;
        return;
    }

    let member = match state.workspaces.get_member(workspace_id, claims.sub).await {
        Ok(member) => member,
        Err(_) => {
            send_json(&mut sink, &ServerMessage::Error { message: "not a member of this workspace".into() }).await;
            return;
        }
    };
    let can_edit = member.role.can_edit();
    let display_name = user.email;

    send_json(&mut sink, &ServerMessage::AuthOk { user_id: claims.sub, workspace_id, can_edit }).await;

    let conn_id = Uuid::new_v4();
    let mailbox = state.registry.room_mailbox(workspace_id);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(state.registry.outbound_capacity());
    let (live_tx, mut live_rx) = watch::channel::<Option<ServerMessage>>(None);

    if mailbox
        .send(RoomCommand::Join {
            conn_id,
            user_id: claims.sub,
            display_name,
            can_edit,
            outbound: outbound_tx,
            live_updates: live_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(msg) => {
                        let Ok(text) = serde_json::to_string(&msg) else { continue };
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            changed = live_rx.changed() => {
                if changed.is_err() {
                    continue;
                }
                let Some(msg) = live_rx.borrow_and_update().clone() else { continue };
                let Ok(text) = serde_json::to_string(&msg) else { continue };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(parsed) => {
                                if mailbox.send(RoomCommand::Inbound { user_id: claims.sub, message: parsed }).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "dropping malformed client message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    let _ = mailbox.send(RoomCommand::Leave { conn_id, user_id: claims.sub }).await;
}
