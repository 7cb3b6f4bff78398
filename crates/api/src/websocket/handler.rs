//! WebSocket handler for Axum
//!
//! Authenticates via the `token` query parameter, then routes client
//! subscribe/unsubscribe/ping events.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use learnhub_shared::UserRole;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::auth::AuthUser;
use crate::state::AppState;
use crate::support::model::Actor;
use crate::support::{SupportError, SupportService};

use super::{
    connection::Connection,
    events::{ClientEvent, ServerEvent},
    room::Topic,
    state::WebSocketState,
};

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: String,
}

/// Upgrade to WebSocket once the query token checks out
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
) -> Result<Response, StatusCode> {
    let user = match app_state.jwt.validate_access_token(&params.token) {
        Ok(claims) => AuthUser::from_claims(claims),
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket auth failed: invalid token");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let Ok(actor) = user.actor() else {
        tracing::warn!(user_id = user.user_id, "WebSocket auth failed: role not allowed");
        return Err(StatusCode::FORBIDDEN);
    };
    // Connections only carry the two support roles
    let role = match actor {
        Actor::Student(_) => UserRole::Student,
        Actor::Manager(_) => UserRole::Manager,
    };

    tracing::info!(user_id = user.user_id, role = %role, "WebSocket connection upgrade requested");

    let ws_state = app_state.ws_state.clone();
    let support = app_state.support.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user.user_id, role, ws_state, support)))
}

async fn handle_socket(
    socket: WebSocket,
    user_id: i64,
    role: UserRole,
    ws_state: WebSocketState,
    support: SupportService,
) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let conn = ws_state.add_connection(Connection::new(user_id, role, tx)).await;
    let session_id = conn.session_id;

    let _ = conn.send(ServerEvent::Connected { session_id });

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let Ok(msg) = msg else { break };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    handle_client_event(event, Arc::clone(&conn), &ws_state, &support).await;
                }
                Err(e) => {
                    tracing::warn!(error = ?e, session_id = %session_id, "Failed to parse client event");
                    let _ = conn.send(ServerEvent::error("Invalid event format"));
                }
            },
            Message::Close(_) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            // Axum answers protocol pings itself; binary frames are ignored
            _ => {}
        }
    }

    tracing::info!(session_id = %session_id, user_id, "WebSocket connection closing");
    ws_state.remove_connection(&session_id).await;
    send_task.abort();
}

pub(crate) async fn handle_client_event(
    event: ClientEvent,
    conn: Arc<Connection>,
    ws_state: &WebSocketState,
    support: &SupportService,
) {
    match event {
        ClientEvent::Subscribe { thread_id } => {
            let actor = match conn.role {
                UserRole::Student => Actor::Student(conn.user_id),
                _ => Actor::Manager(conn.user_id),
            };
            match support.authorize_subscription(thread_id, actor).await {
                Ok(()) => {
                    let topic = Topic::Thread(thread_id);
                    if conn.subscribe(topic).await {
                        ws_state.rooms.join(topic, Arc::clone(&conn)).await;
                    }
                    let _ = conn.send(ServerEvent::Subscribed {
                        thread_id: Some(thread_id),
                        manager_pool: false,
                    });
                }
                Err(SupportError::NotFound(_) | SupportError::Forbidden(_)) => {
                    let _ = conn.send(ServerEvent::error("Access denied to thread"));
                }
                Err(e) => {
                    tracing::error!(error = %e, thread_id, "Failed to verify thread access");
                    let _ = conn.send(ServerEvent::error("Failed to verify access"));
                }
            }
        }

        ClientEvent::Unsubscribe { thread_id } => {
            let topic = Topic::Thread(thread_id);
            if conn.unsubscribe(topic).await {
                ws_state.rooms.leave(&topic, &conn.session_id).await;
            }
        }

        ClientEvent::SubscribeManagerPool => {
            if !conn.role.is_support_staff() {
                let _ = conn.send(ServerEvent::error("Manager pool is for managers only"));
                return;
            }
            if conn.subscribe(Topic::ManagerPool).await {
                ws_state.rooms.join(Topic::ManagerPool, Arc::clone(&conn)).await;
            }
            let _ = conn.send(ServerEvent::Subscribed {
                thread_id: None,
                manager_pool: true,
            });
        }

        ClientEvent::Ping => {
            let _ = conn.send(ServerEvent::Pong);
        }
    }
}
