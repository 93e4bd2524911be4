//! Live admin notifications over WebSocket.
//!
//! The socket receives the full derived list on connect and again after every
//! profile insert reported by the change feed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::auth::AdminViewer;
use crate::backend::ProfileStore;
use crate::models::Notification;
use crate::notifications;
use crate::AppState;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamMessage<'a> {
    Notifications { notifications: &'a [Notification] },
    Error { message: &'a str },
}

/// GET /api/admin/notifications/stream
pub async fn notifications_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    AdminViewer(admin): AdminViewer,
) -> impl IntoResponse {
    tracing::debug!(admin_id = %admin.identity.id, "Notification stream opened");
    let store = state.backend.profiles();
    ws.on_upgrade(move |socket| handle_notification_stream(socket, store))
}

/// Serialized notification list, or an error frame when the load fails
async fn render(store: &dyn ProfileStore) -> String {
    let message = match notifications::load(store, Utc::now()).await {
        Ok(list) => serde_json::to_string(&StreamMessage::Notifications {
            notifications: &list,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load notifications for stream");
            let text = e.user_message();
            serde_json::to_string(&StreamMessage::Error { message: &text })
        }
    };
    message.unwrap_or_else(|_| r#"{"type":"error","message":"encoding failed"}"#.to_string())
}

async fn handle_notification_stream(socket: WebSocket, store: Arc<dyn ProfileStore>) {
    let (mut sender, mut receiver) = socket.split();
    // Subscribe before the first load so no insert falls in between
    let mut inserts = store.subscribe_inserts();

    if sender
        .send(Message::Text(render(store.as_ref()).await))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            insert = inserts.recv() => {
                match insert {
                    Ok(profile) => {
                        tracing::debug!(profile_id = %profile.id, "Profile inserted, refreshing notifications");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Notification stream lagged, refreshing");
                    }
                    Err(RecvError::Closed) => return,
                }
                if sender.send(Message::Text(render(store.as_ref()).await)).await.is_err() {
                    return;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, InMemoryBackend};
    use crate::models::UserType;

    #[tokio::test]
    async fn test_render_lists_pending_providers() {
        let backend = InMemoryBackend::new();
        backend
            .register("pro@example.com", "password-1", Some(UserType::Provider), Some("Yaw"))
            .unwrap();
        let store = backend.profiles();

        let frame: serde_json::Value = serde_json::from_str(&render(store.as_ref()).await).unwrap();
        assert_eq!(frame["type"], "notifications");
        let kinds: Vec<&str> = frame["notifications"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["new_signup", "pending_verification"]);
    }
}
