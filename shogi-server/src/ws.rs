//! WebSocket transport: one task pair per connection.
//!
//! The reader decodes intents and hands them to the [`SessionManager`]; the
//! writer drains the connection's outbox into text frames.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::protocol::ClientMessage;
use crate::session::{self, SessionManager};

pub async fn ws_handler(ws: WebSocketUpgrade, State(sessions): State<Arc<SessionManager>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, sessions))
}

async fn handle_socket(socket: WebSocket, sessions: Arc<SessionManager>) {
    let conn = sessions.connect();
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut inbox) = session::outbox();
    info!(%conn, "connected");

    let writer = tokio::spawn(async move {
        while let Some(msg) = inbox.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(err) => {
                    warn!(%conn, error = %err, "failed to encode message");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(%conn, error = %err, "socket error");
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(msg) => {
                debug!(%conn, ?msg, "intent");
                sessions.handle(conn, &outbox, msg);
            }
            Err(err) => {
                debug!(%conn, error = %err, "malformed intent");
                sessions.reject(&outbox, &SessionError::InvalidIntent("Malformed message"));
            }
        }
    }

    sessions.disconnect(conn);
    drop(outbox);
    // The writer exits once every queued message is flushed.
    if let Err(err) = writer.await {
        warn!(%conn, error = %err, "writer task failed");
    }
    info!(%conn, "closed");
}
