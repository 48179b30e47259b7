use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};

use crate::dto::attempt_dto::SocketQuery;
use crate::error::Result;
use crate::services::presence_service::{
    Directive, DisconnectReason, PresenceService, PresenceSession,
};
use crate::AppState;

/// `GET /ws/exam?attempt_id=&token=&fingerprint=`. Admission errors are returned as plain
/// HTTP errors before the upgrade.
pub async fn exam_socket(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let session = state.presence_service.admit(query).await?;

    // Presence is held from admission on; a handshake that never completes must give it back.
    let presence = state.presence_service.clone();
    let abandoned = session.clone();
    let ws = ws.on_failed_upgrade(move |err| {
        tracing::warn!(attempt_id = %abandoned.attempt_id, error = %err, "websocket upgrade failed");
        tokio::spawn(async move {
            presence
                .on_disconnect(&abandoned, DisconnectReason::ConnectionError)
                .await;
        });
    });

    let presence = state.presence_service.clone();
    Ok(ws.on_upgrade(move |socket| run_session(presence, session, socket)))
}

async fn run_session(presence: PresenceService, session: PresenceSession, mut socket: WebSocket) {
    let read_deadline = presence.heartbeat_timeout();

    let reason = loop {
        let frame = match tokio::time::timeout(read_deadline, socket.recv()).await {
            Err(_) => break DisconnectReason::HeartbeatTimeout,
            Ok(None) => break DisconnectReason::ClientClosed,
            Ok(Some(Err(err))) => {
                tracing::debug!(attempt_id = %session.attempt_id, error = %err, "socket read failed");
                break DisconnectReason::ConnectionError;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => match presence.handle_text(&session, &text).await {
                Directive::Continue => {}
                Directive::Reply(reply) => {
                    if socket.send(Message::Text(reply.to_string())).await.is_err() {
                        break DisconnectReason::ConnectionError;
                    }
                }
                Directive::Close(notice) => {
                    let _ = socket.send(Message::Text(notice.to_string())).await;
                    let _ = socket.send(Message::Close(None)).await;
                    break DisconnectReason::ServerClosed;
                }
            },
            Message::Ping(_) | Message::Pong(_) => presence.touch(&session).await,
            Message::Close(_) => break DisconnectReason::ClientClosed,
            Message::Binary(_) => {}
        }
    };

    presence.on_disconnect(&session, reason).await;
}
