//! WebSocket transport for real-time clients.
//!
//! Handles the HTTP → WebSocket upgrade and pumps frames between the socket
//! and the connection lifecycle:
//! 1. Upgrade, then authenticate inside the socket so an `unauthorized`
//!    error can be delivered before closing
//! 2. Open the connection (default rooms, `connected` acknowledgement)
//! 3. Forward the connection's outbox to the client, client frames to the
//!    lifecycle
//! 4. Close the connection when either side finishes

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::application::{ConnectionLifecycle, RegistryStats};
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::realtime::{CloseReason, Delivery, OutboundEvent};

/// How long either half may keep running once the other side is closing.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// State shared by the real-time routes.
#[derive(Clone)]
pub struct WebSocketState {
    pub lifecycle: Arc<ConnectionLifecycle>,
}

impl WebSocketState {
    pub fn new(lifecycle: Arc<ConnectionLifecycle>) -> Self {
        Self { lifecycle }
    }
}

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Fallback for clients that cannot set headers (browsers).
    pub token: Option<String>,
}

/// Handle WebSocket upgrade requests.
///
/// Route: `GET /ws`
///
/// The token is taken from `Authorization: Bearer <token>`, falling back to
/// the `token` query parameter.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
    State(state): State<WebSocketState>,
) -> Response {
    let token = bearer_token(&headers).or(params.token);
    ws.on_upgrade(move |socket| handle_socket(socket, token, state))
}

/// Extracts the bearer token from an `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Handle an established WebSocket connection.
async fn handle_socket(socket: WebSocket, token: Option<String>, state: WebSocketState) {
    let (mut sender, mut receiver) = socket.split();
    let lifecycle = state.lifecycle;

    let identity = match lifecycle.authenticate(token.as_deref()).await {
        Ok(identity) => identity,
        Err(e) => {
            let err = DomainError::new(ErrorCode::Unauthorized, e.client_message());
            if let Err(e) = send_event(&mut sender, &OutboundEvent::error(&err)).await {
                tracing::debug!(error = %e, "Client left before auth rejection was sent");
            }
            let _ = sender.send(close_message(CloseReason::Unauthorized)).await;
            return;
        }
    };

    let (connection_id, mut outbox) = lifecycle.open(identity).await;
    let mut close_signal = outbox.close_signal();

    // Outbox → client
    let mut send_task = tokio::spawn(async move {
        while let Some(delivery) = outbox.recv().await {
            match delivery {
                Delivery::Event(event) => {
                    if let Err(e) = send_event(&mut sender, &event).await {
                        tracing::debug!(
                            connection_id = %connection_id,
                            "Send error, closing connection: {}",
                            e
                        );
                        break;
                    }
                }
                Delivery::Close(reason) => {
                    let _ = sender.send(close_message(reason)).await;
                    break;
                }
            }
        }
    });

    // Client → lifecycle
    let reader = Arc::clone(&lifecycle);
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    reader.handle_inbound(&connection_id, &text).await;
                }
                Ok(Message::Binary(_)) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        "Received unsupported binary message"
                    );
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Protocol-level keepalive still counts as activity.
                    reader.registry().touch(&connection_id).await;
                }
                Ok(Message::Close(_)) => {
                    tracing::debug!(connection_id = %connection_id, "Client sent close frame");
                    break;
                }
                Err(e) => {
                    tracing::debug!(connection_id = %connection_id, "Receive error: {}", e);
                    break;
                }
            }
        }
    });

    // The writer is done when it ends on its own, or when a close was
    // requested and it failed to flush within the grace period.
    let writer = send_task.abort_handle();
    let writer_done = async {
        tokio::select! {
            _ = &mut send_task => {}
            reason = close_signal.wait() => {
                if tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
                    tracing::debug!(
                        connection_id = %connection_id,
                        reason = reason.as_str(),
                        "Writer stalled while closing, aborting"
                    );
                    send_task.abort();
                }
            }
        }
    };

    // Wait for either side to finish
    tokio::select! {
        _ = writer_done => {
            if tokio::time::timeout(CLOSE_GRACE, &mut recv_task).await.is_err() {
                recv_task.abort();
            }
        }
        _ = &mut recv_task => {
            writer.abort();
        }
    }

    lifecycle.close(&connection_id).await;
}

/// Send a JSON event over the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &OutboundEvent,
) -> Result<(), axum::Error> {
    let json = event.to_json().map_err(axum::Error::new)?;
    sender.send(Message::Text(json)).await
}

/// WebSocket close code for a server-initiated close.
pub fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::Unauthorized => close_code::POLICY,
        CloseReason::Logout => close_code::NORMAL,
        CloseReason::Evicted | CloseReason::SlowConsumer => close_code::POLICY,
        CloseReason::ServerShutdown => close_code::AWAY,
    }
}

fn close_message(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code_for(reason),
        reason: reason.as_str().into(),
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Observability
// ════════════════════════════════════════════════════════════════════════════════

/// Local registry statistics.
///
/// Route: `GET /stats`
pub async fn stats_handler(State(state): State<WebSocketState>) -> Json<RegistryStats> {
    Json(state.lifecycle.stats().await)
}

/// Health probe body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub backplane: String,
    pub backplane_healthy: bool,
    pub instance: String,
    pub connections: usize,
}

/// Backplane health: 200 when healthy, 503 while degraded.
///
/// Route: `GET /health`
pub async fn health_handler(State(state): State<WebSocketState>) -> Response {
    let broadcaster = state.lifecycle.broadcaster();
    let healthy = broadcaster.is_healthy();
    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        backplane: broadcaster.backplane_name().to_string(),
        backplane_healthy: healthy,
        instance: broadcaster.instance().to_string(),
        connections: state.lifecycle.registry().len().await,
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// Create axum router for the real-time endpoints.
///
/// # Example
///
/// ```ignore
/// let app = realtime_router().with_state(WebSocketState::new(lifecycle));
/// ```
pub fn realtime_router() -> Router<WebSocketState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
}
