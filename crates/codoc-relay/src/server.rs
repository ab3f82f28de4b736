use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::rooms::{Frame, Rooms};

/// Close code sent when the request names no document.
pub const MISSING_DOC_ID: u16 = 4000;

/// Shared application state
#[derive(Clone, Default)]
pub struct AppState {
    pub rooms: Arc<Rooms>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Build the axum router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/relay", get(relay_without_doc))
        .route("/relay/", get(relay_without_doc))
        .route("/relay/{doc_id}", get(relay))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    rooms: usize,
    connections: usize,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        rooms: state.rooms.room_count(),
        connections: state.rooms.connection_count(),
    })
}

async fn relay(
    ws: WebSocketUpgrade,
    Path(doc_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if doc_id.trim().is_empty() {
        return ws.on_upgrade(reject_missing_doc_id);
    }
    ws.on_upgrade(move |socket| handle_socket(socket, doc_id, state.rooms))
}

async fn relay_without_doc(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(reject_missing_doc_id)
}

async fn reject_missing_doc_id(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: MISSING_DOC_ID,
        reason: "Missing doc_id".into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "relay: close after missing doc_id failed");
    }
}

async fn handle_socket(socket: WebSocket, doc_id: String, rooms: Arc<Rooms>) {
    let (peer, mut outbound) = rooms.join(&doc_id);
    let (mut sink, mut stream) = socket.split();

    let forward = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                Frame::Binary(data) => Message::Binary(data),
                Frame::Text(text) => Message::Text(text.into()),
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let frame = match message {
            Ok(Message::Binary(data)) => Frame::Binary(data),
            Ok(Message::Text(text)) => Frame::Text(text.as_str().to_owned()),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(doc_id, peer, error = %e, "relay: read error");
                break;
            }
        };
        let len = frame.len();
        let delivered = rooms.broadcast(&doc_id, peer, frame);
        debug!(doc_id, peer, len, delivered, "relay: forwarded frame");
    }

    forward.abort();
    rooms.leave(&doc_id, peer);
}

/// Run the HTTP server
pub async fn run(state: AppState, config: RelayConfig) -> Result<(), RelayError> {
    let addr = config.addr()?;
    let app = router(state);

    info!("Starting relay on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RelayError::Bind { addr, source: e })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| RelayError::Serve { source: e })?;

    Ok(())
}
