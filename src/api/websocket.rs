use crate::api::AppState;
use crate::session::{Inbound, Outbound, SessionEngine};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Outbound frames buffered per connection before the engine waits on the writer
const OUTBOUND_BUFFER: usize = 64;

/// GET /api/ws - WebSocket upgrade handler
///
/// Authentication happens in-band: the first frame must be `{"type":"auth"}`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Create WebSocket router
pub fn create_ws_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .with_state(state)
}

/// Bridge one WebSocket to a [`SessionEngine`].
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                Outbound::Message(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        error!(error = %e, "Failed to encode server message");
                        continue;
                    }
                },
                Outbound::Pong(data) => Message::Pong(data),
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        // Engine finished: close our side
        let _ = sink.send(Message::Close(None)).await;
    });

    let inbound = stream.filter_map(|msg| async move {
        match msg {
            Ok(Message::Text(text)) => Some(Inbound::Text(text)),
            Ok(Message::Ping(data)) => Some(Inbound::Ping(data)),
            Ok(Message::Close(_)) => Some(Inbound::Close),
            // Binary and pong frames carry nothing for the protocol
            Ok(_) => None,
            Err(e) => Some(Inbound::Error(e.to_string())),
        }
    });

    let mut engine = SessionEngine::new(
        Arc::clone(&state.authenticator),
        Arc::clone(&state.dispatcher),
    );
    engine.run(Box::pin(inbound), tx).await;

    if let Err(e) = writer.await {
        error!(error = %e, "WebSocket writer task failed");
    }
}
