//! WebSocket front end.
//!
//! Each upgraded socket is split in two:
//! - a writer task that drains the connection's outbound queue onto the socket
//! - the reader loop, which hands one frame at a time to the dispatcher and
//!   waits for it to finish before reading the next
//!
//! When the peer goes away, membership cleanup runs on the reader's task, after
//! the last handler returned, and the writer is aborted.

use crate::connection::ConnectionSession;
use crate::dispatcher::Dispatcher;
use crate::observability;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

/// Shared state for the WebSocket route.
#[derive(Clone, Debug)]
pub struct WsState {
    pub dispatcher: Dispatcher,
    /// Per-connection outbound queue capacity.
    pub outbound_buffer: usize,
}

/// Router serving the signaling socket at `/ws`.
pub fn ws_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (session, mut outbound) = ConnectionSession::open(state.dispatcher, state.outbound_buffer);
    let connection_id = session.id();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(
                        target: "signaling.ws",
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to serialize outbound message"
                    );
                    observability::record_message_dropped("serialize");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!(
                        target: "signaling.ws",
                        connection_id = %connection_id,
                        "Dropping non-UTF-8 binary frame"
                    );
                    observability::record_message_dropped("malformed");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            // Ping/pong are answered by the socket itself
            Ok(_) => continue,
            Err(e) => {
                debug!(
                    target: "signaling.ws",
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket read failed"
                );
                break;
            }
        };

        session.handle_text(&text).await;
    }

    session.close().await;
    writer.abort();
}
