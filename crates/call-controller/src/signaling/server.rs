//! WebSocket transport for signaling.
//!
//! Each socket gets a bounded outbound queue (its [`ClientChannel`]) and a
//! [`ClientSession`]. Inbound text frames are dispatched in arrival order;
//! outbound events are serialized as they leave the queue.

use super::router::{ClientSession, EventRouter};
use crate::presence::ClientChannel;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::{debug, warn};

/// Shared state for the `/ws` route.
#[derive(Clone)]
pub struct SignalingState {
    pub router: EventRouter,
    pub client_channel_buffer: usize,
}

/// Build the signaling routes.
pub fn signaling_router(state: SignalingState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SignalingState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: SignalingState) {
    let (channel, mut outbound) = ClientChannel::new(state.client_channel_buffer);
    let mut session = ClientSession::new(channel);
    let connection_id = session.channel().connection_id();

    debug!(target: "cc.signaling", connection_id = %connection_id, "WebSocket client connected");

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event.to_json() {
                    Ok(json) => {
                        if socket.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            target: "cc.signaling",
                            event = event.name(),
                            error = %e,
                            "Failed to serialize event"
                        );
                    }
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.router.dispatch_text(&mut session, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(
                            target: "cc.signaling",
                            connection_id = %connection_id,
                            error = %e,
                            "WebSocket receive failed"
                        );
                        break;
                    }
                }
            }
        }
    }

    state.router.disconnect(session).await;
    debug!(target: "cc.signaling", connection_id = %connection_id, "WebSocket client disconnected");
}
