//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a tracker WebSocket
//! connection. The socket stays attached to the client's tracker loop; closing
//! it aborts local observation but leaves the pending production intact.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use production_core::ProductionError;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::Rejection;
use crate::web::{
    auth::client_key,
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};

type WsSender = SplitSink<WebSocket, Message>;

/// What ended one attachment to the tracker.
enum Next {
    Reattach,
    Close,
}

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some(key) = client_key(&headers) else {
        return Rejection(ProductionError::StaleSession).into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, key))
}

async fn send_message(sender: &mut WsSender, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize tracker message: {:?}", e);
            false
        }
    }
}

fn error_message(e: &ProductionError) -> ServerMessage {
    ServerMessage::Error {
        code: e.code().to_string(),
        message: e.to_string(),
        recovery: e.recovery(),
    }
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, key: String) {
    info!(client_key = %key, "Tracker socket opened");
    let (mut sender, mut receiver) = socket.split();

    loop {
        match track_once(&app_state, &key, &mut sender, &mut receiver).await {
            Next::Reattach => continue,
            Next::Close => break,
        }
    }
    info!(client_key = %key, "Tracker socket closed");
}

/// Attaches to the pending production and relays snapshots until the client
/// asks for something else or goes away.
async fn track_once(
    app_state: &AppState,
    key: &str,
    sender: &mut WsSender,
    receiver: &mut futures::stream::SplitStream<WebSocket>,
) -> Next {
    // --- 1. Resume the pending production ---
    let session = match app_state
        .sessions
        .load_fresh(key, Utc::now(), app_state.diagnostics.as_ref())
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(client_key = %key, code = e.code(), "Nothing to track");
            send_message(sender, &error_message(&e)).await;
            return Next::Close;
        }
    };
    let tracking = ServerMessage::Tracking {
        job_id: session.job_id.clone(),
        category: session.category.clone(),
    };
    if !send_message(sender, &tracking).await {
        return Next::Close;
    }

    // An artifact recorded by an earlier loop needs no polling.
    let mut subscription = match &session.final_artifact_url {
        Some(url) => {
            let done = ServerMessage::Succeeded {
                output_url: url.clone(),
            };
            if !send_message(sender, &done).await {
                return Next::Close;
            }
            None
        }
        None => {
            let sub = app_state.tracker.attach(key, &session.job_id, None);
            if !send_message(sender, &ServerMessage::from_snapshot(&sub.snapshot())).await {
                return Next::Close;
            }
            Some(sub)
        }
    };

    // --- 2. Relay snapshots and handle client commands ---
    loop {
        tokio::select! {
            snapshot = async { subscription.as_mut()?.next().await }, if subscription.is_some() => {
                match snapshot {
                    Some(snapshot) => {
                        if !send_message(sender, &ServerMessage::from_snapshot(&snapshot)).await {
                            return Next::Close;
                        }
                    }
                    // The loop finished; its last snapshot was already relayed.
                    None => subscription = None,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Retry) => {
                                let running = subscription
                                    .as_ref()
                                    .is_some_and(|s| !s.snapshot().phase.is_terminal());
                                if !running {
                                    info!(client_key = %key, "Tracker retry requested");
                                    return Next::Reattach;
                                }
                            }
                            Ok(ClientMessage::NewTake) => {
                                drop(subscription);
                                app_state.tracker.forget(key);
                                if let Err(e) = app_state.sessions.clear(key).await {
                                    error!(client_key = %key, "Failed to clear pending session: {:?}", e);
                                }
                                send_message(sender, &ServerMessage::Cleared).await;
                                return Next::Close;
                            }
                            Err(e) => warn!("Ignoring malformed tracker message: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Next::Close,
                    Some(Err(e)) => {
                        warn!(client_key = %key, "Tracker socket error: {:?}", e);
                        return Next::Close;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
