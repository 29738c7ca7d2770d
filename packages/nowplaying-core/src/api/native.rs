//! Endpoints for the platform helper that feeds the native handler.
//!
//! The helper pushes now-playing updates (over HTTP or its command socket)
//! and executes the commands the native handler forwards.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use tokio::sync::broadcast::error::RecvError;

use crate::api::http::require_token;
use crate::api::response::api_ok;
use crate::api::ws_connection::ConnectionKind;
use crate::api::{AppState, AuthQuery};
use crate::native::NativeNowPlaying;

/// POST /api/native/now-playing
///
/// Body is a now-playing object, or `null` when nothing is playing.
pub async fn publish_now_playing(
    State(state): State<AppState>,
    Query(auth): Query<AuthQuery>,
    Json(update): Json<Option<NativeNowPlaying>>,
) -> Response {
    if let Err(rejection) = require_token(&state, &auth) {
        return rejection;
    }
    state.native_bridge.publish(update);
    api_ok().into_response()
}

/// GET /api/native/commands
pub async fn native_commands_handler(
    ws: WebSocketUpgrade,
    Query(auth): Query<AuthQuery>,
    State(state): State<AppState>,
) -> Response {
    if let Err(rejection) = require_token(&state, &auth) {
        return rejection;
    }
    ws.on_upgrade(move |socket| handle_helper(socket, state))
}

async fn handle_helper(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut commands = state.native_bridge.commands();

    let conn_guard = state.ws_manager.register(ConnectionKind::NativeHelper);
    let cancel_token = conn_guard.cancel_token().clone();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[Native] Helper connection force-closed: {}", conn_guard.id());
                break;
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Option<NativeNowPlaying>>(&text) {
                            Ok(update) => state.native_bridge.publish(update),
                            Err(e) => log::debug!("[Native] Dropping malformed update: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            command = commands.recv() => {
                match command {
                    Ok(command) => {
                        let Ok(json) = serde_json::to_string(&command) else {
                            continue;
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("[Native] Helper lagged, {} command(s) dropped", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}
