//! Display-client WebSocket.
//!
//! Every frame is a JSON envelope `{type, action?, data?}`. Frames of type
//! `playback` are dispatched to the [`PlaybackManager`]; queries are answered
//! with an envelope carrying the same action, commands are answered through
//! the next broadcast snapshot. Unparseable frames are dropped and the
//! socket stays open.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::response::api_error;
use crate::api::ws_connection::ConnectionKind;
use crate::api::{AppState, AuthQuery};
use crate::error::{PlaybackError, PlaybackResult};
use crate::events::{BroadcastEvent, PlaybackEvent};
use crate::playback::{clamp_volume, PageRequest, PlaybackManager, RepeatMode};
use crate::protocol_constants::PLAYBACK_MESSAGE_TYPE;

const HANDLER_MESSAGE_TYPE: &str = "handler";
const HEARTBEAT_MESSAGE_TYPE: &str = "heartbeat";
const HEARTBEAT_ACK_MESSAGE_TYPE: &str = "heartbeatAck";

// ─────────────────────────────────────────────────────────────────────────────
// Message Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WsIncoming {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Serialize)]
struct WsOutgoing<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'a str>,
    #[serde(skip_serializing_if = "Value::is_null")]
    data: Value,
}

impl WsOutgoing<'_> {
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|s| Message::Text(s.into()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeData {
    volume: f64,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Deserialize)]
struct StateData<T> {
    state: T,
}

#[derive(Deserialize)]
struct IdData {
    id: String,
}

#[derive(Deserialize)]
struct IdPageData {
    id: String,
    #[serde(flatten)]
    page: PageRequest,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayTrackData {
    #[serde(rename = "trackID")]
    track_id: String,
    #[serde(default)]
    context_type: Option<String>,
    #[serde(default)]
    context_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferData {
    device_id: String,
    #[serde(default)]
    play: Option<bool>,
}

fn parse<T: DeserializeOwned>(action: &str, data: Value) -> PlaybackResult<T> {
    serde_json::from_value(data)
        .map_err(|e| PlaybackError::MalformedMessage(format!("{action}: {e}")))
}

fn parse_page(action: &str, data: Value) -> PlaybackResult<PageRequest> {
    if data.is_null() {
        return Ok(PageRequest::default());
    }
    parse(action, data)
}

fn to_value<T: Serialize>(value: T) -> PlaybackResult<Value> {
    serde_json::to_value(value).map_err(|e| PlaybackError::Internal(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Runs one playback action. `Ok(None)` means there is nothing to reply.
///
/// Only [`PlaybackError::MalformedMessage`] is returned for client input
/// problems; backend failures are absorbed by the manager.
pub(crate) async fn dispatch(
    manager: &PlaybackManager,
    action: Option<&str>,
    data: Value,
) -> PlaybackResult<Option<Value>> {
    let Some(action) = action else {
        return to_value(manager.get_snapshot().await).map(Some);
    };

    match action {
        "play" => manager.play().await,
        "pause" => manager.pause().await,
        "next" => manager.next().await,
        "previous" => manager.previous().await,
        "volume" => {
            let data: VolumeData = parse(action, data)?;
            manager
                .set_volume(clamp_volume(data.volume), data.device_id.as_deref())
                .await;
        }
        "shuffle" => {
            let data: StateData<bool> = parse(action, data)?;
            manager.set_shuffle(data.state).await;
        }
        "repeat" => {
            let data: StateData<RepeatMode> = parse(action, data)?;
            manager.set_repeat(data.state).await;
        }
        "image" => {
            let image = manager.get_image().await.map(|bytes| BASE64.encode(bytes));
            return to_value(image).map(Some);
        }
        "lyrics" => {
            return match manager.get_lyrics().await {
                Some(lyrics) => to_value(lyrics).map(Some),
                None => Ok(None),
            };
        }
        "playlists" => {
            let page = parse_page(action, data)?;
            return optional(manager.list_playlists(page).await);
        }
        "albums" => {
            let page = parse_page(action, data)?;
            return optional(manager.list_albums(page).await);
        }
        "likedSongs" => {
            let page = parse_page(action, data)?;
            return optional(manager.list_liked_songs(page).await);
        }
        "playlistTracks" => {
            let data: IdPageData = parse(action, data)?;
            return optional(manager.list_playlist_tracks(&data.id, data.page).await);
        }
        "albumTracks" => {
            let data: IdPageData = parse(action, data)?;
            return optional(manager.list_album_tracks(&data.id, data.page).await);
        }
        "playPlaylist" => {
            let data: IdData = parse(action, data)?;
            manager.play_playlist(&data.id).await;
        }
        "playAlbum" => {
            let data: IdData = parse(action, data)?;
            manager.play_album(&data.id).await;
        }
        "playTrack" => {
            let data: PlayTrackData = parse(action, data)?;
            let result = manager
                .play_track(
                    &data.track_id,
                    data.context_type.as_deref(),
                    data.context_id.as_deref(),
                )
                .await;
            return to_value(result).map(Some);
        }
        "devices" => {
            let devices = manager.list_devices().await;
            return Ok(Some(json!({ "devices": devices })));
        }
        "transferPlayback" => {
            let data: TransferData = parse(action, data)?;
            let result = manager.transfer_playback(&data.device_id, data.play).await;
            return to_value(result).map(Some);
        }
        other => {
            return Err(PlaybackError::MalformedMessage(format!(
                "unknown action {other:?}"
            )))
        }
    }
    Ok(None)
}

fn optional<T: Serialize>(value: Option<T>) -> PlaybackResult<Option<Value>> {
    value.map(to_value).transpose()
}

/// Envelope for a broadcast event.
fn broadcast_envelope(event: &BroadcastEvent) -> Option<Message> {
    match event {
        BroadcastEvent::Playback(PlaybackEvent::Updated { data, .. }) => WsOutgoing {
            kind: PLAYBACK_MESSAGE_TYPE,
            action: None,
            data: serde_json::to_value(data).ok()?,
        }
        .to_message(),
        BroadcastEvent::Handler(status) => WsOutgoing {
            kind: HANDLER_MESSAGE_TYPE,
            action: None,
            data: serde_json::to_value(status).ok()?,
        }
        .to_message(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Socket
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for display clients.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(auth): Query<AuthQuery>,
    State(state): State<AppState>,
) -> Response {
    if !state.is_authorized(auth.token.as_deref()) {
        log::warn!("[WS] Rejected display client with invalid token");
        return api_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid token").into_response();
    }
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, message: Option<Message>) -> bool {
    match message {
        Some(message) => sender.send(message).await.is_ok(),
        None => true,
    }
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.event_bridge.subscribe();
    let mut last_activity = Instant::now();

    let conn_guard = state.ws_manager.register(ConnectionKind::Display);
    let cancel_token = conn_guard.cancel_token().clone();

    // Current handler and snapshot before any broadcast
    let status = WsOutgoing {
        kind: HANDLER_MESSAGE_TYPE,
        action: None,
        data: json!({
            "handler": state.manager.active_name(),
            "state": state.manager.state(),
        }),
    };
    let snapshot = WsOutgoing {
        kind: PLAYBACK_MESSAGE_TYPE,
        action: None,
        data: serde_json::to_value(state.manager.get_snapshot().await).unwrap_or(Value::Null),
    };
    if !send(&mut sender, status.to_message()).await || !send(&mut sender, snapshot.to_message()).await {
        log::warn!("[WS] Failed to send initial state, client disconnected");
        return;
    }

    let heartbeat_timeout = Duration::from_secs(state.config.ws_heartbeat_timeout_secs);
    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(state.config.ws_heartbeat_check_interval_secs));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", conn_guard.id());
                break;
            }
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let incoming = match serde_json::from_str::<WsIncoming>(&text) {
                            Ok(incoming) => incoming,
                            Err(e) => {
                                log::debug!("[WS] Dropping malformed frame: {}", e);
                                continue;
                            }
                        };
                        match incoming.kind.as_str() {
                            PLAYBACK_MESSAGE_TYPE => {
                                let action = incoming.action.as_deref();
                                match dispatch(&state.manager, action, incoming.data).await {
                                    Ok(Some(data)) => {
                                        let reply = WsOutgoing { kind: PLAYBACK_MESSAGE_TYPE, action, data };
                                        if !send(&mut sender, reply.to_message()).await {
                                            break;
                                        }
                                    }
                                    Ok(None) => {}
                                    Err(e) => log::debug!("[WS] Dropping message: {}", e),
                                }
                            }
                            HEARTBEAT_MESSAGE_TYPE => {
                                let ack = WsOutgoing { kind: HEARTBEAT_ACK_MESSAGE_TYPE, action: None, data: Value::Null };
                                if !send(&mut sender, ack.to_message()).await {
                                    break;
                                }
                            }
                            other => log::debug!("[WS] Ignoring message type {:?}", other),
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            Ok(event) = broadcast_rx.recv() => {
                if !send(&mut sender, broadcast_envelope(&event)).await {
                    break;
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > heartbeat_timeout {
                    log::warn!("[WS] Heartbeat timeout: {}", conn_guard.id());
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{spawn_server, test_state, NativeOnly};
    use crate::events::{HandlerStatusEvent, NoopEventEmitter};
    use crate::native::{ChannelBridge, NativeNowPlaying};
    use crate::playback::{HandlerConfig, ReconnectPolicy};
    use crate::runtime::TokioSpawner;
    use crate::state::Config;
    use std::sync::Arc;
    use tokio_tungstenite::tungstenite;

    async fn manager_with_song() -> (Arc<PlaybackManager>, Arc<ChannelBridge>) {
        let bridge = Arc::new(ChannelBridge::default());
        let manager = PlaybackManager::new(
            Arc::new(NativeOnly(Arc::clone(&bridge))),
            Arc::new(NoopEventEmitter),
            TokioSpawner::current(),
            ReconnectPolicy {
                delay: Duration::from_secs(5),
                max_attempts: None,
            },
        );
        bridge.publish(Some(NativeNowPlaying {
            id: Some("n1".into()),
            title: "Song".into(),
            is_playing: true,
            artwork_data: Some("AQID".into()),
            ..NativeNowPlaying::default()
        }));
        manager.activate("native", HandlerConfig::default()).await.unwrap();
        // Let the listener consume the replayed update
        for _ in 0..10 {
            if manager.get_snapshot().await.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        (manager, bridge)
    }

    #[tokio::test]
    async fn no_action_returns_snapshot() {
        let (manager, _bridge) = manager_with_song().await;
        let reply = dispatch(&manager, None, Value::Null).await.unwrap().unwrap();
        assert_eq!(reply["track"]["name"], "Song");
        assert_eq!(reply["isPlaying"], true);
    }

    #[tokio::test]
    async fn image_is_base64() {
        let (manager, _bridge) = manager_with_song().await;
        let reply = dispatch(&manager, Some("image"), Value::Null).await.unwrap();
        assert_eq!(reply, Some(json!("AQID")));
    }

    #[tokio::test]
    async fn unsupported_queries_reply_nothing() {
        let (manager, _bridge) = manager_with_song().await;
        assert_eq!(dispatch(&manager, Some("lyrics"), Value::Null).await.unwrap(), None);
        assert_eq!(
            dispatch(&manager, Some("playlists"), json!({"offset": 0})).await.unwrap(),
            None
        );
        // Unsupported commands are absorbed
        assert_eq!(
            dispatch(&manager, Some("shuffle"), json!({"state": true})).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn play_track_reports_failure() {
        let (manager, _bridge) = manager_with_song().await;
        let reply = dispatch(&manager, Some("playTrack"), json!({"trackID": "t1"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply["success"], false);
    }

    #[tokio::test]
    async fn volume_command_reaches_helper() {
        let (manager, bridge) = manager_with_song().await;
        let mut helper = bridge.commands();
        dispatch(&manager, Some("volume"), json!({"volume": 42.4}))
            .await
            .unwrap();
        assert_eq!(
            helper.recv().await.unwrap(),
            crate::native::NativeCommand::SetVolume { percent: 42 }
        );
    }

    #[tokio::test]
    async fn malformed_input_is_rejected_not_fatal() {
        let (manager, _bridge) = manager_with_song().await;
        for (action, data) in [
            ("volume", json!({"volume": "loud"})),
            ("repeat", json!({"state": "sometimes"})),
            ("playTrack", json!({})),
            ("teleport", Value::Null),
        ] {
            let err = dispatch(&manager, Some(action), data).await.unwrap_err();
            assert!(matches!(err, PlaybackError::MalformedMessage(_)), "{action}");
        }
        assert!(manager.get_snapshot().await.is_some());
    }

    #[test]
    fn broadcast_envelopes() {
        let message = broadcast_envelope(&BroadcastEvent::Playback(PlaybackEvent::updated(None)));
        match message {
            Some(Message::Text(text)) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(value, json!({"type": "playback"}));
            }
            other => panic!("unexpected {:?}", other),
        }

        let message = broadcast_envelope(&BroadcastEvent::Handler(HandlerStatusEvent::Connected {
            handler: "native".into(),
            timestamp: 1,
        }));
        match message {
            Some(Message::Text(text)) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(value["type"], "handler");
                assert_eq!(value["data"]["type"], "connected");
                assert_eq!(value["data"]["handler"], "native");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    async fn next_json<S>(socket: &mut S) -> Value
    where
        S: futures::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    {
        loop {
            match socket.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap()
                }
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn socket_sends_initial_state_and_answers() {
        let (state, _store) = test_state(Config::default());
        let ws_manager = Arc::clone(&state.ws_manager);
        let addr = spawn_server(state).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();

        let status = next_json(&mut socket).await;
        assert_eq!(status["type"], "handler");
        assert_eq!(status["data"]["state"], "idle");
        // No handler: snapshot is null, so no data field
        assert_eq!(next_json(&mut socket).await, json!({"type": "playback"}));
        assert_eq!(ws_manager.count_of(ConnectionKind::Display), 1);

        socket
            .send(tungstenite::Message::text(r#"{"type":"heartbeat"}"#))
            .await
            .unwrap();
        assert_eq!(next_json(&mut socket).await, json!({"type": "heartbeatAck"}));

        // Garbage is dropped and the socket keeps working
        socket.send(tungstenite::Message::text("not json")).await.unwrap();
        socket
            .send(tungstenite::Message::text(r#"{"type":"playback","action":"devices"}"#))
            .await
            .unwrap();
        assert_eq!(
            next_json(&mut socket).await,
            json!({"type": "playback", "action": "devices", "data": {"devices": []}})
        );
    }

    #[tokio::test]
    async fn socket_rejects_wrong_token() {
        let config = Config {
            client_token: Some("secret".into()),
            ..Config::default()
        };
        let (state, _store) = test_state(config);
        let addr = spawn_server(state).await;

        assert!(tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token=wrong"))
            .await
            .is_err());
        assert!(tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token=secret"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn close_all_ends_display_sockets() {
        let (state, _store) = test_state(Config::default());
        let ws_manager = Arc::clone(&state.ws_manager);
        let addr = spawn_server(state).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        next_json(&mut socket).await;
        next_json(&mut socket).await;

        assert_eq!(ws_manager.close_all(), 1);
        loop {
            match socket.next().await {
                Some(Ok(tungstenite::Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    }
}
