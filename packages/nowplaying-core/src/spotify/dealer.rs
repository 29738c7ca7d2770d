//! Dealer push socket.
//!
//! The dealer is a WebSocket authenticated by an `access_token` query
//! parameter. Its first message carries the connection id in the
//! `Spotify-Connection-Id` header; that id must be registered through the
//! Web API before player events are delivered. Silent sockets are dropped
//! upstream, so the reader sends a `{"type":"ping"}` on a fixed interval.

use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::mapping::PlayerState;
use super::{SpotifyError, SpotifyResult};
use crate::protocol_constants::DEALER_CONNECTION_ID_HEADER;

/// How long to wait for the connection-id message after the upgrade.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const PING_MESSAGE: &str = r#"{"type":"ping"}"#;

type DealerStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A decoded dealer frame.
#[derive(Debug, Clone)]
pub enum DealerMessage {
    /// Connection id assigned by the dealer.
    Connection(String),
    PlayerStateChanged(Box<PlayerState>),
    /// Device list changed; `any_active` is false when playback stopped
    /// everywhere.
    DeviceStateChanged { any_active: bool },
    Pong,
    Other,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    headers: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    payloads: Vec<Payload>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    events: Vec<EventEntry>,
}

#[derive(Deserialize)]
struct EventEntry {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    event: Value,
}

/// Decodes one text frame into zero or more messages, in payload order.
#[must_use]
pub fn parse_message(text: &str) -> Vec<DealerMessage> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            log::debug!("[Dealer] Ignoring unparseable frame: {}", e);
            return vec![DealerMessage::Other];
        }
    };

    if envelope.kind == "pong" {
        return vec![DealerMessage::Pong];
    }

    if let Some(id) = envelope
        .headers
        .as_ref()
        .and_then(|h| h.get(DEALER_CONNECTION_ID_HEADER))
        .and_then(Value::as_str)
    {
        return vec![DealerMessage::Connection(id.to_string())];
    }

    let messages: Vec<_> = envelope
        .payloads
        .into_iter()
        .flat_map(|p| p.events)
        .map(|entry| match entry.kind.as_str() {
            "PLAYER_STATE_CHANGED" => entry
                .event
                .get("state")
                .cloned()
                .and_then(|state| serde_json::from_value::<PlayerState>(state).ok())
                .map_or(DealerMessage::Other, |state| {
                    DealerMessage::PlayerStateChanged(Box::new(state))
                }),
            "DEVICE_STATE_CHANGED" => {
                let any_active = entry
                    .event
                    .get("devices")
                    .and_then(Value::as_array)
                    .is_some_and(|devices| {
                        devices
                            .iter()
                            .any(|d| d.get("is_active").and_then(Value::as_bool) == Some(true))
                    });
                DealerMessage::DeviceStateChanged { any_active }
            }
            _ => DealerMessage::Other,
        })
        .collect();

    if messages.is_empty() {
        vec![DealerMessage::Other]
    } else {
        messages
    }
}

/// An open dealer socket with its assigned connection id.
pub struct DealerConnection {
    stream: DealerStream,
    connection_id: String,
}

impl DealerConnection {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

/// Appends the access token to the dealer URL, percent-encoded.
fn socket_url(base: &str, token: &str) -> SpotifyResult<String> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| SpotifyError::Handshake(format!("invalid dealer URL '{base}': {e}")))?;
    url.query_pairs_mut().append_pair("access_token", token);
    Ok(url.into())
}

/// Opens the socket and waits for the connection id.
pub async fn connect(url: &str, token: &str) -> SpotifyResult<DealerConnection> {
    let (mut stream, _) = connect_async(socket_url(url, token)?).await?;

    let connection_id = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        while let Some(frame) = stream.next().await {
            if let Message::Text(text) = frame? {
                for message in parse_message(text.as_str()) {
                    if let DealerMessage::Connection(id) = message {
                        return Ok(id);
                    }
                }
            }
        }
        Err(SpotifyError::Handshake(
            "socket closed before a connection id was assigned".to_string(),
        ))
    })
    .await
    .map_err(|_| SpotifyError::Handshake("timed out waiting for connection id".to_string()))??;

    log::info!("[Dealer] Connected (connection id {})", connection_id);
    Ok(DealerConnection {
        stream,
        connection_id,
    })
}

/// Reads frames until the socket closes, delivering each decoded message in
/// arrival order and pinging on `ping_interval`.
///
/// Returns `Ok(())` on a clean close and the socket error otherwise. The
/// caller decides what a closed socket means; dropping this future (e.g. on
/// cancellation) closes the socket without reporting anything.
pub async fn run<F, Fut>(
    connection: DealerConnection,
    ping_interval: Duration,
    mut on_message: F,
) -> SpotifyResult<()>
where
    F: FnMut(DealerMessage) -> Fut,
    Fut: Future<Output = ()>,
{
    let (mut sink, mut stream) = connection.stream.split();
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ping.tick() => {
                sink.send(Message::text(PING_MESSAGE)).await?;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    for message in parse_message(text.as_str()) {
                        on_message(message).await;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    log::info!("[Dealer] Closed by server: {:?}", frame);
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            }
        }
    }
}
