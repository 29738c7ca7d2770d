//! The playback-handler contract.
//!
//! A handler adapts one upstream media source to a uniform command/query
//! surface. The [`super::PlaybackManager`] owns at most one active handler
//! and is the only caller of [`PlaybackHandler::setup`] and
//! [`PlaybackHandler::cleanup`].
//!
//! Handlers report upstream activity through the [`HandlerEvents`] sender
//! passed to `setup`. Once the manager tears a handler down it drops the
//! receiving end, so events sent by a superseded handler go nowhere.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::types::{
    Device, LibraryItem, Page, PageRequest, PlaybackData, RepeatMode, TrackItem,
};
use crate::error::{PlaybackError, PlaybackResult};
use crate::lyrics::LyricsResult;
use crate::utils::mask_secret;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque backend configuration blob (credentials and options).
///
/// `Debug` masks every string value so the blob can be logged safely.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerConfig(Value);

impl HandlerConfig {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Returns a non-empty string field.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Returns true when `key` is present with a non-empty string value.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.str_field(key).is_some()
    }
}

impl fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mask(value: &Value) -> Value {
            match value {
                Value::String(s) => Value::String(mask_secret(s)),
                Value::Object(map) => {
                    Value::Object(map.iter().map(|(k, v)| (k.clone(), mask(v))).collect())
                }
                Value::Array(items) => Value::Array(items.iter().map(mask).collect()),
                other => other.clone(),
            }
        }
        write!(f, "HandlerConfig({})", mask(&self.0))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Events a handler reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerEvent {
    /// Upstream state changed. `None` means nothing is playing.
    Playback(Option<PlaybackData>),
    /// The realtime channel is confirmed live.
    Open,
    /// The realtime channel dropped.
    Close,
    /// Non-fatal upstream fault.
    Error(String),
}

/// Sending half of a handler's event channel.
#[derive(Clone)]
pub struct HandlerEvents {
    tx: mpsc::UnboundedSender<HandlerEvent>,
}

impl HandlerEvents {
    /// Creates a connected sender/receiver pair.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HandlerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: HandlerEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("[Handler] Event dropped, owner detached");
        }
    }

    pub fn playback(&self, data: Option<PlaybackData>) {
        self.send(HandlerEvent::Playback(data));
    }

    pub fn open(&self) {
        self.send(HandlerEvent::Open);
    }

    pub fn close(&self) {
        self.send(HandlerEvent::Close);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(HandlerEvent::Error(message.into()));
    }

    /// Returns true once the owner dropped the receiver.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of the managed handler slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerState {
    Idle,
    Configuring,
    Active,
    Closing,
    /// The realtime channel dropped; a reconnect may be pending.
    Faulted,
}

/// Names of the built-in handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Spotify,
    SpotifyFree,
    Native,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 3] = [Self::Spotify, Self::SpotifyFree, Self::Native];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spotify => "spotify",
            Self::SpotifyFree => "spotify-free",
            Self::Native => "native",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler Contract
// ─────────────────────────────────────────────────────────────────────────────

/// Contract every playback backend implements.
///
/// Commands either succeed or return [`PlaybackError::Unsupported`] when the
/// backend cannot perform them; callers treat `Unsupported` as expected.
/// Library methods default to `Unsupported` so a backend only overrides what
/// it actually offers.
#[async_trait]
pub trait PlaybackHandler: Send + Sync {
    /// Registry name (`spotify`, `spotify-free`, `native`).
    fn name(&self) -> &'static str;

    /// Checks `config` without side effects. May perform one read-only probe.
    ///
    /// Returns [`PlaybackError::ConfigInvalid`] on failure. Must not hold any
    /// resource afterwards, whatever the outcome.
    async fn validate_config(&self, config: &HandlerConfig) -> PlaybackResult<()>;

    /// Establishes upstream connections. Safe to call again after `cleanup`.
    async fn setup(&self, config: &HandlerConfig, events: HandlerEvents) -> PlaybackResult<()>;

    /// Releases every socket, timer and listener acquired in `setup`.
    /// A no-op when already idle.
    async fn cleanup(&self);

    async fn get_snapshot(&self) -> PlaybackResult<Option<PlaybackData>>;

    async fn get_image(&self) -> PlaybackResult<Option<Bytes>>;

    async fn play(&self) -> PlaybackResult<()>;

    async fn pause(&self) -> PlaybackResult<()>;

    async fn set_volume(&self, percent: u8, device_id: Option<&str>) -> PlaybackResult<()>;

    async fn next(&self) -> PlaybackResult<()>;

    async fn previous(&self) -> PlaybackResult<()>;

    async fn set_shuffle(&self, state: bool) -> PlaybackResult<()>;

    async fn set_repeat(&self, mode: RepeatMode) -> PlaybackResult<()>;

    async fn list_playlists(&self, _page: PageRequest) -> PlaybackResult<Page<LibraryItem>> {
        Err(PlaybackError::unsupported("playlists"))
    }

    async fn list_albums(&self, _page: PageRequest) -> PlaybackResult<Page<LibraryItem>> {
        Err(PlaybackError::unsupported("albums"))
    }

    async fn list_liked_songs(&self, _page: PageRequest) -> PlaybackResult<Page<TrackItem>> {
        Err(PlaybackError::unsupported("likedSongs"))
    }

    async fn list_playlist_tracks(
        &self,
        _id: &str,
        _page: PageRequest,
    ) -> PlaybackResult<Page<TrackItem>> {
        Err(PlaybackError::unsupported("playlistTracks"))
    }

    async fn list_album_tracks(
        &self,
        _id: &str,
        _page: PageRequest,
    ) -> PlaybackResult<Page<TrackItem>> {
        Err(PlaybackError::unsupported("albumTracks"))
    }

    async fn play_playlist(&self, _id: &str) -> PlaybackResult<()> {
        Err(PlaybackError::unsupported("playPlaylist"))
    }

    async fn play_album(&self, _id: &str) -> PlaybackResult<()> {
        Err(PlaybackError::unsupported("playAlbum"))
    }

    async fn play_track(
        &self,
        _id: &str,
        _context_type: Option<&str>,
        _context_id: Option<&str>,
    ) -> PlaybackResult<()> {
        Err(PlaybackError::unsupported("playTrack"))
    }

    async fn list_devices(&self) -> PlaybackResult<Vec<Device>> {
        Err(PlaybackError::unsupported("devices"))
    }

    async fn transfer_playback(&self, _device_id: &str, _play: Option<bool>) -> PlaybackResult<()> {
        Err(PlaybackError::unsupported("transferPlayback"))
    }

    async fn get_lyrics(&self) -> PlaybackResult<LyricsResult> {
        Err(PlaybackError::unsupported("lyrics"))
    }
}

/// Constructs fresh handler instances by name.
pub trait HandlerFactory: Send + Sync {
    /// Returns a new, idle handler, or `None` for an unknown name.
    fn create(&self, name: &str) -> Option<Arc<dyn PlaybackHandler>>;

    /// Names this factory can construct.
    fn available(&self) -> Vec<&'static str>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_debug_masks_secrets() {
        let config = HandlerConfig::new(json!({
            "client_id": "abcdefghijklmnop",
            "nested": {"refresh_token": "supersecretvalue123"},
            "port": 8080
        }));
        let debug = format!("{config:?}");
        assert!(!debug.contains("abcdefghijklmnop"));
        assert!(!debug.contains("supersecretvalue123"));
        assert!(debug.contains("8080"));
    }

    #[test]
    fn str_field_ignores_blank_values() {
        let config = HandlerConfig::new(json!({"sp_dc": "  ", "token": "t"}));
        assert!(!config.has("sp_dc"));
        assert_eq!(config.str_field("token"), Some("t"));
        assert!(!config.has("missing"));
    }

    #[test]
    fn handler_kind_names_round_trip() {
        for kind in HandlerKind::ALL {
            assert_eq!(HandlerKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(HandlerKind::from_name("none"), None);
    }

    #[tokio::test]
    async fn events_are_dropped_after_owner_detaches() {
        let (events, mut rx) = HandlerEvents::channel();
        events.open();
        assert_eq!(rx.recv().await, Some(HandlerEvent::Open));

        drop(rx);
        assert!(events.is_detached());
        events.close(); // must not panic
    }
}
