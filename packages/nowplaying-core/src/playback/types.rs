//! Backend-independent playback data model.
//!
//! These types are what display clients see. Every handler maps its
//! upstream payloads into them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Repeat mode as exposed to display clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    /// Repeat the current context (playlist/album).
    On,
    /// Repeat the current track.
    One,
}

/// A command or feature the active backend currently supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Play,
    Pause,
    Next,
    Previous,
    Volume,
    Shuffle,
    Repeat,
    Image,
    Lyrics,
    /// Playlists, albums, liked songs and their track lists.
    Library,
    Devices,
}

/// Ordered set of capability tags; serializes as a JSON array.
pub type CapabilitySet = BTreeSet<Capability>;

/// Playback position of the current item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackDuration {
    pub current_ms: u64,
    pub total_ms: u64,
}

/// The item currently playing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub artists: Vec<String>,
    pub album: String,
    pub duration: TrackDuration,
    /// Artwork location used by `get_image`; not sent to clients.
    #[serde(default, skip_serializing)]
    pub image_url: Option<String>,
}

impl TrackInfo {
    /// Artists joined for display and lookup keys.
    #[must_use]
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

/// Playback context (playlist, album, show, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackContext {
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: String,
}

/// Unified "now playing" snapshot. `None` at the API level means nothing is
/// playing or there is no session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackData {
    pub is_playing: bool,
    /// Volume percentage, always within `0..=100`.
    pub volume: u8,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub track: TrackInfo,
    pub supported_actions: CapabilitySet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PlaybackContext>,
}

impl PlaybackData {
    /// Returns true when the snapshot declares `capability`.
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.supported_actions.contains(&capability)
    }
}

/// Clamps an upstream volume reading into `0..=100`.
#[must_use]
pub fn clamp_volume(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

// ─────────────────────────────────────────────────────────────────────────────
// Library Browsing
// ─────────────────────────────────────────────────────────────────────────────

/// Items that can be de-duplicated by id when merging pages.
pub trait Identified {
    fn id(&self) -> &str;
}

/// A playlist or album entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    pub id: String,
    pub name: String,
    /// Owner (playlists) or artists (albums).
    #[serde(default)]
    pub subtitle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Identified for LibraryItem {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A track entry in a list, tagged against the current snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackItem {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Identified for TrackItem {
    fn id(&self) -> &str {
        &self.id
    }
}

/// One page of a paginated list, with the merged item list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub offset: u32,
    pub total: u32,
}

/// Pagination parameters supplied by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// A Spotify Connect (or equivalent) output device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_percent: Option<u8>,
}

/// Outcome of a command whose result the client wants to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}
