//! Web API / dealer payloads and their mapping to the playback model.

use std::collections::HashMap;

use serde::Deserialize;

use crate::playback::{
    clamp_volume, Capability, CapabilitySet, Device, LibraryItem, PlaybackContext, PlaybackData,
    RepeatMode, TrackDuration, TrackInfo, TrackItem,
};

// ─────────────────────────────────────────────────────────────────────────────
// Upstream Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Named {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlbumObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Named>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub total_tracks: Option<u32>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShowObject {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

/// A track or an episode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub artists: Vec<Named>,
    #[serde(default)]
    pub album: Option<AlbumObject>,
    #[serde(default)]
    pub show: Option<ShowObject>,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub volume_percent: Option<f64>,
    #[serde(default = "default_true")]
    pub supports_volume: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextObject {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Actions {
    #[serde(default)]
    pub disallows: HashMap<String, bool>,
}

/// `/me/player` response and dealer `PLAYER_STATE_CHANGED` state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub device: Option<DeviceObject>,
    #[serde(default)]
    pub shuffle_state: bool,
    #[serde(default)]
    pub repeat_state: String,
    #[serde(default)]
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub item: Option<Item>,
    #[serde(default)]
    pub currently_playing_type: Option<String>,
    #[serde(default)]
    pub context: Option<ContextObject>,
    #[serde(default)]
    pub actions: Option<Actions>,
}

impl PlayerState {
    /// True when the item is not a plain track and needs a REST fetch for
    /// equivalent fields (episodes arrive without their show metadata).
    #[must_use]
    pub fn needs_full_fetch(&self) -> bool {
        let kind = self
            .currently_playing_type
            .as_deref()
            .or_else(|| self.item.as_ref().map(|i| i.kind.as_str()));
        match kind {
            Some("track") => false,
            Some("unknown") | None => false,
            Some(_) => self.item.as_ref().map_or(true, |i| i.show.is_none()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Paging<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaylistObject {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub images: Option<Vec<Image>>,
    #[serde(default)]
    pub tracks: Option<TrackCount>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackCount {
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SavedAlbum {
    pub album: AlbumObject,
}

/// Entry of `/me/tracks` and `/playlists/{id}/tracks`; `track` is null for
/// removed or unavailable items.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SavedTrack {
    #[serde(default)]
    pub track: Option<Item>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub devices: Vec<DeviceObject>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Spotify repeat state to the client model.
#[must_use]
pub fn repeat_from_spotify(state: &str) -> RepeatMode {
    match state {
        "context" => RepeatMode::On,
        "track" => RepeatMode::One,
        _ => RepeatMode::Off,
    }
}

/// Client repeat mode to the Spotify query value.
#[must_use]
pub fn repeat_to_spotify(mode: RepeatMode) -> &'static str {
    match mode {
        RepeatMode::Off => "off",
        RepeatMode::On => "context",
        RepeatMode::One => "track",
    }
}

/// Largest image, or the first when widths are unknown.
fn best_image(images: &[Image]) -> Option<String> {
    images
        .iter()
        .max_by_key(|img| img.width.unwrap_or(0))
        .map(|img| img.url.clone())
}

/// Derives the capability set from `actions.disallows` and the device.
fn capabilities(state: &PlayerState, has_image: bool, extra: &[Capability]) -> CapabilitySet {
    let disallowed = |key: &str| {
        state
            .actions
            .as_ref()
            .and_then(|a| a.disallows.get(key))
            .copied()
            .unwrap_or(false)
    };

    let mut set = CapabilitySet::new();
    if !disallowed("resuming") {
        set.insert(Capability::Play);
    }
    if !disallowed("pausing") {
        set.insert(Capability::Pause);
    }
    if !disallowed("skipping_next") {
        set.insert(Capability::Next);
    }
    if !disallowed("skipping_prev") {
        set.insert(Capability::Previous);
    }
    if !disallowed("toggling_shuffle") {
        set.insert(Capability::Shuffle);
    }
    if !(disallowed("toggling_repeat_context") && disallowed("toggling_repeat_track")) {
        set.insert(Capability::Repeat);
    }
    let volume_ok = state
        .device
        .as_ref()
        .is_some_and(|d| d.supports_volume && d.volume_percent.is_some());
    if volume_ok {
        set.insert(Capability::Volume);
    }
    if has_image {
        set.insert(Capability::Image);
    }
    set.insert(Capability::Library);
    set.insert(Capability::Devices);
    set.extend(extra.iter().copied());
    set
}

/// Maps player state to a snapshot. A missing item yields `None`.
#[must_use]
pub fn map_player_state(state: &PlayerState, extra: &[Capability]) -> Option<PlaybackData> {
    let item = state.item.as_ref()?;

    let (artists, album, images) = match &item.show {
        Some(show) => (
            vec![show.publisher.clone()],
            show.name.clone(),
            if item.images.is_empty() {
                &show.images
            } else {
                &item.images
            },
        ),
        None => {
            let album = item.album.as_ref();
            (
                item.artists.iter().map(|a| a.name.clone()).collect(),
                album.map(|a| a.name.clone()).unwrap_or_default(),
                album.map_or(&item.images, |a| &a.images),
            )
        }
    };
    let image_url = best_image(images);

    let progress_ms = state.progress_ms.unwrap_or(0);
    // Unknown duration (0) leaves progress unclamped
    let current_ms = match item.duration_ms {
        0 => progress_ms,
        total => progress_ms.min(total),
    };

    Some(PlaybackData {
        is_playing: state.is_playing,
        volume: state
            .device
            .as_ref()
            .and_then(|d| d.volume_percent)
            .map_or(0, clamp_volume),
        shuffle: state.shuffle_state,
        repeat: repeat_from_spotify(&state.repeat_state),
        supported_actions: capabilities(state, image_url.is_some(), extra),
        track: TrackInfo {
            id: item.id.clone(),
            name: item.name.clone(),
            artists,
            album,
            duration: TrackDuration {
                current_ms,
                total_ms: item.duration_ms,
            },
            image_url,
        },
        context: state.context.as_ref().map(|c| PlaybackContext {
            kind: c.kind.clone(),
            uri: c.uri.clone(),
        }),
    })
}

#[must_use]
pub fn map_device(device: &DeviceObject) -> Option<Device> {
    Some(Device {
        id: device.id.clone()?,
        name: device.name.clone(),
        kind: device.kind.clone(),
        is_active: device.is_active,
        volume_percent: device.volume_percent.map(clamp_volume),
    })
}

#[must_use]
pub fn map_playlist(playlist: &PlaylistObject) -> LibraryItem {
    LibraryItem {
        id: playlist.id.clone(),
        name: playlist.name.clone(),
        subtitle: playlist
            .owner
            .as_ref()
            .and_then(|o| o.display_name.clone())
            .unwrap_or_default(),
        image_url: playlist.images.as_deref().and_then(best_image),
        track_count: playlist.tracks.as_ref().map(|t| t.total),
        uri: playlist.uri.clone(),
    }
}

#[must_use]
pub fn map_album(album: &AlbumObject) -> Option<LibraryItem> {
    Some(LibraryItem {
        id: album.id.clone()?,
        name: album.name.clone(),
        subtitle: album
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        image_url: best_image(&album.images),
        track_count: album.total_tracks,
        uri: album.uri.clone(),
    })
}

/// Maps a track entry. Local files and unavailable items (no id) are skipped.
#[must_use]
pub fn map_track(item: &Item, album_name: Option<&str>) -> Option<TrackItem> {
    Some(TrackItem {
        id: item.id.clone()?,
        name: item.name.clone(),
        artists: item.artists.iter().map(|a| a.name.clone()).collect(),
        album: album_name
            .map(str::to_string)
            .or_else(|| item.album.as_ref().map(|a| a.name.clone()))
            .unwrap_or_default(),
        duration_ms: item.duration_ms,
        is_playing: false,
        uri: item.uri.clone(),
    })
}
