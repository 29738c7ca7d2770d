//! Backend that mirrors the OS media session through a [`NowPlayingBridge`].
//!
//! Updates become snapshots as they arrive; transport commands are forwarded
//! to the platform helper. Shuffle and repeat are not exposed by the platform.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::bridge::{NativeCommand, NativeNowPlaying, NowPlayingBridge};
use crate::error::{PlaybackError, PlaybackResult};
use crate::playback::{
    clamp_volume, Capability, CapabilitySet, HandlerConfig, HandlerEvents, HandlerKind,
    PlaybackData, PlaybackHandler, RepeatMode, TrackDuration, TrackInfo,
};
use crate::runtime::{ScheduledTask, TaskSpawner, TokioSpawner};

/// Maps a platform update to a snapshot. Shuffle and repeat are not exposed
/// by the platform and stay at their defaults.
#[must_use]
pub fn map_now_playing(update: &NativeNowPlaying) -> PlaybackData {
    let mut supported: CapabilitySet = [
        Capability::Play,
        Capability::Pause,
        Capability::Next,
        Capability::Previous,
    ]
    .into_iter()
    .collect();
    if update.volume.is_some() {
        supported.insert(Capability::Volume);
    }
    if update.artwork_data.is_some() || update.artwork_url.is_some() {
        supported.insert(Capability::Image);
    }

    PlaybackData {
        is_playing: update.is_playing,
        volume: update.volume.map_or(0, clamp_volume),
        shuffle: false,
        repeat: RepeatMode::Off,
        track: TrackInfo {
            id: update.id.clone(),
            name: update.title.clone(),
            artists: update.artist.iter().cloned().collect(),
            album: update.album.clone().unwrap_or_default(),
            duration: TrackDuration {
                current_ms: update.elapsed_ms.unwrap_or(0),
                total_ms: update.duration_ms.unwrap_or(0),
            },
            image_url: update.artwork_url.clone(),
        },
        supported_actions: supported,
        context: None,
    }
}

/// Decodes base64 artwork, accepting a `data:<mime>;base64,` prefix.
fn decode_artwork(data: &str) -> PlaybackResult<Bytes> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    BASE64
        .decode(payload.trim())
        .map(Bytes::from)
        .map_err(|e| PlaybackError::MalformedMessage(format!("artwork is not valid base64: {e}")))
}

/// Backend over a [`NowPlayingBridge`]. Needs no credentials.
pub struct NativeHandler {
    bridge: Arc<dyn NowPlayingBridge>,
    client: reqwest::Client,
    spawner: TokioSpawner,
    latest: Arc<RwLock<Option<NativeNowPlaying>>>,
    listener: Mutex<Option<ScheduledTask>>,
}

impl NativeHandler {
    pub fn new(bridge: Arc<dyn NowPlayingBridge>, client: reqwest::Client, spawner: TokioSpawner) -> Self {
        Self {
            bridge,
            client,
            spawner,
            latest: Arc::new(RwLock::new(None)),
            listener: Mutex::new(None),
        }
    }

    async fn command(&self, command: NativeCommand) -> PlaybackResult<()> {
        self.bridge.send_command(command).await
    }
}

#[async_trait]
impl PlaybackHandler for NativeHandler {
    fn name(&self) -> &'static str {
        HandlerKind::Native.as_str()
    }

    async fn validate_config(&self, config: &HandlerConfig) -> PlaybackResult<()> {
        match config.as_value() {
            serde_json::Value::Null | serde_json::Value::Object(_) => Ok(()),
            _ => Err(PlaybackError::ConfigInvalid(
                "native handler config must be an object or null".to_string(),
            )),
        }
    }

    async fn setup(&self, _config: &HandlerConfig, events: HandlerEvents) -> PlaybackResult<()> {
        if let Some(previous) = self.listener.lock().take() {
            previous.cancel();
        }

        let mut updates = self.bridge.subscribe();
        let latest = Arc::clone(&self.latest);
        let task_events = events.clone();
        let listener = self.spawner.spawn("native-listener", async move {
            while updates.changed().await.is_ok() {
                let update = updates.borrow_and_update().clone();
                let snapshot = update.as_ref().map(map_now_playing);
                *latest.write() = update;
                task_events.playback(snapshot);
            }
            log::info!("[Native] Bridge subscription ended");
            task_events.close();
        });
        *self.listener.lock() = Some(listener);

        events.open();
        log::info!("[Native] Subscribed to now-playing bridge");
        Ok(())
    }

    async fn cleanup(&self) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.cancel();
            self.bridge.unsubscribe();
            log::info!("[Native] Unsubscribed from now-playing bridge");
        }
        self.latest.write().take();
    }

    async fn get_snapshot(&self) -> PlaybackResult<Option<PlaybackData>> {
        Ok(self.latest.read().as_ref().map(map_now_playing))
    }

    async fn get_image(&self) -> PlaybackResult<Option<Bytes>> {
        let (data, url) = match self.latest.read().as_ref() {
            Some(update) => (update.artwork_data.clone(), update.artwork_url.clone()),
            None => return Ok(None),
        };
        if let Some(data) = data {
            return decode_artwork(&data).map(Some);
        }
        let Some(url) = url else {
            return Ok(None);
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PlaybackError::UpstreamUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PlaybackError::UpstreamUnavailable(format!(
                "artwork fetch returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlaybackError::UpstreamUnavailable(e.to_string()))?;
        Ok(Some(bytes))
    }

    async fn play(&self) -> PlaybackResult<()> {
        self.command(NativeCommand::Play).await
    }

    async fn pause(&self) -> PlaybackResult<()> {
        self.command(NativeCommand::Pause).await
    }

    async fn set_volume(&self, percent: u8, _device_id: Option<&str>) -> PlaybackResult<()> {
        self.command(NativeCommand::SetVolume {
            percent: percent.min(100),
        })
        .await
    }

    async fn next(&self) -> PlaybackResult<()> {
        self.command(NativeCommand::Next).await
    }

    async fn previous(&self) -> PlaybackResult<()> {
        self.command(NativeCommand::Previous).await
    }

    async fn set_shuffle(&self, _state: bool) -> PlaybackResult<()> {
        Err(PlaybackError::unsupported("shuffle"))
    }

    async fn set_repeat(&self, _mode: RepeatMode) -> PlaybackResult<()> {
        Err(PlaybackError::unsupported("repeat"))
    }
}
