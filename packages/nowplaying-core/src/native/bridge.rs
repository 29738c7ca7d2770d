//! Platform seam for OS "now playing" metadata.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::error::{PlaybackError, PlaybackResult};

/// Metadata pushed by the platform helper. `None` at the channel level means
/// the helper reports nothing playing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeNowPlaying {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Volume as reported by the platform, 0-100 (may overshoot).
    #[serde(default)]
    pub volume: Option<f64>,
    /// Embedded artwork, base64 (optionally as a `data:` URL).
    #[serde(default)]
    pub artwork_data: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
}

/// Commands forwarded to the platform helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum NativeCommand {
    Play,
    Pause,
    Next,
    Previous,
    SetVolume { percent: u8 },
}

/// Push-callback API exposing the OS media session.
#[async_trait]
pub trait NowPlayingBridge: Send + Sync {
    /// Starts delivering updates. Only the latest update is retained, so a
    /// slow subscriber skips intermediate states. A new subscription
    /// replaces the previous one, whose receiver then ends.
    fn subscribe(&self) -> watch::Receiver<Option<NativeNowPlaying>>;

    /// Stops delivering updates.
    fn unsubscribe(&self);

    async fn send_command(&self, command: NativeCommand) -> PlaybackResult<()>;
}

/// In-process bridge fed over HTTP by an external platform helper.
///
/// Updates arrive through [`ChannelBridge::publish`]; commands fan out to
/// every helper holding a [`ChannelBridge::commands`] receiver.
pub struct ChannelBridge {
    subscriber: Mutex<Option<watch::Sender<Option<NativeNowPlaying>>>>,
    latest: RwLock<Option<NativeNowPlaying>>,
    commands: broadcast::Sender<NativeCommand>,
}

impl ChannelBridge {
    #[must_use]
    pub fn new(command_capacity: usize) -> Self {
        let (commands, _) = broadcast::channel(command_capacity);
        Self {
            subscriber: Mutex::new(None),
            latest: RwLock::new(None),
            commands,
        }
    }

    /// Records the latest state and hands it to the subscriber, if any,
    /// overwriting an update it has not seen yet.
    pub fn publish(&self, update: Option<NativeNowPlaying>) {
        *self.latest.write() = update.clone();

        match self.subscriber.lock().as_ref() {
            Some(tx) => {
                tx.send_replace(update);
            }
            None => log::trace!("[Native] Update received with no subscriber"),
        }
    }

    /// Receiver for helpers that execute commands.
    pub fn commands(&self) -> broadcast::Receiver<NativeCommand> {
        self.commands.subscribe()
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber.lock().is_some()
    }
}

impl Default for ChannelBridge {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl NowPlayingBridge for ChannelBridge {
    fn subscribe(&self) -> watch::Receiver<Option<NativeNowPlaying>> {
        let (tx, rx) = watch::channel(None);
        if let Some(latest) = self.latest.read().clone() {
            // Marks the receiver changed so the current state is delivered
            tx.send_replace(Some(latest));
        }
        *self.subscriber.lock() = Some(tx);
        rx
    }

    fn unsubscribe(&self) {
        self.subscriber.lock().take();
    }

    async fn send_command(&self, command: NativeCommand) -> PlaybackResult<()> {
        self.commands
            .send(command)
            .map(|receivers| log::debug!("[Native] Command sent to {} helper(s)", receivers))
            .map_err(|_| PlaybackError::UpstreamUnavailable("no native helper connected".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(title: &str) -> NativeNowPlaying {
        NativeNowPlaying {
            title: title.to_string(),
            ..NativeNowPlaying::default()
        }
    }

    #[tokio::test]
    async fn subscriber_gets_latest_then_updates() {
        let bridge = ChannelBridge::default();
        bridge.publish(Some(song("first")));

        let mut rx = bridge.subscribe();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().title, "first");

        bridge.publish(None);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), None);
    }

    #[tokio::test]
    async fn fresh_subscriber_without_state_waits() {
        let bridge = ChannelBridge::default();
        let rx = bridge.subscribe();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn burst_keeps_only_the_newest_update() {
        let bridge = ChannelBridge::default();
        let mut rx = bridge.subscribe();
        for n in 0..100 {
            bridge.publish(Some(song(&format!("song {n}"))));
        }

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().title, "song 99");
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn unsubscribe_ends_receiver() {
        let bridge = ChannelBridge::default();
        let mut rx = bridge.subscribe();
        bridge.unsubscribe();
        assert!(rx.changed().await.is_err());
        assert!(!bridge.has_subscriber());
    }

    #[tokio::test]
    async fn commands_need_a_helper() {
        let bridge = ChannelBridge::default();
        assert!(matches!(
            bridge.send_command(NativeCommand::Play).await,
            Err(PlaybackError::UpstreamUnavailable(_))
        ));

        let mut helper = bridge.commands();
        bridge
            .send_command(NativeCommand::SetVolume { percent: 40 })
            .await
            .unwrap();
        assert_eq!(helper.recv().await.unwrap(), NativeCommand::SetVolume { percent: 40 });
    }

    #[test]
    fn command_wire_format() {
        let json = serde_json::to_value(NativeCommand::SetVolume { percent: 5 }).unwrap();
        assert_eq!(json, serde_json::json!({"command": "setVolume", "percent": 5}));
    }
}
