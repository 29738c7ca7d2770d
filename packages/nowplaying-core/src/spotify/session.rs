//! One connected Spotify session: dealer socket + current snapshot.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::api::SpotifyApi;
use super::auth::TokenSource;
use super::dealer::{self, DealerMessage};
use super::mapping::{map_player_state, PlayerState};
use super::SpotifyResult;
use crate::playback::{Capability, HandlerEvents, PlaybackData};
use crate::runtime::{ScheduledTask, TaskSpawner, TokioSpawner};

/// Everything a session needs to connect.
pub(super) struct SessionParams {
    pub api: Arc<SpotifyApi>,
    pub dealer_tokens: Arc<dyn TokenSource>,
    pub dealer_url: String,
    pub ping_interval: Duration,
    pub extra: Vec<Capability>,
}

struct SessionState {
    api: Arc<SpotifyApi>,
    extra: Vec<Capability>,
    events: HandlerEvents,
    snapshot: RwLock<Option<PlaybackData>>,
}

impl SessionState {
    fn publish(&self, snapshot: Option<PlaybackData>) {
        *self.snapshot.write() = snapshot.clone();
        self.events.playback(snapshot);
    }

    /// Fills in fields the dealer omits for non-track media.
    async fn complete(&self, mut state: PlayerState) -> PlayerState {
        if !state.needs_full_fetch() {
            return state;
        }
        match state.item.as_ref().and_then(|item| item.id.clone()) {
            Some(id) => match self.api.episode(&id).await {
                Ok(item) => state.item = Some(item),
                Err(e) => log::warn!("[Spotify] Episode fetch for {} failed: {}", id, e),
            },
            None => match self.api.player_state().await {
                Ok(Some(full)) => return full,
                Ok(None) => state.item = None,
                Err(e) => log::warn!("[Spotify] Player state fetch failed: {}", e),
            },
        }
        state
    }

    async fn refresh(&self) -> SpotifyResult<()> {
        let snapshot = match self.api.player_state().await? {
            Some(state) => {
                let state = self.complete(state).await;
                map_player_state(&state, &self.extra)
            }
            None => None,
        };
        self.publish(snapshot);
        Ok(())
    }

    async fn handle(&self, message: DealerMessage) {
        match message {
            DealerMessage::PlayerStateChanged(state) => {
                let state = self.complete(*state).await;
                self.publish(map_player_state(&state, &self.extra));
            }
            DealerMessage::DeviceStateChanged { any_active: false } => {
                log::debug!("[Spotify] No active device, clearing snapshot");
                self.publish(None);
            }
            DealerMessage::DeviceStateChanged { any_active: true }
            | DealerMessage::Connection(_)
            | DealerMessage::Pong
            | DealerMessage::Other => {}
        }
    }
}

/// A live session. Dropping it (or calling [`SpotifySession::stop`]) closes
/// the dealer socket without emitting `close`.
pub(super) struct SpotifySession {
    state: Arc<SessionState>,
    dealer: ScheduledTask,
}

impl SpotifySession {
    /// Connects the dealer, registers the connection, publishes the initial
    /// snapshot and starts the reader. Emits `open` once running.
    pub async fn start(
        params: SessionParams,
        events: HandlerEvents,
        spawner: &TokioSpawner,
    ) -> SpotifyResult<Self> {
        let token = params.dealer_tokens.token().await?;
        let connection = dealer::connect(&params.dealer_url, &token).await?;
        params
            .api
            .subscribe_player_notifications(connection.connection_id(), &token)
            .await?;

        let state = Arc::new(SessionState {
            api: params.api,
            extra: params.extra,
            events,
            snapshot: RwLock::new(None),
        });
        state.refresh().await?;

        let task_state = Arc::clone(&state);
        let ping_interval = params.ping_interval;
        let dealer = spawner.spawn("spotify-dealer", async move {
            let result = dealer::run(connection, ping_interval, |message| {
                let state = Arc::clone(&task_state);
                async move { state.handle(message).await }
            })
            .await;

            if let Err(e) = result {
                log::warn!("[Spotify] Dealer socket failed: {}", e);
                task_state.events.error(e.to_string());
            }
            task_state.events.close();
        });

        state.events.open();
        Ok(Self { state, dealer })
    }

    pub fn snapshot(&self) -> Option<PlaybackData> {
        self.state.snapshot.read().clone()
    }

    pub fn api(&self) -> &Arc<SpotifyApi> {
        &self.state.api
    }

    pub fn stop(&self) {
        self.dealer.cancel();
    }
}
