//! Owner of the single active playback handler.
//!
//! The manager serializes activation, forwards the active handler's events
//! to the [`EventEmitter`], delegates commands and queries, and runs the
//! reconnect policy when a handler's realtime channel drops.
//!
//! # Exclusivity
//!
//! `activate` holds an async mutex for its whole duration. The previous
//! handler is detached and its `cleanup` awaited before the next one is even
//! constructed, so two handlers are never subscribed upstream at once.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use super::handler::{
    HandlerConfig, HandlerEvent, HandlerEvents, HandlerFactory, HandlerState, PlaybackHandler,
};
use super::types::{
    CommandResult, Device, LibraryItem, Page, PageRequest, PlaybackData, RepeatMode, TrackItem,
};
use crate::error::{PlaybackError, PlaybackResult};
use crate::events::{EventEmitter, HandlerStatusEvent, PlaybackEvent};
use crate::lyrics::LyricsResult;
use crate::protocol_constants::HANDLER_NONE;
use crate::runtime::{ScheduledTask, TaskSpawner, TokioSpawner};
use crate::state::Config;
use crate::utils::now_millis;

/// When and how often a dropped handler is re-activated.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

struct ActiveHandler {
    name: String,
    handler: Arc<dyn PlaybackHandler>,
    generation: u64,
    /// Relays handler events; dropping it detaches the handler.
    forwarder: ScheduledTask,
}

/// Single point of truth for which backend is active.
pub struct PlaybackManager {
    this: Weak<Self>,
    factory: Arc<dyn HandlerFactory>,
    emitter: Arc<dyn EventEmitter>,
    spawner: TokioSpawner,
    policy: ReconnectPolicy,
    /// Held across the whole activate/teardown sequence.
    activation: tokio::sync::Mutex<()>,
    active: RwLock<Option<ActiveHandler>>,
    state: RwLock<HandlerState>,
    generation: AtomicU64,
    reconnect: Mutex<Option<ScheduledTask>>,
    attempts: AtomicU32,
}

impl PlaybackManager {
    pub fn new(
        factory: Arc<dyn HandlerFactory>,
        emitter: Arc<dyn EventEmitter>,
        spawner: TokioSpawner,
        policy: ReconnectPolicy,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            factory,
            emitter,
            spawner,
            policy,
            activation: tokio::sync::Mutex::new(()),
            active: RwLock::new(None),
            state: RwLock::new(HandlerState::Idle),
            generation: AtomicU64::new(0),
            reconnect: Mutex::new(None),
            attempts: AtomicU32::new(0),
        })
    }

    /// Name of the active handler, if any.
    #[must_use]
    pub fn active_name(&self) -> Option<String> {
        self.active.read().as_ref().map(|a| a.name.clone())
    }

    #[must_use]
    pub fn state(&self) -> HandlerState {
        *self.state.read()
    }

    /// Handler names the factory can construct.
    #[must_use]
    pub fn available_handlers(&self) -> Vec<&'static str> {
        self.factory.available()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Activation
    // ─────────────────────────────────────────────────────────────────────────

    /// Switches to `name` (or to no handler for `"none"`).
    ///
    /// Any pending reconnect is cancelled. The current handler is cleaned up
    /// before the new one is constructed. On invalid configuration the
    /// manager is left with no active handler and
    /// [`PlaybackError::ConfigInvalid`] is returned.
    pub async fn activate(&self, name: &str, config: HandlerConfig) -> PlaybackResult<()> {
        // A reconnect only runs activation steps while holding this lock, so
        // cancelling it here never interrupts a half-finished setup.
        let _guard = self.activation.lock().await;
        self.cancel_reconnect();
        self.attempts.store(0, Ordering::SeqCst);
        self.activate_locked(name, config).await
    }

    /// Like [`activate`](Self::activate), but a failure other than invalid
    /// configuration hands `name` to the reconnect policy instead of giving
    /// up. The first error is still returned.
    pub async fn activate_or_retry(&self, name: &str, config: HandlerConfig) -> PlaybackResult<()> {
        let result = self.activate(name, config.clone()).await;
        if let Err(ref e) = result {
            if !matches!(e, PlaybackError::ConfigInvalid(_)) {
                log::warn!("[Manager] Activation of '{}' failed, will retry: {}", name, e);
                self.schedule_reconnect(name.to_string(), config, None);
            }
        }
        result
    }

    /// Leaves no handler active.
    pub async fn deactivate(&self) {
        // Activating "none" cannot fail
        let _ = self.activate(HANDLER_NONE, HandlerConfig::default()).await;
    }

    /// Cancels the reconnect timer and tears down the active handler.
    pub async fn shutdown(&self) {
        let _guard = self.activation.lock().await;
        self.cancel_reconnect();
        self.teardown().await;
        log::info!("[Manager] Shut down");
    }

    /// Caller holds `activation`.
    async fn activate_locked(&self, name: &str, config: HandlerConfig) -> PlaybackResult<()> {
        self.teardown().await;

        if name == HANDLER_NONE {
            log::info!("[Manager] No handler active");
            return Ok(());
        }

        let Some(handler) = self.factory.create(name) else {
            return Err(PlaybackError::ConfigInvalid(format!(
                "unknown handler '{name}'"
            )));
        };

        self.set_state(HandlerState::Configuring);
        log::info!("[Manager] Validating configuration for '{}'", name);

        if let Err(e) = handler.validate_config(&config).await {
            log::warn!("[Manager] Validation of '{}' failed: {}", name, e);
            self.set_state(HandlerState::Idle);
            return Err(e);
        }

        let (events, rx) = HandlerEvents::channel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Err(e) = handler.setup(&config, events).await {
            log::warn!("[Manager] Setup of '{}' failed: {}", name, e);
            handler.cleanup().await;
            self.set_state(HandlerState::Idle);
            return Err(e);
        }

        let forwarder = self.spawn_forwarder(name.to_string(), config, generation, rx);
        *self.active.write() = Some(ActiveHandler {
            name: name.to_string(),
            handler,
            generation,
            forwarder,
        });
        self.set_state(HandlerState::Active);

        log::info!("[Manager] Activated '{}'", name);
        self.emitter.emit_handler(HandlerStatusEvent::Activated {
            handler: name.to_string(),
            timestamp: now_millis(),
        });
        Ok(())
    }

    /// Detaches and cleans up the active handler. Caller holds `activation`.
    async fn teardown(&self) {
        let Some(active) = self.active.write().take() else {
            return;
        };
        let ActiveHandler {
            name,
            handler,
            forwarder,
            ..
        } = active;

        self.set_state(HandlerState::Closing);
        forwarder.cancel();
        drop(forwarder);

        handler.cleanup().await;
        self.set_state(HandlerState::Idle);

        log::info!("[Manager] Cleaned up '{}'", name);
        self.emitter.emit_playback(PlaybackEvent::updated(None));
        self.emitter.emit_handler(HandlerStatusEvent::Deactivated {
            handler: name,
            timestamp: now_millis(),
        });
    }

    fn set_state(&self, state: HandlerState) {
        *self.state.write() = state;
    }

    fn spawn_forwarder(
        &self,
        name: String,
        config: HandlerConfig,
        generation: u64,
        mut rx: mpsc::UnboundedReceiver<HandlerEvent>,
    ) -> ScheduledTask {
        let emitter = Arc::clone(&self.emitter);
        let manager = self.this.clone();

        self.spawner.spawn("handler-events", async move {
            while let Some(event) = rx.recv().await {
                match event {
                    HandlerEvent::Playback(data) => {
                        emitter.emit_playback(PlaybackEvent::updated(data));
                    }
                    HandlerEvent::Open => {
                        log::info!("[Manager] Handler '{}' connected", name);
                        if let Some(manager) = manager.upgrade() {
                            manager.attempts.store(0, Ordering::SeqCst);
                        }
                        emitter.emit_handler(HandlerStatusEvent::Connected {
                            handler: name.clone(),
                            timestamp: now_millis(),
                        });
                    }
                    HandlerEvent::Error(message) => {
                        log::warn!("[Manager] Handler '{}' reported: {}", name, message);
                        emitter.emit_handler(HandlerStatusEvent::Error {
                            handler: name.clone(),
                            message,
                            timestamp: now_millis(),
                        });
                    }
                    HandlerEvent::Close => {
                        log::warn!("[Manager] Handler '{}' connection closed", name);
                        emitter.emit_handler(HandlerStatusEvent::Disconnected {
                            handler: name.clone(),
                            timestamp: now_millis(),
                        });
                        if let Some(manager) = manager.upgrade() {
                            manager.schedule_reconnect(name.clone(), config.clone(), Some(generation));
                        }
                        break;
                    }
                }
            }
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reconnect
    // ─────────────────────────────────────────────────────────────────────────

    fn cancel_reconnect(&self) {
        if let Some(task) = self.reconnect.lock().take() {
            task.cancel();
        }
    }

    /// Cleans up the dropped handler (if `generation` is still active), then
    /// re-activates it after the policy delay until it succeeds, the config
    /// turns out invalid, or the attempt cap is reached.
    fn schedule_reconnect(&self, name: String, config: HandlerConfig, generation: Option<u64>) {
        self.set_state(HandlerState::Faulted);
        let manager = self.this.clone();
        let policy = self.policy.clone();

        let task = self.spawner.spawn("reconnect", async move {
            if let (Some(this), Some(generation)) = (manager.upgrade(), generation) {
                this.teardown_generation(generation).await;
            }

            loop {
                let Some(this) = manager.upgrade() else {
                    return;
                };
                let attempt = this.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if policy.max_attempts.is_some_and(|max| attempt > max) {
                    log::error!(
                        "[Manager] Giving up on '{}' after {} reconnect attempts",
                        name,
                        attempt - 1
                    );
                    this.set_state(HandlerState::Idle);
                    this.emitter.emit_playback(PlaybackEvent::updated(None));
                    return;
                }

                this.set_state(HandlerState::Faulted);
                log::info!(
                    "[Manager] Reconnecting '{}' in {:?} (attempt {})",
                    name,
                    policy.delay,
                    attempt
                );
                drop(this);
                tokio::time::sleep(policy.delay).await;

                let Some(this) = manager.upgrade() else {
                    return;
                };
                let result = {
                    let _guard = this.activation.lock().await;
                    this.activate_locked(&name, config.clone()).await
                };
                match result {
                    Ok(()) => return,
                    Err(PlaybackError::ConfigInvalid(msg)) => {
                        log::error!("[Manager] Not reconnecting '{}': {}", name, msg);
                        return;
                    }
                    Err(e) => {
                        log::warn!("[Manager] Reconnect of '{}' failed: {}", name, e);
                    }
                }
            }
        });

        if let Some(previous) = self.reconnect.lock().replace(task) {
            previous.cancel();
        }
    }

    /// Tears down the active handler only if it is still `generation`.
    async fn teardown_generation(&self, generation: u64) {
        let _guard = self.activation.lock().await;
        let current = self.active.read().as_ref().map(|a| a.generation);
        if current == Some(generation) {
            self.teardown().await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Delegation
    // ─────────────────────────────────────────────────────────────────────────

    fn current(&self) -> Option<Arc<dyn PlaybackHandler>> {
        self.active.read().as_ref().map(|a| Arc::clone(&a.handler))
    }

    async fn command<F, Fut>(&self, action: &str, f: F)
    where
        F: FnOnce(Arc<dyn PlaybackHandler>) -> Fut,
        Fut: Future<Output = PlaybackResult<()>>,
    {
        let Some(handler) = self.current() else {
            log::debug!("[Manager] Ignoring '{}': no active handler", action);
            return;
        };
        match f(handler).await {
            Ok(()) => {}
            Err(e) if e.is_unsupported() => {
                log::debug!("[Manager] '{}' not supported by active handler", action);
            }
            Err(e) => log::warn!("[Manager] '{}' failed: {}", action, e),
        }
    }

    async fn query<T, F, Fut>(&self, what: &str, f: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn PlaybackHandler>) -> Fut,
        Fut: Future<Output = PlaybackResult<T>>,
    {
        let handler = self.current()?;
        match f(handler).await {
            Ok(value) => Some(value),
            Err(e) if e.is_unsupported() => None,
            Err(e) => {
                log::warn!("[Manager] Query '{}' failed: {}", what, e);
                None
            }
        }
    }

    pub async fn get_snapshot(&self) -> Option<PlaybackData> {
        self.query("snapshot", |h| async move { h.get_snapshot().await })
            .await
            .flatten()
    }

    pub async fn get_image(&self) -> Option<Bytes> {
        self.query("image", |h| async move { h.get_image().await })
            .await
            .flatten()
    }

    pub async fn get_lyrics(&self) -> Option<LyricsResult> {
        self.query("lyrics", |h| async move { h.get_lyrics().await })
            .await
    }

    pub async fn play(&self) {
        self.command("play", |h| async move { h.play().await }).await;
    }

    pub async fn pause(&self) {
        self.command("pause", |h| async move { h.pause().await }).await;
    }

    pub async fn set_volume(&self, percent: u8, device_id: Option<&str>) {
        let percent = percent.min(100);
        self.command("volume", |h| async move { h.set_volume(percent, device_id).await })
            .await;
    }

    pub async fn next(&self) {
        self.command("next", |h| async move { h.next().await }).await;
    }

    pub async fn previous(&self) {
        self.command("previous", |h| async move { h.previous().await }).await;
    }

    pub async fn set_shuffle(&self, state: bool) {
        self.command("shuffle", |h| async move { h.set_shuffle(state).await })
            .await;
    }

    pub async fn set_repeat(&self, mode: RepeatMode) {
        self.command("repeat", |h| async move { h.set_repeat(mode).await })
            .await;
    }

    pub async fn list_playlists(&self, page: PageRequest) -> Option<Page<LibraryItem>> {
        self.query("playlists", |h| async move { h.list_playlists(page).await })
            .await
    }

    pub async fn list_albums(&self, page: PageRequest) -> Option<Page<LibraryItem>> {
        self.query("albums", |h| async move { h.list_albums(page).await })
            .await
    }

    pub async fn list_liked_songs(&self, page: PageRequest) -> Option<Page<TrackItem>> {
        self.query("likedSongs", |h| async move { h.list_liked_songs(page).await })
            .await
    }

    pub async fn list_playlist_tracks(&self, id: &str, page: PageRequest) -> Option<Page<TrackItem>> {
        self.query("playlistTracks", |h| async move {
            h.list_playlist_tracks(id, page).await
        })
        .await
    }

    pub async fn list_album_tracks(&self, id: &str, page: PageRequest) -> Option<Page<TrackItem>> {
        self.query("albumTracks", |h| async move {
            h.list_album_tracks(id, page).await
        })
        .await
    }

    pub async fn play_playlist(&self, id: &str) {
        self.command("playPlaylist", |h| async move { h.play_playlist(id).await })
            .await;
    }

    pub async fn play_album(&self, id: &str) {
        self.command("playAlbum", |h| async move { h.play_album(id).await })
            .await;
    }

    pub async fn play_track(
        &self,
        id: &str,
        context_type: Option<&str>,
        context_id: Option<&str>,
    ) -> CommandResult {
        self.outcome("playTrack", |h| async move {
            h.play_track(id, context_type, context_id).await
        })
        .await
    }

    pub async fn list_devices(&self) -> Vec<Device> {
        self.query("devices", |h| async move { h.list_devices().await })
            .await
            .unwrap_or_default()
    }

    pub async fn transfer_playback(&self, device_id: &str, play: Option<bool>) -> CommandResult {
        self.outcome("transferPlayback", |h| async move {
            h.transfer_playback(device_id, play).await
        })
        .await
    }

    /// Runs a command whose outcome is reported back to the client.
    async fn outcome<F, Fut>(&self, action: &str, f: F) -> CommandResult
    where
        F: FnOnce(Arc<dyn PlaybackHandler>) -> Fut,
        Fut: Future<Output = PlaybackResult<()>>,
    {
        let Some(handler) = self.current() else {
            return CommandResult::failed("No active handler");
        };
        match f(handler).await {
            Ok(()) => CommandResult::ok(),
            Err(e) => {
                if !e.is_unsupported() {
                    log::warn!("[Manager] '{}' failed: {}", action, e);
                }
                CommandResult::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Default)]
    struct MockHandler {
        name: &'static str,
        setup_calls: AtomicUsize,
        cleanup_calls: AtomicUsize,
        configs: Mutex<Vec<HandlerConfig>>,
        events: Mutex<Option<HandlerEvents>>,
        fail_setup: bool,
        /// Validation reports the upstream as unreachable.
        unreachable: bool,
        /// Setup blocks until notified.
        setup_gate: Option<Arc<tokio::sync::Notify>>,
        commands: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl PlaybackHandler for MockHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn validate_config(&self, config: &HandlerConfig) -> PlaybackResult<()> {
            if self.unreachable {
                return Err(PlaybackError::UpstreamUnavailable("accounts service down".into()));
            }
            if config.as_value().get("valid") == Some(&json!(true)) {
                Ok(())
            } else {
                Err(PlaybackError::ConfigInvalid("not valid".into()))
            }
        }

        async fn setup(&self, config: &HandlerConfig, events: HandlerEvents) -> PlaybackResult<()> {
            self.setup_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.setup_gate {
                gate.notified().await;
            }
            if self.fail_setup {
                return Err(PlaybackError::Setup("upstream down".into()));
            }
            self.configs.lock().push(config.clone());
            events.open();
            *self.events.lock() = Some(events);
            Ok(())
        }

        async fn cleanup(&self) {
            self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
            self.events.lock().take();
        }

        async fn get_snapshot(&self) -> PlaybackResult<Option<PlaybackData>> {
            Ok(Some(PlaybackData::default()))
        }

        async fn get_image(&self) -> PlaybackResult<Option<Bytes>> {
            Ok(None)
        }

        async fn play(&self) -> PlaybackResult<()> {
            self.commands.lock().push("play");
            Ok(())
        }

        async fn pause(&self) -> PlaybackResult<()> {
            self.commands.lock().push("pause");
            Ok(())
        }

        async fn set_volume(&self, _percent: u8, _device_id: Option<&str>) -> PlaybackResult<()> {
            self.commands.lock().push("volume");
            Ok(())
        }

        async fn next(&self) -> PlaybackResult<()> {
            Ok(())
        }

        async fn previous(&self) -> PlaybackResult<()> {
            Ok(())
        }

        async fn set_shuffle(&self, _state: bool) -> PlaybackResult<()> {
            Err(PlaybackError::unsupported("shuffle"))
        }

        async fn set_repeat(&self, _mode: RepeatMode) -> PlaybackResult<()> {
            Err(PlaybackError::unsupported("repeat"))
        }
    }

    #[derive(Default)]
    struct MockFactory {
        created: Mutex<Vec<Arc<MockHandler>>>,
        fail_setup: AtomicBool,
        /// Number of upcoming handlers whose validation hits an outage.
        outages: AtomicUsize,
        setup_gate: Mutex<Option<Arc<tokio::sync::Notify>>>,
    }

    impl MockFactory {
        fn created_named(&self, name: &str) -> Vec<Arc<MockHandler>> {
            self.created
                .lock()
                .iter()
                .filter(|h| h.name == name)
                .cloned()
                .collect()
        }
    }

    impl HandlerFactory for MockFactory {
        fn create(&self, name: &str) -> Option<Arc<dyn PlaybackHandler>> {
            let name = match name {
                "a" => "a",
                "b" => "b",
                _ => return None,
            };
            let unreachable = self
                .outages
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let handler = Arc::new(MockHandler {
                name,
                fail_setup: self.fail_setup.load(Ordering::SeqCst),
                unreachable,
                setup_gate: self.setup_gate.lock().clone(),
                ..MockHandler::default()
            });
            self.created.lock().push(Arc::clone(&handler));
            Some(handler)
        }

        fn available(&self) -> Vec<&'static str> {
            vec!["a", "b"]
        }
    }

    #[derive(Default)]
    struct RecordingEmitter {
        playback: Mutex<Vec<Option<PlaybackData>>>,
        handler: Mutex<Vec<HandlerStatusEvent>>,
    }

    impl EventEmitter for RecordingEmitter {
        fn emit_playback(&self, event: PlaybackEvent) {
            let PlaybackEvent::Updated { data, .. } = event;
            self.playback.lock().push(data);
        }

        fn emit_handler(&self, event: HandlerStatusEvent) {
            self.handler.lock().push(event);
        }
    }

    fn valid() -> HandlerConfig {
        HandlerConfig::new(json!({"valid": true, "token": "abc"}))
    }

    fn invalid() -> HandlerConfig {
        HandlerConfig::new(json!({"valid": false}))
    }

    fn manager_with(
        policy: ReconnectPolicy,
    ) -> (Arc<PlaybackManager>, Arc<MockFactory>, Arc<RecordingEmitter>) {
        let factory = Arc::new(MockFactory::default());
        let emitter = Arc::new(RecordingEmitter::default());
        let manager = PlaybackManager::new(
            factory.clone(),
            emitter.clone(),
            TokioSpawner::current(),
            policy,
        );
        (manager, factory, emitter)
    }

    fn manager() -> (Arc<PlaybackManager>, Arc<MockFactory>, Arc<RecordingEmitter>) {
        manager_with(ReconnectPolicy {
            delay: Duration::from_secs(5),
            max_attempts: None,
        })
    }

    #[tokio::test]
    async fn activate_makes_handler_active() {
        let (manager, factory, _) = manager();
        manager.activate("a", valid()).await.unwrap();

        assert_eq!(manager.active_name().as_deref(), Some("a"));
        assert_eq!(manager.state(), HandlerState::Active);
        assert_eq!(factory.created_named("a")[0].setup_calls.load(Ordering::SeqCst), 1);
        assert!(manager.get_snapshot().await.is_some());
    }

    #[tokio::test]
    async fn invalid_config_cleans_previous_and_ends_in_none() {
        let (manager, factory, emitter) = manager();
        manager.activate("a", valid()).await.unwrap();

        let err = manager.activate("b", invalid()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::ConfigInvalid(_)));

        let a = &factory.created_named("a")[0];
        let b = &factory.created_named("b")[0];
        assert_eq!(a.cleanup_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.setup_calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.cleanup_calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.active_name(), None);
        assert_eq!(manager.state(), HandlerState::Idle);
        assert_eq!(emitter.playback.lock().last(), Some(&None));
    }

    #[tokio::test]
    async fn unknown_handler_is_config_invalid() {
        let (manager, _, _) = manager();
        let err = manager.activate("zzz", valid()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::ConfigInvalid(_)));
        assert_eq!(manager.active_name(), None);
    }

    #[tokio::test]
    async fn none_deactivates() {
        let (manager, factory, _) = manager();
        manager.activate("a", valid()).await.unwrap();
        manager.deactivate().await;

        assert_eq!(manager.active_name(), None);
        assert_eq!(factory.created_named("a")[0].cleanup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn setup_failure_releases_resources() {
        let (manager, factory, _) = manager();
        factory.fail_setup.store(true, Ordering::SeqCst);

        let err = manager.activate("a", valid()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Setup(_)));
        assert_eq!(factory.created_named("a")[0].cleanup_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_name(), None);
    }

    #[tokio::test]
    async fn commands_without_handler_are_noops() {
        let (manager, _, _) = manager();
        manager.play().await;
        manager.set_volume(50, None).await;
        assert!(manager.get_snapshot().await.is_none());
        assert!(manager.get_lyrics().await.is_none());
        assert!(manager.list_devices().await.is_empty());
        assert!(!manager.play_track("t", None, None).await.success);
    }

    #[tokio::test]
    async fn commands_are_delegated_and_unsupported_is_tolerated() {
        let (manager, factory, _) = manager();
        manager.activate("a", valid()).await.unwrap();

        manager.play().await;
        manager.set_shuffle(true).await;
        manager.set_volume(250, Some("dev")).await;

        let a = &factory.created_named("a")[0];
        assert_eq!(*a.commands.lock(), vec!["play", "volume"]);
        assert!(manager.get_lyrics().await.is_none());
        assert_eq!(manager.active_name().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn open_is_tagged_with_handler_name() {
        let (manager, _, emitter) = manager();
        manager.activate("a", valid()).await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = emitter.handler.lock();
        assert!(events
            .iter()
            .any(|e| matches!(e, HandlerStatusEvent::Connected { handler, .. } if handler == "a")));
    }

    #[tokio::test(start_paused = true)]
    async fn close_reactivates_same_handler_after_delay() {
        let (manager, factory, emitter) = manager();
        manager.activate("a", valid()).await.unwrap();

        let events = factory.created_named("a")[0].events.lock().clone().unwrap();
        events.close();

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(factory.created_named("a").len(), 1);
        assert_eq!(factory.created_named("a")[0].cleanup_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), HandlerState::Faulted);
        assert!(emitter.playback.lock().contains(&None));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let created = factory.created_named("a");
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].configs.lock().first(), Some(&valid()));
        assert_eq!(manager.active_name().as_deref(), Some("a"));
        assert_eq!(manager.state(), HandlerState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_stops_at_attempt_cap() {
        let (manager, factory, _) = manager_with(ReconnectPolicy {
            delay: Duration::from_secs(1),
            max_attempts: Some(2),
        });
        manager.activate("a", valid()).await.unwrap();
        factory.fail_setup.store(true, Ordering::SeqCst);

        let events = factory.created_named("a")[0].events.lock().clone().unwrap();
        events.close();

        tokio::time::sleep(Duration::from_secs(30)).await;
        // initial + two failed attempts
        assert_eq!(factory.created_named("a").len(), 3);
        assert_eq!(manager.active_name(), None);
        assert_eq!(manager.state(), HandlerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn outage_during_reconnect_keeps_retrying() {
        let (manager, factory, _) = manager();
        manager.activate("a", valid()).await.unwrap();
        factory.outages.store(1, Ordering::SeqCst);

        let events = factory.created_named("a")[0].events.lock().clone().unwrap();
        events.close();

        tokio::time::sleep(Duration::from_millis(5100)).await;
        let created = factory.created_named("a");
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].setup_calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.active_name(), None);
        assert_eq!(manager.state(), HandlerState::Faulted);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(factory.created_named("a").len(), 3);
        assert_eq!(manager.active_name().as_deref(), Some("a"));
        assert_eq!(manager.state(), HandlerState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn activate_or_retry_recovers_after_outage() {
        let (manager, factory, _) = manager();
        factory.outages.store(1, Ordering::SeqCst);

        let err = manager.activate_or_retry("a", valid()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::UpstreamUnavailable(_)));
        assert_eq!(manager.state(), HandlerState::Faulted);

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(manager.active_name().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn activate_or_retry_gives_up_on_invalid_config() {
        let (manager, factory, _) = manager();
        let err = manager.activate_or_retry("a", invalid()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::ConfigInvalid(_)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(factory.created_named("a").len(), 1);
        assert_eq!(manager.state(), HandlerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_activate_waits_for_in_flight_reconnect() {
        let (manager, factory, _) = manager();
        manager.activate("a", valid()).await.unwrap();

        let gate = Arc::new(tokio::sync::Notify::new());
        *factory.setup_gate.lock() = Some(Arc::clone(&gate));
        let events = factory.created_named("a")[0].events.lock().clone().unwrap();
        events.close();

        tokio::time::sleep(Duration::from_millis(5100)).await;
        let reconnecting = Arc::clone(&factory.created_named("a")[1]);
        assert_eq!(reconnecting.setup_calls.load(Ordering::SeqCst), 1);
        factory.setup_gate.lock().take();

        let switch = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.activate("b", valid()).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!switch.is_finished());
        assert!(factory.created_named("b").is_empty());

        gate.notify_one();
        switch.await.unwrap().unwrap();

        assert_eq!(reconnecting.cleanup_calls.load(Ordering::SeqCst), 1);
        assert!(reconnecting.events.lock().is_none());
        assert_eq!(manager.active_name().as_deref(), Some("b"));
        assert_eq!(factory.created_named("a").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_activate_cancels_pending_reconnect() {
        let (manager, factory, _) = manager();
        manager.activate("a", valid()).await.unwrap();

        let events = factory.created_named("a")[0].events.lock().clone().unwrap();
        events.close();
        tokio::time::sleep(Duration::from_millis(100)).await;

        manager.activate("b", valid()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(factory.created_named("a").len(), 1);
        assert_eq!(manager.active_name().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn superseded_handler_cannot_emit() {
        let (manager, factory, emitter) = manager();
        manager.activate("a", valid()).await.unwrap();
        let stale = factory.created_named("a")[0].events.lock().clone().unwrap();

        manager.activate("b", valid()).await.unwrap();
        let before = emitter.playback.lock().len();
        stale.playback(Some(PlaybackData::default()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(stale.is_detached());
        assert_eq!(emitter.playback.lock().len(), before);
    }
}
