//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where the
//! handler factory, manager, lyrics cache, and transport state are
//! instantiated and wired together.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;

use crate::api::{AppState, WsConnectionManager};
use crate::cache::Cache;
use crate::error::{PlaybackError, PlaybackResult};
use crate::events::{BroadcastEventBridge, EventEmitter, LoggingEventEmitter};
use crate::lyrics::{LrclibFetcher, LyricsResult, LyricsService};
use crate::native::{ChannelBridge, NativeHandler, NowPlayingBridge};
use crate::playback::{
    HandlerFactory, HandlerKind, PlaybackHandler, PlaybackManager, ReconnectPolicy,
};
use crate::protocol_constants::HANDLER_NONE;
use crate::runtime::{ScheduledTask, TaskSpawner, TokioSpawner};
use crate::spotify::{SpotifyContext, SpotifyFreeHandler, SpotifyHandler};
use crate::state::Config;
use crate::store::{HandlerSettings, KeyValueStore};

// ─────────────────────────────────────────────────────────────────────────────
// Handler Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the three built-in handlers by name.
pub struct DefaultHandlerFactory {
    spotify: SpotifyContext,
    lyrics: Arc<LyricsService>,
    native_bridge: Arc<dyn NowPlayingBridge>,
}

impl DefaultHandlerFactory {
    pub fn new(
        spotify: SpotifyContext,
        lyrics: Arc<LyricsService>,
        native_bridge: Arc<dyn NowPlayingBridge>,
    ) -> Self {
        Self {
            spotify,
            lyrics,
            native_bridge,
        }
    }
}

impl HandlerFactory for DefaultHandlerFactory {
    fn create(&self, name: &str) -> Option<Arc<dyn PlaybackHandler>> {
        let handler: Arc<dyn PlaybackHandler> = match HandlerKind::from_name(name)? {
            HandlerKind::Spotify => Arc::new(SpotifyHandler::new(self.spotify.clone())),
            HandlerKind::SpotifyFree => Arc::new(SpotifyFreeHandler::relay(
                self.spotify.clone(),
                Arc::clone(&self.lyrics),
            )),
            HandlerKind::Native => Arc::new(NativeHandler::new(
                Arc::clone(&self.native_bridge),
                self.spotify.client.clone(),
                self.spotify.spawner.clone(),
            )),
        };
        Some(handler)
    }

    fn available(&self) -> Vec<&'static str> {
        HandlerKind::ALL.iter().map(|kind| kind.as_str()).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────────────────────────

/// Container for all bootstrapped services.
pub struct BootstrappedServices {
    /// Owns the active playback handler.
    pub manager: Arc<PlaybackManager>,
    /// Event bridge feeding WebSocket clients.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// In-process bridge the native handler reads from.
    pub native_bridge: Arc<ChannelBridge>,
    /// Persistent key/value store.
    pub store: Arc<dyn KeyValueStore>,
    /// Lyrics cache shared by every handler that offers lyrics.
    pub lyrics_cache: Arc<Cache<LyricsResult>>,
    pub config: Arc<Config>,
    /// Hourly cache sweep + persist.
    sweep_task: Mutex<Option<ScheduledTask>>,
}

impl BootstrappedServices {
    /// Shared state for the HTTP/WebSocket layer.
    #[must_use]
    pub fn app_state(&self) -> AppState {
        AppState {
            manager: Arc::clone(&self.manager),
            event_bridge: Arc::clone(&self.event_bridge),
            ws_manager: Arc::clone(&self.ws_manager),
            native_bridge: Arc::clone(&self.native_bridge),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }

    /// Re-activates a handler with its persisted configuration.
    ///
    /// `preferred` overrides the persisted selection. Returns the name of the
    /// handler that is active afterwards, or `None` if nothing was selected or
    /// activation failed (failure is logged, the stored settings are kept).
    /// An upstream outage leaves the handler with the reconnect policy, so it
    /// comes up once the upstream is reachable again.
    pub async fn restore_active_handler(&self, preferred: Option<&str>) -> Option<String> {
        let settings = HandlerSettings::new(self.store.as_ref());
        let name = match preferred {
            Some(name) => name.to_string(),
            None => settings.active_handler()?,
        };
        if name == HANDLER_NONE {
            return None;
        }

        let config = settings.handler_config(&name).unwrap_or_default();
        log::info!("[Bootstrap] Restoring handler '{}'", name);

        match self.manager.activate_or_retry(&name, config.clone()).await {
            Ok(()) => {
                if let Err(e) = settings.record_activation(&name, &config) {
                    log::warn!("[Bootstrap] Failed to persist handler selection: {}", e);
                }
                Some(name)
            }
            Err(e) => {
                log::warn!("[Bootstrap] Could not restore handler '{}': {}", name, e);
                None
            }
        }
    }

    /// Removes expired lyrics and persists the rest.
    pub async fn sweep_lyrics_cache(&self) {
        sweep_and_save(Arc::clone(&self.lyrics_cache), Arc::clone(&self.store)).await;
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        if let Some(task) = self.sweep_task.lock().take() {
            task.cancel();
        }

        self.manager.shutdown().await;
        self.sweep_lyrics_cache().await;

        let connections_closed = self.ws_manager.close_all();
        if connections_closed > 0 {
            log::info!(
                "[Bootstrap] Closed {} WebSocket connection(s)",
                connections_closed
            );
        }

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Sweeps the cache and writes it out on the blocking pool.
async fn sweep_and_save(cache: Arc<Cache<LyricsResult>>, store: Arc<dyn KeyValueStore>) {
    let result = tokio::task::spawn_blocking(move || {
        cache.clean();
        cache.save(store.as_ref())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("[Bootstrap] Failed to persist lyrics cache: {}", e),
        Err(e) => log::error!("[Bootstrap] Lyrics cache sweep task failed: {}", e),
    }
}

/// Creates the shared HTTP client for all upstream communication.
fn create_http_client(timeout: Duration) -> PlaybackResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PlaybackError::Setup(format!("failed to create HTTP client: {e}")))
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order:
///
/// 1. Shared infrastructure (HTTP client, spawner, event bridge)
/// 2. Lyrics cache, loaded from `store` and swept immediately
/// 3. Lyrics service and native bridge
/// 4. Handler factory and manager
/// 5. Periodic cache sweep
///
/// Must be called from within a tokio runtime. No handler is activated;
/// call [`BootstrappedServices::restore_active_handler`] afterwards.
///
/// # Errors
///
/// Returns [`PlaybackError::ConfigInvalid`] if `config` fails validation and
/// [`PlaybackError::Setup`] if the HTTP client cannot be built.
pub fn bootstrap_services(
    config: Config,
    store: Arc<dyn KeyValueStore>,
) -> PlaybackResult<BootstrappedServices> {
    config.validate().map_err(PlaybackError::ConfigInvalid)?;
    let config = Arc::new(config);

    let spawner = TokioSpawner::current();
    let http_client = create_http_client(config.http_timeout())?;
    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
    if log::log_enabled!(log::Level::Debug) {
        event_bridge.set_external_emitter(Arc::new(LoggingEventEmitter));
    }
    let ws_manager = Arc::new(WsConnectionManager::new());

    let lyrics_cache = Arc::new(LyricsService::new_cache(Duration::from_secs(
        config.lyrics_cache_expiration_secs,
    )));
    let loaded = lyrics_cache.load(store.as_ref());
    let expired = lyrics_cache.clean();
    log::info!(
        "[Bootstrap] Lyrics cache: {} loaded, {} expired",
        loaded,
        expired
    );

    let lyrics = Arc::new(LyricsService::new(
        Arc::clone(&lyrics_cache),
        Arc::new(LrclibFetcher::new(
            http_client.clone(),
            config.lyrics_base_url.clone(),
        )),
    ));
    let native_bridge = Arc::new(ChannelBridge::default());

    let factory = DefaultHandlerFactory::new(
        SpotifyContext {
            client: http_client.clone(),
            endpoints: config.spotify.clone(),
            spawner: spawner.clone(),
        },
        lyrics,
        Arc::clone(&native_bridge) as Arc<dyn NowPlayingBridge>,
    );
    let manager = PlaybackManager::new(
        Arc::new(factory),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        spawner.clone(),
        ReconnectPolicy::from_config(&config),
    );

    let sweep_task = {
        let cache = Arc::clone(&lyrics_cache);
        let store = Arc::clone(&store);
        spawner.spawn_interval("lyrics-cache-sweep", config.cache_sweep_interval(), move || {
            sweep_and_save(Arc::clone(&cache), Arc::clone(&store))
        })
    };

    Ok(BootstrappedServices {
        manager,
        event_bridge,
        ws_manager,
        native_bridge,
        store,
        lyrics_cache,
        config,
        sweep_task: Mutex::new(Some(sweep_task)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::playback::{HandlerConfig, HandlerState};
    use crate::protocol_constants::LYRICS_CACHE_STORAGE_KEY;
    use crate::store::MemoryStore;
    use crate::utils::now_millis;
    use serde_json::json;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn factory_offers_all_handlers() {
        let services = bootstrap_services(Config::default(), store()).unwrap();
        assert_eq!(
            services.manager.available_handlers(),
            vec!["spotify", "spotify-free", "native"]
        );
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let config = Config {
            event_channel_capacity: 0,
            ..Config::default()
        };
        let err = bootstrap_services(config, store()).err().unwrap();
        assert!(matches!(err, PlaybackError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn startup_drops_expired_lyrics() {
        let store = store();
        let day_ms = 24 * 60 * 60 * 1000;
        let seeded = LyricsService::new_cache(Duration::from_secs(24 * 60 * 60));
        seeded.insert_entry(
            "old",
            CacheEntry {
                data: LyricsResult::message("stale"),
                timestamp: now_millis() - 2 * day_ms,
            },
        );
        seeded.set("fresh", LyricsResult::message("kept"));
        seeded.save(store.as_ref()).unwrap();

        let services = bootstrap_services(Config::default(), store).unwrap();
        assert_eq!(services.lyrics_cache.len(), 1);
        assert!(services.lyrics_cache.get("fresh").is_some());
    }

    #[tokio::test]
    async fn restores_persisted_handler() {
        let store = store();
        HandlerSettings::new(store.as_ref())
            .record_activation("native", &HandlerConfig::new(json!({})))
            .unwrap();

        let services = bootstrap_services(Config::default(), store).unwrap();
        assert_eq!(
            services.restore_active_handler(None).await.as_deref(),
            Some("native")
        );
        assert_eq!(services.manager.active_name().as_deref(), Some("native"));
        services.shutdown().await;
        assert_eq!(services.manager.active_name(), None);
    }

    #[tokio::test]
    async fn failed_restore_keeps_settings() {
        let store = store();
        HandlerSettings::new(store.as_ref())
            .record_activation("native", &HandlerConfig::new(json!("not an object")))
            .unwrap();

        let services = bootstrap_services(Config::default(), Arc::clone(&store) as _).unwrap();
        assert_eq!(services.restore_active_handler(None).await, None);
        assert_eq!(
            HandlerSettings::new(store.as_ref()).active_handler().as_deref(),
            Some("native")
        );
    }

    #[tokio::test]
    async fn unreachable_upstream_at_restore_keeps_retrying() {
        let store = store();
        HandlerSettings::new(store.as_ref())
            .record_activation(
                "spotify",
                &HandlerConfig::new(json!({
                    "client_id": "id",
                    "client_secret": "secret",
                    "refresh_token": "refresh"
                })),
            )
            .unwrap();
        let mut config = Config::default();
        config.spotify.accounts_token_url = "http://127.0.0.1:9/token".to_string();

        let services = bootstrap_services(config, Arc::clone(&store) as _).unwrap();
        assert_eq!(services.restore_active_handler(None).await, None);
        assert_eq!(services.manager.state(), HandlerState::Faulted);
        assert_eq!(
            HandlerSettings::new(store.as_ref()).active_handler().as_deref(),
            Some("spotify")
        );
        services.shutdown().await;
    }

    #[tokio::test]
    async fn nothing_to_restore() {
        let services = bootstrap_services(Config::default(), store()).unwrap();
        assert_eq!(services.restore_active_handler(None).await, None);
        assert_eq!(services.restore_active_handler(Some("none")).await, None);
    }

    #[tokio::test]
    async fn shutdown_persists_lyrics_cache() {
        let store = store();
        let services = bootstrap_services(Config::default(), Arc::clone(&store) as _).unwrap();
        services
            .lyrics_cache
            .set("t1", LyricsResult::message("No lyrics found"));

        services.shutdown().await;
        assert!(store.get(LYRICS_CACHE_STORAGE_KEY).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sweep_persists() {
        let store = store();
        let config = Config {
            cache_sweep_interval_secs: 60,
            ..Config::default()
        };
        let services = bootstrap_services(config, Arc::clone(&store) as _).unwrap();
        services.lyrics_cache.set("t1", LyricsResult::message("x"));
        assert!(store.get(LYRICS_CACHE_STORAGE_KEY).is_none());

        tokio::time::sleep(Duration::from_secs(61)).await;
        // The write happens on the blocking pool
        for _ in 0..100 {
            if store.get(LYRICS_CACHE_STORAGE_KEY).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.get(LYRICS_CACHE_STORAGE_KEY).is_some());
    }
}
