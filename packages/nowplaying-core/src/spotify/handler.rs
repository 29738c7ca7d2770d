//! Shared Spotify backend and the official-credentials mode.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::json;

use super::api::{play_track_body, SpotifyApi};
use super::auth::{OAuthTokenSource, TokenSource, WebTokenSource};
use super::mapping::{map_album, map_device, map_playlist, map_track};
use super::session::{SessionParams, SpotifySession};
use super::totp::Totp;
use super::SpotifyError;
use crate::error::{PlaybackError, PlaybackResult};
use crate::lyrics::{LyricsResult, LyricsService};
use crate::playback::library::{merge_page, tag_playing};
use crate::playback::{
    Capability, Device, HandlerConfig, HandlerEvents, HandlerKind, LibraryItem, Page,
    PageRequest, PlaybackData, PlaybackHandler, RepeatMode, TrackItem,
};
use crate::runtime::TokioSpawner;
use crate::state::SpotifyEndpoints;

/// Shared dependencies of the Spotify backends.
#[derive(Clone)]
pub struct SpotifyContext {
    pub client: reqwest::Client,
    pub endpoints: SpotifyEndpoints,
    pub spawner: TokioSpawner,
}

impl SpotifyContext {
    pub(super) fn web_tokens(&self, sp_dc: &str) -> Arc<dyn TokenSource> {
        let totp = Totp::from_cipher(&self.endpoints.totp_secret_cipher, self.endpoints.totp_version);
        Arc::new(WebTokenSource::new(
            self.client.clone(),
            &self.endpoints.web_token_url,
            sp_dc,
            totp,
        ))
    }
}

/// Token sources for one activation.
pub struct Credentials {
    /// Used for every Web API request.
    pub rest: Arc<dyn TokenSource>,
    /// Used to open the dealer socket and register its connection.
    pub dealer: Arc<dyn TokenSource>,
}

/// How a Spotify backend turns its config blob into token sources.
pub trait CredentialMode: Send + Sync + 'static {
    const KIND: HandlerKind;

    /// Checks the config shape and builds token sources. Performs no I/O.
    ///
    /// Returns [`PlaybackError::ConfigInvalid`] when the shape is wrong.
    fn credentials(&self, ctx: &SpotifyContext, config: &HandlerConfig) -> PlaybackResult<Credentials>;

    /// Capabilities this mode adds on top of the Web API ones.
    fn extra_capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    fn lyrics(&self) -> Option<&LyricsService> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Official Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Credential shapes accepted by the `spotify` handler.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum OfficialConfig<'a> {
    Cookie {
        sp_dc: &'a str,
    },
    OAuth {
        client_id: &'a str,
        client_secret: &'a str,
        refresh_token: &'a str,
    },
}

/// Accepts exactly one of `{sp_dc}` or `{client_id, client_secret,
/// refresh_token}`.
pub(super) fn parse_official(config: &HandlerConfig) -> Result<OfficialConfig<'_>, String> {
    let cookie = config.str_field("sp_dc");
    let oauth_keys = ["client_id", "client_secret", "refresh_token"];
    let oauth_present = oauth_keys.iter().filter(|key| config.has(key)).count();

    match (cookie, oauth_present) {
        (Some(_), n) if n > 0 => Err("provide either sp_dc or OAuth credentials, not both".to_string()),
        (Some(sp_dc), _) => Ok(OfficialConfig::Cookie { sp_dc }),
        (None, 0) => Err("missing credentials: sp_dc or client_id/client_secret/refresh_token".to_string()),
        (None, _) => match (
            config.str_field("client_id"),
            config.str_field("client_secret"),
            config.str_field("refresh_token"),
        ) {
            (Some(client_id), Some(client_secret), Some(refresh_token)) => Ok(OfficialConfig::OAuth {
                client_id,
                client_secret,
                refresh_token,
            }),
            _ => Err("OAuth credentials need client_id, client_secret and refresh_token".to_string()),
        },
    }
}

/// `sp_dc` cookie or OAuth refresh token.
#[derive(Default)]
pub struct OfficialCredentials;

impl CredentialMode for OfficialCredentials {
    const KIND: HandlerKind = HandlerKind::Spotify;

    fn credentials(&self, ctx: &SpotifyContext, config: &HandlerConfig) -> PlaybackResult<Credentials> {
        let source: Arc<dyn TokenSource> = match parse_official(config).map_err(PlaybackError::ConfigInvalid)? {
            OfficialConfig::Cookie { sp_dc } => ctx.web_tokens(sp_dc),
            OfficialConfig::OAuth {
                client_id,
                client_secret,
                refresh_token,
            } => Arc::new(OAuthTokenSource::new(
                ctx.client.clone(),
                &ctx.endpoints.accounts_token_url,
                client_id,
                client_secret,
                refresh_token,
            )),
        };
        Ok(Credentials {
            rest: Arc::clone(&source),
            dealer: source,
        })
    }
}

/// The `spotify` handler.
pub type SpotifyHandler = SpotifyBackend<OfficialCredentials>;

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulated library pages, keyed per listing.
#[derive(Default)]
struct LibraryCache {
    playlists: Mutex<Vec<LibraryItem>>,
    albums: Mutex<Vec<LibraryItem>>,
    tracks: Mutex<HashMap<String, Vec<TrackItem>>>,
}

impl LibraryCache {
    fn clear(&self) {
        self.playlists.lock().clear();
        self.albums.lock().clear();
        self.tracks.lock().clear();
    }

    fn merge_items(list: &Mutex<Vec<LibraryItem>>, items: Vec<LibraryItem>, offset: u32, total: u32) -> Page<LibraryItem> {
        let mut cached = list.lock();
        merge_page(&mut cached, items, offset);
        Page {
            items: cached.clone(),
            offset,
            total,
        }
    }

    fn merge_tracks(
        &self,
        key: String,
        items: Vec<TrackItem>,
        offset: u32,
        total: u32,
        snapshot: Option<&PlaybackData>,
    ) -> Page<TrackItem> {
        let mut tracks = self.tracks.lock();
        let cached = tracks.entry(key).or_default();
        merge_page(cached, items, offset);
        tag_playing(cached, snapshot);
        Page {
            items: cached.clone(),
            offset,
            total,
        }
    }
}

/// Spotify Connect backend parameterised by its credential mode.
pub struct SpotifyBackend<C: CredentialMode> {
    mode: C,
    ctx: SpotifyContext,
    session: RwLock<Option<Arc<SpotifySession>>>,
    library: LibraryCache,
}

impl<C: CredentialMode> SpotifyBackend<C> {
    pub fn with_mode(ctx: SpotifyContext, mode: C) -> Self {
        Self {
            mode,
            ctx,
            session: RwLock::new(None),
            library: LibraryCache::default(),
        }
    }

    #[cfg(test)]
    pub(super) fn mode(&self) -> &C {
        &self.mode
    }

    fn session(&self) -> PlaybackResult<Arc<SpotifySession>> {
        self.session
            .read()
            .clone()
            .ok_or_else(|| PlaybackError::TransportClosed(format!("{} is not connected", C::KIND)))
    }

    fn api(&self) -> PlaybackResult<Arc<SpotifyApi>> {
        self.session().map(|s| Arc::clone(s.api()))
    }

    fn snapshot(&self) -> Option<PlaybackData> {
        self.session.read().as_ref().and_then(|s| s.snapshot())
    }
}

/// Only an explicit rejection invalidates the configuration. Transport
/// failures and upstream 5xx stay retryable.
fn credential_check_error(err: SpotifyError) -> PlaybackError {
    match err {
        SpotifyError::Auth(msg) => PlaybackError::ConfigInvalid(format!("credentials rejected: {msg}")),
        SpotifyError::Status(code @ (400 | 401 | 403), body) => {
            PlaybackError::ConfigInvalid(format!("credentials rejected ({code}): {body}"))
        }
        other => PlaybackError::UpstreamUnavailable(format!("credential check failed: {other}")),
    }
}

impl<C: CredentialMode + Default> SpotifyBackend<C> {
    pub fn new(ctx: SpotifyContext) -> Self {
        Self::with_mode(ctx, C::default())
    }
}

#[async_trait]
impl<C: CredentialMode> PlaybackHandler for SpotifyBackend<C> {
    fn name(&self) -> &'static str {
        C::KIND.as_str()
    }

    async fn validate_config(&self, config: &HandlerConfig) -> PlaybackResult<()> {
        let credentials = self.mode.credentials(&self.ctx, config)?;
        // One read-only request; the token source is dropped afterwards
        SpotifyApi::new(
            self.ctx.client.clone(),
            &self.ctx.endpoints.api_base,
            credentials.rest,
        )
        .probe()
        .await
        .map_err(credential_check_error)
    }

    async fn setup(&self, config: &HandlerConfig, events: HandlerEvents) -> PlaybackResult<()> {
        if let Some(previous) = self.session.write().take() {
            previous.stop();
        }

        let credentials = self.mode.credentials(&self.ctx, config)?;
        let api = Arc::new(SpotifyApi::new(
            self.ctx.client.clone(),
            &self.ctx.endpoints.api_base,
            credentials.rest,
        ));
        let params = SessionParams {
            api,
            dealer_tokens: credentials.dealer,
            dealer_url: self.ctx.endpoints.dealer_url.clone(),
            ping_interval: self.ctx.endpoints.dealer_ping_interval(),
            extra: self.mode.extra_capabilities(),
        };

        let session = SpotifySession::start(params, events, &self.ctx.spawner).await?;
        *self.session.write() = Some(Arc::new(session));
        log::info!("[Spotify] {} session started", C::KIND);
        Ok(())
    }

    async fn cleanup(&self) {
        if let Some(session) = self.session.write().take() {
            session.stop();
            log::info!("[Spotify] {} session stopped", C::KIND);
        }
        self.library.clear();
    }

    async fn get_snapshot(&self) -> PlaybackResult<Option<PlaybackData>> {
        Ok(self.snapshot())
    }

    async fn get_image(&self) -> PlaybackResult<Option<Bytes>> {
        let api = self.api()?;
        let Some(url) = self.snapshot().and_then(|s| s.track.image_url) else {
            return Ok(None);
        };
        Ok(Some(api.fetch_image(&url).await?))
    }

    async fn play(&self) -> PlaybackResult<()> {
        Ok(self.api()?.play().await?)
    }

    async fn pause(&self) -> PlaybackResult<()> {
        Ok(self.api()?.pause().await?)
    }

    async fn set_volume(&self, percent: u8, device_id: Option<&str>) -> PlaybackResult<()> {
        Ok(self.api()?.set_volume(percent, device_id).await?)
    }

    async fn next(&self) -> PlaybackResult<()> {
        Ok(self.api()?.next().await?)
    }

    async fn previous(&self) -> PlaybackResult<()> {
        Ok(self.api()?.previous().await?)
    }

    async fn set_shuffle(&self, state: bool) -> PlaybackResult<()> {
        Ok(self.api()?.set_shuffle(state).await?)
    }

    async fn set_repeat(&self, mode: RepeatMode) -> PlaybackResult<()> {
        Ok(self.api()?.set_repeat(mode).await?)
    }

    async fn list_playlists(&self, page: PageRequest) -> PlaybackResult<Page<LibraryItem>> {
        let fetched = self.api()?.playlists(page).await?;
        let items = fetched.items.iter().map(map_playlist).collect();
        Ok(LibraryCache::merge_items(
            &self.library.playlists,
            items,
            page.offset,
            fetched.total,
        ))
    }

    async fn list_albums(&self, page: PageRequest) -> PlaybackResult<Page<LibraryItem>> {
        let fetched = self.api()?.albums(page).await?;
        let items = fetched.items.iter().filter_map(|saved| map_album(&saved.album)).collect();
        Ok(LibraryCache::merge_items(
            &self.library.albums,
            items,
            page.offset,
            fetched.total,
        ))
    }

    async fn list_liked_songs(&self, page: PageRequest) -> PlaybackResult<Page<TrackItem>> {
        let fetched = self.api()?.liked(page).await?;
        let items = fetched
            .items
            .iter()
            .filter_map(|saved| saved.track.as_ref())
            .filter_map(|track| map_track(track, None))
            .collect();
        Ok(self.library.merge_tracks(
            "liked".to_string(),
            items,
            page.offset,
            fetched.total,
            self.snapshot().as_ref(),
        ))
    }

    async fn list_playlist_tracks(&self, id: &str, page: PageRequest) -> PlaybackResult<Page<TrackItem>> {
        let fetched = self.api()?.playlist_tracks(id, page).await?;
        let items = fetched
            .items
            .iter()
            .filter_map(|entry| entry.track.as_ref())
            .filter_map(|track| map_track(track, None))
            .collect();
        Ok(self.library.merge_tracks(
            format!("playlist:{id}"),
            items,
            page.offset,
            fetched.total,
            self.snapshot().as_ref(),
        ))
    }

    async fn list_album_tracks(&self, id: &str, page: PageRequest) -> PlaybackResult<Page<TrackItem>> {
        let api = self.api()?;
        let fetched = api.album_tracks(id, page).await?;

        // Album track listings omit the album itself
        let cached_name = self
            .library
            .albums
            .lock()
            .iter()
            .find(|album| album.id == id)
            .map(|album| album.name.clone());
        let album_name = match cached_name {
            Some(name) => Some(name),
            None => api.album(id).await.ok().map(|album| album.name),
        };

        let items = fetched
            .items
            .iter()
            .filter_map(|track| map_track(track, album_name.as_deref()))
            .collect();
        Ok(self.library.merge_tracks(
            format!("album:{id}"),
            items,
            page.offset,
            fetched.total,
            self.snapshot().as_ref(),
        ))
    }

    async fn play_playlist(&self, id: &str) -> PlaybackResult<()> {
        let body = json!({ "context_uri": format!("spotify:playlist:{id}") });
        Ok(self.api()?.play_context(body).await?)
    }

    async fn play_album(&self, id: &str) -> PlaybackResult<()> {
        let body = json!({ "context_uri": format!("spotify:album:{id}") });
        Ok(self.api()?.play_context(body).await?)
    }

    async fn play_track(
        &self,
        id: &str,
        context_type: Option<&str>,
        context_id: Option<&str>,
    ) -> PlaybackResult<()> {
        let body = play_track_body(id, context_type, context_id);
        Ok(self.api()?.play_context(body).await?)
    }

    async fn list_devices(&self) -> PlaybackResult<Vec<Device>> {
        let list = self.api()?.devices().await?;
        Ok(list.devices.iter().filter_map(map_device).collect())
    }

    async fn transfer_playback(&self, device_id: &str, play: Option<bool>) -> PlaybackResult<()> {
        Ok(self.api()?.transfer(device_id, play).await?)
    }

    async fn get_lyrics(&self) -> PlaybackResult<LyricsResult> {
        let Some(service) = self.mode.lyrics() else {
            return Err(PlaybackError::unsupported("lyrics"));
        };
        match self.snapshot() {
            Some(snapshot) => Ok(service.get_lyrics(&snapshot).await),
            None => Ok(LyricsResult::message("Nothing is playing")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Form, Json, Router};
    use serde_json::Value;
    use tokio::net::TcpListener;

    fn config(value: Value) -> HandlerConfig {
        HandlerConfig::new(value)
    }

    fn context(endpoints: SpotifyEndpoints) -> SpotifyContext {
        SpotifyContext {
            client: reqwest::Client::new(),
            endpoints,
            spawner: TokioSpawner::current(),
        }
    }

    #[test]
    fn accepts_cookie_shape() {
        let cfg = config(json!({"sp_dc": "cookie"}));
        assert_eq!(parse_official(&cfg), Ok(OfficialConfig::Cookie { sp_dc: "cookie" }));
    }

    #[test]
    fn accepts_oauth_shape() {
        let cfg = config(json!({
            "client_id": "id",
            "client_secret": "secret",
            "refresh_token": "refresh"
        }));
        assert!(matches!(parse_official(&cfg), Ok(OfficialConfig::OAuth { client_id: "id", .. })));
    }

    #[test]
    fn rejects_both_or_neither() {
        let both = config(json!({
            "sp_dc": "cookie",
            "client_id": "id",
            "client_secret": "secret",
            "refresh_token": "refresh"
        }));
        assert!(parse_official(&both).is_err());
        assert!(parse_official(&config(json!({}))).is_err());
    }

    #[test]
    fn rejects_partial_oauth() {
        let cfg = config(json!({"client_id": "id", "refresh_token": "refresh"}));
        assert!(parse_official(&cfg).is_err());
    }

    #[tokio::test]
    async fn validate_rejects_bad_shape_without_io() {
        let handler = SpotifyHandler::new(context(SpotifyEndpoints::default()));
        let err = handler.validate_config(&config(json!({}))).await.unwrap_err();
        assert!(matches!(err, PlaybackError::ConfigInvalid(_)));
    }

    /// Accounts token endpoint plus `/v1/me`. A refresh token of "flaky"
    /// gets a 503.
    async fn upstream_server() -> SpotifyEndpoints {
        async fn token(Form(form): Form<HashMap<String, String>>) -> axum::response::Response {
            use axum::http::StatusCode;
            use axum::response::IntoResponse;
            match form.get("refresh_token").map(String::as_str) {
                Some("good") => Json(json!({"access_token": "access", "expires_in": 3600})).into_response(),
                Some("flaky") => StatusCode::SERVICE_UNAVAILABLE.into_response(),
                _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))).into_response(),
            }
        }

        let app = Router::new()
            .route("/token", post(token))
            .route("/v1/me", get(|| async { Json(json!({"id": "user"})) }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        SpotifyEndpoints {
            accounts_token_url: format!("http://{addr}/token"),
            api_base: format!("http://{addr}/v1"),
            ..SpotifyEndpoints::default()
        }
    }

    fn oauth(refresh_token: &str) -> HandlerConfig {
        config(json!({"client_id": "id", "client_secret": "s", "refresh_token": refresh_token}))
    }

    #[tokio::test]
    async fn validate_checks_oauth_credentials_once() {
        let handler = SpotifyHandler::new(context(upstream_server().await));

        assert!(handler.validate_config(&oauth("good")).await.is_ok());

        let err = handler.validate_config(&oauth("revoked")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn unreachable_accounts_service_is_not_a_config_error() {
        let endpoints = SpotifyEndpoints {
            accounts_token_url: "http://127.0.0.1:9/token".to_string(),
            ..SpotifyEndpoints::default()
        };
        let handler = SpotifyHandler::new(context(endpoints));

        let err = handler.validate_config(&oauth("good")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::UpstreamUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn accounts_outage_is_not_a_config_error() {
        let handler = SpotifyHandler::new(context(upstream_server().await));
        let err = handler.validate_config(&oauth("flaky")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::UpstreamUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn idle_backend_reports_nothing() {
        let handler = SpotifyHandler::new(context(SpotifyEndpoints::default()));
        assert_eq!(handler.get_snapshot().await.unwrap(), None);
        assert!(matches!(handler.play().await, Err(PlaybackError::TransportClosed(_))));
        assert!(matches!(handler.get_lyrics().await, Err(PlaybackError::Unsupported(_))));
        handler.cleanup().await;
        handler.cleanup().await;
    }
}
