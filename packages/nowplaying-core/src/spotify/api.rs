//! Spotify Web API client.
//!
//! Every request goes through [`SpotifyApi::request`], which attaches the
//! bearer token and applies the single refresh-and-retry on 401.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::auth::{read_json, TokenSource};
use super::mapping::{
    repeat_to_spotify, AlbumObject, DeviceList, Item, Paging, PlayerState, PlaylistObject,
    SavedAlbum, SavedTrack,
};
use super::retry::with_auth_retry;
use super::{SpotifyError, SpotifyResult};
use crate::playback::{PageRequest, RepeatMode};
use crate::protocol_constants::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

type Query = Vec<(&'static str, String)>;

/// Thin typed wrapper over the Web API endpoints the backends use.
pub struct SpotifyApi {
    client: reqwest::Client,
    base: String,
    tokens: Arc<dyn TokenSource>,
}

impl SpotifyApi {
    pub fn new(client: reqwest::Client, base: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    async fn request(
        &self,
        action: &str,
        method: Method,
        path: &str,
        query: Query,
        body: Option<Value>,
    ) -> SpotifyResult<reqwest::Response> {
        let url = format!("{}{}", self.base, path);
        let token = self.tokens.token().await?;

        let response = with_auth_retry(
            action,
            token,
            |token: String| {
                let mut builder = self
                    .client
                    .request(method.clone(), &url)
                    .bearer_auth(token)
                    .query(&query);
                builder = match &body {
                    Some(body) => builder.json(body),
                    // Player endpoints reject PUT/POST without a length
                    None if method != Method::GET => builder.header(reqwest::header::CONTENT_LENGTH, "0"),
                    None => builder,
                };
                builder.send()
            },
            || self.tokens.refresh(),
        )
        .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        log::debug!("[Spotify] {} failed with {}: {}", action, status, text);
        Err(SpotifyError::Status(status.as_u16(), text))
    }

    async fn command(&self, action: &str, method: Method, path: &str, query: Query, body: Option<Value>) -> SpotifyResult<()> {
        self.request(action, method, path, query, body).await.map(|_| ())
    }

    async fn get_json<T: DeserializeOwned>(&self, action: &str, path: &str, query: Query) -> SpotifyResult<T> {
        let response = self.request(action, Method::GET, path, query, None).await?;
        read_json(response).await
    }

    fn paging(page: PageRequest) -> Query {
        let limit = page.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        vec![("offset", page.offset.to_string()), ("limit", limit.to_string())]
    }

    fn with_device(mut query: Query, device_id: Option<&str>) -> Query {
        if let Some(id) = device_id {
            query.push(("device_id", id.to_string()));
        }
        query
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Player
    // ─────────────────────────────────────────────────────────────────────────

    /// Current player state; `None` when no device is active (204).
    pub async fn player_state(&self) -> SpotifyResult<Option<PlayerState>> {
        let response = self
            .request(
                "player_state",
                Method::GET,
                "/me/player",
                vec![("additional_types", "track,episode".to_string())],
                None,
            )
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        read_json(response).await.map(Some)
    }

    pub async fn play(&self) -> SpotifyResult<()> {
        self.command("play", Method::PUT, "/me/player/play", Vec::new(), None).await
    }

    /// Starts a context (or explicit track list) on the active device.
    pub async fn play_context(&self, body: Value) -> SpotifyResult<()> {
        self.command("play_context", Method::PUT, "/me/player/play", Vec::new(), Some(body))
            .await
    }

    pub async fn pause(&self) -> SpotifyResult<()> {
        self.command("pause", Method::PUT, "/me/player/pause", Vec::new(), None).await
    }

    pub async fn next(&self) -> SpotifyResult<()> {
        self.command("next", Method::POST, "/me/player/next", Vec::new(), None).await
    }

    pub async fn previous(&self) -> SpotifyResult<()> {
        self.command("previous", Method::POST, "/me/player/previous", Vec::new(), None)
            .await
    }

    pub async fn set_volume(&self, percent: u8, device_id: Option<&str>) -> SpotifyResult<()> {
        let query = Self::with_device(vec![("volume_percent", percent.min(100).to_string())], device_id);
        self.command("volume", Method::PUT, "/me/player/volume", query, None).await
    }

    pub async fn set_shuffle(&self, state: bool) -> SpotifyResult<()> {
        self.command(
            "shuffle",
            Method::PUT,
            "/me/player/shuffle",
            vec![("state", state.to_string())],
            None,
        )
        .await
    }

    pub async fn set_repeat(&self, mode: RepeatMode) -> SpotifyResult<()> {
        self.command(
            "repeat",
            Method::PUT,
            "/me/player/repeat",
            vec![("state", repeat_to_spotify(mode).to_string())],
            None,
        )
        .await
    }

    pub async fn devices(&self) -> SpotifyResult<DeviceList> {
        self.get_json("devices", "/me/player/devices", Vec::new()).await
    }

    pub async fn transfer(&self, device_id: &str, play: Option<bool>) -> SpotifyResult<()> {
        let mut body = json!({ "device_ids": [device_id] });
        if let Some(play) = play {
            body["play"] = Value::Bool(play);
        }
        self.command("transfer", Method::PUT, "/me/player", Vec::new(), Some(body))
            .await
    }

    pub async fn episode(&self, id: &str) -> SpotifyResult<Item> {
        self.get_json("episode", &format!("/episodes/{id}"), Vec::new()).await
    }

    /// Subscribes a dealer connection to player notifications.
    ///
    /// Uses the dealer's own token rather than the REST token source, since
    /// the subscription is bound to the account that opened the socket.
    pub async fn subscribe_player_notifications(&self, connection_id: &str, dealer_token: &str) -> SpotifyResult<()> {
        let response = self
            .client
            .put(format!("{}/me/notifications/player", self.base))
            .bearer_auth(dealer_token)
            .query(&[("connection_id", connection_id)])
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SpotifyError::Status(
                status.as_u16(),
                response.text().await.unwrap_or_default(),
            ))
        }
    }

    /// Read-only credential probe.
    pub async fn probe(&self) -> SpotifyResult<()> {
        self.request("probe", Method::GET, "/me", Vec::new(), None)
            .await
            .map(|_| ())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Library
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn playlists(&self, page: PageRequest) -> SpotifyResult<Paging<PlaylistObject>> {
        self.get_json("playlists", "/me/playlists", Self::paging(page)).await
    }

    pub async fn albums(&self, page: PageRequest) -> SpotifyResult<Paging<SavedAlbum>> {
        self.get_json("albums", "/me/albums", Self::paging(page)).await
    }

    pub async fn liked(&self, page: PageRequest) -> SpotifyResult<Paging<SavedTrack>> {
        self.get_json("liked", "/me/tracks", Self::paging(page)).await
    }

    pub async fn playlist_tracks(&self, id: &str, page: PageRequest) -> SpotifyResult<Paging<SavedTrack>> {
        self.get_json("playlist_tracks", &format!("/playlists/{id}/tracks"), Self::paging(page))
            .await
    }

    pub async fn album(&self, id: &str) -> SpotifyResult<AlbumObject> {
        self.get_json("album", &format!("/albums/{id}"), Vec::new()).await
    }

    pub async fn album_tracks(&self, id: &str, page: PageRequest) -> SpotifyResult<Paging<Item>> {
        self.get_json("album_tracks", &format!("/albums/{id}/tracks"), Self::paging(page))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Artwork
    // ─────────────────────────────────────────────────────────────────────────

    /// Plain unauthenticated fetch of an artwork URL.
    pub async fn fetch_image(&self, url: &str) -> SpotifyResult<Bytes> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SpotifyError::Status(status.as_u16(), String::new()));
        }
        Ok(response.bytes().await?)
    }
}

/// Request body for `PUT /me/player/play` when starting a specific track.
///
/// Playlists and albums start at the track within their context; liked
/// songs and unknown contexts play the single track.
#[must_use]
pub fn play_track_body(track_id: &str, context_type: Option<&str>, context_id: Option<&str>) -> Value {
    let track_uri = format!("spotify:track:{track_id}");
    match (context_type, context_id) {
        (Some(kind @ ("playlist" | "album")), Some(id)) => json!({
            "context_uri": format!("spotify:{kind}:{id}"),
            "offset": { "uri": track_uri },
        }),
        _ => json!({ "uris": [track_uri] }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_track_within_playlist_uses_offset() {
        let body = play_track_body("t1", Some("playlist"), Some("p1"));
        assert_eq!(body["context_uri"], "spotify:playlist:p1");
        assert_eq!(body["offset"]["uri"], "spotify:track:t1");
    }

    #[test]
    fn play_track_without_context_plays_single_uri() {
        assert_eq!(
            play_track_body("t1", None, None),
            json!({ "uris": ["spotify:track:t1"] })
        );
        assert_eq!(
            play_track_body("t1", Some("liked"), Some("x")),
            json!({ "uris": ["spotify:track:t1"] })
        );
    }

    #[test]
    fn paging_clamps_limit() {
        let query = SpotifyApi::paging(PageRequest {
            offset: 40,
            limit: Some(500),
        });
        assert_eq!(query[0], ("offset", "40".to_string()));
        assert_eq!(query[1], ("limit", MAX_PAGE_LIMIT.to_string()));

        let query = SpotifyApi::paging(PageRequest::default());
        assert_eq!(query[1], ("limit", DEFAULT_PAGE_LIMIT.to_string()));
    }
}
