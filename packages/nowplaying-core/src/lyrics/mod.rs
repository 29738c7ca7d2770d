//! Line-synced lyrics lookup with a persistent TTL cache.
//!
//! [`LyricsService::get_lyrics`] resolves a snapshot to a [`LyricsResult`].
//! Hits within the cache lifetime never touch the network. Misses query the
//! configured [`LyricsFetcher`]; both positive and negative outcomes are
//! cached so tracks known to have no synced lyrics are not looked up again.

pub mod lrc;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::Cache;
use crate::error::ErrorCode;
use crate::playback::PlaybackData;
use crate::protocol_constants::{LYRICS_CACHE_STORAGE_KEY, NO_LYRICS_MESSAGE};

/// Errors raised by lyrics fetchers.
#[derive(Debug, Error)]
pub enum LyricsError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Lyrics service returned status {0}")]
    Status(u16),
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Types
// ─────────────────────────────────────────────────────────────────────────────

/// One timed lyric line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricLine {
    pub start_time_ms: u64,
    /// Start of the next line; `u64::MAX` for the final line.
    pub end_time_ms: u64,
    pub words: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedLyrics {
    /// `LINE_SYNCED` for LRC-derived lyrics.
    pub sync_type: String,
    pub lines: Vec<LyricLine>,
}

/// Optional display colors (ARGB integers) some providers attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsColors {
    pub background: i64,
    pub text: i64,
    pub highlight_text: i64,
}

/// Lyrics for a track, or a user-facing message when there are none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricsResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<SyncedLyrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<LyricsColors>,
}

impl LyricsResult {
    #[must_use]
    pub fn synced(lines: Vec<LyricLine>) -> Self {
        Self {
            lyrics: Some(SyncedLyrics {
                sync_type: "LINE_SYNCED".to_string(),
                lines,
            }),
            message: None,
            colors: None,
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            lyrics: None,
            message: Some(message.into()),
            colors: None,
        }
    }

    /// Returns true for a negative (message-only) result.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.lyrics.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetching
// ─────────────────────────────────────────────────────────────────────────────

/// Lookup parameters derived from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricsQuery {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_secs: Option<u64>,
}

impl LyricsQuery {
    #[must_use]
    pub fn from_snapshot(snapshot: &PlaybackData) -> Self {
        let track = &snapshot.track;
        Self {
            title: track.name.clone(),
            artist: track.artist_line(),
            album: track.album.clone(),
            duration_secs: (track.duration.total_ms > 0)
                .then(|| (track.duration.total_ms + 500) / 1000),
        }
    }
}

/// Source of raw LRC text.
#[async_trait]
pub trait LyricsFetcher: Send + Sync {
    /// Returns synced LRC text, `None` when the track has none.
    async fn fetch_synced(&self, query: &LyricsQuery) -> Result<Option<String>, LyricsError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrclibResponse {
    #[serde(default)]
    synced_lyrics: Option<String>,
    #[serde(default)]
    instrumental: bool,
}

/// Fetcher backed by the LRCLIB `/get` endpoint.
pub struct LrclibFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl LrclibFetcher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LyricsFetcher for LrclibFetcher {
    async fn fetch_synced(&self, query: &LyricsQuery) -> Result<Option<String>, LyricsError> {
        let mut params = vec![("track_name", query.title.clone())];
        if !query.artist.trim().is_empty() {
            params.push(("artist_name", query.artist.clone()));
        }
        if !query.album.trim().is_empty() {
            params.push(("album_name", query.album.clone()));
        }
        if let Some(duration) = query.duration_secs {
            params.push(("duration", duration.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/get", self.base_url))
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LyricsError::Status(status.as_u16()));
        }

        let body: LrclibResponse = response.json().await?;
        if body.instrumental {
            return Ok(None);
        }
        Ok(body.synced_lyrics.filter(|text| !text.trim().is_empty()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

/// Cache-fronted lyrics lookup shared by handlers that offer lyrics.
pub struct LyricsService {
    cache: Arc<Cache<LyricsResult>>,
    fetcher: Arc<dyn LyricsFetcher>,
}

impl LyricsService {
    pub fn new(cache: Arc<Cache<LyricsResult>>, fetcher: Arc<dyn LyricsFetcher>) -> Self {
        Self { cache, fetcher }
    }

    /// Creates the cache the service expects.
    #[must_use]
    pub fn new_cache(expiration: Duration) -> Cache<LyricsResult> {
        Cache::new(LYRICS_CACHE_STORAGE_KEY, expiration)
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<Cache<LyricsResult>> {
        &self.cache
    }

    /// Cache key: the track id, else `artist-title-album`.
    #[must_use]
    pub fn cache_key(snapshot: &PlaybackData) -> String {
        let track = &snapshot.track;
        match track.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => format!("{}-{}-{}", track.artist_line(), track.name, track.album),
        }
    }

    /// Resolves lyrics for the snapshot's track. Never fails: lookup
    /// failures become a cached negative result.
    pub async fn get_lyrics(&self, snapshot: &PlaybackData) -> LyricsResult {
        if snapshot.track.name.trim().is_empty() {
            return LyricsResult::message(NO_LYRICS_MESSAGE);
        }

        let key = Self::cache_key(snapshot);
        if let Some(cached) = self.cache.get_fresh(&key) {
            log::debug!("[Lyrics] Cache hit for '{}'", key);
            return cached;
        }

        let query = LyricsQuery::from_snapshot(snapshot);
        let result = match self.fetcher.fetch_synced(&query).await {
            Ok(Some(raw)) => {
                let lines = lrc::parse(&raw);
                if lines.is_empty() {
                    LyricsResult::message(NO_LYRICS_MESSAGE)
                } else {
                    LyricsResult::synced(lines)
                }
            }
            Ok(None) => LyricsResult::message(NO_LYRICS_MESSAGE),
            Err(e) => {
                log::warn!(
                    "[Lyrics] Lookup failed for '{} - {}' ({}): {}",
                    query.artist,
                    query.title,
                    e.code(),
                    e
                );
                LyricsResult::message(NO_LYRICS_MESSAGE)
            }
        };

        log::debug!(
            "[Lyrics] Caching {} result for '{}'",
            if result.is_negative() { "negative" } else { "synced" },
            key
        );
        self.cache.set(key, result.clone());
        result
    }
}
