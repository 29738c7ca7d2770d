//! Core configuration types.
//!
//! [`Config`] holds every tunable of the relay: reconnect policy, lyrics
//! cache timings, upstream endpoints, and WebSocket parameters. The server
//! binary deserializes it from YAML (all fields defaulted) and overrides
//! individual fields from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    CACHE_SWEEP_INTERVAL_SECS, DEALER_PING_INTERVAL_SECS, EVENT_CHANNEL_CAPACITY,
    HTTP_TIMEOUT_SECS, LRCLIB_BASE_URL, LYRICS_CACHE_EXPIRATION_SECS, RECONNECT_DELAY_SECS,
    SPOTIFY_ACCOUNTS_TOKEN_URL, SPOTIFY_API_BASE, SPOTIFY_DEALER_URL, SPOTIFY_WEB_TOKEN_URL,
    TOTP_SECRET_CIPHER, TOTP_VERSION, WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS,
};

/// Upstream endpoints and token-minting parameters for the Spotify backends.
///
/// Overridable so tests and self-hosted relays can point elsewhere.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SpotifyEndpoints {
    /// Web API base URL (no trailing slash).
    pub api_base: String,

    /// Dealer push-socket URL.
    pub dealer_url: String,

    /// OAuth refresh-token endpoint.
    pub accounts_token_url: String,

    /// Web-player token endpoint used with the sp_dc cookie.
    pub web_token_url: String,

    /// Relay endpoint exchanging a session token + connection id for an
    /// access token. Required by the `spotify-free` handler only.
    pub relay_url: Option<String>,

    /// Obfuscated TOTP secret bytes.
    pub totp_secret_cipher: Vec<u8>,

    /// TOTP secret version reported to the web-token endpoint.
    pub totp_version: u32,

    /// Dealer keep-alive ping interval (seconds).
    pub dealer_ping_interval_secs: u64,
}

impl SpotifyEndpoints {
    /// Validates the endpoint values.
    pub fn validate(&self) -> Result<(), String> {
        for (name, url) in [
            ("api_base", &self.api_base),
            ("accounts_token_url", &self.accounts_token_url),
            ("web_token_url", &self.web_token_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("spotify.{name} must be an http(s) URL"));
            }
        }
        if !self.dealer_url.starts_with("ws://") && !self.dealer_url.starts_with("wss://") {
            return Err("spotify.dealer_url must be a ws(s) URL".to_string());
        }
        if self.totp_secret_cipher.is_empty() {
            return Err("spotify.totp_secret_cipher must not be empty".to_string());
        }
        if self.dealer_ping_interval_secs == 0 {
            return Err("spotify.dealer_ping_interval_secs must be >= 1".to_string());
        }
        Ok(())
    }

    /// Dealer keep-alive interval as a [`Duration`].
    #[must_use]
    pub fn dealer_ping_interval(&self) -> Duration {
        Duration::from_secs(self.dealer_ping_interval_secs)
    }
}

impl Default for SpotifyEndpoints {
    fn default() -> Self {
        Self {
            api_base: SPOTIFY_API_BASE.to_string(),
            dealer_url: SPOTIFY_DEALER_URL.to_string(),
            accounts_token_url: SPOTIFY_ACCOUNTS_TOKEN_URL.to_string(),
            web_token_url: SPOTIFY_WEB_TOKEN_URL.to_string(),
            relay_url: None,
            totp_secret_cipher: TOTP_SECRET_CIPHER.to_vec(),
            totp_version: TOTP_VERSION,
            dealer_ping_interval_secs: DEALER_PING_INTERVAL_SECS,
        }
    }
}

/// Configuration for the now-playing relay.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Manager
    /// Delay before a dropped handler is re-activated (seconds).
    pub reconnect_delay_secs: u64,

    /// Maximum consecutive reconnect attempts; `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,

    // Lyrics
    /// Lyrics cache entry lifetime (seconds).
    pub lyrics_cache_expiration_secs: u64,

    /// Interval between cache sweep + persist cycles (seconds).
    pub cache_sweep_interval_secs: u64,

    /// Lyrics lookup base URL.
    pub lyrics_base_url: String,

    // Upstream
    /// Timeout for upstream HTTP requests (seconds).
    pub http_timeout_secs: u64,

    /// Spotify endpoints and token parameters.
    pub spotify: SpotifyEndpoints,

    // WebSocket
    /// Shared secret display clients pass as `?token=`; `None` disables auth.
    pub client_token: Option<String>,

    /// Origin prefixes allowed by CORS; empty allows any origin.
    pub trusted_origins: Vec<String>,

    /// WebSocket heartbeat timeout (seconds).
    pub ws_heartbeat_timeout_secs: u64,

    /// Interval between WebSocket heartbeat checks (seconds).
    pub ws_heartbeat_check_interval_secs: u64,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.reconnect_delay_secs == 0 {
            return Err("reconnect_delay_secs must be >= 1".to_string());
        }
        if self.max_reconnect_attempts == Some(0) {
            return Err("max_reconnect_attempts must be >= 1 when set".to_string());
        }
        if self.lyrics_cache_expiration_secs == 0 {
            return Err("lyrics_cache_expiration_secs must be >= 1".to_string());
        }
        if self.cache_sweep_interval_secs == 0 {
            return Err("cache_sweep_interval_secs must be >= 1".to_string());
        }
        if self.http_timeout_secs == 0 {
            return Err("http_timeout_secs must be >= 1".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        if self.ws_heartbeat_check_interval_secs == 0 {
            return Err("ws_heartbeat_check_interval_secs must be >= 1".to_string());
        }
        if self.ws_heartbeat_timeout_secs <= self.ws_heartbeat_check_interval_secs {
            return Err(
                "ws_heartbeat_timeout_secs must exceed ws_heartbeat_check_interval_secs"
                    .to_string(),
            );
        }
        self.spotify.validate()
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    #[must_use]
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: RECONNECT_DELAY_SECS,
            max_reconnect_attempts: None,
            lyrics_cache_expiration_secs: LYRICS_CACHE_EXPIRATION_SECS,
            cache_sweep_interval_secs: CACHE_SWEEP_INTERVAL_SECS,
            lyrics_base_url: LRCLIB_BASE_URL.to_string(),
            http_timeout_secs: HTTP_TIMEOUT_SECS,
            spotify: SpotifyEndpoints::default(),
            client_token: None,
            trusted_origins: Vec::new(),
            ws_heartbeat_timeout_secs: WS_HEARTBEAT_TIMEOUT_SECS,
            ws_heartbeat_check_interval_secs: WS_HEARTBEAT_CHECK_INTERVAL_SECS,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert!(config.max_reconnect_attempts.is_none());
        assert_eq!(config.spotify.dealer_ping_interval(), Duration::from_secs(15));
    }

    #[test]
    fn config_rejects_zero_values() {
        let mut config = Config::default();
        config.event_channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_reconnect_attempts = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.spotify.dealer_url = "https://dealer.example".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_yaml_style_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"reconnect_delay_secs": 2, "spotify": {"relay_url": "https://relay.example/token"}}"#)
                .unwrap();
        assert_eq!(config.reconnect_delay_secs, 2);
        assert_eq!(config.spotify.api_base, SPOTIFY_API_BASE);
        assert_eq!(
            config.spotify.relay_url.as_deref(),
            Some("https://relay.example/token")
        );
    }
}
