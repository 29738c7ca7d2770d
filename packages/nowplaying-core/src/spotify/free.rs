//! Relay-credential mode (`spotify-free`).
//!
//! REST requests always use the relay token. The dealer socket uses a web
//! token when an `sp_dc` cookie is configured, and the relay token
//! otherwise.

use std::sync::Arc;

use super::auth::{RelayTokenSource, TokenSource};
use super::handler::{CredentialMode, Credentials, SpotifyBackend, SpotifyContext};
use crate::error::{PlaybackError, PlaybackResult};
use crate::lyrics::LyricsService;
use crate::playback::{Capability, HandlerConfig, HandlerKind};

/// Credential shape accepted by the `spotify-free` handler.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct RelayConfig<'a> {
    pub token: &'a str,
    pub connection_id: &'a str,
    pub sp_dc: Option<&'a str>,
}

pub(super) fn parse_relay(config: &HandlerConfig) -> Result<RelayConfig<'_>, String> {
    match (config.str_field("token"), config.str_field("connection_id")) {
        (Some(token), Some(connection_id)) => Ok(RelayConfig {
            token,
            connection_id,
            sp_dc: config.str_field("sp_dc"),
        }),
        _ => Err("token and connection_id are required".to_string()),
    }
}

/// Relay-minted tokens plus synced lyrics.
pub struct RelayCredentials {
    lyrics: Arc<LyricsService>,
}

impl RelayCredentials {
    pub fn new(lyrics: Arc<LyricsService>) -> Self {
        Self { lyrics }
    }
}

impl CredentialMode for RelayCredentials {
    const KIND: HandlerKind = HandlerKind::SpotifyFree;

    fn credentials(&self, ctx: &SpotifyContext, config: &HandlerConfig) -> PlaybackResult<Credentials> {
        let parsed = parse_relay(config).map_err(PlaybackError::ConfigInvalid)?;
        let relay_url = ctx
            .endpoints
            .relay_url
            .as_deref()
            .ok_or_else(|| PlaybackError::ConfigInvalid("spotify.relay_url is not configured".to_string()))?;

        let rest: Arc<dyn TokenSource> = Arc::new(RelayTokenSource::new(
            ctx.client.clone(),
            relay_url,
            parsed.token,
            parsed.connection_id,
        ));
        let dealer = match parsed.sp_dc {
            Some(sp_dc) => ctx.web_tokens(sp_dc),
            None => Arc::clone(&rest),
        };
        Ok(Credentials { rest, dealer })
    }

    fn extra_capabilities(&self) -> Vec<Capability> {
        vec![Capability::Lyrics]
    }

    fn lyrics(&self) -> Option<&LyricsService> {
        Some(&self.lyrics)
    }
}

/// The `spotify-free` handler.
pub type SpotifyFreeHandler = SpotifyBackend<RelayCredentials>;

impl SpotifyBackend<RelayCredentials> {
    pub fn relay(ctx: SpotifyContext, lyrics: Arc<LyricsService>) -> Self {
        Self::with_mode(ctx, RelayCredentials::new(lyrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lyrics::{LrclibFetcher, LyricsResult};
    use crate::playback::PlaybackHandler;
    use crate::runtime::TokioSpawner;
    use crate::state::SpotifyEndpoints;
    use serde_json::json;
    use std::time::Duration;

    fn handler(relay_url: Option<&str>) -> SpotifyFreeHandler {
        let client = reqwest::Client::new();
        let lyrics = Arc::new(LyricsService::new(
            Arc::new(LyricsService::new_cache(Duration::from_secs(60))),
            Arc::new(LrclibFetcher::new(client.clone(), "http://127.0.0.1:9")),
        ));
        let ctx = SpotifyContext {
            client,
            endpoints: SpotifyEndpoints {
                relay_url: relay_url.map(str::to_string),
                ..SpotifyEndpoints::default()
            },
            spawner: TokioSpawner::current(),
        };
        SpotifyFreeHandler::relay(ctx, lyrics)
    }

    #[test]
    fn relay_shape() {
        let cfg = HandlerConfig::new(json!({"token": "t", "connection_id": "c"}));
        assert_eq!(
            parse_relay(&cfg),
            Ok(RelayConfig {
                token: "t",
                connection_id: "c",
                sp_dc: None
            })
        );
        assert!(parse_relay(&HandlerConfig::new(json!({"token": "t"}))).is_err());
    }

    #[tokio::test]
    async fn dealer_prefers_web_token_when_cookie_present() {
        let backend = handler(Some("http://relay.invalid/token"));
        let ctx = SpotifyContext {
            client: reqwest::Client::new(),
            endpoints: SpotifyEndpoints {
                relay_url: Some("http://relay.invalid/token".to_string()),
                ..SpotifyEndpoints::default()
            },
            spawner: TokioSpawner::current(),
        };

        let with_cookie = HandlerConfig::new(json!({"token": "t", "connection_id": "c", "sp_dc": "cookie"}));
        let creds = backend.mode().credentials(&ctx, &with_cookie).unwrap();
        assert_eq!(creds.rest.label(), "relay");
        assert_eq!(creds.dealer.label(), "web");

        let without = HandlerConfig::new(json!({"token": "t", "connection_id": "c"}));
        let creds = backend.mode().credentials(&ctx, &without).unwrap();
        assert_eq!(creds.dealer.label(), "relay");
    }

    #[tokio::test]
    async fn missing_relay_url_is_invalid_config() {
        let backend = handler(None);
        let cfg = HandlerConfig::new(json!({"token": "t", "connection_id": "c"}));
        let err = backend.validate_config(&cfg).await.unwrap_err();
        assert!(matches!(err, PlaybackError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn lyrics_without_playback_reports_message() {
        let backend = handler(Some("http://relay.invalid/token"));
        let result = backend.get_lyrics().await.unwrap();
        assert_eq!(result, LyricsResult::message("Nothing is playing"));
        assert_eq!(backend.name(), "spotify-free");
    }
}
