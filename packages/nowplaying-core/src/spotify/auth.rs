//! Access-token sources.
//!
//! Each source knows how to mint a bearer token from its credential shape
//! and shares the same caching logic through [`TokenSource`]'s provided
//! methods:
//!
//! - [`WebTokenSource`]: `sp_dc` browser cookie + TOTP against the
//!   web-player token endpoint
//! - [`OAuthTokenSource`]: OAuth refresh-token grant
//! - [`RelayTokenSource`]: third-party session token + connection id
//!   exchanged at a relay endpoint

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde::Deserialize;

use super::totp::Totp;
use super::{SpotifyError, SpotifyResult};
use crate::protocol_constants::TOKEN_EXPIRY_MARGIN_MS;
use crate::utils::{mask_secret, now_millis};

/// Browser-like user agent; the web-token endpoint rejects unknown clients.
const WEB_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// A minted bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    /// Absolute expiry (epoch ms).
    pub expires_at_ms: u64,
}

/// Cached token plus a lock that serializes minting.
#[derive(Default)]
pub struct TokenCell {
    current: Mutex<Option<AccessToken>>,
    minting: tokio::sync::Mutex<()>,
}

impl TokenCell {
    /// Returns the cached token unless it is within the expiry margin.
    #[must_use]
    pub fn valid(&self) -> Option<String> {
        self.current
            .lock()
            .as_ref()
            .filter(|t| t.expires_at_ms > now_millis() + TOKEN_EXPIRY_MARGIN_MS)
            .map(|t| t.value.clone())
    }

    fn store(&self, token: AccessToken) -> String {
        let value = token.value.clone();
        *self.current.lock() = Some(token);
        value
    }

    fn clear(&self) {
        self.current.lock().take();
    }
}

/// Source of bearer tokens for the Web API and dealer socket.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Short label for logs.
    fn label(&self) -> &'static str;

    fn cell(&self) -> &TokenCell;

    /// Mints a new token from the underlying credentials.
    async fn mint(&self) -> SpotifyResult<AccessToken>;

    /// Returns the cached token, minting one if missing or near expiry.
    async fn token(&self) -> SpotifyResult<String> {
        if let Some(token) = self.cell().valid() {
            return Ok(token);
        }
        let _minting = self.cell().minting.lock().await;
        if let Some(token) = self.cell().valid() {
            return Ok(token);
        }
        let minted = self.mint().await?;
        log::debug!(
            "[Spotify] Minted {} token {}",
            self.label(),
            mask_secret(&minted.value)
        );
        Ok(self.cell().store(minted))
    }

    /// Discards the cached token and mints a new one. `None` on failure.
    async fn refresh(&self) -> Option<String> {
        let _minting = self.cell().minting.lock().await;
        self.cell().clear();
        match self.mint().await {
            Ok(minted) => Some(self.cell().store(minted)),
            Err(e) => {
                log::warn!("[Spotify] {} token refresh failed: {}", self.label(), e);
                None
            }
        }
    }
}

pub(super) async fn read_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> SpotifyResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SpotifyError::Status(status.as_u16(), body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| SpotifyError::Parse(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Web Token (sp_dc + TOTP)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebTokenResponse {
    access_token: String,
    access_token_expiration_timestamp_ms: u64,
    #[serde(default)]
    is_anonymous: bool,
}

/// Mints web-player tokens from the `sp_dc` session cookie.
pub struct WebTokenSource {
    client: reqwest::Client,
    url: String,
    sp_dc: String,
    totp: Totp,
    cell: TokenCell,
}

impl WebTokenSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>, sp_dc: impl Into<String>, totp: Totp) -> Self {
        Self {
            client,
            url: url.into(),
            sp_dc: sp_dc.into(),
            totp,
            cell: TokenCell::default(),
        }
    }
}

#[async_trait]
impl TokenSource for WebTokenSource {
    fn label(&self) -> &'static str {
        "web"
    }

    fn cell(&self) -> &TokenCell {
        &self.cell
    }

    async fn mint(&self) -> SpotifyResult<AccessToken> {
        let code = self.totp.now();
        let version = self.totp.version().to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("reason", "init"),
                ("productType", "web-player"),
                ("totp", code.as_str()),
                ("totpServer", code.as_str()),
                ("totpVer", version.as_str()),
            ])
            .header(reqwest::header::COOKIE, format!("sp_dc={}", self.sp_dc))
            .header(reqwest::header::USER_AGENT, WEB_USER_AGENT)
            .send()
            .await?;

        let body: WebTokenResponse = match read_json(response).await {
            Err(SpotifyError::Status(code @ (401 | 403), body)) => {
                return Err(SpotifyError::Auth(format!("sp_dc cookie rejected ({code}): {body}")))
            }
            other => other?,
        };
        if body.is_anonymous {
            return Err(SpotifyError::Auth(
                "sp_dc cookie was not accepted (anonymous token)".to_string(),
            ));
        }
        Ok(AccessToken {
            value: body.access_token,
            expires_at_ms: body.access_token_expiration_timestamp_ms,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OAuth Refresh Token
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Exchanges an OAuth refresh token for access tokens.
pub struct OAuthTokenSource {
    client: reqwest::Client,
    url: String,
    client_id: String,
    client_secret: String,
    refresh_token: Mutex<String>,
    cell: TokenCell,
}

impl OAuthTokenSource {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: Mutex::new(refresh_token.into()),
            cell: TokenCell::default(),
        }
    }

    fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", BASE64.encode(raw))
    }
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    fn label(&self) -> &'static str {
        "oauth"
    }

    fn cell(&self) -> &TokenCell {
        &self.cell
    }

    async fn mint(&self) -> SpotifyResult<AccessToken> {
        let refresh_token = self.refresh_token.lock().clone();
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, self.basic_auth())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await?;

        let body: OAuthTokenResponse = match read_json(response).await {
            Err(SpotifyError::Status(400 | 401, body)) => return Err(SpotifyError::Auth(body)),
            other => other?,
        };
        if let Some(rotated) = body.refresh_token {
            *self.refresh_token.lock() = rotated;
        }
        Ok(AccessToken {
            value: body.access_token,
            expires_at_ms: now_millis() + body.expires_in * 1000,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayTokenResponse {
    access_token: String,
    #[serde(default = "default_relay_expiry")]
    expires_in: u64,
}

fn default_relay_expiry() -> u64 {
    3600
}

/// Obtains access tokens from a relay using a session token and the
/// relay-assigned connection id.
pub struct RelayTokenSource {
    client: reqwest::Client,
    url: String,
    session_token: String,
    connection_id: String,
    cell: TokenCell,
}

impl RelayTokenSource {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        session_token: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            session_token: session_token.into(),
            connection_id: connection_id.into(),
            cell: TokenCell::default(),
        }
    }
}

#[async_trait]
impl TokenSource for RelayTokenSource {
    fn label(&self) -> &'static str {
        "relay"
    }

    fn cell(&self) -> &TokenCell {
        &self.cell
    }

    async fn mint(&self) -> SpotifyResult<AccessToken> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "token": self.session_token,
                "connectionId": self.connection_id,
            }))
            .send()
            .await?;

        let body: RelayTokenResponse = match read_json(response).await {
            Err(SpotifyError::Status(code @ (401 | 403), body)) => {
                return Err(SpotifyError::Auth(format!("relay rejected session ({code}): {body}")))
            }
            other => other?,
        };
        Ok(AccessToken {
            value: body.access_token,
            expires_at_ms: now_millis() + body.expires_in * 1000,
        })
    }
}
