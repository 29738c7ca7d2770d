//! Spotify Connect backends.
//!
//! Both backends share one implementation ([`SpotifyBackend`]); they differ
//! only in how credentials are obtained:
//!
//! - [`SpotifyHandler`] ("spotify"): `sp_dc` web-player cookie or an OAuth
//!   refresh token. Web API for commands and library, dealer socket for
//!   realtime state.
//! - [`SpotifyFreeHandler`] ("spotify-free"): tokens minted by a relay
//!   service, with synced lyrics from the lyrics lookup.

mod api;
mod auth;
mod dealer;
mod free;
mod handler;
mod mapping;
mod retry;
mod session;
mod totp;

use thiserror::Error;

pub use auth::{AccessToken, OAuthTokenSource, RelayTokenSource, TokenCell, TokenSource, WebTokenSource};
pub use dealer::{parse_message, DealerMessage};
pub use free::{RelayCredentials, SpotifyFreeHandler};
pub use handler::{
    CredentialMode, Credentials, OfficialCredentials, SpotifyBackend, SpotifyContext,
    SpotifyHandler,
};
pub use mapping::{map_player_state, repeat_from_spotify, repeat_to_spotify, PlayerState};
pub use totp::Totp;

/// Errors from the Spotify Web API, token endpoints, and dealer socket.
#[derive(Debug, Error)]
pub enum SpotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Spotify returned {0}: {1}")]
    Status(u16, String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unexpected response: {0}")]
    Parse(String),

    #[error("Dealer socket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Dealer handshake failed: {0}")]
    Handshake(String),
}

pub type SpotifyResult<T> = Result<T, SpotifyError>;
