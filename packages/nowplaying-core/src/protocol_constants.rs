//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by upstream services (Spotify Web API, dealer
//! socket, lyrics lookup) and the display-client wire protocol. Tunable
//! values live in [`crate::state::Config`]; the defaults there reference
//! the constants below.

// ─────────────────────────────────────────────────────────────────────────────
// Spotify Web API
// ─────────────────────────────────────────────────────────────────────────────

/// Base URL of the Spotify Web API.
pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

/// Accounts service endpoint for the OAuth refresh-token grant.
pub const SPOTIFY_ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Web-player token endpoint (sp_dc cookie + TOTP).
pub const SPOTIFY_WEB_TOKEN_URL: &str = "https://open.spotify.com/api/token";

/// Dealer push-socket endpoint.
pub const SPOTIFY_DEALER_URL: &str = "wss://dealer.spotify.com/";

/// Header carrying the connection id on the dealer's first message.
pub const DEALER_CONNECTION_ID_HEADER: &str = "Spotify-Connection-Id";

/// Interval between dealer keep-alive pings (seconds).
///
/// The dealer drops sockets that stay silent for roughly 30 seconds.
pub const DEALER_PING_INTERVAL_SECS: u64 = 15;

/// Default page size for library listings (Spotify's own default).
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Maximum page size the Web API accepts for library listings.
pub const MAX_PAGE_LIMIT: u32 = 50;

/// Tokens are treated as expired this long before their stated expiry (ms).
pub const TOKEN_EXPIRY_MARGIN_MS: u64 = 60_000;

// ─────────────────────────────────────────────────────────────────────────────
// TOTP (web-player token minting)
// ─────────────────────────────────────────────────────────────────────────────

/// TOTP step length (seconds).
pub const TOTP_PERIOD_SECS: u64 = 30;

/// Number of digits in a TOTP code.
pub const TOTP_DIGITS: u32 = 6;

/// Obfuscated bytes the web player derives its TOTP secret from.
pub const TOTP_SECRET_CIPHER: [u8; 17] = [
    12, 56, 76, 33, 88, 44, 88, 33, 78, 78, 11, 66, 22, 22, 55, 69, 54,
];

/// TOTP secret version reported alongside the code.
pub const TOTP_VERSION: u32 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Lyrics
// ─────────────────────────────────────────────────────────────────────────────

/// Base URL of the LRCLIB lyrics lookup service.
pub const LRCLIB_BASE_URL: &str = "https://lrclib.net/api";

/// Storage key for the persisted lyrics cache.
pub const LYRICS_CACHE_STORAGE_KEY: &str = "cache.lyrics";

/// Lyrics cache entry lifetime (seconds).
pub const LYRICS_CACHE_EXPIRATION_SECS: u64 = 24 * 60 * 60;

/// Interval between lyrics cache sweep + persist cycles (seconds).
pub const CACHE_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Message returned to clients when a track has no synced lyrics.
pub const NO_LYRICS_MESSAGE: &str = "No synced lyrics available for this track";

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Delay before a dropped handler is re-activated (seconds).
pub const RECONNECT_DELAY_SECS: u64 = 5;

/// Handler name meaning "no backend active".
pub const HANDLER_NONE: &str = "none";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP / WebSocket
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for upstream HTTP requests (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// Capacity of the broadcast channel feeding display clients.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Display-client heartbeat timeout (seconds).
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 60;

/// Interval between display-client heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 5;

/// Envelope `type` for the playback domain.
pub const PLAYBACK_MESSAGE_TYPE: &str = "playback";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "nowplaying-relay";

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// File name of the JSON key-value store inside the data directory.
pub const STORE_FILE: &str = "store.json";

/// Storage key holding the active handler name.
pub const ACTIVE_HANDLER_STORAGE_KEY: &str = "handler.active";

/// Storage key prefix for per-handler configuration blobs.
pub const HANDLER_CONFIG_STORAGE_PREFIX: &str = "handler.config.";
