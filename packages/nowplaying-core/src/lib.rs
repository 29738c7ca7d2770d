//! Now-playing relay core.
//!
//! This crate keeps exactly one playback backend active at a time, tracks
//! what it is playing, forwards control commands to it, and broadcasts a
//! unified snapshot to display clients over WebSocket.
//!
//! # Architecture
//!
//! - [`playback`]: data model, the [`PlaybackHandler`](playback::PlaybackHandler)
//!   contract, and the [`PlaybackManager`](playback::PlaybackManager)
//! - [`spotify`]: official and relayed-token Spotify backends
//! - [`native`]: OS now-playing backend behind a bridge trait
//! - [`lyrics`] / [`cache`]: line-synced lyrics with a persistent TTL cache
//! - [`events`]: broadcast events for display clients
//! - [`api`]: axum router, display-client WebSocket, native helper endpoints
//! - [`bootstrap`]: composition root
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning cancellable background tasks
//! - [`EventEmitter`](events::EventEmitter): emitting domain events
//! - [`KeyValueStore`](store::KeyValueStore): persistence
//! - [`NowPlayingBridge`](native::NowPlayingBridge): platform metadata source

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod error;
pub mod events;
pub mod lyrics;
pub mod native;
pub mod playback;
pub mod protocol_constants;
pub mod runtime;
pub mod spotify;
pub mod state;
pub mod store;
pub mod utils;

// Re-export commonly used types at the crate root
pub use error::{ErrorCode, PlaybackError, PlaybackResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, EventEmitter, HandlerStatusEvent, PlaybackEvent,
};
pub use playback::{
    Capability, HandlerConfig, HandlerFactory, HandlerKind, HandlerState, PlaybackData,
    PlaybackHandler, PlaybackManager, RepeatMode,
};
pub use runtime::{ScheduledTask, TaskSpawner, TokioSpawner};
pub use state::{Config, SpotifyEndpoints};
pub use store::{HandlerSettings, JsonFileStore, KeyValueStore, MemoryStore};
pub use utils::{mask_secret, now_millis};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices, DefaultHandlerFactory};

// Re-export API types
pub use api::{serve, start_server, AppState, ServerError, WsConnectionManager};
