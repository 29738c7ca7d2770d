//! HTTP/WebSocket API layer.
//!
//! Thin handlers over the [`PlaybackManager`]: the display-client socket,
//! handler selection, and the endpoints a native platform helper talks to.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::events::BroadcastEventBridge;
use crate::native::ChannelBridge;
use crate::playback::PlaybackManager;
use crate::state::Config;
use crate::store::KeyValueStore;

pub mod http;
pub mod native;
pub mod response;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::{ConnectionKind, WsConnectionManager};

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or serve on the TCP socket.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    /// Owns the active playback handler.
    pub manager: Arc<PlaybackManager>,
    /// Fan-out of manager events to WebSocket clients.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Open sockets, force-closed on shutdown.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Platform helper seam used by the native handler.
    pub native_bridge: Arc<ChannelBridge>,
    /// Persisted handler selection and configuration.
    pub store: Arc<dyn KeyValueStore>,
    pub config: Arc<Config>,
}

impl AppState {
    /// True when no client token is configured or `token` matches it.
    #[must_use]
    pub fn is_authorized(&self, token: Option<&str>) -> bool {
        match self.config.client_token.as_deref() {
            None => true,
            Some(expected) => token == Some(expected),
        }
    }
}

/// `?token=` query parameter accepted by protected endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct AuthQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Binds `addr` and serves until `shutdown` resolves.
pub async fn start_server<F>(state: AppState, addr: SocketAddr, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await
}

/// Serves on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr()?;
    log::info!("Server listening on http://{}", local);

    let app = http::create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    log::info!("Server stopped");
    Ok(())
}
