//! WebSocket connection registry with force-close.
//!
//! - [`WsConnectionManager`]: tracks live sockets by kind
//! - [`ConnectionGuard`]: unregisters its socket when dropped

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Which endpoint a socket was opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Display client on `/ws`.
    Display,
    /// Platform helper on `/api/native/commands`.
    NativeHelper,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Display => f.write_str("display"),
            Self::NativeHelper => f.write_str("native-helper"),
        }
    }
}

struct ConnectionInfo {
    kind: ConnectionKind,
    opened_at: Instant,
}

/// Tracks every open socket.
///
/// All connection tokens are children of one global token, so
/// [`close_all`](Self::close_all) signals every socket at once.
pub struct WsConnectionManager {
    connections: DashMap<String, ConnectionInfo>,
    next_id: AtomicU64,
    /// Replaced after `close_all` so later sockets are unaffected.
    global_cancel: RwLock<CancellationToken>,
}

impl WsConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a socket; the guard unregisters it on drop.
    pub fn register(self: &Arc<Self>, kind: ConnectionKind) -> ConnectionGuard {
        let id = format!("ws-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel_token = self.global_cancel.read().child_token();

        self.connections.insert(
            id.clone(),
            ConnectionInfo {
                kind,
                opened_at: Instant::now(),
            },
        );
        log::info!(
            "[WS] {} connection registered: {} (total: {})",
            kind,
            id,
            self.connections.len()
        );

        ConnectionGuard {
            id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    fn unregister(&self, id: &str) {
        if let Some((_, info)) = self.connections.remove(id) {
            log::info!(
                "[WS] {} connection closed: {} after {:?} (remaining: {})",
                info.kind,
                id,
                info.opened_at.elapsed(),
                self.connections.len()
            );
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of open sockets of `kind`.
    #[must_use]
    pub fn count_of(&self, kind: ConnectionKind) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().kind == kind)
            .count()
    }

    /// Signals every open socket to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
        }
        let mut guard = self.global_cancel.write();
        guard.cancel();
        *guard = CancellationToken::new();
        count
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration handle for one socket.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancelled when the socket must close.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_unregister_on_drop() {
        let manager = Arc::new(WsConnectionManager::new());
        let a = manager.register(ConnectionKind::Display);
        let b = manager.register(ConnectionKind::NativeHelper);
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.connection_count(), 2);
        assert_eq!(manager.count_of(ConnectionKind::Display), 1);

        drop(a);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.count_of(ConnectionKind::Display), 0);
    }

    #[test]
    fn close_all_only_affects_existing_connections() {
        let manager = Arc::new(WsConnectionManager::new());
        let before = manager.register(ConnectionKind::Display);

        assert_eq!(manager.close_all(), 1);
        assert!(before.cancel_token().is_cancelled());

        let after = manager.register(ConnectionKind::Display);
        assert!(!after.cancel_token().is_cancelled());
    }
}
