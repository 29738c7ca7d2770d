//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for the manager to emit events
//! - [`BroadcastEventBridge`] for WebSocket transport
//! - Event types for playback state and handler lifecycle

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::playback::PlaybackData;

/// Events broadcast to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Playback snapshot changes.
    Playback(PlaybackEvent),

    /// Handler lifecycle changes.
    Handler(HandlerStatusEvent),
}

/// Playback state changes re-emitted from the active handler.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// New snapshot; `None` means nothing is playing.
    Updated {
        data: Option<PlaybackData>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

impl PlaybackEvent {
    pub fn updated(data: Option<PlaybackData>) -> Self {
        Self::Updated {
            data,
            timestamp: crate::utils::now_millis(),
        }
    }
}

/// Handler lifecycle events, tagged with the handler name.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HandlerStatusEvent {
    /// A handler finished setup and became the active backend.
    Activated { handler: String, timestamp: u64 },
    /// The handler's realtime channel is live.
    Connected { handler: String, timestamp: u64 },
    /// The handler's realtime channel dropped.
    Disconnected { handler: String, timestamp: u64 },
    /// The handler was torn down (switch, deactivate, shutdown).
    Deactivated { handler: String, timestamp: u64 },
    /// Non-fatal upstream fault.
    Error {
        handler: String,
        message: String,
        timestamp: u64,
    },
}

impl HandlerStatusEvent {
    /// Name of the handler the event concerns.
    pub fn handler(&self) -> &str {
        match self {
            Self::Activated { handler, .. }
            | Self::Connected { handler, .. }
            | Self::Disconnected { handler, .. }
            | Self::Deactivated { handler, .. }
            | Self::Error { handler, .. } => handler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_snapshot_serializes_with_category() {
        let event = BroadcastEvent::Playback(PlaybackEvent::Updated {
            data: None,
            timestamp: 7,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"category": "playback", "type": "updated", "data": null, "timestamp": 7})
        );
    }

    #[test]
    fn handler_event_exposes_name() {
        let event = HandlerStatusEvent::Connected {
            handler: "spotify".into(),
            timestamp: 0,
        };
        assert_eq!(event.handler(), "spotify");
    }
}
