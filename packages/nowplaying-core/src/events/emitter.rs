//! Event emitter abstraction for decoupling the manager from transport.
//!
//! The manager depends on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative transports.

use super::{HandlerStatusEvent, PlaybackEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn publish(&self, data: Option<PlaybackData>) {
///         self.emitter.emit_playback(PlaybackEvent::updated(data));
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a playback snapshot change.
    fn emit_playback(&self, event: PlaybackEvent);

    /// Emits a handler lifecycle change.
    fn emit_handler(&self, event: HandlerStatusEvent);
}

/// No-op emitter for testing.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_playback(&self, _event: PlaybackEvent) {}

    fn emit_handler(&self, _event: HandlerStatusEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level. The server attaches it as the bridge's
/// external emitter when running at debug verbosity.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_playback(&self, event: PlaybackEvent) {
        tracing::debug!(?event, "playback_event");
    }

    fn emit_handler(&self, event: HandlerStatusEvent) {
        tracing::debug!(?event, "handler_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts events.
    struct CountingEventEmitter {
        playback_count: AtomicUsize,
        handler_count: AtomicUsize,
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_playback(&self, _event: PlaybackEvent) {
            self.playback_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_handler(&self, _event: HandlerStatusEvent) {
            self.handler_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn emitters_are_object_safe() {
        let counting = Arc::new(CountingEventEmitter {
            playback_count: AtomicUsize::new(0),
            handler_count: AtomicUsize::new(0),
        });
        let emitters: Vec<Arc<dyn EventEmitter>> = vec![
            Arc::new(NoopEventEmitter),
            Arc::new(LoggingEventEmitter),
            counting.clone(),
        ];

        for emitter in &emitters {
            emitter.emit_playback(PlaybackEvent::updated(None));
            emitter.emit_handler(HandlerStatusEvent::Activated {
                handler: "native".into(),
                timestamp: 0,
            });
        }

        assert_eq!(counting.playback_count.load(Ordering::SeqCst), 1);
        assert_eq!(counting.handler_count.load(Ordering::SeqCst), 1);
    }
}
