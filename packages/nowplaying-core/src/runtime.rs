//! Task spawning abstraction with cancellation handles.
//!
//! This module provides a [`TaskSpawner`] trait that allows the core library
//! to spawn background tasks without being tied to a specific runtime handle,
//! and a [`ScheduledTask`] handle that every spawned task is tracked by.
//! Owners hold the handles they were issued and cancel them on cleanup;
//! dropping a handle cancels the task, so a forgotten handle cannot leak a
//! timer or socket loop.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Cancellation handle for a spawned background task.
///
/// Cancelling is idempotent. The task observes cancellation at its next
/// suspension point and is additionally aborted, so no further code of the
/// task runs after [`ScheduledTask::cancel`] returns and the runtime polls it.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Returns the diagnostic name given at spawn time.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancels the task.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            log::debug!("[Runtime] Cancelling task '{}'", self.name);
        }
        self.cancel.cancel();
        self.handle.abort();
    }

    /// Returns true once the task has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns true once the task has run to completion or was aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Returns a token that is cancelled together with this task.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Abstraction for spawning background tasks.
///
/// Allows core services to spawn asynchronous work without knowing the
/// underlying runtime. Every spawn returns a [`ScheduledTask`] handle.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     spawner: TokioSpawner,
///     sweep: Option<ScheduledTask>,
/// }
///
/// impl MyService {
///     fn start(&mut self) {
///         self.sweep = Some(self.spawner.spawn_interval("sweep", period, || async {
///             // Periodic work here
///         }));
///     }
/// }
/// ```
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a cancellable background task.
    fn spawn<F>(&self, name: &'static str, future: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static;

    /// Spawns a future that starts after `delay`.
    fn spawn_after<F>(&self, name: &'static str, delay: Duration, future: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(name, async move {
            tokio::time::sleep(delay).await;
            future.await;
        })
    }

    /// Spawns a periodic task. The first tick fires one `period` after spawn.
    ///
    /// Missed ticks are delayed rather than bursted.
    fn spawn_interval<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F) -> ScheduledTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(name, async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        })
    }
}

/// Tokio-based spawner for the standalone server and general use.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, name: &'static str, future: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let handle = self.handle.spawn(async move {
            tokio::select! {
                _ = child.cancelled() => {}
                _ = future => {}
            }
        });
        ScheduledTask {
            name,
            cancel,
            handle,
        }
    }
}
