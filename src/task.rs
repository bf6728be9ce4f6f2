//! Stoppable periodic background tasks.
//!
//! Lifecycle: `NotStarted -> Running -> Stopped`. `Stopped` is terminal;
//! stopping a task that never started moves it straight there.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    Running,
    Stopped,
}

enum Lifecycle {
    NotStarted,
    Running {
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> TaskState {
        match self {
            Lifecycle::NotStarted => TaskState::NotStarted,
            Lifecycle::Running { .. } => TaskState::Running,
            Lifecycle::Stopped => TaskState::Stopped,
        }
    }
}

/// A named task that runs `tick` on a fixed interval until stopped.
pub struct PeriodicTask {
    name: &'static str,
    lifecycle: Mutex<Lifecycle>,
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            lifecycle: Mutex::new(Lifecycle::NotStarted),
        }
    }

    pub fn state(&self) -> TaskState {
        self.lock().state()
    }

    /// Spawns the loop; the first tick fires immediately. Returns false,
    /// spawning nothing, unless the task is `NotStarted`.
    ///
    /// A tick that has begun always runs to completion before the loop
    /// looks at the stop signal again.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, every: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut lifecycle = self.lock();
        if !matches!(*lifecycle, Lifecycle::NotStarted) {
            warn!(task = self.name, state = ?lifecycle.state(), "Task start ignored");
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let name = self.name;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!(task = name, "Task loop exited");
        });

        info!(task = self.name, interval_ms = every.as_millis() as u64, "Task started");
        *lifecycle = Lifecycle::Running { shutdown, handle };
        true
    }

    /// Signals the loop to stop and waits for it to exit. Safe to call in
    /// any state and more than once.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lock(), Lifecycle::Stopped);

        if let Lifecycle::Running { shutdown, handle } = previous {
            let _ = shutdown.send(true);
            if let Err(err) = handle.await {
                warn!(task = self.name, error = %err, "Task ended abnormally");
            }
            info!(task = self.name, "Task stopped");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
