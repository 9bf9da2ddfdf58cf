//! Connectivity tracking and background scheduling.
//!
//! Connectivity comes from two sources: platform pushes through
//! [`SyncEngine::set_online`], and a periodic [`ConnectivityProbe`] check.
//! Going online starts a pass immediately. A separate scheduler attempts a
//! pass every `sync_interval`.

use crate::engine::SyncEngine;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use flowsync_protocol::SyncEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Answers "are we online right now?".
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Checks connectivity.
    async fn check(&self) -> bool;
}

/// A probe reporting a value set by the caller.
#[derive(Debug)]
pub struct StaticProbe {
    online: AtomicBool,
}

impl StaticProbe {
    /// Creates a probe reporting `online`.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Changes the reported connectivity.
    pub fn set(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn check(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl SyncEngine {
    /// Records a connectivity signal. Returns true if connectivity changed.
    ///
    /// Repeated identical signals are no-ops. A change emits a `connection`
    /// event; going online also starts a pass.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.mutate_if(|state| {
            if state.is_online == online {
                return false;
            }
            state.is_online = online;
            true
        });
        if !changed {
            return false;
        }

        info!(online, "connectivity changed");
        self.emit(SyncEvent::connection(online));
        if online {
            self.spawn_sync();
        }
        true
    }

    /// Checks connectivity through `probe` and records the result.
    pub async fn poll_connectivity(&self, probe: &dyn ConnectivityProbe) -> bool {
        let online = probe.check().await;
        self.set_online(online)
    }

    /// Spawns the periodic sync scheduler and, if a probe is given, the
    /// connectivity poller on the current tokio runtime.
    ///
    /// The tasks hold only weak references and stop once the engine is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `NoRuntime` when called outside a tokio runtime.
    pub fn spawn_background(
        &self,
        probe: Option<Arc<dyn ConnectivityProbe>>,
    ) -> EngineResult<BackgroundTasks> {
        let handle = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let mut handles = Vec::with_capacity(2);

        handles.push(handle.spawn(run_scheduler(
            self.weak(),
            self.config().sync_interval,
        )));

        if let Some(probe) = probe {
            handles.push(handle.spawn(run_poller(
                self.weak(),
                probe,
                self.config().connectivity_poll_interval,
            )));
        }

        debug!(tasks = handles.len(), "background tasks started");
        Ok(BackgroundTasks { handles })
    }
}

async fn run_scheduler(engine: Weak<SyncEngine>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(engine) = engine.upgrade() else {
            break;
        };
        engine.trigger_sync().await;
    }
}

async fn run_poller(engine: Weak<SyncEngine>, probe: Arc<dyn ConnectivityProbe>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(engine) = engine.upgrade() else {
            break;
        };
        engine.poll_connectivity(probe.as_ref()).await;
    }
}

/// Handles to the engine's background tasks. Dropping aborts them.
#[derive(Debug)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Number of running tasks.
    pub fn len(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Returns true if no task is running.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aborts the tasks and waits for them to end.
    pub async fn shutdown(mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
