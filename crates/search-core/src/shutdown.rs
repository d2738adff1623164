// search-core/src/shutdown.rs
//! Process-wide shutdown coordination
//!
//! Every long-running unit of work (a query session, one backend
//! evaluation, a rescan) brackets itself with `worker_begin`/`worker_end`.
//! `begin_shutdown` raises the shutdown flag, runs the registered shutdown
//! handlers, then blocks until the worker count drains to zero and finally
//! stops the main loop.
//!
//! `worker_begin` does not look at the shutdown flag: work admitted while a
//! drain is in progress is simply waited for. Callers that should stop taking
//! new work poll `shutdown_requested`.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ShutdownConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(u64);

type ShutdownHandler = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ShutdownState {
    workers: BTreeMap<WorkerId, String>,
    next_worker: u64,
    requested: bool,
}

pub struct Shutdown {
    state: Mutex<ShutdownState>,
    drained: Condvar,
    /// Mirror of `state.requested` for lock-free polling
    requested: AtomicBool,
    handlers: Mutex<Vec<ShutdownHandler>>,
    main_loop: CancellationToken,
    poll_interval: Duration,
}

impl Shutdown {
    pub fn new(config: &ShutdownConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ShutdownState::default()),
            drained: Condvar::new(),
            requested: AtomicBool::new(false),
            handlers: Mutex::new(Vec::new()),
            main_loop: CancellationToken::new(),
            poll_interval: config.poll_interval,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ShutdownState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn worker_begin(&self, name: impl Into<String>) -> WorkerId {
        let name = name.into();
        let mut state = self.lock();
        let id = WorkerId(state.next_worker);
        state.next_worker += 1;
        debug!("worker added: name={} count={}", name, state.workers.len() + 1);
        state.workers.insert(id, name);
        id
    }

    /// # Panics
    ///
    /// Ending a worker that was never begun (or was already ended) corrupts
    /// the drain invariant and panics.
    pub fn worker_end(&self, id: WorkerId) {
        let mut state = self.lock();
        let Some(name) = state.workers.remove(&id) else {
            drop(state);
            panic!("worker_end called for unknown worker {id:?}");
        };
        debug!("worker removed: name={} count={}", name, state.workers.len());
        self.drained.notify_all();
    }

    /// RAII form of `worker_begin`/`worker_end`.
    pub fn worker(self: &Arc<Self>, name: impl Into<String>) -> WorkerGuard {
        WorkerGuard {
            id: self.worker_begin(name),
            shutdown: Arc::clone(self),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.lock().workers.len()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Registers a callback run once when shutdown begins, before draining.
    /// Registering after shutdown began runs nothing.
    pub fn on_shutdown<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shutdown_requested() {
            warn!("shutdown handler registered after shutdown began; ignoring");
            return;
        }
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(handler));
    }

    /// Token cancelled once the drain completes; the serve loop exits on it.
    pub fn main_loop(&self) -> CancellationToken {
        self.main_loop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.main_loop.is_cancelled()
    }

    /// Requests shutdown and blocks the calling thread until every worker
    /// has ended, then stops the main loop.
    ///
    /// Returns false without blocking if shutdown had already been requested.
    pub fn begin_shutdown(&self) -> bool {
        {
            let mut state = self.lock();
            if state.requested {
                return false;
            }
            state.requested = true;
            self.requested.store(true, Ordering::Release);
        }
        info!("Shutdown requested");

        let handlers = std::mem::take(&mut *self.handlers.lock().unwrap_or_else(PoisonError::into_inner));
        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(handler)).is_err() {
                warn!("Caught panic in shutdown handler");
            }
        }

        let mut round = 0u64;
        let mut state = self.lock();
        while !state.workers.is_empty() {
            round += 1;
            let count = state.workers.len();
            debug!(
                "({}) Waiting for {} worker{}...",
                round,
                count,
                if count > 1 { "s" } else { "" }
            );
            for name in state.workers.values() {
                debug!("waiting for {}", name);
            }
            state = self
                .drained
                .wait_timeout(state, self.poll_interval)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        drop(state);

        info!("All workers have finished. Exiting main loop.");
        self.main_loop.cancel();
        true
    }
}

/// Ends its worker when dropped.
#[must_use = "the worker ends as soon as the guard is dropped"]
pub struct WorkerGuard {
    id: WorkerId,
    shutdown: Arc<Shutdown>,
}

impl WorkerGuard {
    pub fn id(&self) -> WorkerId {
        self.id
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.shutdown.worker_end(self.id);
    }
}
