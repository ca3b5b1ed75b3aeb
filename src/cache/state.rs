use super::errors::{CacheError, lifecycle_misuse_error};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

/// Lifecycle of a watch cache. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheState {
    Latent,
    Starting,
    Started,
    Stopped,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Latent => "latent",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Observable, awaitable lifecycle shared between the public handle and the worker.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: watch::Sender<CacheState>,
    initialized: watch::Sender<bool>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(CacheState::Latent);
        let (initialized, _) = watch::channel(false);
        Self { state, initialized }
    }

    pub(crate) fn current(&self) -> CacheState {
        *self.state.borrow()
    }

    /// `latent -> starting`; any other source state is a misuse.
    pub(crate) fn begin_start(&self) -> Result<(), CacheError> {
        let mut observed = CacheState::Latent;
        let moved = self.state.send_if_modified(|state| {
            observed = *state;
            if *state == CacheState::Latent {
                *state = CacheState::Starting;
                true
            } else {
                false
            }
        });
        if moved {
            Ok(())
        } else {
            Err(lifecycle_misuse_error(observed))
        }
    }

    /// `starting -> started`, releasing initialization waiters. Returns true on the transition.
    pub(crate) fn mark_started(&self) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state == CacheState::Starting {
                *state = CacheState::Started;
                true
            } else {
                false
            }
        });
        if moved {
            self.initialized.send_replace(true);
        }
        moved
    }

    /// Moves to the terminal state. Returns false if already stopped.
    pub(crate) fn mark_stopped(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == CacheState::Stopped {
                false
            } else {
                *state = CacheState::Stopped;
                true
            }
        })
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.current() == CacheState::Stopped
    }

    pub(crate) async fn await_initialized(&self, timeout: Duration) -> bool {
        let mut rx = self.initialized.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|initialized| *initialized)).await,
            Ok(Ok(_))
        )
    }
}
