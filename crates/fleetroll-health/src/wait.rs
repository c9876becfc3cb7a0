//! Timeout-bounded polling.
//!
//! Every convergence wait in fleetroll is one [`Waiter::until`] call:
//!
//! ```text
//! deadline = now + timeout
//! loop:
//!   shutdown signalled?      → Cancelled
//!   probe() == true          → Ok
//!   now ≥ deadline           → Timeout { what, waited, at }
//!   sleep min(interval, deadline - now)   (aborted by shutdown)
//! ```
//!
//! The probe always runs at least once, so a zero timeout still checks the
//! condition before giving up.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::debug;

use fleetroll_core::config::{DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use fleetroll_core::*;

/// Poll interval and overall deadline for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Cancellable timed wait, shared by all convergence loops.
#[derive(Debug, Clone)]
pub struct Waiter {
    config: WaitConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Waiter {
    pub fn new(config: WaitConfig) -> Self {
        Self {
            config,
            shutdown: None,
        }
    }

    /// Abort waits once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> WaitConfig {
        self.config
    }

    /// Poll `probe` until it reports `true`, the deadline passes or the
    /// shutdown signal fires. Probe errors end the wait immediately.
    pub async fn until<F, Fut>(&self, what: &str, mut probe: F) -> FleetResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FleetResult<bool>>,
    {
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let mut shutdown = self.shutdown.clone();
        let mut polls = 0u32;

        loop {
            if is_signalled(&shutdown) {
                return Err(cancelled(what));
            }

            polls += 1;
            if probe().await? {
                debug!(%what, polls, elapsed = ?started.elapsed(), "wait satisfied");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(FleetError::Timeout {
                    what: what.to_string(),
                    waited: started.elapsed(),
                    at: chrono::Utc::now().to_rfc3339(),
                });
            }

            let nap = self.config.interval.min(deadline - now);
            debug!(%what, polls, "not there yet, polling again");
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = signalled(&mut shutdown) => return Err(cancelled(what)),
            }
        }
    }
}

fn cancelled(what: &str) -> FleetError {
    FleetError::Cancelled {
        what: what.to_string(),
    }
}

fn is_signalled(shutdown: &Option<watch::Receiver<bool>>) -> bool {
    shutdown.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Resolves once shutdown is requested. Never resolves without a signal or
/// after the sender is dropped.
async fn signalled(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        let closed = rx.wait_for(|stop| *stop).await.is_err();
        if !closed {
            return;
        }
    }
    std::future::pending::<()>().await
}
