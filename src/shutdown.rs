//! Process termination plumbing.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::info;

use crate::ack_log::AckLog;
use crate::error::StressError;

/// Clonable "stop now" flag the send loop and the receive wait both block on.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn trigger(&self) {
        *self.flag() = true;
        self.inner.1.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag()
    }

    /// block until triggered
    pub fn wait(&self) {
        let mut triggered = self.flag();
        while !*triggered {
            triggered = self
                .inner
                .1
                .wait(triggered)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Sleep for `timeout` unless triggered first. Returns whether shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.flag();
        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            triggered = self
                .inner
                .1
                .wait_timeout(triggered, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *triggered
    }
}

/// Register the SIGINT/SIGTERM hook: close `log` first, then wake everything
/// waiting on `shutdown`.
///
/// Can only be installed once per process.
pub fn install_handler(shutdown: &Shutdown, log: Arc<AckLog>) -> Result<(), StressError> {
    let shutdown = shutdown.clone();
    ctrlc::set_handler(move || on_termination(&shutdown, &log))?;
    Ok(())
}

/// what the termination hook does: flush and close `log`, then release the waiters
pub fn on_termination(shutdown: &Shutdown, log: &AckLog) {
    info!("Termination requested, shutting down");
    log.close();
    shutdown.trigger();
}
