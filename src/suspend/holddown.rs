//! Cancellable hold-down timer.
//!
//! After a condition recovers, the watcher waits out a hold-down period before
//! letting the plan continue. The timer runs on a short-lived worker thread
//! that parks until either its deadline passes or [`HoldDownTimer::cancel`]
//! is called. Each timer owns its own cancellation flag, so a cancel can
//! never be missed because a later timer reset a shared one.

use crate::error::SuspendResult;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Default)]
struct Cancel {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Handle to a pending hold-down.
#[derive(Clone)]
pub struct HoldDownTimer {
    cancel: Arc<Cancel>,
    delay: Duration,
}

impl std::fmt::Debug for HoldDownTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoldDownTimer")
            .field("delay", &self.delay)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl HoldDownTimer {
    /// Start a worker that runs `on_elapsed` after `delay` unless cancelled
    /// first.
    pub fn start<F>(delay: Duration, on_elapsed: F) -> SuspendResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = Arc::new(Cancel::default());
        let worker = Arc::clone(&cancel);
        thread::Builder::new()
            .name("suspend-holddown".into())
            .spawn(move || {
                debug!(?delay, "hold-down worker waiting");
                let deadline = Instant::now() + delay;
                let mut cancelled = worker.cancelled.lock();
                while !*cancelled {
                    if worker.wake.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
                let was_cancelled = *cancelled;
                drop(cancelled);

                if was_cancelled {
                    debug!("hold-down worker cancelled");
                } else {
                    debug!("hold-down elapsed");
                    on_elapsed();
                }
            })?;
        Ok(Self { cancel, delay })
    }

    /// Stop the timer. `on_elapsed` will not run unless it already started.
    pub fn cancel(&self) {
        let mut cancelled = self.cancel.cancelled.lock();
        *cancelled = true;
        self.cancel.wake.notify_all();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.cancelled.lock()
    }

    /// The configured hold-down.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}
