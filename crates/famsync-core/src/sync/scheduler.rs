//! Timer capability
//!
//! The session never calls `tokio::time` directly. It arms one-shot timers
//! through a [`Scheduler`], which lets tests substitute a virtual clock.

use std::fmt;
use std::time::Duration;

/// Work to run when a timer fires
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run a task after a delay
pub trait Scheduler: Send + 'static {
    /// Run `task` once after `delay`. Dropping the returned handle cancels it.
    fn after(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

/// Cancellation handle for an armed timer
///
/// Cancels on drop.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    /// Create a handle that runs `cancel` when the timer is cancelled
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancel the timer
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Scheduler backed by the tokio timer wheel
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        TimerHandle::new(move || join.abort())
    }
}

/// A single re-armable timer with stale-fire detection
///
/// Each arm bumps a sequence number that is handed to the fire callback.
/// A firing is only honoured if its sequence matches the currently armed one,
/// so a timer that fired just before being cancelled has no effect.
#[derive(Debug, Default)]
pub struct TimerSlot {
    seq: u64,
    armed: Option<TimerHandle>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot, cancelling whatever was armed before
    pub fn arm<S>(&mut self, scheduler: &S, delay: Duration, fire: impl FnOnce(u64) + Send + 'static)
    where
        S: Scheduler + ?Sized,
    {
        self.cancel();
        self.seq += 1;
        let seq = self.seq;
        self.armed = Some(scheduler.after(delay, Box::new(move || fire(seq))));
    }

    /// Cancel the armed timer, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.armed.take() {
            handle.cancel();
        }
    }

    /// Whether a timer is currently armed
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Claim a firing
    ///
    /// Returns true and disarms the slot if `seq` is the armed timer.
    pub fn take_fired(&mut self, seq: u64) -> bool {
        if self.armed.is_some() && seq == self.seq {
            // Already fired, nothing left to cancel.
            if let Some(mut handle) = self.armed.take() {
                handle.cancel = None;
            }
            true
        } else {
            false
        }
    }
}
