//! Test doubles for the session: an in-memory transport and a virtual clock

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::scheduler::{Scheduler, TimerHandle, TimerTask};
use super::transport::{
    ChannelEvent, ChannelHandle, ChannelSink, ChannelSpec, ChannelState, RealtimeTransport,
};
use crate::error::{TransportError, TransportResult};
use crate::event::SyncEvent;

#[derive(Default)]
struct FakeState {
    opened: Vec<(ChannelHandle, ChannelSpec)>,
    sinks: HashMap<ChannelHandle, ChannelSink>,
    states: HashMap<ChannelHandle, ChannelState>,
    sent: Vec<(ChannelHandle, String, SyncEvent)>,
    tracked: Vec<(ChannelHandle, String)>,
    closed: Vec<ChannelHandle>,
    fail_sends: bool,
}

/// Records every call and lets tests play the server's part
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn opened(&self) -> Vec<(ChannelHandle, ChannelSpec)> {
        self.lock().opened.clone()
    }

    pub fn sent(&self) -> Vec<(ChannelHandle, String, SyncEvent)> {
        self.lock().sent.clone()
    }

    pub fn tracked(&self) -> Vec<(ChannelHandle, String)> {
        self.lock().tracked.clone()
    }

    pub fn closed(&self) -> Vec<ChannelHandle> {
        self.lock().closed.clone()
    }

    pub fn set_state(&self, handle: ChannelHandle, state: ChannelState) {
        self.lock().states.insert(handle, state);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Deliver an event as if the server sent it, even for closed channels
    pub fn emit(&self, handle: ChannelHandle, event: ChannelEvent) -> bool {
        let sink = self.lock().sinks.get(&handle).cloned();
        sink.map(|s| s.emit(event)).unwrap_or(false)
    }
}

impl RealtimeTransport for FakeTransport {
    fn open(&mut self, handle: ChannelHandle, spec: ChannelSpec, sink: ChannelSink) {
        let mut state = self.lock();
        state.opened.push((handle, spec));
        state.sinks.insert(handle, sink);
        state.states.insert(handle, ChannelState::Joining);
    }

    fn state(&self, handle: ChannelHandle) -> ChannelState {
        self.lock()
            .states
            .get(&handle)
            .copied()
            .unwrap_or(ChannelState::Closed)
    }

    fn send(&mut self, handle: ChannelHandle, origin: &str, event: &SyncEvent) -> TransportResult<()> {
        let mut state = self.lock();
        if state.fail_sends {
            return Err(TransportError::NotJoined(handle));
        }
        state.sent.push((handle, origin.to_string(), event.clone()));
        Ok(())
    }

    fn track(&mut self, handle: ChannelHandle, device_id: &str) -> TransportResult<()> {
        self.lock().tracked.push((handle, device_id.to_string()));
        Ok(())
    }

    fn close(&mut self, handle: ChannelHandle) {
        let mut state = self.lock();
        state.closed.push(handle);
        state.states.insert(handle, ChannelState::Closed);
    }
}

struct ManualTimer {
    id: u64,
    due: Duration,
    delay: Duration,
    task: TimerTask,
}

#[derive(Default)]
struct ClockState {
    now: Duration,
    next_id: u64,
    timers: Vec<ManualTimer>,
}

/// Virtual clock: timers only run when the test fires them
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ClockState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of armed timers
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().timers.len()
    }

    /// Delays of armed timers, earliest due first
    pub fn delays(&self) -> Vec<Duration> {
        let state = self.state.lock().unwrap();
        let mut timers: Vec<_> = state.timers.iter().map(|t| (t.due, t.delay)).collect();
        timers.sort();
        timers.into_iter().map(|(_, delay)| delay).collect()
    }

    /// Elapsed virtual time
    pub fn now(&self) -> Duration {
        self.state.lock().unwrap().now
    }

    /// Jump to the earliest timer and run it
    pub fn fire_next(&self) -> bool {
        let timer = {
            let mut state = self.state.lock().unwrap();
            let Some(index) = state
                .timers
                .iter()
                .enumerate()
                .min_by_key(|(_, t)| (t.due, t.id))
                .map(|(i, _)| i)
            else {
                return false;
            };
            let timer = state.timers.remove(index);
            state.now = state.now.max(timer.due);
            timer
        };
        (timer.task)();
        true
    }

    /// Advance the clock by `by`, running every timer that comes due
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut fired = 0;
        loop {
            let due_next = {
                let state = self.state.lock().unwrap();
                state.timers.iter().map(|t| t.due).min()
            };
            match due_next {
                Some(due) if due <= target => {
                    self.fire_next();
                    fired += 1;
                }
                _ => break,
            }
        }
        self.state.lock().unwrap().now = target;
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn after(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let id = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = state.next_id;
            let due = state.now + delay;
            state.timers.push(ManualTimer {
                id,
                due,
                delay,
                task,
            });
            id
        };

        let state = self.state.clone();
        TimerHandle::new(move || {
            state.lock().unwrap().timers.retain(|t| t.id != id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_advance_runs_due_timers_only() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        for secs in [1, 2, 10] {
            let c = count.clone();
            // Detach the handles so the timers stay armed
            std::mem::forget(scheduler.after(
                Duration::from_secs(secs),
                Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            ));
        }

        assert_eq!(scheduler.advance(Duration::from_secs(5)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.now(), Duration::from_secs(5));
        assert_eq!(scheduler.delays(), vec![Duration::from_secs(10)]);
    }
}
