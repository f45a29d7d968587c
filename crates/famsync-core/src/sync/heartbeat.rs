//! Channel liveness monitor
//!
//! Hosted realtime services can drop a socket without any local error,
//! typically across sleep/wake or a backgrounded process. While a channel is
//! connected the session polls its state on a fixed interval and treats
//! anything other than joined/joining as a silent failure.

use std::time::Duration;

use tokio::sync::mpsc;

use super::scheduler::{Scheduler, TimerSlot};
use super::session::SessionInput;
use super::transport::ChannelState;

/// Default polling interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of a heartbeat check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Healthy,
    Stale,
}

impl From<ChannelState> for Liveness {
    fn from(state: ChannelState) -> Self {
        if state.is_healthy() {
            Liveness::Healthy
        } else {
            Liveness::Stale
        }
    }
}

/// Repeating health check, re-armed after every healthy tick
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    slot: TimerSlot,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slot: TimerSlot::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Arm the next tick, replacing any tick already armed
    pub fn start<S>(&mut self, scheduler: &S, inputs: &mpsc::UnboundedSender<SessionInput>)
    where
        S: Scheduler + ?Sized,
    {
        let inputs = inputs.clone();
        self.slot.arm(scheduler, self.interval, move |seq| {
            let _ = inputs.send(SessionInput::HeartbeatTick(seq));
        });
    }

    pub fn stop(&mut self) {
        self.slot.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.slot.is_armed()
    }

    /// Accept a tick if it belongs to the running heartbeat
    pub fn claim_tick(&mut self, seq: u64) -> bool {
        self.slot.take_fired(seq)
    }
}
