//! Sync session state machine
//!
//! [`SessionCore`] owns everything scoped to the per-user channel: the
//! channel handle, device id, presence count, heartbeat and reconnect state.
//! It is driven one [`SessionInput`] at a time by a single task, so no
//! locking is involved. Correctness rests on two rules:
//!
//! - the old channel is always released before a new one is opened, and
//! - every path that drops the channel also resets what was scoped to it.
//!
//! ```text
//! Idle -> Connecting -> Connected
//! Connected -> Reconnecting            (heartbeat stale, error/timeout/closed)
//! Reconnecting -> Connecting           (retry timer fires)
//! Reconnecting -> Abandoned            (attempts exhausted)
//! Abandoned -> Connecting              (foreground/network regained)
//! any -> Idle                          (last unsubscribe, logout)
//! ```

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::backoff::{ReconnectPolicy, ReconnectState};
use super::heartbeat::{Heartbeat, Liveness, DEFAULT_HEARTBEAT_INTERVAL};
use super::presence::PresenceTracker;
use super::registry::{
    isolate, EventHandler, ReconnectHandler, SubscriberId, SubscriberRegistry,
};
use super::scheduler::{Scheduler, TimerSlot};
use super::transport::{
    ChannelEvent, ChannelHandle, ChannelSink, ChannelSpec, ChannelStatus, RealtimeTransport,
};
use crate::event::SyncEvent;

/// Default topic prefix; the channel topic is `<prefix>:<user id>`
pub const DEFAULT_TOPIC_PREFIX: &str = "sync";

/// Tunables for a sync session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Retry backoff
    pub policy: ReconnectPolicy,
    /// How often a connected channel's health is polled
    pub heartbeat_interval: Duration,
    /// Prefix of the per-user topic
    pub topic_prefix: String,
    /// Tables to receive row-level changes for
    pub watched_tables: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            watched_tables: Vec::new(),
        }
    }
}

impl SyncSettings {
    /// Topic for a user's channel
    pub fn topic_for(&self, user_id: &str) -> String {
        format!("{}:{}", self.topic_prefix, user_id)
    }
}

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No subscribers, no channel
    #[default]
    Idle,
    /// Channel opened, waiting for the join
    Connecting,
    /// Joined and monitored by the heartbeat
    Connected,
    /// Waiting for a backoff retry
    Reconnecting,
    /// Retries exhausted; waiting for foreground or network to return
    Abandoned,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Connected => "connected",
            SessionPhase::Reconnecting => "reconnecting",
            SessionPhase::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the session, published after every input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub channel: Option<ChannelHandle>,
    pub reconnect_attempts: u32,
    pub retry_pending: bool,
    pub other_devices_online: usize,
    pub subscribers: usize,
}

/// External signal that retrying right now is likely to work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The host came back to the foreground
    Foreground,
    /// The host regained network connectivity
    Connectivity,
}

impl fmt::Display for WakeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WakeReason::Foreground => f.write_str("foreground"),
            WakeReason::Connectivity => f.write_str("connectivity"),
        }
    }
}

/// Everything the session reacts to
pub enum SessionInput {
    Subscribe {
        id: SubscriberId,
        user_id: String,
        on_event: EventHandler,
        on_reconnect: Option<ReconnectHandler>,
    },
    Unsubscribe(SubscriberId),
    UnsubscribeAll,
    Broadcast(SyncEvent),
    Wake(WakeReason),
    Channel {
        handle: ChannelHandle,
        event: ChannelEvent,
    },
    HeartbeatTick(u64),
    RetryFire(u64),
    Shutdown,
}

/// The live channel and what is scoped to it
#[derive(Debug)]
struct ActiveChannel {
    user_id: String,
    handle: ChannelHandle,
    device_id: String,
}

/// Single-owner sync session
pub struct SessionCore<T, S> {
    transport: T,
    scheduler: S,
    settings: SyncSettings,
    inputs: mpsc::UnboundedSender<SessionInput>,
    snapshots: watch::Sender<SessionSnapshot>,
    subscribers: SubscriberRegistry,
    channel: Option<ActiveChannel>,
    reconnect: ReconnectState,
    retry: TimerSlot,
    presence: PresenceTracker,
    heartbeat: Heartbeat,
    phase: SessionPhase,
    connected_before: bool,
    next_channel: u64,
}

impl<T, S> SessionCore<T, S>
where
    T: RealtimeTransport,
    S: Scheduler,
{
    /// Create an idle session
    ///
    /// `inputs` must feed back into this session's [`handle`](Self::handle);
    /// timers and channel sinks deliver through it.
    pub fn new(
        transport: T,
        scheduler: S,
        settings: SyncSettings,
        inputs: mpsc::UnboundedSender<SessionInput>,
        snapshots: watch::Sender<SessionSnapshot>,
    ) -> Self {
        let heartbeat = Heartbeat::new(settings.heartbeat_interval);
        Self {
            transport,
            scheduler,
            settings,
            inputs,
            snapshots,
            subscribers: SubscriberRegistry::new(),
            channel: None,
            reconnect: ReconnectState::new(),
            retry: TimerSlot::new(),
            presence: PresenceTracker::new(),
            heartbeat,
            phase: SessionPhase::Idle,
            connected_before: false,
            next_channel: 0,
        }
    }

    /// Process one input. Returns false after `Shutdown`.
    pub fn handle(&mut self, input: SessionInput) -> bool {
        let keep_running = match input {
            SessionInput::Subscribe {
                id,
                user_id,
                on_event,
                on_reconnect,
            } => {
                self.subscribe(id, user_id, on_event, on_reconnect);
                true
            }
            SessionInput::Unsubscribe(id) => {
                self.unsubscribe(id);
                true
            }
            SessionInput::UnsubscribeAll => {
                self.unsubscribe_all();
                true
            }
            SessionInput::Broadcast(event) => {
                self.broadcast(&event);
                true
            }
            SessionInput::Wake(reason) => {
                self.wake(reason);
                true
            }
            SessionInput::Channel { handle, event } => {
                self.channel_event(handle, event);
                true
            }
            SessionInput::HeartbeatTick(seq) => {
                self.heartbeat_tick(seq);
                true
            }
            SessionInput::RetryFire(seq) => {
                self.retry_fired(seq);
                true
            }
            SessionInput::Shutdown => {
                self.unsubscribe_all();
                false
            }
        };
        self.snapshots.send_replace(self.snapshot());
        keep_running
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            user_id: self.channel.as_ref().map(|c| c.user_id.clone()),
            device_id: self.channel.as_ref().map(|c| c.device_id.clone()),
            channel: self.channel.as_ref().map(|c| c.handle),
            reconnect_attempts: self.reconnect.attempts(),
            retry_pending: self.retry.is_armed(),
            other_devices_online: self.presence.other_devices_online(),
            subscribers: self.subscribers.len(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn subscribe(
        &mut self,
        id: SubscriberId,
        user_id: String,
        on_event: EventHandler,
        on_reconnect: Option<ReconnectHandler>,
    ) {
        let current_user = self.channel.as_ref().map(|c| c.user_id.clone());
        if current_user.as_deref() != Some(user_id.as_str()) {
            if let Some(previous) = current_user {
                info!("Switching sync session from user {} to {}", previous, user_id);
                self.teardown();
            }
            let dropped = self.subscribers.retain_user(&user_id);
            if dropped > 0 {
                debug!("Dropped {} handler(s) of the previous user", dropped);
            }
        }

        self.subscribers.insert(id, &user_id, on_event, on_reconnect);
        debug!("Subscriber {} registered ({} total)", id, self.subscribers.len());

        if self.channel.is_none() {
            self.setup_channel(user_id);
        }
    }

    fn unsubscribe(&mut self, id: SubscriberId) {
        if !self.subscribers.remove(id) {
            return;
        }
        debug!("Subscriber {} removed ({} left)", id, self.subscribers.len());
        if self.subscribers.is_empty() {
            self.teardown();
        }
    }

    fn unsubscribe_all(&mut self) {
        self.subscribers.clear();
        self.teardown();
    }

    /// Open a fresh channel for `user_id` with a new device id
    fn setup_channel(&mut self, user_id: String) {
        self.next_channel += 1;
        let handle = ChannelHandle::new(self.next_channel);
        let device_id = uuid::Uuid::new_v4().to_string();
        let spec = ChannelSpec {
            topic: self.settings.topic_for(&user_id),
            device_id: device_id.clone(),
            receive_own_broadcasts: false,
            watched_tables: self.settings.watched_tables.clone(),
        };

        info!("Opening channel {} on {}", handle, spec.topic);
        self.transport
            .open(handle, spec, ChannelSink::new(handle, self.inputs.clone()));

        self.channel = Some(ActiveChannel {
            user_id,
            handle,
            device_id,
        });
        self.phase = SessionPhase::Connecting;
    }

    /// Close the channel and clear everything scoped to it
    fn release_channel(&mut self) {
        self.heartbeat.stop();
        if let Some(channel) = self.channel.take() {
            debug!("Releasing channel {}", channel.handle);
            self.transport.close(channel.handle);
        }
        self.presence.reset();
    }

    /// Replace the current channel with a new one for the same user
    fn reconnect_channel(&mut self) {
        let Some(user_id) = self.channel.as_ref().map(|c| c.user_id.clone()) else {
            return;
        };
        self.release_channel();
        self.setup_channel(user_id);
    }

    /// Full shutdown back to idle
    fn teardown(&mut self) {
        self.retry.cancel();
        self.release_channel();
        self.reconnect.reset();
        self.connected_before = false;
        if self.phase != SessionPhase::Idle {
            info!("Sync session stopped");
        }
        self.phase = SessionPhase::Idle;
    }

    fn channel_event(&mut self, handle: ChannelHandle, event: ChannelEvent) {
        let Some(channel) = self.channel.as_ref() else {
            debug!("Ignoring event from channel {} with no active session", handle);
            return;
        };
        if channel.handle != handle {
            debug!("Ignoring event from stale channel {}", handle);
            return;
        }

        match event {
            ChannelEvent::Status(ChannelStatus::Subscribed) => self.on_subscribed(),
            ChannelEvent::Status(status) => self.on_channel_failure(status),
            ChannelEvent::PresenceSync { keys } => {
                let device_id = channel.device_id.clone();
                let others = self
                    .presence
                    .sync(keys.iter().map(String::as_str), &device_id);
                debug!("Presence sync: {} other device(s) online", others);
            }
            ChannelEvent::Broadcast { origin, event } => {
                if origin.as_deref() == Some(channel.device_id.as_str()) {
                    debug!("Dropping echo of own {} broadcast", event.kind());
                    return;
                }
                let delivered = self.subscribers.dispatch(&event);
                debug!("Delivered {} broadcast to {} handler(s)", event.kind(), delivered);
            }
            ChannelEvent::Change { table, kind } => {
                debug!("Row change {:?} on {}", kind, table);
                self.subscribers.dispatch(&SyncEvent::RawChange { table });
            }
        }
    }

    fn on_subscribed(&mut self) {
        if self.phase == SessionPhase::Connected {
            debug!("Duplicate subscribed status ignored");
            return;
        }
        let Some(channel) = self.channel.as_ref() else {
            return;
        };
        let handle = channel.handle;
        let device_id = channel.device_id.clone();

        self.reconnect.reset();
        self.retry.cancel();
        self.heartbeat.start(&self.scheduler, &self.inputs);
        if let Err(e) = self.transport.track(handle, &device_id) {
            warn!("Failed to announce presence on channel {}: {}", handle, e);
        }
        self.phase = SessionPhase::Connected;
        info!(
            "Channel {} connected as device {}, heartbeat every {:?}",
            handle,
            device_id,
            self.heartbeat.interval()
        );

        if self.connected_before {
            if let Some(on_reconnect) = self.subscribers.reconnect_handler() {
                debug!("Running reconnect refresh");
                if !isolate(|| on_reconnect()) {
                    warn!("Reconnect refresh callback panicked");
                }
            }
        }
        self.connected_before = true;
    }

    fn on_channel_failure(&mut self, status: ChannelStatus) {
        if matches!(
            self.phase,
            SessionPhase::Reconnecting | SessionPhase::Abandoned
        ) {
            debug!("Channel reported {:?} while already recovering", status);
            return;
        }
        warn!("Channel reported {:?}", status);
        self.heartbeat.stop();
        self.schedule_reconnect();
    }

    /// Arm a backoff retry, or give up once attempts are exhausted
    fn schedule_reconnect(&mut self) {
        self.retry.cancel();

        let Some(delay) = self.reconnect.next_delay(&self.settings.policy) else {
            warn!(
                "Giving up after {} reconnect attempts; waiting for foreground or network",
                self.reconnect.attempts()
            );
            self.phase = SessionPhase::Abandoned;
            return;
        };

        info!(
            "Reconnecting in {:?} (attempt {}/{})",
            delay,
            self.reconnect.attempts(),
            self.settings.policy.max_attempts
        );
        let inputs = self.inputs.clone();
        self.retry.arm(&self.scheduler, delay, move |seq| {
            let _ = inputs.send(SessionInput::RetryFire(seq));
        });
        self.phase = SessionPhase::Reconnecting;
    }

    fn retry_fired(&mut self, seq: u64) {
        if !self.retry.take_fired(seq) {
            debug!("Ignoring cancelled retry");
            return;
        }
        self.reconnect_channel();
    }

    fn heartbeat_tick(&mut self, seq: u64) {
        if !self.heartbeat.claim_tick(seq) {
            return;
        }
        let Some(handle) = self.channel.as_ref().map(|c| c.handle) else {
            return;
        };

        let state = self.transport.state(handle);
        match Liveness::from(state) {
            Liveness::Healthy => {
                debug!("Heartbeat: channel {} is {:?}", handle, state);
                self.heartbeat.start(&self.scheduler, &self.inputs);
            }
            Liveness::Stale => {
                warn!("Heartbeat found channel {} {:?}", handle, state);
                self.schedule_reconnect();
            }
        }
    }

    /// Foreground/network regained: reset backoff and retry now
    fn wake(&mut self, reason: WakeReason) {
        let Some(handle) = self.channel.as_ref().map(|c| c.handle) else {
            return;
        };

        if reason == WakeReason::Foreground && self.transport.state(handle).is_healthy() {
            debug!("Foreground regained, channel {} still healthy", handle);
            return;
        }

        info!("{} regained, reconnecting immediately", reason);
        self.retry.cancel();
        self.reconnect.reset();
        self.reconnect_channel();
    }

    /// Best-effort send; dropped when nobody else is listening
    fn broadcast(&mut self, event: &SyncEvent) {
        let Some(channel) = self.channel.as_ref() else {
            debug!("No active channel, dropping {} broadcast", event.kind());
            return;
        };
        if self.presence.other_devices_online() == 0 {
            debug!("No other devices online, skipping {} broadcast", event.kind());
            return;
        }
        if let Err(e) = self
            .transport
            .send(channel.handle, &channel.device_id, event)
        {
            debug!("Broadcast of {} failed: {}", event.kind(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{FakeTransport, ManualScheduler};
    use crate::sync::transport::ChannelState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Harness {
        core: SessionCore<FakeTransport, ManualScheduler>,
        transport: FakeTransport,
        scheduler: ManualScheduler,
        inputs: mpsc::UnboundedSender<SessionInput>,
        rx: mpsc::UnboundedReceiver<SessionInput>,
        next_id: u64,
    }

    impl Harness {
        fn new() -> Self {
            let transport = FakeTransport::new();
            let scheduler = ManualScheduler::new();
            let (inputs, rx) = mpsc::unbounded_channel();
            let (snapshots, _) = watch::channel(SessionSnapshot::default());
            let core = SessionCore::new(
                transport.clone(),
                scheduler.clone(),
                SyncSettings::default(),
                inputs.clone(),
                snapshots,
            );
            Self {
                core,
                transport,
                scheduler,
                inputs,
                rx,
                next_id: 0,
            }
        }

        /// Feed queued inputs (timer firings, channel events) into the core
        fn pump(&mut self) {
            while let Ok(input) = self.rx.try_recv() {
                self.core.handle(input);
            }
        }

        fn subscribe_with(
            &mut self,
            user_id: &str,
            on_event: EventHandler,
            on_reconnect: Option<ReconnectHandler>,
        ) -> SubscriberId {
            self.next_id += 1;
            let id = SubscriberId::new(self.next_id);
            self.core.handle(SessionInput::Subscribe {
                id,
                user_id: user_id.to_string(),
                on_event,
                on_reconnect,
            });
            id
        }

        fn subscribe(&mut self, user_id: &str) -> SubscriberId {
            self.subscribe_with(user_id, Arc::new(|_: &SyncEvent| {}), None)
        }

        fn current(&self) -> ChannelHandle {
            self.core.snapshot().channel.expect("no active channel")
        }

        fn device_id(&self) -> String {
            self.core.snapshot().device_id.expect("no device id")
        }

        fn emit(&mut self, event: ChannelEvent) {
            let handle = self.current();
            self.transport.emit(handle, event);
            self.pump();
        }

        fn connect(&mut self) {
            let handle = self.current();
            self.transport.set_state(handle, ChannelState::Joined);
            self.emit(ChannelEvent::Status(ChannelStatus::Subscribed));
        }

        fn fail(&mut self, status: ChannelStatus) {
            let handle = self.current();
            self.transport.set_state(handle, ChannelState::Closed);
            self.emit(ChannelEvent::Status(status));
        }

        fn fire_next(&mut self) {
            assert!(self.scheduler.fire_next(), "no timer armed");
            self.pump();
        }

        fn set_others(&mut self, others: &[&str]) {
            let mut keys: Vec<String> = others.iter().map(|s| s.to_string()).collect();
            keys.push(self.device_id());
            self.emit(ChannelEvent::PresenceSync { keys });
        }
    }

    fn recording_handler() -> (EventHandler, Arc<Mutex<Vec<SyncEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: EventHandler =
            Arc::new(move |event: &SyncEvent| sink.lock().unwrap().push(event.clone()));
        (handler, seen)
    }

    #[test]
    fn test_single_channel_per_user() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.subscribe("u1");
        h.subscribe("u1");

        assert_eq!(h.transport.opened().len(), 1);
        assert_eq!(h.transport.opened()[0].1.topic, "sync:u1");
        assert!(!h.transport.opened()[0].1.receive_own_broadcasts);
        assert_eq!(h.core.snapshot().subscribers, 3);
        assert_eq!(h.core.phase(), SessionPhase::Connecting);
    }

    #[test]
    fn test_teardown_when_last_handler_leaves() {
        let mut h = Harness::new();
        let a = h.subscribe("u1");
        let b = h.subscribe("u1");
        h.connect();
        h.set_others(&["phone"]);
        let handle = h.current();

        h.core.handle(SessionInput::Unsubscribe(a));
        assert!(h.transport.closed().is_empty());

        h.core.handle(SessionInput::Unsubscribe(b));
        assert_eq!(h.transport.closed(), vec![handle]);
        assert_eq!(
            h.core.snapshot(),
            SessionSnapshot::default(),
            "session state must be fully reset"
        );
        assert_eq!(h.scheduler.pending(), 0, "heartbeat must be cancelled");
    }

    #[test]
    fn test_teardown_cancels_pending_retry() {
        let mut h = Harness::new();
        let id = h.subscribe("u1");
        h.connect();
        h.fail(ChannelStatus::Closed);
        assert!(h.core.snapshot().retry_pending);

        h.core.handle(SessionInput::Unsubscribe(id));
        assert_eq!(h.scheduler.pending(), 0);

        // A firing that was already queued must not revive the session
        h.core.handle(SessionInput::RetryFire(1));
        assert_eq!(h.core.snapshot(), SessionSnapshot::default());
        assert_eq!(h.transport.opened().len(), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut h = Harness::new();
        let a = h.subscribe("u1");
        h.subscribe("u1");
        h.core.handle(SessionInput::Unsubscribe(a));
        h.core.handle(SessionInput::Unsubscribe(a));
        assert_eq!(h.core.snapshot().subscribers, 1);
        assert!(h.transport.closed().is_empty());
    }

    #[test]
    fn test_connected_starts_heartbeat_and_tracks_presence() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();

        assert_eq!(h.core.phase(), SessionPhase::Connected);
        assert_eq!(h.scheduler.delays(), vec![Duration::from_secs(30)]);
        assert_eq!(h.transport.tracked(), vec![(h.current(), h.device_id())]);
    }

    #[test]
    fn test_heartbeat_healthy_does_not_reconnect() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();

        h.fire_next();

        assert_eq!(h.core.phase(), SessionPhase::Connected);
        assert!(!h.core.snapshot().retry_pending);
        assert_eq!(h.transport.opened().len(), 1);
        // Re-armed for the next tick
        assert_eq!(h.scheduler.delays(), vec![Duration::from_secs(30)]);
    }

    #[test]
    fn test_heartbeat_stale_schedules_reconnect() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();
        let handle = h.current();
        h.transport.set_state(handle, ChannelState::Closed);

        h.fire_next();

        assert_eq!(h.core.phase(), SessionPhase::Reconnecting);
        assert_eq!(h.core.snapshot().reconnect_attempts, 1);
        assert_eq!(h.scheduler.delays(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn test_closed_status_schedules_one_retry() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();

        h.fail(ChannelStatus::Closed);

        let snapshot = h.core.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Reconnecting);
        assert_eq!(snapshot.reconnect_attempts, 1);
        // Heartbeat stopped, only the retry remains
        assert_eq!(h.scheduler.delays(), vec![Duration::from_millis(1000)]);

        // A second failure report for the same channel is not a second failure
        h.emit(ChannelEvent::Status(ChannelStatus::ChannelError));
        assert_eq!(h.core.snapshot().reconnect_attempts, 1);
        assert_eq!(h.scheduler.pending(), 1);
    }

    #[test]
    fn test_retry_rebuilds_channel_with_new_device_id() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();
        h.set_others(&["phone", "tablet"]);
        let old_handle = h.current();
        let old_device = h.device_id();

        h.fail(ChannelStatus::TimedOut);
        h.fire_next();

        assert_eq!(h.transport.closed(), vec![old_handle]);
        assert_eq!(h.transport.opened().len(), 2);
        assert_ne!(h.current(), old_handle);
        assert_ne!(h.device_id(), old_device);
        assert_eq!(h.core.snapshot().other_devices_online, 0);
        assert_eq!(h.core.phase(), SessionPhase::Connecting);

        h.connect();
        assert_eq!(h.core.snapshot().reconnect_attempts, 0);
    }

    #[test]
    fn test_backoff_grows_across_failures() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();

        let mut delays = Vec::new();
        h.fail(ChannelStatus::Closed);
        for _ in 0..6 {
            delays.extend(h.scheduler.delays());
            h.fire_next();
            h.fail(ChannelStatus::ChannelError);
        }

        let secs: Vec<u64> = delays.iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30]);
    }

    #[test]
    fn test_attempts_exhaust_then_network_resumes() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();

        h.fail(ChannelStatus::Closed);
        for _ in 0..10 {
            h.fire_next();
            h.fail(ChannelStatus::ChannelError);
        }

        let snapshot = h.core.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Abandoned);
        assert_eq!(snapshot.reconnect_attempts, 10);
        assert_eq!(h.scheduler.pending(), 0, "no 11th automatic retry");
        let opened = h.transport.opened().len();

        h.core.handle(SessionInput::Wake(WakeReason::Connectivity));

        assert_eq!(h.core.snapshot().reconnect_attempts, 0);
        assert_eq!(h.transport.opened().len(), opened + 1, "reconnects immediately");
        assert_eq!(h.core.phase(), SessionPhase::Connecting);
        assert_eq!(h.scheduler.pending(), 0, "no backoff wait");
    }

    #[test]
    fn test_connectivity_bypasses_pending_backoff() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();
        h.fail(ChannelStatus::Closed);
        h.fire_next();
        h.fail(ChannelStatus::Closed);
        assert_eq!(h.core.snapshot().reconnect_attempts, 2);
        assert_eq!(h.scheduler.pending(), 1);

        h.core.handle(SessionInput::Wake(WakeReason::Connectivity));

        assert_eq!(h.scheduler.pending(), 0);
        assert_eq!(h.core.snapshot().reconnect_attempts, 0);
        assert_eq!(h.transport.opened().len(), 3);
    }

    #[test]
    fn test_foreground_only_reconnects_unhealthy_channel() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();

        h.core.handle(SessionInput::Wake(WakeReason::Foreground));
        assert_eq!(h.transport.opened().len(), 1);

        let handle = h.current();
        h.transport.set_state(handle, ChannelState::Errored);
        h.core.handle(SessionInput::Wake(WakeReason::Foreground));
        assert_eq!(h.transport.opened().len(), 2);
        assert_eq!(h.transport.closed(), vec![handle]);
    }

    #[test]
    fn test_wake_without_session_is_noop() {
        let mut h = Harness::new();
        h.core.handle(SessionInput::Wake(WakeReason::Connectivity));
        assert!(h.transport.opened().is_empty());
        assert_eq!(h.core.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_presence_excludes_own_device() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();

        h.set_others(&["phone", "tablet", "laptop"]);
        assert_eq!(h.core.snapshot().other_devices_online, 3);

        h.set_others(&[]);
        assert_eq!(h.core.snapshot().other_devices_online, 0);
    }

    #[test]
    fn test_broadcast_gated_on_presence() {
        let mut h = Harness::new();
        h.core.handle(SessionInput::Broadcast(SyncEvent::People));
        assert!(h.transport.sent().is_empty(), "no channel");

        h.subscribe("u1");
        h.connect();
        h.core.handle(SessionInput::Broadcast(SyncEvent::People));
        assert!(h.transport.sent().is_empty(), "nobody else online");

        h.set_others(&["phone"]);
        h.core.handle(SessionInput::Broadcast(SyncEvent::Medicine));
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, h.device_id());
        assert_eq!(sent[0].2, SyncEvent::Medicine);
    }

    #[test]
    fn test_broadcast_failure_is_swallowed() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();
        h.set_others(&["phone"]);
        h.transport.fail_sends(true);

        assert!(h.core.handle(SessionInput::Broadcast(SyncEvent::Prn)));
        assert_eq!(h.core.phase(), SessionPhase::Connected);
    }

    #[test]
    fn test_own_broadcast_is_not_echoed() {
        let mut h = Harness::new();
        let (handler, seen) = recording_handler();
        h.subscribe_with("u1", handler, None);
        h.connect();

        let own = h.device_id();
        h.emit(ChannelEvent::Broadcast {
            origin: Some(own),
            event: SyncEvent::Shots,
        });
        assert!(seen.lock().unwrap().is_empty());

        h.emit(ChannelEvent::Broadcast {
            origin: Some("phone".to_string()),
            event: SyncEvent::Shots,
        });
        assert_eq!(*seen.lock().unwrap(), vec![SyncEvent::Shots]);
    }

    #[test]
    fn test_broadcast_reaches_every_handler() {
        let mut h = Harness::new();
        let (h1, seen1) = recording_handler();
        let (h2, seen2) = recording_handler();
        h.subscribe_with("u1", h1, None);
        h.subscribe_with("u1", h2, None);
        h.connect();

        h.emit(ChannelEvent::Broadcast {
            origin: Some("phone".to_string()),
            event: SyncEvent::People,
        });

        assert_eq!(*seen1.lock().unwrap(), vec![SyncEvent::People]);
        assert_eq!(*seen2.lock().unwrap(), vec![SyncEvent::People]);
    }

    #[test]
    fn test_row_change_becomes_raw_change() {
        let mut h = Harness::new();
        let (handler, seen) = recording_handler();
        h.subscribe_with("u1", handler, None);
        h.connect();

        h.emit(ChannelEvent::Change {
            table: "doses".to_string(),
            kind: crate::event::ChangeKind::Insert,
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SyncEvent::RawChange {
                table: "doses".to_string()
            }]
        );
    }

    #[test]
    fn test_stale_channel_events_ignored() {
        let mut h = Harness::new();
        let (handler, seen) = recording_handler();
        h.subscribe_with("u1", handler, None);
        h.connect();
        let old = h.current();
        h.fail(ChannelStatus::Closed);
        h.fire_next();

        h.transport.emit(
            old,
            ChannelEvent::Broadcast {
                origin: None,
                event: SyncEvent::Sharing,
            },
        );
        h.transport
            .emit(old, ChannelEvent::Status(ChannelStatus::Subscribed));
        h.pump();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(h.core.phase(), SessionPhase::Connecting);
    }

    #[test]
    fn test_on_reconnect_runs_once_per_recovery() {
        let mut h = Harness::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let on_reconnect: ReconnectHandler = Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        h.subscribe_with("u1", Arc::new(|_: &SyncEvent| {}), Some(on_reconnect.clone()));
        h.subscribe_with("u1", Arc::new(|_: &SyncEvent| {}), Some(on_reconnect));

        h.connect();
        assert_eq!(count.load(Ordering::SeqCst), 0, "first connect is not a reconnect");

        h.fail(ChannelStatus::Closed);
        h.fire_next();
        h.connect();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Duplicate subscribed status doesn't run it again
        h.emit(ChannelEvent::Status(ChannelStatus::Subscribed));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callbacks_keep_session_alive() {
        let mut h = Harness::new();
        let (handler, seen) = recording_handler();
        h.subscribe_with(
            "u1",
            Arc::new(|_: &SyncEvent| panic!("stdout closed")),
            Some(Arc::new(|| panic!("refresh failed"))),
        );
        h.subscribe_with("u1", handler, None);
        h.connect();

        h.emit(ChannelEvent::Broadcast {
            origin: Some("phone".to_string()),
            event: SyncEvent::Sharing,
        });
        assert_eq!(*seen.lock().unwrap(), vec![SyncEvent::Sharing]);

        h.fail(ChannelStatus::Closed);
        h.fire_next();
        h.connect();
        assert_eq!(h.core.phase(), SessionPhase::Connected);
        assert_eq!(h.core.snapshot().subscribers, 2);
    }

    #[test]
    fn test_switching_user_tears_down_first() {
        let mut h = Harness::new();
        let (old_handler, old_seen) = recording_handler();
        h.subscribe_with("u1", old_handler, None);
        h.connect();
        let old = h.current();

        h.subscribe("u2");

        assert_eq!(h.transport.closed(), vec![old]);
        let opened = h.transport.opened();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[1].1.topic, "sync:u2");
        assert_eq!(h.core.snapshot().user_id.as_deref(), Some("u2"));
        assert_eq!(h.core.snapshot().subscribers, 1);

        h.connect();
        h.emit(ChannelEvent::Broadcast {
            origin: None,
            event: SyncEvent::People,
        });
        assert!(old_seen.lock().unwrap().is_empty(), "no cross-user delivery");
    }

    #[test]
    fn test_shutdown_stops_loop_and_resets() {
        let mut h = Harness::new();
        h.subscribe("u1");
        h.connect();

        assert!(!h.core.handle(SessionInput::Shutdown));
        assert_eq!(h.core.snapshot(), SessionSnapshot::default());
        assert_eq!(h.transport.closed().len(), 1);
        drop(h.inputs);
    }
}
