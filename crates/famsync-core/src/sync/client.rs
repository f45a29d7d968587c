//! Sync client facade
//!
//! Spawns the task that owns the session and hands out cheap handles to it.
//! Every call just queues an input and returns; nothing here blocks or fails
//! because of the network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::registry::{EventHandler, ReconnectHandler, SubscriberId};
use super::scheduler::{Scheduler, TokioScheduler};
use super::session::{
    SessionCore, SessionInput, SessionPhase, SessionSnapshot, SyncSettings, WakeReason,
};
use super::transport::RealtimeTransport;
use crate::event::SyncEvent;

/// Handle to a running sync session
///
/// Dropping the client shuts the session down.
pub struct SyncClient {
    inputs: mpsc::UnboundedSender<SessionInput>,
    snapshots: watch::Receiver<SessionSnapshot>,
    next_subscriber: Arc<AtomicU64>,
}

impl SyncClient {
    /// Spawn a session on the current tokio runtime
    pub fn spawn<T: RealtimeTransport>(transport: T, settings: SyncSettings) -> Self {
        Self::spawn_with_scheduler(transport, TokioScheduler, settings)
    }

    /// Spawn a session with a custom timer source
    pub fn spawn_with_scheduler<T, S>(transport: T, scheduler: S, settings: SyncSettings) -> Self
    where
        T: RealtimeTransport,
        S: Scheduler,
    {
        let (inputs, input_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(SessionSnapshot::default());
        let core = SessionCore::new(transport, scheduler, settings, inputs.clone(), snapshot_tx);

        tokio::spawn(session_loop(core, input_rx));

        Self {
            inputs,
            snapshots,
            next_subscriber: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Receive every event for `user_id`
    ///
    /// The first subscription opens the user's channel; subscribing for a
    /// different user tears the old session down first.
    pub fn subscribe<F>(&self, user_id: &str, on_event: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.register(user_id, Arc::new(on_event), None)
    }

    /// Like [`subscribe`](Self::subscribe), plus a refresh callback
    ///
    /// `on_reconnect` runs once after each recovery so the caller can refetch
    /// whatever it missed while disconnected.
    pub fn subscribe_with_reconnect<F, R>(
        &self,
        user_id: &str,
        on_event: F,
        on_reconnect: R,
    ) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
        R: Fn() + Send + Sync + 'static,
    {
        self.register(user_id, Arc::new(on_event), Some(Arc::new(on_reconnect)))
    }

    fn register(
        &self,
        user_id: &str,
        on_event: EventHandler,
        on_reconnect: Option<ReconnectHandler>,
    ) -> Subscription {
        let id = SubscriberId::new(self.next_subscriber.fetch_add(1, Ordering::Relaxed) + 1);
        self.send(SessionInput::Subscribe {
            id,
            user_id: user_id.to_string(),
            on_event,
            on_reconnect,
        });
        Subscription {
            id,
            inputs: Some(self.inputs.clone()),
        }
    }

    /// Best-effort notification to the user's other devices
    ///
    /// Silently dropped when there is no channel or no other device online.
    pub fn broadcast(&self, event: SyncEvent) {
        self.send(SessionInput::Broadcast(event));
    }

    /// Drop every subscriber and close the channel (logout)
    pub fn unsubscribe_all(&self) {
        self.send(SessionInput::UnsubscribeAll);
    }

    /// Handle for the host's foreground/network notifications
    pub fn wake_signal(&self) -> WakeSignal {
        WakeSignal {
            inputs: self.inputs.clone(),
        }
    }

    pub fn status(&self) -> SessionPhase {
        self.snapshots.borrow().phase
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Watch session changes
    pub fn watch_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    fn send(&self, input: SessionInput) {
        if self.inputs.send(input).is_err() {
            debug!("Sync session has shut down, input dropped");
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        let _ = self.inputs.send(SessionInput::Shutdown);
    }
}

/// A registered handler; unsubscribes when dropped
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    id: SubscriberId,
    inputs: Option<mpsc::UnboundedSender<SessionInput>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove exactly this handler
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(inputs) = self.inputs.take() {
            let _ = inputs.send(SessionInput::Unsubscribe(self.id));
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Platform hook for "retrying now will probably work" signals
///
/// Wire these to whatever the host offers: resume/visibility events,
/// OS reachability callbacks and so on.
#[derive(Clone)]
pub struct WakeSignal {
    inputs: mpsc::UnboundedSender<SessionInput>,
}

impl WakeSignal {
    /// The host is in the foreground again
    pub fn on_foreground_regained(&self) {
        let _ = self.inputs.send(SessionInput::Wake(WakeReason::Foreground));
    }

    /// The host has network connectivity again
    pub fn on_connectivity_regained(&self) {
        let _ = self.inputs.send(SessionInput::Wake(WakeReason::Connectivity));
    }
}

/// Owns the session and feeds it inputs until shutdown
async fn session_loop<T, S>(
    mut core: SessionCore<T, S>,
    mut input_rx: mpsc::UnboundedReceiver<SessionInput>,
) where
    T: RealtimeTransport,
    S: Scheduler,
{
    while let Some(input) = input_rx.recv().await {
        if !core.handle(input) {
            break;
        }
    }
    debug!("Sync session loop exited");
}
