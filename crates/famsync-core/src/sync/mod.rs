//! Cross-device change notifications
//!
//! Keeps one realtime channel open per signed-in user and turns what arrives
//! on it into [`SyncEvent`](crate::event::SyncEvent)s for local subscribers.
//!
//! ## Pieces
//!
//! - `session`: the state machine that owns the channel
//! - `presence`: counts the user's other devices
//! - `heartbeat`: polls channel health to catch silent disconnects
//! - `backoff`: exponential retry delays with an attempt bound
//! - `registry`: subscriber callbacks and fan-out
//! - `scheduler`: injectable timers
//! - `transport`: the interface to the hosted realtime service
//! - `client`: the public facade
//!
//! ## Usage
//!
//! ```ignore
//! let client = SyncClient::spawn(transport, SyncSettings::default());
//! let sub = client.subscribe_with_reconnect(
//!     "user-1",
//!     |event| println!("changed: {}", event.kind()),
//!     || println!("reconnected, refetch everything"),
//! );
//! client.broadcast(SyncEvent::Medicine);
//! sub.unsubscribe();
//! ```

mod backoff;
mod client;
mod heartbeat;
mod presence;
mod registry;
mod scheduler;
mod session;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::{
    ReconnectPolicy, ReconnectState, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};
pub use client::{Subscription, SyncClient, WakeSignal};
pub use heartbeat::{Heartbeat, Liveness, DEFAULT_HEARTBEAT_INTERVAL};
pub use presence::PresenceTracker;
pub use registry::{EventHandler, ReconnectHandler, SubscriberId, SubscriberRegistry};
pub use scheduler::{Scheduler, TimerHandle, TimerSlot, TimerTask, TokioScheduler};
pub use session::{
    SessionCore, SessionInput, SessionPhase, SessionSnapshot, SyncSettings, WakeReason,
    DEFAULT_TOPIC_PREFIX,
};
pub use transport::{
    ChannelEvent, ChannelHandle, ChannelSink, ChannelSpec, ChannelState, ChannelStatus,
    RealtimeTransport,
};
