//! Realtime transport interface
//!
//! The session talks to the hosted realtime service only through
//! [`RealtimeTransport`]. Channel callbacks (status, presence, broadcast,
//! row changes) come back as [`ChannelEvent`]s pushed into a [`ChannelSink`],
//! tagged with the handle of the channel they belong to.

use std::fmt;

use tokio::sync::mpsc;

use super::session::SessionInput;
use crate::error::TransportResult;
use crate::event::{ChangeKind, SyncEvent};

/// Identifies one opened channel
///
/// Handles are never reused, so events from a released channel can be told
/// apart from events of its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(u64);

impl ChannelHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Current state of a channel, polled by the heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Errored,
    Joining,
    Joined,
    Leaving,
}

impl ChannelState {
    /// Joined or on its way there
    pub fn is_healthy(&self) -> bool {
        matches!(self, ChannelState::Joined | ChannelState::Joining)
    }
}

/// Subscription status reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Joined the topic
    Subscribed,
    /// Generic channel error
    ChannelError,
    /// Join wasn't acknowledged in time
    TimedOut,
    /// Channel or socket closed
    Closed,
}

/// Something that happened on a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Subscription status changed
    Status(ChannelStatus),
    /// Presence changed; carries every key currently present
    PresenceSync { keys: Vec<String> },
    /// Broadcast from a peer
    Broadcast {
        origin: Option<String>,
        event: SyncEvent,
    },
    /// Row-level change in a watched table
    Change { table: String, kind: ChangeKind },
}

/// Parameters for opening a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Logical topic, scoped per user
    pub topic: String,
    /// Presence key announced for this device
    pub device_id: String,
    /// Whether our own broadcasts should be echoed back to us
    pub receive_own_broadcasts: bool,
    /// Tables to receive row-level change notifications for
    pub watched_tables: Vec<String>,
}

/// Where a transport delivers events for one channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    handle: ChannelHandle,
    inputs: mpsc::UnboundedSender<SessionInput>,
}

impl ChannelSink {
    pub(crate) fn new(handle: ChannelHandle, inputs: mpsc::UnboundedSender<SessionInput>) -> Self {
        Self { handle, inputs }
    }

    pub fn handle(&self) -> ChannelHandle {
        self.handle
    }

    /// Deliver an event; returns false once the session is gone
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.inputs
            .send(SessionInput::Channel {
                handle: self.handle,
                event,
            })
            .is_ok()
    }
}

/// Client side of a hosted realtime service
///
/// Implementations must not block: network work happens in the background
/// and results are reported through the channel's sink.
pub trait RealtimeTransport: Send + 'static {
    /// Start opening a channel for `spec`
    fn open(&mut self, handle: ChannelHandle, spec: ChannelSpec, sink: ChannelSink);

    /// Current state of the channel; unknown handles are `Closed`
    fn state(&self, handle: ChannelHandle) -> ChannelState;

    /// Fire-and-forget broadcast to the channel's other members
    fn send(&mut self, handle: ChannelHandle, origin: &str, event: &SyncEvent) -> TransportResult<()>;

    /// Announce this device's presence
    fn track(&mut self, handle: ChannelHandle, device_id: &str) -> TransportResult<()>;

    /// Release the channel. Events it emits afterwards are ignored.
    fn close(&mut self, handle: ChannelHandle);
}
