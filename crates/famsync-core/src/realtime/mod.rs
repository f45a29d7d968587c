//! Hosted realtime service client
//!
//! Speaks the Phoenix channel protocol over a WebSocket: join a topic,
//! track presence, send broadcasts and receive row-level change feeds.
//! [`PhoenixTransport`] plugs this into the sync session.

pub mod message;
mod presence;
mod transport;

pub use message::{Frame, Inbound};
pub use presence::PresenceMap;
pub use transport::{
    PhoenixSettings, PhoenixTransport, DEFAULT_JOIN_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL,
};
