//! Sync error types
//!
//! Nothing in the session layer surfaces these to subscribers. They exist so
//! transports and hosts can report what went wrong in logs.

use thiserror::Error;

use crate::sync::ChannelHandle;

/// Errors reported by a realtime transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// The handle doesn't refer to an open channel
    #[error("Unknown channel {0}")]
    UnknownChannel(ChannelHandle),

    /// The channel exists but hasn't joined its topic
    #[error("Channel {0} is not joined")]
    NotJoined(ChannelHandle),

    /// The outbound queue for the channel is full or its task has exited
    #[error("Send queue for channel {0} is unavailable")]
    QueueUnavailable(ChannelHandle),

    /// Payload could not be serialized
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from the sync client facade and its configuration
#[derive(Error, Debug)]
pub enum SyncError {
    /// A required configuration value is missing
    #[error("Missing configuration value '{key}'. Set it with:\n  famsync config set {key} <value>")]
    MissingConfig { key: &'static str },

    /// The session task has exited
    #[error("Sync session has shut down")]
    SessionClosed,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
