//! famsync core library
//!
//! Keeps a household dashboard's devices in step: when one device changes
//! shared data (people, shot records, medicine schedules, sharing), the
//! others hear about it over a hosted realtime channel and refetch.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let transport = PhoenixTransport::new(config.realtime_url()?, config.api_key());
//! let client = SyncClient::spawn(transport, config.sync_settings());
//!
//! let _sub = client.subscribe(config.user_id()?, |event| {
//!     println!("{} changed, refetching", event.kind());
//! });
//! client.broadcast(SyncEvent::Shots);
//! ```
//!
//! # Modules
//!
//! - `sync`: session state machine, reconnect policy and the client facade
//! - `realtime`: Phoenix-protocol WebSocket transport
//! - `event`: change notifications exchanged between devices
//! - `config`: application configuration
//! - `error`: error types

pub mod config;
pub mod error;
pub mod event;
pub mod realtime;
pub mod sync;

pub use config::Config;
pub use error::{SyncError, TransportError, TransportResult};
pub use event::{ChangeKind, SyncEvent};
pub use realtime::PhoenixTransport;
pub use sync::{SessionPhase, SessionSnapshot, Subscription, SyncClient, SyncSettings, WakeSignal};
