//! Command handlers

pub mod config;
pub mod send;
pub mod status;
pub mod watch;

use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch::Receiver;

use famsync_core::{Config, PhoenixTransport, SessionSnapshot, SyncClient, SyncError};

/// Start a session against the configured realtime endpoint
pub fn spawn_client(config: &Config) -> Result<SyncClient> {
    let transport = PhoenixTransport::new(config.realtime_url()?, config.api_key());
    Ok(SyncClient::spawn(transport, config.sync_settings()))
}

/// The `--user` flag, falling back to the configured user
pub fn resolve_user(config: &Config, user: Option<String>) -> Result<String> {
    match user {
        Some(user) => Ok(user),
        None => Ok(config.user_id()?.to_string()),
    }
}

/// Wait for a snapshot matching `predicate`; `None` on timeout
pub async fn wait_until<F>(
    snapshots: &mut Receiver<SessionSnapshot>,
    within: Duration,
    predicate: F,
) -> Result<Option<SessionSnapshot>>
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    match tokio::time::timeout(within, snapshots.wait_for(predicate)).await {
        Ok(Ok(snapshot)) => Ok(Some(snapshot.clone())),
        Ok(Err(_)) => Err(SyncError::SessionClosed.into()),
        Err(_) => Ok(None),
    }
}
