//! Watch command handler

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use famsync_core::{Config, SessionPhase, SyncError};

use super::{resolve_user, spawn_client, wait_until};
use crate::output::Output;

/// How long to wait for the session to release its channel on exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Print every event for the user until Ctrl-C
pub async fn run(config: &Config, user: Option<String>, output: &Output) -> Result<()> {
    let user_id = resolve_user(config, user)?;
    let client = spawn_client(config)?;

    let format = output.format;
    let subscription = client.subscribe_with_reconnect(
        &user_id,
        move |event| Output::new(format).print_event(event),
        move || Output::new(format).message("Reconnected, refresh local data"),
    );

    if !output.is_quiet() && !output.is_json() {
        eprintln!("Watching {} (Ctrl-C to stop)", user_id);
    }

    let wake = client.wake_signal();
    let mut wake_requests = WakeRequests::listen()?;
    let mut snapshots = client.watch_snapshot();
    let mut last_phase = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = wake_requests.recv() => {
                info!("Wake requested, retrying the connection");
                wake.on_connectivity_regained();
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Err(SyncError::SessionClosed.into());
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if last_phase == Some(snapshot.phase) {
                    continue;
                }
                last_phase = Some(snapshot.phase);
                output.print_phase(&snapshot);

                if snapshot.phase == SessionPhase::Abandoned && !output.is_quiet() {
                    eprintln!(
                        "Gave up reconnecting. Once the network is back, send SIGUSR1 (kill -USR1 {}) to retry.",
                        std::process::id()
                    );
                }
            }
        }
    }

    debug!("Stopping watch for {}", user_id);
    client.unsubscribe_all();
    subscription.unsubscribe();
    wait_until(&mut snapshots, SHUTDOWN_GRACE, |s| s.phase == SessionPhase::Idle).await?;

    Ok(())
}

/// SIGUSR1 stands in for the OS "network is back" notification
#[cfg(unix)]
struct WakeRequests(tokio::signal::unix::Signal);

#[cfg(unix)]
impl WakeRequests {
    fn listen() -> Result<Self> {
        use anyhow::Context;
        use tokio::signal::unix::{signal, SignalKind};

        let signal = signal(SignalKind::user_defined1()).context("Failed to listen for SIGUSR1")?;
        Ok(Self(signal))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct WakeRequests;

#[cfg(not(unix))]
impl WakeRequests {
    fn listen() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
