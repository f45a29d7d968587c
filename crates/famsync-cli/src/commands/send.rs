//! Send command handler

use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use famsync_core::{Config, SessionPhase, SyncEvent};

use super::{resolve_user, spawn_client, wait_until};
use crate::output::Output;

/// Upper bound on waiting for peers once connected
const PEER_WAIT: Duration = Duration::from_secs(2);

/// Time for the channel task to flush the broadcast and leave frames
const FLUSH_GRACE: Duration = Duration::from_millis(300);

/// Parse the event given on the command line
fn parse_event(kind: &str, table: Option<&str>) -> Result<SyncEvent> {
    SyncEvent::from_kind(kind, table).ok_or_else(|| {
        if kind == "raw_change" {
            anyhow!("raw_change needs a table: famsync send raw_change --table <name>")
        } else {
            anyhow!(
                "Unknown event kind '{}'\n\
                 Valid kinds: people, shots, medicine, prn, sharing, raw_change",
                kind
            )
        }
    })
}

/// Connect, broadcast one event and leave
pub async fn run(
    config: &Config,
    kind: &str,
    table: Option<String>,
    user: Option<String>,
    wait_secs: u64,
    output: &Output,
) -> Result<()> {
    let event = parse_event(kind, table.as_deref())?;
    let user_id = resolve_user(config, user)?;
    let within = Duration::from_secs(wait_secs);

    let client = spawn_client(config)?;
    let subscription = client.subscribe(&user_id, |_| {});
    let mut snapshots = client.watch_snapshot();

    let settled = wait_until(&mut snapshots, within, |s| {
        matches!(s.phase, SessionPhase::Connected | SessionPhase::Abandoned)
    })
    .await?;

    match settled {
        Some(snapshot) if snapshot.phase == SessionPhase::Connected => {}
        Some(_) => bail!("Gave up connecting to the realtime service"),
        None => bail!("Not connected after {}s", wait_secs),
    }

    let with_peers = wait_until(&mut snapshots, within.min(PEER_WAIT), |s| {
        s.other_devices_online > 0
    })
    .await?;

    let Some(snapshot) = with_peers else {
        output.message("No other devices online, nothing sent");
        subscription.unsubscribe();
        return Ok(());
    };

    client.broadcast(event.clone());
    client.unsubscribe_all();
    subscription.unsubscribe();
    wait_until(&mut snapshots, FLUSH_GRACE, |s| s.phase == SessionPhase::Idle).await?;
    tokio::time::sleep(FLUSH_GRACE).await;

    output.success(&format!(
        "Sent {} to {} other device(s)",
        event.kind(),
        snapshot.other_devices_online
    ));

    Ok(())
}
