//! Phoenix WebSocket transport
//!
//! Each opened channel gets its own socket and background task. The task
//! joins the topic, keeps the socket alive and reports what it sees through
//! the channel's sink. It never reconnects by itself: a failure is reported
//! once and the session decides when to open a replacement.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use super::message::{Frame, Inbound, RefCounter, PROTOCOL_VSN};
use super::presence::PresenceMap;
use crate::error::{TransportError, TransportResult};
use crate::event::SyncEvent;
use crate::sync::{
    ChannelEvent, ChannelHandle, ChannelSink, ChannelSpec, ChannelState, ChannelStatus,
    RealtimeTransport,
};

/// How long the server has to acknowledge a join
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between socket-level keepalives
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Commands buffered per channel before sends start failing
const COMMAND_BUFFER: usize = 32;

/// Connection parameters
#[derive(Debug, Clone)]
pub struct PhoenixSettings {
    /// Base realtime URL (`wss://host/realtime/v1`); http(s) is accepted too
    pub url: String,
    /// Project API key, sent as `apikey` and as the join's access token
    pub api_key: String,
    pub join_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl PhoenixSettings {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }

    /// Full socket URL including query parameters
    pub fn socket_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        let base = if base.ends_with("/websocket") {
            base
        } else {
            format!("{}/websocket", base)
        };

        if self.api_key.is_empty() {
            format!("{}?vsn={}", base, PROTOCOL_VSN)
        } else {
            format!("{}?apikey={}&vsn={}", base, self.api_key, PROTOCOL_VSN)
        }
    }
}

#[derive(Debug)]
enum ChannelCommand {
    Broadcast { origin: String, event: SyncEvent },
    Track { device_id: String },
    Leave,
}

/// Why a channel task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelExit {
    /// We left on purpose; nothing to report
    Left,
    Closed,
    Errored,
    TimedOut,
}

struct ChannelTask {
    commands: mpsc::Sender<ChannelCommand>,
    state: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

/// [`RealtimeTransport`] backed by a Phoenix-protocol realtime server
pub struct PhoenixTransport {
    settings: PhoenixSettings,
    channels: HashMap<ChannelHandle, ChannelTask>,
}

impl PhoenixTransport {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_settings(PhoenixSettings::new(url, api_key))
    }

    pub fn with_settings(settings: PhoenixSettings) -> Self {
        Self {
            settings,
            channels: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &PhoenixSettings {
        &self.settings
    }

    fn push(&self, handle: ChannelHandle, command: ChannelCommand) -> TransportResult<()> {
        let channel = self
            .channels
            .get(&handle)
            .ok_or(TransportError::UnknownChannel(handle))?;

        if *channel.state.borrow() != ChannelState::Joined {
            return Err(TransportError::NotJoined(handle));
        }

        channel
            .commands
            .try_send(command)
            .map_err(|_| TransportError::QueueUnavailable(handle))
    }
}

impl RealtimeTransport for PhoenixTransport {
    fn open(&mut self, handle: ChannelHandle, spec: ChannelSpec, sink: ChannelSink) {
        self.channels.retain(|_, channel| !channel.task.is_finished());

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ChannelState::Joining);

        let task = tokio::spawn(channel_task(
            self.settings.clone(),
            spec,
            sink,
            command_rx,
            state_tx,
        ));

        self.channels.insert(
            handle,
            ChannelTask {
                commands: command_tx,
                state: state_rx,
                task,
            },
        );
    }

    fn state(&self, handle: ChannelHandle) -> ChannelState {
        self.channels
            .get(&handle)
            .map(|channel| *channel.state.borrow())
            .unwrap_or(ChannelState::Closed)
    }

    fn send(&mut self, handle: ChannelHandle, origin: &str, event: &SyncEvent) -> TransportResult<()> {
        self.push(
            handle,
            ChannelCommand::Broadcast {
                origin: origin.to_string(),
                event: event.clone(),
            },
        )
    }

    fn track(&mut self, handle: ChannelHandle, device_id: &str) -> TransportResult<()> {
        self.push(
            handle,
            ChannelCommand::Track {
                device_id: device_id.to_string(),
            },
        )
    }

    fn close(&mut self, handle: ChannelHandle) {
        let Some(channel) = self.channels.remove(&handle) else {
            return;
        };
        if channel.commands.try_send(ChannelCommand::Leave).is_err() {
            channel.task.abort();
        }
    }
}

impl Drop for PhoenixTransport {
    fn drop(&mut self) {
        for (_, channel) in self.channels.drain() {
            channel.task.abort();
        }
    }
}

/// Run one channel until it fails or is left, then report why
async fn channel_task(
    settings: PhoenixSettings,
    spec: ChannelSpec,
    sink: ChannelSink,
    mut commands: mpsc::Receiver<ChannelCommand>,
    state: watch::Sender<ChannelState>,
) {
    let handle = sink.handle();
    let exit = match connect_and_run(&settings, spec, &sink, &mut commands, &state).await {
        Ok(exit) => exit,
        Err(e) => {
            warn!("Realtime channel {} failed: {}", handle, e);
            ChannelExit::Errored
        }
    };

    let (final_state, status) = match exit {
        ChannelExit::Left => (ChannelState::Closed, None),
        ChannelExit::Closed => (ChannelState::Closed, Some(ChannelStatus::Closed)),
        ChannelExit::Errored => (ChannelState::Errored, Some(ChannelStatus::ChannelError)),
        ChannelExit::TimedOut => (ChannelState::Errored, Some(ChannelStatus::TimedOut)),
    };

    state.send_replace(final_state);
    if let Some(status) = status {
        debug!("Realtime channel {} ended: {:?}", handle, status);
        sink.emit(ChannelEvent::Status(status));
    }
}

/// Connect, join and pump frames until the channel ends
async fn connect_and_run(
    settings: &PhoenixSettings,
    spec: ChannelSpec,
    sink: &ChannelSink,
    commands: &mut mpsc::Receiver<ChannelCommand>,
    state: &watch::Sender<ChannelState>,
) -> Result<ChannelExit> {
    // The join timeout covers the socket and TLS handshakes too
    let join_deadline = Instant::now() + settings.join_timeout;
    let connected = tokio::time::timeout_at(join_deadline, connect_async(settings.socket_url())).await;
    let Ok(connected) = connected else {
        warn!("Realtime socket not up within {:?}", settings.join_timeout);
        return Ok(ChannelExit::TimedOut);
    };
    let (ws_stream, _) = connected?;
    let (mut write, mut read) = ws_stream.split();

    let topic = format!("realtime:{}", spec.topic);
    let spec = ChannelSpec {
        topic: topic.clone(),
        ..spec
    };

    let mut refs = RefCounter::default();
    let join_ref = refs.next();
    let join = Frame::join(&spec, Some(&settings.api_key), &join_ref);
    write.send(Message::Text(join.encode()?)).await?;
    debug!("Joining {} as {}", topic, spec.device_id);

    let mut joined = false;
    let mut presence = PresenceMap::new();
    let mut keepalive = tokio::time::interval_at(
        Instant::now() + settings.keepalive_interval,
        settings.keepalive_interval,
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(join_deadline), if !joined => {
                warn!("No reply to join of {} within {:?}", topic, settings.join_timeout);
                return Ok(ChannelExit::TimedOut);
            }

            _ = keepalive.tick() => {
                let frame = Frame::heartbeat(&refs.next());
                write.send(Message::Text(frame.encode()?)).await?;
            }

            cmd = commands.recv() => {
                match cmd {
                    Some(ChannelCommand::Broadcast { origin, event }) => {
                        let frame = Frame::broadcast(&topic, &origin, &event, &refs.next(), &join_ref)?;
                        write.send(Message::Text(frame.encode()?)).await?;
                    }
                    Some(ChannelCommand::Track { device_id }) => {
                        let frame = Frame::track(&topic, &device_id, &refs.next(), &join_ref);
                        write.send(Message::Text(frame.encode()?)).await?;
                    }
                    Some(ChannelCommand::Leave) | None => {
                        state.send_replace(ChannelState::Leaving);
                        let frame = Frame::leave(&topic, &refs.next(), &join_ref);
                        if let Ok(text) = frame.encode() {
                            write.send(Message::Text(text)).await.ok();
                        }
                        write.close().await.ok();
                        return Ok(ChannelExit::Left);
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match Frame::decode(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                debug!("Ignoring undecodable frame: {}", e);
                                continue;
                            }
                        };
                        // Keepalive replies arrive on the "phoenix" topic
                        if frame.topic != topic {
                            continue;
                        }

                        let event_name = frame.event.clone();
                        let inbound = match frame.classify() {
                            Ok(inbound) => inbound,
                            Err(e) => {
                                debug!("Ignoring malformed {} frame: {}", event_name, e);
                                continue;
                            }
                        };

                        let delivered = match inbound {
                            Inbound::Reply { msg_ref, ok, response } => {
                                if joined || msg_ref.as_deref() != Some(join_ref.as_str()) {
                                    continue;
                                }
                                if !ok {
                                    warn!("Join of {} rejected: {}", topic, response);
                                    return Ok(ChannelExit::Errored);
                                }
                                joined = true;
                                state.send_replace(ChannelState::Joined);
                                info!("Joined {}", topic);
                                sink.emit(ChannelEvent::Status(ChannelStatus::Subscribed))
                            }
                            Inbound::ChannelError => return Ok(ChannelExit::Errored),
                            Inbound::ChannelClose => return Ok(ChannelExit::Closed),
                            Inbound::Broadcast(body) => sink.emit(ChannelEvent::Broadcast {
                                origin: body.origin,
                                event: body.event,
                            }),
                            Inbound::PresenceState(snapshot) => {
                                presence.replace(snapshot);
                                sink.emit(ChannelEvent::PresenceSync { keys: presence.keys() })
                            }
                            Inbound::PresenceDiff { joins, leaves } => {
                                presence.apply_diff(joins, leaves);
                                sink.emit(ChannelEvent::PresenceSync { keys: presence.keys() })
                            }
                            Inbound::Change { table, kind } => {
                                sink.emit(ChannelEvent::Change { table, kind })
                            }
                            Inbound::Other(event) => {
                                trace!("Unhandled {} frame on {}", event, topic);
                                true
                            }
                        };

                        if !delivered {
                            debug!("Session gone, leaving {}", topic);
                            write.close().await.ok();
                            return Ok(ChannelExit::Left);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Ok(ChannelExit::Closed);
                    }
                    Some(Err(e)) => {
                        return Err(e.into());
                    }
                    _ => {}
                }
            }
        }
    }
}
