//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use std::io::{self, Write};

use chrono::Local;
use serde::Serialize;

use famsync_core::{SessionPhase, SessionSnapshot, SyncEvent};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// One line of `watch` output in JSON mode
#[derive(Debug, Serialize)]
struct EventLine<'a> {
    at: String,
    kind: &'static str,
    event: &'a SyncEvent,
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a received change notification
    ///
    /// A closed stdout (`famsync watch | head`) must not panic the handler,
    /// so write errors are dropped.
    pub fn print_event(&self, event: &SyncEvent) {
        let _ = self.write_event(&mut io::stdout().lock(), event);
    }

    fn write_event(&self, out: &mut impl Write, event: &SyncEvent) -> io::Result<()> {
        let at = Local::now();
        match self.format {
            OutputFormat::Human => match event {
                SyncEvent::RawChange { table } => {
                    writeln!(out, "[{}] {} ({})", at.format("%H:%M:%S"), event.kind(), table)
                }
                _ => writeln!(out, "[{}] {}", at.format("%H:%M:%S"), event.kind()),
            },
            OutputFormat::Json => {
                let line = EventLine {
                    at: at.to_rfc3339(),
                    kind: event.kind(),
                    event,
                };
                let json = serde_json::to_string(&line)?;
                writeln!(out, "{}", json)
            }
            OutputFormat::Quiet => writeln!(out, "{}", event.kind()),
        }
    }

    /// Print a session phase change
    pub fn print_phase(&self, snapshot: &SessionSnapshot) {
        match self.format {
            OutputFormat::Human => {
                let detail = match snapshot.phase {
                    SessionPhase::Reconnecting => {
                        format!(" (attempt {})", snapshot.reconnect_attempts)
                    }
                    SessionPhase::Connected => format!(
                        " ({} other device(s) online)",
                        snapshot.other_devices_online
                    ),
                    _ => String::new(),
                };
                eprintln!("• {}{}", snapshot.phase, detail);
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "phase": snapshot.phase.to_string(),
                        "reconnect_attempts": snapshot.reconnect_attempts,
                        "other_devices_online": snapshot.other_devices_online,
                    })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Format a duration the way `status` shows retry delays
pub fn human_duration(d: std::time::Duration) -> String {
    let ms = d.as_millis();
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
