//! Logging setup
//!
//! Only initializes if the FAMSYNC_LOG environment variable is set. Logs go
//! to `config.log_file` when configured, stderr otherwise, so they never mix
//! with command output on stdout.

use std::fs::OpenOptions;

use tracing::info;
use tracing_subscriber::EnvFilter;

use famsync_core::Config;

/// Environment variable holding the log level
const LOG_ENV: &str = "FAMSYNC_LOG";

pub fn init(config: &Config) {
    let Ok(log_level) = std::env::var(LOG_ENV) else {
        return;
    };

    let env_filter = filter_for(&log_level);

    let Some(log_path) = config.log_file.as_ref() else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging initialized to {:?}", log_path);
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::new(format!("famsync_core={},famsync={}", level, level))
}
