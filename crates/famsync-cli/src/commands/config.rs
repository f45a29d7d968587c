//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use famsync_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "realtime_url, api_key, user_id, topic_prefix, heartbeat_interval_secs, \
     reconnect_base_delay_ms, reconnect_max_delay_ms, max_reconnect_attempts, watched_tables, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let api_key = config.api_key.as_deref().map(mask_secret);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "realtime_url": config.realtime_url,
                    "api_key": api_key,
                    "user_id": config.user_id,
                    "topic_prefix": config.topic_prefix,
                    "heartbeat_interval_secs": config.heartbeat_interval_secs,
                    "reconnect_base_delay_ms": config.reconnect_base_delay_ms,
                    "reconnect_max_delay_ms": config.reconnect_max_delay_ms,
                    "max_reconnect_attempts": config.max_reconnect_attempts,
                    "watched_tables": config.watched_tables,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.realtime_url.as_deref().unwrap_or(""));
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            let unset = || "(not set)".to_string();

            println!("Configuration:");
            println!(
                "  realtime_url:            {}",
                config.realtime_url.clone().unwrap_or_else(unset)
            );
            println!("  api_key:                 {}", api_key.unwrap_or_else(unset));
            println!(
                "  user_id:                 {}",
                config.user_id.clone().unwrap_or_else(unset)
            );
            println!("  topic_prefix:            {}", config.topic_prefix);
            println!(
                "  heartbeat_interval_secs: {}",
                config.heartbeat_interval_secs
            );
            println!(
                "  reconnect_base_delay_ms: {}",
                config.reconnect_base_delay_ms
            );
            println!(
                "  reconnect_max_delay_ms:  {}",
                config.reconnect_max_delay_ms
            );
            println!(
                "  max_reconnect_attempts:  {}",
                config.max_reconnect_attempts
            );
            println!(
                "  watched_tables:          {}",
                if config.watched_tables.is_empty() {
                    unset()
                } else {
                    config.watched_tables.join(", ")
                }
            );
            println!(
                "  log_file:                {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(unset)
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    let shown = if key == "api_key" {
        mask_secret(&value)
    } else {
        value
    };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

/// Update one key; empty or "none" clears optional values
fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let optional = |value: &str| {
        if value.is_empty() || value == "none" {
            None
        } else {
            Some(value.to_string())
        }
    };

    match key {
        "realtime_url" => config.realtime_url = optional(value),
        "api_key" => config.api_key = optional(value),
        "user_id" => config.user_id = optional(value),
        "topic_prefix" => {
            if value.is_empty() {
                bail!("topic_prefix cannot be empty");
            }
            config.topic_prefix = value.to_string();
        }
        "heartbeat_interval_secs" => {
            config.heartbeat_interval_secs = value
                .parse()
                .context("Invalid value for heartbeat_interval_secs. Use a number of seconds.")?;
        }
        "reconnect_base_delay_ms" => {
            config.reconnect_base_delay_ms = value
                .parse()
                .context("Invalid value for reconnect_base_delay_ms. Use milliseconds.")?;
        }
        "reconnect_max_delay_ms" => {
            config.reconnect_max_delay_ms = value
                .parse()
                .context("Invalid value for reconnect_max_delay_ms. Use milliseconds.")?;
        }
        "max_reconnect_attempts" => {
            config.max_reconnect_attempts = value
                .parse()
                .context("Invalid value for max_reconnect_attempts. Use a whole number.")?;
        }
        "watched_tables" => {
            config.watched_tables = value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty() && *t != "none")
                .map(str::to_string)
                .collect();
        }
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }

    Ok(())
}

/// Keep only enough of a secret to recognise it
fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", prefix)
    }
}
