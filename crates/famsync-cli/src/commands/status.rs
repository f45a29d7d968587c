//! Status command handler

use std::path::PathBuf;

use anyhow::Result;

use famsync_core::Config;

use crate::output::{human_duration, Output, OutputFormat};

/// Show what a session would connect to and how it would retry
pub fn show(config: &Config, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let settings = config.sync_settings();
    let topic = config.user_id.as_deref().map(|user| settings.topic_for(user));
    let schedule = settings.policy.schedule();

    match output.format {
        OutputFormat::Json => {
            let schedule_ms: Vec<u128> = schedule.iter().map(|d| d.as_millis()).collect();
            println!(
                "{}",
                serde_json::json!({
                    "realtime_url": config.realtime_url,
                    "user_id": config.user_id,
                    "topic": topic,
                    "heartbeat_interval_secs": settings.heartbeat_interval.as_secs(),
                    "retry_schedule_ms": schedule_ms,
                    "watched_tables": settings.watched_tables,
                })
            );
        }
        OutputFormat::Quiet => {
            let ready = config.realtime_url.is_some() && config.user_id.is_some();
            println!("{}", if ready { "ready" } else { "unconfigured" });
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);

            println!("famsync Status");
            println!("==============");
            println!();
            println!("Endpoint:");
            println!(
                "  URL:   {}",
                config.realtime_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  User:  {}",
                config.user_id.as_deref().unwrap_or("(not set)")
            );
            println!("  Topic: {}", topic.as_deref().unwrap_or("(no user)"));
            println!();
            println!("Liveness:");
            println!(
                "  Heartbeat: every {}",
                human_duration(settings.heartbeat_interval)
            );
            let delays: Vec<String> = schedule.iter().map(|d| human_duration(*d)).collect();
            println!(
                "  Retries:   {} ({} attempts)",
                delays.join(", "),
                delays.len()
            );
            if !settings.watched_tables.is_empty() {
                println!();
                println!("Watched tables: {}", settings.watched_tables.join(", "));
            }
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}
