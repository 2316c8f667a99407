//! Show the effective watch configuration

use crate::settings::{self, Source};
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;
use watcher::config::{
    COALESCE_WINDOW_RANGE, IDLE_GRACE_RANGE, POLL_INTERVAL_RANGE, RACY_WINDOW_RANGE,
};

pub async fn run(explicit: Option<&Path>) -> Result<()> {
    let (config, source) = settings::load(explicit)?;

    println!("{}", "Watch Configuration".bold());
    match &source {
        Source::File(path) => println!("{}: {}\n", "Location".dimmed(), path.display().dimmed()),
        Source::Defaults => {
            let hint = settings::default_config_path()
                .map(|p| format!(" (create {} to override)", p.display()))
                .unwrap_or_default();
            println!("{}: {}{}\n", "Location".dimmed(), "built-in defaults".dimmed(), hint.dimmed());
        }
    }

    println!("  {} = {:?}", "backend".cyan(), config.backend);
    println!("  {} = {:?}", "fingerprint".cyan(), config.fingerprint);
    print_ranged("poll_interval_ms", config.poll_interval_ms, POLL_INTERVAL_RANGE);
    print_ranged("coalesce_window_ms", config.coalesce_window_ms, COALESCE_WINDOW_RANGE);
    print_ranged("racy_window_ms", config.racy_window_ms, RACY_WINDOW_RANGE);
    print_ranged("idle_grace_ms", config.idle_grace_ms, IDLE_GRACE_RANGE);

    println!("\n{}", "TOML".yellow());
    print!("{}", config.to_toml_string()?);

    Ok(())
}

fn print_ranged(key: &str, value: u64, (min, max): (u64, u64)) {
    println!(
        "  {} = {} {}",
        key.cyan(),
        value,
        format!("(valid: {}..={})", min, max).dimmed()
    );
}
