//! urbdrc-mux
//!
//! Replays USB redirection scenarios against the channel multiplexer over an
//! in-memory transport, printing the device slot table after every step.

mod config;
mod scenario;

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use config::CliConfig;
use scenario::{Scenario, ScenarioRunner};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "urbdrc-mux")]
#[command(
    author,
    version,
    about = "USB channel multiplexer - replay device redirection scenarios"
)]
#[command(long_about = "
Drives a USB redirection session over a loopback dynamic-channel transport.
Each connected device gets its own channel (URBDRC_00, URBDRC_01, ...)
negotiated over the URBDRC control channel.

EXAMPLES:
    # Run the built-in capacity demonstration
    urbdrc-mux

    # Replay a scenario file
    urbdrc-mux --scenario ./hotplug.toml

    # Show what a session with redirection switched off does
    urbdrc-mux --disable-usb --log-level debug

CONFIGURATION:
    The configuration is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/urbdrc-mux/config.toml
    3. /etc/urbdrc-mux/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Scenario file to replay (TOML, [[step]] entries)
    #[arg(short, long, value_name = "PATH")]
    scenario: Option<PathBuf>,

    /// Treat USB redirection as disabled for the session
    #[arg(long)]
    disable_usb: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = CliConfig::default();
        let path = CliConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        CliConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        CliConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("urbdrc-mux v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = config.session_settings();
    if args.disable_usb {
        settings.usb_enabled = false;
    }
    info!(
        "USB redirection {}, {} device slots",
        if settings.usb_enabled { "enabled" } else { "disabled" },
        settings.max_devices
    );

    let scenario = match args.scenario {
        Some(ref path) => Scenario::load(&config::expand_path(path))?,
        None => {
            info!("No scenario given, running the capacity demonstration");
            Scenario::capacity_demo(settings.max_devices)
        }
    };

    let runner = ScenarioRunner::new(settings);
    for (i, step) in scenario.steps.iter().enumerate() {
        let result = runner
            .run_step(step)
            .with_context(|| format!("Step {} ({}) failed", i + 1, step.describe()))?;

        println!("[{}] {} -> {}", i + 1, step.describe(), result);
        print!("{}", runner.slot_table());
        println!();
    }

    info!(
        "Scenario finished, {} of {} slots in use",
        runner.session().in_use_count(),
        runner.session().capacity()
    );
    info!(
        "Open channels: {:?}",
        runner.transport().open_channel_names()
    );
    Ok(())
}
