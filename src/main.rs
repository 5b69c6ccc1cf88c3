use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use lockin::app::{self, TrackSettings};
use lockin::cli::{Cli, Commands};
use lockin::config::TrackerConfig;
use lockin::util::setup_tracing;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("lockin error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<u8> {
    setup_tracing();
    let cli = Cli::parse();
    let loaded = TrackerConfig::load_or_init();
    let config_error = loaded.as_ref().err().map(|err| format!("{err:#}"));
    let config = TrackerConfig::or_default(loaded);

    match cli.command {
        Commands::Track { serve, port, store } => {
            let settings =
                TrackSettings::resolve(&config, serve, port, store.sessions.as_deref());
            app::run_tracker(settings)?;
            Ok(0)
        }
        Commands::Serve { port, store } => {
            app::run_server(&config, port, store.sessions.as_deref())?;
            Ok(0)
        }
        Commands::Stats { json, store } => {
            app::print_stats(&config, json, store.sessions.as_deref())?;
            Ok(0)
        }
        Commands::Dashboard { days, store } => {
            app::show_dashboard(&config, days, store.sessions.as_deref())?;
            Ok(0)
        }
        Commands::Status { store } => {
            app::print_status(&config, store.sessions.as_deref())?;
            Ok(0)
        }
        Commands::Doctor { store } => {
            app::doctor(&config, config_error.as_deref(), store.sessions.as_deref())
        }
    }
}
