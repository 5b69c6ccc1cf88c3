use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "lockin",
    version,
    about = "Track coding time from editor events and serve daily stats to a dashboard"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Session history file (defaults to the configured one).
    #[arg(long, value_name = "PATH")]
    pub sessions: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read editor events from stdin as JSON lines and record sessions.
    Track {
        /// Start the stats server immediately.
        #[arg(long)]
        serve: bool,
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Serve the persisted daily stats over HTTP until Ctrl+C.
    Serve {
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Print the per-day aggregate.
    Stats {
        /// Emit the same JSON the /stats endpoint serves.
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Render the terminal dashboard.
    Dashboard {
        /// Number of most recent days to list.
        #[arg(long, value_name = "N")]
        days: Option<usize>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Print a one-shot operational status snapshot.
    Status {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Run health diagnostics for storage and server setup.
    Doctor {
        #[command(flatten)]
        store: StoreArgs,
    },
}
