//! Synctrack CLI - headless editor, player and track-file tools
//!
//! # Commands
//!
//! - `synctrack serve` - Load track files and serve them to players
//! - `synctrack play` - Follow an editor and print track values per row
//! - `synctrack dump` - Print the keys of a `.track` file
//!
//! # Usage
//!
//! ```bash
//! # Editor on the default ports (1338 TCP, 1339 WebSocket)
//! synctrack serve --dir data
//!
//! # Player following it
//! synctrack play --track cam.x --track cam.y
//!
//! # Inspect a saved track
//! synctrack dump data/sync_cam.x.track --at 12.5
//! ```
//!
//! # Config (synctrack.toml)
//!
//! ```toml
//! [server]
//! port = 1338
//! websocket_port = 0  # disable WebSocket players
//!
//! [tracks]
//! directory = "data"
//! base = "sync"
//!
//! [playback]
//! bpm = 120.0
//! rows_per_beat = 4
//! ```

mod console;
mod dump;
mod play;
mod serve;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use synctrack_core::{SyncConfig, config};

/// Synctrack - live-edited sync tracks for demos
#[derive(Parser)]
#[command(name = "synctrack")]
#[command(about = "Headless sync editor, player and track-file tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve track files to players and edit them from stdin
    Serve(serve::ServeArgs),

    /// Connect to an editor and print track values
    Play(play::PlayArgs),

    /// Print the keys of a track file
    Dump(dump::DumpArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => serve::execute(args),
        Commands::Play(args) => play::execute(args),
        Commands::Dump(args) => dump::execute(args),
    }
}

/// Explicit `--config` file, or the user config (defaults when absent).
fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    match path {
        Some(path) => config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(config::load()),
    }
}
