//! Serve command - headless editor
//!
//! Loads the per-track files, listens for players and applies edits typed
//! on stdin. Every edit is mirrored to the players subscribed to its track.

use std::path::PathBuf;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use synctrack_core::config::TracksConfig;
use synctrack_core::{KeyFrame, ServerEvent, SyncDocument, SyncServer};

use crate::console::{self, ConsoleCommand};

/// Sleep between poll iterations
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Arguments for the serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Config file (defaults to the user config)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    pub bind: Option<String>,

    /// TCP port for players
    #[arg(short, long)]
    pub port: Option<u16>,

    /// WebSocket port for players (0 disables)
    #[arg(long)]
    pub ws_port: Option<u16>,

    /// Directory holding the track files
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Track file prefix
    #[arg(short, long)]
    pub base: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Execute the serve command
pub fn execute(args: ServeArgs) -> Result<()> {
    let mut config = crate::load_config(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(port) = args.ws_port {
        config.server.websocket_port = port;
    }
    if let Some(dir) = args.dir {
        config.tracks.directory = dir;
    }
    if let Some(base) = args.base {
        config.tracks.base = base;
    }
    let tracks = config.tracks;

    let mut document = SyncDocument::new();
    document.set_rows(tracks.rows);
    document
        .load_track_files(&tracks.directory, &tracks.base)
        .with_context(|| format!("Failed to load tracks from {}", tracks.directory.display()))?;
    let loaded = document.tracks().len();

    let mut server = SyncServer::bind(&config.server, document).with_context(|| {
        format!(
            "Failed to listen on {}:{}",
            config.server.bind, config.server.port
        )
    })?;

    println!("=== Sync Editor ===");
    println!("  Tracks: {} loaded from {}", loaded, tracks.directory.display());
    println!("  TCP: {}", server.local_addr()?);
    if let Some(addr) = server.websocket_addr() {
        println!("  WebSocket: {}", addr);
    }
    println!("{}", console::HELP);

    let lines = console::spawn_stdin_reader();
    let mut stdin_open = true;

    loop {
        for event in server.poll() {
            log_event(&event);
        }

        while stdin_open {
            let line = match lines.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::info!("stdin closed, serving without console");
                    stdin_open = false;
                    break;
                }
            };
            match ConsoleCommand::parse(&line) {
                Ok(Some(command)) => {
                    if run_command(&mut server, command, &tracks) == Flow::Quit {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => println!("{}", e),
            }
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientConnected { peer, kind } => {
            tracing::info!(peer = ?peer, transport = %kind, "Player joined");
        }
        ServerEvent::ClientDisconnected { peer } => {
            tracing::info!(peer = ?peer, "Player left");
        }
        ServerEvent::TrackRequested { index, name } => {
            tracing::debug!(index, name = %name, "Track requested");
        }
        ServerEvent::RowChanged(row) => tracing::trace!(row, "Row changed"),
    }
}

/// Apply one console command. Edit failures are reported, not fatal.
fn run_command(server: &mut SyncServer, command: ConsoleCommand, tracks: &TracksConfig) -> Flow {
    match command {
        ConsoleCommand::Set {
            track,
            row,
            value,
            interpolation,
        } => {
            let index = server.create_track(&track);
            let edit = server
                .document()
                .set_key_command(index, KeyFrame::new(row, value, interpolation));
            match edit.and_then(|edit| server.execute(edit)) {
                Ok(()) => println!("{} @ {} = {} ({})", track, row, value, interpolation),
                Err(e) => println!("set failed: {}", e),
            }
        }
        ConsoleCommand::Delete { track, row } => {
            let Some(index) = server.document().tracks().find(&track) else {
                println!("no track named '{}'", track);
                return Flow::Continue;
            };
            let edit = server.document().delete_key_command(index, row);
            if let Err(e) = edit.and_then(|edit| server.execute(edit)) {
                println!("del failed: {}", e);
            }
        }
        ConsoleCommand::Undo => match server.undo() {
            Ok(true) => {}
            Ok(false) => println!("nothing to undo"),
            Err(e) => println!("undo failed: {}", e),
        },
        ConsoleCommand::Redo => match server.redo() {
            Ok(true) => {}
            Ok(false) => println!("nothing to redo"),
            Err(e) => println!("redo failed: {}", e),
        },
        ConsoleCommand::Row(row) => server.set_row(row),
        ConsoleCommand::Pause => server.set_paused(true),
        ConsoleCommand::Play => server.set_paused(false),
        ConsoleCommand::Save => match server.save_track_files(&tracks.directory, &tracks.base) {
            Ok(written) => println!("saved {} tracks to {}", written, tracks.directory.display()),
            Err(e) => println!("save failed: {}", e),
        },
        ConsoleCommand::Load => match server.load_track_files(&tracks.directory, &tracks.base) {
            Ok(changes) => println!(
                "reloaded {} tracks from {} ({} key changes)",
                server.document().tracks().len(),
                tracks.directory.display(),
                changes
            ),
            Err(e) => println!("load failed: {}", e),
        },
        ConsoleCommand::RemoteSave => server.save_remote_tracks(),
        ConsoleCommand::Tracks => print_tracks(server),
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Quit => {
            if server.document().modified() {
                tracing::warn!("Quitting with unsaved edits");
            }
            return Flow::Quit;
        }
    }
    Flow::Continue
}

fn print_tracks(server: &SyncServer) {
    let row = server.edit_row();
    println!(
        "row {} ({}), {} players",
        row,
        if server.is_paused() { "paused" } else { "playing" },
        server.client_count()
    );
    for (index, track) in server.document().tracks().enumerate() {
        println!(
            "  [{}] {:<24} {:>3} keys  {:.4}",
            index,
            track.name(),
            track.len(),
            track.value_at(f64::from(row))
        );
    }
}
