//! Play command - headless player
//!
//! Follows an editor with a wall-clock row timer and prints the requested
//! tracks whenever the row changes. Without an editor the tracks come from
//! their files and playback runs on its own.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use synctrack_core::{SyncClient, SyncTimer, TransportKind};

/// Sleep between updates
const FRAME_INTERVAL: Duration = Duration::from_millis(10);

/// Arguments for the play command
#[derive(Args)]
pub struct PlayArgs {
    /// Config file (defaults to the user config)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Editor host
    #[arg(long)]
    pub host: Option<String>,

    /// Editor port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Connect over WebSocket instead of raw TCP
    #[arg(long)]
    pub websocket: bool,

    /// Directory holding the track files
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Track file prefix
    #[arg(short, long)]
    pub base: Option<String>,

    /// Track to follow (repeatable)
    #[arg(short, long = "track", required = true)]
    pub tracks: Vec<String>,

    /// Stop once playback reaches this row
    #[arg(long)]
    pub until: Option<u32>,
}

/// Row clock running at a fixed rate while playing.
#[derive(Debug, Clone)]
pub struct RowTimer {
    rows_per_second: f64,
    /// Row at `origin`
    start_row: f64,
    origin: Instant,
    playing: bool,
}

impl RowTimer {
    pub fn new(rows_per_second: f64) -> Self {
        Self {
            rows_per_second,
            start_row: 0.0,
            origin: Instant::now(),
            playing: true,
        }
    }

    pub fn row(&self) -> f64 {
        self.row_at(Instant::now())
    }

    fn row_at(&self, now: Instant) -> f64 {
        if self.playing {
            self.start_row + now.duration_since(self.origin).as_secs_f64() * self.rows_per_second
        } else {
            self.start_row
        }
    }

    fn rebase(&mut self, now: Instant) {
        self.start_row = self.row_at(now);
        self.origin = now;
    }
}

impl SyncTimer for RowTimer {
    fn pause(&mut self) {
        self.rebase(Instant::now());
        self.playing = false;
    }

    fn play(&mut self) {
        self.rebase(Instant::now());
        self.playing = true;
    }

    fn set_row(&mut self, row: u32) {
        self.start_row = f64::from(row);
        self.origin = Instant::now();
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

/// Execute the play command
pub fn execute(args: PlayArgs) -> Result<()> {
    let mut config = crate::load_config(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.client.host = host;
    }
    if let Some(port) = args.port {
        config.client.port = port;
    }
    if args.websocket {
        config.client.transport = TransportKind::WebSocket;
    }
    if let Some(dir) = args.dir {
        config.tracks.directory = dir;
    }
    if let Some(base) = args.base {
        config.tracks.base = base;
    }

    let mut client = SyncClient::new(&config.tracks.directory, &config.tracks.base)
        .context("Invalid track file location")?
        .with_dialect(config.client.dialect);

    let client_config = &config.client;
    match client.connect(
        &client_config.host,
        client_config.port,
        client_config.transport,
        client_config.connect_timeout(),
    ) {
        Ok(()) => tracing::info!(host = %client_config.host, port = client_config.port, "Following editor"),
        Err(e) => tracing::warn!(error = %e, "Editor not reachable, playing from track files"),
    }

    let indices = args
        .tracks
        .iter()
        .map(|name| client.get_track(name))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to open tracks")?;

    let mut timer = RowTimer::new(config.playback.rows_per_second());
    let mut last_row = None;

    loop {
        let row = timer.row().max(0.0);
        let current = row.floor() as u32;

        if let Err(e) = client.update(current, &mut timer) {
            tracing::debug!(error = %e, "Sync update failed");
        }

        if last_row != Some(current) {
            last_row = Some(current);
            let values: Vec<String> = args
                .tracks
                .iter()
                .zip(&indices)
                .map(|(name, &index)| format!("{}={:.4}", name, client.value(index, row)))
                .collect();
            println!("{:>6}  {}", current, values.join("  "));
        }

        if args.until.is_some_and(|until| current >= until) {
            return Ok(());
        }
        thread::sleep(FRAME_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_advances_while_playing() {
        let timer = RowTimer::new(20.0);
        let later = timer.origin + Duration::from_millis(500);
        assert!((timer.row_at(later) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_paused_timer_holds_row() {
        let mut timer = RowTimer::new(20.0);
        timer.set_row(32);
        timer.pause();
        assert!(!timer.is_playing());

        let held = timer.row();
        let later = timer.origin + Duration::from_secs(3);
        assert_eq!(timer.row_at(later), held);
        assert!(held >= 32.0);
    }

    #[test]
    fn test_play_resumes_from_held_row() {
        let mut timer = RowTimer::new(8.0);
        timer.pause();
        timer.set_row(100);
        timer.play();

        let later = timer.origin + Duration::from_secs(1);
        assert!((timer.row_at(later) - 108.0).abs() < 1e-9);
    }
}
