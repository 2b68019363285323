//! Dump command - print the keys of a track file

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use synctrack_core::Track;
use synctrack_shared::track_file;

/// Arguments for the dump command
#[derive(Args)]
pub struct DumpArgs {
    /// Track file to read (.track)
    pub file: PathBuf,

    /// Also print the interpolated value at this row
    #[arg(long)]
    pub at: Option<f64>,
}

/// Execute the dump command
pub fn execute(args: DumpArgs) -> Result<()> {
    let file = File::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let keys = track_file::read_keys(&mut BufReader::new(file))
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    println!("{}: {} keys", args.file.display(), keys.len());
    for key in &keys {
        println!("  {:>6}  {:>12.4}  {}", key.row, key.value, key.interpolation);
    }

    if let Some(row) = args.at {
        let mut track = Track::new(track_name(&args.file));
        for key in keys {
            track.set_key(key);
        }
        println!("value at {}: {:.4}", row, track.value_at(row));
    }
    Ok(())
}

/// Best-effort track name: the decoded part after the last `_` of the stem.
fn track_name(path: &std::path::Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.rsplit_once('_')
        .and_then(|(_, encoded)| track_file::decode_track_name(encoded))
        .unwrap_or(stem)
}
