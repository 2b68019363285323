//! Per-track binary key dumps (`<base>_<encoded name>.track`).
//!
//! Used by players that run without an editor connection and by the editor's
//! save/load. All integers are little-endian, unlike the big-endian wire
//! protocol.
//!
//! # File Format
//!
//! ```text
//! [key_count:i32] ([row:i32][value:f32][interpolation:u8])*
//! ```
//!
//! Keys are written in ascending row order.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::key::{Interpolation, KeyFrame};
use crate::store::TrackStore;
use crate::track::Track;

/// File extension for track dumps
pub const TRACK_FILE_EXTENSION: &str = "track";

/// Upper bound on keys pre-allocated from an untrusted count
const MAX_PREALLOCATED_KEYS: usize = 1 << 16;

#[derive(Debug, Error)]
pub enum TrackFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid track base '{0}': must be a non-empty relative path")]
    InvalidBase(String),
    #[error("negative key count {0}")]
    NegativeCount(i32),
    #[error("negative row {0}")]
    NegativeRow(i32),
    #[error("row {row} on track '{track}' does not fit a track file")]
    RowOutOfRange { track: String, row: u32 },
    #[error("track '{0}' has too many keys for a track file")]
    TooManyKeys(String),
    #[error("invalid interpolation type {0}")]
    InvalidInterpolation(u8),
}

/// Returns true if `base` can prefix track file paths.
///
/// Rules:
/// - Must be non-empty
/// - Must be relative (no leading '/' or '\\', no drive prefix)
/// - Must name a file prefix, not a directory (no trailing separator)
/// - Must not contain empty, `.` or `..` components
/// - Must not contain control characters (including NUL)
pub fn is_safe_track_base(base: &str) -> bool {
    if base.is_empty() || base.starts_with('/') || base.starts_with('\\') {
        return false;
    }
    if base.ends_with('/') || base.ends_with('\\') || base.contains(':') {
        return false;
    }
    if base.chars().any(|c| c.is_control()) {
        return false;
    }
    !base.split(['/', '\\']).any(|part| part == ".." || part == "." || part.is_empty())
}

/// Escape a track name for use in a file name.
///
/// ASCII alphanumerics, `.` and `_` are kept; every other byte becomes `-`
/// followed by two upper-case hex digits. Separators are escaped too, so a
/// name never leaves the directory of its base.
pub fn encode_track_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("-{:02X}", byte));
        }
    }
    out
}

/// Inverse of [`encode_track_name`]. Returns `None` for malformed escapes.
pub fn decode_track_name(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'-' {
            let hex = encoded.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Path of the dump for track `name` under `dir`.
pub fn track_path(dir: &Path, base: &str, name: &str) -> PathBuf {
    dir.join(format!(
        "{}_{}.{}",
        base,
        encode_track_name(name),
        TRACK_FILE_EXTENSION
    ))
}

/// Fails when a row or the key count does not fit the signed file fields.
pub fn check_track(track: &Track) -> Result<(), TrackFileError> {
    if i32::try_from(track.len()).is_err() {
        return Err(TrackFileError::TooManyKeys(track.name().to_string()));
    }
    // Keys are sorted, so the last row is the largest
    match track.keys().last() {
        Some(key) if i32::try_from(key.row).is_err() => Err(TrackFileError::RowOutOfRange {
            track: track.name().to_string(),
            row: key.row,
        }),
        _ => Ok(()),
    }
}

pub fn write_track<W: Write>(writer: &mut W, track: &Track) -> Result<(), TrackFileError> {
    check_track(track)?;
    writer.write_i32::<LittleEndian>(track.len() as i32)?;
    for key in track.keys() {
        writer.write_i32::<LittleEndian>(key.row as i32)?;
        writer.write_f32::<LittleEndian>(key.value)?;
        writer.write_u8(key.interpolation.as_u8())?;
    }
    Ok(())
}

pub fn read_keys<R: Read>(reader: &mut R) -> Result<Vec<KeyFrame>, TrackFileError> {
    let count = reader.read_i32::<LittleEndian>()?;
    if count < 0 {
        return Err(TrackFileError::NegativeCount(count));
    }

    let mut keys = Vec::with_capacity((count as usize).min(MAX_PREALLOCATED_KEYS));
    for _ in 0..count {
        let row = reader.read_i32::<LittleEndian>()?;
        if row < 0 {
            return Err(TrackFileError::NegativeRow(row));
        }
        let value = reader.read_f32::<LittleEndian>()?;
        let raw = reader.read_u8()?;
        let interpolation =
            Interpolation::from_u8(raw).ok_or(TrackFileError::InvalidInterpolation(raw))?;
        keys.push(KeyFrame::new(row as u32, value, interpolation));
    }
    Ok(keys)
}

/// Write one track, creating leading directories.
pub fn save_track(dir: &Path, base: &str, track: &Track) -> Result<PathBuf, TrackFileError> {
    if !is_safe_track_base(base) {
        return Err(TrackFileError::InvalidBase(base.to_string()));
    }

    check_track(track)?;
    let path = track_path(dir, base, track.name());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(&path)?);
    write_track(&mut writer, track)?;
    writer.flush()?;
    Ok(path)
}

/// Replace the keys of `track` with the contents of its dump.
///
/// Returns `Ok(false)` and leaves the track untouched when no dump exists.
pub fn load_track(dir: &Path, base: &str, track: &mut Track) -> Result<bool, TrackFileError> {
    if !is_safe_track_base(base) {
        return Err(TrackFileError::InvalidBase(base.to_string()));
    }

    let path = track_path(dir, base, track.name());
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let keys = read_keys(&mut BufReader::new(file))?;
    track.clear_keys();
    for key in keys {
        track.set_key(key);
    }
    tracing::debug!(path = %path.display(), keys = track.len(), "Loaded track");
    Ok(true)
}

/// Dump every track in creation order. Returns the number of files written.
///
/// Nothing is written unless every track fits the file format.
pub fn save_all(dir: &Path, base: &str, store: &TrackStore) -> Result<usize, TrackFileError> {
    for track in store.iter() {
        check_track(track)?;
    }
    for track in store.iter() {
        save_track(dir, base, track)?;
    }
    tracing::info!(dir = %dir.display(), base, tracks = store.len(), "Saved tracks");
    Ok(store.len())
}

/// Find existing dumps for `base`, as `(track name, path)` sorted by name.
pub fn list_track_files(dir: &Path, base: &str) -> Result<Vec<(String, PathBuf)>, TrackFileError> {
    if !is_safe_track_base(base) {
        return Err(TrackFileError::InvalidBase(base.to_string()));
    }

    let full = dir.join(base);
    let (parent, stem) = match (full.parent(), full.file_name()) {
        (Some(parent), Some(stem)) => (parent.to_path_buf(), stem.to_string_lossy().into_owned()),
        _ => return Err(TrackFileError::InvalidBase(base.to_string())),
    };
    let prefix = format!("{}_", stem);
    let suffix = format!(".{}", TRACK_FILE_EXTENSION);

    let entries = match fs::read_dir(&parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(encoded) = file_name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
        else {
            continue;
        };
        match decode_track_name(encoded) {
            Some(name) if !name.is_empty() => found.push((name, entry.path())),
            _ => tracing::warn!(file = file_name, "Skipping track file with malformed name"),
        }
    }
    found.sort();
    Ok(found)
}
