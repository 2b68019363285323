//! Editor document: the authoritative track store plus its edit history.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use synctrack_shared::track_file::{self, TrackFileError};
use synctrack_shared::{KeyFrame, TrackStore};

use super::command::{EditCommand, EditError, TrackDelta};

/// Default timeline length in rows
pub const DEFAULT_ROWS: u32 = 128;

/// Tracks, undo/redo stacks and save-point tracking.
///
/// All key mutation goes through [`SyncDocument::execute`], [`undo`] and
/// [`redo`], which return the deltas players need to see.
///
/// [`undo`]: SyncDocument::undo
/// [`redo`]: SyncDocument::redo
#[derive(Debug, Clone)]
pub struct SyncDocument {
    tracks: TrackStore,
    /// Timeline length shown by the editor
    rows: u32,
    undo_stack: Vec<EditCommand>,
    redo_stack: Vec<EditCommand>,
    /// Undo depth matching the last save; `None` once that state is unreachable
    save_point: Option<usize>,
}

impl Default for SyncDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncDocument {
    pub fn new() -> Self {
        Self {
            tracks: TrackStore::new(),
            rows: DEFAULT_ROWS,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            save_point: Some(0),
        }
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    /// Track creation is not an edit; the history never sees it.
    pub(crate) fn tracks_mut(&mut self) -> &mut TrackStore {
        &mut self.tracks
    }

    pub fn create_track(&mut self, name: &str) -> usize {
        self.tracks.get_or_create(name)
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn set_rows(&mut self, rows: u32) {
        self.rows = rows.max(1);
    }

    /// Run `cmd`, record it and drop the redo branch.
    pub fn execute(&mut self, mut cmd: EditCommand) -> Result<Vec<TrackDelta>, EditError> {
        let deltas = cmd.exec(&mut self.tracks)?;
        tracing::debug!(edit = %cmd.describe(), "Executed edit");

        if self.save_point.is_some_and(|point| point > self.undo_stack.len()) {
            // The saved state lived on the branch being discarded
            self.save_point = None;
        }
        self.undo_stack.push(cmd);
        self.redo_stack.clear();
        Ok(deltas)
    }

    /// `Ok(None)` when there is nothing to undo.
    ///
    /// A failed undo leaves the command on the undo stack.
    pub fn undo(&mut self) -> Result<Option<Vec<TrackDelta>>, EditError> {
        let Some(mut cmd) = self.undo_stack.pop() else {
            return Ok(None);
        };
        match cmd.undo(&mut self.tracks) {
            Ok(deltas) => {
                tracing::debug!(edit = %cmd.describe(), "Undid edit");
                self.redo_stack.push(cmd);
                Ok(Some(deltas))
            }
            Err(e) => {
                self.undo_stack.push(cmd);
                Err(e)
            }
        }
    }

    /// `Ok(None)` when there is nothing to redo.
    pub fn redo(&mut self) -> Result<Option<Vec<TrackDelta>>, EditError> {
        let Some(mut cmd) = self.redo_stack.pop() else {
            return Ok(None);
        };
        match cmd.exec(&mut self.tracks) {
            Ok(deltas) => {
                tracing::debug!(edit = %cmd.describe(), "Redid edit");
                self.undo_stack.push(cmd);
                Ok(Some(deltas))
            }
            Err(e) => {
                self.redo_stack.push(cmd);
                Err(e)
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Drop all history, keeping the current keys.
    pub fn clear_history(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.save_point = Some(0);
    }

    /// True when the keys differ from the last save or load.
    pub fn modified(&self) -> bool {
        self.save_point != Some(self.undo_stack.len())
    }

    pub fn mark_saved(&mut self) {
        self.save_point = Some(self.undo_stack.len());
    }

    /// Insert a new key, or edit the one already at `key.row`.
    pub fn set_key_command(&self, track: usize, key: KeyFrame) -> Result<EditCommand, EditError> {
        let target = self.tracks.get(track).ok_or(EditError::UnknownTrack(track))?;
        Ok(match target.key_at(key.row) {
            Some(old) => EditCommand::edit(track, *old, key),
            None => EditCommand::insert(track, key),
        })
    }

    pub fn delete_key_command(&self, track: usize, row: u32) -> Result<EditCommand, EditError> {
        let target = self.tracks.get(track).ok_or(EditError::UnknownTrack(track))?;
        if !target.is_key_at(row) {
            return Err(EditError::NoKey { track, row });
        }
        Ok(EditCommand::delete(track, row))
    }

    /// Load every `<base>_*.track` dump under `dir`.
    ///
    /// Every file is read before the store changes, so a bad file leaves the
    /// document untouched. Loading replaces keys directly, clears the history
    /// and marks the document saved. Returns the key changes against the
    /// previous contents, for players that already mirror these tracks.
    pub fn load_track_files(&mut self, dir: &Path, base: &str) -> Result<Vec<TrackDelta>, TrackFileError> {
        let mut loaded = Vec::new();
        for (name, path) in track_file::list_track_files(dir, base)? {
            let file = File::open(&path)?;
            loaded.push((name, track_file::read_keys(&mut BufReader::new(file))?));
        }

        let mut deltas = Vec::new();
        for (name, keys) in &loaded {
            let index = self.tracks.get_or_create(name);
            let Some(track) = self.tracks.get_mut(index) else {
                continue;
            };
            let previous = track.keys().to_vec();
            track.clear_keys();
            for key in keys {
                track.set_key(*key);
            }
            deltas.extend(key_changes(index, &previous, track.keys()));
        }

        self.clear_history();
        tracing::info!(
            dir = %dir.display(),
            base,
            tracks = loaded.len(),
            changes = deltas.len(),
            "Loaded track files"
        );
        Ok(deltas)
    }

    /// Dump every track and mark the document saved.
    pub fn save_track_files(&mut self, dir: &Path, base: &str) -> Result<usize, TrackFileError> {
        let written = track_file::save_all(dir, base, &self.tracks)?;
        self.mark_saved();
        Ok(written)
    }
}

/// Deltas turning `before` into `after` (both sorted by row).
fn key_changes(track: usize, before: &[KeyFrame], after: &[KeyFrame]) -> Vec<TrackDelta> {
    let removed = before
        .iter()
        .filter(|old| after.binary_search_by_key(&old.row, |key| key.row).is_err())
        .map(|old| TrackDelta::KeyDeleted { track, row: old.row });
    let changed = after
        .iter()
        .filter(|key| !before.contains(key))
        .map(|&key| TrackDelta::KeySet { track, key });
    removed.chain(changed).collect()
}
