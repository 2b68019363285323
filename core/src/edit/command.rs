//! Reversible key edits.
//!
//! Every mutation the editor makes goes through an [`EditCommand`]. `exec` and
//! `undo` are exact inverses and report the key-level [`TrackDelta`]s they
//! caused, which the server forwards to connected players.

use synctrack_shared::{KeyFrame, TrackStore};
use thiserror::Error;

/// Command invariant violations. These are local logic errors, never caused
/// by a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("unknown track index {0}")]
    UnknownTrack(usize),
    #[error("track {track} already has a key at row {row}")]
    KeyExists { track: usize, row: u32 },
    #[error("track {track} has no key at row {row}")]
    NoKey { track: usize, row: u32 },
}

/// One key-level change, as seen by a mirror.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackDelta {
    KeySet { track: usize, key: KeyFrame },
    KeyDeleted { track: usize, row: u32 },
}

impl TrackDelta {
    pub fn track(&self) -> usize {
        match self {
            Self::KeySet { track, .. } | Self::KeyDeleted { track, .. } => *track,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditCommand {
    /// Add `key` where there is none
    Insert { track: usize, key: KeyFrame },
    /// Remove the key at `row`; `removed` is captured on exec
    Delete {
        track: usize,
        row: u32,
        removed: Option<KeyFrame>,
    },
    /// Replace `old` with `new` at the same row
    Edit {
        track: usize,
        old: KeyFrame,
        new: KeyFrame,
    },
    /// Sub-commands executed in order, undone in reverse
    Multi(Vec<EditCommand>),
}

impl EditCommand {
    pub fn insert(track: usize, key: KeyFrame) -> Self {
        Self::Insert { track, key }
    }

    pub fn delete(track: usize, row: u32) -> Self {
        Self::Delete {
            track,
            row,
            removed: None,
        }
    }

    /// `new` is pinned to `old.row`.
    pub fn edit(track: usize, old: KeyFrame, new: KeyFrame) -> Self {
        Self::Edit {
            track,
            old,
            new: new.at_row(old.row),
        }
    }

    pub fn multi(commands: Vec<EditCommand>) -> Self {
        Self::Multi(commands)
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Insert { track, key } => format!("insert track {} row {}", track, key.row),
            Self::Delete { track, row, .. } => format!("delete track {} row {}", track, row),
            Self::Edit { track, old, .. } => format!("edit track {} row {}", track, old.row),
            Self::Multi(commands) => format!("{} edits", commands.len()),
        }
    }

    pub fn exec(&mut self, store: &mut TrackStore) -> Result<Vec<TrackDelta>, EditError> {
        match self {
            Self::Insert { track, key } => {
                let (track, key) = (*track, *key);
                let target = store.get_mut(track).ok_or(EditError::UnknownTrack(track))?;
                if target.is_key_at(key.row) {
                    return Err(EditError::KeyExists { track, row: key.row });
                }
                target.set_key(key);
                Ok(vec![TrackDelta::KeySet { track, key }])
            }
            Self::Delete {
                track,
                row,
                removed,
            } => {
                let (track, row) = (*track, *row);
                let target = store.get_mut(track).ok_or(EditError::UnknownTrack(track))?;
                let key = target
                    .delete_key(row)
                    .map_err(|_| EditError::NoKey { track, row })?;
                *removed = Some(key);
                Ok(vec![TrackDelta::KeyDeleted { track, row }])
            }
            Self::Edit { track, old, new } => replace_key(store, *track, old.row, *new),
            Self::Multi(commands) => {
                let mut deltas = Vec::new();
                for i in 0..commands.len() {
                    match commands[i].exec(store) {
                        Ok(mut d) => deltas.append(&mut d),
                        Err(e) => {
                            rollback(&mut commands[..i], store, Direction::Undo);
                            return Err(e);
                        }
                    }
                }
                Ok(deltas)
            }
        }
    }

    pub fn undo(&mut self, store: &mut TrackStore) -> Result<Vec<TrackDelta>, EditError> {
        match self {
            Self::Insert { track, key } => {
                let (track, row) = (*track, key.row);
                let target = store.get_mut(track).ok_or(EditError::UnknownTrack(track))?;
                target
                    .delete_key(row)
                    .map_err(|_| EditError::NoKey { track, row })?;
                Ok(vec![TrackDelta::KeyDeleted { track, row }])
            }
            Self::Delete {
                track,
                row,
                removed,
            } => {
                let (track, row) = (*track, *row);
                let key = removed.ok_or(EditError::NoKey { track, row })?;
                let target = store.get_mut(track).ok_or(EditError::UnknownTrack(track))?;
                if target.is_key_at(row) {
                    return Err(EditError::KeyExists { track, row });
                }
                target.set_key(key);
                Ok(vec![TrackDelta::KeySet { track, key }])
            }
            Self::Edit { track, old, .. } => replace_key(store, *track, old.row, *old),
            Self::Multi(commands) => {
                let mut deltas = Vec::new();
                let len = commands.len();
                for i in (0..len).rev() {
                    match commands[i].undo(store) {
                        Ok(mut d) => deltas.append(&mut d),
                        Err(e) => {
                            rollback(&mut commands[i + 1..], store, Direction::Redo);
                            return Err(e);
                        }
                    }
                }
                Ok(deltas)
            }
        }
    }
}

fn replace_key(
    store: &mut TrackStore,
    track: usize,
    row: u32,
    key: KeyFrame,
) -> Result<Vec<TrackDelta>, EditError> {
    let target = store.get_mut(track).ok_or(EditError::UnknownTrack(track))?;
    if !target.is_key_at(row) {
        return Err(EditError::NoKey { track, row });
    }
    target.set_key(key);
    Ok(vec![TrackDelta::KeySet { track, key }])
}

enum Direction {
    Undo,
    Redo,
}

/// Put back sub-commands that already ran before a later one failed.
fn rollback(done: &mut [EditCommand], store: &mut TrackStore, direction: Direction) {
    let result = match direction {
        Direction::Undo => done.iter_mut().rev().try_for_each(|cmd| cmd.undo(store).map(drop)),
        Direction::Redo => done.iter_mut().try_for_each(|cmd| cmd.exec(store).map(drop)),
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "Failed to roll back partial edit");
    }
}
