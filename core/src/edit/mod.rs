//! Reversible editing of the authoritative track store.
//!
//! ```text
//!   execute(cmd) ──▶ cmd.exec ──▶ undo stack ──▶ deltas ──▶ sessions
//!   undo()       ──▶ cmd.undo ──▶ redo stack ──▶ deltas ──▶ sessions
//!   redo()       ──▶ cmd.exec ──▶ undo stack ──▶ deltas ──▶ sessions
//! ```

mod command;
mod document;


pub use command::{EditCommand, EditError, TrackDelta};
pub use document::{DEFAULT_ROWS, SyncDocument};
