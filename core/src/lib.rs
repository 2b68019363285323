//! Synctrack Core - editor/player synchronization
//!
//! This crate keeps externally authored tracks in sync between one editor
//! and any number of players.
//!
//! # Architecture
//!
//! - [`SyncDocument`] - authoritative tracks plus undo/redo history
//! - [`SyncServer`] - editor side: accepts players and mirrors edits
//! - [`SyncClient`] - player side: requests tracks, follows the editor clock
//! - [`SyncConfig`] - TOML settings shared by the `synctrack` tool

pub mod config;
pub mod edit;
pub mod error;
pub mod net;

pub use config::{ConfigError, SyncConfig};
pub use edit::{EditCommand, EditError, SyncDocument, TrackDelta};
pub use error::{HandshakeError, ProtocolError, SyncError, TransportError};
pub use net::{
    ServerEvent, SyncClient, SyncCommand, SyncServer, SyncTimer, Transport, TransportKind,
    WireDialect,
};

// Re-export shared track types for convenience
pub use synctrack_shared::{Interpolation, KeyFrame, Track, TrackStore};
