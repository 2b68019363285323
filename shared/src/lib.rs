//! Shared track types for synctrack.
//!
//! Used identically by the editor (protocol server) and by players
//! (protocol clients):
//!
//! - [`KeyFrame`] / [`Interpolation`] - control points and blend kernels
//! - [`Track`] - sparse row-sorted keys with [`Track::value_at`]
//! - [`TrackStore`] - named tracks with permanent creation-order indices
//! - [`track_file`] - per-track binary dumps

pub mod key;
pub mod store;
pub mod track;
pub mod track_file;

pub use key::{Interpolation, KeyFrame};
pub use store::TrackStore;
pub use track::{Track, TrackError};
pub use track_file::TrackFileError;
