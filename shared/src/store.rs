//! Named collection of tracks with permanent creation-order indices.
//!
//! The index handed out by [`TrackStore::get_or_create`] is the track id used
//! on the wire. Remote peers cache it, so indices are never reused or
//! reordered for the lifetime of a store.

use std::collections::HashMap;

use crate::track::Track;

#[derive(Debug, Clone, Default)]
pub struct TrackStore {
    /// Tracks in creation order
    tracks: Vec<Track>,
    /// Name -> index into `tracks`
    by_name: HashMap<String, usize>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the track called `name`, creating an empty one if needed.
    pub fn get_or_create(&mut self, name: &str) -> usize {
        if let Some(&index) = self.by_name.get(name) {
            return index;
        }

        let index = self.tracks.len();
        self.tracks.push(Track::new(name));
        self.by_name.insert(name.to_string(), index);
        tracing::trace!(index, name, "Created track");
        index
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&Track> {
        self.find(name).and_then(|index| self.get(index))
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Tracks in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.iter_mut()
    }

    /// `(index, track)` pairs in creation order.
    pub fn enumerate(&self) -> impl Iterator<Item = (usize, &Track)> {
        self.tracks.iter().enumerate()
    }
}
