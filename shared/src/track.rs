//! Named tracks of sparse, row-sorted key frames.
//!
//! A [`Track`] is a function from timeline position to value. Keys live in a
//! `Vec` kept sorted by row, so every lookup is a binary search.
//!
//! ```text
//!   value
//!     ^          k1 *-------------  (held after the last key)
//!     |          /
//!     |        /   Linear
//!     *-------k0
//!     +----------------------------> row
//! ```

use thiserror::Error;

use crate::key::KeyFrame;

/// Errors from key-level track mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("no key at row {row}")]
    NoKeyAt { row: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    name: String,
    keys: Vec<KeyFrame>,
}

impl Track {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keys in ascending row order.
    pub fn keys(&self) -> &[KeyFrame] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Binary search for `row`.
    ///
    /// `Ok(index)` when `row` holds a key, otherwise `Err(insertion_point)`.
    pub fn find_key(&self, row: u32) -> Result<usize, usize> {
        self.keys.binary_search_by_key(&row, |key| key.row)
    }

    /// Insert `key`, replacing any key already at its row.
    ///
    /// Returns the replaced key, if there was one.
    pub fn set_key(&mut self, key: KeyFrame) -> Option<KeyFrame> {
        match self.find_key(key.row) {
            Ok(index) => Some(std::mem::replace(&mut self.keys[index], key)),
            Err(index) => {
                self.keys.insert(index, key);
                None
            }
        }
    }

    /// Remove the key at `row`. The track is untouched when there is none.
    pub fn delete_key(&mut self, row: u32) -> Result<KeyFrame, TrackError> {
        match self.find_key(row) {
            Ok(index) => Ok(self.keys.remove(index)),
            Err(_) => Err(TrackError::NoKeyAt { row }),
        }
    }

    pub fn is_key_at(&self, row: u32) -> bool {
        self.find_key(row).is_ok()
    }

    pub fn key_at(&self, row: u32) -> Option<&KeyFrame> {
        self.find_key(row).ok().map(|index| &self.keys[index])
    }

    /// Greatest key with `key.row <= row`.
    pub fn prev_key(&self, row: u32) -> Option<&KeyFrame> {
        match self.find_key(row) {
            Ok(index) => Some(&self.keys[index]),
            Err(0) => None,
            Err(index) => Some(&self.keys[index - 1]),
        }
    }

    /// Smallest key with `key.row >= row`.
    pub fn next_key(&self, row: u32) -> Option<&KeyFrame> {
        let index = self.find_key(row).unwrap_or_else(|insert| insert);
        self.keys.get(index)
    }

    /// Drop every key, keeping the track itself.
    pub fn clear_keys(&mut self) {
        self.keys.clear();
    }

    /// Evaluate the track at a (possibly fractional) timeline position.
    ///
    /// An empty track is 0.0 everywhere. Positions before the first key take
    /// the first value, positions at or after the last key take the last.
    pub fn value_at(&self, position: f64) -> f64 {
        let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) else {
            return 0.0;
        };

        let floor = position.floor();
        if position.is_nan() || floor < f64::from(first.row) {
            return f64::from(first.value);
        }
        if floor >= f64::from(last.row) {
            return f64::from(last.value);
        }

        // first.row <= floor < last.row, so this lands on a real segment
        let index = match self.find_key(floor as u32) {
            Ok(index) => index,
            Err(insert) => insert - 1,
        };
        let k0 = &self.keys[index];
        let k1 = &self.keys[index + 1];

        let t = (position - f64::from(k0.row)) / (f64::from(k1.row) - f64::from(k0.row));
        let v0 = f64::from(k0.value);
        let v1 = f64::from(k1.value);
        v0 + (v1 - v0) * k0.interpolation.weight(t)
    }
}
