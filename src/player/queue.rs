use std::collections::VecDeque;

use rand::seq::SliceRandom;

use crate::{
    common::errors::{Result, RiffyError},
    protocol::Track,
};

/// Upcoming tracks, head first.
#[derive(Debug, Clone, Default)]
pub struct Queue {
    tracks: VecDeque<Track>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    pub fn add_many(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.tracks.extend(tracks);
    }

    pub fn push_front(&mut self, track: Track) {
        self.tracks.push_front(track);
    }

    pub fn pop_front(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    /// Removes and returns the track at `index`; the queue is untouched on error.
    pub fn remove(&mut self, index: usize) -> Result<Track> {
        let len = self.tracks.len();
        self.tracks
            .remove(index)
            .ok_or(RiffyError::QueueIndex { index, len })
    }

    pub fn shuffle(&mut self) {
        self.tracks.make_contiguous().shuffle(&mut rand::thread_rng());
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn first(&self) -> Option<&Track> {
        self.tracks.front()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn to_vec(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }
}
