//! In-memory song collections with lazily computed aggregate statistics.

use crate::song::Song;
use serde::Serialize;
use std::sync::OnceLock;

/// A value computed on first read and dropped on invalidation.
#[derive(Debug, Default)]
pub struct Cached<T> {
    cell: OnceLock<T>,
}

impl<T> Cached<T> {
    pub fn new() -> Self {
        Self { cell: OnceLock::new() }
    }

    pub fn get_or_compute(&self, compute: impl FnOnce() -> T) -> &T {
        self.cell.get_or_init(compute)
    }

    pub fn is_cached(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn invalidate(&mut self) {
        self.cell.take();
    }
}

impl<T: Clone> Clone for Cached<T> {
    fn clone(&self) -> Self {
        let cell = OnceLock::new();
        if let Some(v) = self.cell.get() {
            let _ = cell.set(v.clone());
        }
        Self { cell }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CollectionStats {
    pub songs: usize,
    pub chords: usize,
    pub notes: usize,
    pub notes_with_duplicates: usize,
    pub maxpoly: usize,
    pub maxpoly_with_duplicates: usize,
    /// Longest per-track projection, counting real symbols only.
    pub max_track_length: usize,
}

impl CollectionStats {
    /// Average notes per chord, without and with duplicates.
    pub fn avgpoly(&self) -> (f64, f64) {
        if self.chords == 0 {
            return (0.0, 0.0);
        }
        let chords = self.chords as f64;
        (
            self.notes as f64 / chords,
            self.notes_with_duplicates as f64 / chords,
        )
    }

    fn compute(songs: &[Song]) -> Self {
        songs.iter().fold(
            Self {
                songs: songs.len(),
                ..Default::default()
            },
            |mut acc, song| {
                let stats = &song.encoded.stats;
                acc.chords += song.num_chords();
                acc.notes += stats.num_notes;
                acc.notes_with_duplicates += stats.num_notes_with_duplicates;
                acc.maxpoly = acc.maxpoly.max(stats.maxpoly);
                acc.maxpoly_with_duplicates = acc.maxpoly_with_duplicates.max(stats.maxpoly_with_duplicates);
                let longest = song.encoded.track_lengths.iter().copied().max().unwrap_or(0);
                acc.max_track_length = acc.max_track_length.max(longest);
                acc
            },
        )
    }
}

/// An ordered list of songs. Read-only once published to the search engine.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub name: String,
    songs: Vec<Song>,
    stats: Cached<CollectionStats>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            songs: Vec::new(),
            stats: Cached::new(),
        }
    }

    pub fn with_songs(name: impl Into<String>, songs: Vec<Song>) -> Self {
        Self {
            name: name.into(),
            songs,
            stats: Cached::new(),
        }
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Song> {
        self.songs.get(index)
    }

    pub fn push(&mut self, song: Song) {
        self.songs.push(song);
        self.stats.invalidate();
    }

    pub fn extend(&mut self, songs: impl IntoIterator<Item = Song>) {
        self.songs.extend(songs);
        self.stats.invalidate();
    }

    /// Remove every song whose source file is `filepath`; returns how many went.
    pub fn remove_file(&mut self, filepath: &str) -> usize {
        let before = self.songs.len();
        self.songs.retain(|s| s.meta.filepath != filepath);
        let removed = before - self.songs.len();
        if removed > 0 {
            self.stats.invalidate();
        }
        removed
    }

    pub fn into_songs(self) -> Vec<Song> {
        self.songs
    }

    pub fn stats(&self) -> &CollectionStats {
        self.stats.get_or_compute(|| CollectionStats::compute(&self.songs))
    }

    pub fn position_by_url(&self, midi_url: &str) -> Option<usize> {
        self.songs.iter().position(|s| s.meta.midi_url == midi_url)
    }

    pub fn position_by_path(&self, filepath: &str) -> Option<usize> {
        self.songs.iter().position(|s| s.meta.filepath == filepath)
    }
}
