//! Algorithm registry and the adapter that runs a named algorithm over songs.
//!
//! Algorithms are plain function records: a required `scan`, an optional
//! per-query `init` that precomputes pattern state, and an optional
//! `post_scan` applied once to the merged matches of every collection.

pub mod monopoly;
pub mod p1;

use crate::pattern::Pattern;
use crate::song::Song;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Identifier routed to `monopoly` with checking mode enabled.
pub const POLYCHECK_ALIAS: &str = "polycheck";
pub const DEFAULT_ALGORITHM: &str = "monopoly";
pub const POINT_SET_ALGORITHM: &str = "geometric_p1";

/// Identifier lengths a query can address; other names fall back to the default.
pub const ALGORITHM_NAME_LEN: RangeInclusive<usize> = 3..=30;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("algorithm identifier must not be empty")]
    EmptyName,
    #[error("algorithm {0:?} is already registered")]
    Duplicate(String),
    #[error("{0:?} is reserved as an alias")]
    Reserved(String),
    #[error("algorithm identifier {0:?} must be 3 to 30 characters long")]
    NameLength(String),
}

/// Position of a song: collection index, then song index inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SongId {
    pub collection: usize,
    pub song: usize,
}

/// An occurrence reported by an algorithm for one song.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hit {
    pub first_chord: usize,
    pub last_chord: usize,
    /// Byte offsets of the matched notes in the song's packed chords.
    pub matched_notes: Vec<usize>,
    pub transposition: i32,
    pub cost: u32,
    pub secondary: Option<i64>,
}

/// A hit tagged with the song it was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub song: SongId,
    pub first_chord: usize,
    pub last_chord: usize,
    pub matched_notes: Vec<usize>,
    pub transposition: i32,
    pub cost: u32,
    pub secondary: Option<i64>,
}

impl Match {
    pub fn from_hit(song: SongId, hit: Hit) -> Self {
        Self {
            song,
            first_chord: hit.first_chord,
            last_chord: hit.last_chord,
            matched_notes: hit.matched_notes,
            transposition: hit.transposition,
            cost: hit.cost,
            secondary: hit.secondary,
        }
    }

    /// A match covering every chord of a song, used by text-only browsing.
    pub fn whole_song(song: SongId, num_chords: usize) -> Self {
        Self {
            song,
            first_chord: 0,
            last_chord: num_chords.saturating_sub(1),
            matched_notes: Vec::new(),
            transposition: 0,
            cost: 0,
            secondary: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchParams {
    /// Pattern notes that may go unmatched.
    pub errors: u32,
    /// Song chords that may be skipped between two matched pattern chords.
    pub gap: u32,
    /// Also verify whole pattern chords, not only the melody line.
    pub checking: bool,
}

/// Pattern-derived state produced by an `init` hook.
pub type PatternState = Box<dyn Any + Send + Sync>;

pub type ScanFn = fn(&Song, &Pattern, &MatchParams, Option<&PatternState>) -> Vec<Hit>;
pub type InitFn = fn(&Pattern, &MatchParams) -> PatternState;
pub type PostScanFn = fn(Vec<Match>) -> Vec<Match>;

#[derive(Clone, Copy)]
pub struct AlgorithmEntry {
    pub scan: ScanFn,
    pub init: Option<InitFn>,
    pub post_scan: Option<PostScanFn>,
}

/// Name to algorithm map, built once at startup.
#[derive(Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, AlgorithmEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the bundled algorithms.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for (name, entry) in [(POINT_SET_ALGORITHM, p1::entry()), (DEFAULT_ALGORITHM, monopoly::entry())] {
            if let Err(e) = registry.register(name, entry) {
                log::error!("Failed to register built-in algorithm {}: {}", name, e);
            }
        }
        registry
    }

    pub fn register(&mut self, name: &str, entry: AlgorithmEntry) -> Result<(), RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if !ALGORITHM_NAME_LEN.contains(&name.chars().count()) {
            return Err(RegistryError::NameLength(name.to_string()));
        }
        if name == POLYCHECK_ALIAS {
            return Err(RegistryError::Reserved(name.to_string()));
        }
        if self.entries.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    /// Registered identifiers, alias included when its target exists.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        if self.entries.contains_key(DEFAULT_ALGORITHM) {
            names.push(POLYCHECK_ALIAS);
            names.sort_unstable();
        }
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    fn resolve(&self, name: &str) -> Option<(&str, &AlgorithmEntry, bool)> {
        let (target, checking) = if name == POLYCHECK_ALIAS {
            (DEFAULT_ALGORITHM, true)
        } else {
            (name, false)
        };
        self.entries
            .get_key_value(target)
            .map(|(k, entry)| (k.as_str(), entry, checking))
    }

    /// Resolve `name` and run its `init` hook once for this query.
    ///
    /// Returns `None` for unknown identifiers; callers treat that as an
    /// empty result.
    pub fn prepare<'a>(
        &'a self,
        name: &str,
        pattern: &'a Pattern,
        errors: u32,
        gap: u32,
    ) -> Option<PreparedQuery<'a>> {
        let Some((resolved, entry, checking)) = self.resolve(name) else {
            log::debug!("Unknown algorithm {:?}; returning no matches", name);
            return None;
        };
        let params = MatchParams { errors, gap, checking };
        let state = entry.init.map(|init| init(pattern, &params));
        Some(PreparedQuery {
            name: resolved,
            entry,
            pattern,
            params,
            state,
        })
    }
}

/// An algorithm bound to one compiled pattern.
pub struct PreparedQuery<'a> {
    name: &'a str,
    entry: &'a AlgorithmEntry,
    pattern: &'a Pattern,
    params: MatchParams,
    state: Option<PatternState>,
}

impl PreparedQuery<'_> {
    pub fn algorithm(&self) -> &str {
        self.name
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    pub fn scan(&self, id: SongId, song: &Song) -> Vec<Match> {
        (self.entry.scan)(song, self.pattern, &self.params, self.state.as_ref())
            .into_iter()
            .map(|hit| Match::from_hit(id, hit))
            .collect()
    }

    /// Apply the `post_scan` hook, if any, to the merged matches.
    pub fn finish(&self, matches: Vec<Match>) -> Vec<Match> {
        match self.entry.post_scan {
            Some(post_scan) => post_scan(matches),
            None => matches,
        }
    }
}
