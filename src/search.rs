//! Query execution across every loaded collection.
//!
//! Collections are published as one immutable snapshot; loading a new set
//! swaps the snapshot atomically, so a running query never observes a
//! partially loaded collection.

use crate::collection::Collection;
use crate::matching::{Match, Registry, SongId};
use crate::pattern::{compile_query, Query, QueryLimits, QueryParams, ValidationError};
use crate::ranker::{rank, RankOptions, Ranked};
use crate::song::Song;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

pub type Snapshot = Arc<Vec<Arc<Collection>>>;

/// Result of one query, with the snapshot its song ids refer to.
#[derive(Debug)]
pub struct SearchOutcome {
    pub ranked: Ranked,
    pub collections: Snapshot,
    /// Time spent compiling the query and running the algorithm's `init` hook.
    pub init_time: Duration,
    pub search_time: Duration,
    /// The deadline fired and some songs were not scanned.
    pub timed_out: bool,
}

impl SearchOutcome {
    pub fn song(&self, id: SongId) -> Option<&Song> {
        self.collections.get(id.collection)?.get(id.song)
    }
}

pub struct Engine {
    collections: RwLock<Snapshot>,
    registry: Registry,
    limits: QueryLimits,
    pool: rayon::ThreadPool,
    timeout: Option<Duration>,
}

impl Engine {
    /// `timeout` of `None` or zero disables the per-query deadline.
    pub fn new(
        registry: Registry,
        limits: QueryLimits,
        workers: usize,
        timeout: Option<Duration>,
    ) -> Result<Self, SearchError> {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
        Ok(Self {
            collections: RwLock::new(Arc::new(Vec::new())),
            registry,
            limits,
            pool,
            timeout: timeout.filter(|t| !t.is_zero()),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Publish a new set of collections, replacing the current one.
    pub fn replace_collections(&self, collections: Vec<Collection>) {
        let snapshot: Snapshot = Arc::new(collections.into_iter().map(Arc::new).collect());
        let songs: usize = snapshot.iter().map(|c| c.len()).sum();
        *self.collections.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
        log::info!("Published {} songs", songs);
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.collections.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// First song with the given MIDI URL, searching collections in order.
    pub fn find_by_url(&self, midi_url: &str) -> Option<(SongId, Snapshot)> {
        let snapshot = self.snapshot();
        let id = snapshot.iter().enumerate().find_map(|(ci, c)| {
            c.position_by_url(midi_url)
                .map(|song| SongId { collection: ci, song })
        })?;
        Some((id, snapshot))
    }

    pub fn search(&self, params: &QueryParams) -> Result<SearchOutcome, SearchError> {
        let start = Instant::now();
        let query = compile_query(params, &self.limits)?;
        let collections = self.snapshot();

        let candidates: Vec<(SongId, &Song)> = collections
            .iter()
            .enumerate()
            .flat_map(|(ci, c)| {
                c.songs()
                    .iter()
                    .enumerate()
                    .map(move |(si, song)| (SongId { collection: ci, song: si }, song))
            })
            .filter(|(_, song)| passes_filter(&query, song))
            .collect();

        let options = RankOptions {
            song_once: query.song_once,
            sort: query.sort,
            limit: query.limit,
        };

        if query.pattern.is_empty() {
            // text-only query: list the songs passing the filter
            let matches = candidates
                .iter()
                .map(|(id, song)| Match::whole_song(*id, song.num_chords()))
                .collect();
            let init_time = start.elapsed();
            return Ok(SearchOutcome {
                ranked: rank(matches, &options),
                collections: Arc::clone(&collections),
                init_time,
                search_time: Duration::ZERO,
                timed_out: false,
            });
        }

        let Some(prepared) = self
            .registry
            .prepare(&query.algorithm, &query.pattern, query.errors, query.gap)
        else {
            return Ok(SearchOutcome {
                ranked: Ranked::default(),
                collections: Arc::clone(&collections),
                init_time: start.elapsed(),
                search_time: Duration::ZERO,
                timed_out: false,
            });
        };
        let init_time = start.elapsed();

        let scan_start = Instant::now();
        let deadline = self.timeout.map(|t| scan_start + t);
        let expired = AtomicBool::new(false);

        // per-song lists, collected in scan order so same-song matches stay contiguous
        let per_song: Vec<Vec<Match>> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|(id, song)| {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        expired.store(true, Ordering::Relaxed);
                        return Vec::new();
                    }
                    prepared.scan(*id, song)
                })
                .collect()
        });
        let matches = prepared.finish(per_song.into_iter().flatten().collect());
        let search_time = scan_start.elapsed();

        let timed_out = expired.load(Ordering::Relaxed);
        if timed_out {
            log::warn!(
                "Query deadline of {:?} expired; results are partial",
                self.timeout.unwrap_or_default()
            );
        }
        log::debug!(
            "{} over {} songs: {} matches (init {:?}, search {:?})",
            prepared.algorithm(),
            candidates.len(),
            matches.len(),
            init_time,
            search_time
        );

        Ok(SearchOutcome {
            ranked: rank(matches, &options),
            collections: Arc::clone(&collections),
            init_time,
            search_time,
            timed_out,
        })
    }
}

fn passes_filter(query: &Query, song: &Song) -> bool {
    match &query.text_filter {
        Some(filter) => filter.matches(song.meta.searchable_fields()),
        None => true,
    }
}
