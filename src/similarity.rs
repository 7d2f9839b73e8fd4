use crate::collection::Collection;
use crate::matching::SongId;
use crate::song::histogram::{interval_histogram, pitch_class_histogram, pitch_histogram};
use crate::song::Song;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::str::FromStr;

/// Which note histogram songs are compared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HistogramKind {
    /// 128 absolute pitches.
    Pitch,
    /// Pitches folded onto 12 pitch classes.
    PitchClass,
    /// 255 per-track pitch intervals.
    Interval,
}

impl FromStr for HistogramKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pitch" => Ok(Self::Pitch),
            "pitch-class" | "class" => Ok(Self::PitchClass),
            "interval" => Ok(Self::Interval),
            other => Err(format!("unknown histogram kind: {other} (pitch, pitch-class, interval)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Similarity {
    pub song: SongId,
    pub score: f64,
}

/// Histogram of `song` as a float vector.
pub fn histogram_vector(song: &Song, kind: HistogramKind) -> Vec<f64> {
    let to_f64 = |h: &[u32]| -> Vec<f64> { h.iter().map(|&c| c as f64).collect() };
    match kind {
        HistogramKind::Pitch => to_f64(&pitch_histogram(&song.encoded)),
        HistogramKind::PitchClass => to_f64(&pitch_class_histogram(&song.encoded)),
        HistogramKind::Interval => to_f64(&interval_histogram(&song.encoded)),
    }
}

/// Score `query` against every song of `collections`, best first.
///
/// `exclude` skips one song, normally the query itself.
pub fn similarities(
    query: &Song,
    collections: &[&Collection],
    kind: HistogramKind,
    exclude: Option<SongId>,
    jobs: usize,
) -> Result<Vec<Similarity>, rayon::ThreadPoolBuildError> {
    let target = histogram_vector(query, kind);

    let ids: Vec<SongId> = collections
        .iter()
        .enumerate()
        .flat_map(|(ci, c)| (0..c.len()).map(move |si| SongId { collection: ci, song: si }))
        .filter(|id| Some(*id) != exclude)
        .collect();

    let pb = ProgressBar::new(ids.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} songs ({eta} remaining)")
    {
        pb.set_style(style.progress_chars("=>-"));
    }

    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;

    let mut scores: Vec<Similarity> = pool.install(|| {
        ids.par_iter()
            .filter_map(|&id| {
                let song = collections[id.collection].get(id.song)?;
                let score = cosine_similarity(&target, &histogram_vector(song, kind));
                pb.inc(1);
                Some(Similarity { song: id, score })
            })
            .collect()
    });

    pb.finish_and_clear();

    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    log::debug!("Scored {} songs by {:?} histogram", scores.len(), kind);
    Ok(scores)
}

/// Cosine similarity between two vectors; zero when either is all zeros.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 { 0.0 } else { dot / denom }
}
