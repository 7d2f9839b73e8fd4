//! Exact, transposition-invariant point-set matching.
//!
//! Every pattern note is a point (onset, pitch). A match is a translation in
//! time and pitch that maps all pattern points onto song notes. Durations are
//! ignored.

use super::{AlgorithmEntry, Hit, MatchParams, PatternState};
use crate::pattern::Pattern;
use crate::song::{Song, PATTERN_RESOLUTION};
use std::collections::HashMap;

pub fn entry() -> AlgorithmEntry {
    AlgorithmEntry {
        scan,
        init: None,
        post_scan: None,
    }
}

/// Pattern onset rescaled to the song's resolution.
fn rescale(onset: u32, ticks_per_quarter: u16) -> i64 {
    onset as i64 * ticks_per_quarter as i64 / PATTERN_RESOLUTION as i64
}

fn scan(song: &Song, pattern: &Pattern, _: &MatchParams, _: Option<&PatternState>) -> Vec<Hit> {
    let points = pattern.points();
    let Some(anchor) = points.first() else {
        return Vec::new();
    };
    if pattern.len() > song.num_chords() {
        return Vec::new();
    }

    let tpq = song.ticks_per_quarter;
    // (dt, dp) of every pattern point relative to the anchor
    let offsets: Vec<(i64, i32)> = points
        .iter()
        .map(|p| {
            (
                rescale(p.onset, tpq) - rescale(anchor.onset, tpq),
                p.pitch as i32 - anchor.pitch as i32,
            )
        })
        .collect();

    // (onset, pitch) -> (chord index, byte offset)
    let mut index: HashMap<(i64, i32), (usize, usize)> = HashMap::with_capacity(song.encoded.stats.num_notes);
    for (ci, chord) in song.chords().take(song.num_chords()).enumerate() {
        for (ni, pitch) in chord.pitches().enumerate() {
            index.insert((chord.onset as i64, pitch as i32), (ci, chord.note_offset(ni)));
        }
    }

    let mut hits = Vec::new();
    for (ci, chord) in song.chords().take(song.num_chords()).enumerate() {
        for pitch in chord.pitches() {
            let (onset, pitch) = (chord.onset as i64, pitch as i32);
            let found: Option<Vec<(usize, usize)>> = offsets
                .iter()
                .map(|&(dt, dp)| index.get(&(onset + dt, pitch + dp)).copied())
                .collect();
            let Some(found) = found else {
                continue;
            };
            hits.push(Hit {
                first_chord: ci,
                last_chord: found.iter().map(|&(c, _)| c).max().unwrap_or(ci),
                matched_notes: found.iter().map(|&(_, offset)| offset).collect(),
                transposition: pitch - anchor.pitch as i32,
                cost: 0,
                secondary: None,
            });
        }
    }
    hits
}
