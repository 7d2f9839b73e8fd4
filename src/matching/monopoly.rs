//! Transposition-invariant melody matching over polyphonic songs.
//!
//! The pattern melody is the lowest note of each pattern chord. Any note of a
//! song chord may start an occurrence; each following melody interval must be
//! found, starting from the previously matched pitch, in one of the next
//! `gap + 1` song chords. A melody note that cannot be found costs one error
//! and consumes one song chord. In checking mode every matched song chord
//! must also contain the whole transposed pattern chord.

use super::{AlgorithmEntry, Hit, MatchParams, PatternState};
use crate::pattern::Pattern;
use crate::song::{PackedChord, Song};

pub fn entry() -> AlgorithmEntry {
    AlgorithmEntry {
        scan,
        init: Some(init),
        post_scan: None,
    }
}

/// Per-query state derived from the pattern.
#[derive(Debug, Clone)]
pub struct MonopolyState {
    /// Lowest pitch of the first pattern chord.
    base: i32,
    /// Melody intervals between consecutive pattern chords.
    intervals: Vec<i32>,
    /// Every pattern chord as pitch offsets from `base`.
    chords: Vec<Vec<i32>>,
}

impl MonopolyState {
    pub fn new(pattern: &Pattern) -> Self {
        let base = pattern.pitch_string.first().copied().unwrap_or(0) as i32;
        let intervals = pattern
            .pitch_string
            .windows(2)
            .map(|w| w[1] as i32 - w[0] as i32)
            .collect();
        let chords = pattern
            .chords
            .iter()
            .map(|c| c.notes.iter().map(|n| n.pitch as i32 - base).collect())
            .collect();
        Self { base, intervals, chords }
    }

    fn len(&self) -> usize {
        self.chords.len()
    }
}

fn init(pattern: &Pattern, _: &MatchParams) -> PatternState {
    Box::new(MonopolyState::new(pattern))
}

fn scan(song: &Song, pattern: &Pattern, params: &MatchParams, state: Option<&PatternState>) -> Vec<Hit> {
    let owned;
    let state = match state.and_then(|s| s.downcast_ref::<MonopolyState>()) {
        Some(s) => s,
        None => {
            owned = MonopolyState::new(pattern);
            &owned
        }
    };
    if state.len() == 0 {
        return Vec::new();
    }
    // every matched chord consumes one song chord, so the song must be at
    // least as long as the part of the pattern that has to match
    let needed = state.len().saturating_sub(params.errors as usize).max(1);
    if song.num_chords() < needed {
        return Vec::new();
    }

    let chords: Vec<PackedChord<'_>> = song.chords().take(song.num_chords()).collect();
    let mut hits = Vec::new();
    for start in 0..chords.len() {
        for (ni, pitch) in chords[start].pitches().enumerate() {
            if let Some(hit) = extend(&chords, start, ni, pitch as i32, state, params) {
                hits.push(hit);
            }
        }
    }
    hits
}

/// Follow the pattern melody from note `ni` of chord `start`.
fn extend(
    chords: &[PackedChord<'_>],
    start: usize,
    ni: usize,
    pitch: i32,
    state: &MonopolyState,
    params: &MatchParams,
) -> Option<Hit> {
    let transposition = pitch - state.base;
    if params.checking && !contains_transposed(&chords[start], &state.chords[0], state.base + transposition) {
        return None;
    }

    let mut matched = vec![chords[start].note_offset(ni)];
    let mut current = start;
    let mut expected = pitch;
    let mut errors = 0u32;
    let mut skipped = 0i64;

    for (j, interval) in state.intervals.iter().enumerate() {
        expected += interval;
        let window_end = (current + 1 + params.gap as usize).min(chords.len().saturating_sub(1));
        let found = (current + 1..=window_end).find_map(|k| {
            let ni = chords[k].pitches().position(|p| p as i32 == expected)?;
            let whole = !params.checking
                || contains_transposed(&chords[k], &state.chords[j + 1], state.base + transposition);
            whole.then_some((k, ni))
        });

        match found {
            Some((k, ni)) => {
                skipped += (k - current - 1) as i64;
                matched.push(chords[k].note_offset(ni));
                current = k;
            }
            None => {
                errors += 1;
                if errors > params.errors || current + 1 >= chords.len() {
                    return None;
                }
                current += 1;
            }
        }
    }

    Some(Hit {
        first_chord: start,
        last_chord: current,
        matched_notes: matched,
        transposition,
        cost: errors,
        secondary: Some(skipped),
    })
}

/// Does `chord` hold every offset of `pattern_chord` shifted by `origin`?
fn contains_transposed(chord: &PackedChord<'_>, pattern_chord: &[i32], origin: i32) -> bool {
    pattern_chord
        .iter()
        .all(|offset| chord.pitches().any(|p| p as i32 == origin + offset))
}
