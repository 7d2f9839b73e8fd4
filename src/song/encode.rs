use super::{
    pack_chord, pack_sentinel, packed_chords, Note, NoteEvent, EMPTY_SYMBOL, MAX_PITCH,
    SENTINEL_ONSET,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest note count a packed chord header can carry.
pub const MAX_CHORD_NOTES: usize = u8::MAX as usize;

/// Pattern sizes covered by the prime table.
pub const PRIME_TABLE_SIZES: std::ops::RangeInclusive<u64> = 2..=32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("chord at onset {onset} has {notes} notes (maximum {MAX_CHORD_NOTES})")]
    ChordTooLarge { onset: u32, notes: usize },
    #[error("note at onset {onset} lasts {duration} ticks (maximum 65535)")]
    DurationOverflow { onset: u32, duration: u32 },
    #[error("note at onset {onset} has pitch {pitch} (maximum 127)")]
    PitchOutOfRange { onset: u32, pitch: u8 },
    #[error("note onset {0} collides with the terminator chord")]
    OnsetOverflow(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    /// Precompute hash table sizes for every pattern size.
    pub prime_table: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { prime_table: true }
    }
}

/// Note counts of an encoded song, with and without same-pitch duplicates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongStats {
    pub num_notes: usize,
    pub num_notes_with_duplicates: usize,
    pub maxpoly: usize,
    pub maxpoly_with_duplicates: usize,
}

/// Boundary of a merged pitch interval, tagged with the chord where the interval ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurningPoint {
    pub time: u32,
    pub pitch: u8,
    pub chord_index: u32,
}

/// Start and end points of merged pitch intervals, each sorted by (time, pitch).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurningPoints {
    pub starts: Vec<TurningPoint>,
    pub ends: Vec<TurningPoint>,
}

impl TurningPoints {
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

/// The representation consumed by matching algorithms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedSong {
    /// Packed chords, terminator chord included.
    pub chords: Vec<u8>,
    /// Number of real chords (terminator excluded).
    pub num_chords: usize,
    /// One projection per track, one symbol per chord.
    pub tracks: Vec<Vec<u8>>,
    /// Real (non-empty) symbols per track projection.
    pub track_lengths: Vec<usize>,
    pub turning_points: TurningPoints,
    pub stats: SongStats,
    /// Hash table sizes indexed by `pattern_size - 2`.
    pub primes: Option<Vec<u64>>,
}

impl EncodedSong {
    fn empty(num_tracks: usize) -> Self {
        let mut chords = Vec::new();
        pack_sentinel(&mut chords);
        Self {
            chords,
            num_chords: 0,
            tracks: vec![Vec::new(); num_tracks],
            track_lengths: vec![0; num_tracks],
            turning_points: TurningPoints::default(),
            stats: SongStats::default(),
            primes: None,
        }
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Deduplicated notes as events, terminator excluded.
    pub fn events(&self) -> Vec<NoteEvent> {
        packed_chords(&self.chords)
            .take(self.num_chords)
            .flat_map(|c| {
                let onset = c.onset;
                c.notes()
                    .map(move |n| NoteEvent::new(onset, n.pitch, n.duration as u32, n.track))
            })
            .collect()
    }

    /// Prime for a given pattern size, if the table was built.
    pub fn prime_for(&self, pattern_size: usize) -> Option<u64> {
        self.primes.as_ref()?.get(pattern_size.checked_sub(2)?).copied()
    }
}

#[derive(Clone, Copy)]
struct OpenInterval {
    start: u32,
    end: u32,
    end_chord: u32,
}

/// Encode raw note events into packed chords, track projections and turning points.
///
/// Within a chord every distinct pitch is kept once (the last event of that
/// pitch in input order supplies duration and track). Each track projection
/// receives only the highest pitch the track plays in the chord.
pub fn encode(
    events: &[NoteEvent],
    num_tracks: usize,
    options: &EncodeOptions,
) -> Result<EncodedSong, EncodeError> {
    if events.is_empty() {
        return Ok(EncodedSong::empty(num_tracks));
    }

    let mut notes = events.to_vec();
    // must stay stable: equal (onset, pitch) events keep input order, and the
    // reversed walk below lets the last of them win
    notes.sort_by_key(|e| (e.onset, e.pitch));

    let num_tracks = notes
        .iter()
        .map(|e| e.track as usize + 1)
        .max()
        .unwrap_or(0)
        .max(num_tracks);

    let mut chords = Vec::with_capacity(notes.len() * 5);
    let mut tracks: Vec<Vec<u8>> = vec![Vec::new(); num_tracks];
    let mut stats = SongStats::default();
    let mut chord_of: Vec<u32> = Vec::with_capacity(notes.len());
    let mut num_chords = 0usize;

    let mut seen = vec![false; num_tracks];
    let mut kept: Vec<Note> = Vec::new();

    for group in notes.chunk_by(|a, b| a.onset == b.onset) {
        let onset = group[0].onset;
        if onset == SENTINEL_ONSET {
            return Err(EncodeError::OnsetOverflow(onset));
        }
        if group.len() > MAX_CHORD_NOTES {
            return Err(EncodeError::ChordTooLarge {
                onset,
                notes: group.len(),
            });
        }

        stats.num_notes_with_duplicates += group.len();
        stats.maxpoly_with_duplicates = stats.maxpoly_with_duplicates.max(group.len());

        seen.fill(false);
        kept.clear();
        let mut prev_pitch = None;

        // highest pitch first; among duplicates the latest input event first
        for e in group.iter().rev() {
            if e.pitch > MAX_PITCH {
                return Err(EncodeError::PitchOutOfRange {
                    onset,
                    pitch: e.pitch,
                });
            }
            let duration = u16::try_from(e.duration).map_err(|_| EncodeError::DurationOverflow {
                onset,
                duration: e.duration,
            })?;

            let track = e.track as usize;
            if !seen[track] {
                tracks[track].push(e.pitch);
                seen[track] = true;
            }

            if prev_pitch != Some(e.pitch) {
                kept.push(Note {
                    pitch: e.pitch,
                    duration,
                    track: e.track,
                });
                prev_pitch = Some(e.pitch);
            }
        }
        kept.reverse();

        for (track, played) in seen.iter().enumerate() {
            if !played {
                tracks[track].push(EMPTY_SYMBOL);
            }
        }

        stats.num_notes += kept.len();
        stats.maxpoly = stats.maxpoly.max(kept.len());
        pack_chord(&mut chords, onset, &kept);

        chord_of.extend(std::iter::repeat_n(num_chords as u32, group.len()));
        num_chords += 1;
    }

    pack_sentinel(&mut chords);

    let track_lengths = tracks
        .iter()
        .map(|t| t.iter().filter(|&&s| s != EMPTY_SYMBOL).count())
        .collect();
    let turning_points = turning_points(&notes, &chord_of);
    let primes = options.prime_table.then(|| prime_table(stats.num_notes));

    log::trace!(
        "Encoded {} chords, {} notes ({} with duplicates), {} turning points",
        num_chords,
        stats.num_notes,
        stats.num_notes_with_duplicates,
        turning_points.len()
    );

    Ok(EncodedSong {
        chords,
        num_chords,
        tracks,
        track_lengths,
        turning_points,
        stats,
        primes,
    })
}

/// Merge overlapping same-pitch notes into intervals and emit their boundaries.
///
/// `notes` must be sorted by (onset, pitch); `chord_of[i]` is the chord index of `notes[i]`.
fn turning_points(notes: &[NoteEvent], chord_of: &[u32]) -> TurningPoints {
    let mut open: [Option<OpenInterval>; 128] = [None; 128];
    let mut points = TurningPoints::default();

    for (e, &chord) in notes.iter().zip(chord_of) {
        let end = e.onset.saturating_add(e.duration);
        let lane = &mut open[e.pitch as usize];

        let overlaps = matches!(lane, Some(iv) if e.onset <= iv.end);
        if overlaps {
            if let Some(iv) = lane.as_mut() {
                if end > iv.end {
                    iv.end = end;
                    iv.end_chord = chord;
                }
            }
        } else if let Some(closed) = lane.replace(OpenInterval {
            start: e.onset,
            end,
            end_chord: chord,
        }) {
            emit(&mut points, e.pitch, closed);
        }
    }

    for (pitch, lane) in open.iter().enumerate() {
        if let Some(iv) = lane {
            emit(&mut points, pitch as u8, *iv);
        }
    }

    points.starts.sort_by_key(|p| (p.time, p.pitch));
    points.ends.sort_by_key(|p| (p.time, p.pitch));
    points
}

fn emit(points: &mut TurningPoints, pitch: u8, iv: OpenInterval) {
    points.starts.push(TurningPoint {
        time: iv.start,
        pitch,
        chord_index: iv.end_chord,
    });
    points.ends.push(TurningPoint {
        time: iv.end,
        pitch,
        chord_index: iv.end_chord,
    });
}

fn prime_table(num_notes: usize) -> Vec<u64> {
    PRIME_TABLE_SIZES
        .map(|size| next_prime(size * num_notes as u64 * 2 + 1))
        .collect()
}

/// Smallest prime strictly greater than `n`.
pub fn next_prime(n: u64) -> u64 {
    if n < 2 {
        return 2;
    }
    let mut candidate = n + 1;
    if candidate % 2 == 0 {
        candidate += 1;
    }
    while !is_prime(candidate) {
        candidate += 2;
    }
    candidate
}

fn is_prime(x: u64) -> bool {
    if x < 2 {
        return false;
    }
    if x % 2 == 0 {
        return x == 2;
    }
    if x % 3 == 0 {
        return x == 3;
    }
    let mut d = 5u64;
    while d * d <= x {
        if x % d == 0 || x % (d + 2) == 0 {
            return false;
        }
        d += 6;
    }
    true
}
