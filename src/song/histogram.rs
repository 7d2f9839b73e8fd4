//! Note statistics over an encoded song: pitch, pitch class, interval and
//! duration histograms.

use super::{packed_chords, EncodedSong, EMPTY_SYMBOL};

pub const PITCH_BINS: usize = 128;
pub const PITCH_CLASS_BINS: usize = 12;

/// Intervals range over -127..=127.
pub const INTERVAL_BINS: usize = 255;
pub const INTERVAL_OFFSET: i32 = 127;

pub const DURATION_CLASSES: usize = 11;

/// Labels for `duration_histogram` bins.
pub const DURATION_CLASS_NAMES: [&str; DURATION_CLASSES] = [
    "Unknown",
    "Longer than full note",
    "Full note or shorter",
    "Half note or shorter",
    "Quarter note or shorter",
    "8th note or shorter",
    "16th note or shorter",
    "32th note or shorter",
    "64th note or shorter",
    "128th note or shorter",
    "256th note or shorter",
];

pub const PITCH_CLASS_NAMES: [&str; PITCH_CLASS_BINS] =
    ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

fn real_pitches(song: &EncodedSong) -> impl Iterator<Item = u8> + '_ {
    packed_chords(&song.chords)
        .take(song.num_chords)
        .flat_map(|c| c.pitches())
}

/// Counts of absolute pitches over deduplicated notes.
pub fn pitch_histogram(song: &EncodedSong) -> [u32; PITCH_BINS] {
    let mut h = [0u32; PITCH_BINS];
    for p in real_pitches(song) {
        h[p as usize] += 1;
    }
    h
}

/// Pitch histogram folded onto the 12 pitch classes.
pub fn pitch_class_histogram(song: &EncodedSong) -> [u32; PITCH_CLASS_BINS] {
    fold_pitch_classes(&pitch_histogram(song))
}

pub fn fold_pitch_classes(h: &[u32; PITCH_BINS]) -> [u32; PITCH_CLASS_BINS] {
    let mut classes = [0u32; PITCH_CLASS_BINS];
    for (pitch, count) in h.iter().enumerate() {
        classes[pitch % PITCH_CLASS_BINS] += count;
    }
    classes
}

/// Pitch classes reordered along the circle of fifths
/// (Tzanetakis, Ermolinskyi & Cook, ISMIR 2002).
pub fn folded_pitch_histogram(song: &EncodedSong) -> [u32; PITCH_CLASS_BINS] {
    let mut h = [0u32; PITCH_CLASS_BINS];
    for p in real_pitches(song) {
        h[(7 * (p as usize % 12)) % 12] += 1;
    }
    h
}

/// Interval histogram built per track from consecutive real notes.
///
/// Empty symbols are skipped, so an interval links the last note before a
/// silence with the first note after it. Bin `i` counts interval `i - 127`.
pub fn interval_histogram(song: &EncodedSong) -> [u32; INTERVAL_BINS] {
    let mut h = [0u32; INTERVAL_BINS];
    for track in &song.tracks {
        let mut prev: Option<u8> = None;
        for &symbol in track.iter().filter(|&&s| s != EMPTY_SYMBOL) {
            if let Some(p) = prev {
                h[(INTERVAL_OFFSET + symbol as i32 - p as i32) as usize] += 1;
            }
            prev = Some(symbol);
        }
    }
    h
}

/// Counts of notes per duration class, relative to the song's whole note.
///
/// Class 1 is "longer than a whole note", class k (2..=10) holds durations in
/// `(whole / 2^(k-1), whole / 2^(k-2)]`, class 0 everything shorter.
pub fn duration_histogram(song: &EncodedSong, ticks_per_quarter: u16) -> [u32; DURATION_CLASSES] {
    let mut h = [0u32; DURATION_CLASSES];
    let whole = 4.0 * ticks_per_quarter as f64;

    for chord in packed_chords(&song.chords).take(song.num_chords) {
        for note in chord.notes() {
            let dur = note.duration as f64;
            let mut threshold = whole;
            let class = (1..DURATION_CLASSES)
                .find(|_| {
                    let hit = dur > threshold;
                    threshold /= 2.0;
                    hit
                })
                .unwrap_or(0);
            h[class] += 1;
        }
    }
    h
}
