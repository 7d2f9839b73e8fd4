pub mod encode;
pub mod histogram;

pub use encode::{encode, EncodeError, EncodeOptions, EncodedSong, SongStats, TurningPoint, TurningPoints};

use crate::midi::decode::{KeySignature, TimeSignature};
use serde::{Deserialize, Serialize};

/// Chord header: 1-byte note count followed by a 4-byte onset.
pub const CHORD_HEADER_LEN: usize = 5;

/// Packed note: 1-byte pitch, 2-byte duration, 1-byte track.
pub const NOTE_LEN: usize = 4;

/// Track projection symbol for "this track has no note in this chord".
pub const EMPTY_SYMBOL: u8 = 255;

/// Ticks per quarter note used by compiled query patterns.
pub const PATTERN_RESOLUTION: u32 = 960;

pub const SENTINEL_ONSET: u32 = u32::MAX;
pub const SENTINEL_PITCH: u8 = 127;
pub const SENTINEL_DURATION: u16 = u16::MAX;
pub const SENTINEL_TRACK: u8 = 127;

/// Highest valid MIDI pitch.
pub const MAX_PITCH: u8 = 127;

/// A raw note as produced by the MIDI decoder, before chord grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub onset: u32,
    pub pitch: u8,
    /// Duration in ticks. Must fit in 16 bits to be packed.
    pub duration: u32,
    pub track: u8,
}

impl NoteEvent {
    pub fn new(onset: u32, pitch: u8, duration: u32, track: u8) -> Self {
        Self { onset, pitch, duration, track }
    }
}

/// A note inside a chord. Notes compare by pitch only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub duration: u16,
    pub track: u8,
}

impl PartialEq for Note {
    fn eq(&self, other: &Self) -> bool {
        self.pitch == other.pitch
    }
}

impl Eq for Note {}

/// Notes sharing one onset, unique by pitch, ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chord {
    pub onset: u32,
    pub notes: Vec<Note>,
}

impl Chord {
    pub fn new(onset: u32) -> Self {
        Self { onset, notes: Vec::new() }
    }

    /// Add a note, keeping pitch order and rejecting pitch duplicates.
    pub fn add(&mut self, note: Note) -> &mut Self {
        if let Err(pos) = self.notes.binary_search_by_key(&note.pitch, |n| n.pitch) {
            self.notes.insert(pos, note);
        }
        self
    }

    pub fn lowest(&self) -> Option<&Note> {
        self.notes.first()
    }

    pub fn contains_pitch(&self, pitch: u8) -> bool {
        self.notes.binary_search_by_key(&pitch, |n| n.pitch).is_ok()
    }

    pub fn is_sentinel(&self) -> bool {
        self.onset == SENTINEL_ONSET
    }
}

/// Borrowed view of one chord inside a packed chord buffer.
#[derive(Debug, Clone, Copy)]
pub struct PackedChord<'a> {
    pub onset: u32,
    /// Byte offset of the chord header in the buffer.
    pub offset: usize,
    body: &'a [u8],
}

impl<'a> PackedChord<'a> {
    pub fn len(&self) -> usize {
        self.body.len() / NOTE_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn is_sentinel(&self) -> bool {
        self.onset == SENTINEL_ONSET
    }

    /// Byte offset of the `i`th note of this chord in the buffer.
    pub fn note_offset(&self, i: usize) -> usize {
        self.offset + CHORD_HEADER_LEN + i * NOTE_LEN
    }

    pub fn note(&self, i: usize) -> Note {
        let n = &self.body[i * NOTE_LEN..(i + 1) * NOTE_LEN];
        Note {
            pitch: n[0],
            duration: u16::from_le_bytes([n[1], n[2]]),
            track: n[3],
        }
    }

    pub fn notes(self) -> impl Iterator<Item = Note> + 'a {
        self.body.chunks_exact(NOTE_LEN).map(|n| Note {
            pitch: n[0],
            duration: u16::from_le_bytes([n[1], n[2]]),
            track: n[3],
        })
    }

    pub fn pitches(self) -> impl Iterator<Item = u8> + 'a {
        self.body.chunks_exact(NOTE_LEN).map(|n| n[0])
    }

    pub fn to_chord(&self) -> Chord {
        Chord {
            onset: self.onset,
            notes: self.notes().collect(),
        }
    }
}

/// Iterator over the chords of a packed buffer, sentinel included.
///
/// Stops early on a truncated buffer instead of panicking.
pub struct ChordIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for ChordIter<'a> {
    type Item = PackedChord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = self.buf.get(self.pos..self.pos + CHORD_HEADER_LEN)?;
        let count = header[0] as usize;
        let onset = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        let start = self.pos + CHORD_HEADER_LEN;
        let body = self.buf.get(start..start + count * NOTE_LEN)?;
        let chord = PackedChord {
            onset,
            offset: self.pos,
            body,
        };
        self.pos = start + count * NOTE_LEN;
        Some(chord)
    }
}

/// Iterate the chords of a packed buffer.
pub fn packed_chords(buf: &[u8]) -> ChordIter<'_> {
    ChordIter { buf, pos: 0 }
}

/// Append one chord in packed form.
pub(crate) fn pack_chord(buf: &mut Vec<u8>, onset: u32, notes: &[Note]) {
    buf.push(notes.len() as u8);
    buf.extend_from_slice(&onset.to_le_bytes());
    for n in notes {
        buf.push(n.pitch);
        buf.extend_from_slice(&n.duration.to_le_bytes());
        buf.push(n.track);
    }
}

/// Append the terminator chord so algorithms can read one element past real data.
pub(crate) fn pack_sentinel(buf: &mut Vec<u8>) {
    pack_chord(
        buf,
        SENTINEL_ONSET,
        &[Note {
            pitch: SENTINEL_PITCH,
            duration: SENTINEL_DURATION,
            track: SENTINEL_TRACK,
        }],
    );
}

/// Descriptive metadata attached to a song at ingest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongMeta {
    pub filepath: String,
    pub title: String,
    pub composer: String,
    pub opus: String,
    pub date: String,
    pub style: String,
    pub instruments: String,
    pub midi_url: String,
    pub score_url: String,
}

impl SongMeta {
    /// Fields searched by the free-text query filter.
    pub fn searchable_fields(&self) -> [&str; 7] {
        [
            &self.title,
            &self.composer,
            &self.filepath,
            &self.opus,
            &self.style,
            &self.instruments,
            &self.date,
        ]
    }
}

/// One indexed song: metadata, file-level MIDI facts and the encoded note data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub meta: SongMeta,
    pub ticks_per_quarter: u16,
    pub time_signatures: Vec<TimeSignature>,
    pub key_signatures: Vec<KeySignature>,
    pub meta_text: String,
    pub encoded: EncodedSong,
}

impl Song {
    pub fn num_chords(&self) -> usize {
        self.encoded.num_chords
    }

    pub fn chords(&self) -> ChordIter<'_> {
        packed_chords(&self.encoded.chords)
    }

    /// Chords `first..=last` as owned values; `None` if the range is out of bounds.
    pub fn chord_range(&self, first: usize, last: usize) -> Option<Vec<Chord>> {
        if first > last || last >= self.num_chords() {
            return None;
        }
        Some(
            self.chords()
                .skip(first)
                .take(last - first + 1)
                .map(|c| c.to_chord())
                .collect(),
        )
    }
}
