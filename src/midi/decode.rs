//! Standard MIDI File decoding into raw note events.
//!
//! NoteOn/NoteOff are paired per track by (channel, pitch) in first-in,
//! first-out order. Unpaired events are dropped and counted; they never fail
//! the file.

use crate::song::{NoteEvent, PATTERN_RESOLUTION};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("MIDI parse error: {0}")]
    Parse(#[from] midly::Error),
    #[error("note at tick {0} does not fit in 32 bits")]
    TickOverflow(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub tick: u32,
    pub numerator: u8,
    /// Power-of-two exponent as stored in the file (2 = quarter).
    pub denominator_pow: u8,
    pub clocks_per_click: u8,
    pub thirty_seconds_per_quarter: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignature {
    pub tick: u32,
    /// Sharps (positive) or flats (negative).
    pub accidentals: i8,
    pub minor: bool,
}

/// Everything the song encoder and metadata layer need from one file.
#[derive(Debug, Clone, Default)]
pub struct DecodedMidi {
    pub track_count: usize,
    pub ticks_per_quarter: u16,
    pub events: Vec<NoteEvent>,
    pub time_signatures: Vec<TimeSignature>,
    pub key_signatures: Vec<KeySignature>,
    /// Textual meta events, one `"<tick> <Kind> <quoted text>"` line each.
    pub meta_text: String,
    /// NoteOff (or zero-velocity NoteOn) with no open note.
    pub orphan_note_offs: usize,
    /// NoteOn still open at the end of its track.
    pub unmatched_note_ons: usize,
}

impl DecodedMidi {
    pub fn desync_count(&self) -> usize {
        self.orphan_note_offs + self.unmatched_note_ons
    }
}

pub fn decode_file(path: &Path) -> Result<DecodedMidi, DecodeError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

pub fn decode(bytes: &[u8]) -> Result<DecodedMidi, DecodeError> {
    let smf = Smf::parse(bytes)?;

    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(ticks) if ticks.as_int() > 0 => ticks.as_int(),
        _ => PATTERN_RESOLUTION as u16,
    };

    let mut out = DecodedMidi {
        track_count: smf.tracks.len(),
        ticks_per_quarter,
        ..Default::default()
    };

    for (track_index, track) in smf.tracks.iter().enumerate() {
        let track_id = u8::try_from(track_index).unwrap_or(u8::MAX);
        let mut tick: u64 = 0;
        let mut open: HashMap<(u8, u8), VecDeque<u64>> = HashMap::new();

        for event in track {
            tick += event.delta.as_int() as u64;

            match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            open.entry((ch, key.as_int())).or_default().push_back(tick);
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let pitch = key.as_int();
                            match open.get_mut(&(ch, pitch)).and_then(|q| q.pop_front()) {
                                Some(onset) => {
                                    let onset32 = u32::try_from(onset)
                                        .map_err(|_| DecodeError::TickOverflow(onset))?;
                                    let duration = u32::try_from(tick - onset)
                                        .map_err(|_| DecodeError::TickOverflow(tick))?;
                                    out.events.push(NoteEvent::new(onset32, pitch, duration, track_id));
                                }
                                None => {
                                    log::debug!(
                                        "Ignoring note off without note on (track {}, channel {}, pitch {}, tick {})",
                                        track_index, ch, pitch, tick
                                    );
                                    out.orphan_note_offs += 1;
                                }
                            }
                        }
                        _ => {}
                    }
                }
                TrackEventKind::Meta(meta) => handle_meta(&mut out, tick, meta)?,
                _ => {}
            }
        }

        let unmatched: usize = open.values().map(|q| q.len()).sum();
        if unmatched > 0 {
            log::debug!("Dropping {} unmatched note on events in track {}", unmatched, track_index);
            out.unmatched_note_ons += unmatched;
        }
    }

    Ok(out)
}

fn handle_meta(out: &mut DecodedMidi, tick: u64, meta: MetaMessage<'_>) -> Result<(), DecodeError> {
    let tick32 = u32::try_from(tick).map_err(|_| DecodeError::TickOverflow(tick))?;

    let text = |kind: &str, bytes: &[u8]| format!("{} {} {:?}\n", tick, kind, String::from_utf8_lossy(bytes));

    match meta {
        MetaMessage::TimeSignature(numerator, denominator_pow, clocks_per_click, thirty_seconds) => {
            if !out.time_signatures.iter().any(|ts| ts.tick == tick32) {
                out.time_signatures.push(TimeSignature {
                    tick: tick32,
                    numerator,
                    denominator_pow,
                    clocks_per_click,
                    thirty_seconds_per_quarter: thirty_seconds,
                });
            }
        }
        MetaMessage::KeySignature(accidentals, minor) => {
            out.key_signatures.push(KeySignature {
                tick: tick32,
                accidentals,
                minor,
            });
        }
        MetaMessage::Text(t) => out.meta_text.push_str(&text("GeneralPurposeText", t)),
        MetaMessage::Copyright(t) => out.meta_text.push_str(&text("CopyrightNotice", t)),
        MetaMessage::TrackName(t) => out.meta_text.push_str(&text("TrackName", t)),
        MetaMessage::InstrumentName(t) => out.meta_text.push_str(&text("InstrumentName", t)),
        MetaMessage::Lyric(t) => out.meta_text.push_str(&text("Lyric", t)),
        MetaMessage::Marker(t) => out.meta_text.push_str(&text("Marker", t)),
        MetaMessage::CuePoint(t) => out.meta_text.push_str(&text("CuePoint", t)),
        MetaMessage::ProgramName(t) => out.meta_text.push_str(&text("ProgramName", t)),
        MetaMessage::DeviceName(t) => out.meta_text.push_str(&text("DeviceName", t)),
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u15, u28, u4, u7};
    use midly::{Format, Header, TrackEvent};

    fn note(delta: u32, key: u8, vel: u8, on: bool) -> TrackEvent<'static> {
        let message = if on {
            MidiMessage::NoteOn { key: u7::new(key), vel: u7::new(vel) }
        } else {
            MidiMessage::NoteOff { key: u7::new(key), vel: u7::new(0) }
        };
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi { channel: u4::new(0), message },
        }
    }

    fn meta(delta: u32, m: MetaMessage<'static>) -> TrackEvent<'static> {
        TrackEvent { delta: u28::new(delta), kind: TrackEventKind::Meta(m) }
    }

    fn write(tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
        let mut smf = Smf::new(Header::new(Format::Parallel, Timing::Metrical(u15::new(480))));
        for mut t in tracks {
            t.push(meta(0, MetaMessage::EndOfTrack));
            smf.tracks.push(t);
        }
        let mut buf = Vec::new();
        smf.write(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_decode_pairs_notes() {
        let bytes = write(vec![vec![
            note(0, 60, 100, true),
            note(480, 60, 0, false),
            note(0, 62, 100, true),
            note(240, 62, 0, true), // zero-velocity note on ends the note
        ]]);
        let d = decode(&bytes).unwrap();
        assert_eq!(d.ticks_per_quarter, 480);
        assert_eq!(d.track_count, 1);
        assert_eq!(
            d.events,
            vec![NoteEvent::new(0, 60, 480, 0), NoteEvent::new(480, 62, 240, 0)]
        );
        assert_eq!(d.desync_count(), 0);
    }

    #[test]
    fn test_decode_fifo_pairing() {
        // two overlapping notes on the same key: first off closes the first on
        let bytes = write(vec![vec![
            note(0, 60, 100, true),
            note(100, 60, 100, true),
            note(100, 60, 0, false),
            note(300, 60, 0, false),
        ]]);
        let d = decode(&bytes).unwrap();
        assert_eq!(
            d.events,
            vec![NoteEvent::new(0, 60, 200, 0), NoteEvent::new(100, 60, 400, 0)]
        );
    }

    #[test]
    fn test_decode_counts_orphans() {
        let bytes = write(vec![
            vec![note(0, 61, 0, false), note(10, 60, 90, true)],
            vec![note(0, 64, 90, true), note(50, 64, 0, false)],
        ]);
        let d = decode(&bytes).unwrap();
        assert_eq!(d.orphan_note_offs, 1);
        assert_eq!(d.unmatched_note_ons, 1);
        assert_eq!(d.events, vec![NoteEvent::new(0, 64, 50, 1)]);
        assert_eq!(d.track_count, 2);
    }

    #[test]
    fn test_decode_meta_events() {
        let bytes = write(vec![vec![
            meta(0, MetaMessage::TrackName(b"Melody")),
            meta(0, MetaMessage::TimeSignature(3, 2, 24, 8)),
            meta(0, MetaMessage::TimeSignature(3, 2, 24, 8)),
            meta(0, MetaMessage::KeySignature(-2, false)),
            meta(960, MetaMessage::Lyric(b"la")),
        ]]);
        let d = decode(&bytes).unwrap();
        assert_eq!(d.time_signatures.len(), 1);
        assert_eq!(d.time_signatures[0].numerator, 3);
        assert_eq!(d.key_signatures, vec![KeySignature { tick: 0, accidentals: -2, minor: false }]);
        assert_eq!(d.meta_text, "0 TrackName \"Melody\"\n960 Lyric \"la\"\n");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"not a midi file"), Err(DecodeError::Parse(_))));
    }
}
