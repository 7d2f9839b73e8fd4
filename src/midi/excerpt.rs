// Renders a chord range of an indexed song back into a Standard MIDI File so a
// match can be auditioned. Instrument data is not kept in the index, so the
// excerpt plays on channel 0 with the default program.

use crate::song::Song;
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    num::{u15, u28, u4, u7},
};
use thiserror::Error;

const MAX_DELTA: u32 = 0x0FFF_FFFF;
const VELOCITY: u8 = 64;

#[derive(Error, Debug)]
pub enum ExcerptError {
    #[error("chord range {first}-{last} is outside the song ({num_chords} chords)")]
    InvalidRange {
        first: usize,
        last: usize,
        num_chords: usize,
    },
    #[error("excerpt spans {0} ticks, too long for a MIDI delta")]
    TooLong(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode chords `first..=last` of `song` as a format-0 SMF, shifted to start at tick 0.
pub fn excerpt_smf(song: &Song, first: usize, last: usize) -> Result<Vec<u8>, ExcerptError> {
    let chords = song
        .chord_range(first, last)
        .ok_or(ExcerptError::InvalidRange {
            first,
            last,
            num_chords: song.num_chords(),
        })?;
    let base = chords.first().map(|c| c.onset).unwrap_or(0);

    // (tick, is_on, pitch); offs sort before ons at the same tick
    let mut timeline: Vec<(u32, bool, u8)> = Vec::new();
    for chord in &chords {
        for note in &chord.notes {
            let on = chord.onset - base;
            timeline.push((on, true, note.pitch));
            timeline.push((on.saturating_add(note.duration as u32), false, note.pitch));
        }
    }
    timeline.sort_by_key(|&(tick, is_on, pitch)| (tick, is_on, pitch));

    let name = format!("{}, chords {}-{}", song.meta.midi_url, first, last);
    let mut track = vec![TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
    }];

    let mut last_tick = 0u32;
    for (tick, is_on, pitch) in timeline {
        let delta = tick - last_tick;
        if delta > MAX_DELTA {
            return Err(ExcerptError::TooLong(tick));
        }
        let message = if is_on {
            MidiMessage::NoteOn { key: u7::new(pitch), vel: u7::new(VELOCITY) }
        } else {
            MidiMessage::NoteOff { key: u7::new(pitch), vel: u7::new(0) }
        };
        track.push(TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi { channel: u4::new(0), message },
        });
        last_tick = tick;
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let tpq = song.ticks_per_quarter.min(0x7FFF);
    let mut smf = Smf::new(Header::new(Format::SingleTrack, Timing::Metrical(u15::new(tpq))));
    smf.tracks.push(track);

    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::decode;
    use crate::song::{encode, EncodeOptions, NoteEvent, SongMeta};

    fn song() -> Song {
        let events = vec![
            NoteEvent::new(0, 60, 100, 0),
            NoteEvent::new(100, 62, 100, 0),
            NoteEvent::new(100, 67, 200, 1),
            NoteEvent::new(200, 64, 100, 0),
        ];
        Song {
            meta: SongMeta {
                midi_url: "bach/air.mid".into(),
                ..Default::default()
            },
            ticks_per_quarter: 384,
            time_signatures: vec![],
            key_signatures: vec![],
            meta_text: String::new(),
            encoded: encode(&events, 2, &EncodeOptions::default()).unwrap(),
        }
    }

    #[test]
    fn test_excerpt_roundtrips_through_decoder() {
        let bytes = excerpt_smf(&song(), 1, 2).unwrap();
        let d = decode(&bytes).unwrap();
        assert_eq!(d.ticks_per_quarter, 384);
        let mut got: Vec<(u32, u8, u32)> = d.events.iter().map(|e| (e.onset, e.pitch, e.duration)).collect();
        got.sort();
        assert_eq!(got, vec![(0, 62, 100), (0, 67, 200), (100, 64, 100)]);
        assert!(d.meta_text.contains("bach/air.mid, chords 1-2"));
    }

    #[test]
    fn test_excerpt_rejects_bad_range() {
        let s = song();
        assert!(matches!(excerpt_smf(&s, 2, 1), Err(ExcerptError::InvalidRange { .. })));
        assert!(matches!(excerpt_smf(&s, 0, 3), Err(ExcerptError::InvalidRange { .. })));
    }
}
