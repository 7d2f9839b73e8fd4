//! Query compilation: textual chord patterns and search parameters.
//!
//! A pattern is a whitespace-separated list of chords, each chord a
//! `+`-joined list of notes such as `8c#4` (optional duration code, note
//! letter, optional sharp, octave digit). Patterns go through the same
//! encoder as songs, so algorithms see one representation.

use crate::matching::{ALGORITHM_NAME_LEN, DEFAULT_ALGORITHM};
use crate::song::{
    encode, packed_chords, Chord, EncodeError, EncodeOptions, EncodedSong, NoteEvent,
    PATTERN_RESOLUTION, SENTINEL_DURATION, SENTINEL_ONSET, SENTINEL_PITCH, SENTINEL_TRACK,
};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use thiserror::Error;

pub const SYNTAX_ERROR: &str =
    "the syntax of the pattern is not correct for this algorithm. Refer to the instruction page.";

/// Raised verbatim to the caller; never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{SYNTAX_ERROR} (near {0:?})")]
    Syntax(String),
    #[error("pattern size must be between {min} and {max}.")]
    Length { min: usize, max: usize },
    #[error("number of allowed errors must be two less than pattern size.")]
    Errors,
    #[error("maximum gap between notes must be between zero and {max}.")]
    Gap { max: u32 },
    #[error("pattern too long: {chords} chords (maximum {max}).")]
    PatternTooLong { chords: usize, max: usize },
}

/// Bounds applied when validating a query.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    pub min_chords: usize,
    pub max_chords: usize,
    /// Longest text filter that may stand in for a short pattern.
    pub max_text_filter: usize,
    pub max_gap: u32,
    pub max_results: usize,
    /// Hard cap on pattern size, applied even when a text filter is present.
    pub max_pattern_chords: usize,
    pub max_sort_mode: i64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            min_chords: 2,
            max_chords: 30,
            max_text_filter: 50,
            max_gap: 10,
            max_results: 1000,
            max_pattern_chords: 31,
            max_sort_mode: 10,
        }
    }
}

/// Raw search request as received from a caller.
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub algorithm: String,
    pub pattern: String,
    pub limit: i64,
    pub song_once: i64,
    pub sort: i64,
    pub errors: i64,
    pub gap: i64,
    pub text_filter: Option<String>,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            algorithm: DEFAULT_ALGORITHM.to_string(),
            pattern: String::new(),
            limit: 0,
            song_once: 0,
            sort: 2,
            errors: 0,
            gap: 0,
            text_filter: None,
        }
    }
}

/// A validated, compiled query.
#[derive(Debug, Clone)]
pub struct Query {
    pub algorithm: String,
    pub pattern: Pattern,
    pub limit: usize,
    pub song_once: bool,
    pub sort: i64,
    pub errors: u32,
    pub gap: u32,
    pub text_filter: Option<TextFilter>,
}

/// Case-insensitive filter over song metadata. Invalid regular expressions
/// fall back to a literal substring match.
#[derive(Debug, Clone)]
pub struct TextFilter {
    regex: Option<Regex>,
}

impl TextFilter {
    pub fn new(text: &str) -> Self {
        let regex = RegexBuilder::new(text)
            .case_insensitive(true)
            .build()
            .or_else(|_| RegexBuilder::new(&regex::escape(text)).case_insensitive(true).build());
        match regex {
            Ok(regex) => Self { regex: Some(regex) },
            Err(e) => {
                log::warn!("Text filter {:?} rejected ({}); matching nothing", text, e);
                Self { regex: None }
            }
        }
    }

    pub fn matches<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> bool {
        match &self.regex {
            Some(regex) => fields.into_iter().any(|f| regex.is_match(f)),
            None => false,
        }
    }
}

/// One point of a geometric pattern vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternPoint {
    pub onset: u32,
    pub pitch: u8,
    pub duration: u16,
    pub track: u8,
}

const SENTINEL_POINT: PatternPoint = PatternPoint {
    onset: SENTINEL_ONSET,
    pitch: SENTINEL_PITCH,
    duration: SENTINEL_DURATION,
    track: SENTINEL_TRACK,
};

/// A compiled query pattern: the encoded form plus the derived views
/// different algorithm families consume.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub encoded: EncodedSong,
    pub chords: Vec<Chord>,
    /// Lowest pitch of each chord.
    pub pitch_string: Vec<u8>,
    /// Lowest note of each chord, terminated by the sentinel point.
    pub monophonic: Vec<PatternPoint>,
    /// Every note, terminated by the sentinel point.
    pub polyphonic: Vec<PatternPoint>,
}

impl Pattern {
    pub fn len(&self) -> usize {
        self.chords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chords.is_empty()
    }

    pub fn maxpoly(&self) -> usize {
        self.encoded.stats.maxpoly
    }

    pub fn num_notes(&self) -> usize {
        self.encoded.stats.num_notes
    }

    /// Polyphonic points without the terminator.
    pub fn points(&self) -> &[PatternPoint] {
        &self.polyphonic[..self.polyphonic.len().saturating_sub(1)]
    }

    fn from_encoded(encoded: EncodedSong) -> Self {
        let chords: Vec<Chord> = packed_chords(&encoded.chords)
            .take(encoded.num_chords)
            .map(|c| c.to_chord())
            .collect();

        let point = |onset: u32, n: &crate::song::Note| PatternPoint {
            onset,
            pitch: n.pitch,
            duration: n.duration,
            track: n.track,
        };

        let mut pitch_string = Vec::with_capacity(chords.len());
        let mut monophonic = Vec::with_capacity(chords.len() + 1);
        let mut polyphonic = Vec::new();
        for chord in &chords {
            if let Some(low) = chord.lowest() {
                pitch_string.push(low.pitch);
                monophonic.push(point(chord.onset, low));
            }
            polyphonic.extend(chord.notes.iter().map(|n| point(chord.onset, n)));
        }
        monophonic.push(SENTINEL_POINT);
        polyphonic.push(SENTINEL_POINT);

        Self {
            encoded,
            chords,
            pitch_string,
            monophonic,
            polyphonic,
        }
    }
}

/// Parse one note token into (pitch, duration ticks).
fn parse_note(token: &str) -> Result<(u8, u32), ValidationError> {
    let syntax = || ValidationError::Syntax(token.to_string());
    let bytes = token.as_bytes();

    let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits > 2 {
        return Err(syntax());
    }
    let duration = if digits == 0 {
        PATTERN_RESOLUTION
    } else {
        let code: u32 = token[..digits].parse().map_err(|_| syntax())?;
        if code == 0 {
            return Err(syntax());
        }
        // truncating division: the resolution is not divisible by every code
        4 * PATTERN_RESOLUTION / code
    };

    let rest = &bytes[digits..];
    let (letter, rest) = rest.split_first().ok_or_else(syntax)?;
    let mut pitch: u32 = match letter.to_ascii_lowercase() {
        b'c' => 0,
        b'd' => 2,
        b'e' => 4,
        b'f' => 5,
        b'g' => 7,
        b'a' => 9,
        b'b' => 11,
        _ => return Err(syntax()),
    };
    let rest = match rest.split_first() {
        Some((b'#', tail)) => {
            pitch += 1;
            tail
        }
        _ => rest,
    };
    match rest {
        [octave] if octave.is_ascii_digit() => {
            pitch += 12 * (octave - b'0') as u32;
        }
        _ => return Err(syntax()),
    }

    Ok((pitch as u8, duration))
}

/// Compile a pattern string into raw events.
///
/// The onset advance after each chord is the duration of the last note
/// written in that chord, not the longest one.
pub fn pattern_events(text: &str) -> Result<Vec<NoteEvent>, ValidationError> {
    let mut events = Vec::new();
    let mut onset: u32 = 0;
    for chord in text.split_whitespace() {
        let mut advance = 0;
        for token in chord.split('+') {
            let (pitch, duration) = parse_note(token)?;
            events.push(NoteEvent::new(onset, pitch, duration, 0));
            advance = duration;
        }
        onset = onset.saturating_add(advance);
    }
    Ok(events)
}

pub fn compile_pattern(text: &str) -> Result<Pattern, ValidationError> {
    let events = pattern_events(text)?;
    let encoded = encode(&events, 1, &EncodeOptions { prime_table: false }).map_err(|e| match e {
        // notes are bounded by the grammar; keep the token-level message
        EncodeError::DurationOverflow { .. }
        | EncodeError::ChordTooLarge { .. }
        | EncodeError::PitchOutOfRange { .. }
        | EncodeError::OnsetOverflow(_) => ValidationError::Syntax(e.to_string()),
    })?;
    Ok(Pattern::from_encoded(encoded))
}

/// Validate and compile a search request.
///
/// Length, error and gap bounds are checked before the pattern syntax.
/// `limit` and `sort` are normalised rather than rejected.
pub fn compile_query(params: &QueryParams, limits: &QueryLimits) -> Result<Query, ValidationError> {
    let chord_count = params.pattern.split_whitespace().count();
    let text = params.text_filter.as_deref().map(str::trim).unwrap_or("");
    // any filter restricts the scan; only a short one may stand in for the pattern
    let excuses_length = !text.is_empty() && text.chars().count() <= limits.max_text_filter;

    let length_ok = (limits.min_chords..=limits.max_chords).contains(&chord_count);
    if !length_ok && !excuses_length {
        return Err(ValidationError::Length {
            min: limits.min_chords,
            max: limits.max_chords,
        });
    }
    if chord_count > limits.max_pattern_chords {
        return Err(ValidationError::PatternTooLong {
            chords: chord_count,
            max: limits.max_pattern_chords,
        });
    }

    // patterns shorter than min_chords only get here through a text filter;
    // they tolerate no errors
    let max_errors = chord_count.saturating_sub(limits.min_chords) as i64;
    if !(0..=max_errors).contains(&params.errors) {
        return Err(ValidationError::Errors);
    }
    if !(0..=limits.max_gap as i64).contains(&params.gap) {
        return Err(ValidationError::Gap { max: limits.max_gap });
    }

    let limit = if params.limit <= 0 || params.limit as u64 > limits.max_results as u64 {
        limits.max_results
    } else {
        params.limit as usize
    };
    let sort = if (0..=limits.max_sort_mode).contains(&params.sort) {
        params.sort
    } else {
        0
    };
    let algorithm = if ALGORITHM_NAME_LEN.contains(&params.algorithm.chars().count()) {
        params.algorithm.clone()
    } else {
        DEFAULT_ALGORITHM.to_string()
    };

    let pattern = compile_pattern(&params.pattern)?;

    Ok(Query {
        algorithm,
        pattern,
        limit,
        song_once: params.song_once != 0,
        sort,
        errors: params.errors as u32,
        gap: params.gap as u32,
        text_filter: (!text.is_empty()).then(|| TextFilter::new(text)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pattern: &str) -> QueryParams {
        QueryParams {
            pattern: pattern.to_string(),
            ..Default::default()
        }
    }

    fn compile(p: &QueryParams) -> Result<Query, ValidationError> {
        compile_query(p, &QueryLimits::default())
    }

    #[test]
    fn test_two_chord_pattern_quarter_advance() {
        let p = compile_pattern("c4+g4 c5").unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.chords[0].onset, 0);
        assert_eq!(p.chords[1].onset, 960);
        let pitches: Vec<u8> = p.chords[0].notes.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![48, 55]);
        assert_eq!(p.chords[1].notes[0].pitch, 60);
    }

    #[test]
    fn test_unknown_note_letter_is_syntax_error() {
        assert!(matches!(compile_pattern("q4+g4 c5"), Err(ValidationError::Syntax(_))));
        assert!(matches!(compile_pattern("h4 c4"), Err(ValidationError::Syntax(_))));
    }

    #[test]
    fn test_last_note_governs_advance() {
        // half note written last: next chord two beats later
        let p = compile_pattern("4c4+2e4 d4").unwrap();
        assert_eq!(p.chords[1].onset, 1920);
        // quarter note written last, even though the half note is longer
        let p = compile_pattern("2e4+4c4 d4").unwrap();
        assert_eq!(p.chords[1].onset, 960);
    }

    #[test]
    fn test_duration_codes() {
        let p = compile_pattern("1c4 8d4 16e4 3f4 g4").unwrap();
        let durations: Vec<u16> = p.chords.iter().map(|c| c.notes[0].duration).collect();
        assert_eq!(durations, vec![3840, 480, 240, 1280, 960]);
        let onsets: Vec<u32> = p.chords.iter().map(|c| c.onset).collect();
        assert_eq!(onsets, vec![0, 3840, 4320, 4560, 5840]);
    }

    #[test]
    fn test_pitch_mapping() {
        let p = compile_pattern("C4 c#4 B3 a0 G#9").unwrap();
        assert_eq!(p.pitch_string, vec![48, 49, 47, 9, 116]);
    }

    #[test]
    fn test_malformed_tokens() {
        for bad in ["c", "c#", "c44", "123c4", "0c4", "c4x", "#4", "c4++e4", "e#b4"] {
            assert!(
                matches!(compile_pattern(bad), Err(ValidationError::Syntax(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_duplicate_pitch_in_chord_collapses() {
        let p = compile_pattern("c4+c4+e4 d4").unwrap();
        assert_eq!(p.chords[0].notes.len(), 2);
        assert_eq!(p.maxpoly(), 2);
        assert_eq!(p.num_notes(), 3);
    }

    #[test]
    fn test_pattern_vectors() {
        let p = compile_pattern("e4+c4 g4").unwrap();
        assert_eq!(p.monophonic.len(), 3);
        assert_eq!(p.monophonic[0].pitch, 48);
        assert_eq!(p.polyphonic.len(), 4);
        assert_eq!(p.points().len(), 3);
        let last = p.polyphonic.last().unwrap();
        assert_eq!((last.onset, last.pitch, last.duration, last.track), (u32::MAX, 127, u16::MAX, 127));
    }

    #[test]
    fn test_length_error_without_text() {
        assert_eq!(
            compile(&params("c4")).unwrap_err(),
            ValidationError::Length { min: 2, max: 30 }
        );
        let long = vec!["c4"; 31].join(" ");
        assert!(matches!(compile(&params(&long)), Err(ValidationError::Length { .. })));
    }

    #[test]
    fn test_text_filter_allows_short_pattern() {
        let mut p = params("c4");
        p.text_filter = Some("bach".into());
        let q = compile(&p).unwrap();
        assert_eq!(q.pattern.len(), 1);
        assert!(q.text_filter.is_some());

        p.pattern = String::new();
        assert!(compile(&p).unwrap().pattern.is_empty());

        p.text_filter = Some("x".repeat(51));
        assert!(matches!(compile(&p), Err(ValidationError::Length { .. })));
    }

    #[test]
    fn test_long_filter_still_restricts_valid_pattern() {
        let mut p = params("c4 d4");
        p.text_filter = Some("z".repeat(60));
        let q = compile(&p).unwrap();
        let filter = q.text_filter.unwrap();
        assert!(!filter.matches(["Other", "", "other.mid"]));
        assert!(filter.matches([format!("a{}", "z".repeat(60)).as_str()]));
    }

    #[test]
    fn test_short_pattern_tolerates_no_errors() {
        let mut p = params("c4");
        p.text_filter = Some("bach".into());
        assert!(compile(&p).is_ok());
        p.errors = 1;
        assert_eq!(compile(&p).unwrap_err(), ValidationError::Errors);

        p.pattern = String::new();
        p.errors = 0;
        assert!(compile(&p).is_ok());
        p.errors = 1;
        assert_eq!(compile(&p).unwrap_err(), ValidationError::Errors);
    }

    #[test]
    fn test_pattern_too_long_even_with_text() {
        let mut p = params(&vec!["c4"; 32].join(" "));
        p.text_filter = Some("bach".into());
        assert_eq!(
            compile(&p).unwrap_err(),
            ValidationError::PatternTooLong { chords: 32, max: 31 }
        );
    }

    #[test]
    fn test_gap_bounds() {
        let mut p = params("c4 d4 e4");
        p.gap = 11;
        assert_eq!(compile(&p).unwrap_err(), ValidationError::Gap { max: 10 });
        p.gap = -1;
        assert!(compile(&p).is_err());
        p.gap = 10;
        assert!(compile(&p).is_ok());
    }

    #[test]
    fn test_error_budget_bounds() {
        let mut p = params("c4 d4 e4 f4");
        p.errors = 3;
        assert_eq!(compile(&p).unwrap_err(), ValidationError::Errors);
        p.errors = 2;
        assert!(compile(&p).is_ok());
        p.errors = -1;
        assert_eq!(compile(&p).unwrap_err(), ValidationError::Errors);
    }

    #[test]
    fn test_validation_precedes_syntax() {
        let mut p = params("zz yy");
        p.gap = 20;
        assert!(matches!(compile(&p), Err(ValidationError::Gap { .. })));
    }

    #[test]
    fn test_limit_sort_and_flags_normalised() {
        let mut p = params("c4 d4");
        p.limit = 0;
        p.sort = 42;
        p.song_once = 7;
        let q = compile(&p).unwrap();
        assert_eq!(q.limit, 1000);
        assert_eq!(q.sort, 0);
        assert!(q.song_once);

        p.limit = 5000;
        assert_eq!(compile(&p).unwrap().limit, 1000);
        p.limit = 25;
        assert_eq!(compile(&p).unwrap().limit, 25);
    }

    #[test]
    fn test_algorithm_name_fallback() {
        let mut p = params("c4 d4");
        p.algorithm = "p1".into();
        assert_eq!(compile(&p).unwrap().algorithm, "monopoly");
        p.algorithm = "geometric_p1".into();
        assert_eq!(compile(&p).unwrap().algorithm, "geometric_p1");
        p.algorithm = "polycheck".into();
        assert_eq!(compile(&p).unwrap().algorithm, "polycheck");
    }

    #[test]
    fn test_text_filter_matching() {
        let f = TextFilter::new("BACH");
        assert!(f.matches(["", "J. S. Bach"]));
        assert!(!f.matches(["Handel"]));

        let regex = TextFilter::new("^air.*g$");
        assert!(regex.matches(["Air on the G"]));

        // unbalanced bracket falls back to literal search
        let literal = TextFilter::new("op. [12");
        assert!(literal.matches(["Sonata Op. [12"]));
    }
}
