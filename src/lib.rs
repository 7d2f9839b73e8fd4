pub mod collection;
pub mod config;
pub mod db;
pub mod matching;
pub mod midi;
pub mod pattern;
pub mod ranker;
pub mod scanner;
pub mod search;
pub mod similarity;
pub mod song;

/// MIDI file extensions ingested by default
pub const MIDI_EXTENSIONS: &[&str] = &["mid", "midi"];

/// Application name for XDG paths
pub const APP_NAME: &str = "melodysearch";
