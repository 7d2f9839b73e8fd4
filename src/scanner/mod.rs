pub mod metadata;

use crate::collection::Collection;
use crate::midi::decode::{decode_file, DecodeError};
use crate::song::{encode, EncodeError, EncodeOptions, Song};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub prime_table: bool,
    /// Removed from file paths when deriving titles and URLs.
    pub strip_prefix: String,
    /// Lowercase file extensions to ingest.
    pub extensions: Vec<String>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            prime_table: true,
            strip_prefix: String::new(),
            extensions: crate::MIDI_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub scanned: u64,
    pub added: u64,
    /// Files that decoded but held no notes.
    pub empty: u64,
    pub errors: u64,
}

/// Walk `paths` and append every decodable MIDI file to `collection`.
///
/// A file that fails to read, decode or encode is logged and skipped.
pub fn ingest(collection: &mut Collection, paths: &[PathBuf], options: &IngestOptions) -> ScanResult {
    let mut midi_files: Vec<PathBuf> = Vec::new();

    for path in paths {
        for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("Error walking {}: {}", path.display(), e);
                    continue;
                }
            };
            if entry.file_type().is_file() && has_extension(entry.path(), &options.extensions) {
                midi_files.push(entry.into_path());
            }
        }
    }

    let pb = ProgressBar::new(midi_files.len() as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message("Ingesting...");

    let mut result = ScanResult::default();
    let mut songs = Vec::new();

    for path in &midi_files {
        result.scanned += 1;

        match load_song(path, options) {
            Ok(Some(song)) => {
                result.added += 1;
                songs.push(song);
            }
            Ok(None) => {
                log::info!("Skipping {}: no notes", path.display());
                result.empty += 1;
            }
            Err(e) => {
                log::warn!("Error ingesting {}: {}", path.display(), e);
                result.errors += 1;
            }
        }

        pb.inc(1);
    }

    collection.extend(songs);

    pb.finish_with_message(format!(
        "Done: {} added, {} empty, {} errors",
        result.added, result.empty, result.errors
    ));

    result
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    extensions.iter().any(|e| *e == ext)
}

/// Decode and encode one MIDI file. `Ok(None)` means the file has no notes.
pub fn load_song(path: &Path, options: &IngestOptions) -> Result<Option<Song>, ScanError> {
    let decoded = decode_file(path)?;
    if decoded.desync_count() > 0 {
        log::info!(
            "{}: dropped {} note off without note on, {} unterminated note on",
            path.display(),
            decoded.orphan_note_offs,
            decoded.unmatched_note_ons
        );
    }
    if decoded.events.is_empty() {
        return Ok(None);
    }

    let encoded = encode(
        &decoded.events,
        decoded.track_count,
        &EncodeOptions {
            prime_table: options.prime_table,
        },
    )?;

    Ok(Some(Song {
        meta: metadata::song_meta(path, &options.strip_prefix),
        ticks_per_quarter: decoded.ticks_per_quarter,
        time_signatures: decoded.time_signatures,
        key_signatures: decoded.key_signatures,
        meta_text: decoded.meta_text,
        encoded,
    }))
}
