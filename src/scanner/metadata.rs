use crate::song::SongMeta;
use std::path::Path;

/// Name of the per-directory metadata file in the Mutopia layout.
pub const META_FILE: &str = "meta.dat";

// 0-based line numbers inside meta.dat
const TITLE_LINE: usize = 4;
const COMPOSER_LINE: usize = 5;
const OPUS_LINE: usize = 6;
const INSTRUMENTS_LINE: usize = 8;
const DATE_LINE: usize = 9;
const STYLE_LINE: usize = 10;

/// Build the metadata of a MIDI file at `path`.
///
/// URLs and the fallback title use the path with `strip_prefix` removed.
pub fn song_meta(path: &Path, strip_prefix: &str) -> SongMeta {
    let filepath = path.to_string_lossy().to_string();
    let relative = match filepath.strip_prefix(strip_prefix) {
        Some(rest) if !strip_prefix.is_empty() => rest.trim_start_matches('/').to_string(),
        _ => filepath.clone(),
    };

    let mut meta = SongMeta {
        filepath,
        title: relative.clone(),
        midi_url: url_escape(&relative),
        ..Default::default()
    };

    let dat = path.parent().map(|dir| dir.join(META_FILE));
    if let Some(dat) = dat.filter(|p| p.is_file()) {
        match std::fs::read_to_string(&dat) {
            Ok(contents) => {
                apply_meta_dat(&mut meta, &contents);
                meta.score_url = score_url(&relative);
            }
            Err(e) => log::warn!("Could not read {}: {}", dat.display(), e),
        }
    }

    meta
}

/// Fill fields from meta.dat contents; missing lines leave fields untouched.
pub fn apply_meta_dat(meta: &mut SongMeta, contents: &str) {
    let normalized = contents.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();
    let line = |i: usize| lines.get(i).map(|s| s.to_string());

    if let Some(title) = line(TITLE_LINE) {
        meta.title = url_unescape(&title);
    }
    if let Some(composer) = line(COMPOSER_LINE) {
        meta.composer = url_unescape(&composer);
    }
    if let Some(opus) = line(OPUS_LINE) {
        meta.opus = opus;
    }
    if let Some(instruments) = line(INSTRUMENTS_LINE) {
        meta.instruments = instruments;
    }
    if let Some(date) = line(DATE_LINE) {
        meta.date = date;
    }
    if let Some(style) = line(STYLE_LINE) {
        meta.style = style;
    }
}

/// Printable score next to the MIDI file: `foo.mid` -> `foo-a4.ps`.
pub fn score_url(relative: &str) -> String {
    match relative.strip_suffix(".mid") {
        Some(stem) => format!("{}-a4.ps", url_escape(stem)),
        None => String::new(),
    }
}

/// Form-style percent escaping that leaves `/` readable.
pub fn url_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'.' | b'-' | b'~' | b'/' => out.push(b as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Inverse of form-style escaping; malformed escapes are kept literally.
pub fn url_unescape(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(v) = hex {
                    out.push(v);
                    i += 3;
                    continue;
                }
                out.push(b'%');
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
