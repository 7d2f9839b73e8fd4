use melodysearch::collection::Collection;
use melodysearch::db::Database;
use melodysearch::matching::{Registry, SongId};
use melodysearch::midi::{decode, excerpt_smf};
use melodysearch::pattern::{QueryLimits, QueryParams};
use melodysearch::scanner::{ingest, IngestOptions};
use melodysearch::search::Engine;
use melodysearch::similarity::{similarities, HistogramKind};
use midly::num::{u15, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::path::Path;

fn note(delta: u32, key: u8, on: bool) -> TrackEvent<'static> {
    let message = if on {
        MidiMessage::NoteOn { key: u7::new(key), vel: u7::new(90) }
    } else {
        MidiMessage::NoteOff { key: u7::new(key), vel: u7::new(0) }
    };
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi { channel: u4::new(0), message },
    }
}

/// One quarter note per pitch at 480 ticks per quarter.
fn write_melody(path: &Path, pitches: &[u8]) {
    let mut track = Vec::new();
    for &p in pitches {
        track.push(note(0, p, true));
        track.push(note(480, p, false));
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    let smf = Smf {
        header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(480))),
        tracks: vec![track],
    };
    let mut buf = Vec::new();
    smf.write(&mut buf).unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, buf).unwrap();
}

fn build_library(root: &Path) {
    let minuet_dir = root.join("mutopia/BachJS/minuet");
    write_melody(&minuet_dir.join("minuet.mid"), &[60, 62, 64, 65, 67]);
    std::fs::write(
        minuet_dir.join("meta.dat"),
        "1\n2\n3\n4\nMinuet+in+G\nBach%2C+Johann+Sebastian\nBWV Anh. 114\n7\nPiano\n1725\nBaroque\n",
    )
    .unwrap();

    write_melody(&root.join("folk/air one.mid"), &[67, 69, 71, 50]);
    write_melody(&root.join("folk/silent.mid"), &[]);
    std::fs::write(root.join("folk/broken.mid"), b"not a midi file").unwrap();
}

fn options(root: &Path) -> IngestOptions {
    IngestOptions {
        strip_prefix: root.to_string_lossy().to_string(),
        ..Default::default()
    }
}

fn search(pattern: &str) -> QueryParams {
    QueryParams {
        pattern: pattern.into(),
        ..Default::default()
    }
}

#[test]
fn test_ingest_persist_and_search() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("library");
    build_library(&root);

    let mut collection = Collection::new("library");
    let result = ingest(&mut collection, &[root.clone()], &options(&root));
    assert_eq!(result.scanned, 4);
    assert_eq!(result.added, 2);
    assert_eq!(result.empty, 1);
    assert_eq!(result.errors, 1);

    // walk order is by file name: folk/ before mutopia/
    let air = &collection.songs()[0];
    assert_eq!(air.meta.title, "folk/air one.mid");
    assert_eq!(air.meta.midi_url, "folk/air+one.mid");
    assert!(air.meta.composer.is_empty());

    let minuet = &collection.songs()[1];
    assert_eq!(minuet.meta.title, "Minuet in G");
    assert_eq!(minuet.meta.composer, "Bach, Johann Sebastian");
    assert_eq!(minuet.meta.opus, "BWV Anh. 114");
    assert_eq!(minuet.meta.instruments, "Piano");
    assert_eq!(minuet.meta.date, "1725");
    assert_eq!(minuet.meta.style, "Baroque");
    assert_eq!(minuet.meta.score_url, "mutopia/BachJS/minuet/minuet-a4.ps");
    assert_eq!(minuet.ticks_per_quarter, 480);
    assert_eq!(minuet.num_chords(), 5);

    let db = Database::open(&dir.path().join("store/collections.db")).unwrap();
    db.save_collection(&collection).unwrap();
    drop(db);

    let db = Database::open(&dir.path().join("store/collections.db")).unwrap();
    let loaded = db.load_all().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].len(), 2);

    let engine = Engine::new(Registry::with_builtin(), QueryLimits::default(), 2, None).unwrap();
    engine.replace_collections(loaded);

    let outcome = engine.search(&search("c4 d4 e4")).unwrap();
    let hits: Vec<(SongId, usize, usize, i32)> = outcome
        .ranked
        .matches
        .iter()
        .map(|m| (m.song, m.first_chord, m.last_chord, m.transposition))
        .collect();
    assert_eq!(
        hits,
        vec![
            (SongId { collection: 0, song: 1 }, 0, 2, 12),
            (SongId { collection: 0, song: 0 }, 0, 2, 19),
        ]
    );
    assert_eq!(outcome.ranked.distinct_songs, 2);

    let mut filtered = search("c4 d4 e4");
    filtered.text_filter = Some("baroque".into());
    let outcome = engine.search(&filtered).unwrap();
    assert_eq!(outcome.ranked.matches.len(), 1);
    assert_eq!(outcome.song(outcome.ranked.matches[0].song).unwrap().meta.title, "Minuet in G");

    // exact point-set matching agrees on the quarter-note melody...
    let mut exact = search("c4 d4 e4");
    exact.algorithm = "geometric_p1".into();
    let outcome = engine.search(&exact).unwrap();
    assert_eq!(outcome.ranked.total, 2);

    // ...but, unlike the melody matcher, rejects it with an eighth note in the middle
    exact.pattern = "c4 8d4 e4".into();
    assert_eq!(engine.search(&exact).unwrap().ranked.total, 0);
    assert_eq!(engine.search(&search("c4 8d4 e4")).unwrap().ranked.total, 2);

    // a filter longer than a short-pattern excuse still restricts the scan
    let mut long_filter = search("c4 d4 e4");
    long_filter.text_filter = Some(format!("johann sebastian{}", "|^no-such-title$".repeat(3)));
    assert!(long_filter.text_filter.as_ref().unwrap().len() > 50);
    let outcome = engine.search(&long_filter).unwrap();
    assert_eq!(outcome.ranked.matches.len(), 1);
    assert_eq!(outcome.song(outcome.ranked.matches[0].song).unwrap().meta.title, "Minuet in G");
}

#[test]
fn test_excerpt_and_similarity_from_store() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("library");
    build_library(&root);

    let mut collection = Collection::new("library");
    ingest(&mut collection, &[root.clone()], &options(&root));
    let db = Database::open_in_memory().unwrap();
    db.save_collection(&collection).unwrap();

    let engine = Engine::new(Registry::with_builtin(), QueryLimits::default(), 1, None).unwrap();
    engine.replace_collections(db.load_all().unwrap());

    let (id, snapshot) = engine.find_by_url("mutopia/BachJS/minuet/minuet.mid").unwrap();
    let minuet = snapshot[id.collection].get(id.song).unwrap();

    let bytes = excerpt_smf(minuet, 1, 3).unwrap();
    let decoded = decode(&bytes).unwrap();
    let pitches: Vec<u8> = decoded.events.iter().map(|e| e.pitch).collect();
    assert_eq!(pitches, vec![62, 64, 65]);
    assert_eq!(decoded.events[0].onset, 0);
    assert_eq!(decoded.ticks_per_quarter, 480);

    let collections: Vec<&Collection> = snapshot.iter().map(|c| c.as_ref()).collect();
    let scores = similarities(minuet, &collections, HistogramKind::Interval, Some(id), 1).unwrap();
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].song, SongId { collection: 0, song: 0 });
    assert!(scores[0].score > 0.0 && scores[0].score < 1.0);
}
