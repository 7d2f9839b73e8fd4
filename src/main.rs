use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use melodysearch::collection::Collection;
use melodysearch::db::{Database, DbError};
use melodysearch::matching::{Match, Registry, SongId};
use melodysearch::pattern::QueryParams;
use melodysearch::search::{Engine, SearchOutcome, Snapshot};
use melodysearch::similarity::HistogramKind;
use melodysearch::song::histogram;
use melodysearch::song::Song;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "melodysearch", version, about = "Content-based melody search over MIDI collections")]
struct Cli {
    /// Path to the SQLite collection store
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Number of parallel workers (0 = auto-detect from config)
    #[arg(short = 'j', long, default_value = "0", global = true)]
    jobs: usize,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum HistogramName {
    Pitch,
    #[value(alias = "class")]
    PitchClass,
    /// Pitch classes ordered by the circle of fifths
    Fifths,
    Interval,
    Duration,
}

#[derive(Subcommand)]
enum Commands {
    /// Index MIDI files into a named collection
    Ingest {
        /// Collection name
        name: String,

        /// Files or directories to ingest (defaults to config file midi_dirs)
        paths: Vec<PathBuf>,

        /// Add to the stored collection instead of replacing it
        #[arg(long)]
        append: bool,
    },

    /// Search every stored collection for a melody
    Search {
        /// Pattern, e.g. "c4 d4 e4" or "c4+e4 8g4"
        #[arg(default_value = "")]
        pattern: String,

        /// Matching algorithm
        #[arg(short, long, default_value = melodysearch::matching::DEFAULT_ALGORITHM)]
        algorithm: String,

        /// Maximum number of results (0 = configured maximum)
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,

        /// Report only the best match of each song
        #[arg(long)]
        song_once: bool,

        /// Sort mode (0 = scan order, 2 = cost, 3/4 = secondary score)
        #[arg(short, long, default_value = "2")]
        sort: i64,

        /// Pattern notes allowed to go unmatched
        #[arg(short, long, default_value = "0")]
        errors: i64,

        /// Song chords allowed between matched pattern chords
        #[arg(short, long, default_value = "0")]
        gap: i64,

        /// Restrict to songs whose metadata matches this text or regex
        #[arg(short, long)]
        text: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find songs with a similar note histogram
    Similar {
        /// MIDI URL of the query song
        url: String,

        /// Histogram to compare (pitch, pitch-class, interval)
        #[arg(short, long, default_value = "pitch")]
        kind: HistogramKind,

        /// Number of results
        #[arg(short = 'n', long, default_value = "15")]
        limit: usize,
    },

    /// Print a note histogram of one song
    Histogram {
        /// MIDI URL of the song
        url: String,

        #[arg(value_enum, default_value = "pitch-class")]
        kind: HistogramName,
    },

    /// Write chords of a song to a MIDI file
    Excerpt {
        /// MIDI URL of the song
        url: String,

        /// First chord index
        first: usize,

        /// Last chord index (inclusive)
        last: usize,

        /// Output file
        #[arg(short, long, default_value = "excerpt.mid")]
        output: PathBuf,
    },

    /// Show collection statistics
    Stats {
        /// Only this collection
        name: Option<String>,
    },

    /// List stored collections, or the songs of one collection
    Collections {
        /// List the songs of this collection
        name: Option<String>,
    },

    /// Delete a collection, or one file from it
    Remove {
        name: String,

        /// Remove only songs ingested from this file path
        #[arg(long)]
        file: Option<String>,
    },

    /// List available matching algorithms
    Algorithms,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = melodysearch::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(melodysearch::config::default_db_path);
    log::info!("Collection store: {}", db_path.display());

    let db = Database::open(&db_path).context("Failed to open collection store")?;
    let workers = if cli.jobs > 0 { cli.jobs } else { config.resolve_workers() };

    match cli.command {
        Commands::Ingest { name, paths, append } => {
            // Resolve ingest paths: CLI args > config midi_dirs
            let paths = if !paths.is_empty() {
                paths
            } else if !config.midi_dirs.is_empty() {
                config.midi_dirs.clone()
            } else {
                anyhow::bail!("No paths to ingest. Pass paths as arguments or set midi_dirs in config.");
            };

            let mut collection = if append {
                match db.load_collection(&name) {
                    Ok(c) => c,
                    Err(DbError::NotFound(_)) => Collection::new(&name),
                    Err(e) => return Err(e).context("Failed to load collection"),
                }
            } else {
                Collection::new(&name)
            };

            let mut fresh = Collection::new(&name);
            let result = melodysearch::scanner::ingest(&mut fresh, &paths, &config.ingest.options());
            // re-ingested files replace their earlier songs
            for song in fresh.songs() {
                collection.remove_file(&song.meta.filepath);
            }
            collection.extend(fresh.into_songs());

            db.save_collection(&collection).context("Failed to save collection")?;
            println!(
                "Ingest complete: {} scanned, {} added, {} empty, {} errors ({} songs in {})",
                result.scanned,
                result.added,
                result.empty,
                result.errors,
                collection.len(),
                collection.name
            );
        }

        Commands::Search {
            pattern,
            algorithm,
            limit,
            song_once,
            sort,
            errors,
            gap,
            text,
            json,
        } => {
            let engine = load_engine(&db, &config, workers)?;
            let params = QueryParams {
                algorithm,
                pattern,
                limit,
                song_once: song_once as i64,
                sort,
                errors,
                gap,
                text_filter: text,
            };
            let outcome = engine.search(&params)?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcome.ranked).context("Failed to encode results")?
                );
                return Ok(());
            }

            if outcome.ranked.matches.is_empty() {
                println!("No matches found.");
                return Ok(());
            }

            println!(
                "{} matches in {} songs (showing {}):",
                outcome.ranked.total,
                outcome.ranked.distinct_songs,
                outcome.ranked.matches.len()
            );
            println!();
            print_match_table(&outcome);
            println!();
            println!(
                "Init {:.1} ms, search {:.1} ms{}",
                outcome.init_time.as_secs_f64() * 1000.0,
                outcome.search_time.as_secs_f64() * 1000.0,
                if outcome.timed_out { " (deadline hit, results partial)" } else { "" }
            );
        }

        Commands::Similar { url, kind, limit } => {
            let engine = load_engine(&db, &config, workers)?;
            let (id, snapshot) = find_song(&engine, &url)?;
            let query = song_at(&snapshot, id)?;

            let collections: Vec<&Collection> = snapshot.iter().map(|c| c.as_ref()).collect();
            let results = melodysearch::similarity::similarities(query, &collections, kind, Some(id), workers)
                .context("Similarity computation failed")?;

            println!("Songs similar to \"{}\" ({:?} histogram):", query.meta.title, kind);
            println!();
            println!("{:<40} {:<20} {:>6}", "Title", "Collection", "Score");
            println!("{}", "-".repeat(68));
            for s in results.iter().take(limit) {
                let song = song_at(&snapshot, s.song)?;
                println!(
                    "{:<40} {:<20} {:>6.3}",
                    truncate(&song.meta.title, 40),
                    truncate(&snapshot[s.song.collection].name, 20),
                    s.score
                );
            }
            println!();
            println!("Score = cosine similarity (1 = identical histograms)");
        }

        Commands::Histogram { url, kind } => {
            let engine = load_engine(&db, &config, workers)?;
            let (id, snapshot) = find_song(&engine, &url)?;
            let song = song_at(&snapshot, id)?;
            println!("{}", song.meta.title);
            println!();
            print_histogram(song, kind);
        }

        Commands::Excerpt { url, first, last, output } => {
            let engine = load_engine(&db, &config, workers)?;
            let (id, snapshot) = find_song(&engine, &url)?;
            let song = song_at(&snapshot, id)?;
            let bytes = melodysearch::midi::excerpt_smf(song, first, last).context("Failed to build excerpt")?;
            std::fs::write(&output, bytes).with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "Wrote chords {}-{} of \"{}\" to {}",
                first,
                last,
                song.meta.title,
                output.display()
            );
        }

        Commands::Stats { name } => {
            let collections = match name {
                Some(name) => vec![db.load_collection(&name).context("Failed to load collection")?],
                None => db.load_all().context("Failed to load collections")?,
            };
            if collections.is_empty() {
                println!("No collections. Run `melodysearch ingest` first.");
                return Ok(());
            }
            for c in &collections {
                print_stats(c);
                println!();
            }
        }

        Commands::Collections { name: Some(name) } => {
            let songs = db.list_songs(&name).context("Query failed")?;
            if songs.is_empty() {
                println!("No songs in collection {}.", name);
                return Ok(());
            }
            println!("{:>5} {:<40} {:<25} {:>7} {:>7}", "#", "Title", "Composer", "Chords", "Notes");
            println!("{}", "-".repeat(88));
            for s in &songs {
                println!(
                    "{:>5} {:<40} {:<25} {:>7} {:>7}",
                    s.position,
                    truncate(&s.title, 40),
                    truncate(&s.composer, 25),
                    s.num_chords,
                    s.num_notes
                );
            }
        }

        Commands::Collections { name: None } => {
            let list = db.list_collections().context("Query failed")?;
            if list.is_empty() {
                println!("No collections. Run `melodysearch ingest` first.");
                return Ok(());
            }
            println!("{:<25} {:>7} {:>9} {:>9}  {}", "Collection", "Songs", "Chords", "Notes", "Updated");
            println!("{}", "-".repeat(75));
            for c in &list {
                println!(
                    "{:<25} {:>7} {:>9} {:>9}  {}",
                    truncate(&c.name, 25),
                    c.songs,
                    c.chords,
                    c.notes,
                    c.updated_at
                );
            }
        }

        Commands::Remove { name, file: None } => {
            if db.delete_collection(&name).context("Delete failed")? {
                println!("Removed collection {}.", name);
            } else {
                println!("No collection named {}.", name);
            }
        }

        Commands::Remove { name, file: Some(file) } => {
            let mut collection = db.load_collection(&name).context("Failed to load collection")?;
            let removed = collection.remove_file(&file);
            if removed > 0 {
                db.save_collection(&collection).context("Failed to save collection")?;
            }
            println!("Removed {} songs from {}.", removed, name);
        }

        Commands::Algorithms => {
            let registry = Registry::with_builtin();
            for name in registry.names() {
                let marker = if name == melodysearch::matching::DEFAULT_ALGORITHM { " (default)" } else { "" };
                println!("{}{}", name, marker);
            }
        }
    }

    Ok(())
}

/// Build a search engine over every stored collection.
fn load_engine(db: &Database, config: &melodysearch::config::AppConfig, workers: usize) -> Result<Engine> {
    let timeout = Duration::from_millis(config.search.query_timeout_ms);
    let engine = Engine::new(Registry::with_builtin(), config.limits.clone(), workers, Some(timeout))?;
    engine.replace_collections(db.load_all().context("Failed to load collections")?);
    Ok(engine)
}

fn find_song(engine: &Engine, url: &str) -> Result<(SongId, Snapshot)> {
    engine
        .find_by_url(url)
        .with_context(|| format!("No song with MIDI URL \"{}\"", url))
}

fn song_at(snapshot: &Snapshot, id: SongId) -> Result<&Song> {
    snapshot
        .get(id.collection)
        .and_then(|c| c.get(id.song))
        .with_context(|| format!("Song {:?} not in snapshot", id))
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// Print ranked matches with the song each one belongs to.
fn print_match_table(outcome: &SearchOutcome) {
    println!(
        "{:<36} {:<18} {:>11} {:>6} {:>5} {:>6}",
        "Title", "Collection", "Chords", "Transp", "Cost", "Score"
    );
    println!("{}", "-".repeat(87));

    for m in &outcome.ranked.matches {
        let Some(song) = outcome.song(m.song) else {
            continue;
        };
        let collection = outcome
            .collections
            .get(m.song.collection)
            .map(|c| c.name.as_str())
            .unwrap_or("?");
        println!(
            "{:<36} {:<18} {:>11} {:>+6} {:>5} {:>6}",
            truncate(&song.meta.title, 36),
            truncate(collection, 18),
            chord_span(m),
            m.transposition,
            m.cost,
            m.secondary.map(|s| s.to_string()).unwrap_or_default(),
        );
    }
}

fn chord_span(m: &Match) -> String {
    format!("{}-{}", m.first_chord, m.last_chord)
}

fn print_histogram(song: &Song, kind: HistogramName) {
    let encoded = &song.encoded;
    let rows: Vec<(String, u32)> = match kind {
        HistogramName::Pitch => histogram::pitch_histogram(encoded)
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(pitch, &count)| (pitch.to_string(), count))
            .collect(),
        HistogramName::PitchClass => labelled(&histogram::PITCH_CLASS_NAMES, &histogram::pitch_class_histogram(encoded)),
        HistogramName::Fifths => {
            let names: Vec<&str> = (0..histogram::PITCH_CLASS_BINS)
                .map(|i| histogram::PITCH_CLASS_NAMES[(i * 7) % histogram::PITCH_CLASS_BINS])
                .collect();
            labelled(&names, &histogram::folded_pitch_histogram(encoded))
        }
        HistogramName::Interval => histogram::interval_histogram(encoded)
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(bin, &count)| (format!("{:+}", bin as i32 - histogram::INTERVAL_OFFSET), count))
            .collect(),
        HistogramName::Duration => labelled(
            &histogram::DURATION_CLASS_NAMES,
            &histogram::duration_histogram(encoded, song.ticks_per_quarter),
        ),
    };

    let max = rows.iter().map(|&(_, c)| c).max().unwrap_or(0).max(1);
    for (label, count) in &rows {
        let bar = "#".repeat((*count as usize * 40).div_ceil(max as usize));
        println!("{:<24} {:>6}  {}", label, count, bar);
    }
}

fn labelled(names: &[&str], counts: &[u32]) -> Vec<(String, u32)> {
    names.iter().zip(counts).map(|(n, &c)| (n.to_string(), c)).collect()
}

fn print_stats(c: &Collection) {
    let stats = c.stats();
    let (avgpoly, avgpoly_dup) = stats.avgpoly();
    println!("Collection {}", c.name);
    println!("{}", "=".repeat(11 + c.name.len()));
    println!("Songs:              {}", stats.songs);
    println!("Chords:             {}", stats.chords);
    println!("Notes:              {} ({} with duplicates)", stats.notes, stats.notes_with_duplicates);
    println!("Max polyphony:      {} ({} with duplicates)", stats.maxpoly, stats.maxpoly_with_duplicates);
    println!("Avg polyphony:      {:.2} ({:.2} with duplicates)", avgpoly, avgpoly_dup);
    println!("Longest track:      {} notes", stats.max_track_length);
}
