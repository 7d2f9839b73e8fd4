use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::pattern::QueryLimits;
use crate::scanner::IngestOptions;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directories to ingest when `ingest` has no path arguments.
    pub midi_dirs: Vec<PathBuf>,
    /// Custom collection store path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    pub search: SearchConfig,
    pub ingest: IngestConfig,
    /// Query validation bounds.
    pub limits: QueryLimits,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SearchConfig {
    /// Per-query deadline in milliseconds. 0 = no deadline.
    pub query_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Precompute hash table primes for every pattern size.
    pub prime_table: bool,
    /// Path prefix removed when deriving titles and URLs.
    pub strip_prefix: String,
    pub extensions: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let defaults = IngestOptions::default();
        Self {
            prime_table: defaults.prime_table,
            strip_prefix: defaults.strip_prefix,
            extensions: defaults.extensions,
        }
    }
}

impl IngestConfig {
    pub fn options(&self) -> IngestOptions {
        IngestOptions {
            prime_table: self.prime_table,
            strip_prefix: self.strip_prefix.clone(),
            extensions: self.extensions.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/melodysearch/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default collection store path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("collections.db")
    } else {
        PathBuf::from("collections.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert!(config.midi_dirs.is_empty());
        assert_eq!(config.workers, 0);
        assert_eq!(config.search.query_timeout_ms, 0);
        assert!(config.ingest.prime_table);
        assert_eq!(config.limits.max_gap, 10);
        assert_eq!(config.limits.max_results, 1000);
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::parse(
            r#"
            midi_dirs = ["/music/mutopia"]
            workers = 3

            [search]
            query_timeout_ms = 2500

            [ingest]
            strip_prefix = "/music/"
            extensions = [".MID", "kar"]

            [limits]
            max_gap = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.midi_dirs, vec![PathBuf::from("/music/mutopia")]);
        assert_eq!(config.resolve_workers(), 3);
        assert_eq!(config.search.query_timeout_ms, 2500);
        assert_eq!(config.limits.max_gap, 4);
        assert_eq!(config.limits.max_chords, 30);

        let options = config.ingest.options();
        assert!(options.prime_table);
        assert_eq!(options.strip_prefix, "/music/");
        assert_eq!(options.extensions, vec!["mid", "kar"]);
    }

    #[test]
    fn test_bad_config_is_an_error() {
        assert!(AppConfig::parse("workers = \"many\"").is_err());
    }

    #[test]
    fn test_resolve_workers_auto() {
        assert!(AppConfig::default().resolve_workers() >= 1);
    }
}
