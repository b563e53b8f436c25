use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

pub const DEFAULT_PROCESSING_THREADS: usize = 1;
/// Recordings at or below this size are treated as failed captures and deleted.
pub const DEFAULT_MIN_VIABLE_BYTES: u64 = 1024;

/// Validated runtime settings. Loaded once at startup, immutable thereafter;
/// shared across tasks as `Arc<Settings>`.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for recordings; one subdirectory per model.
    pub save_directory: PathBuf,
    /// Path to the watch-list file, re-read on every reconciler cycle.
    pub wishlist: PathBuf,
    /// Reconciler poll period in seconds. Always >= 1.
    pub check_interval_secs: u64,
    /// Command template invoked per finished recording. Empty disables
    /// post-processing entirely.
    pub post_processing_command: String,
    /// Size of the post-processing pool. Always >= 1.
    pub post_processing_threads: usize,
    /// Cleanup threshold: recordings at or below this many bytes are deleted.
    pub min_viable_bytes: u64,
}

/// On-disk config shape: the two-section key/value layout, as TOML.
#[derive(Debug, Deserialize)]
struct RawConfig {
    paths: RawPaths,
    settings: RawSettings,
}

#[derive(Debug, Deserialize)]
struct RawPaths {
    save_directory: PathBuf,
    wishlist: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(rename = "checkInterval")]
    check_interval: u64,
    #[serde(rename = "postProcessingCommand", default)]
    post_processing_command: String,
    #[serde(
        rename = "postProcessingThreads",
        default = "default_processing_threads",
        deserialize_with = "lenient_thread_count"
    )]
    post_processing_threads: usize,
    #[serde(rename = "minViableBytes", default = "default_min_viable_bytes")]
    min_viable_bytes: u64,
}

/// Loads and validates the config file at `path`.
///
/// Missing required keys, unreadable/unparsable files, a non-positive
/// `checkInterval`, and a save directory that cannot be created are all
/// fatal. `postProcessingThreads` is deliberately lenient: any value that
/// does not parse as a positive integer falls back to 1.
pub fn load(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let raw: RawConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    ensure!(raw.settings.check_interval >= 1, "checkInterval must be a positive number of seconds");

    let settings = Settings {
        save_directory: raw.paths.save_directory,
        wishlist: raw.paths.wishlist,
        check_interval_secs: raw.settings.check_interval,
        post_processing_command: raw.settings.post_processing_command,
        post_processing_threads: raw.settings.post_processing_threads.max(1),
        min_viable_bytes: raw.settings.min_viable_bytes,
    };

    std::fs::create_dir_all(&settings.save_directory).with_context(|| {
        format!("Failed to create save directory: {}", settings.save_directory.display())
    })?;

    Ok(settings)
}

impl Settings {
    /// True when a post-processing command is configured.
    pub fn post_processing_enabled(&self) -> bool {
        !self.post_processing_command.trim().is_empty()
    }
}

/// Accepts an integer, a numeric string, or garbage; anything that is not a
/// positive integer yields the default pool size instead of a parse error.
fn lenient_thread_count<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = toml::Value::deserialize(deserializer)?;
    let threads = match value {
        toml::Value::Integer(n) if n >= 1 => n as usize,
        toml::Value::String(s) => s
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|&n| n >= 1)
            .unwrap_or(DEFAULT_PROCESSING_THREADS),
        _ => DEFAULT_PROCESSING_THREADS,
    };
    Ok(threads)
}

fn default_processing_threads() -> usize {
    DEFAULT_PROCESSING_THREADS
}

fn default_min_viable_bytes() -> u64 {
    DEFAULT_MIN_VIABLE_BYTES
}
