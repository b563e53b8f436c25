use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;

/// Reads the watch-list file: one model name per line, blank lines ignored,
/// names trimmed and normalized to lower case, duplicates collapsed.
///
/// The file is user-edited and re-read on every reconciler cycle; a read
/// failure here means the cycle is skipped, so the error carries the path.
pub fn load(path: &Path) -> Result<BTreeSet<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read watch-list file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_lowercase)
        .collect())
}
