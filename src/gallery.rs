use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Regular files directly under `dir`, canonicalized and sorted by path.
///
/// Sorting fixes the scan order, which the first-encountered tie-break depends on.
pub fn list_candidates(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("reading gallery {}", dir.display()))?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("listing gallery {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        candidates.push(canonical(&path));
    }
    candidates.sort();
    Ok(candidates)
}

/// Canonical form used to compare the query against gallery entries.
pub fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
