use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::gallery;
use crate::matcher::MatchCandidate;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("cannot {action} {path}: {source}")]
    Destination {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("match {0} has no file name")]
    NoFileName(PathBuf),
}

/// The record printed for a successful match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub filename: String,
    pub distance: f64,
    pub similarity: f64,
    pub original_path: PathBuf,
    pub output_path: PathBuf,
}

/// Maps an aligned distance into (0, 1]; zero distance is 1.0.
pub fn similarity(distance: f64) -> f64 {
    1.0 / (1.0 + distance)
}

pub struct Reporter {
    output_dir: PathBuf,
}

impl Reporter {
    /// Creates `output_dir` if it does not exist yet.
    pub fn new(output_dir: &Path) -> Result<Self, ReportError> {
        std::fs::create_dir_all(output_dir).map_err(|source| ReportError::Destination {
            action: "create output directory",
            path: output_dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Copies the winner into the output directory under its original file name.
    pub fn report(&self, best: Option<&MatchCandidate>) -> Result<Option<MatchResult>, ReportError> {
        let Some(best) = best else {
            return Ok(None);
        };

        let filename = best
            .path
            .file_name()
            .ok_or_else(|| ReportError::NoFileName(best.path.clone()))?;
        let output_path = self.output_dir.join(filename);
        if gallery::canonical(&best.path) == gallery::canonical(&output_path) {
            // copying a file onto itself truncates it
            log::info!("{} is already in the output directory", filename.to_string_lossy());
        } else {
            copy_preserving_mtime(&best.path, &output_path)?;
        }

        Ok(Some(MatchResult {
            filename: filename.to_string_lossy().into_owned(),
            distance: best.score,
            similarity: similarity(best.score),
            original_path: absolute(&best.path),
            output_path: absolute(&output_path),
        }))
    }
}

fn copy_preserving_mtime(from: &Path, to: &Path) -> Result<(), ReportError> {
    let dest_err = |action: &'static str| {
        let path = to.to_path_buf();
        move |source| ReportError::Destination {
            action,
            path,
            source,
        }
    };

    std::fs::copy(from, to).map_err(dest_err("copy match to"))?;

    let modified = std::fs::metadata(from).and_then(|m| m.modified());
    if let Ok(modified) = modified {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(to)
            .map_err(dest_err("open copied match"))?;
        if let Err(e) = file.set_modified(modified) {
            log::debug!("could not preserve mtime on {}: {}", to.display(), e);
        }
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Writes exactly one line, the JSON record or `null`, and flushes.
pub fn emit<W: Write>(result: Option<&MatchResult>, mut out: W) -> std::io::Result<()> {
    serde_json::to_writer(&mut out, &result)?;
    writeln!(out)?;
    out.flush()
}
