use std::path::PathBuf;

use thiserror::Error;

/// Failures produced while turning an image into a descriptor set or scoring a pair.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("feature extraction failed: {0:#}")]
    Extraction(#[from] anyhow::Error),
    #[error("feature extractor returned no feature map")]
    MissingFeatureMap,
    #[error("feature map height {height} cannot be split into {parts} parts")]
    FeatureMapTooShort { height: usize, parts: usize },
    #[error("descriptor shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

pub type Result<T, E = VisionError> = std::result::Result<T, E>;
