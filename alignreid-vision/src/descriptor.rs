//! Part descriptors: a feature map reduced to one unit vector per horizontal stripe.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisionError};

/// Number of horizontal stripes a person crop is split into.
pub const DEFAULT_PARTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    #[default]
    Max,
    Avg,
}

impl std::str::FromStr for Pooling {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(Self::Max),
            "avg" | "mean" => Ok(Self::Avg),
            other => Err(format!("unknown pooling '{other}', expected max or avg")),
        }
    }
}

/// Ordered top-to-bottom stripe descriptors, one row per part, each row L2-normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct PartDescriptorSet {
    rows: Array2<f32>,
}

impl PartDescriptorSet {
    /// Wraps precomputed rows as-is. Rows are expected to be unit length already.
    pub fn from_rows(rows: Array2<f32>) -> Self {
        Self { rows }
    }

    /// Normalizes each row to unit length before wrapping.
    pub fn from_unnormalized(mut rows: Array2<f32>) -> Self {
        for mut row in rows.rows_mut() {
            let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            // zero rows stay zero
            if norm > 0.0 {
                row.mapv_inplace(|x| x / norm);
            }
        }
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.nrows() == 0
    }

    /// Descriptor dimension D.
    pub fn dim(&self) -> usize {
        self.rows.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.nrows(), self.rows.ncols())
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f32> {
        self.rows.row(i)
    }

    pub fn rows(&self) -> &Array2<f32> {
        &self.rows
    }
}

/// Reduces a (C, H, W) feature map to `parts` stripe descriptors.
///
/// The pooling kernel spans the full width and `floor(H / parts)` rows. Rows past
/// `parts * kernel_height` are dropped rather than folded into the last stripe, so a
/// height that is not a multiple of `parts` loses its bottom remainder.
#[derive(Debug, Clone, Copy)]
pub struct PartDescriptorBuilder {
    parts: usize,
    pooling: Pooling,
}

impl Default for PartDescriptorBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PARTS, Pooling::Max)
    }
}

impl PartDescriptorBuilder {
    pub fn new(parts: usize, pooling: Pooling) -> Self {
        Self { parts, pooling }
    }

    pub fn parts(&self) -> usize {
        self.parts
    }

    pub fn pooling(&self) -> Pooling {
        self.pooling
    }

    pub fn build(&self, feature_map: ArrayView3<'_, f32>) -> Result<PartDescriptorSet> {
        let (channels, height, width) = feature_map.dim();
        let kernel = if self.parts == 0 { 0 } else { height / self.parts };
        if kernel == 0 || width == 0 {
            return Err(VisionError::FeatureMapTooShort {
                height,
                parts: self.parts,
            });
        }

        let mut rows = Array2::<f32>::zeros((self.parts, channels));
        for part in 0..self.parts {
            let stripe = feature_map.slice(s![.., part * kernel..(part + 1) * kernel, ..]);
            let pooled = self.pool(stripe);
            rows.row_mut(part).assign(&pooled);
        }

        Ok(PartDescriptorSet::from_unnormalized(rows))
    }

    fn pool(&self, stripe: ArrayView3<'_, f32>) -> Array1<f32> {
        let channels = stripe.len_of(Axis(0));
        let mut out = Array1::<f32>::zeros(channels);
        for (c, plane) in stripe.outer_iter().enumerate() {
            out[c] = match self.pooling {
                Pooling::Max => plane.iter().copied().fold(f32::NEG_INFINITY, f32::max),
                Pooling::Avg => plane.iter().sum::<f32>() / plane.len() as f32,
            };
        }
        out
    }
}
