use ndarray::{Array2, ArrayView1};

use crate::descriptor::{PartDescriptorSet, DEFAULT_PARTS};
use crate::error::{Result, VisionError};

/// Scores two descriptor sets by comparing every query stripe against every candidate
/// stripe and averaging the distances. Lower is more similar.
#[derive(Debug, Clone, Copy)]
pub struct AlignedDistanceScorer {
    parts: usize,
}

impl Default for AlignedDistanceScorer {
    fn default() -> Self {
        Self::new(DEFAULT_PARTS)
    }
}

impl AlignedDistanceScorer {
    pub fn new(parts: usize) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> usize {
        self.parts
    }

    /// `M[i][j] = ||query[i] - candidate[j]||`, computed for all part pairs.
    pub fn distance_matrix(
        &self,
        query: &PartDescriptorSet,
        candidate: &PartDescriptorSet,
    ) -> Result<Array2<f64>> {
        self.check(query, query)?;
        self.check(query, candidate)?;

        Ok(Array2::from_shape_fn((self.parts, self.parts), |(i, j)| {
            euclidean(query.row(i), candidate.row(j))
        }))
    }

    /// Arithmetic mean of the full distance matrix.
    pub fn score(&self, query: &PartDescriptorSet, candidate: &PartDescriptorSet) -> Result<f64> {
        let matrix = self.distance_matrix(query, candidate)?;
        Ok(matrix.sum() / matrix.len() as f64)
    }

    fn check(&self, reference: &PartDescriptorSet, set: &PartDescriptorSet) -> Result<()> {
        let expected = (self.parts, reference.dim());
        if set.shape() != expected {
            return Err(VisionError::ShapeMismatch {
                expected,
                actual: set.shape(),
            });
        }
        Ok(())
    }
}

fn euclidean(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
