//! Routing-logit tensors.

use crate::{Result, TraceError};

/// Per-expert gate scores for one routing decision.
///
/// Shape is `[num_experts]` for a single token or `[batch, num_experts]` for a
/// batch of tokens, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingLogits {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl RoutingLogits {
    /// Build logits from a shape and row-major values.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        if shape.is_empty() || shape.len() > 2 {
            return Err(TraceError::InvalidShape {
                shape,
                reason: "expected rank 1 or 2",
            });
        }
        if shape.iter().any(|&d| d == 0) {
            return Err(TraceError::InvalidShape {
                shape,
                reason: "zero-sized axis",
            });
        }
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(TraceError::InvalidShape {
                shape,
                reason: "element count does not match shape",
            });
        }
        if data.iter().any(|v| v.is_nan()) {
            return Err(TraceError::InvalidShape {
                shape,
                reason: "NaN logit",
            });
        }
        Ok(Self { shape, data })
    }

    /// Logits for a single decision over `scores.len()` experts.
    pub fn from_scores(scores: &[f32]) -> Result<Self> {
        Self::new(vec![scores.len()], scores.to_vec())
    }

    /// Logits for a batch of decisions, one row per token.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let width = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        if rows.iter().any(|r| r.as_ref().len() != width) {
            return Err(TraceError::InvalidShape {
                shape: vec![rows.len(), width],
                reason: "ragged rows",
            });
        }
        let data = rows.iter().flat_map(|r| r.as_ref().iter().copied()).collect();
        Self::new(vec![rows.len(), width], data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Size of the expert (last) axis.
    pub fn num_experts(&self) -> usize {
        self.shape[self.shape.len() - 1]
    }

    /// Size of the leading batch axis, `None` for rank-1 logits.
    pub fn batch(&self) -> Option<usize> {
        (self.rank() == 2).then(|| self.shape[0])
    }

    /// Iterate rows along the expert axis (a single row for rank-1 logits).
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.num_experts())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}
