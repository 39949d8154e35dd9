//! Expert selection: softmax over the expert axis, then top-k.
//!
//! Only indices are kept; probabilities are discarded once ranked.

use serde::{Deserialize, Serialize};

use crate::logits::RoutingLogits;
use crate::{Result, TraceError};

/// How batched (rank-2) logits are flattened into a persisted selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertLayout {
    /// One inner index list per batch row (`[[i, ...], ...]`).
    #[default]
    PerRow,
    /// Leading batch axis must be 1 and is dropped (`[i, ...]`).
    SqueezeBatch,
}

impl ExpertLayout {
    /// Check that `logits` can be flattened under this layout.
    pub fn validate(self, logits: &RoutingLogits) -> Result<()> {
        match (self, logits.batch()) {
            (ExpertLayout::SqueezeBatch, Some(batch)) if batch != 1 => {
                Err(TraceError::InvalidShape {
                    shape: logits.shape().to_vec(),
                    reason: "squeeze-batch layout requires a batch size of 1",
                })
            }
            _ => Ok(()),
        }
    }
}

/// Selected expert indices for one routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpertSelection {
    /// Single-token decision.
    Flat(Vec<u32>),
    /// One index list per token in the batch.
    Batched(Vec<Vec<u32>>),
}

impl ExpertSelection {
    /// Iterate selected index lists (one per token).
    pub fn rows(&self) -> Box<dyn Iterator<Item = &[u32]> + '_> {
        match self {
            ExpertSelection::Flat(idx) => Box::new(core::iter::once(idx.as_slice())),
            ExpertSelection::Batched(rows) => Box::new(rows.iter().map(Vec::as_slice)),
        }
    }
}

/// Numerically stable softmax of one row.
///
/// `+inf` logits share all of the mass. A row of only `-inf` is uniform.
pub fn softmax(row: &[f32]) -> Vec<f32> {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::INFINITY {
        let hits = row.iter().filter(|&&v| v == f32::INFINITY).count() as f32;
        return row
            .iter()
            .map(|&v| if v == f32::INFINITY { 1.0 / hits } else { 0.0 })
            .collect();
    }
    if max == f32::NEG_INFINITY {
        return vec![1.0 / row.len() as f32; row.len()];
    }

    let mut out: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = out.iter().sum();
    for v in out.iter_mut() {
        *v /= sum;
    }
    out
}

/// Indices of the `k` largest values, largest first.
///
/// Equal values keep ascending index order and NaN ranks above everything.
/// `k` past the row length yields every index.
pub fn top_k_indices(values: &[f32], k: usize) -> Vec<u32> {
    let mut indexed: Vec<(usize, f32)> = values
        .iter()
        .map(|&v| if v.is_nan() { f32::NAN.copysign(1.0) } else { v })
        .enumerate()
        .collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed.into_iter().map(|(i, _)| i as u32).collect()
}

/// Check `k` against the expert count of `logits`.
pub fn validate_top_k(logits: &RoutingLogits, k: usize) -> Result<()> {
    let num_experts = logits.num_experts();
    if k == 0 || k > num_experts {
        return Err(TraceError::InvalidTopK { k, num_experts });
    }
    Ok(())
}

/// Rank experts of every row and keep the top `k` indices.
pub fn select_experts(logits: &RoutingLogits, k: usize, layout: ExpertLayout) -> ExpertSelection {
    let rows: Vec<Vec<u32>> = logits
        .rows()
        .map(|row| top_k_indices(&softmax(row), k))
        .collect();

    match (logits.rank(), layout) {
        (1, _) | (_, ExpertLayout::SqueezeBatch) => {
            ExpertSelection::Flat(rows.into_iter().next().unwrap_or_default())
        }
        _ => ExpertSelection::Batched(rows),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_two_of_four() {
        let logits = RoutingLogits::from_scores(&[2.0, 5.0, 1.0, 4.0]).unwrap();
        assert_eq!(
            select_experts(&logits, 2, ExpertLayout::PerRow),
            ExpertSelection::Flat(vec![1, 3])
        );
    }

    #[test]
    fn softmax_sums_to_one_and_survives_large_logits() {
        let probs = softmax(&[1000.0, 1001.0, 999.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(probs[1] > probs[0] && probs[0] > probs[2]);
    }

    #[test]
    fn ties_keep_index_order() {
        assert_eq!(top_k_indices(&[0.25, 0.5, 0.25, 0.5], 3), vec![1, 3, 0]);
    }

    #[test]
    fn positive_infinity_takes_all_mass() {
        let probs = softmax(&[0.0, f32::INFINITY, 1.0, f32::INFINITY]);
        assert_eq!(probs, vec![0.0, 0.5, 0.0, 0.5]);

        let logits = RoutingLogits::from_scores(&[0.0, f32::INFINITY, 1.0]).unwrap();
        assert_eq!(
            select_experts(&logits, 1, ExpertLayout::PerRow),
            ExpertSelection::Flat(vec![1])
        );
        assert_eq!(
            select_experts(&logits, 3, ExpertLayout::PerRow),
            ExpertSelection::Flat(vec![1, 0, 2])
        );
    }

    #[test]
    fn negative_infinity_is_never_preferred() {
        let logits =
            RoutingLogits::from_scores(&[f32::NEG_INFINITY, -3.0, f32::NEG_INFINITY]).unwrap();
        assert_eq!(
            select_experts(&logits, 2, ExpertLayout::PerRow),
            ExpertSelection::Flat(vec![1, 0])
        );
    }

    #[test]
    fn all_negative_infinity_row_is_uniform() {
        let row = [f32::NEG_INFINITY; 4];
        assert_eq!(softmax(&row), vec![0.25; 4]);
        let logits = RoutingLogits::from_scores(&row).unwrap();
        assert_eq!(
            select_experts(&logits, 2, ExpertLayout::PerRow),
            ExpertSelection::Flat(vec![0, 1])
        );
    }

    #[test]
    fn nan_ranks_first_in_top_k() {
        assert_eq!(top_k_indices(&[0.3, f32::NAN, 0.7], 2), vec![1, 2]);
    }

    #[test]
    fn k_past_row_length_selects_whole_row() {
        assert_eq!(top_k_indices(&[0.1, 0.9], 5), vec![1, 0]);
    }

    #[test]
    fn batched_rows_nest_per_row() {
        let logits = RoutingLogits::from_rows(&[[0.0, 3.0, 1.0], [2.0, 0.0, 1.0]]).unwrap();
        assert_eq!(
            select_experts(&logits, 2, ExpertLayout::PerRow),
            ExpertSelection::Batched(vec![vec![1, 2], vec![0, 2]])
        );
    }

    #[test]
    fn squeeze_batch_unwraps_single_row() {
        let logits = RoutingLogits::from_rows(&[[0.0, 3.0, 1.0]]).unwrap();
        assert_eq!(
            select_experts(&logits, 1, ExpertLayout::SqueezeBatch),
            ExpertSelection::Flat(vec![1])
        );
        assert!(ExpertLayout::SqueezeBatch.validate(&logits).is_ok());

        let wide = RoutingLogits::from_rows(&[[0.0, 1.0], [1.0, 0.0]]).unwrap();
        assert!(matches!(
            ExpertLayout::SqueezeBatch.validate(&wide),
            Err(TraceError::InvalidShape { .. })
        ));
        assert!(ExpertLayout::PerRow.validate(&wide).is_ok());
    }

    #[test]
    fn top_k_bounds() {
        let logits = RoutingLogits::from_scores(&[1.0, 2.0]).unwrap();
        assert!(validate_top_k(&logits, 1).is_ok());
        assert!(validate_top_k(&logits, 2).is_ok());
        assert!(matches!(
            validate_top_k(&logits, 0),
            Err(TraceError::InvalidTopK { k: 0, num_experts: 2 })
        ));
        assert!(validate_top_k(&logits, 3).is_err());
    }

    #[test]
    fn selections_serialize_as_plain_lists() {
        let flat = serde_json::to_string(&ExpertSelection::Flat(vec![1, 3])).unwrap();
        assert_eq!(flat, "[1,3]");
        let batched = serde_json::to_string(&ExpertSelection::Batched(vec![vec![0], vec![2]])).unwrap();
        assert_eq!(batched, "[[0],[2]]");
        let back: ExpertSelection = serde_json::from_str("[[0],[2]]").unwrap();
        assert_eq!(back, ExpertSelection::Batched(vec![vec![0], vec![2]]));
    }
}
