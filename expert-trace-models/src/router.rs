//! Reference MoE gate.
//!
//! Useful for driving the tracer in tests and demos without a real model.

use expert_trace_core::logits::RoutingLogits;
use expert_trace_core::{Result, TraceError};

/// A linear gate: `logits = hidden @ weights^T`.
#[derive(Debug, Clone)]
pub struct LinearRouter {
    /// Gate weights, `[num_experts, hidden_dim]` row-major
    pub weights: Vec<f32>,
    /// Hidden state width
    pub hidden_dim: usize,
    /// Number of experts scored per token
    pub num_experts: usize,
}

impl LinearRouter {
    /// Create a zero-initialized gate
    pub fn new(hidden_dim: usize, num_experts: usize) -> Self {
        Self {
            weights: vec![0.0; hidden_dim * num_experts],
            hidden_dim,
            num_experts,
        }
    }

    /// Fill the gate with seeded weights in `[-0.5, 0.5)`.
    ///
    /// The same seed always yields the same gate, so demo traces are stable
    /// across runs.
    pub fn with_random_init(mut self, seed: u64) -> Self {
        let mut stream = SplitMix64(seed);
        for w in self.weights.iter_mut() {
            *w = stream.next_unit() - 0.5;
        }
        self
    }

    /// Load gate weights, `[num_experts, hidden_dim]` row-major
    pub fn load_weights(&mut self, weights: &[f32]) -> Result<()> {
        if weights.len() != self.weights.len() {
            return Err(TraceError::InvalidShape {
                shape: vec![self.num_experts, self.hidden_dim],
                reason: "weight count does not match gate shape",
            });
        }
        self.weights.copy_from_slice(weights);
        Ok(())
    }

    /// Score `batch` tokens (`hidden` is `[batch, hidden_dim]` row-major).
    pub fn route(&self, hidden: &[f32], batch: usize) -> Result<RoutingLogits> {
        if hidden.len() != batch * self.hidden_dim {
            return Err(TraceError::InvalidShape {
                shape: vec![batch, self.hidden_dim],
                reason: "hidden state length does not match batch",
            });
        }
        let mut logits: Vec<f32> = Vec::with_capacity(batch * self.num_experts);
        for token in hidden.chunks_exact(self.hidden_dim.max(1)) {
            for expert in self.weights.chunks_exact(self.hidden_dim.max(1)) {
                logits.push(token.iter().zip(expert).map(|(h, w)| h * w).sum::<f32>());
            }
        }
        RoutingLogits::new(vec![batch, self.num_experts], logits)
    }
}

/// SplitMix64 stream; 24 high bits feed each `f32` so every value is exact.
struct SplitMix64(u64);

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn next_unit(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u32 << 24) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expert_trace_core::selection::{select_experts, ExpertLayout, ExpertSelection};

    #[test]
    fn identity_gate_routes_to_largest_feature() {
        let mut router = LinearRouter::new(3, 3);
        router
            .load_weights(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
            .unwrap();
        let logits = router.route(&[0.1, 0.9, 0.3, 0.7, 0.2, 0.1], 2).unwrap();
        assert_eq!(logits.shape(), &[2, 3]);
        assert_eq!(
            select_experts(&logits, 1, ExpertLayout::PerRow),
            ExpertSelection::Batched(vec![vec![1], vec![0]])
        );
    }

    #[test]
    fn random_init_is_deterministic() {
        let a = LinearRouter::new(4, 8).with_random_init(7);
        let b = LinearRouter::new(4, 8).with_random_init(7);
        assert_eq!(a.weights, b.weights);
        assert!(a.weights.iter().all(|w| (-0.5..0.5).contains(w)));

        let c = LinearRouter::new(4, 8).with_random_init(8);
        assert_ne!(a.weights, c.weights);
    }

    #[test]
    fn mismatched_hidden_is_rejected() {
        let router = LinearRouter::new(4, 2);
        assert!(router.route(&[0.0; 5], 1).is_err());
        let mut router = router;
        assert!(router.load_weights(&[0.0; 3]).is_err());
    }
}
