//! Burn framework integration
//!
//! Gate outputs computed with Burn can be handed to the tracer directly.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use expert_trace_core::logits::RoutingLogits;
use expert_trace_core::{Result, TraceError};

/// Copy a float tensor to host memory as routing logits.
///
/// Accepts rank 1 (`[num_experts]`) or rank 2 (`[batch, num_experts]`)
/// tensors of any float element type.
pub fn logits_from_tensor<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<RoutingLogits> {
    let shape = tensor.dims().to_vec();
    let data = tensor.into_data().convert::<f32>();
    let values = data.to_vec::<f32>().map_err(|_| TraceError::InvalidShape {
        shape: shape.clone(),
        reason: "tensor elements are not convertible to f32",
    })?;
    RoutingLogits::new(shape, values)
}
