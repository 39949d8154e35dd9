//! # Expert Trace Models
//!
//! Gate models and tensor backend integrations for expert tracing.
//!
//! This crate provides:
//! - A reference linear MoE gate producing [`RoutingLogits`]
//! - Conversion from Burn tensors into [`RoutingLogits`]
//!
//! ## Feature Flags
//!
//! - `burn` (default): Burn framework integration
//!
//! [`RoutingLogits`]: expert_trace_core::logits::RoutingLogits

#![forbid(unsafe_code)]

#[cfg(feature = "burn")]
pub mod burn_integration;

pub mod router;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::router::*;

    #[cfg(feature = "burn")]
    pub use crate::burn_integration::*;
}
