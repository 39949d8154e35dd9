//! # Expert Trace Core
//!
//! Core types for recording which experts a mixture-of-experts routing layer
//! selected.
//!
//! This crate provides:
//! - Device identity and the [`device::DeviceProbe`] seam
//! - Validated routing-logit tensors
//! - Expert selection (softmax + top-k)
//! - The persisted trace log schema

#![forbid(unsafe_code)]

pub mod device;
pub mod logits;
pub mod record;
pub mod selection;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::device::*;
    pub use crate::logits::RoutingLogits;
    pub use crate::record::*;
    pub use crate::selection::*;
}

/// Result type for expert trace operations
pub type Result<T> = core::result::Result<T, TraceError>;

/// Error type for expert trace operations
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// Reading or writing a trace log failed
    #[error("trace log i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding or decoding a trace log failed
    #[error("trace log json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Routing logits do not have a supported shape
    #[error("invalid routing logits shape {shape:?}: {reason}")]
    InvalidShape {
        /// Offending shape
        shape: Vec<usize>,
        /// What is wrong with it
        reason: &'static str,
    },
    /// Requested top-k is outside `1..=num_experts`
    #[error("top-k {k} is out of range for {num_experts} experts")]
    InvalidTopK {
        /// Requested k
        k: usize,
        /// Experts available in the routing decision
        num_experts: usize,
    },
    /// A trace context lock was poisoned by a panicking holder
    #[error("trace context lock poisoned")]
    ContextPoisoned,
}
