//! # Expert Trace
//!
//! **Debug-only tracer for mixture-of-experts routing decisions.**
//!
//! A serving engine calls into the tracer at two points: once per routing
//! decision ([`TraceContext::add`]) and once per phase boundary
//! ([`TraceContext::dump`]). Each execution unit (OS thread, or a task on a
//! cooperative scheduler) owns its own [`TraceContext`]; the
//! [`TraceRegistry`] hands them out lazily. A flush appends one record to a
//! JSON log:
//!
//! ```json
//! {"records": [{"model_name": "mixtral", "time": "2024-05-01 10:00:00.000001",
//!               "phase": "decode", "experts": [[1, 3], [0, 2]]}]}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use expert_trace::prelude::*;
//!
//! # fn main() -> expert_trace::Result<()> {
//! let tracer = expert_tracer();
//! tracer.ready()?;
//!
//! let logits = RoutingLogits::from_scores(&[2.0, 5.0, 1.0, 4.0])?;
//! tracer.add("mixtral", logits, 2)?;
//! tracer.dump("expert_trace.json", "decode")?;
//! # Ok(())
//! # }
//! ```
//!
//! Calls are silent no-ops until [`TraceRegistry::ready`] arms the calling
//! thread, and records produced on a device other than the one captured when
//! the window opened are ignored.
//!
//! ## Feature Flags
//!
//! - `burn-backend` (default): accept Burn tensors via
//!   [`models::burn_integration`]
//!
//! ## Crate Structure
//!
//! - [`expert_trace_core`]: devices, logits, selection, log schema
//! - [`expert_trace_models`]: reference gate and backend integrations

#![forbid(unsafe_code)]

// Re-export sub-crates
pub use expert_trace_core as core;
pub use expert_trace_models as models;

pub use expert_trace_core::{
    device::{self, set_current_device, DeviceId, DeviceProbe, FixedDevice, ThreadDevice},
    logits::RoutingLogits,
    record::{FlushedRecord, TraceLog},
    selection::{ExpertLayout, ExpertSelection},
    Result, TraceError,
};

pub mod context;
pub mod log_file;
pub mod registry;

/// Offline summary of trace logs.
pub mod report;

pub use context::{SkipReason, TraceContext, TraceOutcome};
pub use registry::{expert_tracer, init_expert_tracer, ExecutionKey, TraceRegistry};

/// Prelude module for convenient imports
///
/// ```rust,ignore
/// use expert_trace::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::prelude::*;
    pub use crate::models::prelude::*;

    pub use crate::{
        expert_tracer, ExecutionKey, SkipReason, TraceContext, TraceOutcome, TraceRegistry,
        TracerConfig,
    };
}

/// Tracer configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// How batched routing decisions are flattened in the log
    pub layout: ExpertLayout,
    /// Pretty-print the log instead of compact JSON
    pub pretty: bool,
    /// Create missing parent directories of the log path on flush
    pub create_parent_dirs: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            layout: ExpertLayout::PerRow,
            pretty: false,
            create_parent_dirs: true,
        }
    }
}

impl TracerConfig {
    /// Create a new builder
    pub fn builder() -> TracerConfigBuilder {
        TracerConfigBuilder::new()
    }
}

/// Builder for TracerConfig
#[derive(Debug, Default)]
pub struct TracerConfigBuilder {
    config: TracerConfig,
}

impl TracerConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expert layout
    pub fn layout(mut self, layout: ExpertLayout) -> Self {
        self.config.layout = layout;
        self
    }

    /// Pretty-print flushed logs
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.config.pretty = pretty;
        self
    }

    /// Create missing parent directories on flush
    pub fn create_parent_dirs(mut self, create: bool) -> Self {
        self.config.create_parent_dirs = create;
        self
    }

    /// Build the configuration
    pub fn build(self) -> TracerConfig {
        self.config
    }
}
