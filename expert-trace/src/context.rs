//! Per-execution-unit trace state: arm, record, flush.
//!
//! Guards never fail loudly. An unarmed context, a device switch, or an empty
//! window turns the call into [`TraceOutcome::Skipped`] so that tracing calls
//! can stay in hot paths unconditionally.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};

use expert_trace_core::device::{DeviceId, DeviceProbe, ThreadDevice};
use expert_trace_core::logits::RoutingLogits;
use expert_trace_core::record::FlushedRecord;
use expert_trace_core::selection::{select_experts, validate_top_k};
use expert_trace_core::Result;

use crate::log_file;
use crate::TracerConfig;

/// Format of `FlushedRecord::time`.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Wall-clock source for flush timestamps.
pub type Clock = fn() -> NaiveDateTime;

/// Local wall-clock time.
pub fn local_clock() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Why a call left the context untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `ready()` was never called on this context.
    NotArmed,
    /// The active device differs from the one captured when the window opened.
    DeviceMismatch { owner: DeviceId, current: DeviceId },
    /// Nothing was recorded since the last flush.
    NothingRecorded,
}

/// Result of a successful `add`/`dump` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOutcome {
    /// The routing decision joined the pending window.
    Recorded,
    /// The window was appended to the log and cleared.
    Flushed {
        /// Routing decisions in the flushed record
        decisions: usize,
        /// Records in the log after the flush
        records_in_log: usize,
    },
    /// A guard turned the call into a no-op.
    Skipped(SkipReason),
}

/// Trace state owned by one execution unit.
pub struct TraceContext {
    armed: bool,
    owner_device: DeviceId,
    model_name: Option<String>,
    top_k: usize,
    pending: Vec<RoutingLogits>,
    config: TracerConfig,
    probe: Arc<dyn DeviceProbe>,
    clock: Clock,
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceContext")
            .field("armed", &self.armed)
            .field("owner_device", &self.owner_device)
            .field("model_name", &self.model_name)
            .field("top_k", &self.top_k)
            .field("pending", &self.pending.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TraceContext {
    /// Context that reads the device bound to the calling OS thread.
    pub fn new(config: TracerConfig) -> Self {
        Self::with_probe(config, Arc::new(ThreadDevice))
    }

    pub fn with_probe(config: TracerConfig, probe: Arc<dyn DeviceProbe>) -> Self {
        let owner_device = probe.current_device();
        let mut ctx = Self {
            armed: false,
            owner_device,
            model_name: None,
            top_k: 1,
            pending: Vec::new(),
            config,
            probe,
            clock: local_clock,
        };
        ctx.clear();
        ctx
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Arm the context. Until armed, `add` and `dump` do nothing.
    pub fn ready(&mut self) {
        self.armed = true;
    }

    /// Record one routing decision.
    ///
    /// `model_name` and `k` overwrite the values of earlier calls in the same
    /// window. Errors only when the decision itself is malformed (`k` outside
    /// `1..=num_experts`, or a batch the configured layout cannot flatten).
    pub fn add(
        &mut self,
        model_name: impl Into<String>,
        logits: RoutingLogits,
        k: usize,
    ) -> Result<TraceOutcome> {
        if !self.armed {
            tracing::trace!("expert trace add skipped: context not armed");
            return Ok(TraceOutcome::Skipped(SkipReason::NotArmed));
        }
        if let Some(reason) = self.device_mismatch() {
            tracing::trace!(?reason, "expert trace add skipped");
            return Ok(TraceOutcome::Skipped(reason));
        }

        validate_top_k(&logits, k)?;
        self.config.layout.validate(&logits)?;

        self.model_name = Some(model_name.into());
        self.top_k = k;
        self.pending.push(logits);
        Ok(TraceOutcome::Recorded)
    }

    /// Append the pending window to the JSON log at `path` and clear it.
    ///
    /// Existing content of the log is kept; a log that is unreadable or lacks
    /// a `records` array is replaced by an empty one. Write errors are
    /// returned and leave the window pending.
    pub fn dump(&mut self, path: impl AsRef<Path>, phase: &str) -> Result<TraceOutcome> {
        if let Some(reason) = self.device_mismatch() {
            tracing::trace!(?reason, "expert trace dump skipped");
            return Ok(TraceOutcome::Skipped(reason));
        }
        let Some(model_name) = self.model_name.clone() else {
            return Ok(TraceOutcome::Skipped(SkipReason::NothingRecorded));
        };
        if !self.armed {
            return Ok(TraceOutcome::Skipped(SkipReason::NotArmed));
        }

        let path = path.as_ref();
        let mut log = log_file::read_or_default(path);

        let experts = self
            .pending
            .iter()
            .map(|logits| select_experts(logits, self.top_k, self.config.layout))
            .collect();
        let records_in_log = log.push(&FlushedRecord {
            model_name,
            time: (self.clock)().format(TIME_FORMAT).to_string(),
            phase: phase.to_string(),
            experts,
        })?;

        log_file::write(path, &log, &self.config)?;

        let decisions = self.pending.len();
        tracing::debug!(
            path = %path.display(),
            phase,
            decisions,
            records_in_log,
            "flushed expert trace"
        );

        self.clear();
        Ok(TraceOutcome::Flushed {
            decisions,
            records_in_log,
        })
    }

    /// Drop the pending window and re-capture the owning device.
    pub fn clear(&mut self) {
        self.model_name = None;
        self.top_k = 1;
        self.pending.clear();
        self.owner_device = self.probe.current_device();
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn owner_device(&self) -> DeviceId {
        self.owner_device
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    fn device_mismatch(&self) -> Option<SkipReason> {
        let current = self.probe.current_device();
        (current != self.owner_device).then_some(SkipReason::DeviceMismatch {
            owner: self.owner_device,
            current,
        })
    }
}
