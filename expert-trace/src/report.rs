//! Summaries of a trace log, grouped by model and phase.
//!
//! Reads the log strictly: a report over a corrupt file is an error, unlike a
//! flush, which discards it.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use expert_trace_core::record::TraceLog;
use expert_trace_core::Result;

use crate::log_file;

/// Expert usage for one `(model_name, phase)` pair.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PhaseSummary {
    pub model_name: String,
    pub phase: String,
    /// Flushed records contributing to this summary
    pub records: usize,
    /// Routing decisions across those records
    pub decisions: usize,
    /// Token-level selections per expert index
    pub expert_counts: BTreeMap<u32, u64>,
}

impl PhaseSummary {
    /// Most frequently selected expert; the lowest index wins ties.
    pub fn hottest_expert(&self) -> Option<(u32, u64)> {
        self.expert_counts
            .iter()
            .fold(None, |best: Option<(u32, u64)>, (&expert, &count)| match best {
                Some((_, top)) if top >= count => best,
                _ => Some((expert, count)),
            })
    }

    pub fn total_selections(&self) -> u64 {
        self.expert_counts.values().sum()
    }
}

pub fn load_log(path: impl AsRef<Path>) -> Result<TraceLog> {
    log_file::read_strict(path.as_ref())
}

/// Group records by `(model_name, phase)` in order of first appearance.
pub fn summarize(log: &TraceLog) -> Vec<PhaseSummary> {
    let mut summaries: Vec<PhaseSummary> = Vec::new();

    for record in &log.records {
        let pos = summaries
            .iter()
            .position(|s| s.model_name == record.model_name && s.phase == record.phase);
        let summary = match pos {
            Some(i) => &mut summaries[i],
            None => {
                summaries.push(PhaseSummary {
                    model_name: record.model_name.clone(),
                    phase: record.phase.clone(),
                    records: 0,
                    decisions: 0,
                    expert_counts: BTreeMap::new(),
                });
                let last = summaries.len() - 1;
                &mut summaries[last]
            }
        };

        summary.records += 1;
        summary.decisions += record.experts.len();
        for selection in &record.experts {
            for &expert in selection.rows().flatten() {
                *summary.expert_counts.entry(expert).or_insert(0) += 1;
            }
        }
    }

    summaries
}

pub fn render_text(summaries: &[PhaseSummary]) -> String {
    let mut out = String::new();
    if summaries.is_empty() {
        out.push_str("no expert trace records\n");
        return out;
    }

    for s in summaries {
        let _ = writeln!(
            out,
            "{} / {}: {} records, {} decisions, {} selections",
            s.model_name,
            s.phase,
            s.records,
            s.decisions,
            s.total_selections()
        );
        if let Some((expert, count)) = s.hottest_expert() {
            let _ = writeln!(out, "  hottest expert: {expert} ({count})");
        }
        for (expert, count) in &s.expert_counts {
            let _ = writeln!(out, "  expert {expert:>4}: {count}");
        }
    }
    out
}

/// Load `path` and render its summary as text, or as pretty JSON when `json`.
pub fn generate_report(path: impl AsRef<Path>, json: bool) -> Result<String> {
    let log = load_log(path)?;
    let summaries = summarize(&log);
    if json {
        let mut out = serde_json::to_string_pretty(&summaries)?;
        out.push('\n');
        Ok(out)
    } else {
        Ok(render_text(&summaries))
    }
}
