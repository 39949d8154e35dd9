//! Persisted trace log schema.
//!
//! ```json
//! {"records": [{"model_name": "...", "time": "...", "phase": "...", "experts": [[1, 3]]}]}
//! ```

use serde::{Deserialize, Serialize};

use crate::selection::ExpertSelection;

/// One flushed trace window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushedRecord {
    pub model_name: String,
    /// Local wall-clock time of the flush, human readable.
    pub time: String,
    pub phase: String,
    /// One entry per routing decision, in recording order.
    pub experts: Vec<ExpertSelection>,
}

/// The whole log file: records in flush order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TraceLog {
    pub records: Vec<FlushedRecord>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: FlushedRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn from_json_slice(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json_vec(&self, pretty: bool) -> crate::Result<Vec<u8>> {
        let bytes = if pretty {
            serde_json::to_vec_pretty(self)?
        } else {
            serde_json::to_vec(self)?
        };
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_log_written_by_other_tools() {
        let raw = br#"{"records": [{"model_name": "mixtral", "time": "2024-05-01 10:00:00.000001",
            "phase": "prefill", "experts": [[1, 3], [[0, 2], [2, 1]]]}]}"#;
        let log = TraceLog::from_json_slice(raw).unwrap();
        assert_eq!(log.len(), 1);
        let record = &log.records[0];
        assert_eq!(record.phase, "prefill");
        assert_eq!(record.experts[0], ExpertSelection::Flat(vec![1, 3]));
        assert_eq!(
            record.experts[1],
            ExpertSelection::Batched(vec![vec![0, 2], vec![2, 1]])
        );
    }

    #[test]
    fn missing_records_key_is_rejected() {
        assert!(TraceLog::from_json_slice(br#"{"entries": []}"#).is_err());
        assert!(TraceLog::from_json_slice(b"not json").is_err());
    }

    #[test]
    fn compact_encoding_uses_expected_keys() {
        let mut log = TraceLog::new();
        log.push(FlushedRecord {
            model_name: "m".to_string(),
            time: "t".to_string(),
            phase: "decode".to_string(),
            experts: vec![ExpertSelection::Flat(vec![2])],
        });
        let json = String::from_utf8(log.to_json_vec(false).unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"records":[{"model_name":"m","time":"t","phase":"decode","experts":[[2]]}]}"#
        );
    }
}
