//! Trace log persistence (read-modify-write of a single JSON document).
//!
//! The log is rewritten in full on every flush. Concurrent flushes to one path
//! from different execution units race and the last writer wins; callers that
//! care serialize flushes themselves.
//!
//! Flushing only requires the document to be an object with a `records`
//! array. Everything else in it (extra keys, records written by other tools)
//! is carried over untouched.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

use expert_trace_core::record::{FlushedRecord, TraceLog};
use expert_trace_core::Result;

use crate::TracerConfig;

const RECORDS_KEY: &str = "records";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A trace log as found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LogDocument {
    root: Map<String, Value>,
}

impl Default for LogDocument {
    fn default() -> Self {
        let mut root = Map::new();
        root.insert(RECORDS_KEY.to_string(), Value::Array(Vec::new()));
        Self { root }
    }
}

impl LogDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `value` if it is an object holding a `records` array.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(root) if root.get(RECORDS_KEY).is_some_and(Value::is_array) => {
                Some(Self { root })
            }
            _ => None,
        }
    }

    pub fn records(&self) -> &[Value] {
        self.root
            .get(RECORDS_KEY)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Append `record`, returning the record count afterwards.
    pub fn push(&mut self, record: &FlushedRecord) -> Result<usize> {
        let value = serde_json::to_value(record)?;
        match self.root.get_mut(RECORDS_KEY) {
            Some(Value::Array(records)) => {
                records.push(value);
                Ok(records.len())
            }
            _ => {
                self.root
                    .insert(RECORDS_KEY.to_string(), Value::Array(vec![value]));
                Ok(1)
            }
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn to_json_vec(&self, pretty: bool) -> Result<Vec<u8>> {
        let bytes = if pretty {
            serde_json::to_vec_pretty(&self.root)?
        } else {
            serde_json::to_vec(&self.root)?
        };
        Ok(bytes)
    }
}

/// Load the log at `path`, or an empty log if it is missing, unreadable, or
/// has no `records` array.
pub fn read_or_default(path: &Path) -> LogDocument {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return LogDocument::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "expert trace log unreadable, starting fresh");
            return LogDocument::new();
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => LogDocument::from_value(value).unwrap_or_else(|| {
            tracing::warn!(path = %path.display(), "expert trace log has no records array, starting fresh");
            LogDocument::new()
        }),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "discarding corrupt expert trace log");
            LogDocument::new()
        }
    }
}

/// Load the log at `path` into the typed schema, failing on missing or
/// malformed content.
pub fn read_strict(path: &Path) -> Result<TraceLog> {
    let bytes = fs::read(path)?;
    TraceLog::from_json_slice(&bytes)
}

/// Replace the log at `path` with `doc`.
pub fn write(path: &Path, doc: &LogDocument, config: &TracerConfig) -> Result<()> {
    let bytes = doc.to_json_vec(config.pretty)?;
    if config.create_parent_dirs {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
    }
    atomic_write(path, &bytes)?;
    Ok(())
}

/// Sibling temp path unique to this process and call.
fn tmp_path_for(path: &Path) -> io::Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name"))?;

    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".{}.{seq}.tmp", std::process::id()));
    Ok(path.with_file_name(tmp_name))
}

fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = tmp_path_for(path)?;

    let written = File::create(&tmp_path).and_then(|mut f| {
        f.write_all(bytes)?;
        f.flush()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}
