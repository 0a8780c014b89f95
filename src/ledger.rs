//! Trade ledger - append-only outcome records
//!
//! Write-only from the pipeline's perspective: decisions never read the
//! ledger back, they derive from positions, risk state and snapshots.
//! The dashboard layer and the strategy performance tracker consume it.

use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::warn;

use crate::core::{OutcomeRecord, Result};

/// Append-only trade log with an optional JSONL file sink.
pub struct TradeLedger {
    records: RwLock<Vec<OutcomeRecord>>,
    sink: Option<Mutex<File>>,
}

impl TradeLedger {
    /// In-memory only.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            sink: None,
        }
    }

    /// Backed by an append-only JSONL file.
    pub fn with_file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            records: RwLock::new(Vec::new()),
            sink: Some(Mutex::new(file)),
        })
    }

    /// Append one outcome record. A failed file write is logged but never
    /// fails the trading cycle.
    pub fn append(&self, record: OutcomeRecord) {
        if let Some(sink) = &self.sink {
            match serde_json::to_string(&record) {
                Ok(line) => {
                    let mut file = sink.lock();
                    if let Err(e) = writeln!(file, "{line}") {
                        warn!(error = %e, "trade log write failed");
                    }
                }
                Err(e) => warn!(error = %e, "trade log serialization failed"),
            }
        }
        self.records.write().push(record);
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<OutcomeRecord> {
        self.records.read().clone()
    }

    /// The most recent `n` records, newest first.
    pub fn recent(&self, n: usize) -> Vec<OutcomeRecord> {
        let records = self.records.read();
        records.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for TradeLedger {
    fn default() -> Self {
        Self::new()
    }
}
