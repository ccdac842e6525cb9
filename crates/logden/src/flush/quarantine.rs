//! Quarantine sink for batches that failed to flush.
//!
//! A failed batch is dropped from the in-memory pipeline but not lost
//! silently: the sink writes a machine-readable JSON sidecar with the full
//! batch and appends a human-readable summary line set to a per-day text
//! file, both in the store directory. Every write here is best-effort;
//! inner failures are swallowed so a broken disk cannot cascade into the
//! worker loop.

use crate::error::LogError;
use crate::model::Log;
use crate::store::QUARANTINE_PREFIX;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::error::Error as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Structured record persisted for one quarantined batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineRecord {
    /// Flush date of the failed batch.
    pub date: NaiveDate,
    /// Message of the error that aborted the flush.
    pub exception_message: String,
    /// The full batch, in the order it would have been persisted.
    pub logs: Vec<Log>,
}

/// Persists failed batches plus error detail to sidecar files.
#[derive(Debug, Clone)]
pub struct QuarantineSink {
    dir: PathBuf,
}

impl QuarantineSink {
    /// Creates a sink writing into the given store directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes both sidecars for a failed batch.
    ///
    /// Never returns an error: failures are logged and swallowed so the
    /// worker can proceed to the next flush.
    pub fn quarantine(&self, date: NaiveDate, logs: Vec<Log>, error: &LogError) {
        let json_name = format!(
            "{}_{}.{}.json",
            QUARANTINE_PREFIX,
            date.format("%Y_%m_%d"),
            Uuid::new_v4()
        );

        let record = QuarantineRecord {
            date,
            exception_message: error.to_string(),
            logs,
        };
        if let Err(err) = self.write_json(&json_name, &record) {
            warn!("Failed to write quarantine record {}: {:?}", json_name, err);
        }
        if let Err(err) = self.append_summary(date, &json_name, &record, error) {
            warn!("Failed to append quarantine summary: {:?}", err);
        }
    }

    fn write_json(&self, name: &str, record: &QuarantineRecord) -> Result<(), LogError> {
        fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_vec_pretty(record)?;
        fs::write(self.dir.join(name), body)?;
        Ok(())
    }

    fn append_summary(
        &self,
        date: NaiveDate,
        json_name: &str,
        record: &QuarantineRecord,
        error: &LogError,
    ) -> Result<(), LogError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.summary_path(date);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(
            file,
            "[{}] quarantined batch of {} logs",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.logs.len()
        )?;
        writeln!(file, "file: {json_name}")?;
        writeln!(file, "error: {}", record.exception_message)?;
        if let Some(source) = error.source() {
            writeln!(file, "source: {source}")?;
        }
        Ok(())
    }

    /// Path of the per-day human-readable summary file.
    pub fn summary_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.txt",
            QUARANTINE_PREFIX,
            date.format("%Y_%m_%d")
        ))
    }

    /// The directory this sink writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
