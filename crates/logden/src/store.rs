//! Per-day relational store.
//!
//! Each calendar day (local time) owns one SQLite file named
//! `yyyy_mm_dd.db` under `<base>/DB/Log/`. Opening a store creates the
//! directory, the file, and the schema idempotently; the query path opens
//! existing files only and treats a missing day as "no data", not an error.
//!
//! A connection is owned exclusively by whoever opened it: the flush worker
//! for one flush, or a single query call for one page.

use crate::error::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

/// File extension of a day-store file.
pub const DAY_FILE_EXTENSION: &str = "db";

/// Prefix of quarantine sidecar files, shared with the flush worker.
pub const QUARANTINE_PREFIX: &str = "Error";

const DAY_FILE_FORMAT: &str = "%Y_%m_%d";

/// Connection pragmas applied on every open.
const PRAGMAS: &str = "\
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";

/// Schema for a day-store. Satellites carry UNIQUE natural keys; dedup
/// correctness depends on the store enforcing them.
const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS Formats (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    FormatString TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS Arguments (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    Value TEXT UNIQUE
);

CREATE TABLE IF NOT EXISTS CallerInfos (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    MemberName TEXT,
    SourceFilePath TEXT,
    SourceLineNumber INTEGER,
    UNIQUE(MemberName, SourceFilePath, SourceLineNumber)
);

CREATE TABLE IF NOT EXISTS Logs (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    Level INTEGER NOT NULL,
    FormatId INTEGER NOT NULL REFERENCES Formats(Id),
    CallerInfoId INTEGER REFERENCES CallerInfos(Id),
    Arg0Id INTEGER REFERENCES Arguments(Id),
    Arg1Id INTEGER REFERENCES Arguments(Id),
    Arg2Id INTEGER REFERENCES Arguments(Id),
    Arg3Id INTEGER REFERENCES Arguments(Id),
    Arg4Id INTEGER REFERENCES Arguments(Id),
    Arg5Id INTEGER REFERENCES Arguments(Id),
    Arg6Id INTEGER REFERENCES Arguments(Id),
    Arg7Id INTEGER REFERENCES Arguments(Id),
    Arg8Id INTEGER REFERENCES Arguments(Id),
    Arg9Id INTEGER REFERENCES Arguments(Id),
    CreatedTick INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS LogIntervalStats (
    IntervalStart INTEGER PRIMARY KEY,
    LogCount INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS Idx_Logs_Level ON Logs(Level);
CREATE INDEX IF NOT EXISTS Idx_Logs_CreatedTick ON Logs(CreatedTick);
CREATE INDEX IF NOT EXISTS Idx_Logs_FormatId ON Logs(FormatId);
CREATE INDEX IF NOT EXISTS Idx_Logs_CallerInfoId ON Logs(CallerInfoId);
CREATE INDEX IF NOT EXISTS Idx_Logs_Arg0Id ON Logs(Arg0Id);
CREATE INDEX IF NOT EXISTS Idx_Logs_Arg1Id ON Logs(Arg1Id);
CREATE INDEX IF NOT EXISTS Idx_Logs_Arg2Id ON Logs(Arg2Id);
CREATE INDEX IF NOT EXISTS Idx_Logs_Arg3Id ON Logs(Arg3Id);
CREATE INDEX IF NOT EXISTS Idx_Logs_Arg4Id ON Logs(Arg4Id);
CREATE INDEX IF NOT EXISTS Idx_Logs_Arg5Id ON Logs(Arg5Id);
CREATE INDEX IF NOT EXISTS Idx_Logs_Arg6Id ON Logs(Arg6Id);
CREATE INDEX IF NOT EXISTS Idx_Logs_Arg7Id ON Logs(Arg7Id);
CREATE INDEX IF NOT EXISTS Idx_Logs_Arg8Id ON Logs(Arg8Id);
CREATE INDEX IF NOT EXISTS Idx_Logs_Arg9Id ON Logs(Arg9Id);
CREATE INDEX IF NOT EXISTS Idx_Logs_Id_CreatedTick ON Logs(Id, CreatedTick);
";

/// Returns the store directory for a base directory: `<base>/DB/Log`.
pub fn store_dir(base_dir: impl AsRef<Path>) -> PathBuf {
    base_dir.as_ref().join("DB").join("Log")
}

/// An open per-day store file.
pub struct DayStore {
    conn: Connection,
    path: PathBuf,
    date: NaiveDate,
}

impl DayStore {
    /// Opens (creating if needed) the store for `date` under `dir`.
    ///
    /// Schema creation is idempotent; re-opening an existing file is cheap.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be opened or migrated.
    pub fn open(dir: impl AsRef<Path>, date: NaiveDate) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(Self::file_name(date));
        let conn = Connection::open(&path)?;
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path, date })
    }

    /// Opens the store for `date` only if its file already exists.
    ///
    /// The query path uses this so asking about a day that never logged
    /// anything yields an empty page instead of creating an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error only for a real open failure, never for absence.
    pub fn open_existing(dir: impl AsRef<Path>, date: NaiveDate) -> Result<Option<Self>> {
        let path = dir.as_ref().join(Self::file_name(date));
        if !path.is_file() {
            return Ok(None);
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(PRAGMAS)?;
        Ok(Some(Self { conn, path, date }))
    }

    /// Builds a day-store file name, e.g. `2026_08_02.db`.
    pub fn file_name(date: NaiveDate) -> String {
        format!("{}.{}", date.format(DAY_FILE_FORMAT), DAY_FILE_EXTENSION)
    }

    /// Parses a day-store file name back into its date.
    pub fn parse_file_name(name: &str) -> Option<NaiveDate> {
        let stem = name.strip_suffix(&format!(".{DAY_FILE_EXTENSION}"))?;
        NaiveDate::parse_from_str(stem, DAY_FILE_FORMAT).ok()
    }

    /// The date this store covers.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// Returns true if a day-store file exists for `date` under `base_dir`.
pub fn log_file_exists(base_dir: impl AsRef<Path>, date: NaiveDate) -> bool {
    store_dir(base_dir).join(DayStore::file_name(date)).is_file()
}

/// Lists the dates that have a day-store file under `base_dir`, sorted
/// ascending. A missing store directory is an empty listing.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn list_log_files(base_dir: impl AsRef<Path>) -> Result<Vec<NaiveDate>> {
    let dir = store_dir(base_dir);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut dates = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if let Some(date) = DayStore::parse_file_name(file_name) {
            dates.push(date);
        }
    }

    dates.sort();
    Ok(dates)
}
