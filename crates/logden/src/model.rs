//! Entity model for structured parameterized logs.
//!
//! A [`Log`] carries a printf-like format template with positional
//! placeholders `{0}`..`{9}`, up to ten typed arguments, and optional caller
//! context. Formats, arguments, and caller sites are *satellites*:
//! content-addressed rows shared by every log that carries the same value.
//! The flush worker resolves satellite ids per batch; producers only ever
//! hand over values.
//!
//! Each entity owns its insert SQL so the flush worker can prepare one
//! statement per table and bind rows through it.

use crate::hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of positional argument slots per log.
pub const MAX_ARGUMENTS: usize = 10;

/// Severity of a log entry, integer-coded in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    /// Diagnostic detail.
    Debug,
    /// Routine operational message.
    Info,
    /// Something unexpected but recoverable.
    Warning,
    /// An operation failed.
    Error,
    /// The process is in a degraded or unrecoverable state.
    Critical,
}

impl Level {
    /// Returns the integer code persisted in the store.
    pub fn code(self) -> i64 {
        match self {
            Self::Debug => 0,
            Self::Info => 1,
            Self::Warning => 2,
            Self::Error => 3,
            Self::Critical => 4,
        }
    }

    /// Maps a persisted integer code back to a level.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Debug),
            1 => Some(Self::Info),
            2 => Some(Self::Warning),
            3 => Some(Self::Error),
            4 => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "Debug",
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Critical => "Critical",
        };
        f.write_str(name)
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Debug" => Ok(Self::Debug),
            "Info" => Ok(Self::Info),
            "Warning" => Ok(Self::Warning),
            "Error" => Ok(Self::Error),
            "Critical" => Ok(Self::Critical),
            other => Err(format!("unknown level: {other}")),
        }
    }
}

/// A format template: the content-addressed identity of a log kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    /// Row id in the day-store, `0` until resolved by a flush.
    pub id: i64,
    /// Template with positional placeholders `{0}`..`{9}`, unique per store.
    pub format_string: String,
}

impl Format {
    /// Insert-if-absent statement; the unique key carries dedup.
    pub(crate) const INSERT_SQL: &'static str =
        "INSERT OR IGNORE INTO Formats (FormatString) VALUES (?1)";

    /// Looks up the row id for a format string.
    pub(crate) const SELECT_ID_SQL: &'static str =
        "SELECT Id FROM Formats WHERE FormatString = ?1";

    /// Creates an unresolved format from a template string.
    pub fn new(format_string: impl Into<String>) -> Self {
        Self {
            id: 0,
            format_string: format_string.into(),
        }
    }

    /// Deterministic cross-process equality key for this format.
    pub fn stable_hash(&self) -> u32 {
        hash::stable_hash(&self.format_string)
    }
}

/// The stringified form of one positional argument.
///
/// `value` is nullable; a null value is a distinct content-addressed key,
/// not the absence of a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    /// Row id in the day-store, `0` until resolved by a flush.
    pub id: i64,
    /// Stringified argument value, unique per store (null included).
    pub value: Option<String>,
}

impl Argument {
    /// Insert-if-absent statement for non-null values. Null keys are
    /// resolved by lookup-then-insert because SQLite's UNIQUE admits any
    /// number of NULL rows.
    pub(crate) const INSERT_SQL: &'static str =
        "INSERT OR IGNORE INTO Arguments (Value) VALUES (?1)";

    /// Looks up the row id for a value, with NULL-aware comparison.
    pub(crate) const SELECT_ID_SQL: &'static str =
        "SELECT Id FROM Arguments WHERE Value IS ?1";

    /// Creates an unresolved argument.
    pub fn new(value: Option<String>) -> Self {
        Self { id: 0, value }
    }

    /// Deterministic cross-process equality key for this argument.
    pub fn stable_hash(&self) -> u32 {
        hash::fold_opt(hash::offset_basis(), self.value.as_deref())
    }
}

/// Caller context captured at the emit site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerInfo {
    /// Row id in the day-store, `0` until resolved by a flush.
    pub id: i64,
    /// Emitting function or method name.
    pub member_name: Option<String>,
    /// Source file path of the emit site.
    pub source_file_path: Option<String>,
    /// Source line number of the emit site.
    pub source_line_number: Option<i32>,
}

impl CallerInfo {
    /// Insert statement; the composite unique key carries dedup for fully
    /// non-null triples, the worker's lookup-then-insert covers the rest.
    pub(crate) const INSERT_SQL: &'static str =
        "INSERT OR IGNORE INTO CallerInfos (MemberName, SourceFilePath, SourceLineNumber) \
         VALUES (?1, ?2, ?3)";

    /// Looks up the row id for a triple, with NULL-aware comparison.
    pub(crate) const SELECT_ID_SQL: &'static str =
        "SELECT Id FROM CallerInfos \
         WHERE MemberName IS ?1 AND SourceFilePath IS ?2 AND SourceLineNumber IS ?3";

    /// Creates an unresolved caller record.
    pub fn new(
        member_name: Option<String>,
        source_file_path: Option<String>,
        source_line_number: Option<i32>,
    ) -> Self {
        Self {
            id: 0,
            member_name,
            source_file_path,
            source_line_number,
        }
    }

    /// Deterministic cross-process equality key for this caller triple.
    pub fn stable_hash(&self) -> u32 {
        let mut h = hash::fold_opt(hash::offset_basis(), self.member_name.as_deref());
        h = hash::fold_opt(h, self.source_file_path.as_deref());
        let line = self.source_line_number.map(|n| n.to_string());
        hash::fold_opt(h, line.as_deref())
    }

    /// Clones the identity triple, the per-batch dedup key.
    pub(crate) fn key(&self) -> (Option<String>, Option<String>, Option<i32>) {
        (
            self.member_name.clone(),
            self.source_file_path.clone(),
            self.source_line_number,
        )
    }
}

/// One structured log entry.
///
/// Created by a producer, queued, drained by the flush worker (which
/// rewrites the satellite ids), inserted, then released. `created_tick` is
/// assigned at construction and preserved verbatim through flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    /// Row id in the day-store, `0` until inserted.
    pub id: i64,
    /// Severity.
    pub level: Level,
    /// Format template; `format.id` is resolved at flush time.
    pub format: Format,
    /// Optional caller context.
    pub caller: Option<CallerInfo>,
    /// Positional argument slots, at most [`MAX_ARGUMENTS`]. Slot `i` feeds
    /// placeholder `{i}`; slots past `args.len()` are absent (null foreign
    /// key, not a null-valued argument).
    pub args: Vec<Argument>,
    /// Wall-clock instant of the `add` call, in 100 ns ticks.
    pub created_tick: i64,
}

impl Log {
    /// Parameterized insert; satellite ids must be resolved first.
    pub(crate) const INSERT_SQL: &'static str =
        "INSERT INTO Logs (Level, FormatId, CallerInfoId, \
         Arg0Id, Arg1Id, Arg2Id, Arg3Id, Arg4Id, Arg5Id, Arg6Id, Arg7Id, Arg8Id, Arg9Id, \
         CreatedTick) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";

    /// Creates a log stamped with the current tick.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_ARGUMENTS`] arguments are supplied; an
    /// eleventh positional argument is a programming error at the producer.
    pub fn new(
        level: Level,
        format: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut log = Self {
            id: 0,
            level,
            format: Format::new(format),
            caller: None,
            args: Vec::new(),
            created_tick: crate::tick::now_tick(),
        };
        for arg in args {
            log.push_arg(Some(arg.into()));
        }
        log
    }

    /// Appends one argument slot (builder form).
    ///
    /// # Panics
    ///
    /// Panics if all [`MAX_ARGUMENTS`] slots are already taken.
    pub fn with_arg(mut self, value: Option<String>) -> Self {
        self.push_arg(value);
        self
    }

    /// Attaches caller context (builder form).
    pub fn with_caller(
        mut self,
        member_name: impl Into<String>,
        source_file_path: impl Into<String>,
        source_line_number: i32,
    ) -> Self {
        self.caller = Some(CallerInfo::new(
            Some(member_name.into()),
            Some(source_file_path.into()),
            Some(source_line_number),
        ));
        self
    }

    /// Overrides the creation tick (builder form).
    ///
    /// Producers normally keep the construction-time stamp; tests and replay
    /// tooling set explicit instants.
    pub fn with_tick(mut self, tick: i64) -> Self {
        self.created_tick = tick;
        self
    }

    fn push_arg(&mut self, value: Option<String>) {
        assert!(
            self.args.len() < MAX_ARGUMENTS,
            "argument index out of range: a log holds at most {MAX_ARGUMENTS} arguments"
        );
        self.args.push(Argument::new(value));
    }

    /// Returns the value in argument slot `slot`, if the slot is occupied
    /// and non-null.
    pub fn arg_value(&self, slot: usize) -> Option<&str> {
        self.args.get(slot).and_then(|a| a.value.as_deref())
    }

    /// Renders the format template with all placeholders substituted.
    ///
    /// Null and absent arguments render as the empty string.
    pub fn content(&self) -> String {
        self.render("", "")
    }

    /// Renders like [`content`](Self::content) but wraps every substituted
    /// argument in `<tag>`..`</tag>` markers so UIs can highlight parameter
    /// boundaries.
    pub fn tag_content(&self) -> String {
        self.render("<tag>", "</tag>")
    }

    fn render(&self, open: &str, close: &str) -> String {
        let mut out = self.format.format_string.clone();
        for slot in 0..MAX_ARGUMENTS {
            let placeholder = format!("{{{slot}}}");
            if !out.contains(&placeholder) {
                continue;
            }
            let value = self.arg_value(slot).unwrap_or("");
            out = out.replace(&placeholder, &format!("{open}{value}{close}"));
        }
        out
    }
}

/// One 10-minute ingestion bucket, upsert-accumulated at flush time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalStat {
    /// Bucket start, floored to [`crate::tick::INTERVAL_TICKS`].
    pub interval_start: i64,
    /// Number of logs whose `created_tick` fell inside the bucket, as of the
    /// last flush that touched it.
    pub log_count: i32,
}

impl IntervalStat {
    /// Accumulating upsert; concurrent restarts stay consistent because the
    /// bucket adds rather than overwrites.
    pub(crate) const UPSERT_SQL: &'static str =
        "INSERT INTO LogIntervalStats (IntervalStart, LogCount) VALUES (?1, ?2) \
         ON CONFLICT(IntervalStart) DO UPDATE SET LogCount = LogCount + excluded.LogCount";
}
