//! Keyset-paginated queries over a per-day store.
//!
//! [`QueryModel`] is a fluent builder: filters narrow the page, the order
//! type picks the display direction, and at most one cursor (next XOR prev)
//! anchors the page in the tick ordering. Cursor boundaries are closed in
//! both directions: the cursor row itself is part of the returned page.
//!
//! Queries open their own store snapshot, independent of flushing, and a
//! missing day-file is an empty page rather than an error.

use crate::error::{LogError, Result};
use crate::model::{Argument, CallerInfo, Format, Level, Log, MAX_ARGUMENTS};
use crate::store::{self, DayStore};
use crate::tick;
use chrono::{DateTime, Local};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::path::PathBuf;

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: i32 = 20;

/// Display ordering of a page.
///
/// The names retain the engine's historical taxonomy; the ordering key is
/// `created_tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderType {
    /// Oldest first.
    #[default]
    OrderByIdAscending,
    /// Newest first.
    OrderByIdDescending,
}

/// One realized page plus the cursors to move from it.
#[derive(Debug, Clone)]
pub struct KeysetPage<T> {
    /// The page, in display order.
    pub items: Vec<T>,
    /// Tick of the first item, the anchor for paging backwards.
    pub pre_cursor_tick: Option<i64>,
    /// Tick of the last item, the anchor for paging forwards.
    pub next_cursor_tick: Option<i64>,
    /// Cheap approximate count: the store's current `MAX(Logs.Id)`.
    pub total_records: i64,
}

impl<T> KeysetPage<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            pre_cursor_tick: None,
            next_cursor_tick: None,
            total_records: 0,
        }
    }
}

const SELECT_FROM: &str = "\
SELECT l.Id, l.Level, l.CreatedTick, f.Id, f.FormatString, \
c.Id, c.MemberName, c.SourceFilePath, c.SourceLineNumber, \
a0.Id, a0.Value, a1.Id, a1.Value, a2.Id, a2.Value, a3.Id, a3.Value, \
a4.Id, a4.Value, a5.Id, a5.Value, a6.Id, a6.Value, a7.Id, a7.Value, \
a8.Id, a8.Value, a9.Id, a9.Value \
FROM Logs l \
JOIN Formats f ON f.Id = l.FormatId \
LEFT JOIN CallerInfos c ON c.Id = l.CallerInfoId \
LEFT JOIN Arguments a0 ON a0.Id = l.Arg0Id \
LEFT JOIN Arguments a1 ON a1.Id = l.Arg1Id \
LEFT JOIN Arguments a2 ON a2.Id = l.Arg2Id \
LEFT JOIN Arguments a3 ON a3.Id = l.Arg3Id \
LEFT JOIN Arguments a4 ON a4.Id = l.Arg4Id \
LEFT JOIN Arguments a5 ON a5.Id = l.Arg5Id \
LEFT JOIN Arguments a6 ON a6.Id = l.Arg6Id \
LEFT JOIN Arguments a7 ON a7.Id = l.Arg7Id \
LEFT JOIN Arguments a8 ON a8.Id = l.Arg8Id \
LEFT JOIN Arguments a9 ON a9.Id = l.Arg9Id";

/// Builder for one keyset-paginated page over a day-store.
#[derive(Debug, Clone)]
pub struct QueryModel {
    base_dir: PathBuf,
    format_string: Option<String>,
    argument: Option<String>,
    caller_info: Option<String>,
    level: Option<Level>,
    start_time: Option<DateTime<Local>>,
    end_time: Option<DateTime<Local>>,
    page_size: i32,
    order_type: OrderType,
    next_cursor_tick: Option<i64>,
    prev_cursor_tick: Option<i64>,
}

impl QueryModel {
    /// Creates a query over the engine's base directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            format_string: None,
            argument: None,
            caller_info: None,
            level: None,
            start_time: None,
            end_time: None,
            page_size: DEFAULT_PAGE_SIZE,
            order_type: OrderType::default(),
            next_cursor_tick: None,
            prev_cursor_tick: None,
        }
    }

    /// Substring filter on the format template.
    pub fn with_format_string(mut self, needle: impl Into<String>) -> Self {
        self.format_string = Some(needle.into());
        self
    }

    /// Substring filter matching any non-null argument slot.
    pub fn with_argument(mut self, needle: impl Into<String>) -> Self {
        self.argument = Some(needle.into());
        self
    }

    /// Substring filter over member name, source path, or stringified line.
    pub fn with_caller_info(mut self, needle: impl Into<String>) -> Self {
        self.caller_info = Some(needle.into());
        self
    }

    /// Exact level filter.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Tick range filter, also selecting which day-store to open.
    ///
    /// A no-op unless both instants fall on the same local date and
    /// `start <= end`. A range crossing day-files has no single store to
    /// serve it.
    pub fn with_time(mut self, start: DateTime<Local>, end: DateTime<Local>) -> Self {
        if start.date_naive() == end.date_naive() && start <= end {
            self.start_time = Some(start);
            self.end_time = Some(end);
        }
        self
    }

    /// Page size; must be positive (validated at execution).
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Display ordering.
    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    /// Anchors the page forwards from a tick (closed boundary). Clears any
    /// previous-page cursor.
    pub fn with_next_cursor(mut self, tick: i64) -> Self {
        self.next_cursor_tick = Some(tick);
        self.prev_cursor_tick = None;
        self
    }

    /// Anchors the page backwards from a tick (closed boundary). Clears any
    /// next-page cursor.
    pub fn with_prev_cursor(mut self, tick: i64) -> Self {
        self.prev_cursor_tick = Some(tick);
        self.next_cursor_tick = None;
        self
    }

    /// Runs the query and realizes one page.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive page size or a store failure. A
    /// missing day-file is not an error: the page is empty with null
    /// cursors.
    pub fn keyset_paginate(&self) -> Result<KeysetPage<Log>> {
        if self.page_size <= 0 {
            return Err(LogError::InvalidPageSize(self.page_size));
        }

        let date = self
            .start_time
            .map(|t| t.date_naive())
            .or_else(|| self.end_time.map(|t| t.date_naive()))
            .unwrap_or_else(|| Local::now().date_naive());

        let dir = store::store_dir(&self.base_dir);
        let store = match DayStore::open_existing(dir, date)? {
            Some(store) => store,
            None => return Ok(KeysetPage::empty()),
        };

        let (sql, params) = self.build_sql();
        let mut stmt = store.conn().prepare(&sql)?;
        // The only integral-range failure map_row produces is the level
        // column, so it converts to the domain error here.
        let mut items: Vec<Log> = stmt
            .query_map(params_from_iter(params), map_row)?
            .collect::<rusqlite::Result<_>>()
            .map_err(|err| match err {
                rusqlite::Error::IntegralValueOutOfRange(_, code) => {
                    LogError::UnknownLevel(code)
                }
                other => LogError::Store(other),
            })?;

        // A prev-cursor query ran in the reversed direction; restore
        // display order.
        if self.prev_cursor_tick.is_some() {
            items.reverse();
        }

        let total_records: i64 = store
            .conn()
            .query_row("SELECT MAX(Id) FROM Logs", [], |row| {
                row.get::<_, Option<i64>>(0)
            })?
            .unwrap_or(0);

        Ok(KeysetPage {
            pre_cursor_tick: items.first().map(|log| log.created_tick),
            next_cursor_tick: items.last().map(|log| log.created_tick),
            items,
            total_records,
        })
    }

    fn build_sql(&self) -> (String, Vec<Value>) {
        let ascending = matches!(self.order_type, OrderType::OrderByIdAscending);
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(needle) = &self.format_string {
            clauses.push("f.FormatString LIKE ?".to_string());
            params.push(like(needle));
        }
        if let Some(needle) = &self.argument {
            let slots: Vec<String> = (0..MAX_ARGUMENTS)
                .map(|slot| format!("a{slot}.Value LIKE ?"))
                .collect();
            clauses.push(format!("({})", slots.join(" OR ")));
            for _ in 0..MAX_ARGUMENTS {
                params.push(like(needle));
            }
        }
        if let Some(needle) = &self.caller_info {
            clauses.push(
                "(c.MemberName LIKE ? OR c.SourceFilePath LIKE ? \
                 OR CAST(c.SourceLineNumber AS TEXT) LIKE ?)"
                    .to_string(),
            );
            for _ in 0..3 {
                params.push(like(needle));
            }
        }
        if let Some(level) = self.level {
            clauses.push("l.Level = ?".to_string());
            params.push(Value::Integer(level.code()));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            clauses.push("l.CreatedTick >= ?".to_string());
            params.push(Value::Integer(tick::tick_of(start)));
            clauses.push("l.CreatedTick <= ?".to_string());
            params.push(Value::Integer(tick::tick_of(end)));
        }

        // Cursor clause decides the scan direction; prev reverses it and
        // the realized page is flipped back afterwards.
        let mut descending = !ascending;
        if let Some(prev) = self.prev_cursor_tick {
            clauses.push(if ascending {
                "l.CreatedTick <= ?".to_string()
            } else {
                "l.CreatedTick >= ?".to_string()
            });
            params.push(Value::Integer(prev));
            descending = ascending;
        } else if let Some(next) = self.next_cursor_tick {
            clauses.push(if ascending {
                "l.CreatedTick >= ?".to_string()
            } else {
                "l.CreatedTick <= ?".to_string()
            });
            params.push(Value::Integer(next));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let order_sql = if descending {
            " ORDER BY l.CreatedTick DESC, l.Id DESC"
        } else {
            " ORDER BY l.CreatedTick ASC, l.Id ASC"
        };

        params.push(Value::Integer(i64::from(self.page_size)));
        let sql = format!("{SELECT_FROM}{where_sql}{order_sql} LIMIT ?");
        (sql, params)
    }
}

fn like(needle: &str) -> Value {
    Value::Text(format!("%{needle}%"))
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Log> {
    let level_code: i64 = row.get(1)?;
    let level = Level::from_code(level_code)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(1, level_code))?;

    let caller_id: Option<i64> = row.get(5)?;
    let caller = match caller_id {
        Some(id) => Some(CallerInfo {
            id,
            member_name: row.get(6)?,
            source_file_path: row.get(7)?,
            source_line_number: row.get(8)?,
        }),
        None => None,
    };

    // Argument slots keep their position; trailing absent slots are
    // dropped, interior holes stay as null-valued placeholders so `{i}`
    // rendering lines up.
    let mut slots: Vec<Option<Argument>> = Vec::with_capacity(MAX_ARGUMENTS);
    for slot in 0..MAX_ARGUMENTS {
        let id: Option<i64> = row.get(9 + 2 * slot)?;
        let value: Option<String> = row.get(10 + 2 * slot)?;
        slots.push(id.map(|id| Argument { id, value }));
    }
    while matches!(slots.last(), Some(None)) {
        slots.pop();
    }
    let args = slots
        .into_iter()
        .map(|slot| slot.unwrap_or(Argument { id: 0, value: None }))
        .collect();

    Ok(Log {
        id: row.get(0)?,
        level,
        format: Format {
            id: row.get(3)?,
            format_string: row.get(4)?,
        },
        caller,
        args,
        created_tick: row.get(2)?,
    })
}
