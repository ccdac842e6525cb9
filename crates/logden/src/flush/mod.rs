//! Background flush pipeline.
//!
//! A single worker thread runs the flush loop: swap-drain the intake pair,
//! sort the batch by tick, resolve satellite ids against the day-store,
//! write one transaction of log rows plus interval-stat upserts, and record
//! timing in [`FlushInfo`]. Any failure between store open and commit sends
//! the whole batch to the [`QuarantineSink`] and the loop keeps going:
//! ingestion is fail-open, one bad batch never kills the worker.
//!
//! # Architecture
//!
//! ```text
//! producers → IntakeQueue ─swap─→ worker: sort → resolve → tx(insert, upsert) → FlushInfo
//!                                               └─ on error → QuarantineSink
//! ```

pub mod pacer;
pub mod quarantine;

use crate::error::Result;
use crate::intake::IntakeQueue;
use crate::model::{Argument, CallerInfo, Format, IntervalStat, Log};
use crate::store::DayStore;
use crate::tick;
use crate::flush::pacer::{AdaptivePacer, PacerConfig};
use crate::flush::quarantine::QuarantineSink;
use chrono::{DateTime, Local, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Statistics of the most recent successful flush.
///
/// Written only by the worker; reads return a coherent value snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushInfo {
    /// Local time the flush finished, `None` until the first flush.
    pub flushed_at: Option<DateTime<Local>>,
    /// Number of logs persisted by that flush.
    pub log_count: usize,
    /// Time spent resolving satellite ids.
    pub prep_time: Duration,
    /// Time spent in the insert transaction.
    pub write_time: Duration,
    /// Swap-to-commit wall time.
    pub total_time: Duration,
}

/// State shared between the engine handle and the worker thread.
pub(crate) struct WorkerShared {
    pub(crate) intake: IntakeQueue,
    pub(crate) flush_info: RwLock<FlushInfo>,
    pub(crate) store_dir: PathBuf,
    pub(crate) pacer: PacerConfig,
}

impl WorkerShared {
    pub(crate) fn new(store_dir: PathBuf, pacer: PacerConfig) -> Self {
        Self {
            intake: IntakeQueue::new(),
            flush_info: RwLock::new(FlushInfo::default()),
            store_dir,
            pacer,
        }
    }

    pub(crate) fn flush_info_snapshot(&self) -> FlushInfo {
        self.flush_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Worker loop body: flush, then let the pacer decide the next wake-up.
pub(crate) fn worker_loop(shared: &WorkerShared, cancelled: &AtomicBool) {
    let pacer = AdaptivePacer::new(shared.pacer.clone());
    while !cancelled.load(Ordering::Relaxed) {
        let today = Local::now().date_naive();
        flush_once(shared, today);
        pacer.wait(|| shared.intake.backlog(), cancelled);
    }
}

/// One flush iteration: swap → sort → resolve → persist → stats.
///
/// An empty drain returns immediately and leaves [`FlushInfo`] untouched; no
/// day-file is created. A failed persist quarantines the batch and also
/// leaves [`FlushInfo`] untouched.
pub(crate) fn flush_once(shared: &WorkerShared, date: NaiveDate) {
    let total_start = Instant::now();
    let mut batch = shared.intake.swap_drain();
    if batch.is_empty() {
        return;
    }

    // Stable sort: equal ticks keep their enqueue order.
    batch.sort_by_key(|log| log.created_tick);
    let count = batch.len();

    match persist_batch(&shared.store_dir, date, &mut batch) {
        Ok(timings) => {
            let info = FlushInfo {
                flushed_at: Some(Local::now()),
                log_count: count,
                prep_time: timings.prep,
                write_time: timings.write,
                total_time: total_start.elapsed(),
            };
            debug!(
                "Flushed {} logs for {} (prep {:?}, write {:?})",
                count, date, info.prep_time, info.write_time
            );
            *shared
                .flush_info
                .write()
                .unwrap_or_else(PoisonError::into_inner) = info;
        }
        Err(err) => {
            error!("Flush of {} logs for {} failed: {:?}", count, date, err);
            QuarantineSink::new(&shared.store_dir).quarantine(date, batch, &err);
        }
    }
}

struct FlushTimings {
    prep: Duration,
    write: Duration,
}

/// Opens the day-store, resolves satellites, and commits the batch.
fn persist_batch(
    store_dir: &std::path::Path,
    date: NaiveDate,
    batch: &mut [Log],
) -> Result<FlushTimings> {
    let mut store = DayStore::open(store_dir, date)?;

    let prep_start = Instant::now();
    resolve_formats(store.conn(), batch)?;
    resolve_arguments(store.conn(), batch)?;
    resolve_callers(store.conn(), batch)?;
    let prep = prep_start.elapsed();

    let buckets = interval_stats(batch);

    let write_start = Instant::now();
    let tx = store.conn_mut().transaction()?;
    {
        let mut insert_log = tx.prepare(Log::INSERT_SQL)?;
        for log in batch.iter() {
            let arg_ids: Vec<Option<i64>> = (0..crate::model::MAX_ARGUMENTS)
                .map(|slot| log.args.get(slot).map(|a| a.id))
                .collect();
            insert_log.execute(params![
                log.level.code(),
                log.format.id,
                log.caller.as_ref().map(|c| c.id),
                arg_ids[0],
                arg_ids[1],
                arg_ids[2],
                arg_ids[3],
                arg_ids[4],
                arg_ids[5],
                arg_ids[6],
                arg_ids[7],
                arg_ids[8],
                arg_ids[9],
                log.created_tick,
            ])?;
        }

        let mut upsert = tx.prepare(IntervalStat::UPSERT_SQL)?;
        for (interval_start, delta) in &buckets {
            upsert.execute(params![interval_start, delta])?;
        }
    }
    tx.commit()?;
    let write = write_start.elapsed();

    Ok(FlushTimings { prep, write })
}

/// Bulk insert-if-absent plus read-back for every distinct format string,
/// then rewrite the batch's format ids.
fn resolve_formats(conn: &Connection, batch: &mut [Log]) -> Result<()> {
    let unique: HashSet<String> = batch
        .iter()
        .map(|log| log.format.format_string.clone())
        .collect();

    let mut ids: HashMap<String, i64> = HashMap::with_capacity(unique.len());
    {
        let mut insert = conn.prepare(Format::INSERT_SQL)?;
        let mut select = conn.prepare(Format::SELECT_ID_SQL)?;
        for format_string in unique {
            insert.execute(params![format_string])?;
            let id: i64 = select.query_row(params![format_string], |row| row.get(0))?;
            ids.insert(format_string, id);
        }
    }

    for log in batch.iter_mut() {
        if let Some(&id) = ids.get(&log.format.format_string) {
            log.format.id = id;
        }
    }
    Ok(())
}

/// Resolves every distinct argument value in the batch.
///
/// Non-null values ride the UNIQUE constraint via insert-ignore. The null
/// key is looked up with `IS` and inserted at most once; SQLite's UNIQUE
/// admits any number of NULL rows, and the single-threaded worker makes
/// check-then-insert sound.
fn resolve_arguments(conn: &Connection, batch: &mut [Log]) -> Result<()> {
    let unique: HashSet<Option<String>> = batch
        .iter()
        .flat_map(|log| log.args.iter().map(|arg| arg.value.clone()))
        .collect();

    let mut ids: HashMap<Option<String>, i64> = HashMap::with_capacity(unique.len());
    {
        let mut insert = conn.prepare(Argument::INSERT_SQL)?;
        let mut select = conn.prepare(Argument::SELECT_ID_SQL)?;
        for value in unique {
            let id = match &value {
                Some(v) => {
                    insert.execute(params![v])?;
                    select.query_row(params![v], |row| row.get(0))?
                }
                None => {
                    let existing: Option<i64> = select
                        .query_row(params![None::<String>], |row| row.get(0))
                        .optional()?;
                    match existing {
                        Some(id) => id,
                        None => {
                            insert.execute(params![None::<String>])?;
                            conn.last_insert_rowid()
                        }
                    }
                }
            };
            ids.insert(value, id);
        }
    }

    for log in batch.iter_mut() {
        for arg in log.args.iter_mut() {
            if let Some(&id) = ids.get(&arg.value) {
                arg.id = id;
            }
        }
    }
    Ok(())
}

/// Resolves every distinct caller triple in the batch with NULL-aware
/// lookup-then-insert.
fn resolve_callers(conn: &Connection, batch: &mut [Log]) -> Result<()> {
    let unique: HashSet<(Option<String>, Option<String>, Option<i32>)> = batch
        .iter()
        .filter_map(|log| log.caller.as_ref().map(CallerInfo::key))
        .collect();

    let mut ids: HashMap<(Option<String>, Option<String>, Option<i32>), i64> =
        HashMap::with_capacity(unique.len());
    {
        let mut insert = conn.prepare(CallerInfo::INSERT_SQL)?;
        let mut select = conn.prepare(CallerInfo::SELECT_ID_SQL)?;
        for key in unique {
            let existing: Option<i64> = select
                .query_row(params![key.0, key.1, key.2], |row| row.get(0))
                .optional()?;
            let id = match existing {
                Some(id) => id,
                None => {
                    insert.execute(params![key.0, key.1, key.2])?;
                    select.query_row(params![key.0, key.1, key.2], |row| row.get(0))?
                }
            };
            ids.insert(key, id);
        }
    }

    for log in batch.iter_mut() {
        if let Some(caller) = log.caller.as_mut() {
            if let Some(&id) = ids.get(&caller.key()) {
                caller.id = id;
            }
        }
    }
    Ok(())
}

/// Groups a sorted batch into 10-minute buckets of `(interval_start, count)`.
fn interval_stats(batch: &[Log]) -> BTreeMap<i64, i64> {
    let mut buckets = BTreeMap::new();
    for log in batch {
        *buckets
            .entry(tick::interval_floor(log.created_tick))
            .or_insert(0) += 1;
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Level;
    use crate::tick::INTERVAL_TICKS;
    use tempfile::TempDir;

    fn shared_for(dir: &TempDir) -> WorkerShared {
        WorkerShared::new(dir.path().to_path_buf(), PacerConfig::default())
    }

    fn flush_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 2).unwrap()
    }

    fn count(store: &DayStore, table: &str) -> i64 {
        store
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    #[test]
    fn test_interval_stats_groups_by_floor() {
        let batch = vec![
            Log::new(Level::Info, "a", Vec::<String>::new()).with_tick(1),
            Log::new(Level::Info, "a", Vec::<String>::new()).with_tick(INTERVAL_TICKS - 1),
            Log::new(Level::Info, "a", Vec::<String>::new()).with_tick(INTERVAL_TICKS),
        ];
        let buckets = interval_stats(&batch);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[&0], 2);
        assert_eq!(buckets[&INTERVAL_TICKS], 1);
    }

    #[test]
    fn test_empty_flush_creates_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let shared = shared_for(&temp_dir);

        flush_once(&shared, flush_date());

        assert!(shared.flush_info_snapshot().flushed_at.is_none());
        assert!(!temp_dir
            .path()
            .join(DayStore::file_name(flush_date()))
            .exists());
    }

    #[test]
    fn test_flush_persists_and_records_info() {
        let temp_dir = TempDir::new().unwrap();
        let shared = shared_for(&temp_dir);

        shared.intake.push(
            Log::new(Level::Info, "hello {0}", ["world"]).with_tick(10_000_000_000),
        );
        flush_once(&shared, flush_date());

        let info = shared.flush_info_snapshot();
        assert_eq!(info.log_count, 1);
        assert!(info.flushed_at.is_some());
        assert!(info.total_time >= info.write_time);

        let store = DayStore::open(temp_dir.path(), flush_date()).unwrap();
        assert_eq!(count(&store, "Logs"), 1);
        assert_eq!(count(&store, "Formats"), 1);
        assert_eq!(count(&store, "Arguments"), 1);
        assert_eq!(count(&store, "LogIntervalStats"), 1);
    }

    #[test]
    fn test_satellites_are_content_addressed() {
        let temp_dir = TempDir::new().unwrap();
        let shared = shared_for(&temp_dir);

        for i in 0..1000 {
            shared.intake.push(
                Log::new(Level::Info, "k={0}", [(i % 10).to_string()]).with_tick(i),
            );
        }
        flush_once(&shared, flush_date());

        let store = DayStore::open(temp_dir.path(), flush_date()).unwrap();
        assert_eq!(count(&store, "Logs"), 1000);
        assert_eq!(count(&store, "Formats"), 1);
        assert_eq!(count(&store, "Arguments"), 10);
    }

    #[test]
    fn test_dedup_spans_flushes() {
        let temp_dir = TempDir::new().unwrap();
        let shared = shared_for(&temp_dir);

        shared
            .intake
            .push(Log::new(Level::Info, "k={0}", ["v"]).with_tick(1));
        flush_once(&shared, flush_date());
        shared
            .intake
            .push(Log::new(Level::Info, "k={0}", ["v"]).with_tick(2));
        flush_once(&shared, flush_date());

        let store = DayStore::open(temp_dir.path(), flush_date()).unwrap();
        assert_eq!(count(&store, "Logs"), 2);
        assert_eq!(count(&store, "Formats"), 1);
        assert_eq!(count(&store, "Arguments"), 1);

        // Both rows point at the same satellite ids.
        let distinct: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(DISTINCT FormatId) + COUNT(DISTINCT Arg0Id) FROM Logs",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(distinct, 2);
    }

    #[test]
    fn test_null_argument_is_one_distinct_key() {
        let temp_dir = TempDir::new().unwrap();
        let shared = shared_for(&temp_dir);

        shared
            .intake
            .push(Log::new(Level::Info, "x={0}", Vec::<String>::new()).with_arg(None).with_tick(1));
        shared
            .intake
            .push(Log::new(Level::Info, "x={0}", Vec::<String>::new()).with_arg(None).with_tick(2));
        flush_once(&shared, flush_date());
        shared
            .intake
            .push(Log::new(Level::Info, "x={0}", Vec::<String>::new()).with_arg(None).with_tick(3));
        flush_once(&shared, flush_date());

        let store = DayStore::open(temp_dir.path(), flush_date()).unwrap();
        assert_eq!(count(&store, "Arguments"), 1);
        let nulls: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM Arguments WHERE Value IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(nulls, 1);
    }

    #[test]
    fn test_caller_triples_dedup_with_partial_nulls() {
        let temp_dir = TempDir::new().unwrap();
        let shared = shared_for(&temp_dir);

        let with_line = Log::new(Level::Info, "a", Vec::<String>::new())
            .with_caller("handler", "src/api.rs", 10)
            .with_tick(1);
        let mut without_line = with_line.clone().with_tick(2);
        if let Some(caller) = without_line.caller.as_mut() {
            caller.source_line_number = None;
        }

        shared.intake.push(with_line.clone());
        shared.intake.push(with_line);
        shared.intake.push(without_line.clone());
        shared.intake.push(without_line);
        flush_once(&shared, flush_date());

        let store = DayStore::open(temp_dir.path(), flush_date()).unwrap();
        assert_eq!(count(&store, "CallerInfos"), 2);
    }

    #[test]
    fn test_flush_preserves_tick_order_over_insertion_order() {
        let temp_dir = TempDir::new().unwrap();
        let shared = shared_for(&temp_dir);

        for tick in [30, 10, 20] {
            shared
                .intake
                .push(Log::new(Level::Info, "t", Vec::<String>::new()).with_tick(tick));
        }
        flush_once(&shared, flush_date());

        let store = DayStore::open(temp_dir.path(), flush_date()).unwrap();
        let mut stmt = store
            .conn()
            .prepare("SELECT CreatedTick FROM Logs ORDER BY CreatedTick")
            .unwrap();
        let ticks: Vec<i64> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(ticks, vec![10, 20, 30]);

        // Row ids follow the sorted batch, so insertion order equals tick
        // order within the store as well.
        let mut stmt = store
            .conn()
            .prepare("SELECT CreatedTick FROM Logs ORDER BY Id")
            .unwrap();
        let by_id: Vec<i64> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(by_id, vec![10, 20, 30]);
    }

    #[test]
    fn test_interval_stats_accumulate_across_flushes() {
        let temp_dir = TempDir::new().unwrap();
        let shared = shared_for(&temp_dir);

        let bucket = 7 * INTERVAL_TICKS;
        for i in 0..3 {
            shared
                .intake
                .push(Log::new(Level::Info, "a", Vec::<String>::new()).with_tick(bucket + i));
        }
        flush_once(&shared, flush_date());
        for i in 0..2 {
            shared
                .intake
                .push(Log::new(Level::Info, "a", Vec::<String>::new()).with_tick(bucket + 100 + i));
        }
        flush_once(&shared, flush_date());

        let store = DayStore::open(temp_dir.path(), flush_date()).unwrap();
        let stat: (i64, i64) = store
            .conn()
            .query_row(
                "SELECT IntervalStart, LogCount FROM LogIntervalStats",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(stat, (bucket, 5));
    }

    #[test]
    fn test_failed_flush_quarantines_batch() {
        let temp_dir = TempDir::new().unwrap();
        // A file where the store directory should be makes DayStore::open fail.
        let blocked = temp_dir.path().join("store");
        std::fs::write(&blocked, b"").unwrap();
        let shared = WorkerShared::new(blocked.clone(), PacerConfig::default());

        for i in 0..5 {
            shared
                .intake
                .push(Log::new(Level::Info, "k={0}", [i.to_string()]).with_tick(i));
        }
        flush_once(&shared, flush_date());

        // Batch dropped from the pipeline, FlushInfo untouched.
        assert_eq!(shared.intake.backlog(), 0);
        assert!(shared.flush_info_snapshot().flushed_at.is_none());
    }
}
