//! Integration tests for the complete ingestion path.
//!
//! These tests verify the full data lifecycle:
//! - Producer `add` → IntakeQueue → background flush → day-store
//! - Satellite dedup across producers and flushes
//! - Interval-stat accumulation and FlushInfo accounting

use alopex_logden::{
    store, DayStore, EngineConfig, Level, Log, LogEngine, PacerConfig,
};
use chrono::Local;
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Pacer shrunk so live-worker tests settle in milliseconds, not seconds.
fn fast_pacer() -> PacerConfig {
    PacerConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_high_backlog(100, Duration::from_millis(50))
        .with_max_wait(Duration::from_millis(100))
}

fn fast_engine(dir: &TempDir) -> LogEngine {
    LogEngine::new(EngineConfig::new(dir.path()).with_pacer(fast_pacer()))
}

/// Opens today's day-store file directly for black-box row inspection.
fn open_today(base: &Path) -> Connection {
    let path = store::store_dir(base).join(DayStore::file_name(Local::now().date_naive()));
    Connection::open(path).unwrap()
}

fn table_count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

// ============================================================================
// Worker lifecycle
// ============================================================================

/// An idle worker flushes nothing and creates no day-file.
#[test]
fn test_empty_flush_leaves_no_trace() {
    let temp_dir = TempDir::new().unwrap();
    let engine = fast_engine(&temp_dir);

    engine.init_background_worker().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    engine.stop_background_worker();

    let info = engine.flush_info();
    assert_eq!(info.log_count, 0);
    assert!(info.flushed_at.is_none());
    assert!(!engine.log_file_exists(Local::now().date_naive()));
    assert!(engine.list_log_files().unwrap().is_empty());
}

/// A single enqueued log is persisted by the live worker within the pacer
/// bound, without any explicit flush call.
#[test]
fn test_single_log_persisted_within_pacer_bound() {
    let temp_dir = TempDir::new().unwrap();
    let engine = fast_engine(&temp_dir);

    engine.add(Log::new(Level::Info, "hello {0}", ["world"]));

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if engine.flush_info().log_count == 1 {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "log was not flushed within the pacer bound"
        );
        std::thread::sleep(Duration::from_millis(10));
    }
    engine.stop_background_worker();

    let conn = open_today(temp_dir.path());
    assert_eq!(table_count(&conn, "Logs"), 1);
    assert_eq!(table_count(&conn, "Formats"), 1);
    assert_eq!(table_count(&conn, "Arguments"), 1);
    assert_eq!(table_count(&conn, "LogIntervalStats"), 1);

    let format: String = conn
        .query_row("SELECT FormatString FROM Formats", [], |row| row.get(0))
        .unwrap();
    assert_eq!(format, "hello {0}");
    let value: String = conn
        .query_row("SELECT Value FROM Arguments", [], |row| row.get(0))
        .unwrap();
    assert_eq!(value, "world");

    // The log row points at the satellite rows.
    let (format_id, arg0_id): (i64, i64) = conn
        .query_row("SELECT FormatId, Arg0Id FROM Logs", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    let expected_format: i64 = conn
        .query_row("SELECT Id FROM Formats", [], |row| row.get(0))
        .unwrap();
    let expected_arg: i64 = conn
        .query_row("SELECT Id FROM Arguments", [], |row| row.get(0))
        .unwrap();
    assert_eq!(format_id, expected_format);
    assert_eq!(arg0_id, expected_arg);
}

// ============================================================================
// Dedup and ordering
// ============================================================================

/// 1000 logs over one format and ten argument values grow the satellites by
/// exactly one format row and ten argument rows.
#[test]
fn test_satellite_dedup_across_large_batch() {
    let temp_dir = TempDir::new().unwrap();
    let engine = fast_engine(&temp_dir);

    for i in 0..1000 {
        engine.add(Log::new(Level::Info, "k={0}", [(i % 10).to_string()]));
    }
    engine.flush_and_stop();

    let conn = open_today(temp_dir.path());
    assert_eq!(table_count(&conn, "Logs"), 1000);
    assert_eq!(table_count(&conn, "Formats"), 1);
    assert_eq!(table_count(&conn, "Arguments"), 10);

    // Every log resolved to the single shared format id.
    let distinct_formats: i64 = conn
        .query_row("SELECT COUNT(DISTINCT FormatId) FROM Logs", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(distinct_formats, 1);
}

/// Logs enqueued out of tick order are persisted in tick order.
#[test]
fn test_flush_orders_by_created_tick() {
    let temp_dir = TempDir::new().unwrap();
    let engine = fast_engine(&temp_dir);

    for tick in [30, 10, 20] {
        engine.add(Log::new(Level::Info, "t", Vec::<String>::new()).with_tick(tick));
    }
    engine.flush_and_stop();

    let conn = open_today(temp_dir.path());
    let mut stmt = conn
        .prepare("SELECT CreatedTick FROM Logs ORDER BY CreatedTick")
        .unwrap();
    let ticks: Vec<i64> = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(ticks, vec![10, 20, 30]);
}

/// Concurrent producers all land; cross-producer interleaving is arbitrary
/// but nothing is lost or duplicated.
#[test]
fn test_concurrent_producers_all_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let engine = std::sync::Arc::new(fast_engine(&temp_dir));

    let producers = 4;
    let per_producer = 250;
    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let engine = std::sync::Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in 0..per_producer {
                    engine.add(Log::new(
                        Level::Info,
                        "producer {0} item {1}",
                        [p.to_string(), i.to_string()],
                    ));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    engine.flush_and_stop();

    let conn = open_today(temp_dir.path());
    assert_eq!(table_count(&conn, "Logs"), (producers * per_producer) as i64);
    assert_eq!(table_count(&conn, "Formats"), 1);
}

// ============================================================================
// Interval stats and FlushInfo
// ============================================================================

/// Interval stats bucket by 10-minute floor and accumulate across flushes.
#[test]
fn test_interval_stats_match_bucket_population() {
    let temp_dir = TempDir::new().unwrap();
    let engine = fast_engine(&temp_dir);

    let bucket_ticks = 10 * 60 * 10_000_000_i64;
    let base = 12 * bucket_ticks;

    // 3 logs in bucket 12, 2 in bucket 13.
    for offset in [0, 1, bucket_ticks - 1] {
        engine.add(Log::new(Level::Info, "a", Vec::<String>::new()).with_tick(base + offset));
    }
    for offset in [bucket_ticks, bucket_ticks + 5] {
        engine.add(Log::new(Level::Info, "a", Vec::<String>::new()).with_tick(base + offset));
    }
    engine.flush_and_stop();

    // A later flush adds to the same first bucket.
    engine.add(Log::new(Level::Info, "a", Vec::<String>::new()).with_tick(base + 2));
    engine.flush_and_stop();

    let conn = open_today(temp_dir.path());
    let mut stmt = conn
        .prepare("SELECT IntervalStart, LogCount FROM LogIntervalStats ORDER BY IntervalStart")
        .unwrap();
    let stats: Vec<(i64, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(stats, vec![(base, 4), (base + bucket_ticks, 2)]);
}

/// FlushInfo reflects the last flush: count and timing breakdown.
#[test]
fn test_flush_info_accounting() {
    let temp_dir = TempDir::new().unwrap();
    // Default pacing: the worker cannot race the explicit flush below, so
    // the whole batch lands in one flush.
    let engine = LogEngine::new(EngineConfig::new(temp_dir.path()));
    engine.init_background_worker().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    for i in 0..50 {
        engine.add(Log::new(Level::Info, "n={0}", [i.to_string()]));
    }
    engine.flush_and_stop();

    let info = engine.flush_info();
    assert_eq!(info.log_count, 50);
    assert!(info.flushed_at.is_some());
    assert!(info.total_time >= info.prep_time + info.write_time);
}

/// Stopping and re-adding restarts the worker; both batches survive.
#[test]
fn test_restart_accumulates_in_same_day_store() {
    let temp_dir = TempDir::new().unwrap();
    let engine = fast_engine(&temp_dir);

    engine.add(Log::new(Level::Info, "first", Vec::<String>::new()));
    engine.flush_and_stop();
    engine.add(Log::new(Level::Info, "second", Vec::<String>::new()));
    engine.flush_and_stop();

    let conn = open_today(temp_dir.path());
    assert_eq!(table_count(&conn, "Logs"), 2);
    assert_eq!(engine.list_log_files().unwrap().len(), 1);
}
