//! Engine lifecycle: lazy worker start, producer intake, teardown.
//!
//! A [`LogEngine`] owns the intake pair, the latest [`FlushInfo`], and the
//! background worker handle. The first `add` (or an explicit
//! [`init_background_worker`](LogEngine::init_background_worker)) spawns the
//! worker; `stop` cancels and joins it; a later `add` starts it again.
//!
//! There is no process-exit hook: a host that cares about the last few
//! seconds of logs calls [`flush_and_stop`](LogEngine::flush_and_stop) on
//! shutdown. Anything still queued when the process dies abruptly is lost,
//! which is the engine's stated delivery contract.

use crate::error::{LogError, Result};
use crate::flush::pacer::PacerConfig;
use crate::flush::{self, FlushInfo, WorkerShared};
use crate::model::Log;
use crate::query::QueryModel;
use crate::store;
use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::warn;

/// Configuration for a [`LogEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Base directory; stores live under `<base>/DB/Log`.
    pub base_dir: PathBuf,
    /// Pacing between flushes.
    pub pacer: PacerConfig,
}

impl EngineConfig {
    /// Creates a configuration rooted at the given base directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            pacer: PacerConfig::default(),
        }
    }

    /// Overrides the base directory.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Overrides the pacer configuration.
    pub fn with_pacer(mut self, pacer: PacerConfig) -> Self {
        self.pacer = pacer;
        self
    }
}

struct WorkerHandle {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The logging engine: intake, background flush, and query access.
pub struct LogEngine {
    shared: Arc<WorkerShared>,
    base_dir: PathBuf,
    worker: Mutex<Option<WorkerHandle>>,
    // Lock-free fast-path flag so `add` only takes the worker mutex when
    // the worker actually needs starting.
    worker_active: AtomicBool,
}

impl LogEngine {
    /// Creates an engine. The worker is not started until the first
    /// [`add`](Self::add) or an explicit
    /// [`init_background_worker`](Self::init_background_worker).
    pub fn new(config: EngineConfig) -> Self {
        let store_dir = store::store_dir(&config.base_dir);
        Self {
            shared: Arc::new(WorkerShared::new(store_dir, config.pacer)),
            base_dir: config.base_dir,
            worker: Mutex::new(None),
            worker_active: AtomicBool::new(false),
        }
    }

    /// Starts the background flush worker.
    ///
    /// Idempotent and thread-safe: concurrent callers race for one lock and
    /// at most one worker thread exists at a time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be created or the
    /// thread cannot be spawned.
    pub fn init_background_worker(&self) -> Result<()> {
        let mut guard = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.shared.store_dir)?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let flag = Arc::clone(&cancelled);
        let handle = thread::Builder::new()
            .name("logden-flush".to_string())
            .spawn(move || flush::worker_loop(&shared, &flag))
            .map_err(LogError::WorkerSpawn)?;

        *guard = Some(WorkerHandle { cancelled, handle });
        self.worker_active.store(true, Ordering::Release);
        Ok(())
    }

    /// Enqueues a log for the next flush.
    ///
    /// Never blocks and never fails: one atomic load plus one lock-free
    /// enqueue. Lazily starts the worker; if starting fails the log is
    /// queued anyway and the next `add` retries.
    pub fn add(&self, log: Log) {
        if !self.worker_active.load(Ordering::Acquire) {
            if let Err(err) = self.init_background_worker() {
                warn!("Background worker unavailable, log queued anyway: {:?}", err);
            }
        }
        self.shared.intake.push(log);
    }

    /// Cancels the worker cooperatively and joins it.
    ///
    /// An in-flight flush runs to completion first. A subsequent
    /// [`add`](Self::add) re-initializes the worker.
    pub fn stop_background_worker(&self) {
        let handle = {
            let mut guard = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            self.worker_active.store(false, Ordering::Release);
            guard.take()
        };
        if let Some(worker) = handle {
            worker.cancelled.store(true, Ordering::Relaxed);
            if worker.handle.join().is_err() {
                warn!("Flush worker panicked during shutdown");
            }
        }
    }

    /// Stops the worker, then runs one final synchronous flush of whatever
    /// is still queued.
    ///
    /// Hosts call this on shutdown in place of a process-exit hook.
    pub fn flush_and_stop(&self) {
        self.stop_background_worker();
        flush::flush_once(&self.shared, Local::now().date_naive());
    }

    /// Snapshot of the latest flush statistics.
    pub fn flush_info(&self) -> FlushInfo {
        self.shared.flush_info_snapshot()
    }

    /// Starts building a query over this engine's stores.
    pub fn query(&self) -> QueryModel {
        QueryModel::new(&self.base_dir)
    }

    /// Returns true if a day-store file exists for `date`.
    pub fn log_file_exists(&self, date: NaiveDate) -> bool {
        store::log_file_exists(&self.base_dir, date)
    }

    /// Lists the dates that have a day-store file, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be read.
    pub fn list_log_files(&self) -> Result<Vec<NaiveDate>> {
        store::list_log_files(&self.base_dir)
    }

    /// The engine's base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl Drop for LogEngine {
    fn drop(&mut self) {
        self.stop_background_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Level;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_engine(dir: &TempDir) -> LogEngine {
        let pacer = PacerConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_max_wait(Duration::from_millis(20));
        LogEngine::new(EngineConfig::new(dir.path()).with_pacer(pacer))
    }

    #[test]
    fn test_init_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let engine = fast_engine(&temp_dir);
        engine.init_background_worker().unwrap();
        engine.init_background_worker().unwrap();
        engine.stop_background_worker();
    }

    #[test]
    fn test_flush_and_stop_persists_queued_logs() {
        let temp_dir = TempDir::new().unwrap();
        let engine = fast_engine(&temp_dir);

        engine.add(Log::new(Level::Info, "shutdown {0}", ["now"]));
        engine.flush_and_stop();

        let today = Local::now().date_naive();
        assert!(engine.log_file_exists(today));
        assert_eq!(engine.list_log_files().unwrap(), vec![today]);
    }

    #[test]
    fn test_stop_then_add_restarts_worker() {
        let temp_dir = TempDir::new().unwrap();
        let engine = fast_engine(&temp_dir);

        engine.add(Log::new(Level::Info, "first", Vec::<String>::new()));
        engine.flush_and_stop();
        assert_eq!(engine.flush_info().log_count, 1);

        // A later add lazily re-initializes and the log still lands.
        engine.add(Log::new(Level::Info, "second", Vec::<String>::new()));
        engine.flush_and_stop();
        assert_eq!(engine.flush_info().log_count, 1);

        let page = engine.query().keyset_paginate().unwrap();
        assert_eq!(page.items.len(), 2);
    }

    #[test]
    fn test_flush_info_starts_stale() {
        let temp_dir = TempDir::new().unwrap();
        let engine = fast_engine(&temp_dir);
        let info = engine.flush_info();
        assert!(info.flushed_at.is_none());
        assert_eq!(info.log_count, 0);
    }
}
