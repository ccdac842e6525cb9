//! Logden - Alopex Structured Logging Engine
//!
//! This crate provides an embedded, parameterized logging engine with
//! per-day SQLite stores and keyset-paginated queries.
//!
//! # Components
//!
//! - [`Log`] / [`Level`]: structured log entries with a format template,
//!   up to ten positional arguments, and optional caller context
//! - [`IntakeQueue`]: double-buffered lock-free producer intake
//! - [`LogEngine`]: lifecycle control, background flush worker, queries
//! - [`QueryModel`] / [`KeysetPage`]: bidirectionally cursored pagination
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_logden::{EngineConfig, Level, Log, LogEngine};
//!
//! let engine = LogEngine::new(EngineConfig::new("/var/lib/myapp"));
//!
//! // Producers enqueue without blocking; the background worker batches,
//! // deduplicates satellite strings, and persists into today's store.
//! engine.add(
//!     Log::new(Level::Info, "user {0} logged in from {1}", ["ada", "10.0.0.7"])
//!         .with_caller("handle_login", "src/auth.rs", 42),
//! );
//!
//! // Query a page back, newest first.
//! let page = engine
//!     .query()
//!     .with_level(Level::Info)
//!     .with_page_size(50)
//!     .keyset_paginate()?;
//! for log in &page.items {
//!     println!("{}", log.content());
//! }
//!
//! // On shutdown, flush whatever is still queued.
//! engine.flush_and_stop();
//! ```

#![deny(missing_docs)]

pub mod engine;
pub mod error;
pub mod flush;
pub mod hash;
pub mod intake;
pub mod model;
pub mod query;
pub mod store;
pub mod tick;

pub use engine::{EngineConfig, LogEngine};
pub use error::{LogError, Result};
pub use flush::pacer::PacerConfig;
pub use flush::quarantine::{QuarantineRecord, QuarantineSink};
pub use flush::FlushInfo;
pub use intake::IntakeQueue;
pub use model::{Argument, CallerInfo, Format, IntervalStat, Level, Log, MAX_ARGUMENTS};
pub use query::{KeysetPage, OrderType, QueryModel, DEFAULT_PAGE_SIZE};
pub use store::{list_log_files, log_file_exists, DayStore};
