//! Double-buffered lock-free intake queue.
//!
//! Two multi-producer queues sit behind one atomic index that designates the
//! *active* buffer. Producers perform one atomic load and one lock-free
//! enqueue; they never block and never fail. The flush worker swaps the
//! index and drains whichever buffer was active, so the swap is the only
//! cross-party synchronization point.
//!
//! A producer that loads the index just before a swap may still enqueue
//! into the swapped-out buffer while the worker drains it. That entry is
//! either picked up by the in-progress drain or left for the next flush;
//! both are correct because per-producer FIFO within a buffer is all the
//! ordering the pipeline promises before the tick sort.

use crate::model::Log;
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Double-buffered intake queue pair with an atomic active-buffer switch.
#[derive(Debug, Default)]
pub struct IntakeQueue {
    buffers: [SegQueue<Log>; 2],
    active: AtomicUsize,
}

impl IntakeQueue {
    /// Creates an empty queue pair with buffer 0 active.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a log into the currently active buffer.
    ///
    /// Safe to call from any number of producer threads concurrently.
    pub fn push(&self, log: Log) {
        let active = self.active.load(Ordering::Acquire);
        self.buffers[active].push(log);
    }

    /// Number of logs waiting in the active buffer.
    ///
    /// A racy snapshot; the pacer only needs backlog magnitude.
    pub fn backlog(&self) -> usize {
        let active = self.active.load(Ordering::Acquire);
        self.buffers[active].len()
    }

    /// Swaps the active buffer and drains the previously active one.
    ///
    /// Worker-only: there must be at most one concurrent caller. Returned
    /// logs keep their per-producer enqueue order.
    pub fn swap_drain(&self) -> Vec<Log> {
        let drained = self.active.fetch_xor(1, Ordering::AcqRel);
        let buffer = &self.buffers[drained];
        let mut logs = Vec::with_capacity(buffer.len());
        while let Some(log) = buffer.pop() {
            logs.push(log);
        }
        logs
    }
}
