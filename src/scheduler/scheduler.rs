//! Transfer scheduler (C8)
//!
//! Generalized from the teacher's `core::scheduler::TaskScheduler`
//! (crossbeam-bounded channel, blocking `thread::spawn` worker pool, atomic
//! `SchedulerStats`) into an async admission gate: a `tokio::sync::Semaphore`
//! bounds concurrency the way the teacher's channel capacity did, and every
//! admission additionally probes the memory pool (C1) before letting a job
//! through, per §4.4's joint "concurrency AND memory" admission rule.
//!
//! The probe is a reserve-then-immediately-drop of one cell: `single.rs`
//! already does its own fine-grained per-chunk reservations, so the
//! scheduler only needs to confirm the pool isn't fully drained before
//! admitting another job, not reserve the job's whole working set up front.

use crate::config::EngineConfig;
use crate::error::{DmError, Result};
use crate::pool::CellPool;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Running totals exposed for diagnostics, mirroring the shape of the
/// teacher's `SchedulerStats` (completed/failed counters) without the
/// teacher's per-worker breakdown, which has no async equivalent here.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub admitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

/// Holds the admission slot (semaphore permit) for one job's lifetime.
/// Dropping it releases the slot back to the scheduler.
pub struct SchedulerPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bounded-parallelism admission gate for single-object transfers.
pub struct TransferScheduler {
    semaphore: Arc<Semaphore>,
    pool: Arc<CellPool>,
    in_flight: AtomicUsize,
    stats: SchedulerStats,
}

impl TransferScheduler {
    /// Build a scheduler bounded by `config.parallel_operations` concurrent
    /// admissions, backed by `pool` for the joint memory probe.
    pub fn new(config: &EngineConfig, pool: Arc<CellPool>) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.parallel_operations.max(1))),
            pool,
            in_flight: AtomicUsize::new(0),
            stats: SchedulerStats::default(),
        })
    }

    /// Current number of admitted, not-yet-completed jobs.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Block (asynchronously) until a concurrency slot is free and the
    /// memory pool can spare at least one cell, then return a permit the
    /// caller holds for the job's duration.
    pub async fn admit(self: &Arc<Self>) -> Result<SchedulerPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DmError::UncategorizedException("scheduler semaphore closed".to_string()))?;

        // Joint admission: probe-then-release one cell so a job is never
        // admitted while the pool is fully drained, without holding a cell
        // reserved for the whole job (chunks reserve their own as they go).
        loop {
            match self.pool.try_reserve(1)? {
                Some(_cell) => break,
                None => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
            }
        }

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.stats.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(SchedulerPermit { _permit: permit })
    }

    /// Record a job's terminal outcome for the stats counters. The permit
    /// itself is released by dropping it; this only updates bookkeeping.
    pub fn record_outcome(&self, ok: bool) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if ok {
            self.stats.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admission_is_bounded_by_configured_concurrency() {
        let config = EngineConfig::default().with_parallel_operations(1);
        let pool = Arc::new(CellPool::with_cell_count(4));
        let scheduler = TransferScheduler::new(&config, pool);

        let first = scheduler.admit().await.unwrap();
        assert_eq!(scheduler.in_flight(), 1);

        let scheduler2 = Arc::clone(&scheduler);
        let second = tokio::time::timeout(std::time::Duration::from_millis(50), scheduler2.admit()).await;
        assert!(second.is_err(), "second admission should block while the first permit is held");

        drop(first);
        scheduler.record_outcome(true);
        let second = scheduler.admit().await.unwrap();
        assert_eq!(scheduler.in_flight(), 1);
        drop(second);
    }

    #[tokio::test]
    async fn admission_fails_fast_when_pool_exceeds_ceiling() {
        // Pool with zero cells: try_reserve(1) returns OutOfMemory immediately.
        let config = EngineConfig::default();
        let pool = Arc::new(CellPool::with_cell_count(0));
        let scheduler = TransferScheduler::new(&config, pool);
        let err = scheduler.admit().await.unwrap_err();
        assert!(matches!(err, DmError::OutOfMemory { .. }));
    }
}
