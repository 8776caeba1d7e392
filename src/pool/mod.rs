//! Memory pool (C1)
//!
//! Lends fixed-size `4 MiB` cells to transfer jobs, bounded by a global
//! ceiling derived from available physical memory. Reservation is
//! all-or-nothing: a job either gets every cell it asked for, or none.

use crate::config::{
    CELL_SIZE_BYTES, MEMORY_CACHE_MAXIMUM_BYTES, MEMORY_CACHE_MULTIPLIER,
    MEMORY_MANAGER_CELLS_MAXIMUM,
};
use crate::error::{DmError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use sysinfo::System;
use tracing::{debug, warn};

/// A single 4 MiB buffer cell on loan from the pool.
///
/// Dropping a `Cell` returns it to the pool automatically; callers never
/// call `release` directly on an individual cell, only on the `Vec<Cell>`
/// returned by `reserve` (which drops each member in turn).
pub struct Cell {
    buf: Vec<u8>,
    returner: Sender<Vec<u8>>,
    in_use: Arc<AtomicUsize>,
}

impl Cell {
    /// The cell's backing buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// The cell's backing buffer, mutable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Cell capacity in bytes; always `CELL_SIZE_BYTES`.
    pub fn capacity(&self) -> u64 {
        self.buf.capacity() as u64
    }
}

impl Drop for Cell {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        // A full channel here only happens if more cells are in flight than
        // `total_cells`, which would itself be a bug; ignore a send failure
        // rather than panic in a destructor.
        let _ = self.returner.send(buf);
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Bounded pool of fixed-size memory cells.
pub struct CellPool {
    total_cells: usize,
    in_use: Arc<AtomicUsize>,
    free: Receiver<Vec<u8>>,
    return_to: Sender<Vec<u8>>,
}

impl CellPool {
    /// Construct a pool sized from available physical memory, honoring an
    /// optional ceiling override from `EngineConfig::maximum_cache_size`.
    pub fn from_available_memory(maximum_cache_size_override: Option<u64>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();
        let available = sys.available_memory();

        let ceiling_bytes = maximum_cache_size_override.unwrap_or(MEMORY_CACHE_MAXIMUM_BYTES);
        let budget_bytes =
            ((available as f64) * MEMORY_CACHE_MULTIPLIER).min(ceiling_bytes as f64) as u64;
        let cells_by_memory = (budget_bytes / CELL_SIZE_BYTES) as usize;
        let total_cells = cells_by_memory.min(MEMORY_MANAGER_CELLS_MAXIMUM).max(1);

        debug!(
            available_bytes = available,
            total_cells, "sized memory pool from available physical memory"
        );
        Self::with_cell_count(total_cells)
    }

    /// Construct a pool with an explicit cell count (primarily for tests).
    pub fn with_cell_count(total_cells: usize) -> Self {
        let (tx, rx) = channel::unbounded();
        for _ in 0..total_cells {
            tx.send(vec![0u8; CELL_SIZE_BYTES as usize]).ok();
        }
        Self {
            total_cells,
            in_use: Arc::new(AtomicUsize::new(0)),
            free: rx,
            return_to: tx,
        }
    }

    /// Total number of cells this pool was configured with.
    pub fn total_cells(&self) -> usize {
        self.total_cells
    }

    /// Number of cells currently on loan.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Reserve `n` cells, all-or-nothing. Returns `OutOfMemory` if `n`
    /// exceeds the pool's total capacity; returns `Ok(None)` (a
    /// non-blocking "try again later") if cells are merely all in use right
    /// now.
    pub fn try_reserve(self: &Arc<Self>, n: usize) -> Result<Option<Vec<Cell>>> {
        if n > self.total_cells {
            return Err(DmError::OutOfMemory {
                requested: n,
                ceiling: self.total_cells,
            });
        }

        let mut bufs = Vec::with_capacity(n);
        for _ in 0..n {
            match self.free.try_recv() {
                Ok(buf) => bufs.push(buf),
                Err(_) => {
                    // Couldn't get enough cells right now: give back what we
                    // took so this call is all-or-nothing.
                    for buf in bufs {
                        let _ = self.return_to.send(buf);
                    }
                    return Ok(None);
                }
            }
        }

        self.in_use.fetch_add(n, Ordering::Relaxed);
        Ok(Some(
            bufs.into_iter()
                .map(|buf| Cell {
                    buf,
                    returner: self.return_to.clone(),
                    in_use: Arc::clone(&self.in_use),
                })
                .collect(),
        ))
    }

    /// Reserve `n` cells, yielding to the async runtime between attempts
    /// instead of blocking the worker thread. The suspension point this
    /// creates is one of §5's enumerated cancellation checkpoints, so chunk
    /// loops that call this stay responsive to cancellation even while
    /// waiting on the pool.
    pub async fn reserve(self: &Arc<Self>, n: usize) -> Result<Vec<Cell>> {
        loop {
            if let Some(cells) = self.try_reserve(n)? {
                return Ok(cells);
            }
            warn!(n, "memory pool has no free cells, waiting");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_is_all_or_nothing() {
        let pool = Arc::new(CellPool::with_cell_count(4));
        let first = pool.try_reserve(3).unwrap().unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(pool.in_use(), 3);

        // Only 1 cell left; asking for 2 should yield Ok(None), not a partial grant.
        let second = pool.try_reserve(2).unwrap();
        assert!(second.is_none());
        assert_eq!(pool.in_use(), 3);
    }

    #[test]
    fn out_of_memory_when_over_ceiling() {
        let pool = Arc::new(CellPool::with_cell_count(2));
        let err = pool.try_reserve(3).unwrap_err();
        assert!(matches!(err, DmError::OutOfMemory { requested: 3, ceiling: 2 }));
    }

    #[test]
    fn dropping_cells_returns_them_to_the_pool() {
        let pool = Arc::new(CellPool::with_cell_count(2));
        {
            let cells = pool.try_reserve(2).unwrap().unwrap();
            assert_eq!(pool.in_use(), 2);
            drop(cells);
        }
        // give the channel a moment to deliver the returned buffers
        std::thread::sleep(std::time::Duration::from_millis(10));
        let again = pool.try_reserve(2).unwrap();
        assert!(again.is_some());
    }
}
