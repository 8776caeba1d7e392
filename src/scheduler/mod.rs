//! Admission-controlled scheduling (C8, C9)
//!
//! Two schedulers share the same semaphore-gated admission shape: the
//! transfer scheduler (§4.4) additionally probes the memory pool before
//! admitting a job, the listing scheduler is a plain concurrency bound.

mod listing;
mod scheduler;

pub use listing::ListingScheduler;
pub use scheduler::{SchedulerPermit, TransferScheduler};
