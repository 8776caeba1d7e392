//! Directory-listing scheduler (C9)
//!
//! A much smaller sibling of `TransferScheduler`: directory enumeration only
//! needs a concurrency bound, never a memory-pool probe, since listing a
//! directory level doesn't consume pool cells. Default bounds per §4.4:
//! `DEFAULT_LISTING_CONCURRENCY_REMOTE` (6) when neither endpoint is local,
//! `DEFAULT_LISTING_CONCURRENCY_LOCAL` (4) when either endpoint is local.

use crate::error::{DmError, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct ListingPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bounded-concurrency gate for sub-directory listing tasks.
pub struct ListingScheduler {
    semaphore: Arc<Semaphore>,
}

impl ListingScheduler {
    pub fn new(max_listing_concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max_listing_concurrency.max(1))),
        })
    }

    pub async fn admit(self: &Arc<Self>) -> Result<ListingPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DmError::UncategorizedException("listing semaphore closed".to_string()))?;
        Ok(ListingPermit { _permit: permit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounds_concurrent_listing_tasks() {
        let scheduler = ListingScheduler::new(1);
        let first = scheduler.admit().await.unwrap();
        let scheduler2 = Arc::clone(&scheduler);
        let second = tokio::time::timeout(std::time::Duration::from_millis(30), scheduler2.admit()).await;
        assert!(second.is_err());
        drop(first);
        let second = scheduler.admit().await.unwrap();
        drop(second);
    }
}
