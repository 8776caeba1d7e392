//! Transfer model: single-object transfers (C6) and directory transfers
//! (C7), plus the shared types they both build on.

pub mod directory;
pub mod name_resolution;
pub mod single;

pub use directory::{DirectoryTransfer, SubDirectoryTransfer};
pub use single::{JobStatus, SingleObjectCheckpoint, SingleObjectTransfer, TransferJob};

use crate::location::TransferLocation;
use crate::progress::ProgressTracker;
use dashmap::DashMap;
use std::sync::Arc;

/// How a single object moves from source to destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransferMethod {
    /// Read from source into memory, write to destination.
    SyncCopy,
    /// Issue a remote server-side copy, then poll until terminal.
    ServiceSideAsyncCopy,
    /// Synchronous server-to-server copy.
    ServiceSideSyncCopy,
    /// Directory-placeholder marker; no payload transferred.
    DummyCopy,
}

/// User-supplied callbacks and validation hooks for a transfer.
#[derive(Default, Clone)]
pub struct TransferContext {
    pub should_overwrite: Option<Arc<dyn Fn(&str, &str) -> bool + Send + Sync>>,
    pub should_transfer: Option<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
    pub validate_path: Option<Arc<dyn Fn(&str) -> crate::error::Result<()> + Send + Sync>>,
}

impl std::fmt::Debug for TransferContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferContext")
            .field("should_overwrite", &self.should_overwrite.is_some())
            .field("should_transfer", &self.should_transfer.is_some())
            .field("validate_path", &self.validate_path.is_some())
            .finish()
    }
}

/// Key identifying a transfer in the in-memory index and checkpoint map.
pub type TransferKey = (String, String);

/// Build the `(source, dest)` key used for transfer identity.
pub fn transfer_key(source: &TransferLocation, destination: &TransferLocation) -> TransferKey {
    (source.identity_key(), destination.identity_key())
}

/// A concurrent map of active transfers keyed by `(source, dest)`, with an
/// aggregate progress tracker parenting every member's tracker.
pub struct TransferCollection<T> {
    members: DashMap<TransferKey, Arc<T>>,
    aggregate_progress: Arc<ProgressTracker>,
}

impl<T> Default for TransferCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TransferCollection<T> {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            aggregate_progress: ProgressTracker::new(),
        }
    }

    /// The aggregate tracker every member's tracker should be parented to.
    pub fn aggregate_progress(&self) -> &Arc<ProgressTracker> {
        &self.aggregate_progress
    }

    /// Insert a transfer, failing if the key is already present.
    pub fn insert(&self, key: TransferKey, value: Arc<T>) -> crate::error::Result<()> {
        if self.members.contains_key(&key) {
            return Err(crate::error::DmError::TransferAlreadyExists(format!(
                "{}->{}",
                key.0, key.1
            )));
        }
        self.members.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &TransferKey) -> Option<Arc<T>> {
        self.members.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn remove(&self, key: &TransferKey) -> Option<Arc<T>> {
        self.members.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
