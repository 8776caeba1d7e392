//! Directory transfer (C7)
//!
//! A producer/consumer hierarchical walk: worker tasks pull pending
//! sub-directories from a shared queue, list one level with an `Enumerator`,
//! spawn a `SingleObjectTransfer` for each file they see and push each
//! sub-directory they see back onto the queue for another worker to pick up.
//! Termination follows the teacher's `core::scheduler` worker-pool shape
//! (`spawn_copy_workers` in `core::copier`) generalized from a flat file list
//! to a directory-level producer: workers stop once the `outstandingListTasks`
//! counter reaches zero with the queue empty, not when any single worker runs
//! dry, since another worker may still be about to push more work.
//!
//! Cancellation and the first observed error are held in `DirectoryState`,
//! shared with every `SubDirectoryTransfer` through a `Weak` back-reference
//! per the engine's cyclic-reference design note — a sub-directory transfer
//! never keeps its parent alive, so a cancelled directory transfer can be
//! dropped even while sub-directory workers are still draining.

use super::name_resolution::NameResolver;
use super::single::SingleObjectTransfer;
use super::{TransferContext, TransferMethod};
use crate::blob::BlobClient;
use crate::enumerate::{Entry, Enumerator, LocalEnumerator};
use crate::error::{DmError, Result};
use crate::location::TransferLocation;
use crate::pool::CellPool;
use crate::progress::ProgressTracker;
use crate::scheduler::{ListingScheduler, TransferScheduler};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::warn;

/// Join a container's address with a directory-relative prefix into the
/// full listing prefix a `BlobClient` expects, matching how blob keys are
/// addressed everywhere else in the engine (see `TransferLocation::identity_key`).
fn join_remote_prefix(container_uri: &str, prefix: &str) -> String {
    let container = container_uri.trim_end_matches('/');
    if prefix.is_empty() {
        container.to_string()
    } else {
        format!("{}/{}", container, prefix.trim_matches('/'))
    }
}

/// State shared by a `DirectoryTransfer` and every `SubDirectoryTransfer`
/// it spawns, via `Weak` back-references so sub-transfers never keep the
/// parent alive past its own scope.
struct DirectoryState {
    outstanding_list_tasks: AtomicUsize,
    cancelled: AtomicBool,
    first_error: Mutex<Option<DmError>>,
}

impl DirectoryState {
    fn record_error(&self, err: DmError) {
        if err.cancels_siblings() {
            self.cancelled.store(true, Ordering::Release);
        }
        let mut slot = self.first_error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_error(&self) -> Option<DmError> {
        self.first_error.lock().unwrap().take()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// One pending sub-directory of a hierarchical walk, holding a `Weak`
/// back-reference to the directory transfer that queued it.
pub struct SubDirectoryTransfer {
    pub relative_path: String,
    parent: Weak<DirectoryState>,
}

impl SubDirectoryTransfer {
    /// Whether the parent directory transfer has been cancelled (or has
    /// already been dropped, which is treated the same as cancelled).
    pub fn should_abandon(&self) -> bool {
        self.parent.upgrade().map(|p| p.is_cancelled()).unwrap_or(true)
    }
}

/// A directory-to-directory transfer: either a local directory, a remote
/// blob "directory" (a prefix under a delimiter), or both.
pub struct DirectoryTransfer {
    source_root: TransferLocation,
    dest_root: TransferLocation,
    method: TransferMethod,
    context: TransferContext,
    progress: Arc<ProgressTracker>,
    overwrite: bool,
    resolver: NameResolver,
    max_listing_concurrency: usize,
    stall_window: Duration,
    state: Arc<DirectoryState>,
}

impl DirectoryTransfer {
    pub fn new(
        source_root: TransferLocation,
        dest_root: TransferLocation,
        method: TransferMethod,
        context: TransferContext,
        overwrite: bool,
        max_listing_concurrency: usize,
    ) -> Self {
        Self::with_stall_window(
            source_root,
            dest_root,
            method,
            context,
            overwrite,
            max_listing_concurrency,
            Duration::from_millis((3 * crate::config::COPY_STATUS_REFRESH_MAX_WAIT_MS).max(30_000)),
        )
    }

    /// Same as `new`, but threading an explicit stall window (from
    /// `EngineConfig::stall_window`) down to every file transfer this
    /// directory walk spawns.
    pub fn with_stall_window(
        source_root: TransferLocation,
        dest_root: TransferLocation,
        method: TransferMethod,
        context: TransferContext,
        overwrite: bool,
        max_listing_concurrency: usize,
        stall_window: Duration,
    ) -> Self {
        Self {
            source_root,
            dest_root,
            method,
            context,
            progress: ProgressTracker::new(),
            overwrite,
            resolver: NameResolver::default(),
            max_listing_concurrency: max_listing_concurrency.max(1),
            stall_window,
            state: Arc::new(DirectoryState {
                outstanding_list_tasks: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
                first_error: Mutex::new(None),
            }),
        }
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Drive the whole directory to completion. Returns the first error
    /// observed across any file or listing task, if any; every other file
    /// still runs to its own terminal state (skipped files never cancel
    /// siblings, per `DmError::cancels_siblings`).
    pub async fn execute(
        &self,
        blob_client: Arc<dyn BlobClient>,
        pool: Arc<CellPool>,
        transfer_scheduler: Arc<TransferScheduler>,
        listing_scheduler: Arc<ListingScheduler>,
    ) -> Result<()> {
        match (&self.source_root, &self.dest_root) {
            (TransferLocation::LocalDirectoryPath { dir }, TransferLocation::RemoteBlobDirectory { .. }) => {
                self.walk_local_source(dir.clone(), blob_client, pool, transfer_scheduler, listing_scheduler)
                    .await
            }
            (TransferLocation::RemoteBlobDirectory { .. }, TransferLocation::LocalDirectoryPath { dir }) => {
                self.walk_remote_source(dir.clone(), blob_client, pool, transfer_scheduler, listing_scheduler)
                    .await
            }
            (TransferLocation::RemoteBlobDirectory { .. }, TransferLocation::RemoteBlobDirectory { .. }) => {
                self.walk_blob_to_blob(blob_client, transfer_scheduler).await
            }
            (source, dest) => Err(DmError::UncategorizedException(format!(
                "unsupported directory transfer shape: {:?} -> {:?}",
                source.kind(),
                dest.kind()
            ))),
        }
    }

    /// Upload: a local directory tree to a remote blob prefix.
    ///
    /// Listing workers discover files and push them onto a shared channel;
    /// a single dispatch task drains that channel and spawns each file
    /// transfer onto its own `JoinSet` task as soon as it is discovered, so
    /// transferring overlaps with listing rather than waiting for the whole
    /// tree to be enumerated first.
    async fn walk_local_source(
        &self,
        root: PathBuf,
        blob_client: Arc<dyn BlobClient>,
        pool: Arc<CellPool>,
        transfer_scheduler: Arc<TransferScheduler>,
        listing_scheduler: Arc<ListingScheduler>,
    ) -> Result<()> {
        let queue: Arc<AsyncMutex<VecDeque<SubDirectoryTransfer>>> = Arc::new(AsyncMutex::new(VecDeque::new()));
        self.state.outstanding_list_tasks.fetch_add(1, Ordering::AcqRel);
        queue.lock().await.push_back(SubDirectoryTransfer {
            relative_path: String::new(),
            parent: Arc::downgrade(&self.state),
        });

        let (job_tx, mut job_rx) = tokio::sync::mpsc::unbounded_channel::<SingleObjectTransfer>();

        let mut listing_workers: JoinSet<()> = JoinSet::new();
        for _ in 0..self.max_listing_concurrency {
            let queue = Arc::clone(&queue);
            let state = Arc::clone(&self.state);
            let listing_scheduler = Arc::clone(&listing_scheduler);
            let root = root.clone();
            let dest_root = self.dest_root.clone();
            let resolver = self.resolver;
            let method = self.method;
            let context = self.context.clone();
            let overwrite = self.overwrite;
            let stall_window = self.stall_window;
            let progress = Arc::clone(&self.progress);
            let job_tx = job_tx.clone();

            listing_workers.spawn(async move {
                loop {
                    let next = { queue.lock().await.pop_front() };
                    let Some(sub_dir) = next else {
                        if state.outstanding_list_tasks.load(Ordering::Acquire) == 0 {
                            break;
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                        continue;
                    };
                    if sub_dir.should_abandon() {
                        state.outstanding_list_tasks.fetch_sub(1, Ordering::AcqRel);
                        continue;
                    }
                    let _permit = match listing_scheduler.admit().await {
                        Ok(p) => p,
                        Err(e) => {
                            state.record_error(e);
                            state.outstanding_list_tasks.fetch_sub(1, Ordering::AcqRel);
                            continue;
                        }
                    };
                    let full_dir = if sub_dir.relative_path.is_empty() {
                        root.clone()
                    } else {
                        root.join(&sub_dir.relative_path)
                    };
                    let mut enumerator = match LocalEnumerator::new(full_dir, true) {
                        Ok(e) => e,
                        Err(e) => {
                            state.record_error(e);
                            state.outstanding_list_tasks.fetch_sub(1, Ordering::AcqRel);
                            continue;
                        }
                    };
                    loop {
                        match enumerator.next() {
                            Ok(Some(Entry::Directory(d))) => {
                                state.outstanding_list_tasks.fetch_add(1, Ordering::AcqRel);
                                queue.lock().await.push_back(SubDirectoryTransfer {
                                    relative_path: d.relative_path,
                                    parent: Arc::downgrade(&state),
                                });
                            }
                            Ok(Some(Entry::File(f))) => {
                                let dest = resolver.resolve(&dest_root, &f.relative_path);
                                let child_progress = ProgressTracker::child_of(&progress);
                                let built = SingleObjectTransfer::with_stall_window(
                                    TransferLocation::LocalFilePath {
                                        path: f.full_path,
                                        rel_path: Some(f.relative_path.clone()),
                                    },
                                    dest,
                                    method,
                                    context.clone(),
                                    child_progress,
                                    overwrite,
                                    stall_window,
                                );
                                match built {
                                    Ok(job) => {
                                        let _ = job_tx.send(job);
                                    }
                                    Err(e) => state.record_error(e),
                                }
                            }
                            Ok(Some(Entry::Error(e))) => {
                                warn!(relative_path = ?e.relative_path, message = %e.message, "enumeration error");
                            }
                            Ok(None) => break,
                            Err(e) => {
                                state.record_error(e);
                                break;
                            }
                        }
                    }
                    state.outstanding_list_tasks.fetch_sub(1, Ordering::AcqRel);
                }
            });
        }
        drop(job_tx);

        let dispatch_state = Arc::clone(&self.state);
        let mut file_jobs: JoinSet<Result<()>> = JoinSet::new();
        let dispatch = async {
            while let Some(job) = job_rx.recv().await {
                let job = Arc::new(job);
                let blob_client = Arc::clone(&blob_client);
                let pool = Arc::clone(&pool);
                let scheduler = Arc::clone(&transfer_scheduler);
                file_jobs.spawn(async move {
                    let permit = scheduler.admit().await?;
                    let cancelled = Arc::new(AtomicBool::new(false));
                    let result = job.execute(blob_client, pool, cancelled).await;
                    scheduler.record_outcome(result.is_ok());
                    drop(permit);
                    result
                });
            }
            while let Some(joined) = file_jobs.join_next().await {
                match joined {
                    Ok(Err(e)) => dispatch_state.record_error(e),
                    Err(e) => dispatch_state.record_error(DmError::UncategorizedException(e.to_string())),
                    Ok(Ok(())) => {}
                }
            }
        };

        let drain_listing = async {
            while listing_workers.join_next().await.is_some() {}
        };

        tokio::join!(dispatch, drain_listing);

        self.state.take_error().map_or(Ok(()), Err)
    }

    /// Download: a remote blob prefix to a local directory.
    async fn walk_remote_source(
        &self,
        root: PathBuf,
        blob_client: Arc<dyn BlobClient>,
        pool: Arc<CellPool>,
        transfer_scheduler: Arc<TransferScheduler>,
        listing_scheduler: Arc<ListingScheduler>,
    ) -> Result<()> {
        let (container_uri, prefix) = match &self.source_root {
            TransferLocation::RemoteBlobDirectory { container_uri, prefix, .. } => {
                (container_uri.clone(), prefix.clone())
            }
            _ => unreachable!("caller already matched the source kind"),
        };

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| DmError::io(root.clone(), e))?;

        // Blobs in this engine are keyed by their full `container_uri/prefix/relpath`
        // address (see `TransferLocation::identity_key`), so the listing prefix must
        // include the container too, not just the directory-relative `prefix`.
        let list_prefix = join_remote_prefix(&container_uri, &prefix);

        let mut file_jobs: JoinSet<Result<()>> = JoinSet::new();
        let mut continuation: Option<String> = None;
        loop {
            let _permit = listing_scheduler.admit().await?;
            let segment = blob_client
                .list_blobs_segmented(&list_prefix, None, continuation.as_deref())
                .await?;
            for entry in segment.entries {
                let relative_path = entry
                    .name
                    .strip_prefix(&format!("{}/", list_prefix.trim_matches('/')))
                    .unwrap_or(&entry.name)
                    .to_string();
                if entry.is_directory_marker {
                    // A zero-byte `hdi_isfolder` marker carries no data, but the
                    // directory it names still needs to exist locally even when
                    // no real file under it is ever listed.
                    let marker_dir = super::name_resolution::local_destination_path(&root, &relative_path);
                    tokio::fs::create_dir_all(&marker_dir)
                        .await
                        .map_err(|e| DmError::io(marker_dir, e))?;
                    continue;
                }
                let dest_path = super::name_resolution::local_destination_path(&root, &relative_path);
                if let Some(parent) = dest_path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| DmError::io(parent.to_path_buf(), e))?;
                }
                let child_progress = ProgressTracker::child_of(&self.progress);
                let job = Arc::new(SingleObjectTransfer::with_stall_window(
                    TransferLocation::RemoteBlob {
                        // `entry.name` is already the full `container/prefix/relpath`
                        // key (the listing prefix itself includes the container), so
                        // it must be used as-is rather than re-prefixed with
                        // `container_uri` — doing so would address a blob that was
                        // never actually listed.
                        uri: entry.name.clone(),
                        snapshot: None,
                        blob_type: crate::location::BlobType::Block,
                        credentials: match &self.source_root {
                            TransferLocation::RemoteBlobDirectory { credentials, .. } => credentials.clone(),
                            _ => unreachable!(),
                        },
                        access_condition: None,
                        request_options: crate::location::RequestOptions::default(),
                    },
                    TransferLocation::LocalFilePath {
                        path: dest_path,
                        rel_path: Some(relative_path),
                    },
                    self.method,
                    self.context.clone(),
                    child_progress,
                    self.overwrite,
                    self.stall_window,
                )?);
                let blob_client = Arc::clone(&blob_client);
                let pool = Arc::clone(&pool);
                let scheduler = Arc::clone(&transfer_scheduler);
                file_jobs.spawn(async move {
                    let permit = scheduler.admit().await?;
                    let cancelled = Arc::new(AtomicBool::new(false));
                    let result = job.execute(blob_client, pool, cancelled).await;
                    scheduler.record_outcome(result.is_ok());
                    drop(permit);
                    result
                });
            }
            continuation = segment.next_token;
            if continuation.is_none() {
                break;
            }
        }

        while let Some(joined) = file_jobs.join_next().await {
            match joined {
                Ok(Err(e)) => self.state.record_error(e),
                Err(e) => self.state.record_error(DmError::UncategorizedException(e.to_string())),
                Ok(Ok(())) => {}
            }
        }

        self.state.take_error().map_or(Ok(()), Err)
    }

    /// Server-side copy: a remote blob prefix to another remote blob prefix.
    async fn walk_blob_to_blob(
        &self,
        blob_client: Arc<dyn BlobClient>,
        transfer_scheduler: Arc<TransferScheduler>,
    ) -> Result<()> {
        let (container_uri, prefix) = match &self.source_root {
            TransferLocation::RemoteBlobDirectory { container_uri, prefix, .. } => {
                (container_uri.clone(), prefix.clone())
            }
            _ => unreachable!("caller already matched the source kind"),
        };
        let list_prefix = join_remote_prefix(&container_uri, &prefix);

        let mut file_jobs: JoinSet<Result<()>> = JoinSet::new();
        let mut continuation: Option<String> = None;
        loop {
            let segment = blob_client
                .list_blobs_segmented(&list_prefix, None, continuation.as_deref())
                .await?;
            for entry in segment.entries {
                if entry.is_directory_marker {
                    continue;
                }
                let relative_path = entry
                    .name
                    .strip_prefix(&format!("{}/", list_prefix.trim_matches('/')))
                    .unwrap_or(&entry.name)
                    .to_string();
                let dest = self.resolver.resolve(&self.dest_root, &relative_path);
                let source = match &self.source_root {
                    TransferLocation::RemoteBlobDirectory { credentials, .. } => {
                        TransferLocation::RemoteBlob {
                            // See the matching comment in `walk_remote_source`:
                            // `entry.name` is already the full listing key.
                            uri: entry.name.clone(),
                            snapshot: None,
                            blob_type: crate::location::BlobType::Block,
                            credentials: credentials.clone(),
                            access_condition: None,
                            request_options: crate::location::RequestOptions::default(),
                        }
                    }
                    _ => unreachable!(),
                };
                let child_progress = ProgressTracker::child_of(&self.progress);
                let job = Arc::new(SingleObjectTransfer::with_stall_window(
                    source,
                    dest,
                    TransferMethod::ServiceSideAsyncCopy,
                    self.context.clone(),
                    child_progress,
                    self.overwrite,
                    self.stall_window,
                )?);
                let blob_client = Arc::clone(&blob_client);
                let scheduler = Arc::clone(&transfer_scheduler);
                file_jobs.spawn(async move {
                    let permit = scheduler.admit().await?;
                    let cancelled = Arc::new(AtomicBool::new(false));
                    let pool = Arc::new(CellPool::with_cell_count(1));
                    let result = job.execute(blob_client, pool, cancelled).await;
                    scheduler.record_outcome(result.is_ok());
                    drop(permit);
                    result
                });
            }
            continuation = segment.next_token;
            if continuation.is_none() {
                break;
            }
        }

        while let Some(joined) = file_jobs.join_next().await {
            match joined {
                Ok(Err(e)) => self.state.record_error(e),
                Err(e) => self.state.record_error(DmError::UncategorizedException(e.to_string())),
                Ok(Ok(())) => {}
            }
        }

        self.state.take_error().map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobStore;
    use crate::location::{Credentials, RequestOptions};
    use tempfile::tempdir;

    #[tokio::test]
    async fn uploads_a_flat_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"aaa").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), b"c").unwrap();

        let store = Arc::new(InMemoryBlobStore::new());
        let pool = Arc::new(CellPool::with_cell_count(8));
        let config = crate::config::EngineConfig::default();
        let transfer_scheduler = TransferScheduler::new(&config, Arc::clone(&pool));
        let listing_scheduler = ListingScheduler::new(4);

        let transfer = DirectoryTransfer::new(
            TransferLocation::LocalDirectoryPath { dir: dir.path().to_path_buf() },
            TransferLocation::RemoteBlobDirectory {
                container_uri: "container".to_string(),
                prefix: String::new(),
                credentials: Credentials { token: "t".into() },
                request_options: RequestOptions::default(),
            },
            TransferMethod::SyncCopy,
            TransferContext::default(),
            true,
            4,
        );

        transfer
            .execute(store.clone(), pool, transfer_scheduler, listing_scheduler)
            .await
            .unwrap();

        let snap = transfer.progress().snapshot();
        assert_eq!(snap.files_transferred, 3);
        assert_eq!(store.read("container/a.txt").unwrap(), b"aaa");
        assert_eq!(store.read("container/sub/c.txt").unwrap(), b"c");
    }

    /// S4: a zero-byte `hdi_isfolder` marker at `sub/` creates the local
    /// `sub/` directory with no data written, and is not counted as a
    /// transferred file.
    #[tokio::test]
    async fn directory_marker_blob_creates_local_directory() {
        let dest_dir = tempdir().unwrap();

        let store = Arc::new(InMemoryBlobStore::new());
        store.seed("container/root.txt", b"root".to_vec(), crate::location::BlobType::Block);
        store.seed_directory_marker("container/sub/");

        let pool = Arc::new(CellPool::with_cell_count(8));
        let config = crate::config::EngineConfig::default();
        let transfer_scheduler = TransferScheduler::new(&config, Arc::clone(&pool));
        let listing_scheduler = ListingScheduler::new(4);

        let transfer = DirectoryTransfer::new(
            TransferLocation::RemoteBlobDirectory {
                container_uri: "container".to_string(),
                prefix: String::new(),
                credentials: Credentials { token: "t".into() },
                request_options: RequestOptions::default(),
            },
            TransferLocation::LocalDirectoryPath { dir: dest_dir.path().to_path_buf() },
            TransferMethod::SyncCopy,
            TransferContext::default(),
            true,
            4,
        );

        transfer
            .execute(store.clone(), pool, transfer_scheduler, listing_scheduler)
            .await
            .unwrap();

        let snap = transfer.progress().snapshot();
        assert_eq!(snap.files_transferred, 1, "only root.txt is a real file");
        assert!(dest_dir.path().join("sub").is_dir());
        assert_eq!(
            std::fs::read(dest_dir.path().join("root.txt")).unwrap(),
            b"root"
        );
    }
}
