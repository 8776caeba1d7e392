//! Single-object transfer (C6)
//!
//! Drives one object end-to-end through the state machine described in
//! §4.5: `NotStarted -> (ShouldTransferCheck) -> Transfer -> Monitor? ->
//! Finished | Failed | Skipped | SkippedDueToShouldNotTransfer`.
//!
//! The chunked `SyncCopy` body is grounded on the teacher's
//! `fs::operations::FileCopier::copy_with_hash` (buffered-chunk read loop
//! updating a hasher incrementally), generalized to read/write through the
//! `BlobClient` capability instead of directly through `std::fs`.

use super::TransferMethod;
use crate::blob::BlobClient;
use crate::config::{
    APPEND_BLOB_MAX_BLOCK_SIZE_BYTES, APPEND_BLOB_MAX_BLOCKS, BLOCK_BLOB_MAX_BLOCKS,
    BLOCK_BLOB_MAX_BLOCK_SIZE_BYTES, CELL_SIZE_BYTES, COPY_APPROACHING_FINISH_THRESHOLD_BYTES,
    COPY_STATUS_REFRESH_MAX_WAIT_MS, COPY_STATUS_REFRESH_MIN_WAIT_MS, MAX_COUNT_IN_TRANSFER_WINDOW,
    RELATIVE_PATH_LIMIT_CHARS,
};
use crate::error::{DmError, Result};
use crate::location::{BlobType, TransferLocation};
use crate::pool::CellPool;
use crate::progress::ProgressTracker;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// State a `TransferJob` can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum JobStatus {
    NotStarted,
    Transfer,
    Monitor,
    Finished,
    Failed,
    Skipped,
    SkippedDueToShouldNotTransfer,
}

impl JobStatus {
    /// Whether this status is terminal (the state machine will not advance
    /// further without an explicit resume).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Failed | Self::Skipped | Self::SkippedDueToShouldNotTransfer
        )
    }
}

/// A single outstanding chunk range within the sliding checkpoint window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChunkRange {
    pub offset: u64,
    pub length: u64,
}

/// Sliding window of at most `MAX_COUNT_IN_TRANSFER_WINDOW` chunk ranges
/// completed but not yet "forgotten" — the journal only needs to remember
/// enough to resume from the furthest contiguous point, but keeping the
/// window lets resume detect and skip non-contiguous completed chunks too
/// (e.g. out-of-order completions under concurrent chunk writers).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SingleObjectCheckpoint {
    window: VecDeque<ChunkRange>,
    pub bytes_committed: u64,
    pub block_ids: Vec<String>,
}

impl SingleObjectCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully written chunk, evicting the oldest window
    /// entry once the window exceeds its bound.
    pub fn record_chunk(&mut self, range: ChunkRange, block_id: Option<String>) {
        self.window.push_back(range);
        while self.window.len() > MAX_COUNT_IN_TRANSFER_WINDOW {
            self.window.pop_front();
        }
        self.bytes_committed += range.length;
        if let Some(id) = block_id {
            self.block_ids.push(id);
        }
    }

    /// The next offset to resume reading/writing from, assuming chunks are
    /// always written in increasing offset order (per §5's ordering
    /// guarantee for a single file).
    pub fn resume_offset(&self) -> u64 {
        self.bytes_committed
    }
}

/// Everything the scheduler needs to drive one single-object transfer.
pub struct TransferJob {
    pub overwrite: bool,
    pub copy_id: Option<String>,
    pub status: JobStatus,
    pub checkpoint: SingleObjectCheckpoint,
}

impl TransferJob {
    pub fn new(overwrite: bool) -> Self {
        Self {
            overwrite,
            copy_id: None,
            status: JobStatus::NotStarted,
            checkpoint: SingleObjectCheckpoint::new(),
        }
    }

    /// Reposition a job recovered from the journal with status `Failed`:
    /// back to `Transfer` if no copy was ever started, else `Monitor`.
    pub fn reposition_for_resume(&mut self) {
        if self.status == JobStatus::Failed {
            self.status = if self.copy_id.is_none() {
                JobStatus::Transfer
            } else {
                JobStatus::Monitor
            };
        }
    }
}

/// Auto-tune the block size to the smallest multiple of `CELL_SIZE_BYTES`
/// that keeps the block count within `BLOCK_BLOB_MAX_BLOCKS`, capped at
/// `BLOCK_BLOB_MAX_BLOCK_SIZE_BYTES`.
pub fn tune_block_size(total_size: u64) -> u64 {
    if total_size == 0 {
        return CELL_SIZE_BYTES;
    }
    let min_block_size = total_size.div_ceil(BLOCK_BLOB_MAX_BLOCKS);
    let tuned = min_block_size.div_ceil(CELL_SIZE_BYTES) * CELL_SIZE_BYTES;
    tuned.clamp(CELL_SIZE_BYTES, BLOCK_BLOB_MAX_BLOCK_SIZE_BYTES)
}

/// Validate a candidate transfer against the protocol's numeric limits
/// (§4.5), raising an error at job-construction time rather than partway
/// through the chunk loop.
pub fn validate_size_limits(blob_type: BlobType, size: u64) -> Result<()> {
    match blob_type {
        BlobType::Block => {
            let block_size = tune_block_size(size);
            if size > block_size * BLOCK_BLOB_MAX_BLOCKS {
                return Err(DmError::UncategorizedException(format!(
                    "object of {size} bytes exceeds block blob capacity"
                )));
            }
        }
        BlobType::Append => {
            if size > APPEND_BLOB_MAX_BLOCK_SIZE_BYTES * APPEND_BLOB_MAX_BLOCKS {
                return Err(DmError::UncategorizedException(format!(
                    "object of {size} bytes exceeds append blob capacity"
                )));
            }
        }
        BlobType::Page => {}
    }
    Ok(())
}

/// A single-object transfer: the unit C7 wraps one file in.
pub struct SingleObjectTransfer {
    pub source: TransferLocation,
    pub destination: TransferLocation,
    pub method: TransferMethod,
    pub context: super::TransferContext,
    pub progress: Arc<ProgressTracker>,
    pub job: std::sync::Mutex<TransferJob>,
    should_transfer_checked: AtomicBool,
    stall_window: Duration,
}

impl SingleObjectTransfer {
    pub fn new(
        source: TransferLocation,
        destination: TransferLocation,
        method: TransferMethod,
        context: super::TransferContext,
        progress: Arc<ProgressTracker>,
        overwrite: bool,
    ) -> Result<Self> {
        Self::with_stall_window(
            source,
            destination,
            method,
            context,
            progress,
            overwrite,
            Duration::from_millis((3 * COPY_STATUS_REFRESH_MAX_WAIT_MS).max(30_000)),
        )
    }

    /// Same as `new`, but with an explicit stall window instead of the
    /// default derived from `EngineConfig::stall_window`. Used by the
    /// manager (which threads the configured window through) and by tests
    /// that need a short window to exercise `TransferStuck` without waiting
    /// out the real default.
    pub fn with_stall_window(
        source: TransferLocation,
        destination: TransferLocation,
        method: TransferMethod,
        context: super::TransferContext,
        progress: Arc<ProgressTracker>,
        overwrite: bool,
        stall_window: Duration,
    ) -> Result<Self> {
        let rel_len = match &source {
            TransferLocation::LocalFilePath { rel_path: Some(r), .. } => r.len(),
            _ => 0,
        };
        if rel_len > RELATIVE_PATH_LIMIT_CHARS {
            return Err(DmError::RelativePathTooLong(rel_len.to_string()));
        }
        Ok(Self {
            source,
            destination,
            method,
            context,
            progress,
            job: std::sync::Mutex::new(TransferJob::new(overwrite)),
            should_transfer_checked: AtomicBool::new(false),
            stall_window,
        })
    }

    /// Run the transfer to completion (or a terminal skip/failure),
    /// updating `self.job.status` and the progress tracker as it goes.
    #[instrument(skip(self, blob_client, pool, cancelled), fields(dest = %self.destination.identity_key()))]
    pub async fn execute(
        &self,
        blob_client: Arc<dyn BlobClient>,
        pool: Arc<CellPool>,
        cancelled: Arc<AtomicBool>,
    ) -> Result<()> {
        {
            let status = self.job.lock().unwrap().status;
            if status.is_terminal() {
                // Idempotent re-exec: a no-op on an already-finished transfer.
                return Ok(());
            }
        }

        if let Err(e) = self.should_transfer_check().await {
            self.job.lock().unwrap().status = JobStatus::SkippedDueToShouldNotTransfer;
            return Err(e);
        }

        if let Err(e) = self.overwrite_check(&blob_client).await {
            if e.is_skip_reason() {
                self.job.lock().unwrap().status = JobStatus::Skipped;
                self.progress.add_file_skipped();
                return Ok(());
            }
            self.job.lock().unwrap().status = JobStatus::Failed;
            self.progress.add_file_failed();
            return Err(e);
        }

        self.job.lock().unwrap().status = JobStatus::Transfer;

        let result = match self.method {
            TransferMethod::SyncCopy => self.run_sync_copy(&blob_client, &pool, &cancelled).await,
            TransferMethod::ServiceSideAsyncCopy => self.run_async_copy(&blob_client, &cancelled).await,
            TransferMethod::ServiceSideSyncCopy => self.run_sync_server_copy(&blob_client).await,
            TransferMethod::DummyCopy => self.run_dummy_copy(&blob_client).await,
        };

        match result {
            Ok(()) => {
                self.job.lock().unwrap().status = JobStatus::Finished;
                self.progress.add_file_transferred();
                Ok(())
            }
            Err(e) if e.is_skip_reason() => {
                self.job.lock().unwrap().status = JobStatus::Skipped;
                self.progress.add_file_skipped();
                Ok(())
            }
            Err(e) => {
                self.job.lock().unwrap().status = JobStatus::Failed;
                self.progress.add_file_failed();
                Err(e)
            }
        }
    }

    async fn should_transfer_check(&self) -> Result<()> {
        if self.should_transfer_checked.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(cb) = &self.context.should_transfer {
            let key = self.source.identity_key();
            if !cb(&key) {
                return Err(DmError::UncategorizedException(
                    "shouldTransfer callback returned false".to_string(),
                ));
            }
        }
        if let Some(validate) = &self.context.validate_path {
            validate(&self.source.identity_key()).map_err(|e| {
                DmError::PathCustomValidationFailed(self.source.identity_key(), e.to_string())
            })?;
        }
        Ok(())
    }

    async fn overwrite_check(&self, blob_client: &Arc<dyn BlobClient>) -> Result<()> {
        if matches!(self.destination, TransferLocation::LocalFilePath { .. }) {
            if let TransferLocation::LocalFilePath { path, .. } = &self.destination {
                if path.exists() {
                    let allow = self.job.lock().unwrap().overwrite
                        || self
                            .context
                            .should_overwrite
                            .as_ref()
                            .map(|cb| cb(&self.source.identity_key(), &self.destination.identity_key()))
                            .unwrap_or(false);
                    if !allow {
                        return Err(DmError::NotOverwriteExistingDestination(
                            self.destination.identity_key(),
                        ));
                    }
                }
            }
            return Ok(());
        }

        let key = self.destination.identity_key();
        if let Some(_meta) = blob_client.fetch_metadata(&key).await? {
            let allow = self.job.lock().unwrap().overwrite
                || self
                    .context
                    .should_overwrite
                    .as_ref()
                    .map(|cb| cb(&self.source.identity_key(), &key))
                    .unwrap_or(false);
            if !allow {
                return Err(DmError::NotOverwriteExistingDestination(key));
            }
        }
        Ok(())
    }

    /// `SyncCopy`: read the source in aligned chunks using cells from the
    /// memory pool, compute an incremental MD5, write each chunk to the
    /// destination. Dispatches on the source's kind: a local source uploads
    /// into the remote `BlobClient`; a remote source downloads into a local
    /// file via `BlobClient::get_range`.
    async fn run_sync_copy(
        &self,
        blob_client: &Arc<dyn BlobClient>,
        pool: &Arc<CellPool>,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<()> {
        match &self.source {
            TransferLocation::LocalFilePath { .. } => {
                self.run_upload_sync_copy(blob_client, pool, cancelled).await
            }
            TransferLocation::RemoteBlob { .. } => {
                self.run_download_sync_copy(blob_client, pool, cancelled).await
            }
            other => Err(DmError::UncategorizedException(format!(
                "SyncCopy source must be a local file or a remote blob, got {:?}",
                other.kind()
            ))),
        }
    }

    /// Upload direction: local file -> remote blob.
    async fn run_upload_sync_copy(
        &self,
        blob_client: &Arc<dyn BlobClient>,
        pool: &Arc<CellPool>,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<()> {
        let source_path = match &self.source {
            TransferLocation::LocalFilePath { path, .. } => path.clone(),
            other => {
                return Err(DmError::UncategorizedException(format!(
                    "upload source must be a local file, got {:?}",
                    other.kind()
                )))
            }
        };

        let total_size = tokio::fs::metadata(&source_path)
            .await
            .map_err(|e| DmError::io(source_path.clone(), e))?
            .len();
        validate_size_limits(BlobType::Block, total_size)?;
        let store_md5 = self.requires_content_md5();

        let resume_offset = self.job.lock().unwrap().checkpoint.resume_offset();
        let mut offset = resume_offset;
        let mut md5_ctx = md5::Context::new();
        let mut block_index = self.job.lock().unwrap().checkpoint.block_ids.len();
        let dest_key = self.destination.identity_key();

        // Re-hash already-committed bytes so a resumed transfer's final MD5
        // still covers the whole object, not just the bytes written this run.
        if resume_offset > 0 {
            self.rehash_prefix(&source_path, resume_offset, &mut md5_ctx).await?;
        }

        while offset < total_size {
            if cancelled.load(Ordering::Acquire) {
                return Err(DmError::Cancelled);
            }
            let chunk_len = CELL_SIZE_BYTES.min(total_size - offset);
            let mut cells = pool.reserve(1).await?;
            let cell = &mut cells[0];

            let path = source_path.clone();
            let read_len = chunk_len as usize;
            let buf = cell.as_mut_slice()[..read_len].to_vec();
            let data = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
                use std::io::{Read, Seek, SeekFrom};
                let mut file = std::fs::File::open(&path).map_err(|e| DmError::io(path.clone(), e))?;
                file.seek(SeekFrom::Start(offset)).map_err(|e| DmError::io(path.clone(), e))?;
                let mut buf = buf;
                file.read_exact(&mut buf).map_err(|e| DmError::io(path.clone(), e))?;
                Ok(buf)
            })
            .await
            .map_err(|e| DmError::UncategorizedException(e.to_string()))??;

            md5_ctx.consume(&data);

            let block_id = format!("{block_index:08}");
            let chunk_md5 = if store_md5 { Some(md5::compute(&data).0) } else { None };
            blob_client
                .put_block(&dest_key, &block_id, offset, &data, chunk_md5)
                .await?;

            self.job.lock().unwrap().checkpoint.record_chunk(
                ChunkRange {
                    offset,
                    length: chunk_len,
                },
                Some(block_id),
            );
            self.progress.add_bytes(chunk_len);
            offset += chunk_len;
            block_index += 1;
            debug!(offset, total_size, "chunk committed");
        }

        let block_ids = self.job.lock().unwrap().checkpoint.block_ids.clone();
        let overwrite = self.job.lock().unwrap().overwrite;
        blob_client.commit_block_list(&dest_key, &block_ids, overwrite).await?;

        if store_md5 {
            let digest = md5_ctx.compute();
            debug!(md5 = %format!("{digest:x}"), "computed incremental md5");
        }
        Ok(())
    }

    async fn rehash_prefix(&self, path: &std::path::Path, len: u64, ctx: &mut md5::Context) -> Result<()> {
        let path = path.to_path_buf();
        let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            use std::io::Read;
            let mut file = std::fs::File::open(&path).map_err(|e| DmError::io(path.clone(), e))?;
            let mut buf = vec![0u8; len as usize];
            file.read_exact(&mut buf).map_err(|e| DmError::io(path.clone(), e))?;
            Ok(buf)
        })
        .await
        .map_err(|e| DmError::UncategorizedException(e.to_string()))??;
        ctx.consume(&bytes);
        Ok(())
    }

    fn requires_content_md5(&self) -> bool {
        matches!(
            &self.destination,
            TransferLocation::RemoteBlob { request_options, .. } if request_options.store_blob_content_md5
        )
    }

    /// Download direction: remote blob -> local file. Reads aligned chunks
    /// through a pooled cell via `BlobClient::get_range`, written in
    /// increasing offset order, resuming from the checkpoint's committed
    /// byte count the same way the upload direction resumes its read offset.
    async fn run_download_sync_copy(
        &self,
        blob_client: &Arc<dyn BlobClient>,
        pool: &Arc<CellPool>,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<()> {
        let src_key = self.source.identity_key();
        let dest_path = match &self.destination {
            TransferLocation::LocalFilePath { path, .. } => path.clone(),
            other => {
                return Err(DmError::UncategorizedException(format!(
                    "download destination must be a local file, got {:?}",
                    other.kind()
                )))
            }
        };

        let metadata = blob_client
            .fetch_metadata(&src_key)
            .await?
            .ok_or_else(|| DmError::UncategorizedException(format!("source blob not found: {src_key}")))?;
        let total_size = metadata.length;
        validate_size_limits(metadata.blob_type, total_size)?;

        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DmError::io(parent.to_path_buf(), e))?;
        }

        let resume_offset = self.job.lock().unwrap().checkpoint.resume_offset();
        let mut offset = resume_offset;
        let mut md5_ctx = md5::Context::new();

        {
            let dest_path = dest_path.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                use std::fs::OpenOptions;
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(resume_offset == 0)
                    .open(&dest_path)
                    .map_err(|e| DmError::io(dest_path.clone(), e))?;
                file.set_len(total_size.max(resume_offset))
                    .map_err(|e| DmError::io(dest_path.clone(), e))?;
                Ok(())
            })
            .await
            .map_err(|e| DmError::UncategorizedException(e.to_string()))??;
        }

        if resume_offset > 0 {
            self.rehash_prefix(&dest_path, resume_offset, &mut md5_ctx).await?;
        }

        while offset < total_size {
            if cancelled.load(Ordering::Acquire) {
                return Err(DmError::Cancelled);
            }
            let chunk_len = CELL_SIZE_BYTES.min(total_size - offset);
            let cells = pool.reserve(1).await?;

            let data = blob_client.get_range(&src_key, offset, chunk_len).await?;
            md5_ctx.consume(&data);

            let path = dest_path.clone();
            let write_offset = offset;
            tokio::task::spawn_blocking(move || -> Result<()> {
                use std::io::{Seek, SeekFrom, Write};
                let mut file = std::fs::OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .map_err(|e| DmError::io(path.clone(), e))?;
                file.seek(SeekFrom::Start(write_offset))
                    .map_err(|e| DmError::io(path.clone(), e))?;
                file.write_all(&data).map_err(|e| DmError::io(path.clone(), e))?;
                Ok(())
            })
            .await
            .map_err(|e| DmError::UncategorizedException(e.to_string()))??;
            drop(cells);

            self.job.lock().unwrap().checkpoint.record_chunk(
                ChunkRange {
                    offset,
                    length: chunk_len,
                },
                None,
            );
            self.progress.add_bytes(chunk_len);
            offset += chunk_len;
            debug!(offset, total_size, "chunk downloaded");
        }

        let digest = md5_ctx.compute();
        debug!(md5 = %format!("{digest:x}"), "computed incremental md5");
        if let Some(expected) = metadata.content_md5 {
            if expected != digest.0 {
                return Err(DmError::integrity_mismatch(
                    self.destination.identity_key(),
                    hex::encode(expected),
                    hex::encode(digest.0),
                ));
            }
        }
        Ok(())
    }

    /// `ServiceSideAsyncCopy`: issue the start-copy call, then poll.
    async fn run_async_copy(&self, blob_client: &Arc<dyn BlobClient>, cancelled: &Arc<AtomicBool>) -> Result<()> {
        let src = self.source.identity_key();
        let dst = self.destination.identity_key();
        let copy_id = blob_client.start_server_copy(&src, &dst).await?;
        self.job.lock().unwrap().copy_id = Some(copy_id.clone());
        self.job.lock().unwrap().status = JobStatus::Monitor;
        self.monitor(blob_client, &copy_id, cancelled).await
    }

    async fn run_sync_server_copy(&self, blob_client: &Arc<dyn BlobClient>) -> Result<()> {
        let src = self.source.identity_key();
        let dst = self.destination.identity_key();
        let copy_id = blob_client.start_server_copy(&src, &dst).await?;
        let status = blob_client.get_copy_status(&copy_id).await?;
        self.progress.add_bytes(status.bytes_copied);
        Ok(())
    }

    async fn run_dummy_copy(&self, blob_client: &Arc<dyn BlobClient>) -> Result<()> {
        // Directory-marker blob: create the local directory, no payload.
        if let TransferLocation::LocalDirectoryPath { dir } = &self.destination {
            tokio::fs::create_dir_all(dir).await.map_err(|e| DmError::io(dir.clone(), e))?;
        } else if let TransferLocation::RemoteBlob { .. } = &self.destination {
            let dst = self.destination.identity_key();
            blob_client.put_page_or_append(&dst, 0, &[]).await?;
        }
        Ok(())
    }

    /// Poll the remote copy status with the exponential back-off from §4.5:
    /// doubling from 100ms towards a 5000ms ceiling with each non-terminal
    /// poll, and dropping back to the minimum once remaining bytes are
    /// within the "approaching finish" threshold. A stall longer than
    /// `stall_window` raises `TransferStuck`.
    async fn monitor(
        &self,
        blob_client: &Arc<dyn BlobClient>,
        copy_id: &str,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<()> {
        let min_wait = Duration::from_millis(COPY_STATUS_REFRESH_MIN_WAIT_MS);
        let max_wait = Duration::from_millis(COPY_STATUS_REFRESH_MAX_WAIT_MS);

        let mut wait = min_wait;
        let mut last_bytes_copied = u64::MAX;
        let stall_started = tokio::time::Instant::now();

        loop {
            if cancelled.load(Ordering::Acquire) {
                return Err(DmError::Cancelled);
            }
            let snapshot = blob_client.get_copy_status(copy_id).await?;
            match snapshot.status {
                crate::blob::CopyStatus::Success => {
                    self.progress.add_bytes(snapshot.total_bytes.saturating_sub(self.progress.snapshot().bytes));
                    return Ok(());
                }
                crate::blob::CopyStatus::Failed(msg) => {
                    return Err(DmError::UncategorizedException(msg));
                }
                crate::blob::CopyStatus::Aborted => {
                    return Err(DmError::UncategorizedException("copy aborted".to_string()));
                }
                crate::blob::CopyStatus::Pending => {}
            }

            if snapshot.bytes_copied != last_bytes_copied {
                last_bytes_copied = snapshot.bytes_copied;
            } else if stall_started.elapsed() >= self.stall_window() {
                warn!(copy_id, "no copy progress within the stall window");
                return Err(DmError::TransferStuck(self.destination.identity_key()));
            }

            let remaining = snapshot.total_bytes.saturating_sub(snapshot.bytes_copied);
            if remaining <= COPY_APPROACHING_FINISH_THRESHOLD_BYTES {
                wait = min_wait;
            } else {
                wait = (wait * 2).min(max_wait);
            }
            tokio::time::sleep(wait).await;
        }
    }

    fn stall_window(&self) -> Duration {
        self.stall_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_tunes_to_smallest_multiple_of_cell_size() {
        assert_eq!(tune_block_size(0), CELL_SIZE_BYTES);
        assert_eq!(tune_block_size(1), CELL_SIZE_BYTES);
        // 50_000 * 4 MiB is the boundary where 4 MiB blocks suffice.
        let boundary = BLOCK_BLOB_MAX_BLOCKS * CELL_SIZE_BYTES;
        assert_eq!(tune_block_size(boundary), CELL_SIZE_BYTES);
        assert_eq!(tune_block_size(boundary + 1), CELL_SIZE_BYTES * 2);
    }

    #[test]
    fn block_size_never_exceeds_protocol_maximum() {
        let huge = BLOCK_BLOB_MAX_BLOCKS * BLOCK_BLOB_MAX_BLOCK_SIZE_BYTES;
        assert_eq!(tune_block_size(huge), BLOCK_BLOB_MAX_BLOCK_SIZE_BYTES);
    }

    #[test]
    fn checkpoint_window_is_bounded() {
        let mut checkpoint = SingleObjectCheckpoint::new();
        for i in 0..(MAX_COUNT_IN_TRANSFER_WINDOW + 10) {
            checkpoint.record_chunk(
                ChunkRange {
                    offset: i as u64 * CELL_SIZE_BYTES,
                    length: CELL_SIZE_BYTES,
                },
                None,
            );
        }
        assert_eq!(checkpoint.window.len(), MAX_COUNT_IN_TRANSFER_WINDOW);
        assert_eq!(
            checkpoint.bytes_committed,
            (MAX_COUNT_IN_TRANSFER_WINDOW + 10) as u64 * CELL_SIZE_BYTES
        );
    }

    #[test]
    fn failed_job_without_copy_id_resumes_to_transfer() {
        let mut job = TransferJob::new(true);
        job.status = JobStatus::Failed;
        job.reposition_for_resume();
        assert_eq!(job.status, JobStatus::Transfer);
    }

    #[test]
    fn failed_job_with_copy_id_resumes_to_monitor() {
        let mut job = TransferJob::new(true);
        job.status = JobStatus::Failed;
        job.copy_id = Some("abc".to_string());
        job.reposition_for_resume();
        assert_eq!(job.status, JobStatus::Monitor);
    }

    #[tokio::test]
    async fn small_upload_matches_scenario_s1() {
        use crate::blob::InMemoryBlobStore;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let source_path = dir.path().join("abc.txt");
        std::fs::write(&source_path, b"abc").unwrap();

        let store = Arc::new(InMemoryBlobStore::new());
        let pool = Arc::new(CellPool::with_cell_count(4));
        let progress = ProgressTracker::new();

        let transfer = SingleObjectTransfer::new(
            TransferLocation::LocalFilePath {
                path: source_path,
                rel_path: Some("abc.txt".to_string()),
            },
            TransferLocation::RemoteBlob {
                uri: "container/abc.txt".to_string(),
                snapshot: None,
                blob_type: BlobType::Block,
                credentials: crate::location::Credentials { token: "t".into() },
                access_condition: None,
                request_options: crate::location::RequestOptions {
                    server_timeout: None,
                    store_blob_content_md5: true,
                },
            },
            TransferMethod::SyncCopy,
            super::super::TransferContext::default(),
            progress.clone(),
            true,
        )
        .unwrap();

        transfer
            .execute(store.clone(), pool, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        let snap = progress.snapshot();
        assert_eq!(snap.bytes, 3);
        assert_eq!(snap.files_transferred, 1);
        assert_eq!(snap.files_skipped, 0);
        assert_eq!(snap.files_failed, 0);

        let content = store.read("container/abc.txt").unwrap();
        assert_eq!(content, b"abc");
        let digest = md5::compute(&content);
        assert_eq!(format!("{digest:x}"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn overwrite_refused_is_classified_as_skip() {
        use crate::blob::InMemoryBlobStore;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let source_path = dir.path().join("x.txt");
        std::fs::write(&source_path, b"x").unwrap();

        let store = Arc::new(InMemoryBlobStore::new());
        store.seed("container/x.txt", b"existing".to_vec(), BlobType::Block);

        let pool = Arc::new(CellPool::with_cell_count(4));
        let progress = ProgressTracker::new();

        let transfer = SingleObjectTransfer::new(
            TransferLocation::LocalFilePath {
                path: source_path,
                rel_path: Some("x.txt".to_string()),
            },
            TransferLocation::RemoteBlob {
                uri: "container/x.txt".to_string(),
                snapshot: None,
                blob_type: BlobType::Block,
                credentials: crate::location::Credentials { token: "t".into() },
                access_condition: None,
                request_options: crate::location::RequestOptions::default(),
            },
            TransferMethod::SyncCopy,
            super::super::TransferContext::default(),
            progress.clone(),
            false,
        )
        .unwrap();

        transfer
            .execute(store.clone(), pool, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        let snap = progress.snapshot();
        assert_eq!(snap.files_skipped, 1);
        assert_eq!(snap.files_failed, 0);
        assert_eq!(store.read("container/x.txt").unwrap(), b"existing");
    }

    /// Scripted `BlobClient` double for exercising `monitor`'s polling
    /// cadence and stall detection without a real server-side copy.
    /// `fetch_metadata`/`put_block`/etc. are never called by `monitor` and
    /// are left unimplemented.
    struct ScriptedCopyClient {
        responses: std::sync::Mutex<VecDeque<crate::blob::CopyStatusSnapshot>>,
        poll_times: std::sync::Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedCopyClient {
        fn new(responses: Vec<crate::blob::CopyStatusSnapshot>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into()),
                poll_times: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl BlobClient for ScriptedCopyClient {
        async fn fetch_metadata(&self, _: &str) -> Result<Option<crate::blob::BlobMetadata>> {
            unimplemented!("not exercised by monitor()")
        }
        async fn put_block(&self, _: &str, _: &str, _: u64, _: &[u8], _: Option<[u8; 16]>) -> Result<()> {
            unimplemented!("not exercised by monitor()")
        }
        async fn commit_block_list(&self, _: &str, _: &[String], _: bool) -> Result<()> {
            unimplemented!("not exercised by monitor()")
        }
        async fn put_page_or_append(&self, _: &str, _: u64, _: &[u8]) -> Result<()> {
            unimplemented!("not exercised by monitor()")
        }
        async fn get_range(&self, _: &str, _: u64, _: u64) -> Result<Vec<u8>> {
            unimplemented!("not exercised by monitor()")
        }
        async fn start_server_copy(&self, _: &str, _: &str) -> Result<String> {
            unimplemented!("not exercised by monitor()")
        }
        async fn get_copy_status(&self, _blob: &str) -> Result<crate::blob::CopyStatusSnapshot> {
            self.poll_times.lock().unwrap().push(tokio::time::Instant::now());
            let mut responses = self.responses.lock().unwrap();
            Ok(responses.pop_front().unwrap_or(crate::blob::CopyStatusSnapshot {
                status: crate::blob::CopyStatus::Success,
                bytes_copied: 0,
                total_bytes: 0,
                status_description: "exhausted script".to_string(),
            }))
        }
        async fn generate_read_sas(&self, blob: &str, _: Duration) -> Result<String> {
            Ok(blob.to_string())
        }
        async fn list_blobs_segmented(
            &self,
            _: &str,
            _: Option<char>,
            _: Option<&str>,
        ) -> Result<crate::blob::ListSegment> {
            unimplemented!("not exercised by monitor()")
        }
    }

    fn copy_transfer(stall_window: Duration) -> SingleObjectTransfer {
        SingleObjectTransfer::with_stall_window(
            TransferLocation::RemoteBlob {
                uri: "container/src.bin".to_string(),
                snapshot: None,
                blob_type: BlobType::Block,
                credentials: crate::location::Credentials { token: "t".into() },
                access_condition: None,
                request_options: crate::location::RequestOptions::default(),
            },
            TransferLocation::RemoteBlob {
                uri: "container/dst.bin".to_string(),
                snapshot: None,
                blob_type: BlobType::Block,
                credentials: crate::location::Credentials { token: "t".into() },
                access_condition: None,
                request_options: crate::location::RequestOptions::default(),
            },
            TransferMethod::ServiceSideAsyncCopy,
            super::super::TransferContext::default(),
            ProgressTracker::new(),
            true,
            stall_window,
        )
        .unwrap()
    }

    /// S5: a 1 GiB server-side copy backs off from 100ms towards 5000ms as
    /// it polls, then drops back to the 100ms minimum once fewer than
    /// `COPY_APPROACHING_FINISH_THRESHOLD_BYTES` remain.
    #[tokio::test(start_paused = true)]
    async fn server_side_copy_cadence_matches_scenario_s5() {
        use crate::blob::{CopyStatus, CopyStatusSnapshot};

        let total = 1024u64 * 1024 * 1024;
        let near_finish = total - COPY_APPROACHING_FINISH_THRESHOLD_BYTES + 1;
        let scripted = Arc::new(ScriptedCopyClient::new(vec![
            CopyStatusSnapshot { status: CopyStatus::Pending, bytes_copied: 1, total_bytes: total, status_description: String::new() },
            CopyStatusSnapshot { status: CopyStatus::Pending, bytes_copied: 2, total_bytes: total, status_description: String::new() },
            CopyStatusSnapshot { status: CopyStatus::Pending, bytes_copied: near_finish, total_bytes: total, status_description: String::new() },
            CopyStatusSnapshot { status: CopyStatus::Success, bytes_copied: total, total_bytes: total, status_description: String::new() },
        ]));
        let client: Arc<dyn BlobClient> = scripted.clone();

        let transfer = copy_transfer(Duration::from_secs(3600));
        let cancelled = Arc::new(AtomicBool::new(false));
        transfer.monitor(&client, "copy-1", &cancelled).await.unwrap();

        let min_wait = Duration::from_millis(COPY_STATUS_REFRESH_MIN_WAIT_MS);
        let max_wait = Duration::from_millis(COPY_STATUS_REFRESH_MAX_WAIT_MS);
        // Doubling schedule: 100ms -> 200ms -> 400ms ..., capped at 5000ms.
        let expected_wait_after_poll_1 = (min_wait * 2).min(max_wait);
        let expected_wait_after_poll_2 = (expected_wait_after_poll_1 * 2).min(max_wait);

        let polls = scripted.poll_times.lock().unwrap().clone();
        assert_eq!(polls.len(), 4, "expected one poll per scripted response");
        assert_eq!(polls[1] - polls[0], expected_wait_after_poll_1);
        assert_eq!(polls[2] - polls[1], expected_wait_after_poll_2);
        // Remaining bytes dropped at/under the threshold after poll 3, so the
        // wait before poll 4 resets to the minimum instead of continuing to grow.
        assert_eq!(polls[3] - polls[2], min_wait);
    }

    /// S6: a copy whose `getCopyStatus` never changes `bytesCopied` for
    /// longer than the stall window ends in `TransferStuck`, not a hang.
    #[tokio::test(start_paused = true)]
    async fn stalled_copy_raises_transfer_stuck_per_scenario_s6() {
        use crate::blob::{CopyStatus, CopyStatusSnapshot};

        struct ConstantClient;
        #[async_trait::async_trait]
        impl BlobClient for ConstantClient {
            async fn fetch_metadata(&self, _: &str) -> Result<Option<crate::blob::BlobMetadata>> {
                unimplemented!()
            }
            async fn put_block(&self, _: &str, _: &str, _: u64, _: &[u8], _: Option<[u8; 16]>) -> Result<()> {
                unimplemented!()
            }
            async fn commit_block_list(&self, _: &str, _: &[String], _: bool) -> Result<()> {
                unimplemented!()
            }
            async fn put_page_or_append(&self, _: &str, _: u64, _: &[u8]) -> Result<()> {
                unimplemented!()
            }
            async fn get_range(&self, _: &str, _: u64, _: u64) -> Result<Vec<u8>> {
                unimplemented!()
            }
            async fn start_server_copy(&self, _: &str, _: &str) -> Result<String> {
                unimplemented!()
            }
            async fn get_copy_status(&self, _: &str) -> Result<CopyStatusSnapshot> {
                Ok(CopyStatusSnapshot {
                    status: CopyStatus::Pending,
                    bytes_copied: 42,
                    total_bytes: 1024 * 1024 * 1024,
                    status_description: "stuck".to_string(),
                })
            }
            async fn generate_read_sas(&self, blob: &str, _: Duration) -> Result<String> {
                Ok(blob.to_string())
            }
            async fn list_blobs_segmented(
                &self,
                _: &str,
                _: Option<char>,
                _: Option<&str>,
            ) -> Result<crate::blob::ListSegment> {
                unimplemented!()
            }
        }

        let client: Arc<dyn BlobClient> = Arc::new(ConstantClient);
        let transfer = copy_transfer(Duration::from_millis(500));
        let cancelled = Arc::new(AtomicBool::new(false));
        let err = transfer.monitor(&client, "copy-1", &cancelled).await.unwrap_err();
        assert!(matches!(err, DmError::TransferStuck(_)));
    }
}
