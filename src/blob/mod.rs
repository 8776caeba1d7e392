//! The `BlobClient` capability (§6) and an in-memory reference double.
//!
//! The concrete wire protocol of any real remote store is out of scope for
//! this crate — production code would plug in a client backed by whatever
//! HTTP SDK it prefers. `InMemoryBlobStore` exists solely so the engine's
//! own test suite (and the demo binary) can exercise upload/download/copy
//! without a network dependency.

mod memory;

pub use memory::InMemoryBlobStore;

use crate::error::Result;
use crate::location::BlobType;
use async_trait::async_trait;
use std::collections::HashMap;

/// Metadata returned by `fetch_metadata`.
#[derive(Debug, Clone)]
pub struct BlobMetadata {
    pub length: u64,
    pub content_md5: Option<[u8; 16]>,
    pub blob_type: BlobType,
    pub metadata: HashMap<String, String>,
}

/// Status returned by `get_copy_status` while a server-side copy is polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Success,
    Failed(String),
    Aborted,
}

/// Snapshot of an in-progress or finished server-side copy.
#[derive(Debug, Clone)]
pub struct CopyStatusSnapshot {
    pub status: CopyStatus,
    pub bytes_copied: u64,
    pub total_bytes: u64,
    pub status_description: String,
}

/// One entry returned from a segmented container listing.
#[derive(Debug, Clone)]
pub struct ListedBlob {
    pub name: String,
    pub length: u64,
    pub is_directory_marker: bool,
}

/// A page of `listBlobsSegmented` results plus the token for the next page.
#[derive(Debug, Clone)]
pub struct ListSegment {
    pub entries: Vec<ListedBlob>,
    pub next_token: Option<String>,
}

/// The capability the engine consumes from the remote-store collaborator.
///
/// Every operation is cancellable (callers pass a `tokio_util`-style
/// cancellation check themselves around the `.await`) and idempotent where
/// the docstring says so.
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Fetch metadata for a blob or container; `403`/`404` on a
    /// container-level probe are soft-failures the caller may treat as
    /// "does not exist yet" rather than a hard error.
    async fn fetch_metadata(&self, blob_or_container: &str) -> Result<Option<BlobMetadata>>;

    /// Upload one block. Idempotent per `block_id`.
    async fn put_block(
        &self,
        blob: &str,
        block_id: &str,
        offset: u64,
        bytes: &[u8],
        md5: Option<[u8; 16]>,
    ) -> Result<()>;

    /// Commit a previously-uploaded block list as the blob's final content.
    async fn commit_block_list(&self, blob: &str, block_ids: &[String], overwrite: bool) -> Result<()>;

    /// Write bytes at `offset` for a page or append blob.
    async fn put_page_or_append(&self, blob: &str, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Read `length` bytes starting at `offset`.
    async fn get_range(&self, blob: &str, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Start a server-side copy; returns an opaque `copy_id`.
    async fn start_server_copy(&self, src: &str, dst: &str) -> Result<String>;

    /// Poll the status of a previously started server-side copy.
    async fn get_copy_status(&self, blob: &str) -> Result<CopyStatusSnapshot>;

    /// Produce a read-only SAS URI valid for `lifetime`.
    async fn generate_read_sas(&self, blob: &str, lifetime: std::time::Duration) -> Result<String>;

    /// List one segment of a container's contents.
    async fn list_blobs_segmented(
        &self,
        prefix: &str,
        delimiter: Option<char>,
        continuation_token: Option<&str>,
    ) -> Result<ListSegment>;
}
