//! In-memory reference implementation of `BlobClient`.
//!
//! Not a production client — a deterministic test double used by the
//! engine's own integration tests and the demo binary, grounded on the
//! async/`Mutex`-guarded client shape of the teacher's native S3 client
//! (`storage::native_s3::NativeS3Client`), minus any real network I/O.

use super::{BlobClient, BlobMetadata, CopyStatus, CopyStatusSnapshot, ListSegment, ListedBlob};
use crate::error::{DmError, Result};
use crate::location::BlobType;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

struct StoredBlob {
    content: Vec<u8>,
    blob_type: BlobType,
    metadata: HashMap<String, String>,
    staged_blocks: HashMap<String, Vec<u8>>,
}

impl StoredBlob {
    fn new(blob_type: BlobType) -> Self {
        Self {
            content: Vec::new(),
            blob_type,
            metadata: HashMap::new(),
            staged_blocks: HashMap::new(),
        }
    }

    fn content_md5(&self) -> [u8; 16] {
        let digest = md5::compute(&self.content);
        digest.0
    }
}

/// A single in-memory "account": a flat map from blob path to content.
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, StoredBlob>>,
    pending_copies: Mutex<HashMap<String, (String, String)>>,
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            pending_copies: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a blob directly (test helper), bypassing the put/commit dance.
    pub fn seed(&self, path: &str, content: Vec<u8>, blob_type: BlobType) {
        let mut blob = StoredBlob::new(blob_type);
        blob.content = content;
        self.blobs.lock().unwrap().insert(path.to_string(), blob);
    }

    /// Mark a path as a zero-byte directory marker (`hdi_isfolder = true`).
    pub fn seed_directory_marker(&self, path: &str) {
        let mut blob = StoredBlob::new(BlobType::Block);
        blob.metadata.insert("hdi_isfolder".to_string(), "true".to_string());
        self.blobs.lock().unwrap().insert(path.to_string(), blob);
    }

    /// Read back a blob's full content (test helper).
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(path).map(|b| b.content.clone())
    }
}

#[async_trait]
impl BlobClient for InMemoryBlobStore {
    async fn fetch_metadata(&self, blob_or_container: &str) -> Result<Option<BlobMetadata>> {
        let blobs = self.blobs.lock().unwrap();
        Ok(blobs.get(blob_or_container).map(|b| BlobMetadata {
            length: b.content.len() as u64,
            content_md5: Some(b.content_md5()),
            blob_type: b.blob_type,
            metadata: b.metadata.clone(),
        }))
    }

    async fn put_block(
        &self,
        blob: &str,
        block_id: &str,
        _offset: u64,
        bytes: &[u8],
        md5: Option<[u8; 16]>,
    ) -> Result<()> {
        if let Some(expected) = md5 {
            let actual = md5::compute(bytes).0;
            if expected != actual {
                return Err(DmError::integrity_mismatch(
                    blob,
                    hex::encode(expected),
                    hex::encode(actual),
                ));
            }
        }
        let mut blobs = self.blobs.lock().unwrap();
        let entry = blobs
            .entry(blob.to_string())
            .or_insert_with(|| StoredBlob::new(BlobType::Block));
        entry.staged_blocks.insert(block_id.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn commit_block_list(&self, blob: &str, block_ids: &[String], overwrite: bool) -> Result<()> {
        let mut blobs = self.blobs.lock().unwrap();
        if !overwrite && blobs.get(blob).map(|b| !b.content.is_empty()).unwrap_or(false) {
            return Err(DmError::NotOverwriteExistingDestination(blob.to_string()));
        }
        let entry = blobs
            .entry(blob.to_string())
            .or_insert_with(|| StoredBlob::new(BlobType::Block));
        let mut assembled = Vec::new();
        for id in block_ids {
            let chunk = entry
                .staged_blocks
                .get(id)
                .ok_or_else(|| DmError::UncategorizedException(format!("unknown block id {id}")))?;
            assembled.extend_from_slice(chunk);
        }
        entry.content = assembled;
        entry.staged_blocks.clear();
        Ok(())
    }

    async fn put_page_or_append(&self, blob: &str, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock().unwrap();
        let entry = blobs
            .entry(blob.to_string())
            .or_insert_with(|| StoredBlob::new(BlobType::Append));
        let end = offset as usize + bytes.len();
        if entry.content.len() < end {
            entry.content.resize(end, 0);
        }
        entry.content[offset as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    async fn get_range(&self, blob: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let blobs = self.blobs.lock().unwrap();
        let entry = blobs
            .get(blob)
            .ok_or_else(|| DmError::UncategorizedException(format!("blob not found: {blob}")))?;
        let start = offset as usize;
        let end = (start + length as usize).min(entry.content.len());
        Ok(entry.content.get(start..end).unwrap_or(&[]).to_vec())
    }

    async fn start_server_copy(&self, src: &str, dst: &str) -> Result<String> {
        let copy_id = format!("copy-{src}-{dst}");
        self.pending_copies
            .lock()
            .unwrap()
            .insert(copy_id.clone(), (src.to_string(), dst.to_string()));
        Ok(copy_id)
    }

    async fn get_copy_status(&self, blob: &str) -> Result<CopyStatusSnapshot> {
        // The reference double completes a server-side copy synchronously
        // the first time status is polled; real collaborators are async and
        // the caller's `Monitor` back-off loop still applies around this.
        let pending = self.pending_copies.lock().unwrap().remove(blob);
        if let Some((src, dst)) = pending {
            let src_content = self.blobs.lock().unwrap().get(&src).map(|b| b.content.clone());
            if let Some(content) = src_content {
                let total = content.len() as u64;
                let mut blobs = self.blobs.lock().unwrap();
                let entry = blobs.entry(dst).or_insert_with(|| StoredBlob::new(BlobType::Block));
                entry.content = content;
                return Ok(CopyStatusSnapshot {
                    status: CopyStatus::Success,
                    bytes_copied: total,
                    total_bytes: total,
                    status_description: "completed".to_string(),
                });
            }
        }
        Ok(CopyStatusSnapshot {
            status: CopyStatus::Success,
            bytes_copied: 0,
            total_bytes: 0,
            status_description: "no such pending copy".to_string(),
        })
    }

    async fn generate_read_sas(&self, blob: &str, lifetime: std::time::Duration) -> Result<String> {
        Ok(format!("{blob}?sas=inmemory&ttl={}", lifetime.as_secs()))
    }

    async fn list_blobs_segmented(
        &self,
        prefix: &str,
        _delimiter: Option<char>,
        continuation_token: Option<&str>,
    ) -> Result<ListSegment> {
        let blobs = self.blobs.lock().unwrap();
        let mut names: Vec<&String> = blobs.keys().filter(|k| k.starts_with(prefix)).collect();
        names.sort();

        let start = continuation_token
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0);
        const PAGE_SIZE: usize = 1000;
        let page: Vec<ListedBlob> = names
            .iter()
            .skip(start)
            .take(PAGE_SIZE)
            .map(|name| {
                let b = &blobs[*name];
                ListedBlob {
                    name: (*name).clone(),
                    length: b.content.len() as u64,
                    is_directory_marker: b
                        .metadata
                        .get("hdi_isfolder")
                        .map(|v| v.eq_ignore_ascii_case("true"))
                        .unwrap_or(false),
                }
            })
            .collect();
        let next_token = if start + page.len() < names.len() {
            Some((start + page.len()).to_string())
        } else {
            None
        };
        Ok(ListSegment {
            entries: page,
            next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_block_then_commit_assembles_content() {
        let store = InMemoryBlobStore::new();
        store.put_block("b", "0001", 0, b"hello ", None).await.unwrap();
        store.put_block("b", "0002", 6, b"world", None).await.unwrap();
        store
            .commit_block_list("b", &["0001".to_string(), "0002".to_string()], true)
            .await
            .unwrap();
        assert_eq!(store.read("b").unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn commit_without_overwrite_on_existing_fails() {
        let store = InMemoryBlobStore::new();
        store.seed("b", b"existing".to_vec(), BlobType::Block);
        store.put_block("b", "0001", 0, b"new", None).await.unwrap();
        let err = store
            .commit_block_list("b", &["0001".to_string()], false)
            .await
            .unwrap_err();
        assert!(matches!(err, DmError::NotOverwriteExistingDestination(_)));
    }

    #[tokio::test]
    async fn server_side_copy_completes_on_first_poll() {
        let store = InMemoryBlobStore::new();
        store.seed("src", b"payload".to_vec(), BlobType::Block);
        let copy_id = store.start_server_copy("src", "dst").await.unwrap();
        let status = store.get_copy_status(&copy_id).await.unwrap();
        assert_eq!(status.status, CopyStatus::Success);
        assert_eq!(store.read("dst").unwrap(), b"payload");
    }
}
