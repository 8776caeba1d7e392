//! # dmcore - resumable, concurrent data movement between local disk and a
//! remote blob store
//!
//! `dmcore` is the engine core behind a file-copy tool in the shape of
//! Microsoft's `azcopy`/Data Movement library: bounded-parallelism transfer
//! scheduling, chunked reads through a fixed memory pool, hierarchical
//! directory enumeration that overlaps listing with transferring, and a
//! crash-safe on-disk journal so a killed transfer resumes instead of
//! restarting.
//!
//! ## Quick start
//!
//! ```no_run
//! use dmcore::blob::InMemoryBlobStore;
//! use dmcore::config::EngineConfig;
//! use dmcore::location::{BlobType, Credentials, RequestOptions, TransferLocation};
//! use dmcore::manager::TransferManager;
//! use dmcore::transfer::TransferContext;
//! use std::sync::Arc;
//!
//! # async fn run() -> dmcore::error::Result<()> {
//! let manager = TransferManager::new(EngineConfig::default(), Arc::new(InMemoryBlobStore::new()));
//!
//! let source = TransferLocation::LocalFilePath {
//!     path: "/tmp/report.csv".into(),
//!     rel_path: None,
//! };
//! let destination = TransferLocation::RemoteBlob {
//!     uri: "reports/report.csv".to_string(),
//!     snapshot: None,
//!     blob_type: BlobType::Block,
//!     credentials: Credentials { token: "token".to_string() },
//!     access_condition: None,
//!     request_options: RequestOptions::default(),
//! };
//!
//! let progress = manager.upload(source, destination, TransferContext::default(), true, None).await?;
//! println!("transferred {} bytes", progress.snapshot().bytes);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module map
//!
//! - [`pool`] — fixed-size cell memory pool bounding total buffered bytes.
//! - [`progress`] — atomic progress counters with parent aggregation.
//! - [`location`] — addressable transfer endpoints (local path, remote blob,
//!   directory, in-memory stream).
//! - [`enumerate`] — local and remote directory enumeration with resumable
//!   continuation tokens.
//! - [`blob`] — the remote-store capability trait and an in-memory test
//!   double.
//! - [`transfer`] — single-object and directory transfers.
//! - [`scheduler`] — bounded-parallelism admission gates for transfers and
//!   for directory listing.
//! - [`checkpoint`] — in-memory per-transfer chunk checkpoint store.
//! - [`journal`] — crash-safe on-disk resume state.
//! - [`manager`] — the process-wide façade tying everything together.
//! - [`config`] — engine configuration and CLI argument parsing.
//! - [`error`] — the crate-wide error type.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob;
pub mod checkpoint;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod journal;
pub mod location;
pub mod manager;
pub mod pool;
pub mod progress;
pub mod scheduler;
pub mod transfer;

pub use config::EngineConfig;
pub use error::{DmError, Result};
pub use manager::TransferManager;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient re-exports for common usage.
///
/// ```no_run
/// use dmcore::prelude::*;
/// ```
pub mod prelude {
    pub use crate::blob::{BlobClient, InMemoryBlobStore};
    pub use crate::config::EngineConfig;
    pub use crate::error::{DmError, Result};
    pub use crate::location::{BlobType, Credentials, RequestOptions, TransferLocation};
    pub use crate::manager::TransferManager;
    pub use crate::progress::{ProgressSnapshot, ProgressTracker};
    pub use crate::transfer::{TransferContext, TransferMethod};
}
