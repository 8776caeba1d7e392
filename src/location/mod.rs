//! Transfer locations (C3)
//!
//! Addressable transfer endpoints, with validation and credential refresh
//! independent of relocation: resuming a transfer whose remote credentials
//! have expired replaces `credentials` in place without touching `uri`.

use crate::error::{DmError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind discriminant stored alongside a location in the journal, so the
/// binary format can dispatch on a stable tag rather than reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LocationKind {
    LocalFilePath = 0,
    LocalDirectoryPath = 1,
    RemoteBlob = 2,
    RemoteBlobDirectory = 3,
    InMemoryStream = 4,
    SourceUri = 5,
}

/// Blob type as understood by the remote protocol; affects block-size
/// tuning and the transfer method chosen for a single-object transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobType {
    Block,
    Page,
    Append,
}

/// Opaque bearer for remote credentials. Replaceable at resume without
/// relocating the transfer: `TransferLocation::refresh_credentials` swaps
/// this value in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
}

/// Conditional-request options attached to a remote operation (ETag, lease).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessCondition {
    pub if_match_etag: Option<String>,
    pub lease_id: Option<String>,
}

/// Per-request options layered on top of `EngineConfig` defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    pub server_timeout: Option<std::time::Duration>,
    pub store_blob_content_md5: bool,
}

/// One endpoint of a transfer: either side of source/destination.
///
/// `InMemoryStream` locations are never serialized into the journal — a
/// transfer whose source or destination is a stream cannot resume past a
/// process restart, which callers must account for; the journal writer
/// treats attempting to persist one as a programming error (`DmError`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferLocation {
    LocalFilePath {
        path: PathBuf,
        rel_path: Option<String>,
    },
    LocalDirectoryPath {
        dir: PathBuf,
    },
    RemoteBlob {
        uri: String,
        snapshot: Option<String>,
        blob_type: BlobType,
        credentials: Credentials,
        access_condition: Option<AccessCondition>,
        request_options: RequestOptions,
    },
    RemoteBlobDirectory {
        container_uri: String,
        prefix: String,
        credentials: Credentials,
        request_options: RequestOptions,
    },
    #[serde(skip)]
    InMemoryStream,
    SourceUri {
        uri: String,
    },
}

impl TransferLocation {
    /// Stable discriminant for journal serialization.
    pub fn kind(&self) -> LocationKind {
        match self {
            Self::LocalFilePath { .. } => LocationKind::LocalFilePath,
            Self::LocalDirectoryPath { .. } => LocationKind::LocalDirectoryPath,
            Self::RemoteBlob { .. } => LocationKind::RemoteBlob,
            Self::RemoteBlobDirectory { .. } => LocationKind::RemoteBlobDirectory,
            Self::InMemoryStream => LocationKind::InMemoryStream,
            Self::SourceUri { .. } => LocationKind::SourceUri,
        }
    }

    /// Whether this location is backed by the local filesystem.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::LocalFilePath { .. } | Self::LocalDirectoryPath { .. }
        )
    }

    /// A stable string key for transfer-map identity and log output. Two
    /// locations with the same key are considered the same endpoint.
    pub fn identity_key(&self) -> String {
        match self {
            Self::LocalFilePath { path, .. } => format!("file://{}", path.display()),
            Self::LocalDirectoryPath { dir } => format!("dir://{}", dir.display()),
            Self::RemoteBlob { uri, .. } => uri.clone(),
            Self::RemoteBlobDirectory {
                container_uri,
                prefix,
                ..
            } => format!("{container_uri}/{prefix}"),
            Self::InMemoryStream => "stream://<unserializable>".to_string(),
            Self::SourceUri { uri } => uri.clone(),
        }
    }

    /// Replace this location's credentials in place, without relocating it.
    /// A no-op for locations that don't carry credentials.
    pub fn refresh_credentials(&mut self, new_credentials: Credentials) {
        match self {
            Self::RemoteBlob { credentials, .. } => *credentials = new_credentials,
            Self::RemoteBlobDirectory { credentials, .. } => *credentials = new_credentials,
            _ => {}
        }
    }

    /// Validate that source and destination are not the same location and
    /// that their blob types (where both sides have one) are compatible.
    pub fn validate_pair(source: &TransferLocation, destination: &TransferLocation) -> Result<()> {
        if source.identity_key() == destination.identity_key() {
            return Err(DmError::SourceAndDestinationLocationEqual(
                source.identity_key(),
            ));
        }
        if let (Self::RemoteBlob { blob_type: s, .. }, Self::RemoteBlob { blob_type: d, .. }) =
            (source, destination)
        {
            if s != d {
                return Err(DmError::SourceAndDestinationBlobTypeDifferent(
                    format!("{s:?}"),
                    format!("{d:?}"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(p: &str) -> TransferLocation {
        TransferLocation::LocalFilePath {
            path: PathBuf::from(p),
            rel_path: None,
        }
    }

    #[test]
    fn equal_locations_are_rejected() {
        let a = local("/tmp/a");
        let b = local("/tmp/a");
        let err = TransferLocation::validate_pair(&a, &b).unwrap_err();
        assert!(matches!(err, DmError::SourceAndDestinationLocationEqual(_)));
    }

    #[test]
    fn differing_blob_types_are_rejected() {
        let creds = Credentials { token: "t".into() };
        let source = TransferLocation::RemoteBlob {
            uri: "https://x/a".into(),
            snapshot: None,
            blob_type: BlobType::Block,
            credentials: creds.clone(),
            access_condition: None,
            request_options: RequestOptions::default(),
        };
        let destination = TransferLocation::RemoteBlob {
            uri: "https://x/b".into(),
            snapshot: None,
            blob_type: BlobType::Page,
            credentials: creds,
            access_condition: None,
            request_options: RequestOptions::default(),
        };
        let err = TransferLocation::validate_pair(&source, &destination).unwrap_err();
        assert!(matches!(
            err,
            DmError::SourceAndDestinationBlobTypeDifferent(..)
        ));
    }

    #[test]
    fn credential_refresh_does_not_relocate() {
        let mut loc = TransferLocation::RemoteBlob {
            uri: "https://x/a".into(),
            snapshot: None,
            blob_type: BlobType::Block,
            credentials: Credentials { token: "old".into() },
            access_condition: None,
            request_options: RequestOptions::default(),
        };
        let key_before = loc.identity_key();
        loc.refresh_credentials(Credentials { token: "new".into() });
        assert_eq!(loc.identity_key(), key_before);
        if let TransferLocation::RemoteBlob { credentials, .. } = &loc {
            assert_eq!(credentials.token, "new");
        } else {
            panic!("expected RemoteBlob");
        }
    }
}
