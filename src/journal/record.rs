//! Fixed-size record encoding for journal slots
//!
//! Every record is bincode-encoded into a zero-padded buffer of the slot's
//! exact size; `bincode::deserialize` only consumes as many bytes as the
//! value needs, so the trailing zero padding is never touched on decode.
//! This mirrors how `enumerate::continuation::ContinuationToken` already
//! round-trips itself through bincode elsewhere in the engine.

use crate::error::{DmError, Result};
use crate::location::TransferLocation;
use crate::progress::ProgressSnapshot;
use crate::transfer::{JobStatus, SingleObjectCheckpoint, TransferMethod};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Everything needed to resume one single-object transfer, as persisted in
/// the base-transfer area or in a `singleTransfer` chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub source: TransferLocation,
    pub destination: TransferLocation,
    pub method: TransferMethod,
    pub status: JobStatus,
    pub copy_id: Option<String>,
    pub checkpoint: SingleObjectCheckpoint,
}

/// A still-listing sub-directory, as persisted in an `ongoingSubDir` chunk.
/// Its continuation token lives in the chunk's fixed token area, not inline
/// here, so re-listing a partially-enumerated directory can resume the
/// `list_blobs_segmented`/`read_dir` cursor directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OngoingSubDirRecord {
    pub relative_path: String,
    pub dest_relative_path: String,
}

/// One entry of the `subDirRelpath` list: a relative path discovered during
/// enumeration but not yet promoted to an `ongoingSubDir`/`singleTransfer`
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubDirRelpathRecord {
    pub relative_path: String,
}

/// Encode `value` into a zero-padded buffer of exactly `len` bytes.
pub fn encode_fixed(value: &impl Serialize, len: usize) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(value)
        .map_err(|e| DmError::JournalCorrupt(format!("failed to encode record: {e}")))?;
    if bytes.len() > len {
        return Err(DmError::JournalCorrupt(format!(
            "record of {} bytes exceeds {len}-byte slot",
            bytes.len()
        )));
    }
    let mut buf = vec![0u8; len];
    buf[..bytes.len()].copy_from_slice(&bytes);
    Ok(buf)
}

/// Decode a value previously written by `encode_fixed`. Returns `None` if
/// the slot is all zero bytes (never written / freed).
pub fn decode_fixed<T: DeserializeOwned>(buf: &[u8]) -> Result<Option<T>> {
    if buf.iter().all(|b| *b == 0) {
        return Ok(None);
    }
    bincode::deserialize(buf)
        .map(Some)
        .map_err(|e| DmError::JournalCorrupt(format!("failed to decode record: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_round_trip() {
        let record = SubDirRelpathRecord {
            relative_path: "a/b/c".to_string(),
        };
        let buf = encode_fixed(&record, 256).unwrap();
        assert_eq!(buf.len(), 256);
        let decoded: SubDirRelpathRecord = decode_fixed(&buf).unwrap().unwrap();
        assert_eq!(decoded.relative_path, "a/b/c");
    }

    #[test]
    fn all_zero_slot_decodes_to_none() {
        let buf = vec![0u8; 256];
        let decoded: Option<SubDirRelpathRecord> = decode_fixed(&buf).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn oversized_record_is_rejected() {
        let record = SubDirRelpathRecord {
            relative_path: "x".repeat(300),
        };
        let err = encode_fixed(&record, 64).unwrap_err();
        assert!(matches!(err, DmError::JournalCorrupt(_)));
    }
}
