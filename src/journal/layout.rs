//! Byte-exact journal layout (§4.7)
//!
//! The spec's prose byte counts for the base-transfer area (`39 × 1024` +
//! `1024` reserved) and the per-chunk record area (`9216` bytes after a
//! 16-byte link header and a trailing 1024-byte progress slot) don't sum to
//! the regions they're supposed to fill — `512 + 39*1024 + 1024 = 40960`
//! vs. the stated `[512, 40960)` window is internally fine, but `16 + 9216 +
//! 1024 = 10256 != 10240`. This module picks the reconciliation recorded in
//! `DESIGN.md`: the base-transfer record shrinks to `39424` bytes so
//! `record + progress` exactly fills `[512, 40960)`, and a chunk's record
//! area shrinks to `4080` bytes so `link + record + continuation + progress`
//! exactly fills one `10240`-byte chunk, with the continuation-token area
//! anchored at the spec-mandated fixed offset `chunk_offset + 4096`.

/// Length of the format-version string region at the start of the file.
pub const VERSION_LEN: u64 = 256;

/// Offset of the 11-field journal head.
pub const HEAD_OFFSET: u64 = 256;
/// Reserved length of the head region (only `HEAD_FIELD_COUNT * 8` bytes used).
pub const HEAD_LEN: u64 = 256;
/// Number of `u64` fields in the journal head.
pub const HEAD_FIELD_COUNT: usize = 11;

/// Offset of the base (root) transfer area.
pub const BASE_TRANSFER_OFFSET: u64 = 512;
/// Bytes available for the base transfer's serialized record.
pub const BASE_TRANSFER_RECORD_LEN: u64 = 39424;
/// Bytes reserved for the base transfer's progress snapshot.
pub const BASE_TRANSFER_PROGRESS_LEN: u64 = 1024;
/// Total size of the base transfer area: `[512, 40960)`.
pub const BASE_TRANSFER_TOTAL_LEN: u64 = BASE_TRANSFER_RECORD_LEN + BASE_TRANSFER_PROGRESS_LEN;

/// Start of the extensible chunk region.
pub const CHUNK_REGION_OFFSET: u64 = BASE_TRANSFER_OFFSET + BASE_TRANSFER_TOTAL_LEN;
/// Fixed size of one chunk.
pub const CHUNK_SIZE: u64 = 10 * 1024;
/// Size of a chunk's doubly-linked-list link header: `(prev, next)` as `u64`s.
pub const CHUNK_LINK_LEN: u64 = 16;
/// Bytes available for a chunk's serialized sub-transfer record.
pub const CHUNK_RECORD_LEN: u64 = 4080;
/// Offset (relative to chunk start) of the continuation-token area, fixed
/// per §4.7 so in-place rewrites never move it.
pub const CHUNK_TOKEN_OFFSET: u64 = 4096;
/// Length of the continuation-token area.
pub const CHUNK_TOKEN_LEN: u64 = 5120;
/// Offset (relative to chunk start) of the progress-snapshot area.
pub const CHUNK_PROGRESS_OFFSET: u64 = CHUNK_TOKEN_OFFSET + CHUNK_TOKEN_LEN;
/// Length of the progress-snapshot area.
pub const CHUNK_PROGRESS_LEN: u64 = CHUNK_SIZE - CHUNK_PROGRESS_OFFSET;

/// Length of one sub-directory relative-path slot (`2048 + 128` reserve).
pub const SUBDIR_RELPATH_SLOT_LEN: u64 = 2176;

/// Sentinel for "no chunk" in head/link fields — offset 0 is inside the
/// header itself and can never be a valid chunk offset, but `u64::MAX` is
/// used anyway so head fields read the same whether or not a real journal
/// ever allocates a chunk at a low address.
pub const NULL_CHUNK: u64 = u64::MAX;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_transfer_area_fills_its_window_exactly() {
        assert_eq!(BASE_TRANSFER_OFFSET + BASE_TRANSFER_TOTAL_LEN, 40_960);
    }

    #[test]
    fn chunk_regions_fill_the_chunk_exactly() {
        assert_eq!(
            CHUNK_LINK_LEN + CHUNK_RECORD_LEN + CHUNK_TOKEN_LEN + CHUNK_PROGRESS_LEN,
            CHUNK_SIZE
        );
    }
}
