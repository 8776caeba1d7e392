//! List-continuation tokens (C4)
//!
//! An opaque, serializable resume point for an enumerator. Resuming
//! enumeration with a token yields exactly the entries that would have
//! followed had enumeration not been interrupted.

use serde::{Deserialize, Serialize};

/// Resume point for a local-filesystem enumerator: the lexicographically
/// last relative path already yielded at each directory-stack depth. A
/// local enumerator re-opens each directory in the stack, skips entries
/// lexicographically less-than-or-equal to the recorded marker, and resumes
/// from there — cheaper than remembering every already-seen name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    /// One marker per directory-stack level, root first.
    markers: Vec<String>,
}

impl ContinuationToken {
    /// The empty token: enumeration starts from the beginning.
    pub fn start() -> Self {
        Self::default()
    }

    /// Whether this token represents "start from the beginning".
    pub fn is_start(&self) -> bool {
        self.markers.is_empty()
    }

    /// Depth (directory nesting level) this token resumes at.
    pub fn depth(&self) -> usize {
        self.markers.len()
    }

    /// Marker for a given stack depth, if recorded.
    pub fn marker_at(&self, depth: usize) -> Option<&str> {
        self.markers.get(depth).map(String::as_str)
    }

    /// Produce a new token recording that `last_yielded` at `depth` is the
    /// last entry the caller has observed, truncating any deeper markers
    /// (they no longer apply once an ancestor level advances).
    pub fn advance(&self, depth: usize, last_yielded: &str) -> Self {
        let mut markers = self.markers.clone();
        markers.truncate(depth);
        markers.resize(depth, String::new());
        markers.push(last_yielded.to_string());
        Self { markers }
    }

    /// Serialize to the opaque byte form stored in the journal's
    /// sub-directory relative-path slots.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("ContinuationToken always serializes")
    }

    /// Deserialize from the opaque byte form.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}
