//! Enumerators (C5)
//!
//! Lazy, restartable sequences of entries from a source root. Unlike the
//! teacher's `Scanner` (which walks the whole tree eagerly with `WalkDir`
//! before anything downstream can start), an `Enumerator` yields one entry
//! at a time and can be paused and resumed from a `ContinuationToken`
//! without re-visiting entries already yielded.

mod continuation;

pub use continuation::ContinuationToken;

use crate::error::{DmError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// One entry produced by an enumerator.
#[derive(Debug, Clone)]
pub enum Entry {
    File(FileEntry),
    Directory(DirectoryEntry),
    Error(ErrorEntry),
}

/// A file discovered by enumeration.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub relative_path: String,
    pub full_path: PathBuf,
    pub size: Option<u64>,
}

/// A directory discovered by hierarchical enumeration.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub relative_path: String,
}

/// An enumeration fault tied (where known) to a relative path; enumerators
/// surface these rather than aborting outright so the directory transfer
/// can decide whether the fault is fatal.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub message: String,
    pub relative_path: Option<String>,
}

/// Lazy, restartable sequence of entries rooted at a source location.
///
/// A **file enumerator** (`recursive = true`, hierarchical = false) only
/// ever yields `Entry::File`. A **hierarchical enumerator** yields both
/// `Entry::File` and `Entry::Directory`, one directory level at a time, so
/// a caller (the hierarchical directory transfer, C7) can recurse
/// one level at a time and interleave sub-directory discovery with file
/// transfer admission.
pub trait Enumerator: Send {
    /// Pull the next entry, or `None` once exhausted.
    fn next(&mut self) -> Result<Option<Entry>>;

    /// A token that, if used to construct a fresh enumerator over the same
    /// root, resumes exactly where this enumerator currently stands.
    fn continuation_token(&self) -> ContinuationToken;
}

/// Enumerator over a local directory tree.
///
/// Ordering is deterministic: entries within one directory level are
/// yielded in lexicographic order by name. The enumerator holds one
/// directory "frame" per stack depth; `next()` pulls from the deepest frame
/// first for a file enumerator's flattened-recursive traversal, or yields
/// the current frame's next entry for hierarchical, level-at-a-time
/// traversal.
pub struct LocalEnumerator {
    root: PathBuf,
    hierarchical: bool,
    stack: Vec<Frame>,
}

struct DirItem {
    name: String,
    is_dir: bool,
    size: Option<u64>,
}

struct Frame {
    relative_dir: String,
    entries: Vec<DirItem>,
    index: usize,
}

impl LocalEnumerator {
    /// Construct a new enumerator rooted at `root`, starting from scratch.
    pub fn new(root: impl Into<PathBuf>, hierarchical: bool) -> Result<Self> {
        Self::resume(root, hierarchical, &ContinuationToken::start())
    }

    /// Construct an enumerator that resumes from `token`.
    pub fn resume(
        root: impl Into<PathBuf>,
        hierarchical: bool,
        token: &ContinuationToken,
    ) -> Result<Self> {
        let root = root.into();
        let mut enumerator = Self {
            root: root.clone(),
            hierarchical,
            stack: vec![Self::read_frame(&root, "", &root)?],
        };
        enumerator.fast_forward(token)?;
        Ok(enumerator)
    }

    fn read_frame(root: &Path, relative_dir: &str, full_dir: &Path) -> Result<Frame> {
        let raw = fs::read_dir(full_dir).map_err(|e| {
            DmError::FailToEnumerateDirectory(full_dir.display().to_string(), e.to_string())
        })?;
        let mut entries: Vec<DirItem> = raw
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let file_type = e.file_type().ok()?;
                let size = if file_type.is_dir() {
                    None
                } else {
                    e.metadata().ok().map(|m| m.len())
                };
                Some(DirItem {
                    name: e.file_name().to_string_lossy().to_string(),
                    is_dir: file_type.is_dir(),
                    size,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let _ = root;
        Ok(Frame {
            relative_dir: relative_dir.to_string(),
            entries,
            index: 0,
        })
    }

    /// Skip already-yielded entries per the continuation token's per-depth
    /// markers, descending into directories along the way for a
    /// hierarchical enumerator (a file enumerator also descends internally
    /// to reach the resume point, it just never stops at a directory).
    fn fast_forward(&mut self, token: &ContinuationToken) -> Result<()> {
        for depth in 0..token.depth() {
            let Some(marker) = token.marker_at(depth) else {
                break;
            };
            let frame = self.stack.last_mut().expect("stack never empty");
            while let Some(entry) = frame.entries.get(frame.index) {
                if entry.name.as_str() <= marker {
                    frame.index += 1;
                } else {
                    break;
                }
            }
            // Descend into the directory matching the marker, if it is one,
            // to continue fast-forwarding at the next depth.
            let relative_dir = frame.relative_dir.clone();
            let matched_dir = frame
                .entries
                .get(frame.index.saturating_sub(1))
                .filter(|e| e.is_dir && e.name == marker)
                .map(|e| e.name.clone());
            if depth + 1 < token.depth() {
                if let Some(name) = matched_dir {
                    let relative_dir = join_relative(&relative_dir, &name);
                    let full_dir = self.root.join(&relative_dir);
                    let next_frame = Self::read_frame(&self.root, &relative_dir, &full_dir)?;
                    self.stack.push(next_frame);
                }
            }
        }
        Ok(())
    }
}

fn join_relative(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

impl Enumerator for LocalEnumerator {
    fn next(&mut self) -> Result<Option<Entry>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };

            let Some(item) = frame.entries.get(frame.index) else {
                // This frame is exhausted; pop back to the parent level.
                self.stack.pop();
                continue;
            };
            let name = item.name.clone();
            let is_dir = item.is_dir;
            let size = item.size;
            let relative_dir = frame.relative_dir.clone();
            frame.index += 1;

            let relative_path = join_relative(&relative_dir, &name);
            let full_path = self.root.join(&relative_path);

            if is_dir {
                if self.hierarchical {
                    // Hierarchical: yield the directory itself; the caller
                    // decides whether/when to recurse into it via a fresh
                    // sub-enumerator.
                    return Ok(Some(Entry::Directory(DirectoryEntry { relative_path })));
                } else {
                    // Flat/recursive file enumerator: descend immediately.
                    let next_frame = Self::read_frame(&self.root, &relative_path, &full_path)?;
                    self.stack.push(next_frame);
                    continue;
                }
            }

            return Ok(Some(Entry::File(FileEntry {
                relative_path,
                full_path,
                size,
            })));
        }
    }

    fn continuation_token(&self) -> ContinuationToken {
        let mut token = ContinuationToken::start();
        for (depth, frame) in self.stack.iter().enumerate() {
            let marker = frame
                .entries
                .get(frame.index.saturating_sub(1))
                .map(|e| e.name.clone())
                .unwrap_or_default();
            token = token.advance(depth, &marker);
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn collect_files(enumerator: &mut dyn Enumerator) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(entry) = enumerator.next().unwrap() {
            if let Entry::File(f) = entry {
                out.push(f.relative_path);
            }
        }
        out
    }

    #[test]
    fn flat_enumerator_yields_files_in_lexicographic_order() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), b"c").unwrap();

        let mut e = LocalEnumerator::new(dir.path(), false).unwrap();
        let files = collect_files(&mut e);
        assert_eq!(files, vec!["a.txt", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn hierarchical_enumerator_yields_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"x").unwrap();

        let mut e = LocalEnumerator::new(dir.path(), true).unwrap();
        let mut saw_dir = false;
        while let Some(entry) = e.next().unwrap() {
            if let Entry::Directory(d) = entry {
                assert_eq!(d.relative_path, "sub");
                saw_dir = true;
            }
        }
        assert!(saw_dir);
    }

    #[test]
    fn resume_from_continuation_token_skips_already_yielded() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"c").unwrap();

        let mut e = LocalEnumerator::new(dir.path(), false).unwrap();
        assert!(e.next().unwrap().is_some()); // a.txt
        let token = e.continuation_token();

        let mut resumed = LocalEnumerator::resume(dir.path(), false, &token).unwrap();
        let remaining = collect_files(&mut resumed);
        assert_eq!(remaining, vec!["b.txt", "c.txt"]);
    }
}
