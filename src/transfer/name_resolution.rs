//! Name resolution for directory transfers (part of C7)
//!
//! Maps a source entry's relative path to a destination path. Three shapes,
//! per §4.6: blob->blob is an identity mapping; blob->local folds the
//! remote `/` delimiter into the local path separator, collapsing runs per
//! the `delimiter` option; local->blob normalizes the local separator to
//! `/`. Destination parent directories are created on demand by the caller
//! once a path is resolved, not by the resolver itself.

use crate::location::TransferLocation;
use std::path::{Path, PathBuf};

/// Resolves a source-relative path to a destination-relative path given the
/// kind of the two endpoints.
#[derive(Debug, Clone, Copy)]
pub struct NameResolver {
    delimiter: char,
}

impl Default for NameResolver {
    fn default() -> Self {
        Self { delimiter: '/' }
    }
}

impl NameResolver {
    /// Build a resolver with an explicit delimiter (defaults to `/`).
    pub fn new(delimiter: Option<char>) -> Self {
        Self {
            delimiter: delimiter.unwrap_or('/'),
        }
    }

    /// Resolve `relative_path` (as yielded by the source enumerator, always
    /// `/`-separated) into a concrete destination location rooted at
    /// `dest_root`.
    pub fn resolve(&self, dest_root: &TransferLocation, relative_path: &str) -> TransferLocation {
        match dest_root {
            TransferLocation::LocalDirectoryPath { dir } => {
                let local_rel = self.fold_to_local(relative_path);
                TransferLocation::LocalFilePath {
                    path: dir.join(&local_rel),
                    rel_path: Some(relative_path.to_string()),
                }
            }
            TransferLocation::RemoteBlobDirectory {
                container_uri,
                prefix,
                credentials,
                request_options,
            } => {
                let blob_rel = self.normalize_to_remote(relative_path);
                let uri = join_remote(container_uri, prefix, &blob_rel);
                TransferLocation::RemoteBlob {
                    uri,
                    snapshot: None,
                    blob_type: crate::location::BlobType::Block,
                    credentials: credentials.clone(),
                    access_condition: None,
                    request_options: request_options.clone(),
                }
            }
            other => other.clone(),
        }
    }

    /// blob -> local: fold the remote `/` delimiter into the local
    /// separator, collapsing consecutive delimiters into one.
    fn fold_to_local(&self, relative_path: &str) -> PathBuf {
        let collapsed = collapse_runs(relative_path, '/');
        let mut path = PathBuf::new();
        for segment in collapsed.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        let _ = self.delimiter;
        path
    }

    /// local -> blob: normalize the local separator to `/`.
    fn normalize_to_remote(&self, relative_path: &str) -> String {
        let normalized: String = relative_path
            .chars()
            .map(|c| if c == std::path::MAIN_SEPARATOR { '/' } else { c })
            .collect();
        collapse_runs(&normalized, '/')
    }
}

fn collapse_runs(s: &str, ch: char) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_ch = false;
    for c in s.chars() {
        if c == ch {
            if last_was_ch {
                continue;
            }
            last_was_ch = true;
        } else {
            last_was_ch = false;
        }
        out.push(c);
    }
    out
}

fn join_remote(container_uri: &str, prefix: &str, relative_path: &str) -> String {
    let mut parts = vec![container_uri.trim_end_matches('/').to_string()];
    if !prefix.is_empty() {
        parts.push(prefix.trim_matches('/').to_string());
    }
    parts.push(relative_path.trim_start_matches('/').to_string());
    parts.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join("/")
}

/// Normalize a local filesystem relative path (as produced by the local
/// enumerator, which already joins with `/`) into a `Path` under `root`.
pub fn local_destination_path(root: &Path, relative_path: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in relative_path.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}
