//! # dirstream Tree Walker (`common::archive::walker`)
//!
//! File: cli/src/common/archive/walker.rs
//!
//! ## Overview
//!
//! Enumerates a directory tree pre-order (a directory before its children) and
//! hands every node to a visitor together with its archive name. The walker only
//! decides what to descend into; classifying a node is the encoder's job.
//!
//! - Names: the start node gets the name the caller chooses, every descendant is
//!   its parent's name + `/` + its own file name.
//! - Only real directories are descended into. Symlinks, including links to
//!   directories, are reported as nodes and never followed, which keeps the walk
//!   finite on cyclic trees.
//! - Sibling order is the filesystem's enumeration order unless sorting is on.
//! - A directory whose listing fails is handled by [`UnreadableDirPolicy`].
//!
use crate::common::archive::entry::to_archive_path;
use crate::core::config::UnreadableDirPolicy;
use crate::core::error::{ArchiveError, ArchiveResult};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// What the walker reports to its visitor.
#[derive(Debug)]
pub enum WalkEvent<'a> {
    /// A node to encode.
    Node {
        path: &'a Path,
        name: String,
        depth: usize,
    },
    /// A listing failure that the `Skip` policy stepped over.
    Unreadable { path: PathBuf, reason: String },
}

/// Pre-order, non-following directory walker.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeWalker {
    policy: UnreadableDirPolicy,
    sort: bool,
}

impl TreeWalker {
    /// Creates an unsorted walker applying `policy` to directories that cannot
    /// be listed.
    pub fn new(policy: UnreadableDirPolicy) -> Self {
        Self {
            policy,
            sort: false,
        }
    }

    /// Visit siblings in file-name order.
    pub fn sorted(mut self, sort: bool) -> Self {
        self.sort = sort;
        self
    }

    /// # Walk Tree (`walk`)
    ///
    /// Walks `start`, which appears in the archive as `start_name`. Parents are
    /// visited before their children and symlinks are reported, never entered.
    ///
    /// ## Arguments
    ///
    /// * `start` - Directory to walk, normally the canonical root.
    /// * `start_name` - Archive name of `start`; children become `start_name/...`.
    /// * `visit` - Called once per event; an error stops the walk.
    ///
    /// ## Errors
    ///
    /// * Whatever `visit` returns.
    /// * `UnreadableDirectory` under `UnreadableDirPolicy::Abort`.
    pub fn walk<F>(&self, start: &Path, start_name: &str, mut visit: F) -> ArchiveResult<()>
    where
        F: FnMut(WalkEvent<'_>) -> ArchiveResult<()>,
    {
        let mut walker = WalkDir::new(start)
            .follow_links(false)
            .follow_root_links(false);
        if self.sort {
            walker = walker.sort_by_file_name();
        }

        for entry_result in walker {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| start.to_path_buf());
                    match self.policy {
                        UnreadableDirPolicy::Skip => {
                            let reason = match err.io_error() {
                                Some(io_err) => io_err.to_string(),
                                None => err.to_string(),
                            };
                            visit(WalkEvent::Unreadable { path, reason })?;
                            continue;
                        }
                        UnreadableDirPolicy::Abort => {
                            let message = err.to_string();
                            let source = err
                                .into_io_error()
                                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, message));
                            return Err(ArchiveError::UnreadableDirectory { path, source });
                        }
                    }
                }
            };

            let relative = entry.path().strip_prefix(start).unwrap_or(entry.path());
            let rest = to_archive_path(relative);
            let name = if rest.is_empty() {
                start_name.to_string()
            } else {
                format!("{}/{}", start_name, rest)
            };
            debug!("Visiting {} as '{}'", entry.path().display(), name);
            visit(WalkEvent::Node {
                path: entry.path(),
                name,
                depth: entry.depth(),
            })?;
        }
        Ok(())
    }
}
