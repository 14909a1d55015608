//! # dirstream Entry Encoding (`common::archive::entry`)
//!
//! File: cli/src/common/archive/entry.rs
//!
//! ## Overview
//!
//! Turns one filesystem node into at most one [`ArchiveEntry`]. Classification
//! uses the node's own metadata (`symlink_metadata`), so a symbolic link is never
//! mistaken for the file or directory it points to.
//!
//! ## Symlink policy
//!
//! A link is archived only when its fully resolved target lies inside the
//! resolved archive root. The stored link target is that resolved path expressed
//! relative to the root (`.` for the root itself). Links whose target does not
//! exist, or resolves outside the root, are skipped and reported; they never abort
//! the archive. Any other resolution failure (permissions, link loops) is an I/O
//! error.
//!
use crate::core::error::{ArchiveError, ArchiveResult};
use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Kind of node an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// One node as it will be written to the archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path inside the archive, `/` separated, starting with the root's name.
    pub path: String,
    pub kind: EntryKind,
    /// Payload length; always 0 for directories and symlinks.
    pub size: u64,
    /// Root-relative link target, symlinks only.
    pub link_target: Option<String>,
    /// Source of the header's mode, owner and mtime.
    pub metadata: Option<Metadata>,
}

impl ArchiveEntry {
    /// A regular file whose payload is exactly `size` bytes.
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            size,
            link_target: None,
            metadata: None,
        }
    }

    /// A directory entry. `path` should end in `/`.
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            size: 0,
            link_target: None,
            metadata: None,
        }
    }

    /// A symbolic link to the root-relative `target`.
    pub fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Symlink,
            size: 0,
            link_target: Some(target.into()),
            metadata: None,
        }
    }

    /// Attaches the filesystem metadata the header inherits permissions from.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The directory an archive is rooted at.
#[derive(Debug, Clone)]
pub struct ArchiveRoot {
    path: PathBuf,
    canonical: PathBuf,
    name: String,
}

impl ArchiveRoot {
    /// Resolves `path` once; the canonical form anchors every containment check.
    pub fn resolve(path: impl AsRef<Path>) -> ArchiveResult<Self> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path).map_err(|source| ArchiveError::RootNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        if !canonical.is_dir() {
            return Err(ArchiveError::RootNotDirectory {
                path: path.to_path_buf(),
            });
        }
        let name = node_name(path);
        debug!(
            "Archive root {} resolved to {} (entry name '{}')",
            path.display(),
            canonical.display(),
            name
        );
        Ok(Self {
            path: path.to_path_buf(),
            canonical,
            name,
        })
    }

    /// The path as given by the caller; traversal starts here.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fully resolved, symlink-free absolute path.
    pub fn canonical(&self) -> &Path {
        &self.canonical
    }

    /// Name of the root entry inside the archive.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Why a node produced no entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Symlink resolves outside the archive root.
    OutsideRoot { target: PathBuf },
    /// Symlink target does not exist.
    MissingTarget { missing: PathBuf },
    /// FIFO, socket or device node.
    Special,
    /// The node disappeared between listing and encoding.
    Vanished,
}

/// Result of encoding one node.
#[derive(Debug)]
pub enum Encoded {
    /// An entry to write; `payload` is the open file for regular files.
    Entry {
        entry: ArchiveEntry,
        payload: Option<File>,
    },
    Skipped(SkipReason),
}

/// Applies the entry policy to single filesystem nodes.
#[derive(Debug, Clone)]
pub struct EntryEncoder {
    root: ArchiveRoot,
}

impl EntryEncoder {
    /// Creates an encoder whose symlink checks are anchored at `root`.
    pub fn new(root: ArchiveRoot) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &ArchiveRoot {
        &self.root
    }

    /// # Encode Node (`encode`)
    ///
    /// Classifies the node at `path` from its own metadata and turns it into the
    /// entry stored as `name`, or into the reason it is left out.
    ///
    /// ## Arguments
    ///
    /// * `path` - Filesystem path of the node, inside the root.
    /// * `name` - Archive name chosen by the walker (`root/sub/file`).
    ///
    /// ## Returns
    ///
    /// * `Encoded::Entry` with an open payload for regular files.
    /// * `Encoded::Skipped` for links that escape the root or point nowhere,
    ///   special files, and nodes that vanished or were swapped underneath us.
    ///
    /// ## Errors
    ///
    /// I/O failures other than those skip conditions, for example permission
    /// errors while reading metadata, opening a file or resolving a link.
    pub fn encode(&self, path: &Path, name: String) -> ArchiveResult<Encoded> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Encoded::Skipped(SkipReason::Vanished))
            }
            Err(e) => {
                return Err(ArchiveError::io(
                    format!("reading metadata of {}", path.display()),
                    e,
                ))
            }
        };
        let file_type = metadata.file_type();

        if file_type.is_symlink() {
            self.encode_symlink(path, name, metadata)
        } else if file_type.is_dir() {
            Ok(Encoded::Entry {
                entry: ArchiveEntry::directory(name).with_metadata(metadata),
                payload: None,
            })
        } else if file_type.is_file() {
            let file = match open_payload(path, &metadata)? {
                Payload::Open(file) => file,
                Payload::Skipped(reason) => return Ok(Encoded::Skipped(reason)),
            };
            let size = metadata.len();
            Ok(Encoded::Entry {
                entry: ArchiveEntry::file(name, size).with_metadata(metadata),
                payload: Some(file),
            })
        } else {
            Ok(Encoded::Skipped(SkipReason::Special))
        }
    }

    fn encode_symlink(&self, path: &Path, name: String, metadata: Metadata) -> ArchiveResult<Encoded> {
        let resolved = match fs::canonicalize(path) {
            Ok(resolved) => resolved,
            Err(e) if is_unresolvable(&e) => {
                debug!("Symlink {} does not resolve: {}", path.display(), e);
                return Ok(Encoded::Skipped(SkipReason::MissingTarget {
                    missing: missing_target(path),
                }))
            }
            Err(e) => {
                return Err(ArchiveError::io(
                    format!("resolving symlink {}", path.display()),
                    e,
                ))
            }
        };

        // Component-wise prefix test: "/data2" is not inside "/data".
        let relative = match resolved.strip_prefix(&self.root.canonical) {
            Ok(relative) => relative,
            Err(_) => {
                return Ok(Encoded::Skipped(SkipReason::OutsideRoot { target: resolved }))
            }
        };

        let mut target = to_archive_path(relative);
        if target.is_empty() {
            target = ".".to_string();
        }
        Ok(Encoded::Entry {
            entry: ArchiveEntry::symlink(name, target).with_metadata(metadata),
            payload: None,
        })
    }
}

/// Result of opening a regular file for its payload.
enum Payload {
    Open(File),
    Skipped(SkipReason),
}

/// # Open Payload (`open_payload`)
///
/// Opens `path` without following a final symlink and without blocking on a
/// FIFO, then checks that the opened node is still the regular file `expected`
/// describes. A node swapped between the `lstat` and the open is skipped
/// instead of read.
fn open_payload(path: &Path, expected: &Metadata) -> ArchiveResult<Payload> {
    let file = match open_no_follow(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Payload::Skipped(SkipReason::Vanished))
        }
        Err(e) if is_symlink_refusal(&e) => {
            warn!("{} became a symlink while being archived", path.display());
            return Ok(Payload::Skipped(SkipReason::Vanished));
        }
        Err(e) => return Err(ArchiveError::io(format!("opening {}", path.display()), e)),
    };

    let opened = file
        .metadata()
        .map_err(|e| ArchiveError::io(format!("reading metadata of {}", path.display()), e))?;
    if !opened.is_file() {
        warn!("{} is no longer a regular file", path.display());
        return Ok(Payload::Skipped(SkipReason::Special));
    }
    if !same_node(expected, &opened) {
        warn!("{} was replaced while being archived", path.display());
        return Ok(Payload::Skipped(SkipReason::Vanished));
    }
    Ok(Payload::Open(file))
}

#[cfg(unix)]
fn open_no_follow(path: &Path) -> io::Result<File> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;

    // O_NONBLOCK only matters if the node turned into a FIFO; regular file
    // reads ignore it.
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK)
        .open(path)
}

#[cfg(not(unix))]
fn open_no_follow(path: &Path) -> io::Result<File> {
    File::open(path)
}

#[cfg(unix)]
fn is_symlink_refusal(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::ELOOP)
}

#[cfg(not(unix))]
fn is_symlink_refusal(_e: &io::Error) -> bool {
    false
}

#[cfg(unix)]
fn same_node(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_node(_a: &Metadata, _b: &Metadata) -> bool {
    true
}

/// Resolution failures meaning a link points nowhere: a missing component,
/// a loop, or a path running through a non-directory.
fn is_unresolvable(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || is_loop_or_not_dir(e)
}

#[cfg(unix)]
fn is_loop_or_not_dir(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ELOOP) | Some(libc::ENOTDIR))
}

#[cfg(not(unix))]
fn is_loop_or_not_dir(_e: &io::Error) -> bool {
    false
}

/// Best description of what a dangling link points at, for reporting.
fn missing_target(link: &Path) -> PathBuf {
    match fs::read_link(link) {
        Ok(raw) if raw.is_relative() => link
            .parent()
            .map(|parent| parent.join(&raw))
            .unwrap_or(raw),
        Ok(raw) => raw,
        Err(e) => {
            warn!("Could not read link {}: {}", link.display(), e);
            link.to_path_buf()
        }
    }
}

/// Joins the normal components of `path` with `/`.
pub(crate) fn to_archive_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Name a node gets inside the archive: its final path component, falling back
/// to the resolved path's final component, then `.`.
pub(crate) fn node_name(path: &Path) -> String {
    if let Some(name) = path.file_name() {
        return name.to_string_lossy().into_owned();
    }
    fs::canonicalize(path)
        .ok()
        .and_then(|resolved| resolved.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| ".".to_string())
}
