//! # dirstream Error Types
//!
//! File: cli/src/core/error.rs
//!
//! ## Overview
//!
//! This module defines the error types used throughout dirstream. The archive
//! core (pipe, container writer, compression sink, producer) returns the typed
//! [`ArchiveError`] so callers can tell a failed archive apart from a successful
//! one without string matching. The command layer uses [`Result`], an alias for
//! `anyhow::Result`, to attach context on its way up to `main`.
//!
//! ## Architecture
//!
//! - `ArchiveError`: a `thiserror` enum covering setup, traversal, container
//!   framing and producer-lifecycle failures.
//! - `ArchiveResult<T>`: `Result<T, ArchiveError>`, used by the library core.
//! - `Result<T>`: `anyhow::Result<T>`, used by commands and configuration loading.
//!
//! ## Examples
//!
//! ```rust,ignore
//! use dirstream::core::error::{ArchiveError, ArchiveResult};
//!
//! fn open(path: &std::path::Path) -> ArchiveResult<std::fs::File> {
//!     std::fs::File::open(path).map_err(|e| ArchiveError::io(format!("opening {}", path.display()), e))
//! }
//! ```
//!
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the streaming archiver.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error while {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Archive root '{}' does not exist or cannot be resolved", path.display())]
    RootNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive root '{}' is not a directory", path.display())]
    RootNotDirectory { path: PathBuf },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Producer is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Entry '{path}' declared {declared} bytes but {attempted} were written")]
    PayloadOverflow {
        path: String,
        declared: u64,
        attempted: u64,
    },

    #[error("Entry '{path}' declared {declared} bytes but was closed after {written}")]
    PayloadUnderflow {
        path: String,
        declared: u64,
        written: u64,
    },

    #[error("Entry '{0}' is still open")]
    EntryStillOpen(String),

    #[error("No archive entry is open")]
    NoOpenEntry,

    #[error("Name '{0}' exceeds the 100-byte tar name field and long names are disabled")]
    NameTooLong(String),

    #[error("Value {value} for '{field}' exceeds the tar numeric field and big numbers are disabled")]
    NumberTooLarge { field: &'static str, value: u64 },

    #[error("Cannot list directory '{}'", path.display())]
    UnreadableDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Producer thread panicked")]
    ProducerPanicked,
}

impl ArchiveError {
    /// Wraps an `io::Error` with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        ArchiveError::Io {
            context: context.into(),
            source,
        }
    }

    /// Renders the error followed by its causes, `outer: cause: ...`.
    ///
    /// `Display` shows only the outermost message so that anyhow's `{:#}`
    /// does not repeat a cause; log lines use this instead.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}

/// Result type for the archive core.
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// Type alias for Result using anyhow::Error, used by the command layer.
pub type Result<T> = anyhow::Result<T>;
