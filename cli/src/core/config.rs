//! # dirstream Configuration
//!
//! File: cli/src/core/config.rs
//!
//! ## Overview
//!
//! This module defines [`ArchiveOptions`], the knobs of one archive operation,
//! and the helpers that load them from TOML. Sources, in order of precedence:
//!
//! 1. Command-line flags (applied by `commands::pack`)
//! 2. An explicit `--config <FILE>`, or `.dirstream.toml` inside the archived directory
//! 3. Default values defined in the code
//!
//! ## Examples
//!
//! Configuration file format:
//!
//! ```toml
//! buffer_size = 1048576
//! pipe_capacity = 65536
//! verbose = false
//! compression_level = 9
//! unreadable_dirs = "abort"
//! sort_entries = true
//! ```
//!
use crate::core::error::{ArchiveError, ArchiveResult, Result};
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default size of the block-buffering layer and of the pipe (1 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Default gzip level (same as `flate2::Compression::default()`).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Name of the per-directory configuration file.
pub const PROJECT_CONFIG_FILENAME: &str = ".dirstream.toml";

/// What to do when a directory's child listing cannot be read.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UnreadableDirPolicy {
    /// Treat the directory as empty, log a warning and keep walking.
    #[default]
    Skip,
    /// Stop the archive and surface `ArchiveError::UnreadableDirectory`.
    Abort,
}

/// Options for a single archive operation.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ArchiveOptions {
    /// Size of the buffering layer between the compressor and the pipe.
    pub buffer_size: usize,
    /// Capacity of the pipe in bytes; the producer blocks once it is full.
    pub pipe_capacity: usize,
    /// Print one progress line per node to stdout when no observer is installed.
    pub verbose: bool,
    /// Gzip level, 0 (store) to 9 (best).
    pub compression_level: u32,
    /// Policy for directories whose listing fails.
    pub unreadable_dirs: UnreadableDirPolicy,
    /// Sort siblings by file name instead of filesystem enumeration order.
    pub sort_entries: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            pipe_capacity: DEFAULT_BUFFER_SIZE,
            verbose: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            unreadable_dirs: UnreadableDirPolicy::Skip,
            sort_entries: false,
        }
    }
}

impl ArchiveOptions {
    /// Checks value ranges. Called by the producer before any resource is allocated.
    pub fn validate(&self) -> ArchiveResult<()> {
        if self.buffer_size == 0 {
            return Err(ArchiveError::Config(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.pipe_capacity == 0 {
            return Err(ArchiveError::Config(
                "pipe_capacity must be greater than zero".to_string(),
            ));
        }
        if self.compression_level > 9 {
            return Err(ArchiveError::Config(format!(
                "compression_level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }
}

/// Reads and parses an options file.
pub fn load_options_from_path(path: &Path) -> Result<ArchiveOptions> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
    let options: ArchiveOptions = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML from file: {}", path.display()))?;
    options
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(options)
}

/// Locates the options file for an archive operation.
///
/// An explicit path must exist. Without one, `.dirstream.toml` directly inside
/// `root` is used when present.
pub fn find_options_file(root: &Path, explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            anyhow::bail!(ArchiveError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let candidate = root.join(PROJECT_CONFIG_FILENAME);
    if candidate.is_file() {
        Ok(Some(candidate))
    } else {
        debug!("No {} found in {}", PROJECT_CONFIG_FILENAME, root.display());
        Ok(None)
    }
}

/// Loads options for `root`, falling back to defaults when no file is found.
pub fn load_options(root: &Path, explicit: Option<&Path>) -> Result<ArchiveOptions> {
    match find_options_file(root, explicit)? {
        Some(path) => {
            info!("Loading archive options from: {}", path.display());
            load_options_from_path(&path)
        }
        None => Ok(ArchiveOptions::default()),
    }
}
