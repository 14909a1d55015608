//! # dirstream Integration Test Helpers
//!
//! File: cli/tests/common.rs
//!
//! ## Overview
//!
//! Shared helpers for the integration tests under `cli/tests/`: the command
//! builder for the `dirstream` binary and a reader for the archives it produces.
//!

// Each test crate uses a different subset of these helpers.
#![allow(dead_code)]

pub use assert_cmd::Command;

use flate2::read::GzDecoder;
use std::io::Read;

/// # Get dirstream Command (`dirstream_cmd`)
///
/// An `assert_cmd::Command` for the `dirstream` binary built for this test run.
///
/// ## Panics
/// Panics if the binary cannot be found via `Command::cargo_bin`.
pub fn dirstream_cmd() -> Command {
    Command::cargo_bin("dirstream").expect("Failed to find dirstream binary for testing")
}

/// One decoded archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    pub path: String,
    pub kind: tar::EntryType,
    pub size: u64,
    pub link: Option<String>,
    pub mode: u32,
    pub content: Vec<u8>,
}

/// Decompresses and lists a `.tar.gz` byte stream, in archive order.
pub fn list_archive(bytes: &[u8]) -> Vec<Listed> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut listed = Vec::new();
    for entry in archive.entries().expect("archive should be readable") {
        let mut entry = entry.expect("entry should be readable");
        let path = entry
            .path()
            .expect("entry path")
            .to_string_lossy()
            .into_owned();
        let link = entry
            .link_name()
            .expect("link name")
            .map(|l| l.to_string_lossy().into_owned());
        let header = entry.header();
        let kind = header.entry_type();
        let size = header.size().expect("entry size");
        let mode = header.mode().expect("entry mode");
        let mut content = Vec::new();
        entry.read_to_end(&mut content).expect("entry content");
        listed.push(Listed {
            path,
            kind,
            size,
            link,
            mode,
            content,
        });
    }
    listed
}

/// Just the entry names of a `.tar.gz` byte stream.
pub fn archive_names(bytes: &[u8]) -> Vec<String> {
    list_archive(bytes).into_iter().map(|e| e.path).collect()
}
