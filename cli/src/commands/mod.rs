//! # dirstream Command Modules
//!
//! File: cli/src/commands/mod.rs
//!
//! ## Overview
//!
//! Top-level commands of the `dirstream` CLI. Each command module defines its
//! `clap` argument struct and a `handle_*` function that `main.rs` dispatches to.
//!
//! - `pack`: stream a directory as `.tar.gz` into a file or stdout
//!

/// Archive a directory into a file or standard output.
pub mod pack;
