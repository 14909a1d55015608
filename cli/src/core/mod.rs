//! # dirstream Core Infrastructure
//!
//! File: cli/src/core/mod.rs
//!
//! ## Overview
//!
//! Foundational pieces shared by the archive core and the command layer:
//! - `config`: `ArchiveOptions`, their defaults, validation and TOML loading
//! - `error`: `ArchiveError` and the `ArchiveResult` / `Result` aliases
//!
pub mod config;
pub mod error;
