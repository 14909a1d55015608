//! # dirstream Archive Pipeline (`common::archive`)
//!
//! File: cli/src/common/archive/mod.rs
//!
//! ## Overview
//!
//! Everything between a directory on disk and the `.tar.gz` bytes a consumer
//! reads from the pipe. Each stage is its own submodule:
//!
//! - **`entry`**: classifies one node and applies the symlink containment policy.
//! - **`walker`**: pre-order traversal that never follows symlinks.
//! - **`tar`**: streaming tar writer with GNU long-name and base-256 extensions.
//! - **`compression`**: tar over gzip over a block buffer over a byte sink, with
//!   the ordered finalization cascade.
//! - **`observer`**: progress events and the observers that print or record them.
//! - **`producer`**: the state machine that wires the stages to the pipe and runs
//!   them on the producer thread.
//!
//! Most callers only need [`producer::spawn`] or [`producer::prepare_stream`].
//!

pub mod compression;
pub mod entry;
pub mod observer;
pub mod producer;
pub mod tar;
pub mod walker;

pub use producer::{prepare_stream, spawn, ProducerState, StreamProducer, StreamSummary};
