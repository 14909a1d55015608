//! # dirstream Library
//!
//! File: cli/src/lib.rs
//!
//! ## Overview
//!
//! Streams a directory tree as a gzip-compressed tar archive through a bounded
//! in-process pipe. A dedicated producer thread walks the tree and writes the
//! archive into the pipe; the caller reads the compressed bytes from the other
//! end while they are produced, so the archive never has to exist on disk or in
//! memory as a whole.
//!
//! - `common::archive`: the walker, entry policy, tar/gzip stack and producer.
//! - `common::pipe`: the bounded single-producer, single-consumer byte pipe.
//! - `core`: options and error types.
//! - `commands`: the `dirstream` CLI commands built on the above.
//!
pub mod commands;
pub mod common;
pub mod core;

pub use crate::common::archive::observer::{ArchiveEvent, ArchiveObserver};
pub use crate::common::archive::producer::{
    prepare_stream, spawn, ProducerState, StreamProducer, StreamSummary,
};
pub use crate::common::pipe::PipeReader;
pub use crate::core::config::{ArchiveOptions, UnreadableDirPolicy};
pub use crate::core::error::{ArchiveError, ArchiveResult};
