//! # dirstream Common Utilities (`common`)
//!
//! File: cli/src/common/mod.rs
//!
//! ## Overview
//!
//! Shared building blocks used by the command layer:
//!
//! - **`archive`**: the streaming archive pipeline (walk, encode, tar, gzip, produce).
//! - **`pipe`**: the bounded in-process byte pipe that connects the producer
//!   thread to the consumer.
//!

/// Streaming `.tar.gz` pipeline.
pub mod archive;
/// Bounded single-producer, single-consumer byte pipe.
pub mod pipe;
