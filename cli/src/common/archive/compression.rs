//! # dirstream Compression Sink (`common::archive::compression`)
//!
//! File: cli/src/common/archive/compression.rs
//!
//! ## Overview
//!
//! Layers the archive stream over a raw byte sink:
//!
//! ```text
//! TarStreamWriter -> GzEncoder (flate2) -> BufWriter (block buffer) -> ByteSink
//! ```
//!
//! The sink is anything implementing [`ByteSink`]: the write end of the
//! in-process pipe, or any `Write` wrapped in [`WriteSink`].
//!
//! ## Finalization
//!
//! [`CompressionSink::finish`] runs every close step in order and keeps going
//! after a failure, so each layer gets a chance to release what it holds and the
//! sink always ends up closed. The first error is the one returned.
//!
//! 1. tar end-of-archive trailer
//! 2. release the tar writer
//! 3. gzip trailer and pending compressed output
//! 4. flush the block buffer
//! 5. flush and close the sink
//!
use crate::common::archive::entry::ArchiveEntry;
use crate::common::archive::tar::{BigNumberMode, LongNameMode, TarStreamWriter};
use crate::common::pipe::PipeWriter;
use crate::core::error::{ArchiveError, ArchiveResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, BufWriter, Write};
use tracing::{debug, warn};

/// A byte destination that can be closed explicitly.
pub trait ByteSink: Write + Send {
    /// Marks the end of the stream. Called once, after the final flush.
    fn close(&mut self) -> io::Result<()>;
}

impl ByteSink for PipeWriter {
    fn close(&mut self) -> io::Result<()> {
        PipeWriter::close(self)
    }
}

/// Adapts a plain writer (file, stdout, `Vec<u8>`) into a [`ByteSink`]; closing
/// only flushes.
#[derive(Debug)]
pub struct WriteSink<W>(pub W);

impl<W: Write> Write for WriteSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + Send> ByteSink for WriteSink<W> {
    fn close(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

type Stack<S> = TarStreamWriter<GzEncoder<BufWriter<S>>>;

/// tar + gzip + buffering on top of a [`ByteSink`].
pub struct CompressionSink<S: ByteSink> {
    tar: Stack<S>,
}

impl<S: ByteSink> CompressionSink<S> {
    /// # New Compression Sink (`new`)
    ///
    /// Builds the tar, gzip and block-buffer layers over `sink`.
    ///
    /// ## Arguments
    ///
    /// * `sink` - Final destination of the compressed bytes.
    /// * `buffer_size` - Block buffer in front of the sink, in bytes.
    /// * `level` - Gzip level, 0 (store) to 9 (best).
    ///
    /// ## Errors
    ///
    /// * `Config` for a zero buffer or a level above 9.
    pub fn new(sink: S, buffer_size: usize, level: u32) -> ArchiveResult<Self> {
        if buffer_size == 0 {
            return Err(ArchiveError::Config(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        if level > 9 {
            return Err(ArchiveError::Config(format!(
                "compression_level must be between 0 and 9, got {}",
                level
            )));
        }
        let buffered = BufWriter::with_capacity(buffer_size, sink);
        let gzip = GzEncoder::new(buffered, Compression::new(level));
        debug!(
            "Compression sink ready (buffer {} bytes, gzip level {})",
            buffer_size, level
        );
        Ok(Self {
            tar: TarStreamWriter::new(gzip),
        })
    }

    /// See [`TarStreamWriter::set_long_name_mode`].
    pub fn set_long_name_mode(&mut self, mode: LongNameMode) {
        self.tar.set_long_name_mode(mode);
    }

    /// See [`TarStreamWriter::set_big_number_mode`].
    pub fn set_big_number_mode(&mut self, mode: BigNumberMode) {
        self.tar.set_big_number_mode(mode);
    }

    /// Writes the header for `entry`; payload follows via `write_entry_payload`.
    pub fn write_entry(&mut self, entry: &ArchiveEntry) -> ArchiveResult<()> {
        self.tar.put_entry(entry)
    }

    /// Appends payload to the entry opened by `write_entry`. Fails with
    /// `PayloadOverflow` past the declared size.
    pub fn write_entry_payload(&mut self, data: &[u8]) -> ArchiveResult<()> {
        self.tar.write_payload(data)
    }

    /// Pads and closes the open entry.
    pub fn close_entry(&mut self) -> ArchiveResult<()> {
        self.tar.close_entry()
    }

    /// # Finish (`finish`)
    ///
    /// Finalizes every layer, see the module docs for the order. Each step runs
    /// even if an earlier one failed, so the sink is always closed.
    ///
    /// ## Returns
    ///
    /// * `Ok(())` once the trailer, gzip footer and buffered bytes reached the
    ///   sink and the sink was closed.
    /// * The first error met otherwise; later ones are only logged.
    pub fn finish(self) -> ArchiveResult<()> {
        let mut first_error: Option<ArchiveError> = None;
        let mut record = |step: &str, result: ArchiveResult<()>| {
            if let Err(e) = result {
                warn!("Finalization step '{}' failed: {}", step, e.report());
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        let mut tar = self.tar;
        record("tar trailer", tar.finish());

        let mut gzip = tar.into_inner();
        record(
            "gzip trailer",
            gzip.try_finish()
                .map_err(|e| ArchiveError::io("finishing gzip stream", e)),
        );

        let buffered = gzip.get_mut();
        record(
            "buffer flush",
            buffered
                .flush()
                .map_err(|e| ArchiveError::io("flushing stream buffer", e)),
        );

        let sink = buffered.get_mut();
        record(
            "sink flush",
            sink.flush()
                .map_err(|e| ArchiveError::io("flushing output sink", e)),
        );
        record(
            "sink close",
            sink.close()
                .map_err(|e| ArchiveError::io("closing output sink", e)),
        );

        // Dropping the layers now cannot produce output: everything was either
        // flushed or the sink is closed.
        drop(gzip);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
