//! # dirstream Pack Command
//!
//! File: cli/src/commands/pack.rs
//!
//! ## Overview
//!
//! Implements `dirstream pack`, which streams a directory as a `.tar.gz` archive
//! into a file or to standard output. The command is the consumer half of the
//! producer/consumer pair: the archive is produced on the `dirstream-producer`
//! thread and this thread copies the pipe's bytes to the destination.
//!
//! ## Architecture
//!
//! 1. Merge options: CLI flags over the config file (`--config`, or
//!    `.dirstream.toml` inside the directory) over built-in defaults.
//! 2. Check the directory, then open the destination before anything is
//!    produced.
//! 3. Prepare the producer and start it on its own thread.
//! 4. Copy the pipe into the destination until end-of-stream.
//! 5. Join the producer. A destination write failure is reported as such; the
//!    producer's error is reported when the stream itself was cut short.
//!
//! When the archive goes to stdout, progress lines are printed on stderr so the
//! byte stream stays clean.
//!
//! ## Examples
//!
//! ```bash
//! # Archive ./photos into photos.tar.gz
//! dirstream pack ./photos -o photos.tar.gz
//!
//! # Stream to another program, no progress output
//! dirstream pack /data --quiet | ssh backup 'cat > data.tar.gz'
//!
//! # Deterministic entry order, stop on the first unreadable directory
//! dirstream pack /data -o data.tar.gz --sort --abort-on-unreadable
//! ```
//!
use crate::common::archive::entry::ArchiveRoot;
use crate::common::archive::observer::LineObserver;
use crate::common::archive::producer::{self, StreamProducer, StreamSummary};
use crate::core::config::{self, ArchiveOptions, UnreadableDirPolicy};
use crate::core::error::Result;
use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// # Pack Arguments (`PackArgs`)
///
/// Flags left unset fall back to the config file, then to the defaults.
#[derive(Parser, Debug, Default)]
pub struct PackArgs {
    /// Directory to archive.
    pub directory: PathBuf,

    /// Write the archive to this file instead of standard output.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Size in bytes of the block buffer in front of the pipe.
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Capacity in bytes of the pipe between producer and consumer.
    #[arg(long)]
    pub pipe_capacity: Option<usize>,

    /// Gzip compression level, 0 (store) to 9 (best).
    #[arg(short, long)]
    pub level: Option<u32>,

    /// Do not print progress lines.
    #[arg(short, long)]
    pub quiet: bool,

    /// Archive siblings in file-name order.
    #[arg(long)]
    pub sort: bool,

    /// Fail instead of skipping directories that cannot be listed.
    #[arg(long)]
    pub abort_on_unreadable: bool,

    /// Options file to use instead of `<DIRECTORY>/.dirstream.toml`.
    #[arg(long, env = "DIRSTREAM_CONFIG")]
    pub config: Option<PathBuf>,
}

/// # Effective Options (`effective_options`)
///
/// Loads the file layer and applies every flag the user actually set.
/// The result is validated, so a bad `--level` fails here rather than
/// after the destination was created.
pub fn effective_options(args: &PackArgs) -> Result<ArchiveOptions> {
    let mut options = config::load_options(&args.directory, args.config.as_deref())?;

    if let Some(buffer_size) = args.buffer_size {
        options.buffer_size = buffer_size;
    }
    if let Some(pipe_capacity) = args.pipe_capacity {
        options.pipe_capacity = pipe_capacity;
    }
    if let Some(level) = args.level {
        options.compression_level = level;
    }
    if args.quiet {
        options.verbose = false;
    }
    if args.sort {
        options.sort_entries = true;
    }
    if args.abort_on_unreadable {
        options.unreadable_dirs = UnreadableDirPolicy::Abort;
    }

    options.validate().context("Invalid archive options")?;
    debug!("Effective options: {:?}", options);
    Ok(options)
}

/// # Handle Pack Command (`handle_pack`)
///
/// Runs one archive operation end to end and logs its summary.
///
/// ## Returns
///
/// * `Result<()>`: `Ok(())` once the complete archive was written and flushed.
///   Errors carry the producer's `ArchiveError` or the destination's I/O error.
pub fn handle_pack(args: PackArgs) -> Result<()> {
    info!("Handling pack command...");
    debug!("Pack args: {:?}", args);

    let options = effective_options(&args)?;
    // Checked up front so a bad directory never leaves an empty output file.
    ArchiveRoot::resolve(&args.directory)
        .with_context(|| format!("Cannot archive {}", args.directory.display()))?;

    let summary = match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file {}", path.display()))?;
            let summary = stream_into(&args.directory, options, BufWriter::new(file), false)?;
            info!("Archive written to {}", path.display());
            summary
        }
        None => {
            let stdout = io::stdout();
            stream_into(&args.directory, options, stdout.lock(), true)?
        }
    };

    info!(
        "Packed {} files, {} directories, {} symlinks ({} skipped, {} payload bytes)",
        summary.files, summary.directories, summary.symlinks, summary.skipped, summary.payload_bytes
    );
    Ok(())
}

/// Produces the archive of `root` on the producer thread and copies it into
/// `out`.
fn stream_into<W: Write>(
    root: &Path,
    options: ArchiveOptions,
    mut out: W,
    progress_to_stderr: bool,
) -> Result<StreamSummary> {
    let mut producer = StreamProducer::new(root, options);
    if progress_to_stderr && producer.options().verbose {
        producer = producer.with_observer(LineObserver::stderr());
    }

    let mut reader = producer
        .prepare_channel()
        .with_context(|| format!("Failed to prepare archive of {}", root.display()))?;
    let handle = producer::spawn_prepared(producer)?;

    let copied = copy_stream(&mut reader, &mut out);
    // Unblocks the producer if the copy stopped early.
    drop(reader);
    let joined = producer::join(handle);

    match copied {
        Ok(bytes) => debug!("Copied {} compressed bytes", bytes),
        // A truncated stream comes from an aborted producer, whose error says why.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && joined.is_err() => {
            debug!("Stream ended early: {}", e)
        }
        Err(e) => {
            if let Err(producer_err) = &joined {
                debug!("Producer stopped after the copy failed: {}", producer_err.report());
            }
            return Err(anyhow::Error::new(e).context("Failed to write archive"));
        }
    }

    joined.with_context(|| format!("Failed to archive {}", root.display()))
}

fn copy_stream<R: Read, W: Write>(reader: &mut R, out: &mut W) -> io::Result<u64> {
    let bytes = io::copy(reader, out)?;
    out.flush()?;
    Ok(bytes)
}
