//! # dirstream Stream Producer (`common::archive::producer`)
//!
//! File: cli/src/common/archive/producer.rs
//!
//! ## Overview
//!
//! Drives one archive operation from a directory root to the read end of an
//! in-process pipe. The producer owns the write side (walker, encoder,
//! compression stack, pipe writer) and runs on its own thread; the caller keeps
//! the [`PipeReader`] and consumes the `.tar.gz` bytes as they are produced.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --prepare_channel--> Preparing --start_streaming--> Streaming --> Finished
//!                                                                   \--> Failed
//! ```
//!
//! - [`StreamProducer::prepare_channel`] resolves the root and builds the pipe and
//!   the compression stack. Nothing is read from disk yet.
//! - [`StreamProducer::start_streaming`] walks the tree and writes every entry.
//!   It blocks whenever the pipe is full, so it belongs on a thread other than the
//!   consumer's. Whatever happens during the walk, every finalization step runs
//!   before it returns. If the walk failed, the pipe is broken first, so the
//!   reader ends with `UnexpectedEof` instead of a clean end-of-stream.
//! - [`spawn`] does both and starts the dedicated `dirstream-producer` thread.
//!
//! Calling an operation in the wrong state returns [`ArchiveError::InvalidState`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dirstream::common::archive::producer;
//! use dirstream::core::config::ArchiveOptions;
//! use std::io;
//!
//! # fn run() -> anyhow::Result<()> {
//! let (mut reader, handle) = producer::spawn("/data", ArchiveOptions::default())?;
//! io::copy(&mut reader, &mut io::sink())?;
//! let summary = producer::join(handle)?;
//! println!("{} files", summary.files);
//! # Ok(())
//! # }
//! ```
//!
use crate::common::archive::compression::CompressionSink;
use crate::common::archive::entry::{ArchiveRoot, Encoded, EntryEncoder, EntryKind, SkipReason};
use crate::common::archive::observer::{ArchiveEvent, ArchiveObserver, LineObserver};
use crate::common::archive::tar::{BigNumberMode, LongNameMode};
use crate::common::archive::walker::{TreeWalker, WalkEvent};
use crate::common::pipe::{self, PipeAbort, PipeReader, PipeWriter};
use crate::core::config::ArchiveOptions;
use crate::core::error::{ArchiveError, ArchiveResult};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Name of the thread started by [`spawn`].
pub const PRODUCER_THREAD_NAME: &str = "dirstream-producer";

/// Size of the scratch buffer file payloads are copied through.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Where a producer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Idle,
    Preparing,
    Streaming,
    Finished,
    Failed,
}

impl ProducerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProducerState::Idle => "idle",
            ProducerState::Preparing => "preparing",
            ProducerState::Streaming => "streaming",
            ProducerState::Finished => "finished",
            ProducerState::Failed => "failed",
        }
    }
}

impl fmt::Display for ProducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one archive operation wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    /// Nodes left out: unsafe or dangling symlinks, special files, vanished
    /// nodes and skipped unreadable directories.
    pub skipped: u64,
    /// Uncompressed file payload bytes.
    pub payload_bytes: u64,
}

/// Fans events out to `tracing` and the optional observer.
struct Reporter {
    observer: Option<Box<dyn ArchiveObserver>>,
}

impl Reporter {
    fn emit(&mut self, event: ArchiveEvent) {
        event.trace();
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(&event);
        }
    }
}

/// Resources built by `prepare_channel` and consumed by `start_streaming`.
struct Prepared {
    root: ArchiveRoot,
    sink: CompressionSink<PipeWriter>,
    abort: PipeAbort,
}

/// Produces a `.tar.gz` stream of one directory tree into a pipe.
pub struct StreamProducer {
    root_path: PathBuf,
    options: ArchiveOptions,
    state: ProducerState,
    observer: Option<Box<dyn ArchiveObserver>>,
    prepared: Option<Prepared>,
}

impl fmt::Debug for StreamProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProducer")
            .field("root_path", &self.root_path)
            .field("options", &self.options)
            .field("state", &self.state)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl StreamProducer {
    pub fn new(root: impl AsRef<Path>, options: ArchiveOptions) -> Self {
        Self {
            root_path: root.as_ref().to_path_buf(),
            options,
            state: ProducerState::Idle,
            observer: None,
            prepared: None,
        }
    }

    /// Installs a progress observer. Without one, `verbose` options print
    /// progress lines to stdout.
    pub fn with_observer(mut self, observer: impl ArchiveObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    fn expect_state(&self, expected: ProducerState) -> ArchiveResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ArchiveError::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    /// Resolves the root and builds the pipe and compression stack. Returns the
    /// read end the consumer drains.
    pub fn prepare_channel(&mut self) -> ArchiveResult<PipeReader> {
        self.expect_state(ProducerState::Idle)?;
        match self.build_channel() {
            Ok((prepared, reader)) => {
                self.prepared = Some(prepared);
                self.state = ProducerState::Preparing;
                Ok(reader)
            }
            Err(e) => {
                error!("Preparing stream for {} failed: {}", self.root_path.display(), e.report());
                self.state = ProducerState::Failed;
                Err(e)
            }
        }
    }

    fn build_channel(&self) -> ArchiveResult<(Prepared, PipeReader)> {
        self.options.validate()?;
        let root = ArchiveRoot::resolve(&self.root_path)?;
        let (writer, reader) = pipe::channel(self.options.pipe_capacity)?;
        let abort = writer.abort_handle();
        let mut sink = CompressionSink::new(
            writer,
            self.options.buffer_size,
            self.options.compression_level,
        )?;
        sink.set_long_name_mode(LongNameMode::Gnu);
        sink.set_big_number_mode(BigNumberMode::Gnu);
        info!(
            "Prepared stream for {} (pipe {} bytes, buffer {} bytes, level {})",
            root.canonical().display(),
            self.options.pipe_capacity,
            self.options.buffer_size,
            self.options.compression_level
        );
        Ok((Prepared { root, sink, abort }, reader))
    }

    /// Writes the whole tree into the pipe, then finalizes the stream. Blocks
    /// while the consumer is behind.
    pub fn start_streaming(&mut self) -> ArchiveResult<StreamSummary> {
        self.expect_state(ProducerState::Preparing)?;
        let Prepared {
            root,
            mut sink,
            abort,
        } = self.prepared.take().ok_or(ArchiveError::InvalidState {
            expected: ProducerState::Preparing.as_str(),
            actual: ProducerState::Idle.as_str(),
        })?;
        self.state = ProducerState::Streaming;

        let observer = match self.observer.take() {
            Some(observer) => Some(observer),
            None if self.options.verbose => {
                Some(Box::new(LineObserver::stdout()) as Box<dyn ArchiveObserver>)
            }
            None => None,
        };
        let mut reporter = Reporter { observer };
        let mut summary = StreamSummary::default();

        info!("Streaming {} as '{}'", root.canonical().display(), root.name());
        let walker = TreeWalker::new(self.options.unreadable_dirs).sorted(self.options.sort_entries);
        let start = root.canonical().to_path_buf();
        let start_name = root.name().to_string();
        let encoder = EntryEncoder::new(root);
        let mut chunk = vec![0u8; COPY_CHUNK_SIZE];

        let walk_result = walker.walk(&start, &start_name, |event| match event {
            WalkEvent::Unreadable { path, reason } => {
                summary.skipped += 1;
                reporter.emit(ArchiveEvent::SkippedUnreadable { path, reason });
                Ok(())
            }
            WalkEvent::Node { path, name, .. } => write_node(
                &encoder,
                &mut sink,
                &mut reporter,
                &mut summary,
                &mut chunk,
                path,
                name,
            ),
        });

        if let Err(e) = &walk_result {
            // The reader must not mistake the partial archive for a complete one.
            warn!("Walk stopped early, breaking the stream: {}", e.report());
            abort.abort();
        }
        let finish_result = sink.finish();
        let result = walk_result.and(finish_result);

        match result {
            Ok(()) => {
                self.state = ProducerState::Finished;
                reporter.emit(ArchiveEvent::Done);
                info!(
                    "Stream complete: {} files, {} directories, {} symlinks, {} skipped, {} payload bytes",
                    summary.files,
                    summary.directories,
                    summary.symlinks,
                    summary.skipped,
                    summary.payload_bytes
                );
                Ok(summary)
            }
            Err(e) => {
                self.state = ProducerState::Failed;
                error!("Stream for {} failed: {}", start.display(), e.report());
                Err(e)
            }
        }
    }
}

/// Encodes one node and writes it, payload included, into the sink.
fn write_node(
    encoder: &EntryEncoder,
    sink: &mut CompressionSink<PipeWriter>,
    reporter: &mut Reporter,
    summary: &mut StreamSummary,
    chunk: &mut [u8],
    path: &Path,
    name: String,
) -> ArchiveResult<()> {
    let (entry, payload) = match encoder.encode(path, name)? {
        Encoded::Entry { entry, payload } => (entry, payload),
        Encoded::Skipped(reason) => {
            summary.skipped += 1;
            let path = path.to_path_buf();
            reporter.emit(match reason {
                SkipReason::OutsideRoot { target } => ArchiveEvent::SkippedOutsideRoot { path, target },
                SkipReason::MissingTarget { missing } => {
                    ArchiveEvent::SkippedMissingTarget { path, missing }
                }
                SkipReason::Special => ArchiveEvent::SkippedSpecial { path },
                SkipReason::Vanished => ArchiveEvent::SkippedVanished { path },
            });
            return Ok(());
        }
    };

    match entry.kind {
        EntryKind::Directory => {
            summary.directories += 1;
            reporter.emit(ArchiveEvent::EnteringDirectory {
                path: path.to_path_buf(),
            });
        }
        EntryKind::Symlink => {
            summary.symlinks += 1;
            reporter.emit(ArchiveEvent::AddingSymlink {
                path: path.to_path_buf(),
                target: entry.link_target.clone().unwrap_or_default(),
            });
        }
        EntryKind::File => {
            summary.files += 1;
            reporter.emit(ArchiveEvent::AddingFile {
                path: path.to_path_buf(),
            });
        }
    }

    sink.write_entry(&entry)?;
    if let Some(file) = payload {
        copy_payload(sink, file, entry.size, path, chunk)?;
        summary.payload_bytes += entry.size;
    }
    sink.close_entry()
}

/// Copies exactly `declared` bytes of `file` into the open entry. A file that
/// shrank since it was measured is padded with zeros; one that grew is cut at
/// the declared size.
fn copy_payload(
    sink: &mut CompressionSink<PipeWriter>,
    mut file: File,
    declared: u64,
    path: &Path,
    chunk: &mut [u8],
) -> ArchiveResult<()> {
    let mut remaining = declared;
    while remaining > 0 {
        let want = remaining.min(chunk.len() as u64) as usize;
        let read = match file.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ArchiveError::io(format!("reading {}", path.display()), e)),
        };
        sink.write_entry_payload(&chunk[..read])?;
        remaining -= read as u64;
    }

    if remaining > 0 {
        warn!(
            "{} shrank while being archived; padding {} missing bytes with zeros",
            path.display(),
            remaining
        );
        chunk.fill(0);
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            sink.write_entry_payload(&chunk[..n])?;
            remaining -= n as u64;
        }
    }
    debug!("Copied {} bytes from {}", declared, path.display());
    Ok(())
}

/// Creates a producer for `root` and prepares its channel in one call.
pub fn prepare_stream(
    root: impl AsRef<Path>,
    options: ArchiveOptions,
) -> ArchiveResult<(StreamProducer, PipeReader)> {
    let mut producer = StreamProducer::new(root, options);
    let reader = producer.prepare_channel()?;
    Ok((producer, reader))
}

/// Prepares `root` and streams it from a dedicated thread.
pub fn spawn(
    root: impl AsRef<Path>,
    options: ArchiveOptions,
) -> ArchiveResult<(PipeReader, JoinHandle<ArchiveResult<StreamSummary>>)> {
    let (producer, reader) = prepare_stream(root, options)?;
    let handle = spawn_prepared(producer)?;
    Ok((reader, handle))
}

/// Runs `start_streaming` of an already prepared producer on the dedicated
/// producer thread.
pub fn spawn_prepared(
    mut producer: StreamProducer,
) -> ArchiveResult<JoinHandle<ArchiveResult<StreamSummary>>> {
    producer.expect_state(ProducerState::Preparing)?;
    thread::Builder::new()
        .name(PRODUCER_THREAD_NAME.to_string())
        .spawn(move || producer.start_streaming())
        .map_err(|e| ArchiveError::io("spawning producer thread", e))
}

/// Waits for a spawned producer, turning a panic into an error.
pub fn join(handle: JoinHandle<ArchiveResult<StreamSummary>>) -> ArchiveResult<StreamSummary> {
    handle.join().map_err(|_| ArchiveError::ProducerPanicked)?
}
