//! # dirstream In-Process Pipe (`common::pipe`)
//!
//! File: cli/src/common/pipe.rs
//!
//! ## Overview
//!
//! A single-producer, single-consumer, bounded byte channel. The producer thread
//! owns the [`PipeWriter`], the consumer (an upload client, a file copier) owns the
//! [`PipeReader`]. The two halves synchronize only through this buffer:
//!
//! - `write` blocks while the buffer is full and accepts as many bytes as fit
//!   (`write_all` loops until everything is queued).
//! - `read` blocks while the buffer is empty and the writer is still open.
//! - `PipeWriter::close` is terminal: the reader drains what is left and then sees
//!   end-of-stream (`Ok(0)`); further writes fail with `BrokenPipe`.
//! - Dropping the writer without closing it leaves the channel *abandoned*: the
//!   reader drains what is left and then gets `UnexpectedEof`, so a truncated
//!   stream is never mistaken for a complete one.
//! - Dropping the reader makes every pending and future write fail with
//!   `BrokenPipe`, since nothing can drain the buffer anymore.
//!
//! There is no timeout. A consumer that stops reading without dropping its
//! reader blocks the writer forever.
//!
use crate::core::error::{ArchiveError, ArchiveResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Closed,
    Abandoned,
}

#[derive(Debug)]
struct State {
    buf: VecDeque<u8>,
    writer: WriterState,
    reader_alive: bool,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    state: Mutex<State>,
    /// Signalled when bytes arrive or the writer goes away.
    readable: Condvar,
    /// Signalled when bytes are drained or the reader goes away.
    writable: Condvar,
}

/// # Create Pipe (`channel`)
///
/// Creates a connected pipe holding at most `capacity` unread bytes.
///
/// ## Returns
///
/// * The write half for the producer and the read half for the consumer.
///
/// ## Errors
///
/// * `Config` if `capacity` is zero, since no write could ever complete.
pub fn channel(capacity: usize) -> ArchiveResult<(PipeWriter, PipeReader)> {
    if capacity == 0 {
        return Err(ArchiveError::Config(
            "pipe capacity must be greater than zero".to_string(),
        ));
    }
    let shared = Arc::new(Shared {
        capacity,
        state: Mutex::new(State {
            buf: VecDeque::with_capacity(capacity),
            writer: WriterState::Open,
            reader_alive: true,
        }),
        readable: Condvar::new(),
        writable: Condvar::new(),
    });
    Ok((
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    ))
}

/// Write end of the pipe.
#[derive(Debug)]
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Closes the write end. The reader sees end-of-stream once it has drained
    /// the remaining bytes. Closing twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        let mut st = self.shared.state.lock();
        if st.writer == WriterState::Open {
            st.writer = WriterState::Closed;
            self.shared.readable.notify_all();
        }
        Ok(())
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().writer != WriterState::Open
    }

    /// Maximum number of unread bytes the pipe holds.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of bytes written but not yet read.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().buf.len()
    }

    /// A handle that can break the stream while this writer is owned by
    /// another layer.
    pub fn abort_handle(&self) -> PipeAbort {
        PipeAbort {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Breaks the stream from outside the writer.
#[derive(Debug, Clone)]
pub struct PipeAbort {
    shared: Arc<Shared>,
}

impl PipeAbort {
    /// Marks the stream as abandoned: the reader drains what is queued, then
    /// gets `UnexpectedEof`, and further writes fail. No effect once the writer
    /// has been closed.
    pub fn abort(&self) {
        let mut st = self.shared.state.lock();
        if st.writer == WriterState::Open {
            st.writer = WriterState::Abandoned;
            self.shared.readable.notify_all();
            self.shared.writable.notify_all();
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut st = self.shared.state.lock();
        loop {
            if st.writer != WriterState::Open {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "write to a closed pipe",
                ));
            }
            if !st.reader_alive {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "pipe read end dropped",
                ));
            }
            let free = self.shared.capacity - st.buf.len();
            if free > 0 {
                let n = free.min(data.len());
                st.buf.extend(&data[..n]);
                self.shared.readable.notify_one();
                return Ok(n);
            }
            self.shared.writable.wait(&mut st);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        // Bytes are visible to the reader as soon as `write` returns.
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock();
        if st.writer == WriterState::Open {
            st.writer = WriterState::Abandoned;
        }
        self.shared.readable.notify_all();
    }
}

/// Read end of the pipe.
#[derive(Debug)]
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Number of bytes written but not yet read.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().buf.len()
    }
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut st = self.shared.state.lock();
        loop {
            if !st.buf.is_empty() {
                let n = out.len().min(st.buf.len());
                // The ring buffer may wrap, so copy its two halves in turn.
                let (front, back) = st.buf.as_slices();
                let head = n.min(front.len());
                out[..head].copy_from_slice(&front[..head]);
                out[head..n].copy_from_slice(&back[..n - head]);
                st.buf.drain(..n);
                self.shared.writable.notify_one();
                return Ok(n);
            }
            match st.writer {
                WriterState::Closed => return Ok(0),
                WriterState::Abandoned => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "pipe writer dropped before closing the stream",
                    ))
                }
                WriterState::Open => self.shared.readable.wait(&mut st),
            }
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock();
        st.reader_alive = false;
        self.shared.writable.notify_all();
    }
}
