//! # dirstream Progress Observers (`common::archive::observer`)
//!
//! File: cli/src/common/archive/observer.rs
//!
//! ## Overview
//!
//! Progress reporting is decoupled from the producer: every decision the
//! producer makes (add, enter, skip, done) becomes an [`ArchiveEvent`] handed to
//! an [`ArchiveObserver`]. The `Display` form of each event is the familiar
//! progress line (`adding file:<path>`, ...), so the console observers only
//! print events and tests can assert on structured values instead.
//!
//! Every event is also logged through `tracing` by the producer, whether or not
//! an observer is installed.
//!
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One observable step of an archive operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEvent {
    AddingFile { path: PathBuf },
    AddingSymlink { path: PathBuf, target: String },
    EnteringDirectory { path: PathBuf },
    SkippedOutsideRoot { path: PathBuf, target: PathBuf },
    SkippedMissingTarget { path: PathBuf, missing: PathBuf },
    SkippedUnreadable { path: PathBuf, reason: String },
    SkippedSpecial { path: PathBuf },
    SkippedVanished { path: PathBuf },
    Done,
}

impl ArchiveEvent {
    /// True for every event that means a node was left out.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ArchiveEvent::SkippedOutsideRoot { .. }
                | ArchiveEvent::SkippedMissingTarget { .. }
                | ArchiveEvent::SkippedUnreadable { .. }
                | ArchiveEvent::SkippedSpecial { .. }
                | ArchiveEvent::SkippedVanished { .. }
        )
    }

    /// Logs the event at a level matching its severity.
    pub(crate) fn trace(&self) {
        match self {
            ArchiveEvent::Done => info!("{}", self),
            event if event.is_skip() => warn!("{}", event),
            event => debug!("{}", event),
        }
    }
}

impl fmt::Display for ArchiveEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveEvent::AddingFile { path } => write!(f, "adding file:{}", path.display()),
            ArchiveEvent::AddingSymlink { path, target } => {
                write!(f, "adding symlink:{} -> {}", path.display(), target)
            }
            ArchiveEvent::EnteringDirectory { path } => {
                write!(f, "entering directory:{}", path.display())
            }
            ArchiveEvent::SkippedOutsideRoot { path, target } => write!(
                f,
                "skipping symlink whose target is outside the archive:{} -> {}",
                path.display(),
                target.display()
            ),
            ArchiveEvent::SkippedMissingTarget { path, missing } => write!(
                f,
                "skipping symlink whose target is missing:{} -> {}",
                path.display(),
                missing.display()
            ),
            ArchiveEvent::SkippedUnreadable { path, reason } => {
                write!(f, "skipping unreadable directory:{} ({})", path.display(), reason)
            }
            ArchiveEvent::SkippedSpecial { path } => {
                write!(f, "skipping special file:{}", path.display())
            }
            ArchiveEvent::SkippedVanished { path } => {
                write!(f, "skipping vanished entry:{}", path.display())
            }
            ArchiveEvent::Done => write!(f, "tar.gz stream done"),
        }
    }
}

/// Receives events from the producer thread.
pub trait ArchiveObserver: Send {
    fn on_event(&mut self, event: &ArchiveEvent);
}

impl<F> ArchiveObserver for F
where
    F: FnMut(&ArchiveEvent) + Send,
{
    fn on_event(&mut self, event: &ArchiveEvent) {
        (self)(event)
    }
}

/// Prints one line per event to a writer (stdout by default).
pub struct LineObserver<W: Write + Send> {
    out: W,
}

impl LineObserver<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl LineObserver<io::Stderr> {
    /// Used when stdout carries the archive bytes.
    pub fn stderr() -> Self {
        Self { out: io::stderr() }
    }
}

impl<W: Write + Send> LineObserver<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> ArchiveObserver for LineObserver<W> {
    fn on_event(&mut self, event: &ArchiveEvent) {
        // Progress output is best effort; a closed terminal must not fail the archive.
        let _ = writeln!(self.out, "{}", event);
    }
}

/// The observer a verbose producer installs when the caller gave none.
pub type StdoutObserver = LineObserver<io::Stdout>;

/// Collects events in memory. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ArchiveEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<ArchiveEvent> {
        self.events.lock().clone()
    }

    /// The events rendered as progress lines.
    pub fn lines(&self) -> Vec<String> {
        self.events.lock().iter().map(ToString::to_string).collect()
    }
}

impl ArchiveObserver for EventLog {
    fn on_event(&mut self, event: &ArchiveEvent) {
        self.events.lock().push(event.clone());
    }
}
