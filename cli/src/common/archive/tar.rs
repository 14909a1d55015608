//! # dirstream TAR Container Writer (`common::archive::tar`)
//!
//! File: cli/src/common/archive/tar.rs
//!
//! ## Overview
//!
//! A streaming tar writer with an explicit entry lifecycle:
//! `put_entry` → `write_payload`* → `close_entry`, repeated, then `finish`.
//! Unlike `tar::Builder::append`, the payload is pushed in pieces by the caller,
//! so a file never has to be held in memory or re-opened by the writer.
//!
//! Header blocks are encoded with `tar::Header` (GNU layout). Two modes lift the
//! classic format limits and both default to the strict legacy behavior:
//!
//! - [`LongNameMode::Gnu`]: names or link targets over 100 bytes are preceded by a
//!   GNU `././@LongLink` record (`L` for names, `K` for link targets).
//! - [`BigNumberMode::Gnu`]: sizes and ids beyond the octal fields are stored in
//!   GNU base-256 form (which `tar::Header` produces on its own); in legacy mode
//!   they are rejected before a single byte is written.
//!
use crate::common::archive::entry::{ArchiveEntry, EntryKind};
use crate::core::error::{ArchiveError, ArchiveResult};
use std::io::Write;
use tar::{EntryType, Header, HeaderMode};

/// Size of one tar block.
pub const BLOCK_SIZE: u64 = 512;

/// Width of the name and linkname header fields.
const NAME_FIELD_LEN: usize = 100;

/// Largest value an 11-digit octal size field holds (8 GiB - 1).
const MAX_OCTAL_SIZE: u64 = 0o77_777_777_777;

/// Largest value a 7-digit octal uid/gid field holds.
const MAX_OCTAL_ID: u64 = 0o7_777_777;

const GNU_LONG_LINK_NAME: &[u8] = b"././@LongLink";

const ZERO_BLOCK: [u8; BLOCK_SIZE as usize] = [0; BLOCK_SIZE as usize];

/// Handling of names longer than the 100-byte header field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LongNameMode {
    /// Reject the entry with `ArchiveError::NameTooLong`.
    #[default]
    Error,
    /// Emit GNU long-name / long-link records.
    Gnu,
}

/// Handling of numbers that overflow the octal header fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BigNumberMode {
    /// Reject the entry with `ArchiveError::NumberTooLarge`.
    #[default]
    Error,
    /// Store the value in GNU base-256 form.
    Gnu,
}

#[derive(Debug)]
struct OpenEntry {
    path: String,
    declared: u64,
    written: u64,
}

/// Streaming tar writer over any `Write`.
#[derive(Debug)]
pub struct TarStreamWriter<W: Write> {
    inner: W,
    long_names: LongNameMode,
    big_numbers: BigNumberMode,
    open: Option<OpenEntry>,
    finished: bool,
}

impl<W: Write> TarStreamWriter<W> {
    /// # New Tar Writer (`new`)
    ///
    /// Wraps `inner` with no entry open. Long names and big numbers are
    /// rejected until the GNU encodings are switched on.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            long_names: LongNameMode::default(),
            big_numbers: BigNumberMode::default(),
            open: None,
            finished: false,
        }
    }

    /// Chooses between GNU `L`/`K` records and rejecting names over 100 bytes.
    pub fn set_long_name_mode(&mut self, mode: LongNameMode) {
        self.long_names = mode;
    }

    /// Chooses between base-256 fields and rejecting values the octal fields
    /// cannot hold.
    pub fn set_big_number_mode(&mut self, mode: BigNumberMode) {
        self.big_numbers = mode;
    }

    /// Direct access to the underlying writer, for flushing.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Gives back the underlying writer. Does not write the trailer.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// # Put Entry (`put_entry`)
    ///
    /// Writes the header record(s) for `entry` and opens it for payload.
    ///
    /// ## Arguments
    ///
    /// * `entry` - Name, kind, declared size and optional link target.
    ///
    /// ## Errors
    ///
    /// * `EntryStillOpen` if the previous entry was not closed.
    /// * `NameTooLong` / `NumberTooLarge` in the rejecting modes.
    /// * `Io` if the underlying writer fails.
    pub fn put_entry(&mut self, entry: &ArchiveEntry) -> ArchiveResult<()> {
        self.ensure_writable()?;
        if let Some(open) = &self.open {
            return Err(ArchiveError::EntryStillOpen(open.path.clone()));
        }

        let mut name = entry.path.clone();
        if entry.kind == EntryKind::Directory && !name.ends_with('/') {
            name.push('/');
        }
        let declared = match entry.kind {
            EntryKind::File => entry.size,
            EntryKind::Directory | EntryKind::Symlink => 0,
        };

        // Validate everything before the first byte goes out, so a rejected
        // entry leaves the stream untouched.
        self.check_number("size", declared)?;
        self.check_owner(entry)?;
        self.check_name(&name)?;
        let link_target = entry.link_target.as_deref().unwrap_or("");
        self.check_name(link_target)?;

        let mut header = Header::new_gnu();
        match &entry.metadata {
            Some(metadata) => header.set_metadata_in_mode(metadata, HeaderMode::Complete),
            None => {
                header.set_mode(default_mode(entry.kind));
                header.set_uid(0);
                header.set_gid(0);
                header.set_mtime(0);
            }
        }
        header.set_entry_type(match entry.kind {
            EntryKind::File => EntryType::Regular,
            EntryKind::Directory => EntryType::Directory,
            EntryKind::Symlink => EntryType::Symlink,
        });
        header.set_size(declared);

        if name.len() > NAME_FIELD_LEN {
            self.write_long_record(EntryType::GNULongName, name.as_bytes())?;
        }
        fill_field(&mut header.as_old_mut().name, name.as_bytes());

        if entry.kind == EntryKind::Symlink {
            if link_target.len() > NAME_FIELD_LEN {
                self.write_long_record(EntryType::GNULongLink, link_target.as_bytes())?;
            }
            fill_field(&mut header.as_old_mut().linkname, link_target.as_bytes());
        }

        header.set_cksum();
        self.write_raw(header.as_bytes())?;
        self.open = Some(OpenEntry {
            path: entry.path.clone(),
            declared,
            written: 0,
        });
        Ok(())
    }

    /// # Write Payload (`write_payload`)
    ///
    /// Appends payload bytes to the open entry.
    ///
    /// ## Errors
    ///
    /// * `NoOpenEntry` without a preceding `put_entry`.
    /// * `PayloadOverflow` if `data` would exceed the declared size; nothing
    ///   is written in that case.
    pub fn write_payload(&mut self, data: &[u8]) -> ArchiveResult<()> {
        let open = self.open.as_mut().ok_or(ArchiveError::NoOpenEntry)?;
        let attempted = open.written + data.len() as u64;
        if attempted > open.declared {
            return Err(ArchiveError::PayloadOverflow {
                path: open.path.clone(),
                declared: open.declared,
                attempted,
            });
        }
        open.written = attempted;
        self.write_raw(data)
    }

    /// # Close Entry (`close_entry`)
    ///
    /// Closes the open entry, padding its payload to a block boundary.
    ///
    /// ## Errors
    ///
    /// * `NoOpenEntry` if nothing is open.
    /// * `PayloadUnderflow` if fewer bytes than declared were written.
    pub fn close_entry(&mut self) -> ArchiveResult<()> {
        let open = self.open.take().ok_or(ArchiveError::NoOpenEntry)?;
        if open.written != open.declared {
            return Err(ArchiveError::PayloadUnderflow {
                path: open.path,
                declared: open.declared,
                written: open.written,
            });
        }
        self.pad(open.written)
    }

    /// Writes the end-of-archive trailer (two zero blocks). Idempotent.
    pub fn finish(&mut self) -> ArchiveResult<()> {
        if self.finished {
            return Ok(());
        }
        if let Some(open) = &self.open {
            return Err(ArchiveError::EntryStillOpen(open.path.clone()));
        }
        self.write_raw(&ZERO_BLOCK)?;
        self.write_raw(&ZERO_BLOCK)?;
        self.finished = true;
        Ok(())
    }

    fn ensure_writable(&self) -> ArchiveResult<()> {
        if self.finished {
            return Err(ArchiveError::InvalidState {
                expected: "open archive",
                actual: "finished archive",
            });
        }
        Ok(())
    }

    fn check_name(&self, name: &str) -> ArchiveResult<()> {
        if name.len() > NAME_FIELD_LEN && self.long_names == LongNameMode::Error {
            return Err(ArchiveError::NameTooLong(name.to_string()));
        }
        Ok(())
    }

    fn check_number(&self, field: &'static str, value: u64) -> ArchiveResult<()> {
        let limit = if field == "size" { MAX_OCTAL_SIZE } else { MAX_OCTAL_ID };
        if value > limit && self.big_numbers == BigNumberMode::Error {
            return Err(ArchiveError::NumberTooLarge { field, value });
        }
        Ok(())
    }

    #[cfg(unix)]
    fn check_owner(&self, entry: &ArchiveEntry) -> ArchiveResult<()> {
        use std::os::unix::fs::MetadataExt;
        if let Some(metadata) = &entry.metadata {
            self.check_number("uid", u64::from(metadata.uid()))?;
            self.check_number("gid", u64::from(metadata.gid()))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn check_owner(&self, _entry: &ArchiveEntry) -> ArchiveResult<()> {
        Ok(())
    }

    fn write_long_record(&mut self, kind: EntryType, value: &[u8]) -> ArchiveResult<()> {
        // The stored value is NUL terminated.
        let len = value.len() as u64 + 1;
        let mut header = Header::new_gnu();
        fill_field(&mut header.as_old_mut().name, GNU_LONG_LINK_NAME);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_size(len);
        header.set_entry_type(kind);
        header.set_cksum();
        self.write_raw(header.as_bytes())?;
        self.write_raw(value)?;
        self.write_raw(&[0])?;
        self.pad(len)
    }

    fn pad(&mut self, len: u64) -> ArchiveResult<()> {
        let remainder = len % BLOCK_SIZE;
        if remainder != 0 {
            let fill = (BLOCK_SIZE - remainder) as usize;
            self.write_raw(&ZERO_BLOCK[..fill])?;
        }
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> ArchiveResult<()> {
        self.inner
            .write_all(data)
            .map_err(|e| ArchiveError::io("writing tar stream", e))
    }
}

fn fill_field(field: &mut [u8], value: &[u8]) {
    field.fill(0);
    let n = value.len().min(field.len());
    field[..n].copy_from_slice(&value[..n]);
}

fn default_mode(kind: EntryKind) -> u32 {
    match kind {
        EntryKind::File => 0o644,
        EntryKind::Directory | EntryKind::Symlink => 0o755,
    }
}
