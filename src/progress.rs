//! Progress snapshots, handed to the caller as decoding proceeds

use camino::{Utf8Path, Utf8PathBuf};

use crate::entry::Entry;
use crate::result::*;

/// The kind of archive being decoded
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Rar,
}

/// Everything known about a decode so far.
///
/// The same structure is handed to the progress callback after each step
/// and returned when decoding ends.
/// Entries are only ever appended, in the order they were decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress<'a> {
    /// `None` until the archive signature has been recognized.
    pub format: Option<ArchiveFormat>,

    /// Entries the header scan found (and will try to decode)
    pub total_entries: usize,

    /// Sum of the declared uncompressed sizes of those entries
    pub total_bytes: u64,

    /// Bytes produced so far, across all entries
    pub bytes_decoded: u64,

    /// The entry being decoded, if any
    pub current_entry: Option<Utf8PathBuf>,

    /// Bytes produced so far for the current entry
    pub current_entry_bytes: u64,

    /// False if the archive couldn't be read at all.
    pub is_valid: bool,

    /// True only in the final snapshot.
    pub is_done: bool,

    /// Entries that finished decoding, successfully or not
    pub entries: Vec<Entry<'a>>,
}

impl<'a> Progress<'a> {
    /// Entries that decoded successfully
    pub fn valid_entries(&self) -> impl Iterator<Item = &Entry<'a>> {
        self.entries.iter().filter(|e| e.is_valid())
    }

    /// Fraction of the declared bytes decoded so far, from 0 to 1.
    pub fn fraction_done(&self) -> f64 {
        if self.total_bytes == 0 {
            if self.is_done {
                1.0
            } else {
                0.0
            }
        } else {
            (self.bytes_decoded as f64 / self.total_bytes as f64).min(1.0)
        }
    }

    /// Detaches the snapshot (and its entries) from the archive buffer.
    pub fn into_owned(self) -> Progress<'static> {
        Progress {
            entries: self.entries.into_iter().map(Entry::into_owned).collect(),
            ..self
        }
    }
}

/// Owns the running [`Progress`] of one decode and passes snapshots
/// to the caller's callback.
///
/// Once [`finish()`](Reporter::finish) or [`fail()`](Reporter::fail)
/// is called, the reporter is consumed, so nothing can be emitted
/// after the final snapshot.
pub(crate) struct Reporter<'a, F> {
    progress: Progress<'a>,
    on_progress: F,
}

impl<'a, F: FnMut(&Progress<'a>)> Reporter<'a, F> {
    pub fn new(on_progress: F) -> Self {
        Self {
            progress: Progress::default(),
            on_progress,
        }
    }

    pub fn progress(&self) -> &Progress<'a> {
        &self.progress
    }

    /// Hands the caller a snapshot.
    pub fn emit(&mut self) {
        (self.on_progress)(&self.progress);
    }

    /// Records the totals from the header scan and emits the first snapshot.
    pub fn scanned(&mut self, format: ArchiveFormat, entries: usize, bytes: u64) {
        self.progress.format = Some(format);
        self.progress.total_entries = entries;
        self.progress.total_bytes = bytes;
        self.progress.is_valid = true;
        self.emit();
    }

    pub fn begin_entry(&mut self, path: &Utf8Path) {
        self.progress.current_entry = Some(path.to_owned());
        self.progress.current_entry_bytes = 0;
    }

    /// Counts bytes produced for the current entry, without emitting.
    pub fn add_bytes(&mut self, count: usize) {
        self.progress.current_entry_bytes += count as u64;
        self.progress.bytes_decoded += count as u64;
    }

    /// Counts a decompressed block and emits.
    pub fn block_decoded(&mut self, count: usize) {
        self.add_bytes(count);
        self.emit();
    }

    /// Adds a decoded (or failed) entry and emits.
    pub fn finish_entry(&mut self, entry: Entry<'a>) {
        self.progress.current_entry = None;
        self.progress.current_entry_bytes = 0;
        self.progress.entries.push(entry);
        self.emit();
    }

    /// Emits the final snapshot and returns it.
    pub fn finish(mut self) -> Progress<'a> {
        self.progress.current_entry = None;
        self.progress.is_done = true;
        self.emit();
        self.progress
    }

    /// Emits a final, invalid snapshot and pairs it with the error that ended the decode.
    pub fn fail(mut self, error: ArchiveError) -> DecodeFailure<'a> {
        self.progress.is_valid = false;
        self.progress.is_done = true;
        self.emit();
        DecodeFailure {
            error,
            progress: self.progress,
        }
    }
}
