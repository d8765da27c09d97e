//! pagezip decodes ZIP and RAR archives held in memory,
//! the way comic book readers want them: every file, decoded in page order,
//! with a progress report after each step.
//!
//! ```no_run
//! # use std::fs;
//! let bytes = fs::read("chapter-1.cbz")?;
//! let progress = pagezip::decode_with(&bytes, &Default::default(), |progress| {
//!     eprintln!(
//!         "{:.0}% ({} of {} files)",
//!         progress.fraction_done() * 100.0,
//!         progress.entries.len(),
//!         progress.total_entries
//!     );
//! })
//! .map_err(|failure| failure.error)?;
//! for page in progress.valid_entries() {
//!     let bytes = page.data.as_deref().unwrap();
//!     println!("{}: {} bytes", page.path, bytes.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! For larger archives, memory map the file instead of reading it;
//! stored (uncompressed) files are handed back as slices of the input.
//!
//! ZIP archives are read front to back from their local file headers,
//! so archives without a central directory (or with a broken one) work fine.
//! Their files are sorted by the number nearest the end of their names,
//! so `img2.png` comes before `img10.png`.
//! Stored and DEFLATEd files are supported, using our own decompressor.
//!
//! RAR (1.5-4.x) archives are listed in archive order,
//! but only stored files can be extracted.
//!
//! A file that can't be decoded doesn't stop the others;
//! its [`Entry`] just carries the error instead of data.

pub mod bits;
pub mod entry;
pub mod huffman;
pub mod inflate;
pub mod progress;
pub mod rar;
pub mod read;
pub mod result;

pub use entry::{CompressionMethod, Entry};
pub use progress::{ArchiveFormat, Progress};
pub use result::{ArchiveError, ArchiveResult, DecodeFailure};

mod arch;
mod crc;
mod spec;

use log::*;

use crate::bits::BitReader;
use crate::progress::Reporter;

/// The outcome of a decode: the final progress snapshot,
/// or the error that ended it (along with that snapshot).
pub type DecodeResult<'a> = Result<Progress<'a>, DecodeFailure<'a>>;

/// Knobs for [`decode_with()`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Check each decoded file against the CRC-32 in the archive.
    ///
    /// Defaults to on if the `check-crc32` feature is enabled (as it is by default).
    pub verify_crc32: bool,

    /// Only accept ZIP entries whose "version needed to extract" is exactly
    /// 1.0 for stored files and 2.0 for DEFLATEd ones.
    ///
    /// If false, anything up to 2.0 is accepted for either.
    pub strict_versions: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            verify_crc32: cfg!(feature = "check-crc32"),
            strict_versions: true,
        }
    }
}

/// Decodes an archive with the default options and no progress reports.
pub fn decode(archive: &[u8]) -> DecodeResult<'_> {
    decode_with(archive, &DecodeOptions::default(), |_| {})
}

/// Decodes a ZIP or RAR archive, calling `on_progress` with a snapshot
/// after the header scan, after each DEFLATE block, after each file,
/// and once more when done. The last snapshot has `is_done` set,
/// and no snapshots follow it.
///
/// Inputs that start with a ZIP local file header are read as ZIP;
/// everything else is tried as RAR.
pub fn decode_with<'a, F: FnMut(&Progress<'a>)>(
    archive: &'a [u8],
    options: &DecodeOptions,
    on_progress: F,
) -> DecodeResult<'a> {
    let mut reporter = Reporter::new(on_progress);

    let result = if spec::next_is(&BitReader::new(archive), spec::LOCAL_FILE_HEADER_MAGIC) {
        debug!("Found ZIP signature");
        read::decode_zip(archive, options, &mut reporter)
    } else {
        rar::decode_rar(archive, options, &mut reporter)
    };

    match result {
        Ok(()) => {
            let progress = reporter.progress();
            info!(
                "Decoded {} of {} files ({} bytes)",
                progress.valid_entries().count(),
                progress.total_entries,
                progress.bytes_decoded
            );
            Ok(reporter.finish())
        }
        Err(e) => {
            error!("Couldn't read archive: {}", e);
            Err(reporter.fail(e))
        }
    }
}
