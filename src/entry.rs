//! Files found in an archive, and what became of them

use std::borrow::Cow;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::*;

use crate::result::*;

/// How a file's bytes are packed in the archive
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stored as-is, in either format
    None,
    /// ZIP method 8, [DEFLATE](https://www.rfc-editor.org/rfc/rfc1951)
    Deflate,
    /// The file is packed with one of RAR's own methods.
    /// (The u8 is RAR's method byte, `0x31` through `0x35`.)
    Rar(u8),
    /// Any other ZIP method, by its number (12 is bzip2, 14 is LZMA, ...)
    Unsupported(u16),
}

/// A file in the archive, along with its decoded contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<'a> {
    /// The file's name in the archive, directories and all
    pub path: Cow<'a, Utf8Path>,

    /// Uncompressed size of the file in bytes, as declared by the archive
    pub size: usize,

    /// Size of the file's bytes in the archive
    pub compressed_size: usize,

    pub compression_method: CompressionMethod,

    /// The format version needed to extract the file.
    /// For ZIP this is "version needed to extract" (20 means 2.0);
    /// for RAR it's the unpack version (29 means 2.9).
    pub version: u16,

    /// CRC-32 of the decoded contents, as declared by the archive
    pub crc32: u32,

    /// Encrypted files are never decoded.
    pub encrypted: bool,

    /// The date and time the file was last modified, if it made sense
    pub last_modified: Option<NaiveDateTime>,

    /// The file's raw bytes in the archive
    pub(crate) compressed: &'a [u8],

    /// The decoded contents.
    /// `None` until the file is decoded, and if decoding failed.
    pub data: Option<Cow<'a, [u8]>>,

    /// Why decoding failed, if it did
    pub error: Option<ArchiveError>,
}

impl<'a> Entry<'a> {
    /// Returns true if the entry was decoded successfully.
    pub fn is_valid(&self) -> bool {
        self.data.is_some() && self.error.is_none()
    }

    /// The entry's raw (compressed) bytes, as stored in the archive
    pub fn compressed_data(&self) -> &'a [u8] {
        self.compressed
    }

    /// Records the outcome of decoding this entry.
    pub(crate) fn finish(&mut self, outcome: ArchiveResult<Cow<'a, [u8]>>) {
        match outcome {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
            }
            Err(e) => {
                self.data = None;
                self.error = Some(e);
            }
        }
    }

    /// Returns true if the entry's path stays inside whatever directory
    /// it's extracted to: no `..`, no root, and no drive prefix.
    ///
    /// Archives can name files anything, so check this before writing them out.
    pub fn is_contained(&self) -> bool {
        self.path
            .components()
            .all(|c| matches!(c, Utf8Component::Normal(_)))
    }

    /// Detaches the entry from the archive buffer.
    ///
    /// The compressed bytes aren't carried over; the decoded ones are.
    pub fn into_owned(self) -> Entry<'static> {
        Entry {
            path: Cow::Owned(self.path.into_owned()),
            compressed: &[],
            data: self.data.map(|d| Cow::Owned(d.into_owned())),
            ..self
        }
    }
}

/// Decodes a file name from an archive header.
///
/// Names are UTF-8 if the archive says so, and assumed to be CP437 otherwise.
pub(crate) fn decode_name(name: &[u8], is_utf8: bool) -> ArchiveResult<Cow<Utf8Path>> {
    if is_utf8 {
        let utf8 = std::str::from_utf8(name).map_err(ArchiveError::Encoding)?;
        Ok(Cow::Borrowed(Utf8Path::new(utf8)))
    } else {
        let str_cow: Cow<str> = Cow::borrow_from_cp437(name, &CP437_CONTROL);
        // Annoying: doesn't seem to be any Cow<str> -> Cow<Utf8Path>
        Ok(match str_cow {
            Cow::Borrowed(s) => Cow::Borrowed(Utf8Path::new(s)),
            Cow::Owned(s) => Cow::Owned(Utf8PathBuf::from(s)),
        })
    }
}

/// Converts an MS-DOS time and date, used by both ZIP and RAR.
///
/// Returns `None` for nonsense like month 0, which zeroed-out headers have.
pub(crate) fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let field = |word: u16, shift: u32, bits: u32| ((word >> shift) & ((1 << bits) - 1)) as u32;

    // Years count from 1980, and seconds are stored halved.
    let year = field(date, 9, 7) as i32 + 1980;
    let day = NaiveDate::from_ymd_opt(year, field(date, 5, 4), field(date, 0, 5))?;
    day.and_hms_opt(field(time, 11, 5), field(time, 5, 6), field(time, 0, 5) * 2)
}
