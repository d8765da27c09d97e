//! ZIP record layouts, as described by PKWARE's [`APPNOTE.TXT`].
//!
//! Sorting, version checks, and decompression live in [`read`].
//!
//! Unlike most ZIP readers, we walk the archive front to back:
//! local file headers and their data first, then whatever records trail them.
//! The central directory is only skipped over.
//!
//! [`read`]: ../read/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use log::*;

use crate::arch::usize;
use crate::bits::BitReader;
use crate::entry::{decode_name, parse_msdos, CompressionMethod, Entry};
use crate::result::*;

// Record signatures, read as little-endian u32s ("PK\x03\x04" and friends)

pub const LOCAL_FILE_HEADER_MAGIC: u32 = 0x04034b50;
/// Optional; see [`DataDescriptor::parse`]
pub const DATA_DESCRIPTOR_MAGIC: u32 = 0x08074b50;
pub const ARCHIVE_EXTRA_DATA_MAGIC: u32 = 0x08064b50;
pub const CENTRAL_DIRECTORY_MAGIC: u32 = 0x02014b50;
pub const DIGITAL_SIGNATURE_MAGIC: u32 = 0x05054b50;
pub const EOCDR_MAGIC: u32 = 0x06054b50;

impl CompressionMethod {
    pub(crate) fn from_u16(method: u16) -> Self {
        match method {
            0 => Self::None,
            8 => Self::Deflate,
            other => Self::Unsupported(other),
        }
    }
}

/// Returns true if the next four bytes are the given signature.
pub fn next_is(reader: &BitReader, magic: u32) -> bool {
    reader.peek_u32().ok() == Some(magic)
}

/// The fixed part of a local file header, plus its name
///
/// Every file's data is preceded by one of these.
/// Since we read front to back, they're the only metadata we use.
#[derive(Debug)]
pub struct LocalFileHeader<'a> {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc32: u32,
    pub packed_size: u32,
    pub unpacked_size: u32,
    pub name: &'a [u8],
}

impl<'a> LocalFileHeader<'a> {
    /// Reads the header (APPNOTE 4.3.7) and skips its extra field,
    /// leaving `reader` at the file data.
    pub fn parse(reader: &mut BitReader<'a>) -> ArchiveResult<Self> {
        if reader.read_u32()? != LOCAL_FILE_HEADER_MAGIC {
            return Err(ArchiveError::Format("Invalid local file header"));
        }
        let version_needed = reader.read_u16()?;
        let flags = reader.read_u16()?;
        let method = reader.read_u16()?;
        let dos_time = reader.read_u16()?;
        let dos_date = reader.read_u16()?;
        let crc32 = reader.read_u32()?;
        let packed_size = reader.read_u32()?;
        let unpacked_size = reader.read_u32()?;
        let name_length = usize(reader.read_u16()?)?;
        let extra_length = usize(reader.read_u16()?)?;
        let name = reader.read_bytes(name_length)?;
        reader.skip(extra_length)?;

        Ok(Self {
            version_needed,
            flags,
            method,
            dos_time,
            dos_date,
            crc32,
            packed_size,
            unpacked_size,
            name,
        })
    }
}

/// CRC and sizes written after the file data
///
/// Streaming writers don't know a file's CRC or sizes until they've written it,
/// so they zero them in the local header and put them here instead.
#[derive(Debug, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub packed_size: u32,
    pub unpacked_size: u32,
}

impl DataDescriptor {
    pub fn parse(reader: &mut BitReader) -> ArchiveResult<Self> {
        // The signature was never required (APPNOTE 4.3.9.3),
        // so writers differ on whether it's there.
        if next_is(reader, DATA_DESCRIPTOR_MAGIC) {
            reader.skip(4)?;
        }
        Ok(Self {
            crc32: reader.read_u32()?,
            packed_size: reader.read_u32()?,
            unpacked_size: reader.read_u32()?,
        })
    }
}

/// Skips the archive extra data record, which precedes the central directory
/// of archives with an encrypted central directory.
pub fn skip_archive_extra_data(reader: &mut BitReader) -> ArchiveResult<()> {
    reader.skip(4)?;
    let length = usize(reader.read_u32()?)?;
    trace!("Skipping {} bytes of archive extra data", length);
    reader.skip(length)
}

/// Skips one central directory entry (APPNOTE 4.3.12), returning its name.
///
/// Everything in it was already in the local headers.
pub fn skip_central_directory_entry<'a>(reader: &mut BitReader<'a>) -> ArchiveResult<&'a [u8]> {
    if reader.read_u32()? != CENTRAL_DIRECTORY_MAGIC {
        return Err(ArchiveError::Format("Invalid central directory entry"));
    }
    // Versions, flags, method, DOS time and date, CRC, and both sizes
    reader.skip(2 + 2 + 2 + 2 + 4 + 4 + 4 + 4)?;
    let name_length = usize(reader.read_u16()?)?;
    let extra_length = usize(reader.read_u16()?)?;
    let comment_length = usize(reader.read_u16()?)?;
    // Disk number, attributes, and local header offset
    reader.skip(2 + 2 + 4 + 4)?;
    let name = reader.read_bytes(name_length)?;
    reader.skip(extra_length + comment_length)?;
    Ok(name)
}

/// Skips the digital signature that can end the central directory.
pub fn skip_digital_signature(reader: &mut BitReader) -> ArchiveResult<()> {
    reader.skip(4)?;
    let length = usize(reader.read_u16()?)?;
    trace!("Skipping {}-byte digital signature", length);
    reader.skip(length)
}

/// The end of central directory record (APPNOTE 4.3.16)
///
/// Readers that start from the back use it to find the central directory.
/// We only read it to get past it, and to sanity check our entry count.
#[derive(Debug)]
pub struct EndOfCentralDirectory<'a> {
    pub entries: u16,
    pub comment: &'a [u8],
}

impl<'a> EndOfCentralDirectory<'a> {
    pub fn parse(reader: &mut BitReader<'a>) -> ArchiveResult<Self> {
        if reader.read_u32()? != EOCDR_MAGIC {
            return Err(ArchiveError::Format(
                "Invalid end of central directory record",
            ));
        }
        reader.skip(2 + 2 + 2)?; // Disk numbers and this disk's entry count
        let entries = reader.read_u16()?;
        reader.skip(4 + 4)?; // Central directory size and offset
        let comment_length = usize(reader.read_u16()?)?;

        Ok(Self {
            entries,
            comment: reader.read_bytes(comment_length)?,
        })
    }
}

// General purpose flag bits (APPNOTE 4.4.4)

const ENCRYPTED_FLAG: u16 = 1;
const DATA_DESCRIPTOR_FLAG: u16 = 1 << 3;
const UTF8_FLAG: u16 = 1 << 11;

/// Names and comments are UTF-8 instead of CP437.
fn is_utf8(flags: u16) -> bool {
    flags & UTF8_FLAG != 0
}

fn is_encrypted(flags: u16) -> bool {
    flags & ENCRYPTED_FLAG != 0
}

/// The CRC and sizes follow the data instead of sitting in the local header.
pub fn has_data_descriptor(flags: u16) -> bool {
    flags & DATA_DESCRIPTOR_FLAG != 0
}

impl<'a> Entry<'a> {
    /// Builds an (undecoded) entry from a local file header,
    /// the file data following it, and its data descriptor, if it has one.
    pub(crate) fn from_local_header(
        local: &LocalFileHeader<'a>,
        compressed: &'a [u8],
        descriptor: Option<&DataDescriptor>,
    ) -> ArchiveResult<Self> {
        let (crc32, packed_size, unpacked_size) = match descriptor {
            Some(d) => (d.crc32, d.packed_size, d.unpacked_size),
            None => (local.crc32, local.packed_size, local.unpacked_size),
        };

        Ok(Self {
            path: decode_name(local.name, is_utf8(local.flags))?,
            size: usize(unpacked_size)?,
            compressed_size: usize(packed_size)?,
            compression_method: CompressionMethod::from_u16(local.method),
            version: local.version_needed,
            crc32,
            encrypted: is_encrypted(local.flags),
            last_modified: parse_msdos(local.dos_time, local.dos_date),
            compressed,
            data: None,
            error: None,
        })
    }
}

/// Reads one local file header, its data, and its data descriptor.
pub fn read_local_file<'a>(reader: &mut BitReader<'a>) -> ArchiveResult<Entry<'a>> {
    let local = LocalFileHeader::parse(reader)?;
    let compressed = reader.read_bytes(usize(local.packed_size)?)?;
    let descriptor = if has_data_descriptor(local.flags) {
        Some(DataDescriptor::parse(reader)?)
    } else {
        None
    };
    let entry = Entry::from_local_header(&local, compressed, descriptor.as_ref())?;
    trace!(
        "{}: version {}, {:?}, {} -> {} bytes{}",
        entry.path,
        entry.version,
        entry.compression_method,
        entry.compressed_size,
        entry.size,
        if descriptor.is_some() {
            " (from data descriptor)"
        } else {
            ""
        }
    );
    Ok(entry)
}
