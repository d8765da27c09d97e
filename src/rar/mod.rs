//! Reading RAR 1.5-4.x archives.
//!
//! We can walk the headers of any such archive,
//! but only extract files that are stored without compression.
//! RAR's own compression methods are reported as unsupported,
//! file by file, so the rest of the archive still comes through.

pub mod header;

use std::borrow::Cow;

use log::*;

use crate::arch::usize;
use crate::bits::BitReader;
use crate::crc;
use crate::entry::{CompressionMethod, Entry};
use crate::progress::{ArchiveFormat, Progress, Reporter};
use crate::result::*;
use crate::DecodeOptions;

use header::{FileHeader, VolumeHeader};

/// The method byte of files stored without compression
pub const STORE_METHOD: u8 = 0x30;

/// The decompression algorithm a file needs, from its unpack version
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnpackVersion {
    /// RAR 1.5 and earlier
    V15,
    /// RAR 2.0 and 2.6
    V20,
    /// RAR 2.9 through 3.6
    V29,
    Unknown(u8),
}

impl From<u8> for UnpackVersion {
    fn from(version: u8) -> Self {
        match version {
            0..=15 => UnpackVersion::V15,
            20 | 26 => UnpackVersion::V20,
            29 | 36 => UnpackVersion::V29,
            v => UnpackVersion::Unknown(v),
        }
    }
}

impl CompressionMethod {
    pub(crate) fn from_rar(method: u8) -> Self {
        match method {
            STORE_METHOD => CompressionMethod::None,
            m => CompressionMethod::Rar(m),
        }
    }
}

impl<'a> Entry<'a> {
    fn from_rar_header(header: &FileHeader<'a>, compressed: &'a [u8]) -> ArchiveResult<Self> {
        Ok(Self {
            path: header.name.clone(),
            size: usize(header.unpacked_size)?,
            compressed_size: usize(header.pack_size)?,
            compression_method: CompressionMethod::from_rar(header.method),
            version: header.unpack_version as u16,
            crc32: header.file_crc,
            encrypted: header.flags.password,
            last_modified: header.last_modified(),
            compressed,
            data: None,
            error: None,
        })
    }
}

/// A file header and the data following it
struct RarFile<'a> {
    header: FileHeader<'a>,
    entry: Entry<'a>,
}

/// Reads the marker and main headers, then every file header after them,
/// returning the files with data.
///
/// The scan stops at the first header that isn't a file header,
/// or that can't be read.
fn scan(archive: &[u8]) -> ArchiveResult<Vec<RarFile>> {
    let mut reader = BitReader::new(archive);

    match VolumeHeader::parse(&mut reader) {
        Ok(VolumeHeader::Marker(marker)) if marker.is_valid() => {}
        _ => return Err(ArchiveError::Format("Unknown archive signature")),
    }
    trace!("Found RAR signature");

    match VolumeHeader::parse(&mut reader) {
        Ok(VolumeHeader::Main(main)) => debug!("{:?}", main),
        Ok(other) => {
            debug!("{:?}", other);
            return Err(ArchiveError::Format("RAR archive has no main header"));
        }
        Err(e) => {
            debug!("Couldn't read main header: {}", e);
            return Err(ArchiveError::Format("RAR archive has no main header"));
        }
    }

    let mut files = Vec::new();
    while !reader.is_empty() {
        let header = match VolumeHeader::parse(&mut reader) {
            Ok(VolumeHeader::File(f)) => f,
            Ok(other) => {
                debug!("Header scan stopped at {:?}", other);
                break;
            }
            Err(e) => {
                warn!("Couldn't read RAR header: {}", e);
                break;
            }
        };
        let compressed = reader.read_bytes(usize(header.pack_size)?)?;
        if header.pack_size == 0 {
            debug!("Skipping empty entry {}", header.name);
            continue;
        }
        trace!("{:?}", header);
        let entry = Entry::from_rar_header(&header, compressed)?;
        files.push(RarFile { header, entry });
    }
    debug!("Found {} files", files.len());
    Ok(files)
}

/// Decodes a whole RAR archive, reporting to `reporter` as it goes.
///
/// A missing signature or main header is returned as an error;
/// problems with individual files are recorded in their entries.
pub(crate) fn decode_rar<'a, F: FnMut(&Progress<'a>)>(
    archive: &'a [u8],
    options: &DecodeOptions,
    reporter: &mut Reporter<'a, F>,
) -> ArchiveResult<()> {
    let files = scan(archive)?;
    // Declared sizes are 64 bits and unchecked, so they can add up past u64::MAX.
    let total_bytes = files
        .iter()
        .fold(0u64, |total, f| total.saturating_add(f.header.unpacked_size));
    reporter.scanned(ArchiveFormat::Rar, files.len(), total_bytes);

    for RarFile { header, mut entry } in files {
        reporter.begin_entry(&entry.path);
        let outcome = extract(&header, entry.compressed_data(), options, reporter);
        match &outcome {
            Ok(data) => debug!("Decoded {} ({} bytes)", entry.path, data.len()),
            Err(e) => warn!("Couldn't decode {}: {}", entry.path, e),
        }
        entry.finish(outcome);
        reporter.finish_entry(entry);
    }
    Ok(())
}

fn extract<'a, F: FnMut(&Progress<'a>)>(
    header: &FileHeader,
    compressed: &'a [u8],
    options: &DecodeOptions,
    reporter: &mut Reporter<'a, F>,
) -> ArchiveResult<Cow<'a, [u8]>> {
    if header.flags.split_before {
        return Err(ArchiveError::UnsupportedCompression(String::from(
            "File continues from a previous volume",
        )));
    }
    if header.flags.password {
        return Err(ArchiveError::UnsupportedCompression(String::from(
            "Can't decrypt encrypted files",
        )));
    }

    let data = if header.method == STORE_METHOD {
        reporter.add_bytes(compressed.len());
        Cow::Borrowed(compressed)
    } else {
        unpack(header, compressed)?
    };

    if options.verify_crc32 {
        crc::verify(&data, header.file_crc)?;
    }
    Ok(data)
}

/// Picks the decompressor for the file's unpack version.
fn unpack<'a>(header: &FileHeader, compressed: &'a [u8]) -> ArchiveResult<Cow<'a, [u8]>> {
    match UnpackVersion::from(header.unpack_version) {
        UnpackVersion::V15 => unpack15(header, compressed),
        UnpackVersion::V20 => unpack20(header, compressed),
        UnpackVersion::V29 => unpack29(header, compressed),
        UnpackVersion::Unknown(v) => Err(ArchiveError::UnsupportedCompression(format!(
            "Unknown RAR unpack version {}",
            v
        ))),
    }
}

fn unsupported(algorithm: &str, header: &FileHeader) -> ArchiveError {
    ArchiveError::UnsupportedCompression(format!(
        "{} (method {:#04x})",
        algorithm, header.method
    ))
}

// The LZ and PPMd decoders for these aren't implemented.
// Their entries are reported as unsupported, and none of the data is read.

fn unpack15<'a>(header: &FileHeader, _compressed: &'a [u8]) -> ArchiveResult<Cow<'a, [u8]>> {
    Err(unsupported("RAR 1.5 compression", header))
}

fn unpack20<'a>(header: &FileHeader, _compressed: &'a [u8]) -> ArchiveResult<Cow<'a, [u8]>> {
    Err(unsupported("RAR 2.0 compression", header))
}

fn unpack29<'a>(header: &FileHeader, _compressed: &'a [u8]) -> ArchiveResult<Cow<'a, [u8]>> {
    Err(unsupported("RAR 2.9 compression", header))
}
