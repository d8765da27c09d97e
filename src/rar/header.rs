//! RAR 1.5-4.x block headers.
//!
//! Every header starts with the same seven bytes:
//!
//! ```text
//! HEAD_CRC   2 bytes  CRC of the header (not checked)
//! HEAD_TYPE  1 byte
//! HEAD_FLAGS 2 bytes
//! HEAD_SIZE  2 bytes  including these seven
//! ```
//!
//! followed by fields that depend on the type.
//! Flag words are read one bit at a time, least significant first,
//! into named booleans.

use std::borrow::Cow;

use camino::Utf8Path;
use chrono::NaiveDateTime;
use log::*;

use crate::arch::usize;
use crate::bits::BitReader;
use crate::entry::{decode_name, parse_msdos};
use crate::result::*;

pub const MARKER_HEADER_TYPE: u8 = 0x72;
pub const MAIN_HEADER_TYPE: u8 = 0x73;
pub const FILE_HEADER_TYPE: u8 = 0x74;

/// Size of the fields shared by all headers
pub const BASE_HEADER_SIZE: u16 = 7;

/// The marker block that opens every RAR 1.5-4.x archive, `Rar!\x1a\x07\x00`,
/// seen as a header.
pub const MARKER_CRC: u16 = 0x6152;
pub const MARKER_FLAGS: u16 = 0x1a21;

/// Reads the next bit of a flag word as a boolean.
fn flag(reader: &mut BitReader) -> ArchiveResult<bool> {
    Ok(reader.read_bit()? == 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MainFlags {
    /// 0x0001: Part of a multi-volume archive
    pub volume: bool,
    /// 0x0002: Has an archive comment
    pub comment: bool,
    /// 0x0004: Locked against modification
    pub lock: bool,
    /// 0x0008: Solid archive
    pub solid: bool,
    /// 0x0010: New volume naming (`.partN.rar`),
    /// or a packed comment in older archives
    pub new_numbering: bool,
    /// 0x0020: Has authenticity information
    pub authenticity: bool,
    /// 0x0040: Has a recovery record
    pub protected: bool,
    /// 0x0080: Block headers are encrypted
    pub password: bool,
    /// 0x0100: First volume of a set
    pub first_volume: bool,
    /// 0x0200: The main header has an encryption version byte
    pub encrypt_version: bool,
}

impl MainFlags {
    fn read(reader: &mut BitReader) -> ArchiveResult<Self> {
        let flags = Self {
            volume: flag(reader)?,
            comment: flag(reader)?,
            lock: flag(reader)?,
            solid: flag(reader)?,
            new_numbering: flag(reader)?,
            authenticity: flag(reader)?,
            protected: flag(reader)?,
            password: flag(reader)?,
            first_volume: flag(reader)?,
            encrypt_version: flag(reader)?,
        };
        reader.read_bits(6)?;
        Ok(flags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileFlags {
    /// 0x0001: Continued from the previous volume
    pub split_before: bool,
    /// 0x0002: Continued in the next volume
    pub split_after: bool,
    /// 0x0004: Encrypted
    pub password: bool,
    /// 0x0008: Has a file comment
    pub comment: bool,
    /// 0x0010: Uses the dictionary of previous files
    pub solid: bool,
    /// 0x0100: High 32 bits of both sizes follow the attributes
    pub large: bool,
    /// 0x0200: The name is UTF-8, or ASCII + NUL + RAR's Unicode encoding
    pub unicode: bool,
    /// 0x0400: An 8-byte salt follows the name
    pub salt: bool,
    /// 0x0800: Versioned file
    pub version: bool,
    /// 0x1000: Extended time fields follow
    pub ext_time: bool,
    /// 0x2000: Reserved for an extended flags field
    pub ext_flags: bool,
}

impl FileFlags {
    fn read(reader: &mut BitReader) -> ArchiveResult<Self> {
        let split_before = flag(reader)?;
        let split_after = flag(reader)?;
        let password = flag(reader)?;
        let comment = flag(reader)?;
        let solid = flag(reader)?;
        // 0x00e0 is the dictionary size, which only matters for decompression.
        reader.read_bits(3)?;
        let flags = Self {
            split_before,
            split_after,
            password,
            comment,
            solid,
            large: flag(reader)?,
            unicode: flag(reader)?,
            salt: flag(reader)?,
            version: flag(reader)?,
            ext_time: flag(reader)?,
            ext_flags: flag(reader)?,
        };
        reader.read_bits(2)?;
        Ok(flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerHeader {
    pub crc: u16,
    pub flags: u16,
    pub head_size: u16,
}

impl MarkerHeader {
    /// Returns true if this is the marker block of a RAR 1.5-4.x archive.
    pub fn is_valid(&self) -> bool {
        self.crc == MARKER_CRC && self.flags == MARKER_FLAGS && self.head_size == BASE_HEADER_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainHeader {
    pub crc: u16,
    pub flags: MainFlags,
    pub head_size: u16,
    pub high_pos_av: u16,
    pub pos_av: u32,
    pub encrypt_version: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader<'a> {
    pub crc: u16,
    pub flags: FileFlags,
    pub head_size: u16,
    /// Bytes of file data following the header
    /// (with the high 32 bits, if the header has them)
    pub pack_size: u64,
    pub unpacked_size: u64,
    pub host_os: u8,
    /// CRC-32 of the unpacked file
    pub file_crc: u32,
    /// MS-DOS date (high 16 bits) and time (low 16 bits)
    pub file_time: u32,
    /// Version needed to unpack, times ten
    pub unpack_version: u8,
    /// 0x30 (store) through 0x35 (best)
    pub method: u8,
    pub attributes: u32,
    pub name: Cow<'a, Utf8Path>,
    pub salt: Option<[u8; 8]>,
    pub ext_time_flags: Option<u16>,
}

impl FileHeader<'_> {
    pub fn last_modified(&self) -> Option<NaiveDateTime> {
        parse_msdos(self.file_time as u16, (self.file_time >> 16) as u16)
    }
}

/// Any header we don't look into, like comments, recovery records,
/// or the end of archive marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtherHeader {
    pub crc: u16,
    pub head_type: u8,
    pub flags: u16,
    pub head_size: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeHeader<'a> {
    Marker(MarkerHeader),
    Main(MainHeader),
    File(FileHeader<'a>),
    Other(OtherHeader),
}

impl<'a> VolumeHeader<'a> {
    /// Reads one header, leaving `reader` just past it.
    ///
    /// For file headers, that's the start of the file's data.
    pub fn parse(reader: &mut BitReader<'a>) -> ArchiveResult<Self> {
        let start = reader.position();
        let crc = reader.read_u16()?;
        let head_type = reader.read_u8()?;

        let header = match head_type {
            MAIN_HEADER_TYPE => {
                let flags = MainFlags::read(reader)?;
                let head_size = reader.read_u16()?;
                let high_pos_av = reader.read_u16()?;
                let pos_av = reader.read_u32()?;
                let encrypt_version = if flags.encrypt_version {
                    Some(reader.read_u8()?)
                } else {
                    None
                };
                VolumeHeader::Main(MainHeader {
                    crc,
                    flags,
                    head_size,
                    high_pos_av,
                    pos_av,
                    encrypt_version,
                })
            }
            FILE_HEADER_TYPE => VolumeHeader::File(parse_file_header(reader, crc)?),
            _ => {
                let flags = reader.read_u16()?;
                let head_size = reader.read_u16()?;
                let rest = head_size.checked_sub(BASE_HEADER_SIZE).ok_or(
                    ArchiveError::Corrupt("RAR header smaller than its base fields"),
                )?;
                reader.skip(usize(rest)?)?;
                if head_type == MARKER_HEADER_TYPE {
                    VolumeHeader::Marker(MarkerHeader {
                        crc,
                        flags,
                        head_size,
                    })
                } else {
                    VolumeHeader::Other(OtherHeader {
                        crc,
                        head_type,
                        flags,
                        head_size,
                    })
                }
            }
        };

        // Skip anything newer versions added that we didn't read.
        let consumed = reader.position() - start;
        let head_size = usize(header.head_size())?;
        if consumed < head_size {
            trace!("Skipping {} unread header bytes", head_size - consumed);
            reader.skip(head_size - consumed)?;
        } else if consumed > head_size {
            warn!(
                "Read {} bytes of a header claiming to be {} bytes",
                consumed, head_size
            );
        }
        Ok(header)
    }

    pub fn head_size(&self) -> u16 {
        match self {
            VolumeHeader::Marker(h) => h.head_size,
            VolumeHeader::Main(h) => h.head_size,
            VolumeHeader::File(h) => h.head_size,
            VolumeHeader::Other(h) => h.head_size,
        }
    }
}

fn parse_file_header<'a>(reader: &mut BitReader<'a>, crc: u16) -> ArchiveResult<FileHeader<'a>> {
    let flags = FileFlags::read(reader)?;
    let head_size = reader.read_u16()?;
    let low_pack_size = reader.read_u32()?;
    let low_unpacked_size = reader.read_u32()?;
    let host_os = reader.read_u8()?;
    let file_crc = reader.read_u32()?;
    let file_time = reader.read_u32()?;
    let unpack_version = reader.read_u8()?;
    let method = reader.read_u8()?;
    let name_size = reader.read_u16()?;
    let attributes = reader.read_u32()?;

    let (high_pack_size, high_unpacked_size) = if flags.large {
        (reader.read_u32()?, reader.read_u32()?)
    } else {
        (0, 0)
    };
    let pack_size = (high_pack_size as u64) << 32 | low_pack_size as u64;
    let unpacked_size = (high_unpacked_size as u64) << 32 | low_unpacked_size as u64;

    let name_bytes = reader.read_bytes(usize(name_size)?)?;
    let name = if flags.unicode {
        // With a NUL, the name is an ASCII name followed by RAR's
        // own compressed UTF-16. The ASCII part will do.
        match name_bytes.iter().position(|&b| b == 0) {
            Some(nul) => decode_name(&name_bytes[..nul], false)?,
            None => decode_name(name_bytes, true)?,
        }
    } else {
        decode_name(name_bytes, false)?
    };

    let salt = if flags.salt {
        let mut salt = [0u8; 8];
        salt.copy_from_slice(reader.read_bytes(8)?);
        Some(salt)
    } else {
        None
    };

    let ext_time_flags = if flags.ext_time {
        Some(skip_ext_time(reader)?)
    } else {
        None
    };

    Ok(FileHeader {
        crc,
        flags,
        head_size,
        pack_size,
        unpacked_size,
        host_os,
        file_crc,
        file_time,
        unpack_version,
        method,
        attributes,
        name,
        salt,
        ext_time_flags,
    })
}

/// Skips the extended times (modification, creation, access, archive),
/// returning their flags.
///
/// Each time gets four bits of the flags, modification time first, in the high nibble.
/// If the nibble's high bit is set, the time is present:
/// a DOS time (except for modification, which is already in the header)
/// followed by (nibble & 3) bytes of extra precision.
/// Only the low half of each DOS time is stepped over here;
/// [`VolumeHeader::parse()`] skips whatever is left of the header.
fn skip_ext_time(reader: &mut BitReader) -> ArchiveResult<u16> {
    let flags = reader.read_u16()?;
    for i in 0..4 {
        let mode = flags >> ((3 - i) * 4);
        if mode & 8 == 0 {
            continue;
        }
        if i != 0 {
            reader.skip(2)?;
        }
        reader.skip(usize(mode & 3)?)?;
    }
    Ok(flags)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub const MARKER: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1a, 0x07, 0x00];

    pub fn main_header(flags: u16) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.push(MAIN_HEADER_TYPE);
        bytes.extend_from_slice(&flags.to_le_bytes());
        bytes.extend_from_slice(&13u16.to_le_bytes());
        bytes.extend_from_slice(&[0; 6]);
        bytes
    }

    /// A file header followed by `payload`
    pub fn file_block(
        name: &str,
        unpack_version: u8,
        method: u8,
        payload: &[u8],
        crc: u32,
    ) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.push(FILE_HEADER_TYPE);
        bytes.extend_from_slice(&0x8000u16.to_le_bytes());
        bytes.extend_from_slice(&(32 + name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.push(2); // Win32
        bytes.extend_from_slice(&crc.to_le_bytes());
        // 2021-03-14 15:09:26
        let time: u32 = (15 << 11) | (9 << 5) | 13;
        let date: u32 = (41 << 9) | (3 << 5) | 14;
        bytes.extend_from_slice(&(date << 16 | time).to_le_bytes());
        bytes.push(unpack_version);
        bytes.push(method);
        bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&0x20u32.to_le_bytes());
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn marker() {
        let mut reader = BitReader::new(&MARKER);
        match VolumeHeader::parse(&mut reader).unwrap() {
            VolumeHeader::Marker(m) => assert!(m.is_valid()),
            other => panic!("Expected a marker, got {:?}", other),
        }
        assert!(reader.is_empty());
    }

    #[test]
    fn main_flags() {
        // Solid, first volume, with an encryption version byte
        let mut bytes = main_header(0x0308);
        bytes[5] = 14; // One more byte for the version
        bytes.push(29);
        let mut reader = BitReader::new(&bytes);
        let main = match VolumeHeader::parse(&mut reader).unwrap() {
            VolumeHeader::Main(m) => m,
            other => panic!("Expected a main header, got {:?}", other),
        };
        assert_eq!(
            main.flags,
            MainFlags {
                solid: true,
                first_volume: true,
                encrypt_version: true,
                ..MainFlags::default()
            }
        );
        assert_eq!(main.encrypt_version, Some(29));
        assert!(reader.is_empty());
    }

    #[test]
    fn file_header() {
        let bytes = file_block("vol1/page07.jpg", 29, 0x30, b"pixels", 0xdeadbeef);
        let mut reader = BitReader::new(&bytes);
        let file = match VolumeHeader::parse(&mut reader).unwrap() {
            VolumeHeader::File(f) => f,
            other => panic!("Expected a file header, got {:?}", other),
        };
        assert_eq!(file.name.as_str(), "vol1/page07.jpg");
        assert_eq!(file.pack_size, 6);
        assert_eq!(file.unpacked_size, 6);
        assert_eq!(file.file_crc, 0xdeadbeef);
        assert_eq!(file.unpack_version, 29);
        assert_eq!(file.method, 0x30);
        assert_eq!(file.attributes, 0x20);
        assert_eq!(file.flags, FileFlags::default());
        assert_eq!(
            file.last_modified().unwrap().to_string(),
            "2021-03-14 15:09:26"
        );
        // Left at the data
        assert_eq!(reader.read_bytes(6).unwrap(), b"pixels");
    }

    #[test]
    fn file_header_extras() {
        let mut bytes = file_block("a.jpg", 29, 0x30, b"", 0);
        // LARGE | UNICODE | SALT | EXTTIME
        let flags: u16 = 0x0100 | 0x0200 | 0x0400 | 0x1000 | 0x8000;
        bytes[3..5].copy_from_slice(&flags.to_le_bytes());
        // Unicode name: ASCII part, NUL, then encoded junk
        let name = b"a.jpg\0\x01\x02";
        bytes[26..28].copy_from_slice(&(name.len() as u16).to_le_bytes());
        bytes.truncate(32);
        bytes.extend_from_slice(&1u32.to_le_bytes()); // High pack size
        bytes.extend_from_slice(&0u32.to_le_bytes()); // High unpacked size
        bytes.extend_from_slice(name);
        bytes.extend_from_slice(b"saltsalt");
        // Modification time with 2 extra bytes, access time with 1
        bytes.extend_from_slice(&0xa090u16.to_le_bytes());
        bytes.extend_from_slice(&[0; 2]);
        bytes.extend_from_slice(&[0; 4 + 1]);
        let head_size = bytes.len() as u16;
        bytes[5..7].copy_from_slice(&head_size.to_le_bytes());

        let mut reader = BitReader::new(&bytes);
        let file = match VolumeHeader::parse(&mut reader).unwrap() {
            VolumeHeader::File(f) => f,
            other => panic!("Expected a file header, got {:?}", other),
        };
        assert!(file.flags.large && file.flags.unicode && file.flags.salt && file.flags.ext_time);
        assert_eq!(file.pack_size, 1 << 32);
        assert_eq!(file.name.as_str(), "a.jpg");
        assert_eq!(file.salt, Some(*b"saltsalt"));
        assert_eq!(file.ext_time_flags, Some(0xa090));
        assert!(reader.is_empty());
    }

    #[test]
    fn other_headers_are_skipped() {
        // End of archive, with two bytes of body
        let bytes = [0x3d, 0x7b, 0x7b, 0x00, 0x40, 0x09, 0x00, 0xaa, 0xbb];
        let mut reader = BitReader::new(&bytes);
        assert_eq!(
            VolumeHeader::parse(&mut reader).unwrap(),
            VolumeHeader::Other(OtherHeader {
                crc: 0x7b3d,
                head_type: 0x7b,
                flags: 0x4000,
                head_size: 9,
            })
        );
        assert!(reader.is_empty());
    }

    #[test]
    fn undersized_header() {
        let bytes = [0x00, 0x00, 0x7b, 0x00, 0x00, 0x03, 0x00];
        let mut reader = BitReader::new(&bytes);
        assert!(matches!(
            VolumeHeader::parse(&mut reader),
            Err(ArchiveError::Corrupt(_))
        ));
    }
}
