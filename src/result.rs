//! Error types and the related `Result<T>`

use std::str::Utf8Error;

use thiserror::Error;

use crate::progress::Progress;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    /// The input isn't a ZIP or RAR archive we recognize.
    #[error("Unrecognized archive: {0}")]
    Format(&'static str),

    /// An entry uses a compression method or version we can't decode.
    /// Other entries in the archive are still decoded.
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// Huffman decoding read `length` bits without finding a code,
    /// which means we lost our place in the bit stream.
    #[error("Bit stream out of sync: no Huffman code after {length} bits (table bound is {bound})")]
    StreamDesync { length: usize, bound: usize },

    /// A DEFLATE block header had the reserved block type 3.
    #[error("Invalid DEFLATE block type 3")]
    InvalidBlockType,

    /// A Huffman table was requested from nonsensical code lengths.
    #[error("Invalid Huffman code lengths: {0}")]
    InvalidInput(&'static str),

    /// The compressed data is malformed in some other way.
    #[error("Corrupt compressed data: {0}")]
    Corrupt(&'static str),

    /// The input ended in the middle of a structure.
    #[error("Unexpected end of input")]
    UnexpectedEof,

    /// The decoded payload doesn't match the CRC-32 stored in the archive.
    #[error("CRC-32 mismatch: archive says {expected:#010x}, payload is {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Decoding a name flagged as UTF-8 failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] Utf8Error),

    /// A declared size doesn't fit in a usize,
    /// probably on a 32-bit system.
    #[error("Archive entry too large for address space")]
    InsufficientAddressSpace,
}

/// A decode that couldn't finish.
///
/// Carries the error along with the terminal progress snapshot,
/// which holds whatever entries were completed before things went wrong.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DecodeFailure<'a> {
    #[source]
    pub error: ArchiveError,
    pub progress: Progress<'a>,
}

impl DecodeFailure<'_> {
    /// Detaches the failure from the archive buffer,
    /// e.g., to return it as a `Box<dyn Error>`.
    pub fn into_owned(self) -> DecodeFailure<'static> {
        DecodeFailure {
            error: self.error,
            progress: self.progress.into_owned(),
        }
    }
}
