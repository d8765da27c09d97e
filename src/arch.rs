use std::convert::TryFrom;

use crate::result::*;

/// Converts a size or count read from an archive header to a `usize`.
///
/// RAR sizes can be 64 bits wide, which won't fit on 32-bit targets.
pub fn usize<I: Into<u64>>(i: I) -> ArchiveResult<usize> {
    usize::try_from(i.into()).map_err(|_| ArchiveError::InsufficientAddressSpace)
}
