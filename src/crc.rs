//! CRC-32 checks for decoded payloads
//!
//! Both ZIP and RAR store the CRC-32 (IEEE) of each file's uncompressed bytes.

use crc32fast::Hasher;

use crate::result::*;

/// Computes the CRC-32 of the given bytes.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Returns an error unless `data` hashes to the `provided_checksum`.
pub fn verify(data: &[u8], provided_checksum: u32) -> ArchiveResult<()> {
    let actual = crc32(data);
    if actual == provided_checksum {
        Ok(())
    } else {
        Err(ArchiveError::ChecksumMismatch {
            expected: provided_checksum,
            actual,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(crc32(b""), 0);
        assert!(verify(b"", 0).is_ok());
        assert_eq!(
            verify(b"", 1).unwrap_err(),
            ArchiveError::ChecksumMismatch {
                expected: 1,
                actual: 0
            }
        );
    }

    #[test]
    fn test_known_value() {
        assert_eq!(crc32(b"1234"), 0x9be3e0a3);
        assert!(verify(b"1234", 0x9be3e0a3).is_ok());
        assert!(verify(b"1235", 0x9be3e0a3).is_err());
    }
}
