//! Tools for reading a ZIP archive.
//!
//! ZIP archives are read front to back: we walk the local file headers
//! (and the data after each of them), put the files in page order,
//! skip over the central directory and friends, then decode each file.
//!
//! [`scan()`] does the first part alone, if you just want a listing.

use std::borrow::Cow;
use std::cmp::Ordering;

use log::*;

use crate::bits::BitReader;
use crate::crc;
use crate::entry::{CompressionMethod, Entry};
use crate::inflate::inflate;
use crate::progress::{ArchiveFormat, Progress, Reporter};
use crate::result::*;
use crate::spec;
use crate::DecodeOptions;

/// Reads the local file headers at the start of `archive`,
/// returning the non-empty files they describe, sorted with
/// [`sort_by_trailing_number()`].
///
/// Nothing is decompressed yet.
///
/// ```no_run
/// # use std::fs;
/// let bytes = fs::read("chapter-1.cbz")?;
/// for entry in pagezip::read::scan(&bytes)? {
///     println!("{} ({} bytes)", entry.path, entry.size);
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn scan(archive: &[u8]) -> ArchiveResult<Vec<Entry>> {
    let mut reader = BitReader::new(archive);
    let mut entries = Vec::new();

    while spec::next_is(&reader, spec::LOCAL_FILE_HEADER_MAGIC) {
        let entry = spec::read_local_file(&mut reader)?;
        if entry.size == 0 {
            // Directories, mostly.
            debug!("Skipping empty entry {}", entry.path);
            continue;
        }
        entries.push(entry);
    }
    debug!("Found {} files", entries.len());

    sort_by_trailing_number(&mut entries);

    if let Err(e) = skip_trailing_records(&mut reader) {
        warn!("Couldn't read the records after the file data: {}", e);
    } else if !reader.is_empty() {
        debug!("Ignoring {} unrecognized bytes at the end", reader.remaining());
    }
    Ok(entries)
}

/// Skips whatever follows the local files:
/// archive extra data, central directory, digital signature, and
/// end of central directory record, each of them optional.
fn skip_trailing_records(reader: &mut BitReader) -> ArchiveResult<()> {
    if spec::next_is(reader, spec::ARCHIVE_EXTRA_DATA_MAGIC) {
        spec::skip_archive_extra_data(reader)?;
    }

    let mut directory_entries = 0;
    while spec::next_is(reader, spec::CENTRAL_DIRECTORY_MAGIC) {
        let name = spec::skip_central_directory_entry(reader)?;
        trace!("Skipped central directory entry {}", String::from_utf8_lossy(name));
        directory_entries += 1;
    }
    debug!("Skipped {} central directory entries", directory_entries);

    if spec::next_is(reader, spec::DIGITAL_SIGNATURE_MAGIC) {
        spec::skip_digital_signature(reader)?;
    }

    if spec::next_is(reader, spec::EOCDR_MAGIC) {
        let eocdr = spec::EndOfCentralDirectory::parse(reader)?;
        if usize::from(eocdr.entries) != directory_entries {
            debug!(
                "End of central directory lists {} entries, but {} preceded it",
                eocdr.entries, directory_entries
            );
        }
        if !eocdr.comment.is_empty() {
            trace!("Archive comment: {}", String::from_utf8_lossy(eocdr.comment));
        }
    }
    Ok(())
}

/// Finds the last run of ASCII digits in `name`, like "10" in "img10.png".
fn trailing_number(name: &str) -> Option<&str> {
    let end = name.rfind(|c: char| c.is_ascii_digit())? + 1;
    let start = name[..end]
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .len();
    Some(&name[start..end])
}

/// Compares two strings of decimal digits by their numeric value,
/// however long they are.
fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Orders names by the number closest to their end,
/// so that `img2.png` comes before `img10.png`.
///
/// Names without any digits sort before names with them.
pub fn compare_trailing_numbers(a: &str, b: &str) -> Ordering {
    match (trailing_number(a), trailing_number(b)) {
        (Some(a), Some(b)) => compare_digits(a, b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Puts entries in page order. See [`compare_trailing_numbers()`].
///
/// The sort is stable: entries with the same number keep their archive order.
pub fn sort_by_trailing_number(entries: &mut [Entry]) {
    entries.sort_by(|a, b| compare_trailing_numbers(a.path.as_str(), b.path.as_str()));
}

/// Decodes a whole ZIP archive, reporting to `reporter` as it goes.
///
/// Only a failed header scan is returned as an error;
/// problems with individual files are recorded in their entries.
pub(crate) fn decode_zip<'a, F: FnMut(&Progress<'a>)>(
    archive: &'a [u8],
    options: &DecodeOptions,
    reporter: &mut Reporter<'a, F>,
) -> ArchiveResult<()> {
    let entries = scan(archive)?;
    let total_bytes = entries.iter().map(|e| e.size as u64).sum();
    reporter.scanned(ArchiveFormat::Zip, entries.len(), total_bytes);

    for entry in entries {
        decode_entry(entry, options, reporter);
    }
    Ok(())
}

fn decode_entry<'a, F: FnMut(&Progress<'a>)>(
    mut entry: Entry<'a>,
    options: &DecodeOptions,
    reporter: &mut Reporter<'a, F>,
) {
    reporter.begin_entry(&entry.path);
    let outcome = extract(&entry, options, reporter);
    match &outcome {
        Ok(data) => debug!("Decoded {} ({} bytes)", entry.path, data.len()),
        Err(e) => warn!("Couldn't decode {}: {}", entry.path, e),
    }
    entry.finish(outcome);
    reporter.finish_entry(entry);
}

/// Decompresses one entry and checks its CRC.
fn extract<'a, F: FnMut(&Progress<'a>)>(
    entry: &Entry<'a>,
    options: &DecodeOptions,
    reporter: &mut Reporter<'a, F>,
) -> ArchiveResult<Cow<'a, [u8]>> {
    if entry.encrypted {
        return Err(ArchiveError::UnsupportedCompression(String::from(
            "Can't decrypt encrypted files",
        )));
    }
    check_version(entry, options)?;

    let data = match entry.compression_method {
        CompressionMethod::None => {
            let data = entry.compressed_data();
            reporter.add_bytes(data.len());
            Cow::Borrowed(data)
        }
        CompressionMethod::Deflate => Cow::Owned(inflate(
            entry.compressed_data(),
            entry.size,
            |block_size| reporter.block_decoded(block_size),
        )?),
        other => {
            return Err(ArchiveError::UnsupportedCompression(format!(
                "{:?}",
                other
            )))
        }
    };

    if options.verify_crc32 {
        crc::verify(&data, entry.crc32)?;
    }
    Ok(data)
}

/// Stored files must need version 1.0 to extract, and DEFLATEd ones 2.0,
/// unless the options relax that to "anything up to 2.0".
fn check_version(entry: &Entry, options: &DecodeOptions) -> ArchiveResult<()> {
    let supported = match (entry.compression_method, options.strict_versions) {
        (CompressionMethod::None, true) => entry.version == 10,
        (CompressionMethod::Deflate, true) => entry.version == 20,
        (CompressionMethod::None | CompressionMethod::Deflate, false) => entry.version <= 20,
        _ => false,
    };
    if supported {
        Ok(())
    } else {
        Err(ArchiveError::UnsupportedCompression(format!(
            "{:?} with version {}.{}",
            entry.compression_method,
            entry.version / 10,
            entry.version % 10
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::Write;

    use flate2::write::DeflateEncoder;
    use flate2::Compression;

    fn local_file(name: &str, version: u16, method: u16, data: &[u8]) -> Vec<u8> {
        let payload = if method == 8 {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        } else {
            data.to_vec()
        };
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&spec::LOCAL_FILE_HEADER_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&version.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&method.to_le_bytes());
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(&crc::crc32(data).to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    fn names(entries: &[Entry]) -> Vec<String> {
        entries.iter().map(|e| e.path.to_string()).collect()
    }

    #[test]
    fn trailing_numbers() {
        assert_eq!(trailing_number("img10.png"), Some("10"));
        assert_eq!(trailing_number("vol2/page007.jpg"), Some("007"));
        assert_eq!(trailing_number("cover.jpg"), None);
        assert_eq!(trailing_number("42"), Some("42"));
    }

    #[test]
    fn numeric_order() {
        use Ordering::*;
        assert_eq!(compare_trailing_numbers("img2.png", "img10.png"), Less);
        assert_eq!(compare_trailing_numbers("img010.png", "img10.png"), Equal);
        assert_eq!(compare_trailing_numbers("cover.png", "img0.png"), Less);
        // Longer than any integer type
        assert_eq!(
            compare_trailing_numbers(
                "p99999999999999999999999999.png",
                "p100000000000000000000000000.png"
            ),
            Less
        );
    }

    #[test]
    fn sorts_pages() {
        let mut archive = Vec::new();
        for name in ["img10.png", "img2.png", "img1.png", "b1.png", "cover.png"] {
            archive.extend(local_file(name, 10, 0, name.as_bytes()));
        }
        let entries = scan(&archive).unwrap();
        assert_eq!(
            names(&entries),
            ["cover.png", "img1.png", "b1.png", "img2.png", "img10.png"]
        );
    }

    #[test]
    fn skips_directories() {
        let mut archive = local_file("pages/", 10, 0, b"");
        archive.extend(local_file("pages/1.png", 10, 0, b"one"));
        let entries = scan(&archive).unwrap();
        assert_eq!(names(&entries), ["pages/1.png"]);
    }

    #[test]
    fn trailing_junk_is_tolerated() {
        let mut archive = local_file("1.png", 10, 0, b"one");
        // A truncated central directory entry
        archive.extend_from_slice(&spec::CENTRAL_DIRECTORY_MAGIC.to_le_bytes());
        archive.extend_from_slice(&[0; 10]);
        assert_eq!(names(&scan(&archive).unwrap()), ["1.png"]);
    }

    #[test]
    fn truncated_file_data_is_fatal() {
        let archive = local_file("1.png", 10, 0, b"one");
        assert_eq!(
            scan(&archive[..archive.len() - 1]).unwrap_err(),
            ArchiveError::UnexpectedEof
        );
    }

    #[test]
    fn versions() {
        let strict = DecodeOptions::default();
        let relaxed = DecodeOptions {
            strict_versions: false,
            ..DecodeOptions::default()
        };

        let archive = local_file("1.png", 20, 0, b"one");
        let entry = &scan(&archive).unwrap()[0];
        assert!(check_version(entry, &strict).is_err());
        assert!(check_version(entry, &relaxed).is_ok());

        let archive = local_file("1.png", 45, 8, b"one");
        let entry = &scan(&archive).unwrap()[0];
        assert!(check_version(entry, &relaxed).is_err());

        let archive = local_file("1.png", 20, 14, b"one");
        let entry = &scan(&archive).unwrap()[0];
        assert_eq!(
            check_version(entry, &relaxed).unwrap_err(),
            ArchiveError::UnsupportedCompression(String::from("Unsupported(14) with version 2.0"))
        );
    }

    #[test]
    fn decodes_entries() {
        let text = b"It was a dark and stormy night. ".repeat(100);
        let mut archive = local_file("2.txt", 20, 8, &text);
        archive.extend(local_file("1.txt", 10, 0, b"stored"));
        archive.extend(local_file("3.txt", 63, 8, b"too new"));

        let mut snapshots = 0;
        let mut reporter = Reporter::new(|_: &Progress| snapshots += 1);
        decode_zip(&archive, &DecodeOptions::default(), &mut reporter).unwrap();
        let progress = reporter.finish();

        assert_eq!(progress.total_entries, 3);
        assert_eq!(progress.bytes_decoded, 6 + text.len() as u64);
        let entries = &progress.entries;
        assert_eq!(names(entries), ["1.txt", "2.txt", "3.txt"]);

        assert!(matches!(entries[0].data, Some(Cow::Borrowed(b"stored"))));
        assert_eq!(entries[1].data.as_deref(), Some(&text[..]));
        assert!(!entries[2].is_valid());
        assert!(matches!(
            entries[2].error,
            Some(ArchiveError::UnsupportedCompression(_))
        ));
        // Scan, one block, three entries, done
        assert_eq!(snapshots, 6);
    }

    #[test]
    fn bad_deflate_stream_only_fails_its_entry() {
        // A lone byte with BTYPE 3, labeled as DEFLATE
        let mut archive = local_file("1.txt", 20, 0, &[0x07]);
        archive[8..10].copy_from_slice(&8u16.to_le_bytes());
        archive.extend(local_file("2.txt", 10, 0, b"stored"));

        let mut reporter = Reporter::new(|_: &Progress| {});
        decode_zip(&archive, &DecodeOptions::default(), &mut reporter).unwrap();
        let progress = reporter.finish();

        assert!(progress.is_valid);
        let entries = &progress.entries;
        assert_eq!(names(entries), ["1.txt", "2.txt"]);
        assert!(!entries[0].is_valid());
        assert_eq!(entries[0].error, Some(ArchiveError::InvalidBlockType));
        assert!(entries[1].is_valid());
        assert_eq!(entries[1].data.as_deref(), Some(&b"stored"[..]));
    }

    #[test]
    fn bad_crc() {
        let mut archive = local_file("1.txt", 10, 0, b"stored");
        // Flip a bit in the payload
        let last = archive.len() - 1;
        archive[last] ^= 1;

        let mut reporter = Reporter::new(|_: &Progress| {});
        decode_zip(&archive, &DecodeOptions::default(), &mut reporter).unwrap();
        let progress = reporter.finish();
        let expected_error = if cfg!(feature = "check-crc32") {
            Some(ArchiveError::ChecksumMismatch {
                expected: crc::crc32(b"stored"),
                actual: crc::crc32(b"storee"),
            })
        } else {
            None
        };
        assert_eq!(progress.entries[0].error, expected_error);
    }
}
