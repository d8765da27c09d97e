//! DEFLATE decompression, per [RFC 1951].
//!
//! A DEFLATE stream is a series of blocks, each either stored verbatim
//! or Huffman-coded with LZ77 back-references into the output so far.
//! Since ZIP tells us each file's uncompressed size up front,
//! we decode into a buffer of exactly that size.
//!
//! [RFC 1951]: https://tools.ietf.org/html/rfc1951

use log::*;

use crate::bits::BitReader;
use crate::huffman::{HuffmanTable, FIXED_DISTANCE_TABLE, FIXED_LITERAL_TABLE};
use crate::result::*;

/// The order code length code lengths are sent in dynamic block headers
const CODE_LENGTH_CODE_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// (extra bits, base length) for length symbols 257 through 285
//
//      Extra               Extra               Extra
// Code Bits Length(s) Code Bits Lengths   Code Bits Length(s)
// ---- ---- ------     ---- ---- -------   ---- ---- -------
//  257   0     3       267   1   15,16     277   4   67-82
//  258   0     4       268   1   17,18     278   4   83-98
//  259   0     5       269   2   19-22     279   4   99-114
//  260   0     6       270   2   23-26     280   4  115-130
//  261   0     7       271   2   27-30     281   5  131-162
//  262   0     8       272   2   31-34     282   5  163-194
//  263   0     9       273   3   35-42     283   5  195-226
//  264   0    10       274   3   43-50     284   5  227-257
//  265   1  11,12      275   3   51-58     285   0    258
//  266   1  13,14      276   3   59-66
#[rustfmt::skip]
const LENGTH_TABLE: [(u32, u16); 29] = [
    (0, 3), (0, 4), (0, 5), (0, 6),
    (0, 7), (0, 8), (0, 9), (0, 10),
    (1, 11), (1, 13), (1, 15), (1, 17),
    (2, 19), (2, 23), (2, 27), (2, 31),
    (3, 35), (3, 43), (3, 51), (3, 59),
    (4, 67), (4, 83), (4, 99), (4, 115),
    (5, 131), (5, 163), (5, 195), (5, 227),
    (0, 258),
];

/// (extra bits, base distance) for distance symbols 0 through 29
#[rustfmt::skip]
const DISTANCE_TABLE: [(u32, u16); 30] = [
    (0, 1), (0, 2), (0, 3), (0, 4),
    (1, 5), (1, 7),
    (2, 9), (2, 13),
    (3, 17), (3, 25),
    (4, 33), (4, 49),
    (5, 65), (5, 97),
    (6, 129), (6, 193),
    (7, 257), (7, 385),
    (8, 513), (8, 769),
    (9, 1025), (9, 1537),
    (10, 2049), (10, 3073),
    (11, 4097), (11, 6145),
    (12, 8193), (12, 12289),
    (13, 16385), (13, 24577),
];

/// A fixed-size buffer that decoded bytes are appended to.
///
/// The cursor never passes the end; writing past it means the archive
/// lied about the uncompressed size (or the stream is garbage).
#[derive(Debug)]
struct OutputBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl OutputBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            cursor: 0,
        }
    }

    fn insert_byte(&mut self, b: u8) -> ArchiveResult<()> {
        let slot = self
            .data
            .get_mut(self.cursor)
            .ok_or(ArchiveError::Corrupt("output exceeds declared size"))?;
        *slot = b;
        self.cursor += 1;
        Ok(())
    }

    fn insert_bytes(&mut self, bytes: &[u8]) -> ArchiveResult<()> {
        let end = self.cursor + bytes.len();
        if end > self.data.len() {
            return Err(ArchiveError::Corrupt("output exceeds declared size"));
        }
        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        Ok(())
    }

    /// Copies `length` bytes starting `distance` bytes back.
    ///
    /// The source may run into bytes this same call writes
    /// (if the last two bytes are X and Y, `<length = 5, distance = 2>`
    /// appends X, Y, X, Y, X), so this goes one byte at a time.
    fn copy_back_reference(&mut self, length: usize, distance: usize) -> ArchiveResult<()> {
        if distance == 0 || distance > self.cursor {
            return Err(ArchiveError::Corrupt(
                "back-reference before the start of output",
            ));
        }
        if self.cursor + length > self.data.len() {
            return Err(ArchiveError::Corrupt("output exceeds declared size"));
        }
        let mut from = self.cursor - distance;
        for _ in 0..length {
            self.data[self.cursor] = self.data[from];
            self.cursor += 1;
            from += 1;
        }
        Ok(())
    }

    fn into_inner(mut self) -> Vec<u8> {
        self.data.truncate(self.cursor);
        self.data
    }
}

/// Decompresses a raw DEFLATE stream expected to produce `size` bytes.
///
/// `on_block` is called after each block with the number of bytes it produced.
pub fn inflate<F: FnMut(usize)>(
    compressed: &[u8],
    size: usize,
    mut on_block: F,
) -> ArchiveResult<Vec<u8>> {
    let mut reader = BitReader::new(compressed);
    let mut output = OutputBuffer::new(size);

    loop {
        let is_final = reader.read_bits(1)? == 1;
        let block_type = reader.read_bits(2)?;
        let block_start = output.cursor;

        match block_type {
            0 => inflate_stored(&mut reader, &mut output)?,
            1 => inflate_block_data(
                &mut reader,
                &FIXED_LITERAL_TABLE,
                &FIXED_DISTANCE_TABLE,
                &mut output,
            )?,
            2 => {
                let (literals, distances) = read_dynamic_tables(&mut reader)?;
                inflate_block_data(&mut reader, &literals, &distances, &mut output)?
            }
            _ => return Err(ArchiveError::InvalidBlockType),
        }

        let block_size = output.cursor - block_start;
        trace!(
            "Inflated type {} block of {} bytes (final: {})",
            block_type,
            block_size,
            is_final
        );
        on_block(block_size);

        if is_final {
            break;
        }
    }

    if output.cursor < size {
        warn!(
            "DEFLATE stream ended after {} of {} declared bytes",
            output.cursor, size
        );
    }
    Ok(output.into_inner())
}

/// Block type 0: LEN, NLEN, then LEN raw bytes
fn inflate_stored(reader: &mut BitReader, output: &mut OutputBuffer) -> ArchiveResult<()> {
    reader.align_to_byte();
    let len = reader.read_u16()?;
    let nlen = reader.read_u16()?;
    // Plenty of encoders get away with a bogus NLEN, so don't insist on it.
    if nlen != !len {
        warn!(
            "Stored block NLEN {:#06x} isn't the complement of LEN {:#06x}",
            nlen, len
        );
    }
    output.insert_bytes(reader.read_bytes(len as usize)?)
}

/// Reads the code length header of a type 2 block and builds
/// its literal/length and distance tables.
fn read_dynamic_tables(reader: &mut BitReader) -> ArchiveResult<(HuffmanTable, HuffmanTable)> {
    let literal_count = reader.read_bits(5)? as usize + 257;
    let distance_count = reader.read_bits(5)? as usize + 1;
    let code_length_count = reader.read_bits(4)? as usize + 4;
    debug!(
        "Dynamic block: {} literal/length codes, {} distance codes, {} code length codes",
        literal_count, distance_count, code_length_count
    );

    let mut code_length_lengths = [0u8; 19];
    for &symbol in &CODE_LENGTH_CODE_ORDER[..code_length_count] {
        code_length_lengths[symbol] = reader.read_bits(3)? as u8;
    }
    let code_length_table = HuffmanTable::new(&code_length_lengths)?;

    //  0 - 15: Represent code lengths of 0 - 15
    //      16: Copy the previous code length 3 - 6 times.
    //          The next 2 bits indicate repeat length
    //      17: Repeat a code length of 0 for 3 - 10 times.
    //          (3 bits of length)
    //      18: Repeat a code length of 0 for 11 - 138 times
    //          (7 bits of length)
    let total = literal_count + distance_count;
    let mut lengths: Vec<u8> = Vec::with_capacity(total);
    while lengths.len() < total {
        let (length, repeat) = match code_length_table.decode_symbol(reader)? {
            symbol @ 0..=15 => (symbol as u8, 1),
            16 => {
                let previous = *lengths.last().ok_or(ArchiveError::Corrupt(
                    "code length repeat with no previous length",
                ))?;
                (previous, reader.read_bits(2)? + 3)
            }
            17 => (0, reader.read_bits(3)? + 3),
            18 => (0, reader.read_bits(7)? + 11),
            _ => return Err(ArchiveError::Corrupt("invalid code length symbol")),
        };
        let repeat = repeat as usize;
        if lengths.len() + repeat > total {
            return Err(ArchiveError::Corrupt("code length repeat overruns the table"));
        }
        lengths.resize(lengths.len() + repeat, length);
    }

    let (literal_lengths, distance_lengths) = lengths.split_at(literal_count);
    Ok((
        HuffmanTable::new(literal_lengths)?,
        HuffmanTable::new(distance_lengths)?,
    ))
}

/// Decodes literals and back-references until the end-of-block symbol.
fn inflate_block_data(
    reader: &mut BitReader,
    literals: &HuffmanTable,
    distances: &HuffmanTable,
    output: &mut OutputBuffer,
) -> ArchiveResult<()> {
    loop {
        let symbol = literals.decode_symbol(reader)?;
        match symbol {
            0..=255 => output.insert_byte(symbol as u8)?,
            256 => return Ok(()),
            _ => {
                let (extra_bits, base) = *LENGTH_TABLE
                    .get(symbol as usize - 257)
                    .ok_or(ArchiveError::Corrupt("invalid length symbol"))?;
                let length = base as usize + reader.read_bits(extra_bits)? as usize;

                let distance_symbol = distances.decode_symbol(reader)?;
                let (extra_bits, base) = *DISTANCE_TABLE
                    .get(distance_symbol as usize)
                    .ok_or(ArchiveError::Corrupt("invalid distance symbol"))?;
                let distance = base as usize + reader.read_bits(extra_bits)? as usize;

                output.copy_back_reference(length, distance)?;
            }
        }
    }
}
