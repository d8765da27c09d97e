//! Canonical Huffman tables, as described in RFC 1951 §3.2.2.
//!
//! A table is derived entirely from a list of per-symbol code lengths:
//! codes of the same length are handed out in ascending symbol order,
//! and every code of length `L` sorts before all codes of length `L + 1`.

use log::*;
use once_cell::sync::Lazy;

use crate::bits::BitReader;
use crate::result::*;

/// DEFLATE never uses codes longer than 15 bits.
pub const MAX_CODE_LENGTH: usize = 15;

/// The fixed literal/length table used by block type 1.
pub static FIXED_LITERAL_TABLE: Lazy<HuffmanTable> = Lazy::new(|| {
    //    Lit Value    Bits        Codes
    //    ---------    ----        -----
    //      0 - 143     8          00110000 through
    //                             10111111
    //    144 - 255     9          110010000 through
    //                             111111111
    //    256 - 279     7          0000000 through
    //                             0010111
    //    280 - 287     8          11000000 through
    //                             11000111
    let mut lengths = [0u8; 288];
    lengths[0..=143].fill(8);
    lengths[144..=255].fill(9);
    lengths[256..=279].fill(7);
    lengths[280..=287].fill(8);
    HuffmanTable::new(&lengths).expect("fixed literal/length code lengths are valid")
});

/// The fixed distance table used by block type 1: 32 five-bit codes.
pub static FIXED_DISTANCE_TABLE: Lazy<HuffmanTable> =
    Lazy::new(|| HuffmanTable::new(&[5u8; 32]).expect("fixed distance code lengths are valid"));

/// Maps (code, code length) pairs to symbols.
///
/// Rather than storing every code, we store the first code of each length
/// and the symbols in canonical order; the codes of one length are contiguous,
/// so a lookup is just a subtraction and a bounds check.
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    /// How many symbols have a code of each length
    counts: [u16; MAX_CODE_LENGTH + 1],
    /// The numerically smallest code of each length
    first_code: [u32; MAX_CODE_LENGTH + 1],
    /// Where the codes of each length start in `symbols`
    first_index: [u16; MAX_CODE_LENGTH + 1],
    /// Symbols sorted by (code length, code)
    symbols: Vec<u16>,
    /// How many (code, symbol) pairs were assigned
    entry_count: usize,
    /// The longest assigned code
    max_length: usize,
}

impl HuffmanTable {
    /// Builds the canonical code for the given lengths,
    /// where `lengths[symbol]` is the code length of `symbol`
    /// and zero means the symbol isn't used.
    pub fn new(lengths: &[u8]) -> ArchiveResult<Self> {
        if lengths.is_empty() {
            return Err(ArchiveError::InvalidInput("no code lengths given"));
        }
        if lengths.len() > u16::MAX as usize {
            return Err(ArchiveError::InvalidInput("too many symbols"));
        }
        if lengths.iter().any(|&l| l as usize > MAX_CODE_LENGTH) {
            return Err(ArchiveError::InvalidInput("code length longer than 15 bits"));
        }

        // 1) Count the number of codes for each code length.
        //    Zero-length (unused) symbols don't participate.
        let mut counts = [0u16; MAX_CODE_LENGTH + 1];
        for &length in lengths.iter().filter(|&&l| l > 0) {
            counts[length as usize] += 1;
        }
        let max_length = (1..=MAX_CODE_LENGTH)
            .rev()
            .find(|&l| counts[l] > 0)
            .unwrap_or(0);

        // 2) Find the numerical value of the smallest code for each code length.
        let mut first_code = [0u32; MAX_CODE_LENGTH + 1];
        let mut first_index = [0u16; MAX_CODE_LENGTH + 1];
        let mut code = 0u32;
        let mut index = 0u16;
        for bits in 1..=MAX_CODE_LENGTH {
            code = (code + counts[bits - 1] as u32) << 1;
            first_code[bits] = code;
            first_index[bits] = index;
            index += counts[bits];
        }

        // 3) Assign codes to symbols, in ascending symbol order within each length.
        let mut next_index = first_index;
        let mut symbols = vec![0u16; index as usize];
        for (symbol, &length) in lengths.iter().enumerate().filter(|&(_, &l)| l > 0) {
            let slot = &mut next_index[length as usize];
            symbols[*slot as usize] = symbol as u16;
            *slot += 1;
        }

        let entry_count = symbols.len();
        trace!(
            "Built Huffman table: {} codes over {} symbols, longest {} bits",
            entry_count,
            lengths.len(),
            max_length
        );
        Ok(Self {
            counts,
            first_code,
            first_index,
            symbols,
            entry_count,
            max_length,
        })
    }

    /// Returns the symbol whose code is the low `length` bits of `code`, if any.
    pub fn lookup(&self, code: u32, length: usize) -> Option<u16> {
        if length == 0 || length > MAX_CODE_LENGTH {
            return None;
        }
        let offset = code.wrapping_sub(self.first_code[length]);
        if offset < self.counts[length] as u32 {
            Some(self.symbols[self.first_index[length] as usize + offset as usize])
        } else {
            None
        }
    }

    /// The number of symbols that were assigned a code.
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// The length of the longest assigned code.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// How many bits `decode_symbol()` reads, plus one, before giving up.
    ///
    /// This is the entry count, not the longest code.
    /// A complete code of n entries never needs more than n - 1 bits,
    /// and a lone code needs one, so only lopsided incomplete codes
    /// (one 1-bit code and one 5-bit code, say) run past it.
    pub fn scan_bound(&self) -> usize {
        self.entry_count
    }

    /// Reads one bit at a time, most significant bit of the code first,
    /// until the bits read so far form a code in this table.
    pub fn decode_symbol(&self, reader: &mut BitReader) -> ArchiveResult<u16> {
        let bound = self.scan_bound();
        let mut code = 0u32;
        let mut length = 0usize;
        loop {
            code = (code << 1) | reader.read_bit()?;
            length += 1;

            if let Some(symbol) = self.lookup(code, length) {
                return Ok(symbol);
            }
            if length > bound {
                return Err(ArchiveError::StreamDesync { length, bound });
            }
        }
    }
}
