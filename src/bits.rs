//! A cursor over the archive bytes that reads at byte or bit granularity.
//!
//! Multi-byte numbers are little-endian, like everything in ZIP and RAR.
//! Bits come out least-significant first, the order DEFLATE (RFC 1951 §3.1.1)
//! packs them into bytes, and reads cross byte boundaries transparently.
//! Byte-level reads first discard whatever is left of a partially-read byte.

use crate::result::*;

#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Index of the byte holding the next unread bit
    pos: usize,
    /// How many bits of `data[pos]` were already consumed (0..8)
    bit: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bit: 0,
        }
    }

    /// Byte offset of the reader. A partially-consumed byte counts as unread.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whole bytes left, counting a partially-consumed byte.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn remaining_bits(&self) -> usize {
        self.remaining() * 8 - self.bit as usize
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0
    }

    /// Discards any bits left in the current byte.
    pub fn align_to_byte(&mut self) {
        if self.bit != 0 {
            self.bit = 0;
            self.pos += 1;
        }
    }

    pub fn read_bit(&mut self) -> ArchiveResult<u32> {
        let byte = *self.data.get(self.pos).ok_or(ArchiveError::UnexpectedEof)?;
        let value = (byte as u32 >> self.bit) & 1;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.pos += 1;
        }
        Ok(value)
    }

    /// Reads `n` (up to 32) bits, the first one read landing in the lowest bit.
    ///
    /// On failure nothing is consumed.
    pub fn read_bits(&mut self, n: u32) -> ArchiveResult<u32> {
        debug_assert!(n <= 32);
        if (n as usize) > self.remaining_bits() {
            return Err(ArchiveError::UnexpectedEof);
        }
        let mut value = 0u32;
        for i in 0..n {
            value |= self.read_bit()? << i;
        }
        Ok(value)
    }

    pub fn peek_bits(&self, n: u32) -> ArchiveResult<u32> {
        self.clone().read_bits(n)
    }

    /// Borrows the next `n` bytes from the input.
    pub fn read_bytes(&mut self, n: usize) -> ArchiveResult<&'a [u8]> {
        self.align_to_byte();
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(ArchiveError::UnexpectedEof)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn skip(&mut self, n: usize) -> ArchiveResult<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Reads an `n`-byte (up to 8) little-endian unsigned integer.
    pub fn read_number(&mut self, n: usize) -> ArchiveResult<u64> {
        debug_assert!(n <= std::mem::size_of::<u64>());
        let bytes = self.read_bytes(n)?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64))
    }

    pub fn peek_number(&self, n: usize) -> ArchiveResult<u64> {
        self.clone().read_number(n)
    }

    pub fn read_u8(&mut self) -> ArchiveResult<u8> {
        Ok(self.read_number(1)? as u8)
    }

    pub fn read_u16(&mut self) -> ArchiveResult<u16> {
        Ok(self.read_number(2)? as u16)
    }

    pub fn read_u32(&mut self) -> ArchiveResult<u32> {
        Ok(self.read_number(4)? as u32)
    }

    pub fn peek_u32(&self) -> ArchiveResult<u32> {
        Ok(self.peek_number(4)? as u32)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numbers_are_little_endian() {
        let data = [0x50, 0x4b, 0x03, 0x04, 0x0a, 0x00];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.peek_u32().unwrap(), 0x04034b50);
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_u32().unwrap(), 0x04034b50);
        assert_eq!(reader.read_u16().unwrap(), 10);
        assert!(reader.is_empty());
        assert_eq!(reader.read_u8(), Err(ArchiveError::UnexpectedEof));
    }

    #[test]
    fn bits_come_out_lsb_first() {
        let data = [0b1011_0100, 0b1100_1010];
        let mut reader = BitReader::new(&data);

        assert_eq!(reader.read_bit().unwrap(), 0);
        assert_eq!(reader.read_bits(3).unwrap(), 0b010);
        assert_eq!(reader.peek_bits(4).unwrap(), 0b1011);
        // Crosses into the second byte
        assert_eq!(reader.read_bits(8).unwrap(), 0b1010_1011);
        assert_eq!(reader.read_bits(4).unwrap(), 0b1100);
        assert!(reader.is_empty());
    }

    #[test]
    fn byte_reads_align() {
        let data = [0xff, b'h', b'i'];
        let mut reader = BitReader::new(&data);
        reader.read_bits(3).unwrap();
        assert_eq!(reader.read_bytes(2).unwrap(), b"hi");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn failed_reads_consume_nothing() {
        let data = [0xaa];
        let mut reader = BitReader::new(&data);
        reader.read_bits(4).unwrap();
        assert_eq!(reader.read_bits(5), Err(ArchiveError::UnexpectedEof));
        assert_eq!(reader.read_bits(4).unwrap(), 0b1010);
        assert_eq!(reader.read_bytes(1), Err(ArchiveError::UnexpectedEof));
    }
}
