/// DVI Byte Cursor - bounds-checked big-endian reading over a byte slice.
///
/// Reads past the limit yield the EOP opcode (140) instead of failing:
/// virtual-font macros legitimately lack a terminating marker and rely
/// on this safety net to fall out of the interpreter loop.

use crate::dvi::opcodes::EOP;

#[derive(Debug)]
pub struct DviCursor<'a> {
    data: &'a [u8],
    pos: usize,
    limit: usize,
}

impl<'a> DviCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            limit: data.len(),
        }
    }

    pub fn from_offset(data: &'a [u8], offset: usize) -> Self {
        Self {
            data,
            pos: offset.min(data.len()),
            limit: data.len(),
        }
    }

    /// Cursor over `data[offset..offset+len]`, clamped to the buffer.
    pub fn with_limit(data: &'a [u8], offset: usize, len: usize) -> Self {
        let start = offset.min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Self {
            data,
            pos: start,
            limit: end,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos.min(self.limit);
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.limit
    }

    pub fn read_u8(&mut self) -> u8 {
        if self.pos >= self.limit {
            return EOP;
        }
        let val = self.data[self.pos];
        self.pos += 1;
        val
    }

    /// Read `n` bytes (1..=4) as a big-endian unsigned value.
    pub fn read_unsigned(&mut self, n: usize) -> u32 {
        debug_assert!(n >= 1 && n <= 4);
        let mut val: u32 = 0;
        for _ in 0..n {
            val = (val << 8) | self.read_u8() as u32;
        }
        val
    }

    /// Read `n` bytes (1..=4) as a big-endian signed value,
    /// sign-extending from the first byte read.
    pub fn read_signed(&mut self, n: usize) -> i32 {
        debug_assert!(n >= 1 && n <= 4);
        let mut val: i32 = self.read_u8() as i8 as i32;
        for _ in 1..n {
            val = (val << 8) | self.read_u8() as i32;
        }
        val
    }

    pub fn read_u16(&mut self) -> u16 {
        self.read_unsigned(2) as u16
    }

    pub fn read_u24(&mut self) -> u32 {
        self.read_unsigned(3)
    }

    pub fn read_u32(&mut self) -> u32 {
        self.read_unsigned(4)
    }

    pub fn read_i32(&mut self) -> i32 {
        self.read_signed(4)
    }

    /// Read up to `n` bytes; the slice is shorter when the limit cuts in.
    pub fn read_bytes(&mut self, n: usize) -> &'a [u8] {
        let end = self.pos.saturating_add(n).min(self.limit);
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        bytes
    }

    pub fn read_string(&mut self, len: usize) -> String {
        String::from_utf8_lossy(self.read_bytes(len)).to_string()
    }

    pub fn skip(&mut self, n: usize) {
        self.pos = self.pos.saturating_add(n).min(self.limit);
    }
}

/// Big-endian u32 store into `buf` at `offset`; a no-op when the four
/// bytes do not fit.
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    if offset.checked_add(4).map_or(true, |end| end > buf.len()) {
        return;
    }
    buf[offset] = (value >> 24) as u8;
    buf[offset + 1] = (value >> 16) as u8;
    buf[offset + 2] = (value >> 8) as u8;
    buf[offset + 3] = value as u8;
}
