//! Bit-granular packing into a fixed scratch buffer.
//!
//! The firmware protocol packs heterogeneous fields (3-bit counts, 7-bit
//! addresses, variable-width encoder deltas) back to back with no padding,
//! least-significant-bit first within each byte. [`BitWriter`] and
//! [`BitReader`] are the two halves of that discipline.

use snafu::Snafu;

/// Size of the scratch buffer every message is packed into. The length
/// byte of a frame is 8 bits, so no message can exceed this anyway.
pub const PACK_BUFFER_SIZE: usize = 256;

/// Widest single field the protocol ever uses (32-bit encoder offsets).
pub const MAX_FIELD_WIDTH: u32 = 32;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum PackError {
    /// A field width outside `1..=32` is a bug in the caller, not a
    /// condition the wire can produce.
    #[snafu(display("field width {width} outside 1..={MAX_FIELD_WIDTH}"))]
    InvalidFieldWidth { width: u32 },

    #[snafu(display("packed message exceeds {PACK_BUFFER_SIZE} bytes"))]
    BufferOverflow,

    #[snafu(display("read past the end of a {len}-byte payload"))]
    UnexpectedEnd { len: usize },
}

/// Appends values of arbitrary bit width to a scratch buffer.
///
/// The cursor starts at bit 0; byte-aligned 8-bit appends therefore behave
/// exactly like pushing plain bytes, which is how the fixed prefix of each
/// payload is written.
pub struct BitWriter {
    buf: [u8; PACK_BUFFER_SIZE],
    cursor: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            buf: [0; PACK_BUFFER_SIZE],
            cursor: 0,
        }
    }

    /// Appends the low `width` bits of `value`, LSB first, splitting across
    /// byte boundaries as needed.
    pub fn add_bits(&mut self, width: u32, value: u32) -> Result<(), PackError> {
        if width == 0 || width > MAX_FIELD_WIDTH {
            return InvalidFieldWidthSnafu { width }.fail();
        }
        if self.cursor + width as usize > PACK_BUFFER_SIZE * 8 {
            return BufferOverflowSnafu.fail();
        }
        for i in 0..width {
            if value >> i & 1 != 0 {
                let bit = self.cursor + i as usize;
                self.buf[bit / 8] |= 1 << (bit % 8);
            }
        }
        self.cursor += width as usize;
        Ok(())
    }

    /// Convenience for the byte-aligned prefix fields.
    pub fn add_byte(&mut self, value: u8) -> Result<(), PackError> {
        self.add_bits(8, u32::from(value))
    }

    /// Bytes consumed so far: `ceil(cursor / 8)`.
    pub fn byte_len(&self) -> usize {
        self.cursor.div_ceil(8)
    }

    pub fn bit_len(&self) -> usize {
        self.cursor
    }

    /// The packed payload, trailing partial byte included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.byte_len()]
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// The decoding counterpart of [`BitWriter`], advancing a bit cursor over a
/// received payload.
pub struct BitReader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    /// Reads `width` bits, LSB first, and advances the cursor.
    pub fn read_bits(&mut self, width: u32) -> Result<u32, PackError> {
        if width == 0 || width > MAX_FIELD_WIDTH {
            return InvalidFieldWidthSnafu { width }.fail();
        }
        if self.cursor + width as usize > self.data.len() * 8 {
            return UnexpectedEndSnafu {
                len: self.data.len(),
            }
            .fail();
        }
        let mut value = 0u32;
        for i in 0..width {
            let bit = self.cursor + i as usize;
            if self.data[bit / 8] >> (bit % 8) & 1 != 0 {
                value |= 1 << i;
            }
        }
        self.cursor += width as usize;
        Ok(value)
    }

    pub fn read_byte(&mut self) -> Result<u8, PackError> {
        Ok(self.read_bits(8)? as u8)
    }
}
