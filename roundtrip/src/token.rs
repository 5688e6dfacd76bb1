// One byte on the wire names both the slot and its fill value.

use std::fmt;
use std::ops::Range;

use crate::error::{Error, Result};
use crate::{CHUNK, SLOT_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Token(pub u8);

impl Token {
    pub const ZERO: Token = Token(0);

    /// Client's reply: (b + 1) mod 256.
    #[inline]
    pub fn next(self) -> Token {
        Token(self.0.wrapping_add(1))
    }

    #[inline]
    pub fn slot(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn fill(self) -> u8 {
        self.0
    }
}

impl From<u8> for Token {
    fn from(b: u8) -> Self {
        Token(b)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Byte range of slot `index` inside the shared region.
pub fn slot_range(index: usize) -> Result<Range<usize>> {
    if index >= SLOT_COUNT {
        return Err(Error::SlotOutOfRange(index));
    }
    let start = index * CHUNK;
    Ok(start..start + CHUNK)
}
