//! Fixed-capacity byte buffer for displaced code.

use std::fmt;

/// Up to [`PatchBuffer::CAPACITY`] bytes with an explicit length.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PatchBuffer {
    bytes: [u8; Self::CAPACITY],
    len: usize,
}

impl PatchBuffer {
    pub const CAPACITY: usize = 100;

    pub const fn new() -> Self {
        Self {
            bytes: [0; Self::CAPACITY],
            len: 0,
        }
    }

    /// Copy `src` into a new buffer. `None` if it does not fit.
    pub fn from_slice(src: &[u8]) -> Option<Self> {
        let mut buf = Self::new();
        buf.bytes.get_mut(..src.len())?.copy_from_slice(src);
        buf.len = src.len();
        Some(buf)
    }

    /// Zeroed buffer of `len` bytes, for filling in place.
    pub fn zeroed(len: usize) -> Option<Self> {
        (len <= Self::CAPACITY).then(|| Self {
            bytes: [0; Self::CAPACITY],
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }
}

impl Default for PatchBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PatchBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PatchBuffer[")?;
        for (i, b) in self.as_slice().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{b:02X}")?;
        }
        write!(f, "]")
    }
}
