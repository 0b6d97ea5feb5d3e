//! Big-endian cursor over class file bytes

use crate::domain::ClassFormatError;

/// Bounds-checked big-endian reader
///
/// Every read reports the offset it failed at, so a truncated class produces
/// a useful error instead of a panic.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// # Errors
    /// Returns [`ClassFormatError::UnexpectedEof`] if fewer than `n` bytes remain
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ClassFormatError> {
        if self.remaining() < n {
            return Err(ClassFormatError::UnexpectedEof { offset: self.pos, needed: n });
        }
        let data: &'a [u8] = self.data;
        let slice = &data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// # Errors
    /// Returns [`ClassFormatError::UnexpectedEof`] at end of input
    pub fn u8(&mut self) -> Result<u8, ClassFormatError> {
        Ok(self.bytes(1)?[0])
    }

    /// # Errors
    /// Returns [`ClassFormatError::UnexpectedEof`] at end of input
    pub fn u16(&mut self) -> Result<u16, ClassFormatError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// # Errors
    /// Returns [`ClassFormatError::UnexpectedEof`] at end of input
    pub fn u32(&mut self) -> Result<u32, ClassFormatError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// # Errors
    /// Returns [`ClassFormatError::UnexpectedEof`] at end of input
    pub fn u64(&mut self) -> Result<u64, ClassFormatError> {
        let hi = u64::from(self.u32()?);
        let lo = u64::from(self.u32()?);
        Ok((hi << 32) | lo)
    }

    /// Fail unless the whole input was consumed
    ///
    /// # Errors
    /// Returns [`ClassFormatError::TrailingBytes`] naming `what` was being decoded
    pub fn finish(&self, what: &'static str) -> Result<(), ClassFormatError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ClassFormatError::TrailingBytes(n, what)),
        }
    }
}

/// Big-endian append helpers for `Vec<u8>`
pub trait ByteWriter {
    fn put_u8(&mut self, v: u8);
    fn put_u16(&mut self, v: u16);
    fn put_u32(&mut self, v: u32);
    fn put_u64(&mut self, v: u64);
    fn put_bytes(&mut self, v: &[u8]);
}

impl ByteWriter for Vec<u8> {
    fn put_u8(&mut self, v: u8) {
        self.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn put_bytes(&mut self, v: &[u8]) {
        self.extend_from_slice(v);
    }
}

/// Narrow a collection length to a `u16` count field
pub(crate) fn u16_len(len: usize, what: &'static str) -> Result<u16, crate::domain::TransformError> {
    u16::try_from(len).map_err(|_| crate::domain::TransformError::AttributeTooLarge(what))
}
