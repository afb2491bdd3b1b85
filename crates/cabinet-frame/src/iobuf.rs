//! Cursor-tracked byte buffers.
//!
//! [`IoBuf`] is a fixed-capacity sink with a write cursor; [`ConstIoBuf`] is a read cursor over
//! an immutable source. Both uphold `pos <= capacity` at every observation point: a write that
//! does not fit, or a read that would run past the end, fails without moving the cursor.

use core::fmt;

use crate::error::BufferError;

/// Fixed-capacity output buffer with a write cursor.
#[derive(Clone, PartialEq, Eq)]
pub struct IoBuf {
    bytes: Box<[u8]>,
    pos: usize,
}

impl IoBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes written so far.
    pub fn filled(&self) -> &[u8] {
        &self.bytes[..self.pos]
    }

    /// Free space left before the buffer is full.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn is_full(&self) -> bool {
        self.pos == self.bytes.len()
    }

    pub fn clear(&mut self) {
        self.pos = 0;
    }

    /// Rewinds the cursor to `pos`. Never moves it forward.
    pub fn truncate(&mut self, pos: usize) {
        if pos < self.pos {
            self.pos = pos;
        }
    }

    pub fn push(&mut self, byte: u8) -> Result<(), BufferError> {
        if self.pos >= self.bytes.len() {
            return Err(BufferError::Overflow {
                needed: 1,
                available: 0,
            });
        }
        self.bytes[self.pos] = byte;
        self.pos += 1;
        Ok(())
    }

    /// Appends `src` in full, or nothing at all.
    pub fn write(&mut self, src: &[u8]) -> Result<(), BufferError> {
        let available = self.remaining();
        if src.len() > available {
            return Err(BufferError::Overflow {
                needed: src.len(),
                available,
            });
        }
        self.bytes[self.pos..self.pos + src.len()].copy_from_slice(src);
        self.pos += src.len();
        Ok(())
    }

    pub fn write_be_u16(&mut self, value: u16) -> Result<(), BufferError> {
        self.write(&value.to_be_bytes())
    }

    pub fn write_le_u32(&mut self, value: u32) -> Result<(), BufferError> {
        self.write(&value.to_le_bytes())
    }

    /// Discards the first `n` filled bytes, moving the remainder to the front.
    pub fn shift(&mut self, n: usize) {
        let n = n.min(self.pos);
        self.bytes.copy_within(n..self.pos, 0);
        self.pos -= n;
    }

    /// Moves as many filled bytes as fit into `dest`, returning the count moved.
    pub fn move_into(&mut self, dest: &mut IoBuf) -> usize {
        let n = self.pos.min(dest.remaining());
        dest.bytes[dest.pos..dest.pos + n].copy_from_slice(&self.bytes[..n]);
        dest.pos += n;
        self.shift(n);
        n
    }
}

impl fmt::Debug for IoBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBuf")
            .field("pos", &self.pos)
            .field("capacity", &self.bytes.len())
            .field("filled", &HexBytes(self.filled()))
            .finish()
    }
}

/// Read cursor over a byte source.
///
/// The source is generic so request payloads can own their bytes while protocol code walks a
/// borrowed slice of a decode buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct ConstIoBuf<B = Vec<u8>> {
    bytes: B,
    pos: usize,
}

impl<B: AsRef<[u8]>> ConstIoBuf<B> {
    pub fn new(bytes: B) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Total length of the source, independent of the cursor.
    pub fn len(&self) -> usize {
        self.bytes.as_ref().len()
    }

    pub fn remaining(&self) -> usize {
        self.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_ref()
    }

    /// Bytes not yet consumed.
    pub fn unread(&self) -> &[u8] {
        &self.bytes.as_ref()[self.pos..]
    }

    fn check(&self, needed: usize) -> Result<(), BufferError> {
        let available = self.remaining();
        if needed > available {
            return Err(BufferError::InsufficientCapacity { needed, available });
        }
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), BufferError> {
        self.check(n)?;
        self.pos += n;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        self.check(1)?;
        let byte = self.bytes.as_ref()[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_be_u16(&mut self) -> Result<u16, BufferError> {
        let mut raw = [0u8; 2];
        self.read(&mut raw)?;
        Ok(u16::from_be_bytes(raw))
    }

    pub fn read_le_u32(&mut self) -> Result<u32, BufferError> {
        let mut raw = [0u8; 4];
        self.read(&mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Fills `dest` completely, or consumes nothing.
    pub fn read(&mut self, dest: &mut [u8]) -> Result<(), BufferError> {
        self.check(dest.len())?;
        dest.copy_from_slice(&self.bytes.as_ref()[self.pos..self.pos + dest.len()]);
        self.pos += dest.len();
        Ok(())
    }

    /// Consumes bytes up to and including `terminator`, returning them without it.
    pub fn read_until(&mut self, terminator: u8) -> Result<&[u8], BufferError> {
        let start = self.pos;
        let unread = &self.bytes.as_ref()[start..];
        let Some(idx) = unread.iter().position(|&b| b == terminator) else {
            return Err(BufferError::InsufficientCapacity {
                needed: unread.len() + 1,
                available: unread.len(),
            });
        };
        self.pos = start + idx + 1;
        Ok(&self.bytes.as_ref()[start..start + idx])
    }
}

impl<B: AsRef<[u8]>> fmt::Debug for ConstIoBuf<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstIoBuf")
            .field("pos", &self.pos)
            .field("bytes", &HexBytes(self.bytes.as_ref()))
            .finish()
    }
}

impl Default for ConstIoBuf<Vec<u8>> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl From<Vec<u8>> for ConstIoBuf<Vec<u8>> {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for ConstIoBuf<Vec<u8>> {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

/// Formats a byte slice as space-separated hex, used in `Debug` output and trace logs.
#[derive(Clone, Copy)]
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{self}]")
    }
}
