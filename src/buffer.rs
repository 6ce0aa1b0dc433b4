use heapless::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    /// Not enough free capacity; nothing was written.
    Overflow,
    /// Not enough unread bytes; nothing was consumed.
    Underflow,
}

/// Fixed-capacity byte buffer with a read cursor.
///
/// Bytes are appended at the end and consumed from the front. Multi-byte
/// values are stored little-endian, floats as their raw bit pattern.
/// The same type backs both the TX and the RX side of the driver.
pub struct ByteBuffer<const BUFSIZE: usize> {
    buf: Vec<u8, BUFSIZE>,
    pos: usize,
}

impl<const BUFSIZE: usize> ByteBuffer<BUFSIZE> {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        BUFSIZE
    }

    /// Bytes written since the last reset.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.is_full()
    }

    /// Free capacity left for writing.
    pub fn free(&self) -> usize {
        BUFSIZE - self.buf.len()
    }

    /// Bytes written but not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Bytes consumed since the last reset or rewind.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    /// Moves the read cursor back to the first byte, keeping the contents.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> Result<(), BufferError> {
        if data.len() > self.free() {
            return Err(BufferError::Overflow);
        }
        self.buf
            .extend_from_slice(data)
            .map_err(|_| BufferError::Overflow)
    }

    pub fn push_u8(&mut self, value: u8) -> Result<(), BufferError> {
        self.buf.push(value).map_err(|_| BufferError::Overflow)
    }

    pub fn push_u16(&mut self, value: u16) -> Result<(), BufferError> {
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_u32(&mut self, value: u32) -> Result<(), BufferError> {
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_f32(&mut self, value: f32) -> Result<(), BufferError> {
        self.push_bytes(&value.to_bits().to_le_bytes())
    }

    /// Takes the next byte, if any.
    pub fn pop(&mut self) -> Option<u8> {
        let byte = self.buf.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }

    pub fn pop_bytes(&mut self, dest: &mut [u8]) -> Result<(), BufferError> {
        if dest.len() > self.remaining() {
            return Err(BufferError::Underflow);
        }
        let end = self.pos + dest.len();
        dest.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    pub fn pop_u8(&mut self) -> Result<u8, BufferError> {
        self.pop().ok_or(BufferError::Underflow)
    }

    pub fn pop_u16(&mut self) -> Result<u16, BufferError> {
        self.pop_array().map(u16::from_le_bytes)
    }

    pub fn pop_u32(&mut self) -> Result<u32, BufferError> {
        self.pop_array().map(u32::from_le_bytes)
    }

    pub fn pop_f32(&mut self) -> Result<f32, BufferError> {
        self.pop_array()
            .map(|bytes| f32::from_bits(u32::from_le_bytes(bytes)))
    }

    fn pop_array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        let mut bytes = [0u8; N];
        self.pop_bytes(&mut bytes)?;
        Ok(bytes)
    }
}

impl<const BUFSIZE: usize> Default for ByteBuffer<BUFSIZE> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_come_back_unchanged() {
        let mut buf = ByteBuffer::<32>::new();
        for value in [0u16, 1, 0x1234, u16::MAX] {
            buf.push_u16(value).unwrap();
            assert_eq!(buf.pop_u16(), Ok(value));
        }
        for value in [0u32, 1, 0xDEAD_BEEF, u32::MAX] {
            buf.push_u32(value).unwrap();
            assert_eq!(buf.pop_u32(), Ok(value));
        }
        for value in [0u8, 0x7F, u8::MAX] {
            buf.push_u8(value).unwrap();
            assert_eq!(buf.pop_u8(), Ok(value));
        }
    }

    #[test]
    fn floats_are_copied_bit_for_bit() {
        let mut buf = ByteBuffer::<16>::new();
        let nan = f32::from_bits(0x7FC0_0001);
        buf.push_f32(1.0).unwrap();
        buf.push_f32(-0.0).unwrap();
        buf.push_f32(nan).unwrap();

        assert_eq!(buf.as_slice()[..4], [0x00, 0x00, 0x80, 0x3F]);
        assert_eq!(buf.pop_f32(), Ok(1.0));
        assert_eq!(buf.pop_f32().unwrap().to_bits(), (-0.0f32).to_bits());
        assert_eq!(buf.pop_f32().unwrap().to_bits(), nan.to_bits());
    }

    #[test]
    fn values_are_stored_little_endian() {
        let mut buf = ByteBuffer::<8>::new();
        buf.push_u16(0x0102).unwrap();
        buf.push_u32(0x0304_0506).unwrap();
        assert_eq!(buf.as_slice(), &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn overflow_writes_nothing() {
        let mut buf = ByteBuffer::<5>::new();
        buf.push_u16(0xAAAA).unwrap();
        assert_eq!(buf.push_u32(0x1122_3344), Err(BufferError::Overflow));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.push_bytes(&[1, 2, 3, 4]), Err(BufferError::Overflow));
        assert_eq!(buf.len(), 2);

        buf.push_bytes(&[1, 2, 3]).unwrap();
        assert!(buf.is_full());
        assert_eq!(buf.push_u8(9), Err(BufferError::Overflow));
        assert_eq!(buf.as_slice(), &[0xAA, 0xAA, 1, 2, 3]);
    }

    #[test]
    fn underflow_keeps_cursor() {
        let mut buf = ByteBuffer::<8>::new();
        buf.push_bytes(&[1, 2, 3]).unwrap();

        assert_eq!(buf.pop_u32(), Err(BufferError::Underflow));
        assert_eq!(buf.consumed(), 0);
        assert_eq!(buf.pop_u16(), Ok(0x0201));
        assert_eq!(buf.pop_u16(), Err(BufferError::Underflow));
        assert_eq!(buf.pop_u8(), Ok(3));
        assert_eq!(buf.pop_u8(), Err(BufferError::Underflow));
        assert_eq!(buf.pop(), None);
        assert_eq!(buf.consumed(), 3);
    }

    #[test]
    fn raw_bytes_in_and_out() {
        let mut buf = ByteBuffer::<8>::new();
        buf.push_bytes(&[9, 8, 7, 6]).unwrap();

        let mut out = [0u8; 3];
        buf.pop_bytes(&mut out).unwrap();
        assert_eq!(out, [9, 8, 7]);

        let mut too_long = [0u8; 2];
        assert_eq!(buf.pop_bytes(&mut too_long), Err(BufferError::Underflow));
        assert_eq!(too_long, [0, 0]);
        assert_eq!(buf.remaining(), 1);
    }

    #[test]
    fn reset_and_rewind() {
        let mut buf = ByteBuffer::<4>::new();
        buf.push_bytes(&[1, 2]).unwrap();
        assert_eq!(buf.pop(), Some(1));

        buf.rewind();
        assert_eq!(buf.remaining(), 2);
        assert_eq!(buf.pop(), Some(1));

        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.free(), 4);
        assert_eq!(buf.pop(), None);
    }
}
