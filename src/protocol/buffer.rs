//! Packet buffer implementation
//!
//! Provides a byte buffer with UO-specific read/write operations including:
//! - Big-endian integer types (the protocol's native order)
//! - Signed coordinate fields (byte-sized z values)
//! - Fixed-width zero-padded strings (names, credentials)
//! - Raw byte access for opaque packet tails

use bytes::{BufMut, Bytes, BytesMut};

/// Maximum packet size accepted on either link (64KB)
pub const MAX_PACKET_SIZE: usize = 65535;

/// Packet buffer for reading and writing game protocol data
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    /// Internal byte buffer
    data: BytesMut,
    /// Current read position
    read_pos: usize,
}

impl PacketBuffer {
    /// Create a new empty packet buffer
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
            read_pos: 0,
        }
    }

    /// Create a packet buffer with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Create a packet buffer from existing bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
        }
    }

    // ============ Properties ============

    /// Get the current read position
    #[inline]
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Get the total length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    /// Check if there are bytes remaining to read
    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Get a reference to the underlying bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the buffer into an immutable frame
    #[inline]
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Reset read position to start
    pub fn reset(&mut self) {
        self.read_pos = 0;
    }

    /// Skip a number of bytes when reading
    pub fn skip(&mut self, count: usize) {
        self.read_pos = (self.read_pos + count).min(self.data.len());
    }

    // ============ Reading Methods ============

    /// Read an unsigned byte
    pub fn read_u8(&mut self) -> u8 {
        if self.read_pos >= self.data.len() {
            return 0;
        }
        let value = self.data[self.read_pos];
        self.read_pos += 1;
        value
    }

    /// Read a signed byte
    pub fn read_i8(&mut self) -> i8 {
        self.read_u8() as i8
    }

    /// Read an unsigned big-endian short (2 bytes)
    pub fn read_u16(&mut self) -> u16 {
        let b1 = self.read_u8() as u16;
        let b2 = self.read_u8() as u16;
        (b1 << 8) | b2
    }

    /// Read a signed big-endian short (2 bytes)
    pub fn read_i16(&mut self) -> i16 {
        self.read_u16() as i16
    }

    /// Read an unsigned big-endian int (4 bytes)
    pub fn read_u32(&mut self) -> u32 {
        let b1 = self.read_u8() as u32;
        let b2 = self.read_u8() as u32;
        let b3 = self.read_u8() as u32;
        let b4 = self.read_u8() as u32;
        (b1 << 24) | (b2 << 16) | (b3 << 8) | b4
    }

    /// Peek at the next unsigned byte without advancing position
    pub fn peek_u8(&self) -> u8 {
        if self.read_pos >= self.data.len() {
            return 0;
        }
        self.data[self.read_pos]
    }

    /// Read a fixed-width zero-padded string field
    pub fn read_string_fixed(&mut self, width: usize) -> String {
        let bytes = self.read_bytes(width);
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    /// Read a null-terminated string
    pub fn read_string(&mut self) -> String {
        let mut bytes = Vec::new();
        while self.has_remaining() {
            let b = self.read_u8();
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Read a specific number of bytes
    pub fn read_bytes(&mut self, length: usize) -> Vec<u8> {
        let end = (self.read_pos + length).min(self.data.len());
        let bytes = self.data[self.read_pos..end].to_vec();
        self.read_pos = end;
        bytes
    }

    /// Read all remaining bytes as an owned frame
    pub fn read_remaining(&mut self) -> Bytes {
        let bytes = Bytes::copy_from_slice(&self.data[self.read_pos..]);
        self.read_pos = self.data.len();
        bytes
    }

    // ============ Writing Methods ============

    /// Write an unsigned byte
    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    /// Write a signed byte
    pub fn write_i8(&mut self, value: i8) {
        self.data.put_i8(value);
    }

    /// Write an unsigned big-endian short (2 bytes)
    pub fn write_u16(&mut self, value: u16) {
        self.data.put_u16(value);
    }

    /// Write a signed big-endian short (2 bytes)
    pub fn write_i16(&mut self, value: i16) {
        self.data.put_i16(value);
    }

    /// Write an unsigned big-endian int (4 bytes)
    pub fn write_u32(&mut self, value: u32) {
        self.data.put_u32(value);
    }

    /// Write a fixed-width string field, zero-padded or truncated to `width`
    pub fn write_string_fixed(&mut self, value: &str, width: usize) {
        let bytes = value.as_bytes();
        let copy = bytes.len().min(width);
        self.data.extend_from_slice(&bytes[..copy]);
        for _ in copy..width {
            self.data.put_u8(0);
        }
    }

    /// Write a null-terminated string
    pub fn write_string(&mut self, value: &str) {
        self.data.extend_from_slice(value.as_bytes());
        self.data.put_u8(0);
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Patch a previously written big-endian short (used for length fields)
    pub fn patch_u16(&mut self, pos: usize, value: u16) {
        self.data[pos] = (value >> 8) as u8;
        self.data[pos + 1] = value as u8;
    }
}

impl From<&[u8]> for PacketBuffer {
    fn from(slice: &[u8]) -> Self {
        Self::from_bytes(slice)
    }
}

impl AsRef<[u8]> for PacketBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_read_write() {
        let mut buf = PacketBuffer::new();

        buf.write_u8(0x78);
        buf.write_u16(0x1234);
        buf.write_u32(0xdeadbeef);
        buf.write_i8(-5);
        buf.write_i16(-300);

        buf.reset();

        assert_eq!(buf.read_u8(), 0x78);
        assert_eq!(buf.read_u16(), 0x1234);
        assert_eq!(buf.read_u32(), 0xdeadbeef);
        assert_eq!(buf.read_i8(), -5);
        assert_eq!(buf.read_i16(), -300);
    }

    #[test]
    fn test_big_endian_layout() {
        let mut buf = PacketBuffer::new();
        buf.write_u16(0x1234);
        buf.write_u32(0x40000100);

        assert_eq!(buf.as_bytes(), &[0x12, 0x34, 0x40, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_read_past_end_yields_zero() {
        let mut buf = PacketBuffer::from_bytes(&[0xab]);
        assert_eq!(buf.read_u8(), 0xab);
        assert_eq!(buf.read_u8(), 0);
        assert_eq!(buf.read_u32(), 0);
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_fixed_string_padding() {
        let mut buf = PacketBuffer::new();
        buf.write_string_fixed("hello", 8);
        assert_eq!(buf.len(), 8);

        buf.reset();
        assert_eq!(buf.read_string_fixed(8), "hello");
    }

    #[test]
    fn test_fixed_string_truncation() {
        let mut buf = PacketBuffer::new();
        buf.write_string_fixed("overlong-name", 5);
        assert_eq!(buf.len(), 5);

        buf.reset();
        assert_eq!(buf.read_string_fixed(5), "overl");
    }

    #[test]
    fn test_null_terminated_string() {
        let mut buf = PacketBuffer::new();
        buf.write_string("uogate");
        buf.write_u8(0xff);

        buf.reset();
        assert_eq!(buf.read_string(), "uogate");
        assert_eq!(buf.read_u8(), 0xff);
    }

    #[test]
    fn test_patch_u16() {
        let mut buf = PacketBuffer::new();
        buf.write_u8(0x3c);
        buf.write_u16(0); // placeholder length
        buf.write_u32(0x40000000);
        buf.patch_u16(1, buf.len() as u16);

        buf.reset();
        assert_eq!(buf.read_u8(), 0x3c);
        assert_eq!(buf.read_u16(), 7);
    }

    #[test]
    fn test_remaining() {
        let mut buf = PacketBuffer::new();
        buf.write_u32(12345);

        buf.reset();
        assert_eq!(buf.remaining(), 4);

        buf.read_u16();
        assert_eq!(buf.remaining(), 2);

        let tail = buf.read_remaining();
        assert_eq!(tail.len(), 2);
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_skip_clamps() {
        let mut buf = PacketBuffer::from_bytes(&[1, 2, 3]);
        buf.skip(10);
        assert_eq!(buf.remaining(), 0);
    }
}
