use crate::der::tag::Tag;
use crate::error::{Error, Result};
use std::io::{Cursor, Read};

/// Cursor over an immutable byte slice with mark/reset.
///
/// A buffer is owned by exactly one decode at a time; sub-buffers handed to
/// handlers borrow the same bytes but carry their own position.
#[derive(Debug, Clone)]
pub struct Buffer<'a> {
    cursor: Cursor<&'a [u8]>,
    mark: Option<u64>,
}

impl<'a> Buffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            mark: None,
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    /// Total number of bytes, independent of position.
    pub fn limit(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn remaining(&self) -> usize {
        self.limit().saturating_sub(self.position())
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    pub fn mark(&mut self) {
        self.mark = Some(self.cursor.position());
    }

    /// Return to the last mark, or to the start when no mark was set.
    pub fn reset(&mut self) {
        self.cursor.set_position(self.mark.unwrap_or(0));
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.cursor.get_ref().get(self.position()).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| Error::decode("buffer underflow"))?;
        Ok(buf[0])
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::decode(format!(
                "truncated: need {} bytes, {} remaining",
                n,
                self.remaining()
            )));
        }
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.position();
        self.cursor.set_position((start + n) as u64);
        Ok(&data[start..start + n])
    }

    /// Everything from the current position to the end; advances to the end.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.position().min(data.len());
        self.cursor.set_position(data.len() as u64);
        &data[start..]
    }

    /// Split off the next `n` bytes as an independent buffer and advance past them.
    pub fn sub_buffer(&mut self, n: usize) -> Result<Buffer<'a>> {
        Ok(Buffer::new(self.read_bytes(n)?))
    }

    pub fn read_tag(&mut self) -> Result<Tag> {
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.position().min(data.len());
        let (tag, used) = Tag::decode_from(&data[start..])?;
        self.cursor.set_position((start + used) as u64);
        Ok(tag)
    }

    /// Read a definite length (short or long form). The length must fit in what remains.
    pub fn read_length(&mut self) -> Result<usize> {
        let first_byte = self.read_u8()?;
        let length = if (first_byte & 0x80) == 0 {
            first_byte as usize
        } else {
            let length_bytes = (first_byte & 0x7F) as usize;
            if length_bytes == 0 {
                return Err(Error::decode("indefinite length not supported"));
            }
            if length_bytes > 4 {
                return Err(Error::decode(format!("length too large: {} bytes", length_bytes)));
            }
            let mut length = 0usize;
            for b in self.read_bytes(length_bytes)? {
                length = (length << 8) | *b as usize;
            }
            length
        };
        if length > self.remaining() {
            return Err(Error::decode(format!(
                "length {} overruns container ({} remaining)",
                length,
                self.remaining()
            )));
        }
        Ok(length)
    }

    /// Read one tag-length header and return the tag with a buffer over its content.
    pub fn read_tlv(&mut self) -> Result<(Tag, Buffer<'a>)> {
        let tag = self.read_tag()?;
        let len = self.read_length()?;
        Ok((tag, self.sub_buffer(len)?))
    }

    /// Read a TLV whose tag must equal `expected`, returning its content bytes.
    pub fn read_expected(&mut self, expected: Tag) -> Result<&'a [u8]> {
        let tag = self.read_tag()?;
        if tag != expected {
            return Err(Error::decode(format!("expected {}, got {}", expected, tag)));
        }
        let len = self.read_length()?;
        self.read_bytes(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_length() {
        let data = [0x04, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let mut buf = Buffer::new(&data);
        let (tag, mut content) = buf.read_tlv().unwrap();
        assert_eq!(tag, Tag::OCTET_STRING);
        assert_eq!(content.read_remaining(), b"hello");
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_long_length() {
        let mut data = vec![0x04, 0x81, 0x80];
        data.extend(std::iter::repeat(0xAB).take(128));
        let mut buf = Buffer::new(&data);
        assert_eq!(buf.read_tag().unwrap(), Tag::OCTET_STRING);
        assert_eq!(buf.read_length().unwrap(), 128);
    }

    #[test]
    fn test_indefinite_length_rejected() {
        let data = [0x30, 0x80, 0x00, 0x00];
        let mut buf = Buffer::new(&data);
        buf.read_tag().unwrap();
        assert!(buf.read_length().is_err());
    }

    #[test]
    fn test_length_overrun_rejected() {
        let data = [0x04, 0x05, b'h', b'i'];
        let mut buf = Buffer::new(&data);
        assert!(buf.read_tlv().is_err());
    }

    #[test]
    fn test_mark_reset() {
        let data = [1, 2, 3, 4];
        let mut buf = Buffer::new(&data);
        buf.read_u8().unwrap();
        buf.mark();
        buf.read_bytes(2).unwrap();
        assert_eq!(buf.remaining(), 1);
        buf.reset();
        assert_eq!(buf.position(), 1);
        assert_eq!(buf.peek_u8(), Some(2));
    }

    #[test]
    fn test_underflow() {
        let mut buf = Buffer::new(&[]);
        assert!(buf.read_u8().is_err());
        assert!(buf.read_bytes(1).is_err());
        assert!(buf.read_remaining().is_empty());
    }
}
