//! Low-level byte stream parser shared by every decoder in the crate.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a cursor-based binary data
//! parser used to read IL2CPP metadata tables, web data containers, static memory images and
//! WebAssembly sections. It offers bounds-checked access with little-endian and big-endian
//! fixed-width reads, string reads and LEB128 decoding.
//!
//! # Navigation Methods
//! - [`crate::file::parser::Parser::seek`] - Move to specific position
//! - [`crate::file::parser::Parser::advance_by`] - Move forward by specified bytes
//! - [`crate::file::parser::Parser::pos`] - Get current position
//!
//! # Data Access Methods
//! - [`crate::file::parser::Parser::read_le`] - Read primitive types (little-endian)
//! - [`crate::file::parser::Parser::read_be`] - Read primitive types (big-endian)
//! - [`crate::file::parser::Parser::read_bytes`] - Borrow the next `n` bytes
//! - [`crate::file::parser::Parser::read_string_null`] - Null-terminated UTF-8 strings
//! - [`crate::file::parser::Parser::read_prefixed_string`] - u32 length-prefixed UTF-8 strings
//! - [`crate::file::parser::Parser::read_uleb128`] - Unsigned LEB128 integers
//!
//! # Usage Examples
//!
//! ```rust
//! use webmodkit::Parser;
//!
//! let data = [0x01, 0x02, 0x03, 0x04, 0xE5, 0x8E, 0x26, b'h', b'i', 0x00];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_le::<u32>()?, 0x04030201);
//! assert_eq!(parser.read_uleb128()?, 624_485);
//! assert_eq!(parser.read_string_null()?, "hi");
//! assert!(!parser.has_more_data());
//! # Ok::<(), webmodkit::Error>(())
//! ```

use crate::{
    file::io::{read_be_at, read_le_at, BinIO},
    Result,
};

/// A generic binary data parser with an internal position cursor.
///
/// `Parser` borrows its input and never copies unless a method returns an owned value
/// (strings). All reads validate data availability, so truncated input surfaces as
/// [`crate::Error::OutOfBounds`] instead of a panic.
///
/// # Examples
///
/// ```rust
/// use webmodkit::Parser;
///
/// let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
/// let mut parser = Parser::new(&data);
///
/// parser.seek(6)?;
/// assert_eq!(parser.read_le::<u16>()?, 0x0807);
/// # Ok::<(), webmodkit::Error>(())
/// ```
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`Parser`] from a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Returns the number of bytes between the cursor and the end of the buffer.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the current position to the specified index.
    ///
    /// Seeking to the very end of the buffer is allowed, seeking past it is not.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is beyond the data length.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Move the position forward by the specified number of bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing by step would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        match self.position.checked_add(step) {
            Some(end) if end <= self.data.len() => {
                self.position = end;
                Ok(())
            }
            _ => Err(out_of_bounds_error!()),
        }
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Get access to the underlying data buffer.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Peek at the next byte without advancing the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is at or beyond the data length.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(out_of_bounds_error!())
    }

    /// Read a type `T` from the current position in little-endian format and advance the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: BinIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a type `T` from the current position in big-endian format and advance the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_be<T: BinIO>(&mut self) -> Result<T> {
        read_be_at::<T>(self.data, &mut self.position)
    }

    /// Borrow the next `len` bytes and advance past them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.position;
        self.advance_by(len)?;
        Ok(&self.data[start..self.position])
    }

    /// Read an unsigned LEB128 value.
    ///
    /// Groups of 7 bits are accumulated until a byte without the `0x80` continuation bit is
    /// found. There is no overflow check: bits beyond the 32nd are dropped.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the encoding runs past the end of the data.
    pub fn read_uleb128(&mut self) -> Result<u32> {
        let mut result: u64 = 0;
        let mut shift = 0_u32;
        loop {
            let byte = self.read_le::<u8>()?;
            if shift < 64 {
                result |= u64::from(byte & 0x7F) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }

        Ok(result as u32)
    }

    /// Read a signed LEB128 value of up to 64 bits.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the encoding runs past the end of the data.
    pub fn read_sleb128(&mut self) -> Result<i64> {
        let mut result: i64 = 0;
        let mut shift = 0_u32;
        let mut byte;
        loop {
            byte = self.read_le::<u8>()?;
            if shift < 64 {
                result |= i64::from(byte & 0x7F) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }

        if shift < 64 && byte & 0x40 != 0 {
            result |= -1_i64 << shift;
        }
        Ok(result)
    }

    /// Advance past one LEB128 encoded value of either signedness.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the encoding runs past the end of the data.
    pub fn skip_leb128(&mut self) -> Result<()> {
        while self.read_le::<u8>()? & 0x80 != 0 {}
        Ok(())
    }

    /// Read a null-terminated UTF-8 string and advance past the terminator.
    ///
    /// Invalid UTF-8 sequences are replaced rather than rejected.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if no terminator is found before the end of the data.
    pub fn read_string_null(&mut self) -> Result<String> {
        let rest = &self.data[self.position..];
        let Some(end) = rest.iter().position(|&b| b == 0) else {
            return Err(out_of_bounds_error!());
        };

        let value = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.position += end + 1;
        Ok(value)
    }

    /// Read a UTF-8 string prefixed by its u32 little-endian byte length.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the declared length exceeds the remaining data.
    pub fn read_prefixed_string(&mut self) -> Result<String> {
        let len = self.read_le::<u32>()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read a string stored as a WebAssembly `name` (uleb128 length + UTF-8 bytes).
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the declared length exceeds the remaining data.
    pub fn read_name(&mut self) -> Result<String> {
        let len = self.read_uleb128()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn navigation() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut parser = Parser::new(&data);

        parser.advance_by(3).unwrap();
        assert_eq!(parser.pos(), 3);
        assert_eq!(parser.peek_byte().unwrap(), 0x04);
        assert_eq!(parser.remaining(), 1);

        parser.seek(4).unwrap();
        assert!(!parser.has_more_data());
        assert!(matches!(parser.seek(5), Err(Error::OutOfBounds)));
        assert!(matches!(parser.advance_by(1), Err(Error::OutOfBounds)));
        assert!(matches!(parser.peek_byte(), Err(Error::OutOfBounds)));
    }

    #[test]
    fn read_uleb128_values() {
        let data = [0x00, 0x7F, 0x80, 0x01, 0xE5, 0x8E, 0x26];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_uleb128().unwrap(), 0);
        assert_eq!(parser.read_uleb128().unwrap(), 127);
        assert_eq!(parser.read_uleb128().unwrap(), 128);
        assert_eq!(parser.read_uleb128().unwrap(), 624_485);
    }

    #[test]
    fn read_uleb128_drops_high_bits() {
        // 2^35 + 1 does not fit into 32 bits; only the low bits survive.
        let data = [0x81, 0x80, 0x80, 0x80, 0x80, 0x01];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_uleb128().unwrap(), 1);
        assert!(!parser.has_more_data());
    }

    #[test]
    fn read_uleb128_truncated() {
        let data = [0x80, 0x80];
        let mut parser = Parser::new(&data);
        assert!(matches!(parser.read_uleb128(), Err(Error::OutOfBounds)));
    }

    #[test]
    fn read_sleb128_values() {
        let data = [0x7F, 0xC0, 0x00, 0xBF, 0x7F, 0x2A];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_sleb128().unwrap(), -1);
        assert_eq!(parser.read_sleb128().unwrap(), 64);
        assert_eq!(parser.read_sleb128().unwrap(), -65);
        assert_eq!(parser.read_sleb128().unwrap(), 42);
    }

    #[test]
    fn strings() {
        let mut data = b"mscorlib.dll\0".to_vec();
        data.extend_from_slice(&5u32.to_le_bytes());
        data.extend_from_slice(b"hello");
        data.extend_from_slice(&[0x03, b'a', b'b', b'c']);

        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_string_null().unwrap(), "mscorlib.dll");
        assert_eq!(parser.read_prefixed_string().unwrap(), "hello");
        assert_eq!(parser.read_name().unwrap(), "abc");
        assert!(!parser.has_more_data());
    }

    #[test]
    fn unterminated_string() {
        let data = b"no terminator";
        let mut parser = Parser::new(data);
        assert!(matches!(parser.read_string_null(), Err(Error::OutOfBounds)));
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn prefixed_string_too_long() {
        let mut data = 100u32.to_le_bytes().to_vec();
        data.extend_from_slice(b"short");
        let mut parser = Parser::new(&data);
        assert!(matches!(
            parser.read_prefixed_string(),
            Err(Error::OutOfBounds)
        ));
    }
}
