//! Fixed-capacity write cursor.
//!
//! [`crate::file::writer::Writer`] is the write-side twin of [`crate::file::parser::Parser`]. It
//! owns a zero-initialized buffer whose size is decided up front and never grows: a write that
//! would run past the end fails with [`crate::Error::OutOfBounds`] instead of reallocating. It is
//! used to lay data segments into the reconstructed static memory image.
//!
//! # Examples
//!
//! ```rust
//! use webmodkit::file::writer::Writer;
//!
//! let mut writer = Writer::new(8);
//! writer.seek(4)?;
//! writer.write_le(0xFAB1_1BAFu32)?;
//! assert!(writer.write_bytes(&[0x00]).is_err());
//!
//! let image = writer.into_inner();
//! assert_eq!(&image[4..], &[0xAF, 0x1B, 0xB1, 0xFA]);
//! # Ok::<(), webmodkit::Error>(())
//! ```

use crate::{
    file::io::{write_be_at, write_le_at, BinIO},
    Result,
};

/// A fixed-capacity buffer with a write cursor.
pub struct Writer {
    /// The output buffer, sized at construction
    data: Vec<u8>,
    /// Current write position
    position: usize,
}

impl Writer {
    /// Create a zero-filled writer of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Writer {
            data: vec![0; capacity],
            position: 0,
        }
    }

    /// Returns the fixed capacity of the buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Get the current write position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move the cursor to `pos`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies beyond the capacity. The cursor is
    /// never clamped.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Write `value` in little-endian order and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit.
    pub fn write_le<T: BinIO>(&mut self, value: T) -> Result<()> {
        write_le_at(&mut self.data, &mut self.position, value)
    }

    /// Write `value` in big-endian order and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit.
    pub fn write_be<T: BinIO>(&mut self, value: T) -> Result<()> {
        write_be_at(&mut self.data, &mut self.position, value)
    }

    /// Copy `bytes` to the cursor position and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the bytes exceed the remaining capacity; nothing
    /// is written in that case.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(end) = self.position.checked_add(bytes.len()) else {
            return Err(out_of_bounds_error!());
        };
        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    /// Borrow the buffer.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the writer and return its buffer.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}
