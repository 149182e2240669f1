//! Buffered input backend.
//!
//! Streams that cannot be mapped, such as a bundle piped through standard input, are read to
//! the end once and kept in [`crate::file::memory::Memory`].

use std::io::Read;

use super::Backend;
use crate::Result;

/// Input read completely from a stream.
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Drain `reader` into a new buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if reading fails.
    pub fn read_from(mut reader: impl Read) -> Result<Memory> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(Memory { data })
    }
}

impl Backend for Memory {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(out_of_bounds_error!())
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
