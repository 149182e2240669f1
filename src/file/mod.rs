//! Binary input abstraction and byte-level cursors.
//!
//! Everything the crate decodes (metadata blobs, web data bundles, WebAssembly modules and the
//! static memory image rebuilt from them) flows through the types in this module.
//!
//! # Key Components
//!
//! ## Core Types
//! - [`crate::file::Input`] - Owned binary input, backed either by a memory mapping or a buffer
//! - [`crate::file::Backend`] - Trait for different data sources (disk files, drained streams)
//!
//! ## Cursors
//! - [`crate::file::parser::Parser`] - Bounds-checked read cursor
//! - [`crate::file::writer::Writer`] - Fixed-capacity write cursor
//! - [`crate::file::io`] - Endian-aware primitive access and LEB128 encoding
//!
//! # Examples
//!
//! ```rust
//! use webmodkit::file::Input;
//!
//! let input = Input::from_reader(&[0xAF, 0x1B, 0xB1, 0xFA][..])?;
//! assert_eq!(input.len(), 4);
//! assert_eq!(input.data_slice(0, 2)?, &[0xAF, 0x1B]);
//! # Ok::<(), webmodkit::Error>(())
//! ```

pub mod io;
pub mod parser;
pub mod writer;

mod memory;
mod physical;

use std::{io::Read, path::Path};

use crate::Result;

pub use memory::Memory;
pub use physical::Physical;

/// Backend trait for binary data sources.
///
/// Implemented by [`Physical`] (memory-mapped files) and [`Memory`] (drained streams) so that the
/// decoders never care where their bytes came from.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// An owned binary input.
///
/// Large game artifacts (the web data bundle is commonly several hundred megabytes) are mapped
/// rather than read. Streams such as standard input are read into a buffer.
pub struct Input {
    backend: Box<dyn Backend>,
}

impl Input {
    /// Memory-map the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Input> {
        Ok(Input {
            backend: Box::new(Physical::new(path)?),
        })
    }

    /// Read `reader` to the end.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if reading fails.
    pub fn from_reader(reader: impl Read) -> Result<Input> {
        Ok(Input {
            backend: Box::new(Memory::read_from(reader)?),
        })
    }

    /// Returns the complete input.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.backend.data()
    }

    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is not fully inside the input.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.backend.data_slice(offset, len)
    }

    /// Returns the input size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    /// Returns `true` if the input holds no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backend.len() == 0
    }
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Input").field("len", &self.len()).finish()
    }
}
