//! Static memory image reconstruction.
//!
//! An IL2CPP module initializes its linear memory exclusively from active data segments, so the
//! memory layout the runtime starts with can be rebuilt without instantiating anything: allocate
//! a zeroed buffer and copy every segment to its offset. Everything behind the last segment is
//! zero-initialized (`.bss`).

use crate::{
    file::{parser::Parser, writer::Writer},
    Error, Result,
};

/// Id of the data section.
const DATA_SECTION_ID: u32 = 11;

/// An active data segment, borrowed from the module bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySegment<'a> {
    /// Position in the data section
    pub index: u32,
    /// Destination address in linear memory
    pub offset: u32,
    /// Initial bytes
    pub bytes: &'a [u8],
}

impl MemorySegment<'_> {
    /// First address behind the segment.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset as usize + self.bytes.len()
    }
}

/// Read the data segments of a module without decoding any other section.
///
/// Only the `i32.const` offset form emitted for IL2CPP builds is understood: each segment is
/// read as `flags, opcode, offset, end, length, bytes`, with the opcode and `end` bytes skipped.
///
/// # Errors
/// - [`Error::UnresolvedReference`] if the module has no data section
/// - [`Error::OutOfBounds`] for truncated sections or segments
pub fn read_data_segments(module: &[u8]) -> Result<Vec<MemorySegment<'_>>> {
    let mut parser = Parser::new(module);
    parser.seek(8)?;

    while parser.has_more_data() {
        let id = parser.read_uleb128()?;
        let size = parser.read_uleb128()? as usize;
        if id != DATA_SECTION_ID {
            parser.advance_by(size)?;
            continue;
        }

        let mut section = Parser::new(parser.read_bytes(size)?);
        let count = section.read_uleb128()?;
        let mut segments = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let index = section.read_uleb128()?;
            section.advance_by(1)?;
            let offset = section.read_uleb128()?;
            section.advance_by(1)?;
            let len = section.read_uleb128()? as usize;
            segments.push(MemorySegment {
                index,
                offset,
                bytes: section.read_bytes(len)?,
            });
        }
        return Ok(segments);
    }

    Err(Error::UnresolvedReference(
        "module has no data section".to_string(),
    ))
}

/// The statically initialized linear memory of a module.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    data: Vec<u8>,
    bss_start: u32,
}

impl MemoryImage {
    /// Rebuild the memory image of `module`.
    ///
    /// The image is `max(module length, end of the last segment)` bytes long; the module length
    /// is an upper bound for the static data in practice and leaves room for the structure
    /// search to look behind the last segment.
    ///
    /// # Errors
    /// Returns the errors of [`read_data_segments`], or [`Error::OutOfBounds`] if a segment does
    /// not fit the image.
    pub fn build(module: &[u8]) -> Result<MemoryImage> {
        let segments = read_data_segments(module)?;
        Self::from_segments(&segments, module.len())
    }

    /// Build an image of at least `min_len` bytes from already decoded segments.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if a segment does not fit the image.
    pub fn from_segments(segments: &[MemorySegment], min_len: usize) -> Result<MemoryImage> {
        let last_end = segments.last().map_or(0, MemorySegment::end);
        // Segments are emitted in address order; the maximum only matters for odd producers.
        let max_end = segments.iter().map(MemorySegment::end).max().unwrap_or(0);
        let mut writer = Writer::new(min_len.max(max_end));
        for segment in segments {
            writer.seek(segment.offset as usize)?;
            writer.write_bytes(segment.bytes)?;
        }

        Ok(MemoryImage {
            data: writer.into_inner(),
            bss_start: u32::try_from(last_end).map_err(|_| out_of_bounds_error!())?,
        })
    }

    /// The image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// `true` for an empty image.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// First address behind the last data segment.
    #[must_use]
    pub fn bss_start(&self) -> u32 {
        self.bss_start
    }

    /// Read the little-endian word at `address`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the word lies outside of the image.
    pub fn read_u32(&self, address: u32) -> Result<u32> {
        let mut parser = Parser::new(&self.data);
        parser.seek(address as usize)?;
        parser.read_le::<u32>()
    }

    /// Read `count` consecutive little-endian words starting at `address`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the array lies outside of the image.
    pub fn read_u32_array(&self, address: u32, count: u32) -> Result<Vec<u32>> {
        let mut parser = Parser::new(&self.data);
        parser.seek(address as usize)?;
        if count as usize > parser.remaining() / 4 {
            return Err(out_of_bounds_error!());
        }
        (0..count).map(|_| parser.read_le::<u32>()).collect()
    }

    /// Read the null-terminated string at `address`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the string is not terminated inside of the image.
    pub fn read_string(&self, address: u32) -> Result<String> {
        let mut parser = Parser::new(&self.data);
        parser.seek(address as usize)?;
        parser.read_string_null()
    }

    /// A parser positioned at `address`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if `address` lies outside of the image.
    pub fn parser_at(&self, address: u32) -> Result<Parser<'_>> {
        let mut parser = Parser::new(&self.data);
        parser.seek(address as usize)?;
        Ok(parser)
    }
}
