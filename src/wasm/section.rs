//! Splitting a module into its raw sections.

use crate::{
    file::parser::Parser,
    wasm::types::{SectionId, WASM_MAGIC, WASM_VERSION},
    Error, Result,
};

/// A section as found in the module, borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSection<'a> {
    /// Section id, [`SectionId::Unknown`] for ids outside of the known set
    pub id: SectionId,
    /// The id byte as found in the module
    pub code: u8,
    /// Content after the size field
    pub payload: &'a [u8],
    /// Complete encoding including id and size, emitted verbatim for untouched sections
    pub raw: &'a [u8],
}

impl RawSection<'_> {
    /// Name of a custom section, `None` for known sections.
    #[must_use]
    pub fn custom_name(&self) -> Option<String> {
        if self.id != SectionId::Custom {
            return None;
        }
        Parser::new(self.payload).read_name().ok()
    }
}

/// Check the module preamble and split the rest into sections.
///
/// Known sections must appear at most once and in canonical order; custom sections and sections
/// with an unknown id may appear anywhere and are kept as they are.
///
/// # Errors
/// - [`Error::InvalidMagic`] if the input does not start with `\0asm`
/// - [`Error::NotSupported`] for a container version other than 1
/// - [`Error::Malformed`] for duplicated or misordered sections
/// - [`Error::OutOfBounds`] for truncated sections
pub fn split_sections(data: &[u8]) -> Result<Vec<RawSection<'_>>> {
    let mut parser = Parser::new(data);
    let magic = parser.read_le::<u32>()?;
    if magic != u32::from_le_bytes(WASM_MAGIC) {
        return Err(Error::InvalidMagic(magic));
    }
    let version = parser.read_le::<u32>()?;
    if version != WASM_VERSION {
        return Err(Error::NotSupported(format!("module version {version}")));
    }

    let mut sections = Vec::new();
    let mut last_order = 0u8;
    while parser.has_more_data() {
        let start = parser.pos();
        let id_byte = parser.read_le::<u8>()?;
        let id = SectionId::from_repr(id_byte).unwrap_or(SectionId::Unknown);
        let size = parser.read_uleb128()? as usize;
        let payload = parser.read_bytes(size)?;

        if !id.is_opaque() {
            if id.order() <= last_order {
                return Err(malformed_error!("Section {} out of order", id));
            }
            last_order = id.order();
        }

        sections.push(RawSection {
            id,
            code: id_byte,
            payload,
            raw: &data[start..parser.pos()],
        });
    }

    Ok(sections)
}
