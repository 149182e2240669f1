//! Global metadata header.
//!
//! The header is a fixed 256-byte structure at the very start of `global-metadata.dat`: the
//! sanity value, the format version, and 31 `(offset, size)` pairs locating every table and blob
//! of the file. Offsets are absolute file offsets, sizes are in bytes.
//!
//! Only the tables needed to map methods onto function pointers are decoded by this crate, but
//! the complete header is kept so that callers can locate everything else.

use serde::{Deserialize, Serialize};

use crate::{file::parser::Parser, Error, Result};

/// Sanity value every global metadata file starts with.
pub const METADATA_SANITY: u32 = 0xFAB1_1BAF;

/// The single metadata revision understood by the decoder.
pub const SUPPORTED_VERSION: u32 = 29;

/// Size in bytes of the encoded header.
pub const METADATA_HEADER_SIZE: usize = 8 + 31 * 8;

/// Location of a table or blob inside the metadata file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionLocation {
    /// Absolute byte offset from the start of the file
    pub offset: u32,
    /// Size in bytes
    pub size: i32,
}

impl SectionLocation {
    fn read(parser: &mut Parser) -> Result<Self> {
        Ok(SectionLocation {
            offset: parser.read_le::<u32>()?,
            size: parser.read_le::<i32>()?,
        })
    }

    /// Exclusive end offset of the section. Negative sizes are treated as empty.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset as usize + usize::try_from(self.size).unwrap_or(0)
    }
}

macro_rules! metadata_header {
    ($($(#[$doc:meta])* $field:ident),* $(,)?) => {
        /// The decoded global metadata header (revision 29 layout).
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct MetadataHeader {
            /// Must equal [`METADATA_SANITY`]
            pub sanity: u32,
            /// Format revision
            pub version: u32,
            $($(#[$doc])* pub $field: SectionLocation,)*
        }

        impl MetadataHeader {
            fn read_sections(parser: &mut Parser, sanity: u32, version: u32) -> Result<Self> {
                Ok(MetadataHeader {
                    sanity,
                    version,
                    $($field: SectionLocation::read(parser)?,)*
                })
            }
        }
    };
}

metadata_header! {
    /// String literal table
    string_literal,
    /// Raw string literal data
    string_literal_data,
    /// Null-terminated identifier strings (type, method and image names)
    string,
    /// Event definitions
    events,
    /// Property definitions
    properties,
    /// Method definitions (32 bytes each)
    methods,
    /// Parameter default values
    parameter_default_values,
    /// Field default values
    field_default_values,
    /// Default value data shared by fields and parameters
    field_and_parameter_default_value_data,
    /// Field marshaled sizes
    field_marshaled_sizes,
    /// Parameter definitions
    parameters,
    /// Field definitions
    fields,
    /// Generic parameters
    generic_parameters,
    /// Generic parameter constraints
    generic_parameter_constraints,
    /// Generic containers
    generic_containers,
    /// Nested type indices
    nested_types,
    /// Interface indices
    interfaces,
    /// Vtable method indices
    vtable_methods,
    /// Interface offset pairs
    interface_offsets,
    /// Type definitions (88 bytes each)
    type_definitions,
    /// Image definitions (40 bytes each)
    images,
    /// Assembly definitions
    assemblies,
    /// Field references
    field_refs,
    /// Referenced assembly indices
    referenced_assemblies,
    /// Custom attribute data
    attribute_data,
    /// Custom attribute data ranges
    attribute_data_range,
    /// Unresolved virtual call parameter types
    unresolved_virtual_call_parameter_types,
    /// Unresolved virtual call parameter ranges
    unresolved_virtual_call_parameter_ranges,
    /// Windows runtime type names
    windows_runtime_type_names,
    /// Windows runtime strings
    windows_runtime_strings,
    /// Exported type definitions
    exported_type_definitions,
}

impl MetadataHeader {
    /// Validate and decode the header at the start of `data`.
    ///
    /// The sanity value and the version are checked before anything else is read, so an
    /// unsupported file is rejected even if it is truncated right after its version field.
    ///
    /// # Errors
    /// - [`Error::InvalidMagic`] if the sanity value does not match
    /// - [`Error::Malformed`] if the version is not plausible at all
    /// - [`Error::UnsupportedVersion`] for any revision other than 29
    /// - [`Error::OutOfBounds`] if the header is truncated
    pub fn read(data: &[u8]) -> Result<MetadataHeader> {
        let mut parser = Parser::new(data);

        let sanity = parser.read_le::<u32>()?;
        if sanity != METADATA_SANITY {
            return Err(Error::InvalidMagic(sanity));
        }

        let version = parser.read_le::<u32>()?;
        if version > 1000 {
            return Err(malformed_error!(
                "Metadata version is not plausible - {}",
                version
            ));
        }
        if version != SUPPORTED_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        MetadataHeader::read_sections(&mut parser, sanity, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(sanity: u32, version: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(METADATA_HEADER_SIZE);
        data.extend_from_slice(&sanity.to_le_bytes());
        data.extend_from_slice(&version.to_le_bytes());
        for pair in 0..31u32 {
            data.extend_from_slice(&(0x100 + pair * 0x10).to_le_bytes());
            data.extend_from_slice(&(pair as i32).to_le_bytes());
        }
        data
    }

    #[test]
    fn crafted() {
        let data = header_bytes(METADATA_SANITY, 29);
        assert_eq!(data.len(), 256);

        let header = MetadataHeader::read(&data).unwrap();
        assert_eq!(header.version, 29);
        assert_eq!(
            header.string_literal,
            SectionLocation {
                offset: 0x100,
                size: 0
            }
        );
        assert_eq!(header.string.offset, 0x120);
        assert_eq!(header.methods.offset, 0x150);
        assert_eq!(header.methods.size, 5);
        assert_eq!(header.type_definitions.offset, 0x100 + 19 * 0x10);
        assert_eq!(header.images.offset, 0x100 + 20 * 0x10);
        assert_eq!(header.exported_type_definitions.size, 30);
        assert_eq!(header.images.end(), 0x240 + 20);
    }

    #[test]
    fn invalid_magic() {
        let data = header_bytes(0xDEAD_BEEF, 29);
        assert!(matches!(
            MetadataHeader::read(&data),
            Err(Error::InvalidMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn version_checks() {
        assert!(matches!(
            MetadataHeader::read(&header_bytes(METADATA_SANITY, 30)),
            Err(Error::UnsupportedVersion(30))
        ));
        assert!(matches!(
            MetadataHeader::read(&header_bytes(METADATA_SANITY, 24)),
            Err(Error::UnsupportedVersion(24))
        ));
        assert!(matches!(
            MetadataHeader::read(&header_bytes(METADATA_SANITY, 1001)),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn version_checked_before_truncation() {
        let data = header_bytes(METADATA_SANITY, 27);
        assert!(matches!(
            MetadataHeader::read(&data[..8]),
            Err(Error::UnsupportedVersion(27))
        ));
        let data = header_bytes(METADATA_SANITY, 29);
        assert!(matches!(
            MetadataHeader::read(&data[..100]),
            Err(Error::OutOfBounds)
        ));
    }
}
