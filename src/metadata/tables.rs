//! Fixed-size definition records of the global metadata file.
//!
//! Each table is a packed array of little-endian records. The three tables decoded here are the
//! ones needed to walk from an assembly image to the methods it defines:
//!
//! | Table | Record size | Links |
//! |-------|-------------|-------|
//! | [`ImageDefinition`] | 40 bytes | `type_start..type_start + type_count` |
//! | [`TypeDefinition`] | 88 bytes | `method_start..method_start + method_count` |
//! | [`MethodDefinition`] | 32 bytes | `declaring_type`, `token` |
//!
//! Names are stored as offsets into the string blob and are resolved by the decoder; the records
//! carry them as owned strings so that a decoded [`crate::metadata::Metadata`] is self-contained.

use serde::{Deserialize, Serialize};

use crate::{file::parser::Parser, Result};

/// Size in bytes of an encoded image definition.
pub const IMAGE_DEFINITION_SIZE: usize = 40;
/// Size in bytes of an encoded type definition.
pub const TYPE_DEFINITION_SIZE: usize = 88;
/// Size in bytes of an encoded method definition.
pub const METHOD_DEFINITION_SIZE: usize = 32;

/// An assembly image (one per managed DLL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    /// Resolved image name, e.g. `Assembly-CSharp.dll`
    pub name: String,
    /// Offset of the name in the string blob
    pub name_index: u32,
    /// Index of the owning assembly definition
    pub assembly_index: i32,
    /// Index of the first type owned by this image
    pub type_start: i32,
    /// Number of types owned by this image
    pub type_count: u32,
    /// Index of the first exported type
    pub exported_type_start: i32,
    /// Number of exported types
    pub exported_type_count: u32,
    /// Method index of the entry point, `-1` for libraries
    pub entry_point_index: i32,
    /// Image token
    pub token: u32,
    /// Index of the first custom attribute range
    pub custom_attribute_start: i32,
    /// Number of custom attribute ranges
    pub custom_attribute_count: u32,
}

impl ImageDefinition {
    /// Decode one record at the parser position. The name is left empty.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the record is truncated.
    pub fn read(parser: &mut Parser) -> Result<Self> {
        Ok(ImageDefinition {
            name: String::new(),
            name_index: parser.read_le::<u32>()?,
            assembly_index: parser.read_le::<i32>()?,
            type_start: parser.read_le::<i32>()?,
            type_count: parser.read_le::<u32>()?,
            exported_type_start: parser.read_le::<i32>()?,
            exported_type_count: parser.read_le::<u32>()?,
            entry_point_index: parser.read_le::<i32>()?,
            token: parser.read_le::<u32>()?,
            custom_attribute_start: parser.read_le::<i32>()?,
            custom_attribute_count: parser.read_le::<u32>()?,
        })
    }

    /// The `[start, end)` range of raw type indices owned by this image.
    #[must_use]
    pub fn type_range(&self) -> std::ops::Range<i64> {
        let start = i64::from(self.type_start);
        start..start + i64::from(self.type_count)
    }
}

/// A managed type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Resolved type name
    pub name: String,
    /// Resolved namespace, empty for the global namespace
    pub namespace: String,
    /// Offset of the name in the string blob
    pub name_index: u32,
    /// Offset of the namespace in the string blob
    pub namespace_index: u32,
    /// Type index of the by-value type
    pub byval_type_index: i32,
    /// Enclosing type for nested types, `-1` otherwise
    pub declaring_type_index: i32,
    /// Type index of the base type
    pub parent_index: i32,
    /// Element type of enums and arrays
    pub element_type_index: i32,
    /// Generic container, `-1` if not generic
    pub generic_container_index: i32,
    /// `TypeAttributes` flags
    pub flags: u32,
    /// Index of the first field
    pub field_start: i32,
    /// Index of the first method of this type
    pub method_start: i32,
    /// Index of the first event
    pub event_start: i32,
    /// Index of the first property
    pub property_start: i32,
    /// Index of the first nested type entry
    pub nested_types_start: i32,
    /// Index of the first implemented interface
    pub interfaces_start: i32,
    /// Index of the first vtable slot
    pub vtable_start: i32,
    /// Index of the first interface offset pair
    pub interface_offsets_start: i32,
    /// Number of methods of this type
    pub method_count: u16,
    /// Number of properties
    pub property_count: u16,
    /// Number of fields
    pub field_count: u16,
    /// Number of events
    pub event_count: u16,
    /// Number of nested types
    pub nested_type_count: u16,
    /// Number of vtable slots
    pub vtable_count: u16,
    /// Number of implemented interfaces
    pub interfaces_count: u16,
    /// Number of interface offset pairs
    pub interface_offsets_count: u16,
    /// Packed layout bits (value type, enum, packing size, ...)
    pub bitfield: u32,
    /// Type token
    pub token: u32,
}

impl TypeDefinition {
    /// Decode one record at the parser position. Name and namespace are left empty.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the record is truncated.
    pub fn read(parser: &mut Parser) -> Result<Self> {
        Ok(TypeDefinition {
            name: String::new(),
            namespace: String::new(),
            name_index: parser.read_le::<u32>()?,
            namespace_index: parser.read_le::<u32>()?,
            byval_type_index: parser.read_le::<i32>()?,
            declaring_type_index: parser.read_le::<i32>()?,
            parent_index: parser.read_le::<i32>()?,
            element_type_index: parser.read_le::<i32>()?,
            generic_container_index: parser.read_le::<i32>()?,
            flags: parser.read_le::<u32>()?,
            field_start: parser.read_le::<i32>()?,
            method_start: parser.read_le::<i32>()?,
            event_start: parser.read_le::<i32>()?,
            property_start: parser.read_le::<i32>()?,
            nested_types_start: parser.read_le::<i32>()?,
            interfaces_start: parser.read_le::<i32>()?,
            vtable_start: parser.read_le::<i32>()?,
            interface_offsets_start: parser.read_le::<i32>()?,
            method_count: parser.read_le::<u16>()?,
            property_count: parser.read_le::<u16>()?,
            field_count: parser.read_le::<u16>()?,
            event_count: parser.read_le::<u16>()?,
            nested_type_count: parser.read_le::<u16>()?,
            vtable_count: parser.read_le::<u16>()?,
            interfaces_count: parser.read_le::<u16>()?,
            interface_offsets_count: parser.read_le::<u16>()?,
            bitfield: parser.read_le::<u32>()?,
            token: parser.read_le::<u32>()?,
        })
    }

    /// `Namespace.Type`, or the bare type name in the global namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// The `[start, end)` range of raw method indices owned by this type.
    #[must_use]
    pub fn method_range(&self) -> std::ops::Range<i64> {
        let start = i64::from(self.method_start);
        start..start + i64::from(self.method_count)
    }
}

/// A managed method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDefinition {
    /// Resolved method name
    pub name: String,
    /// Offset of the name in the string blob
    pub name_index: u32,
    /// Raw index of the declaring type
    pub declaring_type: i32,
    /// Type index of the return type
    pub return_type: i32,
    /// Index of the first parameter
    pub parameter_start: i32,
    /// Generic container, `-1` if not generic
    pub generic_container_index: i32,
    /// Metadata token; the low 24 bits are the 1-based slot in the module's pointer array
    pub token: u32,
    /// `MethodAttributes` flags
    pub flags: u16,
    /// `MethodImplAttributes` flags
    pub iflags: u16,
    /// Vtable slot, `0xFFFF` if not virtual
    pub slot: u16,
    /// Number of parameters
    pub parameter_count: u16,
}

impl MethodDefinition {
    /// Decode one record at the parser position. The name is left empty.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the record is truncated.
    pub fn read(parser: &mut Parser) -> Result<Self> {
        Ok(MethodDefinition {
            name: String::new(),
            name_index: parser.read_le::<u32>()?,
            declaring_type: parser.read_le::<i32>()?,
            return_type: parser.read_le::<i32>()?,
            parameter_start: parser.read_le::<i32>()?,
            generic_container_index: parser.read_le::<i32>()?,
            token: parser.read_le::<u32>()?,
            flags: parser.read_le::<u16>()?,
            iflags: parser.read_le::<u16>()?,
            slot: parser.read_le::<u16>()?,
            parameter_count: parser.read_le::<u16>()?,
        })
    }

    /// The 0-based index into the owning module's method pointer array, if the token has one.
    #[must_use]
    pub fn pointer_index(&self) -> Option<usize> {
        let rid = self.token & 0x00FF_FFFF;
        rid.checked_sub(1).map(|index| index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted_image() {
        #[rustfmt::skip]
        let bytes = [
            0x10, 0x00, 0x00, 0x00, // name_index
            0x01, 0x00, 0x00, 0x00, // assembly_index
            0x05, 0x00, 0x00, 0x00, // type_start
            0x03, 0x00, 0x00, 0x00, // type_count
            0xFF, 0xFF, 0xFF, 0xFF, // exported_type_start
            0x00, 0x00, 0x00, 0x00, // exported_type_count
            0xFF, 0xFF, 0xFF, 0xFF, // entry_point_index
            0x01, 0x00, 0x00, 0x00, // token
            0x02, 0x00, 0x00, 0x00, // custom_attribute_start
            0x04, 0x00, 0x00, 0x00, // custom_attribute_count
        ];
        assert_eq!(bytes.len(), IMAGE_DEFINITION_SIZE);

        let image = ImageDefinition::read(&mut Parser::new(&bytes)).unwrap();
        assert_eq!(image.name_index, 0x10);
        assert_eq!(image.type_start, 5);
        assert_eq!(image.type_count, 3);
        assert_eq!(image.exported_type_start, -1);
        assert_eq!(image.custom_attribute_count, 4);
        assert_eq!(image.type_range(), 5..8);
    }

    #[test]
    fn crafted_type() {
        let mut bytes = Vec::new();
        for value in 0u32..16 {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        for value in 100u16..108 {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&0xAABB_CCDDu32.to_le_bytes());
        bytes.extend_from_slice(&0x0200_0001u32.to_le_bytes());
        assert_eq!(bytes.len(), TYPE_DEFINITION_SIZE);

        let mut parser = Parser::new(&bytes);
        let mut ty = TypeDefinition::read(&mut parser).unwrap();
        assert!(!parser.has_more_data());
        assert_eq!(ty.namespace_index, 1);
        assert_eq!(ty.flags, 7);
        assert_eq!(ty.method_start, 9);
        assert_eq!(ty.interface_offsets_start, 15);
        assert_eq!(ty.method_count, 100);
        assert_eq!(ty.interface_offsets_count, 107);
        assert_eq!(ty.bitfield, 0xAABB_CCDD);
        assert_eq!(ty.token, 0x0200_0001);
        assert_eq!(ty.method_range(), 9..109);

        ty.name = "Player".into();
        assert_eq!(ty.full_name(), "Player");
        ty.namespace = "Game.Core".into();
        assert_eq!(ty.full_name(), "Game.Core.Player");
    }

    #[test]
    fn crafted_method() {
        #[rustfmt::skip]
        let bytes = [
            0x20, 0x00, 0x00, 0x00, // name_index
            0x02, 0x00, 0x00, 0x00, // declaring_type
            0x03, 0x00, 0x00, 0x00, // return_type
            0x04, 0x00, 0x00, 0x00, // parameter_start
            0xFF, 0xFF, 0xFF, 0xFF, // generic_container_index
            0x07, 0x00, 0x00, 0x06, // token
            0x86, 0x00,             // flags
            0x00, 0x00,             // iflags
            0xFF, 0xFF,             // slot
            0x02, 0x00,             // parameter_count
        ];
        assert_eq!(bytes.len(), METHOD_DEFINITION_SIZE);

        let method = MethodDefinition::read(&mut Parser::new(&bytes)).unwrap();
        assert_eq!(method.declaring_type, 2);
        assert_eq!(method.generic_container_index, -1);
        assert_eq!(method.token, 0x0600_0007);
        assert_eq!(method.pointer_index(), Some(6));
        assert_eq!(method.slot, 0xFFFF);
        assert_eq!(method.parameter_count, 2);
    }

    #[test]
    fn pointer_index_of_null_token() {
        let method = MethodDefinition {
            name: String::new(),
            name_index: 0,
            declaring_type: 0,
            return_type: 0,
            parameter_start: 0,
            generic_container_index: -1,
            token: 0x0600_0000,
            flags: 0,
            iflags: 0,
            slot: 0,
            parameter_count: 0,
        };
        assert_eq!(method.pointer_index(), None);
    }

    #[test]
    fn truncated_record() {
        let bytes = [0u8; METHOD_DEFINITION_SIZE - 1];
        assert!(MethodDefinition::read(&mut Parser::new(&bytes)).is_err());
    }
}
