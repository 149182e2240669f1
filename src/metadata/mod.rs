//! IL2CPP global metadata decoding.
//!
//! `global-metadata.dat` ships next to every IL2CPP build and describes every managed type and
//! method of the game, while the code itself only exists as anonymous compiled functions. This
//! module decodes the parts of the file needed to name those functions.
//!
//! # Architecture
//!
//! Decoding is a single pass over an in-memory blob:
//!
//! 1. [`crate::metadata::header::MetadataHeader`] validates the sanity value and revision and
//!    locates every table.
//! 2. All image definitions are decoded and named; only images in the caller's allow-list are
//!    retained.
//! 3. All type definitions are decoded; a type is retained if it lies in the type range of a
//!    retained image.
//! 4. All method definitions are decoded; a method is retained if it is declared by a retained
//!    type.
//!
//! The unfiltered counts are recorded since the code registration search depends on the total
//! number of images, not just the interesting ones.
//!
//! # Key Components
//!
//! - [`crate::metadata::Metadata`] - The decoded, filtered metadata
//! - [`crate::metadata::header`] - Header layout and validation
//! - [`crate::metadata::tables`] - Image, type and method records
//!
//! # Examples
//!
//! ```rust,no_run
//! use webmodkit::metadata::Metadata;
//!
//! let metadata = Metadata::from_file("global-metadata.dat", &["Assembly-CSharp.dll"])?;
//! println!(
//!     "{} of {} images retained, {} types, {} methods",
//!     metadata.images.len(),
//!     metadata.original_image_count,
//!     metadata.types.len(),
//!     metadata.methods.len()
//! );
//! # Ok::<(), webmodkit::Error>(())
//! ```

pub mod header;
pub mod tables;

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    file::{parser::Parser, Input},
    metadata::{
        header::{MetadataHeader, SectionLocation},
        tables::{ImageDefinition, MethodDefinition, TypeDefinition, TYPE_DEFINITION_SIZE},
    },
    Result,
};

/// Decoded global metadata, filtered to an assembly allow-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// The complete file header
    pub header: MetadataHeader,
    /// Format revision, always 29
    pub version: u32,
    /// Retained images
    pub images: Vec<ImageDefinition>,
    /// Retained types, in table order
    pub types: Vec<TypeDefinition>,
    /// Retained methods, in table order
    pub methods: Vec<MethodDefinition>,
    /// Number of images in the file before filtering
    pub original_image_count: usize,
    /// Number of types in the file before filtering
    pub original_type_count: usize,
    /// Number of methods in the file before filtering
    pub original_method_count: usize,
    /// Raw table index -> position in `types`
    type_positions: BTreeMap<u32, usize>,
    /// Raw table index -> position in `methods`
    method_positions: BTreeMap<u32, usize>,
}

impl Metadata {
    /// Decode a metadata blob, keeping only the images named in `allow_list`.
    ///
    /// # Arguments
    /// * `blob` - The complete `global-metadata.dat` contents
    /// * `allow_list` - Image names to retain, e.g. `Assembly-CSharp.dll`
    ///
    /// # Errors
    /// - [`crate::Error::InvalidMagic`] / [`crate::Error::UnsupportedVersion`] /
    ///   [`crate::Error::Malformed`] from the header check
    /// - [`crate::Error::OutOfBounds`] if a table or name lies outside of the blob
    pub fn decode<S: AsRef<str>>(blob: &[u8], allow_list: &[S]) -> Result<Metadata> {
        let header = MetadataHeader::read(blob)?;
        let strings = header.string.offset as usize;

        let all_images = read_table(blob, header.images, ImageDefinition::read)?;
        let original_image_count = all_images.len();

        let mut images = Vec::new();
        for mut image in all_images {
            image.name = read_string(blob, strings, image.name_index)?;
            if allow_list.iter().any(|name| name.as_ref() == image.name) {
                images.push(image);
            }
        }

        let (types, type_positions, original_type_count) =
            Self::read_types(blob, &header, &images)?;

        let mut methods = Vec::new();
        let mut method_positions = BTreeMap::new();
        let all_methods = read_table(blob, header.methods, MethodDefinition::read)?;
        let original_method_count = all_methods.len();
        for (raw_index, mut method) in (0_u32..).zip(all_methods) {
            let declared_by_retained = u32::try_from(method.declaring_type)
                .is_ok_and(|declaring| type_positions.contains_key(&declaring));
            if !declared_by_retained {
                continue;
            }

            method.name = read_string(blob, strings, method.name_index)?;
            method_positions.insert(raw_index, methods.len());
            methods.push(method);
        }

        Ok(Metadata {
            version: header.version,
            header,
            images,
            types,
            methods,
            original_image_count,
            original_type_count,
            original_method_count,
            type_positions,
            method_positions,
        })
    }

    /// Memory-map and decode the metadata file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read, otherwise the same errors
    /// as [`Metadata::decode`].
    pub fn from_file<S: AsRef<str>>(path: impl AsRef<Path>, allow_list: &[S]) -> Result<Metadata> {
        let input = Input::from_file(path)?;
        Metadata::decode(input.data(), allow_list)
    }

    /// Retained type with the given raw table index.
    #[must_use]
    pub fn type_by_index(&self, raw_index: u32) -> Option<&TypeDefinition> {
        self.type_positions
            .get(&raw_index)
            .and_then(|&position| self.types.get(position))
    }

    /// Retained method with the given raw table index.
    #[must_use]
    pub fn method_by_index(&self, raw_index: u32) -> Option<&MethodDefinition> {
        self.method_positions
            .get(&raw_index)
            .and_then(|&position| self.methods.get(position))
    }

    /// Retained image with the given name.
    #[must_use]
    pub fn image(&self, name: &str) -> Option<&ImageDefinition> {
        self.images.iter().find(|image| image.name == name)
    }

    fn read_types(
        blob: &[u8],
        header: &MetadataHeader,
        images: &[ImageDefinition],
    ) -> Result<(Vec<TypeDefinition>, BTreeMap<u32, usize>, usize)> {
        let location = header.type_definitions;
        let base = i64::from(location.offset);
        let record = TYPE_DEFINITION_SIZE as i64;
        let strings = header.string.offset as usize;

        let mut parser = Parser::new(blob);
        parser.seek(location.offset as usize)?;

        let mut types = Vec::new();
        let mut positions = BTreeMap::new();
        let mut raw_index = 0_u32;
        while parser.pos() < location.end() {
            let mut ty = TypeDefinition::read(&mut parser)?;
            let current = raw_index;
            raw_index += 1;

            // Membership is decided on the offset of the record's last byte.
            let last_byte = parser.pos() as i64 - 1;
            let owned = images.iter().any(|image| {
                let range = image.type_range();
                last_byte >= range.start * record + base && last_byte < range.end * record + base
            });
            if !owned {
                continue;
            }

            ty.name = read_string(blob, strings, ty.name_index)?;
            ty.namespace = read_string(blob, strings, ty.namespace_index)?;
            positions.insert(current, types.len());
            types.push(ty);
        }

        Ok((types, positions, raw_index as usize))
    }
}

/// Decode consecutive records until the declared table size is exhausted.
fn read_table<T>(
    blob: &[u8],
    location: SectionLocation,
    read: impl Fn(&mut Parser) -> Result<T>,
) -> Result<Vec<T>> {
    let mut parser = Parser::new(blob);
    parser.seek(location.offset as usize)?;

    let mut entries = Vec::new();
    while parser.pos() < location.end() {
        entries.push(read(&mut parser)?);
    }
    Ok(entries)
}

/// Read the null-terminated string at `base + index`.
fn read_string(blob: &[u8], base: usize, index: u32) -> Result<String> {
    let mut parser = Parser::new(blob);
    parser.seek(base + index as usize)?;
    parser.read_string_null()
}
