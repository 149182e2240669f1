//! Heuristic search for the code registration structure.
//!
//! Nothing in a stripped WebGL build points at `Il2CppCodeRegistration` by name, but its shape is
//! well known: its last two words are the codegen module count and a pointer to an array of
//! codegen module pointers, and every codegen module starts with a pointer to its image name.
//! `mscorlib.dll` is always one of those images, so the structure can be found by chasing
//! references backwards from that string:
//!
//! ```text
//! "mscorlib.dll\0"  <-  CodeGenModule.module_name  <-  codegen_modules[m]  <-  CodeRegistration
//! ```
//!
//! The pointer array entry for mscorlib can be at any position `m`, so the start of the array is
//! looked up at `ref - 4 * m` for every possible position, and a candidate is accepted when the word
//! before the array pointer equals the number of images.

use std::ops::Range;

use crate::{
    file::io::read_le_at,
    il2cpp::{search::pattern_search, structures::CODE_REGISTRATION_SIZE},
};

/// Name of the image every build contains.
pub const MSCORLIB_SIGNATURE: &[u8] = b"mscorlib.dll\0";

/// Start of the static data region of an Emscripten memory image.
pub const DATA_REGION_START: usize = 1024;

/// Addresses of all words in `region` that equal `value`.
///
/// Words are read every 4 bytes from the region start; the scan stops before the last word of
/// the region, which is never inspected.
fn find_references(image: &[u8], region: &Range<usize>, value: u32) -> Vec<u32> {
    let end = region.end.min(image.len()).saturating_sub(4);
    let mut references = Vec::new();
    let mut position = region.start;
    while position < end {
        let mut offset = position;
        if read_le_at::<u32>(image, &mut offset).is_ok_and(|word| word == value) {
            if let Ok(address) = u32::try_from(position) {
                references.push(address);
            }
        }
        position += 4;
    }
    references
}

fn read_i32(image: &[u8], address: u32) -> Option<i32> {
    let mut offset = address as usize;
    read_le_at::<i32>(image, &mut offset).ok()
}

/// Locate the code registration structure in a static memory image.
///
/// # Arguments
/// * `image` - The memory image, where offsets equal addresses
/// * `region` - The data region to search, usually `1024..image.len()`
/// * `image_count` - The total number of images in the metadata, before any filtering
///
/// Returns the address of the structure, or `None` if no candidate matches. The first candidate
/// in search order wins. A region reaching past the image is cut at its end; an empty or
/// inverted region finds nothing.
#[must_use]
pub fn find_code_registration(image: &[u8], region: Range<usize>, image_count: u32) -> Option<u32> {
    let start = region.start;
    let end = region.end.min(image.len());
    let data = image.get(start..end)?;
    let Ok(expected_count) = i32::try_from(image_count) else {
        return None;
    };

    for found in pattern_search(data, MSCORLIB_SIGNATURE) {
        let Ok(name_address) = u32::try_from(start + found) else {
            continue;
        };

        for module in find_references(image, &region, name_address) {
            for entry in find_references(image, &region, module) {
                for m in (0..image_count).rev() {
                    let Some(array) = entry.checked_sub(4 * m) else {
                        continue;
                    };

                    for pointer in find_references(image, &region, array) {
                        let Some(count_address) = pointer.checked_sub(4) else {
                            continue;
                        };
                        if read_i32(image, count_address) == Some(expected_count) {
                            return pointer.checked_sub(CODE_REGISTRATION_SIZE - 4);
                        }
                    }
                }
            }
        }
    }

    None
}
