//! Old-to-new index mappings computed during finalize.
//!
//! Each index space of a module is rebuilt as "kept original entries, in original order,
//! followed by added entries". Imports come first in the function and global spaces, so an added
//! import lands after the last original import of its kind and pushes every defined entry up by
//! one. [`SpaceRemapper`] records where each original index ends up; [`IndexRemapper`] bundles
//! the remappers of all spaces that instructions and entries can refer to.

use strum::Display;

use crate::{
    wasm::{
        handle::HandleTable,
        types::IndexRef,
    },
    Result,
};

/// Index spaces with renumbered references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum IndexSpace {
    /// Function types
    Type,
    /// Imported and defined functions
    Function,
    /// Imported and defined globals
    Global,
    /// Element segments
    Element,
    /// Data segments
    Data,
}

/// Mapping of the original indices of one index space.
#[derive(Debug, Clone)]
pub struct SpaceRemapper {
    space: IndexSpace,
    mapping: Vec<Option<u32>>,
}

impl SpaceRemapper {
    /// Mapping that keeps all `count` original entries in place.
    #[must_use]
    pub fn identity(space: IndexSpace, count: u32) -> Self {
        SpaceRemapper {
            space,
            mapping: (0..count).map(Some).collect(),
        }
    }

    /// Build a mapping from explicit new positions, `None` marking removed entries.
    #[must_use]
    pub fn new(space: IndexSpace, mapping: Vec<Option<u32>>) -> Self {
        SpaceRemapper { space, mapping }
    }

    /// Build a mapping from a sequence of segments.
    ///
    /// Each segment is a list of "kept" flags for consecutive original indices, placed at the
    /// given new base index. Used for the function and global spaces, where the original
    /// imports and the original definitions move independently.
    #[must_use]
    pub fn from_segments(space: IndexSpace, segments: &[(u32, &[bool])]) -> Self {
        let mut mapping = Vec::new();
        for (base, kept) in segments {
            let mut next = *base;
            for &keep in *kept {
                if keep {
                    mapping.push(Some(next));
                    next += 1;
                } else {
                    mapping.push(None);
                }
            }
        }
        SpaceRemapper { space, mapping }
    }

    /// New index of the original entry `old`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `old` was removed or never existed.
    pub fn get(&self, old: u32) -> Result<u32> {
        match self.mapping.get(old as usize) {
            Some(Some(new)) => Ok(*new),
            Some(None) => Err(malformed_error!(
                "Reference to removed {} entry {}",
                self.space,
                old
            )),
            None => Err(malformed_error!(
                "Reference to nonexistent {} entry {} (count {})",
                self.space,
                old,
                self.mapping.len()
            )),
        }
    }

    /// Like [`SpaceRemapper::get`] but `None` for removed or unknown entries.
    #[must_use]
    pub fn lookup(&self, old: u32) -> Option<u32> {
        self.mapping.get(old as usize).copied().flatten()
    }

    /// `true` if every original index maps onto itself.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.mapping
            .iter()
            .enumerate()
            .all(|(old, new)| *new == u32::try_from(old).ok())
    }

    /// Number of original entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// `true` if the space had no original entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

/// Remappers for every renumbered index space.
#[derive(Debug, Clone)]
pub struct IndexRemapper {
    /// Type space
    pub types: SpaceRemapper,
    /// Function space
    pub functions: SpaceRemapper,
    /// Global space
    pub globals: SpaceRemapper,
    /// Element segment space
    pub elements: SpaceRemapper,
    /// Data segment space
    pub data: SpaceRemapper,
}

impl IndexRemapper {
    /// Remapper of the given space.
    #[must_use]
    pub fn space(&self, space: IndexSpace) -> &SpaceRemapper {
        match space {
            IndexSpace::Type => &self.types,
            IndexSpace::Function => &self.functions,
            IndexSpace::Global => &self.globals,
            IndexSpace::Element => &self.elements,
            IndexSpace::Data => &self.data,
        }
    }

    /// Final index of a reference into `space`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for removed originals and
    /// [`crate::Error::InvalidHandle`] for unresolved handles.
    pub fn resolve(&self, space: IndexSpace, index: IndexRef, handles: &HandleTable) -> Result<u32> {
        match index {
            IndexRef::Original(old) => self.space(space).get(old),
            IndexRef::Handle(handle) => handles.get(handle),
        }
    }

    /// `true` if no index of any space moves.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.types.is_identity()
            && self.functions.is_identity()
            && self.globals.is_identity()
            && self.elements.is_identity()
            && self.data.is_identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn identity() {
        let remapper = SpaceRemapper::identity(IndexSpace::Type, 3);
        assert!(remapper.is_identity());
        assert_eq!(remapper.get(2).unwrap(), 2);
        assert!(matches!(remapper.get(3), Err(Error::Malformed { .. })));
    }

    #[test]
    fn segments_with_shift_and_removal() {
        // Two original imports, one added import, three original definitions with the
        // middle one removed.
        let imports = [true, true];
        let defined = [true, false, true];
        let remapper =
            SpaceRemapper::from_segments(IndexSpace::Function, &[(0, &imports), (3, &defined)]);

        assert!(!remapper.is_identity());
        assert_eq!(remapper.len(), 5);
        assert_eq!(remapper.get(0).unwrap(), 0);
        assert_eq!(remapper.get(1).unwrap(), 1);
        assert_eq!(remapper.get(2).unwrap(), 3);
        assert!(matches!(remapper.get(3), Err(Error::Malformed { .. })));
        assert_eq!(remapper.lookup(3), None);
        assert_eq!(remapper.get(4).unwrap(), 4);
    }

    #[test]
    fn appended_entries_keep_identity() {
        let kept = [true, true, true];
        let remapper = SpaceRemapper::from_segments(IndexSpace::Global, &[(0, &kept)]);
        assert!(remapper.is_identity());
    }
}
