//! Deferred entry handles.
//!
//! Adding an import shifts every defined function after it, so the final index of anything in a
//! module under edit is only known once all edits are in. Every add or lookup operation of the
//! [`crate::wasm::ModuleEditor`] therefore returns a [`Handle`]: an arena slot recording *what*
//! the caller asked for. The finalize pass resolves all slots at once into a [`HandleTable`].

use crate::{Error, Result};

/// Opaque, copyable reference to a module entry whose index is resolved on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub(crate) u32);

impl Handle {
    /// Position of the handle in its arena.
    #[must_use]
    pub fn id(self) -> u32 {
        self.0
    }
}

/// What a handle stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleTarget {
    /// The n-th added type
    AddedType(usize),
    /// The n-th added import
    AddedImport(usize),
    /// The n-th added defined function
    AddedFunction(usize),
    /// The n-th added global
    AddedGlobal(usize),
    /// The n-th added export
    AddedExport(usize),
    /// The n-th added element segment
    AddedElement(usize),
    /// The n-th added data segment
    AddedData(usize),
    /// An original function index
    Function(u32),
    /// An original global index
    Global(u32),
}

/// Arena of unresolved handles.
#[derive(Debug, Default)]
pub(crate) struct HandleArena {
    targets: Vec<HandleTarget>,
}

impl HandleArena {
    pub(crate) fn alloc(&mut self, target: HandleTarget) -> Handle {
        let id = u32::try_from(self.targets.len()).unwrap_or(u32::MAX);
        self.targets.push(target);
        Handle(id)
    }

    pub(crate) fn target(&self, handle: Handle) -> Result<HandleTarget> {
        self.targets
            .get(handle.0 as usize)
            .copied()
            .ok_or(Error::InvalidHandle(handle.0))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = HandleTarget> + '_ {
        self.targets.iter().copied()
    }
}

/// Final indices of every handle, available to instruction rewriters during finalize.
#[derive(Debug, Default, Clone)]
pub struct HandleTable {
    values: Vec<Option<u32>>,
}

impl HandleTable {
    pub(crate) fn new(values: Vec<Option<u32>>) -> Self {
        HandleTable { values }
    }

    /// Final index of `handle`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if the handle does not belong to this module or refers to
    /// a removed entry.
    pub fn get(&self, handle: Handle) -> Result<u32> {
        self.values
            .get(handle.0 as usize)
            .copied()
            .flatten()
            .ok_or(Error::InvalidHandle(handle.0))
    }
}
