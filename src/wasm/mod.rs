//! WebAssembly module decoding, editing and encoding.
//!
//! A Unity WebGL build ships its game code as a single large module. Hooking needs a handful of
//! surgical edits to it (a few new imports and types, rewritten call sites) while everything else
//! must survive byte for byte. This module provides exactly that: a section-level container
//! parser, entry decoders for the known sections, and an editor that re-encodes only what an edit
//! touches.
//!
//! # Architecture
//!
//! - [`crate::wasm::section`] splits the container into raw sections
//! - [`crate::wasm::reader`] and [`crate::wasm::encode`] convert section entries
//! - [`crate::wasm::instruction`] finds instruction boundaries and index immediates
//! - [`crate::wasm::handle`] and [`crate::wasm::remap`] implement deferred index resolution
//! - [`crate::wasm::editor`] ties it together in [`ModuleEditor`]
//!
//! # Index resolution
//!
//! Every index in a module is positional, and an added import shifts every defined function
//! after it. Edits therefore never compute indices eagerly. The editor hands out [`Handle`]s for
//! added or looked-up entries, and [`ModuleEditor::write`] computes an old-to-new mapping per
//! index space, resolves all handles in one pass and renumbers every affected reference.

pub mod editor;
pub mod encode;
pub mod handle;
pub mod instruction;
pub mod reader;
pub mod remap;
pub mod section;
pub mod types;

pub use editor::ModuleEditor;
pub use handle::{Handle, HandleTable};
pub use instruction::{InstructionRewrite, InstructionRewriter, InstructionRewriters};
pub use remap::{IndexRemapper, IndexSpace, SpaceRemapper};
pub use section::{split_sections, RawSection};
pub use types::{
    ConstExpr, DataMode, DataSegment, ElementItems, ElementMode, ElementSegment, Export,
    ExternalKind, FuncType, FunctionBody, Global, GlobalType, Import, ImportDesc, IndexRef, Limits,
    MemoryType, SectionFlags, SectionId, TableType, ValType,
};
