//! Entry types of the WebAssembly sections handled by the module editor.
//!
//! Entries that refer to other index spaces hold an [`IndexRef`]: either an index of the module
//! as it was parsed, which is renumbered during finalize, or a [`Handle`] to an entry added
//! through the editor.

use std::borrow::Cow;

use bitflags::bitflags;
use strum::{Display, EnumIter, FromRepr};

use crate::wasm::handle::Handle;

/// Module magic, `\0asm`.
pub const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];
/// The only container version in use.
pub const WASM_VERSION: u32 = 1;
/// Form byte introducing a function type.
pub const FUNC_TYPE_FORM: u8 = 0x60;

/// Section identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum SectionId {
    /// Custom sections (`name`, producers, ...)
    Custom = 0,
    /// Function signatures
    Type = 1,
    /// Imported functions, tables, memories and globals
    Import = 2,
    /// Type indices of the defined functions
    Function = 3,
    /// Table definitions
    Table = 4,
    /// Memory definitions
    Memory = 5,
    /// Global definitions
    Global = 6,
    /// Exports
    Export = 7,
    /// Start function
    Start = 8,
    /// Element segments
    Element = 9,
    /// Function bodies
    Code = 10,
    /// Data segments
    Data = 11,
    /// Number of data segments
    #[strum(serialize = "datacount")]
    DataCount = 12,
    /// Any id outside of the known set (tags, proposals); carried verbatim
    Unknown = 0xFF,
}

impl SectionId {
    /// Position of the section in the canonical module layout.
    ///
    /// The data count section precedes the code section even though its id is higher.
    #[must_use]
    pub fn order(self) -> u8 {
        match self {
            SectionId::Custom | SectionId::Unknown => 0,
            SectionId::DataCount => 10,
            SectionId::Code => 11,
            SectionId::Data => 12,
            id => id as u8,
        }
    }

    /// The flag selecting this section in [`SectionFlags`].
    #[must_use]
    pub fn flag(self) -> SectionFlags {
        if self.is_opaque() {
            return SectionFlags::empty();
        }
        SectionFlags::from_bits_truncate(1 << (self as u8))
    }

    /// Sections that are never decoded and may appear anywhere: custom and unknown ones.
    #[must_use]
    pub fn is_opaque(self) -> bool {
        matches!(self, SectionId::Custom | SectionId::Unknown)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Set of sections to decode into entries when parsing a module.
    pub struct SectionFlags: u16 {
        /// Type section
        const TYPE = 1 << 1;
        /// Import section
        const IMPORT = 1 << 2;
        /// Function section
        const FUNCTION = 1 << 3;
        /// Table section
        const TABLE = 1 << 4;
        /// Memory section
        const MEMORY = 1 << 5;
        /// Global section
        const GLOBAL = 1 << 6;
        /// Export section
        const EXPORT = 1 << 7;
        /// Start section
        const START = 1 << 8;
        /// Element section
        const ELEMENT = 1 << 9;
        /// Code section
        const CODE = 1 << 10;
        /// Data section
        const DATA = 1 << 11;
        /// Data count section
        const DATA_COUNT = 1 << 12;
    }
}

/// Value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum ValType {
    /// 32-bit integer
    I32 = 0x7F,
    /// 64-bit integer
    I64 = 0x7E,
    /// 32-bit float
    F32 = 0x7D,
    /// 64-bit float
    F64 = 0x7C,
    /// 128-bit vector
    V128 = 0x7B,
    /// Function reference
    FuncRef = 0x70,
    /// External reference
    ExternRef = 0x6F,
}

/// Kind of an exported or imported entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum ExternalKind {
    /// Function
    Func = 0,
    /// Table
    Table = 1,
    /// Linear memory
    Memory = 2,
    /// Global
    Global = 3,
}

/// A reference into one of the module's index spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexRef {
    /// Index in the module as it was parsed; renumbered on write
    Original(u32),
    /// Entry created or looked up through the editor
    Handle(Handle),
}

impl From<u32> for IndexRef {
    fn from(index: u32) -> Self {
        IndexRef::Original(index)
    }
}

impl From<Handle> for IndexRef {
    fn from(handle: Handle) -> Self {
        IndexRef::Handle(handle)
    }
}

/// A function signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FuncType {
    /// Parameter types
    pub params: Vec<ValType>,
    /// Result types
    pub results: Vec<ValType>,
}

impl FuncType {
    /// Create a signature from its parameter and result types.
    #[must_use]
    pub fn new(params: impl Into<Vec<ValType>>, results: impl Into<Vec<ValType>>) -> Self {
        FuncType {
            params: params.into(),
            results: results.into(),
        }
    }
}

/// Size limits of a table or memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Initial size
    pub min: u32,
    /// Optional maximum size
    pub max: Option<u32>,
    /// Shared memory (threads)
    pub shared: bool,
}

/// A table definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    /// Reference type of the elements
    pub element: ValType,
    /// Size limits
    pub limits: Limits,
}

/// A linear memory definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    /// Size limits in pages
    pub limits: Limits,
}

/// Type of a global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    /// Value type
    pub content: ValType,
    /// Whether `global.set` is allowed
    pub mutable: bool,
}

/// A constant expression, stored with its terminating `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstExpr(pub Vec<u8>);

impl ConstExpr {
    /// `i32.const value; end`
    #[must_use]
    pub fn i32_const(value: i32) -> Self {
        let mut bytes = vec![0x41];
        crate::file::io::write_sleb128(&mut bytes, i64::from(value));
        bytes.push(0x0B);
        ConstExpr(bytes)
    }
}

/// What an import brings into the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDesc {
    /// A function of the given type
    Func(IndexRef),
    /// A table
    Table(TableType),
    /// A memory
    Memory(MemoryType),
    /// A global
    Global(GlobalType),
}

impl ImportDesc {
    /// The external kind of this import.
    #[must_use]
    pub fn kind(&self) -> ExternalKind {
        match self {
            ImportDesc::Func(_) => ExternalKind::Func,
            ImportDesc::Table(_) => ExternalKind::Table,
            ImportDesc::Memory(_) => ExternalKind::Memory,
            ImportDesc::Global(_) => ExternalKind::Global,
        }
    }
}

/// An import entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Module name, e.g. `env`
    pub module: String,
    /// Field name
    pub field: String,
    /// Imported entity
    pub desc: ImportDesc,
}

impl Import {
    /// A function import of the given type.
    pub fn func(module: impl Into<String>, field: impl Into<String>, ty: impl Into<IndexRef>) -> Self {
        Import {
            module: module.into(),
            field: field.into(),
            desc: ImportDesc::Func(ty.into()),
        }
    }
}

/// A defined global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    /// Type of the global
    pub ty: GlobalType,
    /// Initializer
    pub init: ConstExpr,
}

/// An export entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    /// Exported name
    pub name: String,
    /// Kind of the exported entity
    pub kind: ExternalKind,
    /// Index of the exported entity in the space selected by `kind`
    pub index: IndexRef,
}

/// Placement of an element segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementMode {
    /// Copied into `table` at instantiation
    Active {
        /// Table index
        table: u32,
        /// Offset expression
        offset: ConstExpr,
    },
    /// Available to `table.init`
    Passive,
    /// Only declares functions as referenceable
    Declarative,
}

/// Contents of an element segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementItems {
    /// Plain function indices
    Functions(Vec<IndexRef>),
    /// Reference-typed constant expressions
    Expressions(ValType, Vec<ConstExpr>),
}

/// An element segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSegment {
    /// Placement
    pub mode: ElementMode,
    /// Contents
    pub items: ElementItems,
}

impl ElementSegment {
    /// Function indices of a function-list segment.
    #[must_use]
    pub fn functions(&self) -> Option<&[IndexRef]> {
        match &self.items {
            ElementItems::Functions(functions) => Some(functions),
            ElementItems::Expressions(..) => None,
        }
    }
}

/// A function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBody<'a> {
    /// Run-length encoded local declarations
    pub locals: Vec<(u32, ValType)>,
    /// Instruction bytes including the final `end`
    pub code: Cow<'a, [u8]>,
}

impl FunctionBody<'_> {
    /// A body without locals.
    #[must_use]
    pub fn new(code: Vec<u8>) -> FunctionBody<'static> {
        FunctionBody {
            locals: Vec::new(),
            code: Cow::Owned(code),
        }
    }
}

/// Placement of a data segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMode {
    /// Copied into `memory` at instantiation
    Active {
        /// Memory index
        memory: u32,
        /// Offset expression
        offset: ConstExpr,
    },
    /// Available to `memory.init`
    Passive,
}

/// A data segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment<'a> {
    /// Placement
    pub mode: DataMode,
    /// Initial bytes
    pub data: Cow<'a, [u8]>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn section_order() {
        let mut ids: Vec<SectionId> = SectionId::iter().filter(|id| !id.is_opaque()).collect();
        ids.sort_by_key(|id| id.order());
        let names: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            [
                "type", "import", "function", "table", "memory", "global", "export", "start",
                "element", "datacount", "code", "data"
            ]
        );
        assert_eq!(SectionId::Code.flag(), SectionFlags::CODE);
        assert_eq!(SectionId::DataCount.flag(), SectionFlags::DATA_COUNT);
        assert_eq!(SectionId::Unknown.flag(), SectionFlags::empty());
        assert_eq!(SectionId::Unknown.to_string(), "unknown");
    }

    #[test]
    fn val_type_bytes() {
        assert_eq!(ValType::from_repr(0x7F), Some(ValType::I32));
        assert_eq!(ValType::from_repr(0x70), Some(ValType::FuncRef));
        assert_eq!(ValType::from_repr(0x40), None);
        assert_eq!(ValType::F64.to_string(), "f64");
    }

    #[test]
    fn const_expr() {
        assert_eq!(ConstExpr::i32_const(1024).0, [0x41, 0x80, 0x08, 0x0B]);
        assert_eq!(ConstExpr::i32_const(-1).0, [0x41, 0x7F, 0x0B]);
    }
}
