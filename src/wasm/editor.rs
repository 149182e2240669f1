//! The mutation-capable module editor.
//!
//! [`ModuleEditor`] decodes the known sections of a module into entry lists and keeps the raw
//! bytes of every section. Edits never touch indices directly: added entries are addressed
//! through [`Handle`]s, and the indices of the parsed module stay valid until [`ModuleEditor::write`]
//! computes the final layout, renumbers every reference and re-encodes the affected sections.
//! Sections that neither changed nor refer to a moved index space are emitted verbatim, so a
//! module without edits round-trips byte for byte.
//!
//! # Examples
//!
//! ```rust,no_run
//! use webmodkit::wasm::{FuncType, Import, ModuleEditor, ValType};
//!
//! let bytes = std::fs::read("build.wasm")?;
//! let mut editor = ModuleEditor::parse(&bytes)?;
//!
//! let ty = editor.add_type_entry(FuncType::new([ValType::I32], []))?;
//! let import = editor.add_import_entry(Import::func("a", "trace", ty))?;
//! println!("trace will be imported as handle {}", import.id());
//!
//! let patched = editor.write()?;
//! # Ok::<(), webmodkit::Error>(())
//! ```

use std::fmt;

use crate::{
    file::parser::Parser,
    wasm::{
        encode::{self, Resolver},
        handle::{Handle, HandleArena, HandleTable, HandleTarget},
        instruction::{rewrite_expression, InstructionRewriters},
        reader,
        remap::{IndexRemapper, IndexSpace, SpaceRemapper},
        section::{split_sections, RawSection},
        types::{
            DataSegment, ElementSegment, Export, ExternalKind, FuncType, FunctionBody, Global,
            Import, IndexRef, MemoryType, SectionFlags, SectionId, TableType,
        },
    },
    Error, Result,
};

fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Entries of one section: the parsed originals, addressed by their original index, followed by
/// the entries added through the editor.
#[derive(Debug)]
struct EntryList<T> {
    section: &'static str,
    original: Vec<Option<T>>,
    added: Vec<T>,
    dirty: bool,
}

impl<T> EntryList<T> {
    fn new(section: &'static str) -> Self {
        EntryList {
            section,
            original: Vec::new(),
            added: Vec::new(),
            dirty: false,
        }
    }

    fn from_entries(section: &'static str, entries: Vec<T>) -> Self {
        EntryList {
            section,
            original: entries.into_iter().map(Some).collect(),
            added: Vec::new(),
            dirty: false,
        }
    }

    fn slot(&mut self, index: u32) -> Result<&mut Option<T>> {
        let len = count(self.original.len());
        match self.original.get_mut(index as usize) {
            Some(slot) if slot.is_some() => Ok(slot),
            Some(_) => Err(malformed_error!(
                "{} entry {} has been removed",
                self.section,
                index
            )),
            None => Err(Error::EditBounds {
                section: self.section,
                index,
                count: len,
            }),
        }
    }

    fn get(&self, index: u32) -> Result<&T> {
        match self.original.get(index as usize) {
            Some(Some(entry)) => Ok(entry),
            Some(None) => Err(malformed_error!(
                "{} entry {} has been removed",
                self.section,
                index
            )),
            None => Err(Error::EditBounds {
                section: self.section,
                index,
                count: count(self.original.len()),
            }),
        }
    }

    fn edit(&mut self, index: u32, entry: T) -> Result<()> {
        *self.slot(index)? = Some(entry);
        self.dirty = true;
        Ok(())
    }

    fn remove(&mut self, index: u32) -> Result<T> {
        let removed = self.slot(index)?.take();
        self.dirty = true;
        removed.ok_or_else(|| malformed_error!("{} entry {} has been removed", self.section, index))
    }

    fn add(&mut self, entry: T) -> usize {
        self.added.push(entry);
        self.dirty = true;
        self.added.len() - 1
    }

    fn kept(&self) -> Vec<bool> {
        self.original.iter().map(Option::is_some).collect()
    }

    fn kept_count(&self) -> u32 {
        count(self.original.iter().filter(|entry| entry.is_some()).count())
    }

    fn len(&self) -> u32 {
        self.kept_count() + count(self.added.len())
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.original.iter().flatten().chain(self.added.iter())
    }
}

/// Decoder, editor and encoder of a WebAssembly module.
pub struct ModuleEditor<'a> {
    data: &'a [u8],
    sections: Vec<RawSection<'a>>,
    decoded: SectionFlags,
    present: SectionFlags,
    handles: HandleArena,

    types: EntryList<FuncType>,
    imports: EntryList<Import>,
    import_kinds: Vec<ExternalKind>,
    functions: EntryList<IndexRef>,
    tables: Vec<TableType>,
    memories: Vec<MemoryType>,
    globals: EntryList<Global>,
    exports: EntryList<Export>,
    start: Option<IndexRef>,
    elements: EntryList<ElementSegment>,
    bodies: Vec<Option<FunctionBody<'a>>>,
    added_bodies: Vec<Option<FunctionBody<'a>>>,
    code_dirty: bool,
    data_segments: EntryList<DataSegment<'a>>,
    data_count: Option<u32>,
}

impl fmt::Debug for ModuleEditor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEditor")
            .field("len", &self.data.len())
            .field("sections", &self.sections.len())
            .field("types", &self.types.len())
            .field("imports", &self.imports.len())
            .field("functions", &self.functions.len())
            .finish_non_exhaustive()
    }
}

impl<'a> ModuleEditor<'a> {
    /// Parse a module, decoding every known section.
    ///
    /// # Errors
    /// Returns an error if the container is malformed, truncated, or uses unsupported encodings.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        Self::parse_sections(data, SectionFlags::all())
    }

    /// Parse a module, decoding only the selected sections.
    ///
    /// All other known sections are skipped. A partially decoded module is read-only:
    /// [`ModuleEditor::write`] refuses to encode it.
    ///
    /// # Errors
    /// Returns an error if the container or one of the selected sections is malformed.
    pub fn parse_sections(data: &'a [u8], flags: SectionFlags) -> Result<Self> {
        let sections = split_sections(data)?;
        let mut editor = ModuleEditor {
            data,
            sections: Vec::new(),
            decoded: flags,
            present: SectionFlags::empty(),
            handles: HandleArena::default(),
            types: EntryList::new("type"),
            imports: EntryList::new("import"),
            import_kinds: Vec::new(),
            functions: EntryList::new("function"),
            tables: Vec::new(),
            memories: Vec::new(),
            globals: EntryList::new("global"),
            exports: EntryList::new("export"),
            start: None,
            elements: EntryList::new("element"),
            bodies: Vec::new(),
            added_bodies: Vec::new(),
            code_dirty: false,
            data_segments: EntryList::new("data"),
            data_count: None,
        };

        for section in &sections {
            if section.id.is_opaque() {
                continue;
            }
            editor.present |= section.id.flag();
            if flags.contains(section.id.flag()) {
                editor.decode_section(section)?;
            }
        }

        if flags.contains(SectionFlags::FUNCTION | SectionFlags::CODE)
            && editor.functions.original.len() != editor.bodies.len()
        {
            return Err(malformed_error!(
                "Function section declares {} functions but the code section holds {} bodies",
                editor.functions.original.len(),
                editor.bodies.len()
            ));
        }

        editor.sections = sections;
        Ok(editor)
    }

    fn decode_section(&mut self, section: &RawSection<'a>) -> Result<()> {
        let mut parser = Parser::new(section.payload);
        match section.id {
            SectionId::Custom | SectionId::Unknown => return Ok(()),
            SectionId::Type => {
                self.types = EntryList::from_entries(
                    "type",
                    reader::read_vec(&mut parser, reader::read_func_type)?,
                );
            }
            SectionId::Import => {
                let imports = reader::read_vec(&mut parser, reader::read_import)?;
                self.import_kinds = imports.iter().map(|import| import.desc.kind()).collect();
                self.imports = EntryList::from_entries("import", imports);
            }
            SectionId::Function => {
                let functions = reader::read_vec(&mut parser, |parser| {
                    Ok(IndexRef::Original(parser.read_uleb128()?))
                })?;
                self.functions = EntryList::from_entries("function", functions);
            }
            SectionId::Table => self.tables = reader::read_vec(&mut parser, reader::read_table_type)?,
            SectionId::Memory => {
                self.memories = reader::read_vec(&mut parser, reader::read_memory_type)?;
            }
            SectionId::Global => {
                self.globals = EntryList::from_entries(
                    "global",
                    reader::read_vec(&mut parser, reader::read_global)?,
                );
            }
            SectionId::Export => {
                self.exports = EntryList::from_entries(
                    "export",
                    reader::read_vec(&mut parser, reader::read_export)?,
                );
            }
            SectionId::Start => self.start = Some(IndexRef::Original(parser.read_uleb128()?)),
            SectionId::Element => {
                self.elements = EntryList::from_entries(
                    "element",
                    reader::read_vec(&mut parser, reader::read_element)?,
                );
            }
            SectionId::Code => {
                self.bodies = reader::read_vec(&mut parser, reader::read_body)?
                    .into_iter()
                    .map(Some)
                    .collect();
            }
            SectionId::Data => {
                self.data_segments = EntryList::from_entries(
                    "data",
                    reader::read_vec(&mut parser, reader::read_data)?,
                );
            }
            SectionId::DataCount => self.data_count = Some(parser.read_uleb128()?),
        }

        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes in the {} section",
                parser.remaining(),
                section.id
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------
    // Read access
    // ---------------------------------------------------------------------------------------

    /// The raw sections of the parsed module, in file order.
    #[must_use]
    pub fn sections(&self) -> &[RawSection<'a>] {
        &self.sections
    }

    /// Type entry `index` of the parsed module.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn type_entry(&self, index: u32) -> Result<&FuncType> {
        self.types.get(index)
    }

    /// Find a type entry structurally equal to `ty`, original entries first.
    #[must_use]
    pub fn find_type(&self, ty: &FuncType) -> Option<IndexRef> {
        if let Some(index) = self
            .types
            .original
            .iter()
            .position(|entry| entry.as_ref() == Some(ty))
        {
            return Some(IndexRef::Original(count(index)));
        }

        let added = self.types.added.iter().position(|entry| entry == ty)?;
        self.handles
            .iter()
            .enumerate()
            .find(|(_, target)| *target == HandleTarget::AddedType(added))
            .map(|(id, _)| IndexRef::Handle(Handle(count(id))))
    }

    /// Import entry `index` of the parsed module.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn import_entry(&self, index: u32) -> Result<&Import> {
        self.imports.get(index)
    }

    /// All current import entries, original entries first.
    pub fn import_entries(&self) -> impl Iterator<Item = &Import> {
        self.imports.iter()
    }

    /// Number of function imports of the parsed module.
    #[must_use]
    pub fn imported_function_count(&self) -> u32 {
        count(
            self.import_kinds
                .iter()
                .filter(|kind| **kind == ExternalKind::Func)
                .count(),
        )
    }

    /// Number of global imports of the parsed module.
    #[must_use]
    pub fn imported_global_count(&self) -> u32 {
        count(
            self.import_kinds
                .iter()
                .filter(|kind| **kind == ExternalKind::Global)
                .count(),
        )
    }

    /// Number of functions (imported and defined) of the parsed module.
    #[must_use]
    pub fn function_count(&self) -> u32 {
        self.imported_function_count() + count(self.functions.original.len())
    }

    /// Type of defined function `index` (position in the function section).
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn function_entry(&self, index: u32) -> Result<IndexRef> {
        self.functions.get(index).copied()
    }

    /// Table definitions of the parsed module.
    #[must_use]
    pub fn tables(&self) -> &[TableType] {
        &self.tables
    }

    /// Memory definitions of the parsed module.
    #[must_use]
    pub fn memories(&self) -> &[MemoryType] {
        &self.memories
    }

    /// Global entry `index` of the global section.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn global_entry(&self, index: u32) -> Result<&Global> {
        self.globals.get(index)
    }

    /// All current export entries, original entries first.
    pub fn export_entries(&self) -> impl Iterator<Item = &Export> {
        self.exports.iter()
    }

    /// The start function, if any.
    #[must_use]
    pub fn start(&self) -> Option<IndexRef> {
        self.start
    }

    /// Element segment `index` of the parsed module.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn element_entry(&self, index: u32) -> Result<&ElementSegment> {
        self.elements.get(index)
    }

    /// Body of defined function `index` (position in the code section).
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn code_entry(&self, index: u32) -> Result<&FunctionBody<'a>> {
        match self.bodies.get(index as usize) {
            Some(Some(body)) => Ok(body),
            Some(None) => Err(malformed_error!("code entry {} has been removed", index)),
            None => Err(Error::EditBounds {
                section: "code",
                index,
                count: count(self.bodies.len()),
            }),
        }
    }

    /// Bodies of the defined functions of the parsed module with their code section position.
    pub fn code_entries(&self) -> impl Iterator<Item = (u32, &FunctionBody<'a>)> {
        self.bodies
            .iter()
            .enumerate()
            .filter_map(|(index, body)| body.as_ref().map(|body| (count(index), body)))
    }

    /// Data segment `index` of the parsed module.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn data_entry(&self, index: u32) -> Result<&DataSegment<'a>> {
        self.data_segments.get(index)
    }

    // ---------------------------------------------------------------------------------------
    // Edits
    // ---------------------------------------------------------------------------------------

    /// Append a function type.
    ///
    /// # Errors
    /// Currently infallible; kept fallible like every other edit.
    pub fn add_type_entry(&mut self, ty: FuncType) -> Result<Handle> {
        let added = self.types.add(ty);
        Ok(self.handles.alloc(HandleTarget::AddedType(added)))
    }

    /// Replace type entry `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn edit_type_entry(&mut self, index: u32, ty: FuncType) -> Result<()> {
        self.types.edit(index, ty)
    }

    /// Remove type entry `index`. Every remaining reference to it fails the write.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn remove_type_entry(&mut self, index: u32) -> Result<()> {
        self.types.remove(index).map(|_| ())
    }

    /// Append an import.
    ///
    /// The handle resolves to the new function or global index. Imports are placed after the
    /// existing imports of their kind, shifting every defined function or global by one.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] for table and memory imports.
    pub fn add_import_entry(&mut self, import: Import) -> Result<Handle> {
        match import.desc.kind() {
            ExternalKind::Func | ExternalKind::Global => {}
            kind => return Err(Error::NotSupported(format!("adding a {kind} import"))),
        }
        let added = self.imports.add(import);
        Ok(self.handles.alloc(HandleTarget::AddedImport(added)))
    }

    /// Replace import entry `index`. The kind of the import cannot change.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index and [`Error::NotSupported`] when the
    /// kind differs.
    pub fn edit_import_entry(&mut self, index: u32, import: Import) -> Result<()> {
        let kind = self.imports.get(index)?.desc.kind();
        if kind != import.desc.kind() {
            return Err(Error::NotSupported(format!(
                "changing import {index} from {kind} to {}",
                import.desc.kind()
            )));
        }
        self.imports.edit(index, import)
    }

    /// Remove import entry `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn remove_import_entry(&mut self, index: u32) -> Result<()> {
        self.imports.remove(index).map(|_| ())
    }

    /// Append a defined function of type `ty`. Its body is supplied through
    /// [`ModuleEditor::add_code_entry`].
    ///
    /// # Errors
    /// Currently infallible; kept fallible like every other edit.
    pub fn add_function_entry(&mut self, ty: impl Into<IndexRef>) -> Result<Handle> {
        let added = self.functions.add(ty.into());
        self.added_bodies.push(None);
        Ok(self.handles.alloc(HandleTarget::AddedFunction(added)))
    }

    /// Change the type of defined function `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn edit_function_entry(&mut self, index: u32, ty: impl Into<IndexRef>) -> Result<()> {
        self.functions.edit(index, ty.into())
    }

    /// Remove defined function `index` together with its body.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn remove_function_entry(&mut self, index: u32) -> Result<()> {
        self.functions.remove(index)?;
        if let Some(body) = self.bodies.get_mut(index as usize) {
            *body = None;
        }
        self.code_dirty = true;
        Ok(())
    }

    /// Handle of the function at `index` in the function space of the parsed module.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn get_function_index(&mut self, index: u32) -> Result<Handle> {
        let total = self.function_count();
        if index >= total {
            return Err(Error::EditBounds {
                section: "function",
                index,
                count: total,
            });
        }
        Ok(self.handles.alloc(HandleTarget::Function(index)))
    }

    /// Append a global.
    ///
    /// # Errors
    /// Currently infallible; kept fallible like every other edit.
    pub fn add_global_entry(&mut self, global: Global) -> Result<Handle> {
        let added = self.globals.add(global);
        Ok(self.handles.alloc(HandleTarget::AddedGlobal(added)))
    }

    /// Replace global entry `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn edit_global_entry(&mut self, index: u32, global: Global) -> Result<()> {
        self.globals.edit(index, global)
    }

    /// Remove global entry `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn remove_global_entry(&mut self, index: u32) -> Result<()> {
        self.globals.remove(index).map(|_| ())
    }

    /// Handle of the global at `index` in the global space of the parsed module.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn get_global_index(&mut self, index: u32) -> Result<Handle> {
        let total = self.imported_global_count() + count(self.globals.original.len());
        if index >= total {
            return Err(Error::EditBounds {
                section: "global",
                index,
                count: total,
            });
        }
        Ok(self.handles.alloc(HandleTarget::Global(index)))
    }

    /// Append an export.
    ///
    /// # Errors
    /// Currently infallible; kept fallible like every other edit.
    pub fn add_export_entry(&mut self, export: Export) -> Result<Handle> {
        let added = self.exports.add(export);
        Ok(self.handles.alloc(HandleTarget::AddedExport(added)))
    }

    /// Replace export entry `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn edit_export_entry(&mut self, index: u32, export: Export) -> Result<()> {
        self.exports.edit(index, export)
    }

    /// Remove export entry `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn remove_export_entry(&mut self, index: u32) -> Result<()> {
        self.exports.remove(index).map(|_| ())
    }

    /// Append an element segment.
    ///
    /// # Errors
    /// Currently infallible; kept fallible like every other edit.
    pub fn add_element_entry(&mut self, segment: ElementSegment) -> Result<Handle> {
        let added = self.elements.add(segment);
        Ok(self.handles.alloc(HandleTarget::AddedElement(added)))
    }

    /// Replace element segment `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn edit_element_entry(&mut self, index: u32, segment: ElementSegment) -> Result<()> {
        self.elements.edit(index, segment)
    }

    /// Remove element segment `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn remove_element_entry(&mut self, index: u32) -> Result<()> {
        self.elements.remove(index).map(|_| ())
    }

    /// Supply the body of a function added with [`ModuleEditor::add_function_entry`].
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if `function` is not the handle of an added function.
    pub fn add_code_entry(&mut self, function: Handle, body: FunctionBody<'a>) -> Result<()> {
        let HandleTarget::AddedFunction(added) = self.handles.target(function)? else {
            return Err(Error::InvalidHandle(function.id()));
        };
        match self.added_bodies.get_mut(added) {
            Some(slot) => {
                *slot = Some(body);
                Ok(())
            }
            None => Err(Error::InvalidHandle(function.id())),
        }
    }

    /// Replace the body of defined function `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn edit_code_entry(&mut self, index: u32, body: FunctionBody<'a>) -> Result<()> {
        let len = count(self.bodies.len());
        match self.bodies.get_mut(index as usize) {
            Some(Some(slot)) => {
                *slot = body;
                self.code_dirty = true;
                Ok(())
            }
            Some(None) => Err(malformed_error!("code entry {} has been removed", index)),
            None => Err(Error::EditBounds {
                section: "code",
                index,
                count: len,
            }),
        }
    }

    /// Append a data segment.
    ///
    /// # Errors
    /// Currently infallible; kept fallible like every other edit.
    pub fn add_data_entry(&mut self, segment: DataSegment<'a>) -> Result<Handle> {
        let added = self.data_segments.add(segment);
        Ok(self.handles.alloc(HandleTarget::AddedData(added)))
    }

    /// Replace data segment `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn edit_data_entry(&mut self, index: u32, segment: DataSegment<'a>) -> Result<()> {
        self.data_segments.edit(index, segment)
    }

    /// Remove data segment `index`.
    ///
    /// # Errors
    /// Returns [`Error::EditBounds`] for an unknown index.
    pub fn remove_data_entry(&mut self, index: u32) -> Result<()> {
        self.data_segments.remove(index).map(|_| ())
    }

    // ---------------------------------------------------------------------------------------
    // Finalize
    // ---------------------------------------------------------------------------------------

    fn import_kept(&self, kind: ExternalKind) -> Vec<bool> {
        self.imports
            .original
            .iter()
            .zip(&self.import_kinds)
            .filter(|(_, import_kind)| **import_kind == kind)
            .map(|(import, _)| import.is_some())
            .collect()
    }

    fn added_imports(&self, kind: ExternalKind) -> u32 {
        count(
            self.imports
                .added
                .iter()
                .filter(|import| import.desc.kind() == kind)
                .count(),
        )
    }

    fn remapper(&self) -> IndexRemapper {
        let func_imports = self.import_kept(ExternalKind::Func);
        let func_base = count(func_imports.iter().filter(|kept| **kept).count())
            + self.added_imports(ExternalKind::Func);
        let global_imports = self.import_kept(ExternalKind::Global);
        let global_base = count(global_imports.iter().filter(|kept| **kept).count())
            + self.added_imports(ExternalKind::Global);

        IndexRemapper {
            types: SpaceRemapper::from_segments(IndexSpace::Type, &[(0, &self.types.kept())]),
            functions: SpaceRemapper::from_segments(
                IndexSpace::Function,
                &[(0, &func_imports), (func_base, &self.functions.kept())],
            ),
            globals: SpaceRemapper::from_segments(
                IndexSpace::Global,
                &[(0, &global_imports), (global_base, &self.globals.kept())],
            ),
            elements: SpaceRemapper::from_segments(
                IndexSpace::Element,
                &[(0, &self.elements.kept())],
            ),
            data: SpaceRemapper::from_segments(IndexSpace::Data, &[(0, &self.data_segments.kept())]),
        }
    }

    fn resolve_handles(&self, remapper: &IndexRemapper) -> HandleTable {
        let kept_func_imports = count(
            self.import_kept(ExternalKind::Func)
                .iter()
                .filter(|kept| **kept)
                .count(),
        );
        let kept_global_imports = count(
            self.import_kept(ExternalKind::Global)
                .iter()
                .filter(|kept| **kept)
                .count(),
        );

        // Position of every added import within the space of its kind.
        let mut next_func = kept_func_imports;
        let mut next_global = kept_global_imports;
        let added_imports: Vec<u32> = self
            .imports
            .added
            .iter()
            .map(|import| match import.desc.kind() {
                ExternalKind::Global => {
                    next_global += 1;
                    next_global - 1
                }
                _ => {
                    next_func += 1;
                    next_func - 1
                }
            })
            .collect();

        let defined_functions = next_func + self.functions.kept_count();
        let defined_globals = next_global + self.globals.kept_count();

        let values = self
            .handles
            .iter()
            .map(|target| match target {
                HandleTarget::AddedType(n) => Some(self.types.kept_count() + count(n)),
                HandleTarget::AddedImport(n) => added_imports.get(n).copied(),
                HandleTarget::AddedFunction(n) => Some(defined_functions + count(n)),
                HandleTarget::AddedGlobal(n) => Some(defined_globals + count(n)),
                HandleTarget::AddedExport(n) => Some(self.exports.kept_count() + count(n)),
                HandleTarget::AddedElement(n) => Some(self.elements.kept_count() + count(n)),
                HandleTarget::AddedData(n) => Some(self.data_segments.kept_count() + count(n)),
                HandleTarget::Function(old) => remapper.functions.lookup(old),
                HandleTarget::Global(old) => remapper.globals.lookup(old),
            })
            .collect();
        HandleTable::new(values)
    }

    /// Whether a section has to be re-encoded instead of copied.
    fn needs_encode(&self, id: SectionId, remapper: &IndexRemapper, rewriting: bool) -> bool {
        let types = !remapper.types.is_identity();
        let functions = !remapper.functions.is_identity();
        let globals = !remapper.globals.is_identity();

        match id {
            SectionId::Custom | SectionId::Unknown | SectionId::Table | SectionId::Memory => {
                false
            }
            SectionId::Type => self.types.dirty,
            SectionId::Import => self.imports.dirty || types,
            SectionId::Function => self.functions.dirty || types,
            SectionId::Global => self.globals.dirty || globals || functions,
            SectionId::Export => self.exports.dirty || functions || globals,
            SectionId::Start => functions,
            SectionId::Element => self.elements.dirty || functions || globals,
            SectionId::Code => {
                self.code_dirty
                    || self.functions.dirty
                    || rewriting
                    || !remapper.is_identity()
            }
            SectionId::Data => self.data_segments.dirty || globals,
            SectionId::DataCount => self.data_segments.dirty,
        }
    }

    /// Whether a section absent from the parsed module has to be created.
    fn needs_create(&self, id: SectionId) -> bool {
        if self.present.contains(id.flag()) {
            return false;
        }
        match id {
            SectionId::Type => !self.types.added.is_empty(),
            SectionId::Import => !self.imports.added.is_empty(),
            SectionId::Function | SectionId::Code => !self.functions.added.is_empty(),
            SectionId::Global => !self.globals.added.is_empty(),
            SectionId::Export => !self.exports.added.is_empty(),
            SectionId::Element => !self.elements.added.is_empty(),
            SectionId::Data => !self.data_segments.added.is_empty(),
            _ => false,
        }
    }

    fn encode_payload(
        &self,
        id: SectionId,
        resolver: &Resolver,
        rewriters: &mut InstructionRewriters<'_>,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match id {
            SectionId::Type => {
                encode::write_u32(&mut out, self.types.len());
                for ty in self.types.iter() {
                    encode::write_func_type(&mut out, ty);
                }
            }
            SectionId::Import => {
                encode::write_u32(&mut out, self.imports.len());
                for import in self.imports.iter() {
                    encode::write_import(&mut out, import, resolver)?;
                }
            }
            SectionId::Function => {
                encode::write_u32(&mut out, self.functions.len());
                for ty in self.functions.iter() {
                    encode::write_u32(&mut out, resolver.resolve(IndexSpace::Type, *ty)?);
                }
            }
            SectionId::Global => {
                encode::write_u32(&mut out, self.globals.len());
                for global in self.globals.iter() {
                    encode::write_global(&mut out, global, resolver)?;
                }
            }
            SectionId::Export => {
                encode::write_u32(&mut out, self.exports.len());
                for export in self.exports.iter() {
                    encode::write_export(&mut out, export, resolver)?;
                }
            }
            SectionId::Start => {
                if let Some(start) = self.start {
                    encode::write_u32(&mut out, resolver.resolve(IndexSpace::Function, start)?);
                }
            }
            SectionId::Element => {
                encode::write_u32(&mut out, self.elements.len());
                for segment in self.elements.iter() {
                    encode::write_element(&mut out, segment, resolver)?;
                }
            }
            SectionId::Code => {
                encode::write_u32(&mut out, self.functions.len());
                for body in self.bodies.iter().flatten() {
                    let code = rewrite_expression(
                        &body.code,
                        resolver.remapper,
                        resolver.handles,
                        rewriters,
                    )?;
                    encode::write_body(&mut out, &body.locals, &code);
                }
                for (added, body) in self.added_bodies.iter().enumerate() {
                    let Some(body) = body else {
                        return Err(malformed_error!("Added function {} has no body", added));
                    };
                    let code = rewrite_expression(
                        &body.code,
                        resolver.remapper,
                        resolver.handles,
                        rewriters,
                    )?;
                    encode::write_body(&mut out, &body.locals, &code);
                }
            }
            SectionId::Data => {
                encode::write_u32(&mut out, self.data_segments.len());
                for segment in self.data_segments.iter() {
                    encode::write_data(&mut out, segment, resolver)?;
                }
            }
            SectionId::DataCount => encode::write_u32(&mut out, self.data_segments.len()),
            SectionId::Custom | SectionId::Unknown | SectionId::Table | SectionId::Memory => {
                return Err(malformed_error!("The {} section is never re-encoded", id));
            }
        }
        Ok(out)
    }

    /// Finalize all edits and encode the module.
    ///
    /// Untouched sections are copied verbatim. Sections with edits, or with references into an
    /// index space that moved, are re-encoded; sections that did not exist but received entries
    /// are created at their canonical position.
    ///
    /// # Errors
    /// - [`Error::NotSupported`] for a module parsed with [`ModuleEditor::parse_sections`] that
    ///   skipped sections
    /// - [`Error::Malformed`] for references to removed entries or added functions without body
    pub fn write(self) -> Result<Vec<u8>> {
        self.write_with(&mut InstructionRewriters::new())
    }

    /// Finalize all edits and encode the module, passing every instruction through `rewriters`.
    ///
    /// A non-empty rewriter set forces the code section to be re-encoded.
    ///
    /// # Errors
    /// The errors of [`ModuleEditor::write`] and those returned by the rewriters.
    pub fn write_with(self, rewriters: &mut InstructionRewriters<'_>) -> Result<Vec<u8>> {
        if self.decoded != SectionFlags::all() {
            return Err(Error::NotSupported(
                "writing a partially decoded module".to_string(),
            ));
        }
        if self.bodies.len() != self.functions.original.len() {
            return Err(malformed_error!(
                "Module declares {} functions without a code section",
                self.functions.original.len()
            ));
        }

        let remapper = self.remapper();
        let handles = self.resolve_handles(&remapper);
        let resolver = Resolver {
            remapper: &remapper,
            handles: &handles,
        };
        let rewriting = !rewriters.is_empty();

        let mut missing: Vec<SectionId> = [
            SectionId::Type,
            SectionId::Import,
            SectionId::Function,
            SectionId::Global,
            SectionId::Export,
            SectionId::Element,
            SectionId::Code,
            SectionId::Data,
        ]
        .into_iter()
        .filter(|id| self.needs_create(*id))
        .collect();
        missing.sort_by_key(|id| id.order());

        let mut out = Vec::with_capacity(self.data.len() + 256);
        out.extend_from_slice(&self.data[..8]);

        for section in &self.sections {
            if !section.id.is_opaque() {
                while let Some(id) = missing.first().copied() {
                    if id.order() > section.id.order() {
                        break;
                    }
                    missing.remove(0);
                    let payload = self.encode_payload(id, &resolver, rewriters)?;
                    out.extend_from_slice(&encode::encode_section(id as u8, &payload));
                }
            }

            if self.needs_encode(section.id, &remapper, rewriting) {
                let payload = self.encode_payload(section.id, &resolver, rewriters)?;
                out.extend_from_slice(&encode::encode_section(section.id as u8, &payload));
            } else {
                out.extend_from_slice(section.raw);
            }
        }
        for id in missing {
            let payload = self.encode_payload(id, &resolver, rewriters)?;
            out.extend_from_slice(&encode::encode_section(id as u8, &payload));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test::ModuleBuilder,
        wasm::{
            instruction::{call_target, encode_call, InstructionRewrite, OP_CALL},
            types::{ConstExpr, ElementItems, ElementMode, ValType},
        },
    };

    fn sample() -> Vec<u8> {
        // imports: env.log (type 0); defined: f1 calls f2, f2 calls the import.
        ModuleBuilder::new()
            .ty(&[ValType::I32], &[])
            .ty(&[], &[])
            .import_func("env", "log", 0)
            .function(1, &[0x10, 0x02, 0x0B])
            .function(1, &[0x41, 0x07, 0x10, 0x00, 0x0B])
            .table(3)
            .memory(1)
            .export_func("main", 1)
            .element(1, &[1, 2])
            .data(1024, b"mscorlib.dll\0")
            .custom("name", &[0x00])
            .build()
    }

    #[test]
    fn round_trip_without_edits() {
        let bytes = sample();
        let editor = ModuleEditor::parse(&bytes).unwrap();
        assert_eq!(editor.write().unwrap(), bytes);
    }

    /// A custom section between type and import, and a tag section (id 13) after memory.
    fn with_opaque_sections() -> Vec<u8> {
        ModuleBuilder::new()
            .ty(&[ValType::I32], &[])
            .raw_section(1, 0, b"\x09producers\x00")
            .import_func("env", "log", 0)
            .function(0, &[0x20, 0x00, 0x10, 0x00, 0x0B])
            .memory(1)
            .raw_section(5, 13, &[0x01, 0x00, 0x00])
            .export_func("main", 1)
            .build()
    }

    fn opaque_raw(sections: &[RawSection]) -> Vec<(u8, Vec<u8>)> {
        sections
            .iter()
            .filter(|section| section.id.is_opaque())
            .map(|section| (section.code, section.raw.to_vec()))
            .collect()
    }

    #[test]
    fn opaque_sections_round_trip() {
        let bytes = with_opaque_sections();
        let editor = ModuleEditor::parse(&bytes).unwrap();
        let ids: Vec<u8> = editor.sections().iter().map(|section| section.code).collect();
        assert_eq!(ids, [1, 0, 2, 3, 5, 13, 7, 10]);
        assert_eq!(editor.write().unwrap(), bytes);
    }

    #[test]
    fn opaque_sections_keep_their_position_when_editing() {
        let bytes = with_opaque_sections();
        let mut editor = ModuleEditor::parse(&bytes).unwrap();
        editor
            .add_import_entry(Import::func("a", "hook", IndexRef::Original(0)))
            .unwrap();
        let patched = editor.write().unwrap();
        assert_ne!(patched, bytes);

        let before = split_sections(&bytes).unwrap();
        let after = split_sections(&patched).unwrap();
        let ids: Vec<u8> = after.iter().map(|section| section.code).collect();
        assert_eq!(ids, [1, 0, 2, 3, 5, 13, 7, 10]);
        assert_eq!(opaque_raw(&after), opaque_raw(&before));

        let editor = ModuleEditor::parse(&patched).unwrap();
        assert_eq!(editor.imported_function_count(), 2);
        assert_eq!(&*editor.code_entry(0).unwrap().code, &[0x20, 0x00, 0x10, 0x00, 0x0B]);
        assert_eq!(editor.export_entries().next().unwrap().index, IndexRef::Original(2));
    }

    #[test]
    fn round_trip_with_identity_rewriter() {
        let bytes = sample();
        let editor = ModuleEditor::parse(&bytes).unwrap();
        let mut rewriters = InstructionRewriters::new();
        rewriters.add(OP_CALL, |_, _| Ok(InstructionRewrite::Unchanged));
        assert_eq!(editor.write_with(&mut rewriters).unwrap(), bytes);
    }

    #[test]
    fn read_access() {
        let bytes = sample();
        let editor = ModuleEditor::parse(&bytes).unwrap();
        assert_eq!(editor.imported_function_count(), 1);
        assert_eq!(editor.function_count(), 3);
        assert_eq!(editor.type_entry(0).unwrap(), &FuncType::new([ValType::I32], []));
        assert_eq!(
            editor.find_type(&FuncType::new([], [])),
            Some(IndexRef::Original(1))
        );
        assert_eq!(editor.find_type(&FuncType::new([ValType::F64], [])), None);
        assert_eq!(
            editor.element_entry(0).unwrap().functions().unwrap(),
            &[IndexRef::Original(1), IndexRef::Original(2)]
        );
        assert_eq!(editor.code_entries().count(), 2);
        assert_eq!(editor.tables().len(), 1);
        assert!(matches!(
            editor.element_entry(3),
            Err(Error::EditBounds {
                section: "element",
                index: 3,
                count: 1
            })
        ));
    }

    #[test]
    fn added_import_shifts_defined_functions() {
        let bytes = sample();
        let mut editor = ModuleEditor::parse(&bytes).unwrap();
        let ty = editor.find_type(&FuncType::new([], [])).unwrap();
        let import = editor.add_import_entry(Import::func("a", "hook", ty)).unwrap();
        let target = editor.get_function_index(2).unwrap();

        let mut seen = Vec::new();
        let mut rewriters = InstructionRewriters::new();
        rewriters.add(OP_CALL, |bytes, handles| {
            let callee = call_target(bytes)?;
            seen.push(callee);
            if callee == handles.get(target)? {
                Ok(InstructionRewrite::Replace(encode_call(handles.get(import)?)))
            } else {
                Ok(InstructionRewrite::Unchanged)
            }
        });
        let patched = editor.write_with(&mut rewriters).unwrap();
        drop(rewriters);
        // f1 called f2 (now 3) and f2 called the untouched import 0.
        assert_eq!(seen, [3, 0]);

        let editor = ModuleEditor::parse(&patched).unwrap();
        assert_eq!(editor.imported_function_count(), 2);
        assert_eq!(editor.import_entry(1).unwrap().field, "hook");
        assert_eq!(&*editor.code_entry(0).unwrap().code, &[0x10, 0x01, 0x0B]);
        assert_eq!(
            editor.element_entry(0).unwrap().functions().unwrap(),
            &[IndexRef::Original(2), IndexRef::Original(3)]
        );
        let export = editor.export_entries().next().unwrap();
        assert_eq!(export.index, IndexRef::Original(2));
        // Data section untouched.
        assert_eq!(&*editor.data_entry(0).unwrap().data, b"mscorlib.dll\0");
    }

    #[test]
    fn added_function_with_body() {
        let bytes = sample();
        let mut editor = ModuleEditor::parse(&bytes).unwrap();
        let ty = editor.add_type_entry(FuncType::new([], [ValType::I32])).unwrap();
        let function = editor.add_function_entry(ty).unwrap();
        editor
            .add_code_entry(function, FunctionBody::new(vec![0x41, 0x2A, 0x0B]))
            .unwrap();
        editor
            .add_export_entry(Export {
                name: "answer".to_string(),
                kind: ExternalKind::Func,
                index: function.into(),
            })
            .unwrap();
        editor
            .add_element_entry(ElementSegment {
                mode: ElementMode::Passive,
                items: ElementItems::Functions(vec![function.into()]),
            })
            .unwrap();

        let patched = editor.write().unwrap();
        let editor = ModuleEditor::parse(&patched).unwrap();
        assert_eq!(editor.function_count(), 4);
        assert_eq!(editor.function_entry(2).unwrap(), IndexRef::Original(2));
        assert_eq!(&*editor.code_entry(2).unwrap().code, &[0x41, 0x2A, 0x0B]);
        let exports: Vec<&Export> = editor.export_entries().collect();
        assert_eq!(exports[1].name, "answer");
        assert_eq!(exports[1].index, IndexRef::Original(3));
        assert_eq!(
            editor.element_entry(1).unwrap().functions().unwrap(),
            &[IndexRef::Original(3)]
        );
    }

    #[test]
    fn added_function_without_body() {
        let bytes = sample();
        let mut editor = ModuleEditor::parse(&bytes).unwrap();
        editor.add_function_entry(0u32).unwrap();
        assert!(matches!(editor.write(), Err(Error::Malformed { .. })));
    }

    #[test]
    fn removing_referenced_function() {
        let bytes = sample();
        let mut editor = ModuleEditor::parse(&bytes).unwrap();
        editor.remove_function_entry(1).unwrap();
        // f1 still calls f2.
        assert!(matches!(editor.write(), Err(Error::Malformed { .. })));
    }

    #[test]
    fn remove_and_edit() {
        let bytes = sample();
        let mut editor = ModuleEditor::parse(&bytes).unwrap();
        editor.remove_export_entry(0).unwrap();
        editor
            .edit_data_entry(
                0,
                DataSegment {
                    mode: crate::wasm::types::DataMode::Active {
                        memory: 0,
                        offset: ConstExpr::i32_const(2048),
                    },
                    data: b"abc".to_vec().into(),
                },
            )
            .unwrap();
        assert!(matches!(
            editor.remove_export_entry(0),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            editor.edit_global_entry(0, Global {
                ty: crate::wasm::types::GlobalType {
                    content: ValType::I32,
                    mutable: false
                },
                init: ConstExpr::i32_const(0)
            }),
            Err(Error::EditBounds { .. })
        ));

        let patched = editor.write().unwrap();
        let editor = ModuleEditor::parse(&patched).unwrap();
        assert_eq!(editor.export_entries().count(), 0);
        assert_eq!(&*editor.data_entry(0).unwrap().data, b"abc");
    }

    #[test]
    fn creates_missing_sections_in_order() {
        let bytes = ModuleBuilder::new()
            .ty(&[], &[])
            .function(0, &[0x0B])
            .build();
        let mut editor = ModuleEditor::parse(&bytes).unwrap();
        editor.add_import_entry(Import::func("a", "b", 0u32)).unwrap();
        editor
            .add_global_entry(Global {
                ty: crate::wasm::types::GlobalType {
                    content: ValType::I32,
                    mutable: true,
                },
                init: ConstExpr::i32_const(5),
            })
            .unwrap();
        let patched = editor.write().unwrap();

        let ids: Vec<SectionId> = split_sections(&patched)
            .unwrap()
            .iter()
            .map(|section| section.id)
            .collect();
        assert_eq!(
            ids,
            [
                SectionId::Type,
                SectionId::Import,
                SectionId::Function,
                SectionId::Global,
                SectionId::Code
            ]
        );
    }

    #[test]
    fn table_imports_not_supported() {
        let bytes = sample();
        let mut editor = ModuleEditor::parse(&bytes).unwrap();
        let import = Import {
            module: "env".to_string(),
            field: "table".to_string(),
            desc: crate::wasm::types::ImportDesc::Table(editor.tables()[0]),
        };
        assert!(matches!(
            editor.add_import_entry(import),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn partial_parse_is_read_only() {
        let bytes = sample();
        let editor = ModuleEditor::parse_sections(&bytes, SectionFlags::ELEMENT).unwrap();
        assert_eq!(editor.element_entry(0).unwrap().functions().unwrap().len(), 2);
        assert!(editor.type_entry(0).is_err());
        assert!(matches!(editor.write(), Err(Error::NotSupported(_))));
    }
}
