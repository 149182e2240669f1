//! Encoders for section entries.
//!
//! Every encoder appends to a growable buffer and resolves [`IndexRef`]s through the finalize
//! pass' [`Resolver`], so the encoded module always reflects the final index layout.

use crate::{
    file::io::{write_uleb128, write_sleb128},
    wasm::{
        handle::HandleTable,
        instruction::rewrite_expression,
        remap::{IndexRemapper, IndexSpace},
        types::{
            ConstExpr, DataMode, DataSegment, ElementItems, ElementMode, ElementSegment, Export,
            ExternalKind, FuncType, Global, GlobalType, Import, ImportDesc, IndexRef, Limits,
            TableType, ValType, FUNC_TYPE_FORM,
        },
    },
    Result,
};

/// Index resolution context of the finalize pass.
pub(crate) struct Resolver<'r> {
    pub(crate) remapper: &'r IndexRemapper,
    pub(crate) handles: &'r HandleTable,
}

impl Resolver<'_> {
    pub(crate) fn resolve(&self, space: IndexSpace, index: IndexRef) -> Result<u32> {
        self.remapper.resolve(space, index, self.handles)
    }

    /// Renumber a constant expression. Rewriters never see constant expressions.
    pub(crate) fn const_expr(&self, expr: &ConstExpr) -> Result<Vec<u8>> {
        rewrite_expression(&expr.0, self.remapper, self.handles, &mut Default::default())
    }
}

pub(crate) fn write_u32(out: &mut Vec<u8>, value: u32) {
    write_uleb128(out, u64::from(value));
}

pub(crate) fn write_len(out: &mut Vec<u8>, len: usize) {
    write_uleb128(out, len as u64);
}

pub(crate) fn write_name(out: &mut Vec<u8>, name: &str) {
    write_len(out, name.len());
    out.extend_from_slice(name.as_bytes());
}

/// Wrap `payload` into a section with the given id.
pub(crate) fn encode_section(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 6);
    out.push(id);
    write_len(&mut out, payload.len());
    out.extend_from_slice(payload);
    out
}

fn write_val_types(out: &mut Vec<u8>, types: &[ValType]) {
    write_len(out, types.len());
    out.extend(types.iter().map(|ty| *ty as u8));
}

pub(crate) fn write_func_type(out: &mut Vec<u8>, ty: &FuncType) {
    out.push(FUNC_TYPE_FORM);
    write_val_types(out, &ty.params);
    write_val_types(out, &ty.results);
}

fn write_limits(out: &mut Vec<u8>, limits: &Limits) {
    let mut flags = 0u8;
    if limits.max.is_some() {
        flags |= 0x01;
    }
    if limits.shared {
        flags |= 0x02;
    }
    out.push(flags);
    write_u32(out, limits.min);
    if let Some(max) = limits.max {
        write_u32(out, max);
    }
}

fn write_table_type(out: &mut Vec<u8>, ty: &TableType) {
    out.push(ty.element as u8);
    write_limits(out, &ty.limits);
}

fn write_global_type(out: &mut Vec<u8>, ty: &GlobalType) {
    out.push(ty.content as u8);
    out.push(u8::from(ty.mutable));
}

pub(crate) fn write_import(out: &mut Vec<u8>, import: &Import, resolver: &Resolver) -> Result<()> {
    write_name(out, &import.module);
    write_name(out, &import.field);
    out.push(import.desc.kind() as u8);
    match &import.desc {
        ImportDesc::Func(ty) => write_u32(out, resolver.resolve(IndexSpace::Type, *ty)?),
        ImportDesc::Table(ty) => write_table_type(out, ty),
        ImportDesc::Memory(ty) => write_limits(out, &ty.limits),
        ImportDesc::Global(ty) => write_global_type(out, ty),
    }
    Ok(())
}

pub(crate) fn write_global(out: &mut Vec<u8>, global: &Global, resolver: &Resolver) -> Result<()> {
    write_global_type(out, &global.ty);
    out.extend_from_slice(&resolver.const_expr(&global.init)?);
    Ok(())
}

pub(crate) fn write_export(out: &mut Vec<u8>, export: &Export, resolver: &Resolver) -> Result<()> {
    write_name(out, &export.name);
    out.push(export.kind as u8);
    let index = match (export.kind, export.index) {
        (ExternalKind::Func, index) => resolver.resolve(IndexSpace::Function, index)?,
        (ExternalKind::Global, index) => resolver.resolve(IndexSpace::Global, index)?,
        // Table and memory spaces are never renumbered.
        (_, IndexRef::Original(index)) => index,
        (_, IndexRef::Handle(handle)) => resolver.handles.get(handle)?,
    };
    write_u32(out, index);
    Ok(())
}

pub(crate) fn write_element(
    out: &mut Vec<u8>,
    segment: &ElementSegment,
    resolver: &Resolver,
) -> Result<()> {
    // Bit 2 selects expressions; the short forms 0 and 4 imply table 0 and funcref.
    let (expressions, funcref) = match &segment.items {
        ElementItems::Functions(_) => (false, true),
        ElementItems::Expressions(ty, _) => (true, *ty == ValType::FuncRef),
    };
    let placement = match &segment.mode {
        ElementMode::Active { table: 0, .. } if funcref => 0,
        ElementMode::Active { .. } => 2,
        ElementMode::Passive => 1,
        ElementMode::Declarative => 3,
    };
    let flags: u32 = placement | if expressions { 4 } else { 0 };
    write_u32(out, flags);

    if let ElementMode::Active { table, offset } = &segment.mode {
        if flags & 0x02 != 0 {
            write_u32(out, *table);
        }
        out.extend_from_slice(&resolver.const_expr(offset)?);
    }

    match &segment.items {
        ElementItems::Functions(functions) => {
            if flags & 0x03 != 0 {
                // elemkind funcref
                out.push(0x00);
            }
            write_len(out, functions.len());
            for function in functions {
                write_u32(out, resolver.resolve(IndexSpace::Function, *function)?);
            }
        }
        ElementItems::Expressions(ty, exprs) => {
            if flags & 0x03 != 0 {
                out.push(*ty as u8);
            }
            write_len(out, exprs.len());
            for expr in exprs {
                out.extend_from_slice(&resolver.const_expr(expr)?);
            }
        }
    }
    Ok(())
}

/// Encode a function body with already rewritten instruction bytes.
pub(crate) fn write_body(out: &mut Vec<u8>, locals: &[(u32, ValType)], code: &[u8]) {
    let mut body = Vec::with_capacity(code.len() + 8);
    write_len(&mut body, locals.len());
    for (count, ty) in locals {
        write_u32(&mut body, *count);
        body.push(*ty as u8);
    }
    body.extend_from_slice(code);

    write_len(out, body.len());
    out.extend_from_slice(&body);
}

pub(crate) fn write_data(out: &mut Vec<u8>, segment: &DataSegment, resolver: &Resolver) -> Result<()> {
    match &segment.mode {
        DataMode::Active { memory: 0, offset } => {
            out.push(0x00);
            out.extend_from_slice(&resolver.const_expr(offset)?);
        }
        DataMode::Passive => out.push(0x01),
        DataMode::Active { memory, offset } => {
            out.push(0x02);
            write_u32(out, *memory);
            out.extend_from_slice(&resolver.const_expr(offset)?);
        }
    }
    write_len(out, segment.data.len());
    out.extend_from_slice(&segment.data);
    Ok(())
}

/// Encode an `i32.const` instruction.
#[must_use]
pub fn encode_i32_const(value: i32) -> Vec<u8> {
    let mut out = vec![0x41];
    write_sleb128(&mut out, i64::from(value));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file::parser::Parser,
        wasm::{reader, remap::SpaceRemapper},
    };

    fn identity() -> IndexRemapper {
        IndexRemapper {
            types: SpaceRemapper::identity(IndexSpace::Type, 8),
            functions: SpaceRemapper::identity(IndexSpace::Function, 8),
            globals: SpaceRemapper::identity(IndexSpace::Global, 8),
            elements: SpaceRemapper::identity(IndexSpace::Element, 8),
            data: SpaceRemapper::identity(IndexSpace::Data, 8),
        }
    }

    #[test]
    fn element_encodings_survive() {
        let remapper = identity();
        let handles = HandleTable::default();
        let resolver = Resolver {
            remapper: &remapper,
            handles: &handles,
        };

        #[rustfmt::skip]
        let encodings: [&[u8]; 6] = [
            &[0x00, 0x41, 0x01, 0x0B, 0x02, 0x03, 0x04],
            &[0x01, 0x00, 0x01, 0x05],
            &[0x02, 0x01, 0x41, 0x00, 0x0B, 0x00, 0x01, 0x02],
            &[0x03, 0x00, 0x00],
            &[0x04, 0x41, 0x00, 0x0B, 0x01, 0xD2, 0x01, 0x0B],
            &[0x05, 0x70, 0x01, 0xD0, 0x70, 0x0B],
        ];
        for encoding in encodings {
            let segment = reader::read_element(&mut Parser::new(encoding)).unwrap();
            let mut out = Vec::new();
            write_element(&mut out, &segment, &resolver).unwrap();
            assert_eq!(out, encoding);
        }
    }

    #[test]
    fn data_and_imports() {
        let remapper = identity();
        let handles = HandleTable::default();
        let resolver = Resolver {
            remapper: &remapper,
            handles: &handles,
        };

        let encoding = [0x02, 0x01, 0x41, 0x10, 0x0B, 0x02, 0xAA, 0xBB];
        let segment = reader::read_data(&mut Parser::new(&encoding)).unwrap();
        let mut out = Vec::new();
        write_data(&mut out, &segment, &resolver).unwrap();
        assert_eq!(out, encoding);

        let encoding = [0x03, b'e', b'n', b'v', 0x01, b't', 0x01, 0x70, 0x01, 0x02, 0x03];
        let import = reader::read_import(&mut Parser::new(&encoding)).unwrap();
        let mut out = Vec::new();
        write_import(&mut out, &import, &resolver).unwrap();
        assert_eq!(out, encoding);
    }

    #[test]
    fn section_framing() {
        assert_eq!(encode_section(7, &[1, 2, 3]), [7, 3, 1, 2, 3]);
        let mut out = Vec::new();
        write_body(&mut out, &[(1, ValType::I64)], &[0x0B]);
        assert_eq!(out, [0x04, 0x01, 0x01, 0x7E, 0x0B]);
        assert_eq!(encode_i32_const(-2), [0x41, 0x7E]);
    }
}
