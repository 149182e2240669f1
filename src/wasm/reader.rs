//! Decoders for the entries of the known sections.

use std::borrow::Cow;

use crate::{
    file::parser::Parser,
    wasm::{
        instruction::{self, OP_END},
        types::{
            ConstExpr, DataMode, DataSegment, ElementItems, ElementMode, ElementSegment, Export,
            ExternalKind, FuncType, FunctionBody, Global, GlobalType, Import, ImportDesc, IndexRef,
            Limits, MemoryType, TableType, ValType, FUNC_TYPE_FORM,
        },
    },
    Error, Result,
};

/// Read a `vec(T)`: a uleb128 count followed by the elements.
pub(crate) fn read_vec<'a, T>(
    parser: &mut Parser<'a>,
    mut read: impl FnMut(&mut Parser<'a>) -> Result<T>,
) -> Result<Vec<T>> {
    let count = parser.read_uleb128()? as usize;
    // Every element takes at least one byte; reject counts the payload cannot hold.
    if count > parser.remaining() {
        return Err(out_of_bounds_error!());
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(read(parser)?);
    }
    Ok(entries)
}

pub(crate) fn read_val_type(parser: &mut Parser) -> Result<ValType> {
    let byte = parser.read_le::<u8>()?;
    ValType::from_repr(byte).ok_or_else(|| malformed_error!("Invalid value type {:#04x}", byte))
}

pub(crate) fn read_func_type(parser: &mut Parser) -> Result<FuncType> {
    let form = parser.read_le::<u8>()?;
    if form != FUNC_TYPE_FORM {
        return Err(Error::NotSupported(format!("type form {form:#04x}")));
    }

    Ok(FuncType {
        params: read_vec(parser, read_val_type)?,
        results: read_vec(parser, read_val_type)?,
    })
}

pub(crate) fn read_limits(parser: &mut Parser) -> Result<Limits> {
    let flags = parser.read_le::<u8>()?;
    if flags > 0x03 {
        return Err(Error::NotSupported(format!("limits flags {flags:#04x}")));
    }

    let min = parser.read_uleb128()?;
    let max = if flags & 0x01 != 0 {
        Some(parser.read_uleb128()?)
    } else {
        None
    };
    Ok(Limits {
        min,
        max,
        shared: flags & 0x02 != 0,
    })
}

pub(crate) fn read_table_type(parser: &mut Parser) -> Result<TableType> {
    if parser.peek_byte()? == 0x40 {
        return Err(Error::NotSupported(
            "table with initializer expression".to_string(),
        ));
    }

    Ok(TableType {
        element: read_val_type(parser)?,
        limits: read_limits(parser)?,
    })
}

pub(crate) fn read_memory_type(parser: &mut Parser) -> Result<MemoryType> {
    Ok(MemoryType {
        limits: read_limits(parser)?,
    })
}

pub(crate) fn read_global_type(parser: &mut Parser) -> Result<GlobalType> {
    let content = read_val_type(parser)?;
    let mutable = match parser.read_le::<u8>()? {
        0 => false,
        1 => true,
        other => return Err(malformed_error!("Invalid global mutability {}", other)),
    };
    Ok(GlobalType { content, mutable })
}

/// Read a constant expression up to and including its `end`.
pub(crate) fn read_const_expr(parser: &mut Parser) -> Result<ConstExpr> {
    let start = parser.pos();
    loop {
        let instruction = instruction::decode(parser)?;
        if instruction.opcode == OP_END {
            break;
        }
    }
    Ok(ConstExpr(parser.data()[start..parser.pos()].to_vec()))
}

pub(crate) fn read_import(parser: &mut Parser) -> Result<Import> {
    let module = parser.read_name()?;
    let field = parser.read_name()?;
    let desc = match parser.read_le::<u8>()? {
        0x00 => ImportDesc::Func(IndexRef::Original(parser.read_uleb128()?)),
        0x01 => ImportDesc::Table(read_table_type(parser)?),
        0x02 => ImportDesc::Memory(read_memory_type(parser)?),
        0x03 => ImportDesc::Global(read_global_type(parser)?),
        other => return Err(Error::NotSupported(format!("import kind {other:#04x}"))),
    };
    Ok(Import {
        module,
        field,
        desc,
    })
}

pub(crate) fn read_global(parser: &mut Parser) -> Result<Global> {
    Ok(Global {
        ty: read_global_type(parser)?,
        init: read_const_expr(parser)?,
    })
}

pub(crate) fn read_export(parser: &mut Parser) -> Result<Export> {
    let name = parser.read_name()?;
    let kind_byte = parser.read_le::<u8>()?;
    let Some(kind) = ExternalKind::from_repr(kind_byte) else {
        return Err(Error::NotSupported(format!("export kind {kind_byte:#04x}")));
    };
    Ok(Export {
        name,
        kind,
        index: IndexRef::Original(parser.read_uleb128()?),
    })
}

fn read_function_indices(parser: &mut Parser) -> Result<Vec<IndexRef>> {
    read_vec(parser, |parser| Ok(IndexRef::Original(parser.read_uleb128()?)))
}

fn read_elem_kind(parser: &mut Parser) -> Result<()> {
    match parser.read_le::<u8>()? {
        0x00 => Ok(()),
        other => Err(malformed_error!("Invalid element kind {:#04x}", other)),
    }
}

pub(crate) fn read_element(parser: &mut Parser) -> Result<ElementSegment> {
    let flags = parser.read_uleb128()?;
    let segment = match flags {
        0 => ElementSegment {
            mode: ElementMode::Active {
                table: 0,
                offset: read_const_expr(parser)?,
            },
            items: ElementItems::Functions(read_function_indices(parser)?),
        },
        1 | 3 => {
            read_elem_kind(parser)?;
            ElementSegment {
                mode: if flags == 1 {
                    ElementMode::Passive
                } else {
                    ElementMode::Declarative
                },
                items: ElementItems::Functions(read_function_indices(parser)?),
            }
        }
        2 => {
            let table = parser.read_uleb128()?;
            let offset = read_const_expr(parser)?;
            read_elem_kind(parser)?;
            ElementSegment {
                mode: ElementMode::Active { table, offset },
                items: ElementItems::Functions(read_function_indices(parser)?),
            }
        }
        4 => ElementSegment {
            mode: ElementMode::Active {
                table: 0,
                offset: read_const_expr(parser)?,
            },
            items: ElementItems::Expressions(
                ValType::FuncRef,
                read_vec(parser, read_const_expr)?,
            ),
        },
        5 | 7 => {
            let ty = read_val_type(parser)?;
            ElementSegment {
                mode: if flags == 5 {
                    ElementMode::Passive
                } else {
                    ElementMode::Declarative
                },
                items: ElementItems::Expressions(ty, read_vec(parser, read_const_expr)?),
            }
        }
        6 => {
            let table = parser.read_uleb128()?;
            let offset = read_const_expr(parser)?;
            let ty = read_val_type(parser)?;
            ElementSegment {
                mode: ElementMode::Active { table, offset },
                items: ElementItems::Expressions(ty, read_vec(parser, read_const_expr)?),
            }
        }
        other => return Err(malformed_error!("Invalid element segment flags {}", other)),
    };
    Ok(segment)
}

pub(crate) fn read_body<'a>(parser: &mut Parser<'a>) -> Result<FunctionBody<'a>> {
    let size = parser.read_uleb128()? as usize;
    let mut body = Parser::new(parser.read_bytes(size)?);

    let locals = read_vec(&mut body, |parser| {
        Ok((parser.read_uleb128()?, read_val_type(parser)?))
    })?;
    let code = body.read_bytes(body.remaining())?;

    Ok(FunctionBody {
        locals,
        code: Cow::Borrowed(code),
    })
}

pub(crate) fn read_data<'a>(parser: &mut Parser<'a>) -> Result<DataSegment<'a>> {
    let mode = match parser.read_uleb128()? {
        0 => DataMode::Active {
            memory: 0,
            offset: read_const_expr(parser)?,
        },
        1 => DataMode::Passive,
        2 => {
            let memory = parser.read_uleb128()?;
            DataMode::Active {
                memory,
                offset: read_const_expr(parser)?,
            }
        }
        other => return Err(malformed_error!("Invalid data segment flags {}", other)),
    };
    let len = parser.read_uleb128()? as usize;

    Ok(DataSegment {
        mode,
        data: Cow::Borrowed(parser.read_bytes(len)?),
    })
}
