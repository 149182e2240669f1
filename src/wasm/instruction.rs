//! Instruction decoding and rewriting for code bodies and constant expressions.
//!
//! The decoder understands the MVP instruction set plus sign-extension, saturating truncation,
//! bulk memory, reference types, tail calls and typed `select`. It does not interpret
//! instructions; it only finds instruction boundaries and the immediates that refer to an index
//! space, so that they can be renumbered after entries were added or removed. SIMD, threads,
//! exception handling, typed function references and GC opcodes are rejected with
//! [`crate::Error::NotSupported`].
//!
//! Immediates whose index does not change are copied verbatim, so a body that needs no
//! renumbering is reproduced byte for byte even if its producer used padded LEB128 encodings.

use std::{borrow::Cow, collections::HashMap, ops::Range};

use crate::{
    file::{
        io::{write_sleb128, write_uleb128},
        parser::Parser,
    },
    wasm::{
        handle::HandleTable,
        remap::{IndexRemapper, IndexSpace},
        types::ValType,
    },
    Error, Result,
};

/// `unreachable`
pub const OP_UNREACHABLE: u8 = 0x00;
/// `block`
pub const OP_BLOCK: u8 = 0x02;
/// `end`
pub const OP_END: u8 = 0x0B;
/// `call funcidx`
pub const OP_CALL: u8 = 0x10;
/// `call_indirect typeidx tableidx`
pub const OP_CALL_INDIRECT: u8 = 0x11;
/// `return_call funcidx`
pub const OP_RETURN_CALL: u8 = 0x12;
/// `drop`
pub const OP_DROP: u8 = 0x1A;
/// `local.get`
pub const OP_LOCAL_GET: u8 = 0x20;
/// `global.get globalidx`
pub const OP_GLOBAL_GET: u8 = 0x23;
/// `global.set globalidx`
pub const OP_GLOBAL_SET: u8 = 0x24;
/// `i32.const`
pub const OP_I32_CONST: u8 = 0x41;
/// `i64.const`
pub const OP_I64_CONST: u8 = 0x42;
/// `f32.const`
pub const OP_F32_CONST: u8 = 0x43;
/// `f64.const`
pub const OP_F64_CONST: u8 = 0x44;
/// `ref.func funcidx`
pub const OP_REF_FUNC: u8 = 0xD2;
/// Prefix of the saturating truncation, bulk memory and table instructions
pub const OP_PREFIX_MISC: u8 = 0xFC;

/// Outcome of an instruction rewriter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionRewrite {
    /// Keep the (already renumbered) instruction
    Unchanged,
    /// Emit these bytes instead
    Replace(Vec<u8>),
}

/// Callback invoked for every instruction with a given opcode during finalize.
///
/// It receives the instruction bytes with all index immediates already renumbered, plus the
/// resolved handle table.
pub type InstructionRewriter<'r> =
    Box<dyn FnMut(&[u8], &HandleTable) -> Result<InstructionRewrite> + 'r>;

/// Rewriters keyed by the first opcode byte, passed to [`crate::wasm::ModuleEditor::write_with`].
///
/// The set lives apart from the editor, so callbacks may borrow state that is created after the
/// module was parsed.
#[derive(Default)]
pub struct InstructionRewriters<'r> {
    rewriters: HashMap<u8, InstructionRewriter<'r>>,
}

impl<'r> InstructionRewriters<'r> {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        InstructionRewriters {
            rewriters: HashMap::new(),
        }
    }

    /// Register a callback for every instruction with the given first opcode byte.
    ///
    /// A later registration for the same opcode replaces the earlier one.
    pub fn add(
        &mut self,
        opcode: u8,
        rewriter: impl FnMut(&[u8], &HandleTable) -> Result<InstructionRewrite> + 'r,
    ) {
        self.rewriters.insert(opcode, Box::new(rewriter));
    }

    /// Number of registered opcodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rewriters.len()
    }

    /// Returns `true` if no rewriter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rewriters.is_empty()
    }

    fn get_mut(&mut self, opcode: u8) -> Option<&mut InstructionRewriter<'r>> {
        self.rewriters.get_mut(&opcode)
    }
}

impl std::fmt::Debug for InstructionRewriters<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut opcodes: Vec<u8> = self.rewriters.keys().copied().collect();
        opcodes.sort_unstable();
        f.debug_struct("InstructionRewriters")
            .field("opcodes", &opcodes)
            .finish()
    }
}

/// An index-carrying immediate of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Immediate {
    /// Byte range relative to the start of the instruction
    pub range: Range<usize>,
    /// Space the index refers to
    pub space: IndexSpace,
    /// The encoded index
    pub value: u32,
    /// Encoded as signed LEB128 (block types)
    pub signed: bool,
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction<'a> {
    /// First opcode byte
    pub opcode: u8,
    /// Complete encoding
    pub bytes: &'a [u8],
    /// Index immediates, in encoding order
    pub immediates: Vec<Immediate>,
}

impl Instruction<'_> {
    /// The instruction with every index immediate mapped through `remapper`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an immediate refers to a removed entry.
    pub fn renumber(&self, remapper: &IndexRemapper) -> Result<Cow<'_, [u8]>> {
        let mut out: Option<Vec<u8>> = None;
        let mut cursor = 0;
        for immediate in &self.immediates {
            let new = remapper.space(immediate.space).get(immediate.value)?;
            if new == immediate.value {
                continue;
            }

            let out = out.get_or_insert_with(|| Vec::with_capacity(self.bytes.len() + 4));
            out.extend_from_slice(&self.bytes[cursor..immediate.range.start]);
            if immediate.signed {
                write_sleb128(out, i64::from(new));
            } else {
                write_uleb128(out, u64::from(new));
            }
            cursor = immediate.range.end;
        }

        Ok(match out {
            None => Cow::Borrowed(self.bytes),
            Some(mut out) => {
                out.extend_from_slice(&self.bytes[cursor..]);
                Cow::Owned(out)
            }
        })
    }
}

struct Decoder<'p, 'a> {
    parser: &'p mut Parser<'a>,
    start: usize,
    immediates: Vec<Immediate>,
}

impl Decoder<'_, '_> {
    fn index(&mut self, space: IndexSpace) -> Result<()> {
        let from = self.parser.pos() - self.start;
        let value = self.parser.read_uleb128()?;
        self.immediates.push(Immediate {
            range: from..self.parser.pos() - self.start,
            space,
            value,
            signed: false,
        });
        Ok(())
    }

    fn skip(&mut self) -> Result<()> {
        self.parser.skip_leb128()
    }

    fn block_type(&mut self) -> Result<()> {
        let byte = self.parser.peek_byte()?;
        if byte == 0x40 || ValType::from_repr(byte).is_some() {
            return self.parser.advance_by(1);
        }

        let from = self.parser.pos() - self.start;
        let value = self.parser.read_sleb128()?;
        let Ok(value) = u32::try_from(value) else {
            return Err(Error::NotSupported(format!("block type {value}")));
        };
        self.immediates.push(Immediate {
            range: from..self.parser.pos() - self.start,
            space: IndexSpace::Type,
            value,
            signed: true,
        });
        Ok(())
    }

    fn memarg(&mut self) -> Result<()> {
        let align = self.parser.read_uleb128()?;
        if align & 0x40 != 0 {
            self.skip()?;
        }
        self.skip()
    }

    fn misc(&mut self) -> Result<()> {
        match self.parser.read_uleb128()? {
            0..=7 => Ok(()),
            // memory.init dataidx memidx
            8 => {
                self.index(IndexSpace::Data)?;
                self.skip()
            }
            // data.drop
            9 => self.index(IndexSpace::Data),
            // memory.copy
            10 => {
                self.skip()?;
                self.skip()
            }
            // memory.fill
            11 => self.skip(),
            // table.init elemidx tableidx
            12 => {
                self.index(IndexSpace::Element)?;
                self.skip()
            }
            // elem.drop
            13 => self.index(IndexSpace::Element),
            // table.copy
            14 => {
                self.skip()?;
                self.skip()
            }
            // table.grow, table.size, table.fill
            15..=17 => self.skip(),
            other => Err(Error::NotSupported(format!("instruction 0xFC {other}"))),
        }
    }
}

/// Decode the instruction at the parser position.
///
/// # Errors
/// - [`crate::Error::OutOfBounds`] if the instruction is truncated
/// - [`crate::Error::NotSupported`] for opcodes outside of the supported proposals
/// - [`crate::Error::Malformed`] for unknown opcodes
pub fn decode<'a>(parser: &mut Parser<'a>) -> Result<Instruction<'a>> {
    let start = parser.pos();
    let opcode = parser.read_le::<u8>()?;
    let mut decoder = Decoder {
        parser: &mut *parser,
        start,
        immediates: Vec::new(),
    };

    match opcode {
        0x00 | 0x01 | 0x05 | 0x0B | 0x0F | 0x1A | 0x1B | 0xD1 => {}
        0x45..=0xC4 => {}
        0x02..=0x04 => decoder.block_type()?,
        0x0C | 0x0D => decoder.skip()?,
        0x0E => {
            let count = decoder.parser.read_uleb128()?;
            for _ in 0..=count {
                decoder.skip()?;
            }
        }
        0x10 | 0x12 => decoder.index(IndexSpace::Function)?,
        0x11 | 0x13 => {
            decoder.index(IndexSpace::Type)?;
            decoder.skip()?;
        }
        0x1C => {
            let count = decoder.parser.read_uleb128()?;
            decoder.parser.advance_by(count as usize)?;
        }
        0x20..=0x22 | 0x25 | 0x26 => decoder.skip()?,
        0x23 | 0x24 => decoder.index(IndexSpace::Global)?,
        0x28..=0x3E => decoder.memarg()?,
        0x3F | 0x40 => decoder.skip()?,
        0x41 | 0x42 => decoder.skip()?,
        0x43 => decoder.parser.advance_by(4)?,
        0x44 => decoder.parser.advance_by(8)?,
        0xD0 => decoder.skip()?,
        0xD2 => decoder.index(IndexSpace::Function)?,
        OP_PREFIX_MISC => decoder.misc()?,
        0x06..=0x0A | 0x18 | 0x19 | 0x1F => {
            return Err(Error::NotSupported(format!(
                "exception handling instruction {opcode:#04x}"
            )))
        }
        0x14 | 0x15 | 0xD3..=0xD6 => {
            return Err(Error::NotSupported(format!(
                "function reference instruction {opcode:#04x}"
            )))
        }
        0xFB => return Err(Error::NotSupported("GC instructions".to_string())),
        0xFD => return Err(Error::NotSupported("SIMD instructions".to_string())),
        0xFE => return Err(Error::NotSupported("atomic instructions".to_string())),
        _ => return Err(malformed_error!("Unknown opcode {:#04x}", opcode)),
    }

    let immediates = decoder.immediates;
    let end = parser.pos();
    Ok(Instruction {
        opcode,
        bytes: &parser.data()[start..end],
        immediates,
    })
}

/// Renumber and rewrite every instruction of `code`.
///
/// Instructions are first renumbered through `remapper`, then handed to the rewriter registered
/// for their opcode, if any.
///
/// # Errors
/// Propagates decoding errors, references to removed entries and rewriter failures.
pub(crate) fn rewrite_expression(
    code: &[u8],
    remapper: &IndexRemapper,
    handles: &HandleTable,
    rewriters: &mut InstructionRewriters<'_>,
) -> Result<Vec<u8>> {
    let mut parser = Parser::new(code);
    let mut out = Vec::with_capacity(code.len());

    while parser.has_more_data() {
        let instruction = decode(&mut parser)?;
        let renumbered = instruction.renumber(remapper)?;

        match rewriters.get_mut(instruction.opcode) {
            Some(rewriter) => match rewriter(&renumbered, handles)? {
                InstructionRewrite::Unchanged => out.extend_from_slice(&renumbered),
                InstructionRewrite::Replace(bytes) => out.extend_from_slice(&bytes),
            },
            None => out.extend_from_slice(&renumbered),
        }
    }

    Ok(out)
}

/// Decode the target of a `call` or `return_call` instruction.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `bytes` is not such an instruction.
pub fn call_target(bytes: &[u8]) -> Result<u32> {
    let mut parser = Parser::new(bytes);
    match parser.read_le::<u8>()? {
        OP_CALL | OP_RETURN_CALL => parser.read_uleb128(),
        other => Err(malformed_error!("Expected a call instruction, found {:#04x}", other)),
    }
}

/// Encode `call funcidx`.
#[must_use]
pub fn encode_call(function: u32) -> Vec<u8> {
    let mut out = vec![OP_CALL];
    write_uleb128(&mut out, u64::from(function));
    out
}
