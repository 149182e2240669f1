//! Shared fixtures for the integration tests: the crafted input builders and a tiny engine able
//! to run the call-only functions they produce.

#![allow(dead_code)]

#[path = "../../src/test/builders.rs"]
mod builders;

use std::sync::{Arc, Mutex, OnceLock};

pub use builders::*;
use webmodkit::{
    hook::{Engine, HostFunc, HostFunction, ImportObject, Instance, Value},
    wasm::{ElementMode, ExternalKind, FuncType, ImportDesc, IndexRef, ModuleEditor},
    Error, Parser, Result,
};
pub use webmodkit::wasm::ValType;

pub const ASSEMBLY: &str = "Assembly-CSharp.dll";

/// Function `index` of the fixture game, as called through the table.
pub const UPDATE: u32 = 2;
pub const GET_SCORE: u32 = 3;
pub const HIDDEN: u32 = 5;

/// Metadata of the fixture game: `Player` with `Update`, `GetScore` and `Hidden`.
pub fn game_metadata() -> Vec<u8> {
    MetadataBuilder::new()
        .image("mscorlib.dll", vec![TypeSpec::new("System", "Object", &["ToString"])])
        .image(
            ASSEMBLY,
            vec![TypeSpec::new("Game", "Player", &["Update", "GetScore", "Hidden"])],
        )
        .image("UnityEngine.CoreModule.dll", vec![])
        .build()
}

/// Module of the fixture game.
///
/// | index | function              | table slot |
/// |-------|-----------------------|------------|
/// | 0     | import `env.record`   |            |
/// | 1     | import `env.log`      |            |
/// | 2     | `Player.Update(i32)`  | 1          |
/// | 3     | `Player.GetScore(i32) -> i32` | 2  |
/// | 4     | exported `main`       |            |
/// | 5     | `Player.Hidden(i32)`  | 3          |
///
/// `Update` and `Hidden` record their argument, `GetScore` returns it, and `main` calls
/// `Update(5)` then records `GetScore(3)`. `Hidden` is only reachable through the table.
pub fn game_module() -> Vec<u8> {
    game_module_builder().build()
}

/// Builder of [`game_module`], for fixtures that add sections.
pub fn game_module_builder() -> ModuleBuilder {
    let (segment, _) = RegistrationBuilder::new()
        .module("mscorlib.dll", &[0])
        .module(ASSEMBLY, &[1, 2, 3])
        .module("UnityEngine.CoreModule.dll", &[])
        .data_segment();

    ModuleBuilder::new()
        .ty(&[], &[])
        .ty(&[ValType::I32], &[])
        .ty(&[ValType::I32], &[ValType::I32])
        .import_func("env", "record", 1)
        .import_func("env", "log", 1)
        .function(1, &[0x20, 0x00, 0x10, 0x00, 0x0B])
        .function(2, &[0x20, 0x00, 0x0B])
        .function(0, &[0x41, 0x05, 0x10, 0x02, 0x41, 0x03, 0x10, 0x03, 0x10, 0x00, 0x0B])
        .function(1, &[0x20, 0x00, 0x10, 0x00, 0x0B])
        .table(4)
        .memory(1)
        .export_func("main", 4)
        .element(1, &[2, 3, 5])
        .data(RegistrationBuilder::BASE, &segment)
        .custom("name", b"stale")
}

/// Host imports of the fixture game, recording into the returned log.
pub fn game_imports() -> (ImportObject, Arc<Mutex<Vec<i32>>>) {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let mut imports = ImportObject::new();

    let sink = recorded.clone();
    imports.define(
        "env",
        "record",
        HostFunction::new(FuncType::new([ValType::I32], []), move |args| {
            if let Some(value) = args.first().and_then(Value::as_i32) {
                sink.lock().unwrap().push(value);
            }
            Ok(None)
        }),
    );
    imports.define(
        "env",
        "log",
        HostFunction::new(FuncType::new([ValType::I32], []), |_| Ok(None)),
    );
    (imports, recorded)
}

type Functions = Arc<OnceLock<Vec<(FuncType, HostFunc)>>>;

/// Instantiates modules whose bodies only use `local.get`, `i32.const`, `call`, `drop` and `end`.
#[derive(Debug, Default)]
pub struct MiniEngine {
    pub instantiated: Vec<Vec<u8>>,
}

impl MiniEngine {
    /// Instantiate without going through a hooking session.
    pub fn instantiate_plain(&mut self, module: &[u8], imports: &ImportObject) -> MiniInstance {
        Engine::instantiate(self, module, imports).unwrap()
    }
}

/// One 64 KiB page of linear memory.
const PAGE: usize = 0x1_0000;

pub struct MiniInstance {
    functions: Functions,
    table: Vec<Option<HostFunc>>,
    exports: Vec<(String, u32)>,
    memory: Vec<u8>,
}

impl MiniInstance {
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.exports.iter().any(|(export, _)| export == name)
    }
}

impl Instance for MiniInstance {
    fn call_export(&self, name: &str, args: &[Value]) -> Result<Option<Value>> {
        let (_, index) = self
            .exports
            .iter()
            .find(|(export, _)| export == name)
            .ok_or_else(|| Error::Host(format!("no export {name}")))?;
        let functions = self.functions.get().ok_or_else(|| Error::Host("not linked".into()))?;
        (functions[*index as usize].1)(args)
    }

    fn memory_write(&mut self, address: u32, bytes: &[u8]) -> Result<()> {
        let start = address as usize;
        self.memory
            .get_mut(start..start + bytes.len())
            .ok_or_else(|| Error::Host(format!("write at {address:#x} out of memory")))?
            .copy_from_slice(bytes);
        Ok(())
    }

    fn table_get(&self, index: u32) -> Result<HostFunc> {
        self.table
            .get(index as usize)
            .cloned()
            .flatten()
            .ok_or_else(|| Error::Host(format!("table slot {index} is empty")))
    }

    fn table_set(&mut self, index: u32, func: HostFunction) -> Result<()> {
        let slot = self
            .table
            .get_mut(index as usize)
            .ok_or_else(|| Error::Host(format!("table slot {index} out of range")))?;
        *slot = Some(func.func);
        Ok(())
    }
}

impl Engine for MiniEngine {
    type Instance = MiniInstance;

    fn instantiate(&mut self, module: &[u8], imports: &ImportObject) -> Result<MiniInstance> {
        self.instantiated.push(module.to_vec());
        let editor = ModuleEditor::parse(module)?;
        let type_of = |index: IndexRef| -> Result<FuncType> {
            match index {
                IndexRef::Original(index) => Ok(editor.type_entry(index)?.clone()),
                IndexRef::Handle(_) => Err(Error::Host("unresolved type".into())),
            }
        };

        let shared: Functions = Arc::new(OnceLock::new());
        let mut functions = Vec::new();
        for import in editor.import_entries() {
            let ImportDesc::Func(ty) = import.desc else {
                continue;
            };
            let host = imports.get(&import.module, &import.field).ok_or_else(|| {
                Error::Host(format!("unresolved import {}.{}", import.module, import.field))
            })?;
            if host.ty != type_of(ty)? {
                return Err(Error::Host(format!("signature mismatch for {}", import.field)));
            }
            functions.push((host.ty.clone(), host.func.clone()));
        }

        for (position, body) in editor.code_entries() {
            let ty = type_of(editor.function_entry(position)?)?;
            let code = body.code.to_vec();
            let store = shared.clone();
            let results = ty.results.len();
            let func: HostFunc = Arc::new(move |args: &[Value]| execute(&store, &code, args, results));
            functions.push((ty, func));
        }
        let _ = shared.set(functions);
        let linked = shared.get().ok_or_else(|| Error::Host("not linked".into()))?;

        let size = editor.tables().first().map_or(0, |table| table.limits.min);
        let mut table = vec![None; size as usize];
        if let Ok(segment) = editor.element_entry(0) {
            let offset = match &segment.mode {
                ElementMode::Active { offset, .. } => {
                    let mut parser = Parser::new(&offset.0);
                    parser.read_le::<u8>()?;
                    parser.read_sleb128()? as usize
                }
                _ => 0,
            };
            for (slot, function) in segment.functions().unwrap_or_default().iter().enumerate() {
                let IndexRef::Original(function) = function else {
                    continue;
                };
                table[offset + slot] = Some(linked[*function as usize].1.clone());
            }
        }

        let exports = editor
            .export_entries()
            .filter(|export| export.kind == ExternalKind::Func)
            .filter_map(|export| match export.index {
                IndexRef::Original(index) => Some((export.name.clone(), index)),
                IndexRef::Handle(_) => None,
            })
            .collect();

        let pages = editor.memories().first().map_or(0, |memory| memory.limits.min);

        Ok(MiniInstance {
            functions: shared,
            table,
            exports,
            memory: vec![0; pages as usize * PAGE],
        })
    }
}

fn execute(functions: &Functions, code: &[u8], args: &[Value], results: usize) -> Result<Option<Value>> {
    let functions = functions.get().ok_or_else(|| Error::Host("not linked".into()))?;
    let mut stack: Vec<Value> = Vec::new();
    let mut parser = Parser::new(code);

    while parser.has_more_data() {
        match parser.read_le::<u8>()? {
            0x20 => {
                let local = parser.read_uleb128()? as usize;
                stack.push(*args.get(local).ok_or_else(|| Error::Host("bad local".into()))?);
            }
            0x41 => stack.push(Value::I32(parser.read_sleb128()? as i32)),
            0x10 => {
                let (ty, callee) = functions
                    .get(parser.read_uleb128()? as usize)
                    .ok_or_else(|| Error::Host("bad callee".into()))?;
                let split = stack
                    .len()
                    .checked_sub(ty.params.len())
                    .ok_or_else(|| Error::Host("stack underflow".into()))?;
                let call_args = stack.split_off(split);
                if let Some(result) = callee(&call_args)? {
                    stack.push(result);
                }
            }
            0x1A => {
                stack.pop();
            }
            0x0B => break,
            other => return Err(Error::Host(format!("unsupported opcode {other:#04x}"))),
        }
    }

    Ok(if results == 0 { None } else { stack.pop() })
}
