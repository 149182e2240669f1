//! Byte-level builders for crafted test inputs.
//!
//! The builders only depend on `super::ValType`, so the same file backs the unit tests, the
//! integration tests and the CLI tests.

#![allow(dead_code)]

use super::ValType;

fn uleb(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn sleb(out: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn name(out: &mut Vec<u8>, value: &str) {
    uleb(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

fn vector(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    uleb(&mut out, entries.len() as u64);
    for entry in entries {
        out.extend_from_slice(entry);
    }
    out
}

fn i32_offset(offset: u32) -> Vec<u8> {
    let mut out = vec![0x41];
    sleb(&mut out, i64::from(offset as i32));
    out.push(0x0B);
    out
}

/// Assembles a WebAssembly module from its entries, with minimal LEB128 encodings and bodies
/// without locals.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    types: Vec<Vec<u8>>,
    imports: Vec<Vec<u8>>,
    functions: Vec<Vec<u8>>,
    tables: Vec<Vec<u8>>,
    memories: Vec<Vec<u8>>,
    exports: Vec<Vec<u8>>,
    elements: Vec<Vec<u8>>,
    bodies: Vec<Vec<u8>>,
    data: Vec<Vec<u8>>,
    customs: Vec<Vec<u8>>,
    raw: Vec<(u8, u8, Vec<u8>)>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ty(mut self, params: &[ValType], results: &[ValType]) -> Self {
        let mut entry = vec![0x60];
        uleb(&mut entry, params.len() as u64);
        entry.extend(params.iter().map(|ty| *ty as u8));
        uleb(&mut entry, results.len() as u64);
        entry.extend(results.iter().map(|ty| *ty as u8));
        self.types.push(entry);
        self
    }

    pub fn import_func(mut self, module: &str, field: &str, ty: u32) -> Self {
        let mut entry = Vec::new();
        name(&mut entry, module);
        name(&mut entry, field);
        entry.push(0x00);
        uleb(&mut entry, u64::from(ty));
        self.imports.push(entry);
        self
    }

    /// A defined function; `code` must include the final `end`.
    pub fn function(mut self, ty: u32, code: &[u8]) -> Self {
        let mut entry = Vec::new();
        uleb(&mut entry, u64::from(ty));
        self.functions.push(entry);

        let mut body = vec![0x00];
        body.extend_from_slice(code);
        let mut framed = Vec::new();
        uleb(&mut framed, body.len() as u64);
        framed.extend_from_slice(&body);
        self.bodies.push(framed);
        self
    }

    pub fn table(mut self, min: u32) -> Self {
        let mut entry = vec![0x70, 0x00];
        uleb(&mut entry, u64::from(min));
        self.tables.push(entry);
        self
    }

    pub fn memory(mut self, min: u32) -> Self {
        let mut entry = vec![0x00];
        uleb(&mut entry, u64::from(min));
        self.memories.push(entry);
        self
    }

    pub fn export_func(mut self, export: &str, function: u32) -> Self {
        let mut entry = Vec::new();
        name(&mut entry, export);
        entry.push(0x00);
        uleb(&mut entry, u64::from(function));
        self.exports.push(entry);
        self
    }

    /// An active segment for table 0.
    pub fn element(mut self, offset: u32, functions: &[u32]) -> Self {
        let mut entry = vec![0x00];
        entry.extend(i32_offset(offset));
        uleb(&mut entry, functions.len() as u64);
        for function in functions {
            uleb(&mut entry, u64::from(*function));
        }
        self.elements.push(entry);
        self
    }

    /// An active segment for memory 0.
    pub fn data(mut self, offset: u32, bytes: &[u8]) -> Self {
        let mut entry = vec![0x00];
        entry.extend(i32_offset(offset));
        uleb(&mut entry, bytes.len() as u64);
        entry.extend_from_slice(bytes);
        self.data.push(entry);
        self
    }

    /// A custom section, emitted after all other sections.
    pub fn custom(mut self, section: &str, payload: &[u8]) -> Self {
        let mut entry = Vec::new();
        name(&mut entry, section);
        entry.extend_from_slice(payload);
        self.customs.push(entry);
        self
    }

    /// A section with any id, emitted right after the position of the known section `after`.
    pub fn raw_section(mut self, after: u8, id: u8, payload: &[u8]) -> Self {
        self.raw.push((after, id, payload.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        fn section(out: &mut Vec<u8>, id: u8, payload: &[u8]) {
            out.push(id);
            uleb(out, payload.len() as u64);
            out.extend_from_slice(payload);
        }

        let mut out = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        let vectors = [
            (1, &self.types),
            (2, &self.imports),
            (3, &self.functions),
            (4, &self.tables),
            (5, &self.memories),
            (7, &self.exports),
            (9, &self.elements),
            (10, &self.bodies),
            (11, &self.data),
        ];
        for (id, entries) in vectors {
            if !entries.is_empty() {
                section(&mut out, id, &vector(entries));
            }
            for (_, raw_id, payload) in self.raw.iter().filter(|(after, ..)| *after == id) {
                section(&mut out, *raw_id, payload);
            }
        }
        for custom in &self.customs {
            section(&mut out, 0, custom);
        }
        out
    }
}

/// A type of a crafted metadata image.
#[derive(Debug, Clone)]
pub struct TypeSpec {
    pub namespace: String,
    pub name: String,
    pub methods: Vec<String>,
}

impl TypeSpec {
    pub fn new(namespace: &str, name: &str, methods: &[&str]) -> Self {
        TypeSpec {
            namespace: namespace.to_string(),
            name: name.to_string(),
            methods: methods.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Assembles a revision 29 `global-metadata.dat`.
///
/// Layout: header, string blob, then the image, type and method tables. Method tokens carry
/// 1-based rids that restart for every image.
#[derive(Debug)]
pub struct MetadataBuilder {
    version: u32,
    images: Vec<(String, Vec<TypeSpec>)>,
}

impl Default for MetadataBuilder {
    fn default() -> Self {
        MetadataBuilder {
            version: 29,
            images: Vec::new(),
        }
    }
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn image(mut self, image: &str, types: Vec<TypeSpec>) -> Self {
        self.images.push((image.to_string(), types));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut strings = vec![0u8];
        let mut intern = |value: &str| -> u32 {
            if value.is_empty() {
                return 0;
            }
            let index = strings.len() as u32;
            strings.extend_from_slice(value.as_bytes());
            strings.push(0);
            index
        };

        let mut images = Vec::new();
        let mut types = Vec::new();
        let mut methods = Vec::new();
        let mut type_index = 0u32;
        let mut method_index = 0u32;

        for (image_number, (image, specs)) in self.images.iter().enumerate() {
            let name_index = intern(image);
            for value in [
                name_index,
                image_number as u32,
                type_index,
                specs.len() as u32,
                u32::MAX,
                0,
                u32::MAX,
                1,
                0,
                0,
            ] {
                images.extend_from_slice(&value.to_le_bytes());
            }

            let mut rid = 1u32;
            for (type_rid, spec) in (1u32..).zip(specs) {
                let name_index = intern(&spec.name);
                let namespace_index = intern(&spec.namespace);
                let words = [
                    name_index,
                    namespace_index,
                    0,
                    u32::MAX,
                    u32::MAX,
                    u32::MAX,
                    u32::MAX,
                    0,
                    0,
                    method_index,
                    0,
                    0,
                    0,
                    0,
                    0,
                    0,
                ];
                for word in words {
                    types.extend_from_slice(&word.to_le_bytes());
                }
                let halves = [spec.methods.len() as u16, 0, 0, 0, 0, 0, 0, 0];
                for half in halves {
                    types.extend_from_slice(&half.to_le_bytes());
                }
                types.extend_from_slice(&0u32.to_le_bytes());
                types.extend_from_slice(&(0x0200_0000 | type_rid).to_le_bytes());

                for method in &spec.methods {
                    let name_index = intern(method);
                    for word in [name_index, type_index, 0, 0, u32::MAX, 0x0600_0000 | rid] {
                        methods.extend_from_slice(&word.to_le_bytes());
                    }
                    for half in [0x0086u16, 0, 0xFFFF, 0] {
                        methods.extend_from_slice(&half.to_le_bytes());
                    }
                    rid += 1;
                    method_index += 1;
                }
                type_index += 1;
            }
        }

        let string_offset = 256u32;
        let images_offset = string_offset + strings.len() as u32;
        let types_offset = images_offset + images.len() as u32;
        let methods_offset = types_offset + types.len() as u32;

        let mut sections = [(0u32, 0i32); 31];
        sections[2] = (string_offset, strings.len() as i32);
        sections[5] = (methods_offset, methods.len() as i32);
        sections[19] = (types_offset, types.len() as i32);
        sections[20] = (images_offset, images.len() as i32);

        let mut out = Vec::new();
        out.extend_from_slice(&0xFAB1_1BAFu32.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        for (offset, size) in sections {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }
        out.extend_from_slice(&strings);
        out.extend_from_slice(&images);
        out.extend_from_slice(&types);
        out.extend_from_slice(&methods);
        out
    }
}

/// Lays out a code registration, its codegen modules and their method pointer arrays as the
/// static data of a module.
#[derive(Debug, Default)]
pub struct RegistrationBuilder {
    modules: Vec<(String, Vec<u32>)>,
}

impl RegistrationBuilder {
    /// Address the data segment is placed at.
    pub const BASE: u32 = 1024;

    pub fn new() -> Self {
        Self::default()
    }

    /// A codegen module named `image` with the given method pointers (table indices).
    pub fn module(mut self, image: &str, pointers: &[u32]) -> Self {
        self.modules.push((image.to_string(), pointers.to_vec()));
        self
    }

    /// The data segment contents, to be placed at [`RegistrationBuilder::BASE`], and the address
    /// of the registration structure.
    pub fn data_segment(&self) -> (Vec<u8>, u32) {
        let mut out = Vec::new();
        let address = |out: &Vec<u8>| Self::BASE + out.len() as u32;

        let mut names = Vec::new();
        for (image, _) in &self.modules {
            names.push(address(&out));
            out.extend_from_slice(image.as_bytes());
            out.push(0);
        }
        while out.len() % 4 != 0 {
            out.push(0);
        }

        let mut arrays = Vec::new();
        for (_, pointers) in &self.modules {
            arrays.push(address(&out));
            for pointer in pointers {
                out.extend_from_slice(&pointer.to_le_bytes());
            }
        }

        let mut modules = Vec::new();
        for (index, (_, pointers)) in self.modules.iter().enumerate() {
            modules.push(address(&out));
            let mut words = [0u32; 17];
            words[0] = names[index];
            words[1] = pointers.len() as u32;
            words[2] = arrays[index];
            for word in words {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }

        let array = address(&out);
        for module in &modules {
            out.extend_from_slice(&module.to_le_bytes());
        }

        let registration = address(&out);
        let mut words = [0u32; 15];
        words[13] = self.modules.len() as u32;
        words[14] = array;
        for word in words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        // The last word of the memory image is never scanned.
        out.extend_from_slice(&[0; 16]);
        (out, registration)
    }

    /// A minimal module carrying only the static data.
    pub fn build_module(&self) -> Vec<u8> {
        let (segment, _) = self.data_segment();
        ModuleBuilder::new()
            .ty(&[], &[])
            .function(0, &[0x0B])
            .memory(1)
            .data(Self::BASE, &segment)
            .build()
    }
}

/// Assembles a `UnityWebData1.0` bundle.
#[derive(Debug, Default)]
pub struct WebDataBuilder {
    nodes: Vec<(String, Vec<u8>)>,
}

impl WebDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, path: &str, contents: &[u8]) -> Self {
        self.nodes.push((path.to_string(), contents.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        const SIGNATURE: &[u8] = b"UnityWebData1.0\0";

        let records: usize = self.nodes.iter().map(|(path, _)| 12 + path.len()).sum();
        let head_len = (SIGNATURE.len() + 4 + records) as u32;

        let mut out = SIGNATURE.to_vec();
        out.extend_from_slice(&head_len.to_le_bytes());
        let mut offset = head_len;
        for (path, contents) in &self.nodes {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(contents.len() as u32).to_le_bytes());
            out.extend_from_slice(&(path.len() as u32).to_le_bytes());
            out.extend_from_slice(path.as_bytes());
            offset += contents.len() as u32;
        }
        for (_, contents) in &self.nodes {
            out.extend_from_slice(contents);
        }
        out
    }
}
