//! Joining metadata and compiled code into the script index.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    il2cpp::{
        locator::{find_code_registration, DATA_REGION_START},
        memory::MemoryImage,
        structures::{CodeGenModule, CodeRegistration},
    },
    metadata::Metadata,
    Error, Result,
};

/// `full type name -> method name -> function pointer`.
///
/// Function pointers are indices into the module's indirect call table.
///
/// Overloads share a name. When a method name is inserted a second time for the same type, the
/// existing entry moves to `name_<old pointer>` and the new one is stored as
/// `name_<new pointer>`; the undecorated name is then free again for the next overload. Which
/// overload ends up undecorated therefore depends on table order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptIndex {
    types: BTreeMap<String, BTreeMap<String, u32>>,
}

impl ScriptIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        ScriptIndex::default()
    }

    /// Record `pointer` for `type_name::method_name`, decorating overloads.
    pub fn insert(&mut self, type_name: &str, method_name: &str, pointer: u32) {
        let methods = self.types.entry(type_name.to_string()).or_default();
        match methods.remove(method_name) {
            Some(previous) => {
                methods.insert(format!("{method_name}_{previous}"), previous);
                methods.insert(format!("{method_name}_{pointer}"), pointer);
            }
            None => {
                methods.insert(method_name.to_string(), pointer);
            }
        }
    }

    /// Function pointer of `type_name::method_name`.
    #[must_use]
    pub fn get(&self, type_name: &str, method_name: &str) -> Option<u32> {
        self.types.get(type_name)?.get(method_name).copied()
    }

    /// Methods of a type.
    #[must_use]
    pub fn methods(&self, type_name: &str) -> Option<&BTreeMap<String, u32>> {
        self.types.get(type_name)
    }

    /// All indexed type names, sorted.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Number of indexed types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// `true` if no type is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Number of indexed methods over all types.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.types.values().map(BTreeMap::len).sum()
    }
}

/// A codegen module retained by the allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Address of the structure in the memory image
    pub address: u32,
    /// The structure itself
    pub module: CodeGenModule,
    /// The method pointer array, indexed by token rid - 1
    pub method_pointers: Vec<u32>,
}

/// Everything recovered from the memory image of a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// Address of the code registration structure
    pub code_registration_address: u32,
    /// The code registration structure
    pub code_registration: CodeRegistration,
    /// Retained codegen modules by image name
    pub modules: BTreeMap<String, ModuleInfo>,
    /// First address behind the static data
    pub bss_start: u32,
    /// The script index
    pub script_index: ScriptIndex,
}

impl Context {
    /// Rebuild the memory image of `module` and build the context from it.
    ///
    /// # Arguments
    /// * `module` - The WebAssembly module bytes
    /// * `metadata` - Metadata decoded with the same allow-list
    /// * `allow_list` - Image names whose codegen modules are retained
    ///
    /// # Errors
    /// - [`Error::UnresolvedReference`] if the module has no data section
    /// - [`Error::StructureNotFound`] if the code registration cannot be located
    /// - [`Error::OutOfBounds`] if a structure or array lies outside of the image
    pub fn build<S: AsRef<str>>(module: &[u8], metadata: &Metadata, allow_list: &[S]) -> Result<Context> {
        let image = MemoryImage::build(module)?;
        Self::from_image(&image, metadata, allow_list, DATA_REGION_START)
    }

    /// Build the context from an already reconstructed memory image.
    ///
    /// # Errors
    /// Same as [`Context::build`], except for the data section lookup.
    pub fn from_image<S: AsRef<str>>(
        image: &MemoryImage,
        metadata: &Metadata,
        allow_list: &[S],
        data_region_start: usize,
    ) -> Result<Context> {
        // The structure records every image, so the unfiltered count is the one to look for.
        let image_count = u32::try_from(metadata.original_image_count)
            .map_err(|_| malformed_error!("Image count {} too large", metadata.original_image_count))?;
        let address = find_code_registration(image.data(), data_region_start..image.len(), image_count)
            .ok_or(Error::StructureNotFound)?;
        debug!("Code registration at {address:#x} ({image_count} images)");

        let code_registration = CodeRegistration::read(&mut image.parser_at(address)?)?;
        let module_pointers = image.read_u32_array(
            code_registration.codegen_modules,
            code_registration.codegen_modules_count,
        )?;

        let mut modules = BTreeMap::new();
        for module_address in module_pointers {
            let module = CodeGenModule::read(&mut image.parser_at(module_address)?)?;
            let name = image.read_string(module.module_name)?;
            if !allow_list.iter().any(|allowed| allowed.as_ref() == name) {
                continue;
            }

            let method_pointers =
                image.read_u32_array(module.method_pointers, module.method_pointer_count)?;
            debug!("Codegen module {name}: {} method pointers", method_pointers.len());
            modules.insert(
                name,
                ModuleInfo {
                    address: module_address,
                    module,
                    method_pointers,
                },
            );
        }

        let script_index = build_script_index(metadata, &modules);
        debug!(
            "Script index: {} types, {} methods",
            script_index.len(),
            script_index.method_count()
        );

        Ok(Context {
            code_registration_address: address,
            code_registration,
            modules,
            bss_start: image.bss_start(),
            script_index,
        })
    }

    /// Function pointer of `type_name::method_name`.
    #[must_use]
    pub fn lookup(&self, type_name: &str, method_name: &str) -> Option<u32> {
        self.script_index.get(type_name, method_name)
    }
}

fn build_script_index(metadata: &Metadata, modules: &BTreeMap<String, ModuleInfo>) -> ScriptIndex {
    let mut index = ScriptIndex::new();
    for image in &metadata.images {
        let Some(module) = modules.get(&image.name) else {
            warn!("No codegen module for image {}", image.name);
            continue;
        };

        for type_index in image.type_range() {
            let Some(ty) = u32::try_from(type_index)
                .ok()
                .and_then(|raw| metadata.type_by_index(raw))
            else {
                continue;
            };
            let type_name = ty.full_name();

            for method_index in ty.method_range() {
                let Some(method) = u32::try_from(method_index)
                    .ok()
                    .and_then(|raw| metadata.method_by_index(raw))
                else {
                    continue;
                };
                let Some(&pointer) = method
                    .pointer_index()
                    .and_then(|slot| module.method_pointers.get(slot))
                else {
                    continue;
                };
                index.insert(&type_name, &method.name, pointer);
            }
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{MetadataBuilder, RegistrationBuilder, TypeSpec};

    #[test]
    fn collision_decorates_both() {
        let mut index = ScriptIndex::new();
        index.insert("Player", "Move", 5);
        index.insert("Player", "Move", 9);
        assert_eq!(index.get("Player", "Move"), None);
        assert_eq!(index.get("Player", "Move_5"), Some(5));
        assert_eq!(index.get("Player", "Move_9"), Some(9));

        // The undecorated name is free again for the third overload.
        index.insert("Player", "Move", 12);
        assert_eq!(index.get("Player", "Move"), Some(12));
        assert_eq!(index.method_count(), 3);
    }

    #[test]
    fn build_from_module() {
        let metadata = MetadataBuilder::new()
            .image("mscorlib.dll", vec![TypeSpec::new("System", "Object", &["ToString"])])
            .image(
                "Assembly-CSharp.dll",
                vec![
                    TypeSpec::new("", "Player", &["Update", "Jump"]),
                    TypeSpec::new("Game", "Menu", &["Open"]),
                ],
            )
            .build();
        let allow = ["Assembly-CSharp.dll"];
        let metadata = Metadata::decode(&metadata, &allow).unwrap();

        let module = RegistrationBuilder::new()
            .module("mscorlib.dll", &[40])
            .module("Assembly-CSharp.dll", &[3, 4, 7])
            .build_module();

        let context = Context::build(&module, &metadata, &allow).unwrap();
        assert_eq!(context.code_registration.codegen_modules_count, 2);
        assert_eq!(context.modules.len(), 1);
        assert_eq!(context.lookup("Player", "Update"), Some(3));
        assert_eq!(context.lookup("Player", "Jump"), Some(4));
        assert_eq!(context.lookup("Game.Menu", "Open"), Some(7));
        assert_eq!(context.lookup("System.Object", "ToString"), None);
    }

    #[test]
    fn structure_not_found() {
        let metadata = MetadataBuilder::new()
            .image("Assembly-CSharp.dll", vec![TypeSpec::new("", "A", &["B"])])
            .build();
        let metadata = Metadata::decode(&metadata, &["Assembly-CSharp.dll"]).unwrap();
        let module = crate::test::ModuleBuilder::new()
            .data(1024, &[0u8; 64])
            .build();
        assert!(matches!(
            Context::build(&module, &metadata, &["Assembly-CSharp.dll"]),
            Err(Error::StructureNotFound)
        ));
    }
}
