//! Runtime registration structures of the statically initialized memory image.
//!
//! Both structures consist of 32-bit words only (WebAssembly pointers are 32 bits wide).

use serde::{Deserialize, Serialize};

use crate::{file::parser::Parser, Result};

/// Size of [`CodeRegistration`] in bytes.
pub const CODE_REGISTRATION_SIZE: u32 = 15 * 4;
/// Size of [`CodeGenModule`] in bytes.
pub const CODEGEN_MODULE_SIZE: u32 = 17 * 4;

/// `Il2CppCodeRegistration`: the root of all compiled code of a build.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeRegistration {
    pub reverse_pinvoke_wrapper_count: u32,
    pub reverse_pinvoke_wrappers: u32,
    pub generic_method_pointers_count: u32,
    pub generic_method_pointers: u32,
    pub generic_adjustor_thunks: u32,
    pub invoker_pointers_count: u32,
    pub invoker_pointers: u32,
    pub unresolved_virtual_call_count: u32,
    pub unresolved_virtual_call_pointers: u32,
    pub interop_data_count: u32,
    pub interop_data: u32,
    pub windows_runtime_factory_count: u32,
    pub windows_runtime_factory_table: u32,
    /// Number of entries of the `codegen_modules` pointer array; equals the image count
    pub codegen_modules_count: u32,
    /// Address of the array of [`CodeGenModule`] pointers
    pub codegen_modules: u32,
}

impl CodeRegistration {
    /// Decode the structure at the parser position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the structure is truncated.
    pub fn read(parser: &mut Parser) -> Result<Self> {
        Ok(CodeRegistration {
            reverse_pinvoke_wrapper_count: parser.read_le()?,
            reverse_pinvoke_wrappers: parser.read_le()?,
            generic_method_pointers_count: parser.read_le()?,
            generic_method_pointers: parser.read_le()?,
            generic_adjustor_thunks: parser.read_le()?,
            invoker_pointers_count: parser.read_le()?,
            invoker_pointers: parser.read_le()?,
            unresolved_virtual_call_count: parser.read_le()?,
            unresolved_virtual_call_pointers: parser.read_le()?,
            interop_data_count: parser.read_le()?,
            interop_data: parser.read_le()?,
            windows_runtime_factory_count: parser.read_le()?,
            windows_runtime_factory_table: parser.read_le()?,
            codegen_modules_count: parser.read_le()?,
            codegen_modules: parser.read_le()?,
        })
    }
}

/// `Il2CppCodeGenModule`: compiled code of one managed image.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeGenModule {
    /// Address of the null-terminated image name, e.g. `Assembly-CSharp.dll`
    pub module_name: u32,
    /// Number of method pointers
    pub method_pointer_count: u32,
    /// Address of the method pointer array; each entry is a table index
    pub method_pointers: u32,
    pub adjustor_thunk_count: u32,
    pub adjustor_thunks: u32,
    pub invoker_indices: u32,
    pub reverse_pinvoke_wrapper_count: u32,
    pub reverse_pinvoke_wrapper_indices: u32,
    pub rgctx_ranges_count: u32,
    pub rgctx_ranges: u32,
    pub rgctxs_count: u32,
    pub rgctxs: u32,
    pub debugger_metadata: u32,
    pub module_initializer: u32,
    pub static_constructor_type_indices: u32,
    pub metadata_registration: u32,
    pub code_registration: u32,
}

impl CodeGenModule {
    /// Decode the structure at the parser position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the structure is truncated.
    pub fn read(parser: &mut Parser) -> Result<Self> {
        Ok(CodeGenModule {
            module_name: parser.read_le()?,
            method_pointer_count: parser.read_le()?,
            method_pointers: parser.read_le()?,
            adjustor_thunk_count: parser.read_le()?,
            adjustor_thunks: parser.read_le()?,
            invoker_indices: parser.read_le()?,
            reverse_pinvoke_wrapper_count: parser.read_le()?,
            reverse_pinvoke_wrapper_indices: parser.read_le()?,
            rgctx_ranges_count: parser.read_le()?,
            rgctx_ranges: parser.read_le()?,
            rgctxs_count: parser.read_le()?,
            rgctxs: parser.read_le()?,
            debugger_metadata: parser.read_le()?,
            module_initializer: parser.read_le()?,
            static_constructor_type_indices: parser.read_le()?,
            metadata_registration: parser.read_le()?,
            code_registration: parser.read_le()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        let words: Vec<u8> = (0u32..17).flat_map(u32::to_le_bytes).collect();

        let mut parser = Parser::new(&words);
        let registration = CodeRegistration::read(&mut parser).unwrap();
        assert_eq!(parser.pos(), CODE_REGISTRATION_SIZE as usize);
        assert_eq!(registration.codegen_modules_count, 13);
        assert_eq!(registration.codegen_modules, 14);

        let mut parser = Parser::new(&words);
        let module = CodeGenModule::read(&mut parser).unwrap();
        assert_eq!(parser.pos(), CODEGEN_MODULE_SIZE as usize);
        assert_eq!(module.method_pointers, 2);
        assert_eq!(module.code_registration, 16);

        assert!(CodeGenModule::read(&mut Parser::new(&words[..60])).is_err());
    }
}
