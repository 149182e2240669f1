//! # webmodkit Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the webmodkit library. Import this module to get quick access to everything needed to
//! decode a build and hook its methods.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all webmodkit operations
pub use crate::Error;

/// The result type used throughout webmodkit
pub use crate::Result;

/// Low-level parsing utilities
pub use crate::{file::Input, Parser};

// ================================================================================================
// Build Artifacts
// ================================================================================================

/// Global metadata and its records
pub use crate::metadata::{
    tables::{ImageDefinition, MethodDefinition, TypeDefinition},
    Metadata,
};

/// Web data bundles
pub use crate::webdata::{WebData, WebDataNode};

/// Runtime structures and the script index
pub use crate::il2cpp::{CodeGenModule, CodeRegistration, Context, MemoryImage, ScriptIndex};

// ================================================================================================
// Module Editing
// ================================================================================================

/// The module editor and its entry types
pub use crate::wasm::{
    Export, ExternalKind, FuncType, Handle, Import, IndexRef, InstructionRewrite, ModuleEditor,
    ValType,
};

// ================================================================================================
// Hooking
// ================================================================================================

/// Sessions, plugins and hook semantics
pub use crate::hook::{
    Engine, HookKind, HookTarget, HostFunction, ImportObject, Instance, Plugin, PrefixResult,
    Runtime, RuntimeState, Value, ValueWrapper,
};

/// Configuration and caching
pub use crate::{
    cache::{CacheStore, FileStore, MemoryStore},
    config::RuntimeConfig,
};
