//! The boundary to the engine that instantiates the patched module.
//!
//! No engine is bundled. Embedders implement [`Engine`] and [`Instance`] on top of whatever
//! runtime runs the game, and receive the trampolines as host functions in an
//! [`ImportObject`].

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    hook::value::Value,
    wasm::types::FuncType,
    Result,
};

/// A callable host function or table entry.
pub type HostFunc = Arc<dyn Fn(&[Value]) -> Result<Option<Value>> + Send + Sync>;

/// A host function together with its signature.
#[derive(Clone)]
pub struct HostFunction {
    /// Signature of the function
    pub ty: FuncType,
    /// The implementation
    pub func: HostFunc,
}

impl HostFunction {
    /// Create a host function.
    pub fn new<F>(ty: FuncType, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        HostFunction {
            ty,
            func: Arc::new(func),
        }
    }

    /// Invoke the function.
    ///
    /// # Errors
    /// Returns whatever the implementation returns.
    pub fn call(&self, args: &[Value]) -> Result<Option<Value>> {
        (self.func)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction").field("ty", &self.ty).finish_non_exhaustive()
    }
}

/// Host functions by import module and field name.
#[derive(Debug, Clone, Default)]
pub struct ImportObject {
    modules: BTreeMap<String, BTreeMap<String, HostFunction>>,
}

impl ImportObject {
    /// Create an empty import object.
    #[must_use]
    pub fn new() -> Self {
        ImportObject::default()
    }

    /// Define `module.name`, replacing a previous definition.
    pub fn define(&mut self, module: &str, name: &str, func: HostFunction) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string(), func);
    }

    /// The function defined as `module.name`.
    #[must_use]
    pub fn get(&self, module: &str, name: &str) -> Option<&HostFunction> {
        self.modules.get(module)?.get(name)
    }

    /// `true` if `module.name` is defined.
    #[must_use]
    pub fn contains(&self, module: &str, name: &str) -> bool {
        self.get(module, name).is_some()
    }

    /// All functions of an import module.
    #[must_use]
    pub fn module(&self, module: &str) -> Option<&BTreeMap<String, HostFunction>> {
        self.modules.get(module)
    }

    /// Total number of defined functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.values().map(BTreeMap::len).sum()
    }

    /// `true` if nothing is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over `(module, name, function)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &HostFunction)> {
        self.modules.iter().flat_map(|(module, functions)| {
            functions
                .iter()
                .map(move |(name, func)| (module.as_str(), name.as_str(), func))
        })
    }
}

/// A live module instance.
pub trait Instance {
    /// The function stored in slot `index` of the indirect call table.
    ///
    /// # Errors
    /// Returns [`crate::Error::Host`] for an empty or unknown slot.
    fn table_get(&self, index: u32) -> Result<HostFunc>;

    /// Store a host function in slot `index` of the indirect call table.
    ///
    /// # Errors
    /// Returns [`crate::Error::Host`] if the slot cannot be written.
    fn table_set(&mut self, index: u32, func: HostFunction) -> Result<()>;

    /// Call the exported function `name`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Host`] if there is no such function export or the call traps.
    fn call_export(&self, name: &str, args: &[Value]) -> Result<Option<Value>>;

    /// Copy `bytes` into linear memory at `address`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Host`] if the range is outside of the memory.
    fn memory_write(&mut self, address: u32, bytes: &[u8]) -> Result<()>;
}

/// Something able to instantiate a module.
pub trait Engine {
    /// The instance type produced.
    type Instance: Instance;

    /// Compile and instantiate `module`, resolving its imports from `imports`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Host`] on compile, link or start failures.
    fn instantiate(&mut self, module: &[u8], imports: &ImportObject) -> Result<Self::Instance>;
}
