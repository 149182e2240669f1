//! Plugins and the hooks they register.

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use strum::Display;

use crate::{
    hook::{
        host::HostFunc,
        kind::{HookKind, PrefixResult},
        value::ValueWrapper,
    },
    wasm::types::{FuncType, ValType},
};

/// Version reported for plugins that do not set one.
pub const DEFAULT_PLUGIN_VERSION: &str = "1.0.0";

/// The managed method a hook intercepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookTarget {
    /// Full type name, `Namespace.Type`
    pub type_name: String,
    /// Method name as found in the script index
    pub method_name: String,
    /// Parameter types of the compiled function, including the implicit `this` and method
    /// info pointers IL2CPP appends
    pub params: Vec<ValType>,
    /// Return type, `None` for `void`
    pub return_type: Option<ValType>,
}

impl HookTarget {
    /// A target returning nothing.
    pub fn new(
        type_name: impl Into<String>,
        method_name: impl Into<String>,
        params: impl Into<Vec<ValType>>,
    ) -> Self {
        HookTarget {
            type_name: type_name.into(),
            method_name: method_name.into(),
            params: params.into(),
            return_type: None,
        }
    }

    /// Set the return type.
    #[must_use]
    pub fn returns(mut self, ty: ValType) -> Self {
        self.return_type = Some(ty);
        self
    }

    /// Signature of the compiled function.
    #[must_use]
    pub fn func_type(&self) -> FuncType {
        FuncType::new(self.params.clone(), self.return_type.into_iter().collect::<Vec<_>>())
    }
}

impl fmt::Display for HookTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.type_name, self.method_name)
    }
}

/// Progress of a hook through the patch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HookState {
    /// Registered by a plugin
    Registered,
    /// Target found and trampoline imported
    Resolved,
    /// Every direct call site redirected to the trampoline
    PatchedStatic,
    /// The table slot overwritten after instantiation
    PatchedTable,
    /// Target missing from the script index
    Unresolvable,
}

/// A registered hook.
pub struct Hook {
    /// Intercepted method
    pub target: HookTarget,
    /// Interception semantics
    pub kind: HookKind,
    /// Set once any patch has taken effect
    pub applied: bool,
    /// Slot of the target in the indirect call table
    pub table_index: Option<u32>,
    /// Function index of the target in the unpatched module
    pub internal_index: Option<u32>,
    /// Pipeline state
    pub state: HookState,
    /// Name of the trampoline import
    pub inject_name: Option<String>,
    pub(crate) original: Arc<OnceLock<HostFunc>>,
}

impl Hook {
    fn new(target: HookTarget, kind: HookKind) -> Self {
        Hook {
            target,
            kind,
            applied: false,
            table_index: None,
            internal_index: None,
            state: HookState::Registered,
            inject_name: None,
            original: Arc::new(OnceLock::new()),
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("target", &self.target)
            .field("kind", &self.kind)
            .field("applied", &self.applied)
            .field("table_index", &self.table_index)
            .field("internal_index", &self.internal_index)
            .field("state", &self.state)
            .field("inject_name", &self.inject_name)
            .finish_non_exhaustive()
    }
}

/// A named set of hooks and the assemblies they need.
///
/// ```rust
/// use webmodkit::{hook::{HookTarget, Plugin}, wasm::ValType};
///
/// let mut plugin = Plugin::new("Invincible").with_assemblies(["Assembly-CSharp.dll"]);
/// plugin.hook_prefix(
///     HookTarget::new("PlayerHealth", "TakeDamage", [ValType::I32, ValType::F32, ValType::I32]),
///     |_args| false,
/// );
/// assert_eq!(plugin.version(), "1.0.0");
/// assert_eq!(plugin.hooks().len(), 1);
/// ```
pub struct Plugin {
    name: String,
    version: String,
    assemblies: Vec<String>,
    pub(crate) hooks: Vec<Hook>,
    pub(crate) on_loaded: Option<Box<dyn FnMut() + Send>>,
}

impl Plugin {
    /// Create a plugin with the default version and no assemblies.
    pub fn new(name: impl Into<String>) -> Self {
        Plugin {
            name: name.into(),
            version: DEFAULT_PLUGIN_VERSION.to_string(),
            assemblies: Vec::new(),
            hooks: Vec::new(),
            on_loaded: None,
        }
    }

    /// Set the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Add referenced assemblies, e.g. `Assembly-CSharp.dll`.
    #[must_use]
    pub fn with_assemblies<I, S>(mut self, assemblies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assemblies.extend(assemblies.into_iter().map(Into::into));
        self
    }

    /// Run `callback` once the hooks of this plugin have been injected.
    pub fn on_loaded(&mut self, callback: impl FnMut() + Send + 'static) {
        self.on_loaded = Some(Box::new(callback));
    }

    /// Register a prefix. The callback returns `()` or `bool`; `false` skips the original.
    pub fn hook_prefix<F, R>(&mut self, target: HookTarget, callback: F)
    where
        F: Fn(&[ValueWrapper]) -> R + Send + Sync + 'static,
        R: Into<PrefixResult>,
    {
        let kind = HookKind::Prefix(Arc::new(move |args: &[ValueWrapper]| callback(args).into()));
        self.hooks.push(Hook::new(target, kind));
    }

    /// Register a postfix receiving the (mutable) result and the arguments.
    pub fn hook_postfix<F>(&mut self, target: HookTarget, callback: F)
    where
        F: Fn(Option<&ValueWrapper>, &[ValueWrapper]) + Send + Sync + 'static,
    {
        self.hooks.push(Hook::new(target, HookKind::Postfix(Arc::new(callback))));
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Referenced assemblies.
    #[must_use]
    pub fn assemblies(&self) -> &[String] {
        &self.assemblies
    }

    /// Registered hooks, in registration order.
    #[must_use]
    pub fn hooks(&self) -> &[Hook] {
        &self.hooks
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("assemblies", &self.assemblies)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::value::Value;

    #[test]
    fn registration() {
        let mut plugin = Plugin::new("Speed")
            .with_version("2.1.0")
            .with_assemblies(["Assembly-CSharp.dll", "UnityEngine.CoreModule.dll"]);
        plugin.hook_prefix(HookTarget::new("Player", "Update", [ValType::I32, ValType::I32]), |_| {});
        plugin.hook_postfix(
            HookTarget::new("Player", "GetSpeed", [ValType::I32]).returns(ValType::F32),
            |result, _| {
                if let Some(result) = result {
                    result.set(10.0f32);
                }
            },
        );

        assert_eq!(plugin.name(), "Speed");
        assert_eq!(plugin.version(), "2.1.0");
        assert_eq!(plugin.assemblies().len(), 2);

        let hooks = plugin.hooks();
        assert!(hooks[0].kind.is_prefix());
        assert_eq!(hooks[0].state, HookState::Registered);
        assert_eq!(hooks[1].target.to_string(), "Player::GetSpeed");
        assert_eq!(
            hooks[1].target.func_type(),
            FuncType::new([ValType::I32], [ValType::F32])
        );

        let result = hooks[1]
            .kind
            .apply(&[Value::I32(0)], Some(ValType::F32), &|_: &[Value]| -> crate::Result<Option<Value>> {
                Ok(Some(Value::F32(1.0)))
            })
            .unwrap();
        assert_eq!(result, Some(Value::F32(10.0)));
    }

    #[test]
    fn prefix_bool_results() {
        let mut plugin = Plugin::new("Skip");
        plugin.hook_prefix(HookTarget::new("A", "B", Vec::new()), |_| false);
        let result = plugin.hooks()[0]
            .kind
            .apply(&[], Some(ValType::I32), &|_: &[Value]| -> crate::Result<Option<Value>> {
                Ok(Some(Value::I32(5)))
            })
            .unwrap();
        assert_eq!(result, Some(Value::I32(0)));
    }
}
