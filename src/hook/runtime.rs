//! The hooking session: from plugins and metadata to a patched, instantiated module.

use std::sync::{Arc, OnceLock};

use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Serialize};
use strum::Display;

use crate::{
    cache::{self, CacheKey, CacheStore, FileStore, CONTEXT_KEY, METADATA_KEY},
    config::{ExportLocator, RuntimeConfig, SignatureExport, OBJECT_NEW_EXPORT, STRING_NEW_EXPORT},
    hook::{
        host::{Engine, HostFunc, HostFunction, ImportObject, Instance},
        kind::HookKind,
        plugin::{Hook, HookState, HookTarget, Plugin},
        readiness::Readiness,
        value::Value,
    },
    il2cpp::{memory::MemoryImage, Context},
    metadata::Metadata,
    wasm::{
        instruction::{call_target, encode_call, InstructionRewrite, InstructionRewriters, OP_CALL},
        types::{Export, ExternalKind, Import, IndexRef, ValType},
        Handle, ModuleEditor,
    },
    webdata::WebData,
    Error, Result,
};

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 8;

/// Lifecycle of a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RuntimeState {
    /// Accepting plugins
    Uninitialized,
    /// Metadata requested; waiting for the module
    Building,
    /// Module patched and instantiated
    Ready,
}

/// A call site redirection requested for one hook.
struct Redirect {
    target: Handle,
    import: Handle,
    plugin: usize,
    hook: usize,
}

/// A hooking session.
///
/// The session is driven in three steps:
///
/// 1. Register every [`Plugin`] with [`Runtime::add_plugin`].
/// 2. Supply the global metadata with [`Runtime::load_web_data`] or [`Runtime::load_metadata`],
///    or publish it from another thread through [`Runtime::start`].
/// 3. Hand the module to [`Runtime::instantiate`], which patches it, instantiates it through the
///    embedder's [`Engine`] and installs the table fallbacks.
///
/// ```rust,no_run
/// use webmodkit::{
///     config::RuntimeConfig,
///     hook::{Engine, HookTarget, ImportObject, Plugin, Runtime},
///     wasm::ValType,
///     webdata::WebData,
/// };
///
/// fn run<E: Engine>(engine: &mut E, imports: ImportObject) -> webmodkit::Result<E::Instance> {
///     let config = RuntimeConfig::new().with_cache_dir(".cache");
///     let mut runtime = Runtime::new(config)?;
///
///     let mut plugin = Plugin::new("GodMode").with_assemblies(["Assembly-CSharp.dll"]);
///     plugin.hook_prefix(
///         HookTarget::new("PlayerHealth", "TakeDamage", [ValType::I32, ValType::F32, ValType::I32]),
///         |_args| false,
///     );
///     runtime.add_plugin(plugin)?;
///
///     let web = WebData::from_file("Build/game.data", &runtime.config().resolvable_nodes)?;
///     runtime.load_web_data(&web)?;
///
///     let module = std::fs::read("Build/game.wasm")?;
///     runtime.instantiate(engine, &module, imports)
/// }
/// ```
pub struct Runtime {
    config: RuntimeConfig,
    state: RuntimeState,
    plugins: Vec<Plugin>,
    metadata: Arc<Readiness<Metadata>>,
    cache_key: Option<CacheKey>,
    store: Option<Box<dyn CacheStore>>,
    context: Option<Context>,
    sequence: u64,
    patched: bool,
}

impl Runtime {
    /// Create a session, opening the file cache if `config.cache_dir` is set.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the cache directory cannot be created.
    pub fn new(config: RuntimeConfig) -> Result<Runtime> {
        let store: Option<Box<dyn CacheStore>> = match &config.cache_dir {
            Some(dir) => Some(Box::new(FileStore::open(dir)?)),
            None => None,
        };

        Ok(Runtime {
            config,
            state: RuntimeState::Uninitialized,
            plugins: Vec::new(),
            metadata: Arc::new(Readiness::new()),
            cache_key: None,
            store,
            context: None,
            sequence: 0,
            patched: false,
        })
    }

    /// Use `store` as the persistent cache.
    #[must_use]
    pub fn with_store(mut self, store: impl CacheStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The lifecycle state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Registered plugins.
    #[must_use]
    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    /// Every registered hook, plugin by plugin.
    pub fn hooks(&self) -> impl Iterator<Item = &Hook> {
        self.plugins.iter().flat_map(Plugin::hooks)
    }

    /// The context of the patched module.
    #[must_use]
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// The metadata, once published.
    #[must_use]
    pub fn metadata(&self) -> Option<Arc<Metadata>> {
        self.metadata.get()
    }

    /// Register a plugin.
    ///
    /// # Errors
    /// Returns [`Error::SessionState`] once metadata has been requested, since the assembly
    /// allow-list is fixed from then on.
    pub fn add_plugin(&mut self, plugin: Plugin) -> Result<()> {
        self.expect_state(RuntimeState::Uninitialized, "add a plugin")?;
        debug!(
            "Registered plugin {} {} with {} hook(s)",
            plugin.name(),
            plugin.version(),
            plugin.hooks().len()
        );
        self.plugins.push(plugin);
        Ok(())
    }

    /// The union of all plugins' referenced assemblies, in registration order.
    #[must_use]
    pub fn allow_list(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.plugins.iter().flat_map(Plugin::assemblies) {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Close plugin registration and return the metadata notification.
    ///
    /// A producer may fulfill the returned handle from any thread; [`Runtime::patch_module`]
    /// blocks until it does.
    ///
    /// # Errors
    /// Returns [`Error::SessionState`] unless the session is uninitialized.
    pub fn start(&mut self) -> Result<Arc<Readiness<Metadata>>> {
        self.expect_state(RuntimeState::Uninitialized, "start")?;
        self.state = RuntimeState::Building;
        info!("{} plugin(s) registered", self.plugins.len());
        Ok(self.metadata.clone())
    }

    /// Take the metadata from a web data bundle.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedReference`] if the bundle lacks the metadata node, otherwise
    /// the errors of [`Runtime::load_metadata`].
    pub fn load_web_data(&mut self, web: &WebData) -> Result<()> {
        if let Some(version) = &web.unity_version {
            info!("Running under Unity {version}");
        }
        let blob = web.metadata(&self.config.metadata_node)?;
        self.load_metadata(blob)
    }

    /// Decode (or load from the cache) the metadata for the current allow-list and publish it.
    ///
    /// # Errors
    /// - [`Error::SessionState`] if metadata was already published or the session is ready
    /// - The errors of [`Metadata::decode`]
    pub fn load_metadata(&mut self, blob: &[u8]) -> Result<()> {
        if self.state == RuntimeState::Uninitialized {
            self.start()?;
        }
        self.expect_state(RuntimeState::Building, "load metadata")?;
        if self.metadata.is_ready() {
            return Err(Error::SessionState("metadata already loaded".to_string()));
        }

        let allow_list = self.allow_list();
        let key = CacheKey::new(blob, &allow_list);
        let metadata = match self.cached::<Metadata>(METADATA_KEY, &key) {
            Some(metadata) => {
                debug!("Metadata loaded from cache");
                metadata
            }
            None => {
                let metadata = Metadata::decode(blob, &allow_list)?;
                self.store_cached(METADATA_KEY, &key, &metadata);
                metadata
            }
        };
        info!(
            "Metadata: {} of {} image(s) referenced, {} type(s), {} method(s)",
            metadata.images.len(),
            metadata.original_image_count,
            metadata.types.len(),
            metadata.methods.len()
        );

        self.cache_key = Some(key);
        self.metadata.fulfill(metadata)
    }

    /// Patch `module`: inject one trampoline import per resolvable hook, redirect every direct
    /// call of a hooked function and define the trampolines in `imports`.
    ///
    /// Blocks until the metadata is published. A module whose metadata retained no image is
    /// returned unchanged.
    ///
    /// # Errors
    /// - [`Error::SessionState`] unless the session is building, or if a module was already
    ///   patched in this session
    /// - [`Error::StructureNotFound`] and the other errors of [`Context::build`]
    /// - Decoding and encoding errors of [`ModuleEditor`]
    ///
    /// Hooks whose target cannot be resolved are logged and skipped.
    pub fn patch_module(&mut self, module: &[u8], imports: &mut ImportObject) -> Result<Vec<u8>> {
        self.expect_state(RuntimeState::Building, "patch a module")?;
        if self.patched {
            return Err(Error::SessionState(
                "a module was already patched in this session".to_string(),
            ));
        }
        self.patched = true;

        let metadata = self.metadata.wait();
        if metadata.images.is_empty() {
            info!("No referenced assembly present, module left unpatched");
            return Ok(module.to_vec());
        }

        let context = self.load_context(module, &metadata)?;
        let mut editor = ModuleEditor::parse(module)?;
        export_signatures(&mut editor, &self.config.signature_exports)?;

        info!("Chainloader initialized");
        info!("{} plugin(s) to load", self.plugins.len());

        let mut redirects = Vec::new();
        for (plugin_index, plugin) in self.plugins.iter_mut().enumerate() {
            info!("Loading [{} {}]", plugin.name(), plugin.version());

            for (hook_index, hook) in plugin.hooks.iter_mut().enumerate() {
                let Some(internal) = resolve_hook(hook, &context, &editor) else {
                    continue;
                };

                let name = loop {
                    let name = inject_name(&hook.target, self.sequence);
                    self.sequence += 1;
                    let taken = imports.contains(&self.config.import_module, &name)
                        || editor.import_entries().any(|import| {
                            import.module == self.config.import_module && import.field == name
                        });
                    if !taken {
                        break name;
                    }
                };

                let ty = hook.target.func_type();
                let type_ref = match editor.find_type(&ty) {
                    Some(found) => found,
                    None => IndexRef::from(editor.add_type_entry(ty.clone())?),
                };
                let import = editor.add_import_entry(Import::func(
                    self.config.import_module.clone(),
                    name.clone(),
                    type_ref,
                ))?;
                let target = editor.get_function_index(internal)?;

                imports.define(
                    &self.config.import_module,
                    &name,
                    HostFunction {
                        ty,
                        func: trampoline(
                            hook.kind.clone(),
                            hook.target.return_type,
                            hook.original.clone(),
                        ),
                    },
                );
                debug!(
                    "Hook {} -> table slot {:?}, function {internal}, import {}.{name}",
                    hook.target, hook.table_index, self.config.import_module
                );
                hook.inject_name = Some(name);
                redirects.push(Redirect {
                    target,
                    import,
                    plugin: plugin_index,
                    hook: hook_index,
                });
            }

            if let Some(on_loaded) = plugin.on_loaded.as_mut() {
                on_loaded();
            }
        }

        let mut applied = vec![false; redirects.len()];
        let mut rewriters = InstructionRewriters::new();
        rewriters.add(OP_CALL, |bytes, handles| {
            let callee = call_target(bytes)?;
            for (redirect, applied) in redirects.iter().zip(applied.iter_mut()) {
                if handles.get(redirect.target)? == callee {
                    *applied = true;
                    return Ok(InstructionRewrite::Replace(encode_call(
                        handles.get(redirect.import)?,
                    )));
                }
            }
            Ok(InstructionRewrite::Unchanged)
        });
        let patched = editor.write_with(&mut rewriters)?;
        drop(rewriters);

        for (redirect, applied) in redirects.iter().zip(applied) {
            if applied {
                let hook = &mut self.plugins[redirect.plugin].hooks[redirect.hook];
                hook.applied = true;
                hook.state = HookState::PatchedStatic;
            }
        }
        debug!(
            "{} of {} hook(s) patched at their call sites",
            self.hooks().filter(|hook| hook.state == HookState::PatchedStatic).count(),
            redirects.len()
        );

        self.context = Some(context);
        Ok(patched)
    }

    /// Patch and instantiate `module`, then hook the table slots of every hook without a
    /// patched call site.
    ///
    /// # Errors
    /// Returns the errors of [`Runtime::patch_module`] and of the engine. Nothing is
    /// instantiated when patching fails.
    pub fn instantiate<E: Engine>(
        &mut self,
        engine: &mut E,
        module: &[u8],
        mut imports: ImportObject,
    ) -> Result<E::Instance> {
        let patched = self.patch_module(module, &mut imports)?;
        let mut instance = engine.instantiate(&patched, &imports)?;
        self.install_table_hooks(&mut instance)?;

        self.state = RuntimeState::Ready;
        info!("Chainloader startup complete");
        Ok(instance)
    }

    /// Invoke `Type::Method` on a live instance through its table slot.
    ///
    /// # Errors
    /// - [`Error::HookUnresolved`] if the target is malformed or not indexed
    /// - [`Error::SessionState`] before instantiation
    /// - Host errors of the call
    pub fn call<I: Instance>(&self, instance: &I, target: &str, args: &[Value]) -> Result<Option<Value>> {
        let (type_name, method_name) =
            target.split_once("::").ok_or_else(|| Error::HookUnresolved {
                type_name: target.to_string(),
                method_name: String::new(),
            })?;
        self.call_method(instance, type_name, method_name, args)
    }

    /// Invoke `type_name::method_name` on a live instance through its table slot.
    ///
    /// # Errors
    /// Same as [`Runtime::call`].
    pub fn call_method<I: Instance>(
        &self,
        instance: &I,
        type_name: &str,
        method_name: &str,
        args: &[Value],
    ) -> Result<Option<Value>> {
        self.expect_state(RuntimeState::Ready, "call a method")?;
        let pointer = self
            .context
            .as_ref()
            .and_then(|context| context.lookup(type_name, method_name))
            .ok_or_else(|| Error::HookUnresolved {
                type_name: type_name.to_string(),
                method_name: method_name.to_string(),
            })?;
        let func = instance.table_get(pointer)?;
        func(args)
    }

    /// Allocate `size` bytes on the module's heap.
    ///
    /// # Errors
    /// - [`Error::SessionState`] before instantiation
    /// - [`Error::Host`] if the allocator export is missing or returns no pointer
    pub fn malloc<I: Instance>(&self, instance: &I, size: u32) -> Result<Value> {
        self.call_pointer(instance, &self.config.malloc_export, &[Value::I32(size as i32)])
    }

    /// Release a block returned by [`Runtime::malloc`].
    ///
    /// # Errors
    /// - [`Error::SessionState`] before instantiation
    /// - [`Error::Host`] if the release export is missing or traps
    pub fn free<I: Instance>(&self, instance: &I, block: Value) -> Result<()> {
        self.expect_state(RuntimeState::Ready, "free memory")?;
        address(block, "freed block")?;
        instance.call_export(&self.config.free_export, &[block])?;
        Ok(())
    }

    /// Create a managed string holding `text`.
    ///
    /// The characters are staged in a heap block that is released once the string exists.
    ///
    /// # Errors
    /// - [`Error::SessionState`] before instantiation
    /// - [`Error::Host`] if `il2cpp_string_new` or the allocator exports are missing
    pub fn create_string<I: Instance>(&self, instance: &mut I, text: &str) -> Result<Value> {
        let bytes = text.as_bytes();
        let len = u32::try_from(bytes.len())
            .map_err(|_| Error::Host(format!("string of {} bytes is too long", bytes.len())))?;

        let buffer = self.malloc(instance, len)?;
        let created = instance
            .memory_write(address(buffer, "allocated block")?, bytes)
            .and_then(|()| {
                self.call_pointer(instance, STRING_NEW_EXPORT, &[buffer, Value::I32(len as i32)])
            });
        self.free(instance, buffer)?;
        created
    }

    /// Allocate an object of the class whose runtime type info is at `class`.
    ///
    /// # Errors
    /// - [`Error::SessionState`] before instantiation
    /// - [`Error::Host`] if `il2cpp_object_new` is missing
    pub fn create_object<I: Instance>(&self, instance: &I, class: Value) -> Result<Value> {
        self.call_pointer(instance, OBJECT_NEW_EXPORT, &[class])
    }

    fn call_pointer<I: Instance>(&self, instance: &I, export: &str, args: &[Value]) -> Result<Value> {
        self.expect_state(RuntimeState::Ready, "call into the module")?;
        let result = instance
            .call_export(export, args)?
            .ok_or_else(|| Error::Host(format!("{export} returned no value")))?;
        address(result, export)?;
        Ok(result)
    }

    fn expect_state(&self, expected: RuntimeState, action: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::SessionState(format!(
                "cannot {action} while {}, expected {expected}",
                self.state
            )))
        }
    }

    fn load_context(&mut self, module: &[u8], metadata: &Metadata) -> Result<Context> {
        let key = self.cache_key.clone();
        if let Some(context) = key
            .as_ref()
            .and_then(|key| self.cached::<Context>(CONTEXT_KEY, key))
        {
            debug!("Context loaded from cache");
            return Ok(context);
        }

        let image = MemoryImage::build(module)?;
        let context = Context::from_image(
            &image,
            metadata,
            &self.allow_list(),
            self.config.data_region_start,
        )?;
        if let Some(key) = &key {
            self.store_cached(CONTEXT_KEY, key, &context);
        }
        Ok(context)
    }

    fn install_table_hooks<I: Instance>(&mut self, instance: &mut I) -> Result<()> {
        for hook in self.plugins.iter().flat_map(Plugin::hooks) {
            let Some(table_index) = hook.table_index else {
                continue;
            };
            let original = instance.table_get(table_index)?;
            if hook.original.set(original).is_err() {
                return Err(Error::SessionState(format!(
                    "original of {} captured twice",
                    hook.target
                )));
            }
        }

        for hook in self.plugins.iter_mut().flat_map(|plugin| plugin.hooks.iter_mut()) {
            let Some(table_index) = hook.table_index else {
                continue;
            };
            if hook.applied {
                continue;
            }

            instance.table_set(
                table_index,
                HostFunction {
                    ty: hook.target.func_type(),
                    func: trampoline(hook.kind.clone(), hook.target.return_type, hook.original.clone()),
                },
            )?;
            hook.applied = true;
            hook.state = HookState::PatchedTable;
            debug!("Hook {} installed in table slot {table_index}", hook.target);
        }
        Ok(())
    }

    fn cached<T: DeserializeOwned>(&mut self, name: &str, key: &CacheKey) -> Option<T> {
        let store = self.store.as_mut()?;
        match cache::load(&**store, name, key) {
            Ok(value) => value,
            Err(error) => {
                warn!("Discarding unreadable {name} cache record: {error}");
                if let Err(error) = store.clear() {
                    warn!("Unable to clear the cache: {error}");
                }
                None
            }
        }
    }

    fn store_cached<T: Serialize>(&mut self, name: &str, key: &CacheKey, value: &T) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        if let Err(error) = cache::save(&mut **store, name, key, value) {
            warn!("Unable to cache {name}: {error}");
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("plugins", &self.plugins)
            .field("metadata_ready", &self.metadata.is_ready())
            .field("patched", &self.patched)
            .finish_non_exhaustive()
    }
}

/// Resolve the table slot and function index of a hook's target, marking it unresolvable when
/// either is missing.
fn resolve_hook(hook: &mut Hook, context: &Context, editor: &ModuleEditor) -> Option<u32> {
    let table_index = context
        .lookup(&hook.target.type_name, &hook.target.method_name)
        .filter(|&pointer| pointer != 0);
    let internal = table_index.and_then(|pointer| table_function(editor, pointer));

    match (table_index, internal) {
        (Some(table_index), Some(internal)) => {
            hook.table_index = Some(table_index);
            hook.internal_index = Some(internal);
            hook.state = HookState::Resolved;
            Some(internal)
        }
        _ => {
            let error = Error::HookUnresolved {
                type_name: hook.target.type_name.clone(),
                method_name: hook.target.method_name.clone(),
            };
            warn!("{error}");
            hook.state = HookState::Unresolvable;
            None
        }
    }
}

/// Function index stored in slot `table_index` by the first element segment.
fn table_function(editor: &ModuleEditor, table_index: u32) -> Option<u32> {
    let functions = editor.element_entry(0).ok()?.functions()?;
    match functions.get(table_index.checked_sub(1)? as usize)? {
        IndexRef::Original(index) => Some(*index),
        IndexRef::Handle(_) => None,
    }
}

/// `<type>xx<method><8 letters>`, the letters derived from `sequence`.
fn inject_name(target: &HookTarget, sequence: u64) -> String {
    let mut state = sequence;
    let id: String = (0..ID_LEN)
        .map(|_| {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut mixed = state;
            mixed = (mixed ^ (mixed >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            mixed = (mixed ^ (mixed >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            mixed ^= mixed >> 31;
            char::from(ID_ALPHABET[(mixed % ID_ALPHABET.len() as u64) as usize])
        })
        .collect();
    format!("{}xx{}{id}", target.type_name, target.method_name)
}

/// A host function running `kind` around the original captured in `original`.
fn trampoline(kind: HookKind, result_type: Option<ValType>, original: Arc<OnceLock<HostFunc>>) -> HostFunc {
    Arc::new(move |args: &[Value]| {
        let original = original.get().ok_or_else(|| {
            Error::SessionState("hook invoked before its original was captured".to_string())
        })?;
        kind.apply(args, result_type, &**original)
    })
}

/// Export the defined function each signature locates.
fn export_signatures(editor: &mut ModuleEditor, signatures: &[SignatureExport]) -> Result<()> {
    let imported = editor.imported_function_count();
    for signature in signatures {
        if editor.export_entries().any(|export| export.name == signature.name) {
            debug!("{} is already exported", signature.name);
            continue;
        }

        let position = match &signature.locator {
            ExportLocator::BodyPrefix(prefix) => editor
                .code_entries()
                .find(|(_, body)| body.code.starts_with(prefix))
                .map(|(position, _)| position),
            ExportLocator::Position(position) => {
                Some(*position).filter(|&position| editor.function_entry(position).is_ok())
            }
        };
        let Some(position) = position else {
            debug!("No function matches the signature of {}", signature.name);
            continue;
        };

        let function = editor.get_function_index(imported + position)?;
        editor.add_export_entry(Export {
            name: signature.name.clone(),
            kind: ExternalKind::Func,
            index: function.into(),
        })?;
        debug!("Exported function {} as {}", imported + position, signature.name);
    }
    Ok(())
}

/// The address carried by a pointer value.
fn address(value: Value, what: &str) -> Result<u32> {
    value
        .as_i32()
        .map(|pointer| pointer as u32)
        .ok_or_else(|| Error::Host(format!("{what} is not a pointer: {value:?}")))
}
