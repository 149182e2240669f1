//! Configuration for the hooking runtime.
//!
//! The defaults match the layout of Unity 2021 WebGL builds; every value can be overridden for
//! builds produced with a different Emscripten or Unity version.

use std::path::PathBuf;

/// Path of the metadata node inside the web data bundle.
pub const DEFAULT_METADATA_NODE: &str = "Il2CppData/Metadata/global-metadata.dat";

/// Import module the generated trampolines are registered under.
pub const DEFAULT_IMPORT_MODULE: &str = "a";

/// Export name of the IL2CPP string constructor.
pub const STRING_NEW_EXPORT: &str = "il2cpp_string_new";

/// Export name of the IL2CPP object allocator.
pub const OBJECT_NEW_EXPORT: &str = "il2cpp_object_new";

/// Export name of the module's heap allocator.
pub const DEFAULT_MALLOC_EXPORT: &str = "malloc";

/// Export name of the module's heap release function.
pub const DEFAULT_FREE_EXPORT: &str = "free";

/// How a [`SignatureExport`] finds its function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportLocator {
    /// First defined function whose body starts with these instruction bytes
    BodyPrefix(Vec<u8>),
    /// Defined function at this position, not counting imports
    Position(u32),
}

/// A defined function that release builds do not export, exported under a fixed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureExport {
    /// Export name
    pub name: String,
    /// Where the function is found
    pub locator: ExportLocator,
}

impl SignatureExport {
    /// Export the first function whose body starts with `prefix`.
    pub fn new(name: impl Into<String>, prefix: impl Into<Vec<u8>>) -> Self {
        SignatureExport {
            name: name.into(),
            locator: ExportLocator::BodyPrefix(prefix.into()),
        }
    }

    /// Export the defined function at `position`.
    pub fn at(name: impl Into<String>, position: u32) -> Self {
        SignatureExport {
            name: name.into(),
            locator: ExportLocator::Position(position),
        }
    }

    /// `il2cpp_string_new(chars, length)`.
    #[must_use]
    pub fn il2cpp_string_new() -> Self {
        SignatureExport::new(
            STRING_NEW_EXPORT,
            [35, 0, 65, 16, 107, 34, 2, 36, 0, 32, 2, 32, 0, 32, 1, 16],
        )
    }

    /// `il2cpp_object_new(class)`, the fourth defined function of Unity 2021.3 builds.
    #[must_use]
    pub fn il2cpp_object_new() -> Self {
        SignatureExport::at(OBJECT_NEW_EXPORT, 3)
    }
}

/// A web data node kept by [`crate::webdata::WebData`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvableNode {
    /// Node path
    pub name: String,
    /// Replaces the size recorded in the bundle header
    pub size: Option<u32>,
}

impl ResolvableNode {
    /// Keep the node with its recorded size.
    pub fn new(name: impl Into<String>) -> Self {
        ResolvableNode {
            name: name.into(),
            size: None,
        }
    }

    /// Keep the node, truncated to `size` bytes.
    pub fn truncated(name: impl Into<String>, size: u32) -> Self {
        ResolvableNode {
            name: name.into(),
            size: Some(size),
        }
    }
}

/// The nodes resolved by default: the head of `data.unity3d` (for the Unity version) and the
/// global metadata.
#[must_use]
pub fn default_resolvable_nodes() -> Vec<ResolvableNode> {
    vec![
        ResolvableNode::truncated("data.unity3d", 32),
        ResolvableNode::new(DEFAULT_METADATA_NODE),
    ]
}

/// Configuration of a [`crate::hook::Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Import module of the trampolines (default: `"a"`).
    pub import_module: String,

    /// Metadata node path in the web data bundle.
    pub metadata_node: String,

    /// First address of the static data region searched for the code registration (default:
    /// 1024).
    pub data_region_start: usize,

    /// Functions to export before patching (default: `il2cpp_string_new` and
    /// `il2cpp_object_new`).
    pub signature_exports: Vec<SignatureExport>,

    /// Export used by [`crate::hook::Runtime::malloc`] (default: `"malloc"`).
    pub malloc_export: String,

    /// Export used by [`crate::hook::Runtime::free`] (default: `"free"`).
    pub free_export: String,

    /// Web data nodes to resolve.
    pub resolvable_nodes: Vec<ResolvableNode>,

    /// Directory of the persistent cache; `None` disables caching.
    pub cache_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            import_module: DEFAULT_IMPORT_MODULE.to_string(),
            metadata_node: DEFAULT_METADATA_NODE.to_string(),
            data_region_start: crate::il2cpp::locator::DATA_REGION_START,
            signature_exports: vec![
                SignatureExport::il2cpp_string_new(),
                SignatureExport::il2cpp_object_new(),
            ],
            malloc_export: DEFAULT_MALLOC_EXPORT.to_string(),
            free_export: DEFAULT_FREE_EXPORT.to_string(),
            resolvable_nodes: default_resolvable_nodes(),
            cache_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a persistent cache in `dir`.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Register trampolines under a different import module.
    #[must_use]
    pub fn with_import_module(mut self, module: impl Into<String>) -> Self {
        self.import_module = module.into();
        self
    }

    /// Do not export any function by signature.
    #[must_use]
    pub fn without_signature_exports(mut self) -> Self {
        self.signature_exports.clear();
        self
    }

    /// Replace the export located under `export.name`, or add it.
    #[must_use]
    pub fn with_signature_export(mut self, export: SignatureExport) -> Self {
        self.signature_exports.retain(|known| known.name != export.name);
        self.signature_exports.push(export);
        self
    }

    /// Allocate and release through differently named exports.
    #[must_use]
    pub fn with_allocator(mut self, malloc: impl Into<String>, free: impl Into<String>) -> Self {
        self.malloc_export = malloc.into();
        self.free_export = free.into();
        self
    }
}
