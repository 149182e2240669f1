//! Recovery of IL2CPP runtime structures from a WebAssembly build.
//!
//! IL2CPP compiles every managed method to a plain function and registers it in the indirect
//! call table. The only link between a method's metadata and its function is the method pointer
//! array of the image's codegen module, reachable from the code registration structure in the
//! module's static memory. This module reconstructs that memory, locates the structure and joins
//! it with [`crate::metadata::Metadata`] into a [`ScriptIndex`].
//!
//! # Key Components
//!
//! - [`crate::il2cpp::memory`] - Data segment reader and [`MemoryImage`]
//! - [`crate::il2cpp::search`] - Linear-time byte pattern search
//! - [`crate::il2cpp::locator`] - The code registration search heuristic
//! - [`crate::il2cpp::structures`] - Registration structure layouts
//! - [`crate::il2cpp::context`] - [`Context`] and [`ScriptIndex`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use webmodkit::{il2cpp::Context, metadata::Metadata};
//!
//! let allow = ["Assembly-CSharp.dll"];
//! let metadata = Metadata::from_file("global-metadata.dat", &allow)?;
//! let module = std::fs::read("build.wasm")?;
//!
//! let context = Context::build(&module, &metadata, &allow)?;
//! if let Some(pointer) = context.lookup("PlayerController", "Update") {
//!     println!("PlayerController::Update is table entry {pointer}");
//! }
//! # Ok::<(), webmodkit::Error>(())
//! ```

pub mod context;
pub mod locator;
pub mod memory;
pub mod search;
pub mod structures;

pub use context::{Context, ModuleInfo, ScriptIndex};
pub use locator::find_code_registration;
pub use memory::{read_data_segments, MemoryImage, MemorySegment};
pub use search::pattern_search;
pub use structures::{CodeGenModule, CodeRegistration};
