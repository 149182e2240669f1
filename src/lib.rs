// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # webmodkit
//!
//! A framework for hooking managed methods of Unity WebGL games built with IL2CPP. Built in pure
//! Rust, `webmodkit` decodes the game's global metadata, recovers the IL2CPP runtime structures
//! from the WebAssembly module's static memory, and patches the module before instantiation so
//! that plugin callbacks run before or after any managed method.
//!
//! ## Features
//!
//! - **📦 Byte-exact module editing** - Only the sections an edit touches are re-encoded
//! - **🔍 Metadata decoding** - Images, types and methods of `global-metadata.dat` (revision 29)
//! - **🧭 Structure recovery** - Locates the code registration without symbols or exports
//! - **🪝 Prefix and postfix hooks** - Mutable arguments and results, optional original skip
//! - **💾 Persistent cache** - Decoded metadata and contexts survive between launches
//! - **🛡️ Memory safe** - Bounds-checked cursors and explicit errors throughout
//!
//! ## Quick Start
//!
//! Add `webmodkit` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! webmodkit = "0.1"
//! ```
//!
//! ### Using the Prelude
//!
//! ```rust,no_run
//! use webmodkit::prelude::*;
//!
//! let allow = ["Assembly-CSharp.dll"];
//! let metadata = Metadata::from_file("Build/global-metadata.dat", &allow)?;
//! let module = std::fs::read("Build/game.wasm")?;
//!
//! let context = Context::build(&module, &metadata, &allow)?;
//! println!("{} types indexed", context.script_index.len());
//! # Ok::<(), webmodkit::Error>(())
//! ```
//!
//! ### Hooking
//!
//! A [`Runtime`] collects [`Plugin`]s, takes the metadata and hands the patched module to an
//! [`hook::Engine`] provided by the embedder:
//!
//! ```rust,no_run
//! use webmodkit::prelude::*;
//!
//! fn launch<E: Engine>(engine: &mut E, imports: ImportObject) -> webmodkit::Result<E::Instance> {
//!     let mut runtime = Runtime::new(RuntimeConfig::new())?;
//!
//!     let mut plugin = Plugin::new("Speedhack").with_assemblies(["Assembly-CSharp.dll"]);
//!     plugin.hook_postfix(
//!         HookTarget::new("PlayerMovement", "GetSpeed", [ValType::I32, ValType::I32])
//!             .returns(ValType::F32),
//!         |result, _args| {
//!             if let Some(result) = result {
//!                 result.set(result.val().as_f32().unwrap_or_default() * 2.0);
//!             }
//!         },
//!     );
//!     runtime.add_plugin(plugin)?;
//!
//!     let web = WebData::from_file("Build/game.data", &runtime.config().resolvable_nodes)?;
//!     runtime.load_web_data(&web)?;
//!
//!     let module = std::fs::read("Build/game.wasm")?;
//!     runtime.instantiate(engine, &module, imports)
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - Input backends and bounds-checked cursors
//! - [`metadata`] - Global metadata decoding
//! - [`il2cpp`] - Memory image reconstruction, code registration search and script index
//! - [`wasm`] - WebAssembly module editor with deferred index resolution
//! - [`hook`] - Plugins, hook semantics and the session lifecycle
//! - [`webdata`] - `UnityWebData1.0` bundle reader
//! - [`cache`] - Persistent cache of decoded artifacts
//! - [`config`] - Session configuration
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result):
//!
//! ```rust,no_run
//! use webmodkit::{metadata::Metadata, Error};
//!
//! match Metadata::from_file("global-metadata.dat", &["Assembly-CSharp.dll"]) {
//!     Ok(metadata) => println!("{} types", metadata.types.len()),
//!     Err(Error::UnsupportedVersion(version)) => println!("Unsupported revision {version}"),
//!     Err(Error::InvalidMagic(sanity)) => println!("Not a metadata file: {sanity:#x}"),
//!     Err(e) => println!("Error: {e}"),
//! }
//! ```
//!
//! ## Logging
//!
//! Progress and per-hook diagnostics are emitted through the [`log`](https://docs.rs/log)
//! facade. Install any logger (e.g. `env_logger`) to see them.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

pub mod cache;
pub mod config;
pub mod file;
pub mod hook;
pub mod il2cpp;
pub mod metadata;
pub mod wasm;
pub mod webdata;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use webmodkit::prelude::*;
///
/// let metadata = Metadata::from_file("global-metadata.dat", &["Assembly-CSharp.dll"])?;
/// println!("{} methods", metadata.methods.len());
/// # Ok::<(), webmodkit::Error>(())
/// ```
pub mod prelude;

/// `webmodkit` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `webmodkit` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust
/// use webmodkit::{metadata::Metadata, Error};
///
/// match Metadata::decode(&[0u8; 4], &["Assembly-CSharp.dll"]) {
///     Err(Error::OutOfBounds) => println!("Truncated"),
///     Err(e) => println!("Error: {e}"),
///     Ok(_) => unreachable!(),
/// }
/// ```
pub use error::Error;

/// Bounds-checked little-endian read cursor used by every decoder.
///
/// # Example
///
/// ```rust
/// use webmodkit::Parser;
///
/// let mut parser = Parser::new(&[0xE5, 0x8E, 0x26]);
/// assert_eq!(parser.read_uleb128()?, 624_485);
/// # Ok::<(), webmodkit::Error>(())
/// ```
pub use file::parser::Parser;

/// Decoded and filtered global metadata.
pub use metadata::Metadata;

/// Recovered runtime structures and the script index.
pub use il2cpp::Context;

/// WebAssembly module editor.
pub use wasm::ModuleEditor;

/// Hooking session and plugins.
pub use hook::{Plugin, Runtime};
