//! Plugin hooks and the session that injects them.
//!
//! A hook intercepts one managed method. Since IL2CPP calls most methods directly, a hook is
//! applied in two ways:
//!
//! - **Static patch** - before instantiation, a trampoline is imported into the module and every
//!   `call` of the target function is redirected to it
//! - **Table patch** - after instantiation, the target's slot in the indirect call table is
//!   overwritten, for targets that are only ever called indirectly
//!
//! Either way the trampoline runs the hook's [`HookKind`] around the original function, which
//! is captured from the table once the module is live.
//!
//! # Key Components
//!
//! - [`crate::hook::Runtime`] - The session and its lifecycle
//! - [`crate::hook::Plugin`] - A named set of hooks
//! - [`crate::hook::HookKind`] - Prefix and postfix semantics
//! - [`crate::hook::ValueWrapper`] - Mutable argument and result cells handed to callbacks
//! - [`crate::hook::Engine`] - The embedder's instantiation boundary

pub mod host;
pub mod kind;
pub mod plugin;
pub mod readiness;
pub mod runtime;
pub mod value;

pub use host::{Engine, HostFunc, HostFunction, ImportObject, Instance};
pub use kind::{HookKind, PostfixCallback, PrefixCallback, PrefixResult};
pub use plugin::{Hook, HookState, HookTarget, Plugin};
pub use readiness::Readiness;
pub use runtime::{Runtime, RuntimeState};
pub use value::{Value, ValueWrapper};
