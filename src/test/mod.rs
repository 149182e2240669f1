//! Shared helpers for unit tests.

mod builders;

pub use builders::*;

use crate::wasm::types::ValType;
