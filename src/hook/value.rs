//! Values crossing the boundary between the module and host callbacks.

use std::{cell::Cell, fmt};

use crate::wasm::types::ValType;

/// A numeric WebAssembly value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 32-bit integer; also every pointer of a wasm32 module
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
}

impl Value {
    /// The value type of this value.
    #[must_use]
    pub fn ty(&self) -> ValType {
        match self {
            Value::I32(_) => ValType::I32,
            Value::I64(_) => ValType::I64,
            Value::F32(_) => ValType::F32,
            Value::F64(_) => ValType::F64,
        }
    }

    /// The zero value of `ty`, or `None` for vector and reference types.
    #[must_use]
    pub fn zero(ty: ValType) -> Option<Value> {
        match ty {
            ValType::I32 => Some(Value::I32(0)),
            ValType::I64 => Some(Value::I64(0)),
            ValType::F32 => Some(Value::F32(0.0)),
            ValType::F64 => Some(Value::F64(0.0)),
            ValType::V128 | ValType::FuncRef | ValType::ExternRef => None,
        }
    }

    /// The payload of an `i32` value.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(value) => Some(*value),
            _ => None,
        }
    }

    /// The payload of an `i64` value.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(value) => Some(*value),
            _ => None,
        }
    }

    /// The payload of an `f32` value.
    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(value) => Some(*value),
            _ => None,
        }
    }

    /// The payload of an `f64` value.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(value) => write!(f, "{value}"),
            Value::I64(value) => write!(f, "{value}"),
            Value::F32(value) => write!(f, "{value}"),
            Value::F64(value) => write!(f, "{value}"),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::I32(value as i32)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::F32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

/// A mutable argument or result handed to a hook callback.
///
/// Callbacks receive shared references; writes through [`ValueWrapper::set`] are picked up by
/// the trampoline after the callback returns.
///
/// ```rust
/// use webmodkit::hook::{Value, ValueWrapper};
///
/// let arg = ValueWrapper::new(Value::I32(5));
/// arg.set(7);
/// assert_eq!(arg.val(), Value::I32(7));
/// ```
pub struct ValueWrapper {
    value: Cell<Value>,
}

impl ValueWrapper {
    /// Wrap a value.
    pub fn new(value: impl Into<Value>) -> Self {
        ValueWrapper {
            value: Cell::new(value.into()),
        }
    }

    /// The current value.
    #[must_use]
    pub fn val(&self) -> Value {
        self.value.get()
    }

    /// Replace the value.
    pub fn set(&self, value: impl Into<Value>) {
        self.value.set(value.into());
    }

    /// The current value as `i32`, the representation of pointers and most managed scalars.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        self.val().as_i32()
    }

    /// Unwrap the current value.
    #[must_use]
    pub fn into_inner(self) -> Value {
        self.value.into_inner()
    }
}

impl fmt::Debug for ValueWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueWrapper").field(&self.val()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values() {
        assert_eq!(Value::zero(ValType::I32), Some(Value::I32(0)));
        assert_eq!(Value::zero(ValType::F64), Some(Value::F64(0.0)));
        assert_eq!(Value::zero(ValType::FuncRef), None);
        assert_eq!(Value::F32(1.5).ty(), ValType::F32);
    }

    #[test]
    fn wrapper_mutation() {
        let wrapper = ValueWrapper::new(3u32);
        assert_eq!(wrapper.as_i32(), Some(3));
        wrapper.set(Value::I64(-1));
        assert_eq!(wrapper.as_i32(), None);
        assert_eq!(wrapper.into_inner(), Value::I64(-1));
    }
}
