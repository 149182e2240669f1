//! Prefix and postfix interception semantics.

use std::{fmt, sync::Arc};

use crate::{
    hook::value::{Value, ValueWrapper},
    wasm::types::ValType,
    Result,
};

/// Whether a prefix lets the original method run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixResult {
    /// Run the original with the (possibly modified) arguments
    Continue,
    /// Skip the original and return the zero value of its return type
    Skip,
}

impl From<()> for PrefixResult {
    fn from((): ()) -> Self {
        PrefixResult::Continue
    }
}

impl From<bool> for PrefixResult {
    fn from(run_original: bool) -> Self {
        if run_original {
            PrefixResult::Continue
        } else {
            PrefixResult::Skip
        }
    }
}

/// Callback run before the original method.
pub type PrefixCallback = Arc<dyn Fn(&[ValueWrapper]) -> PrefixResult + Send + Sync>;

/// Callback run after the original method with its result and arguments.
pub type PostfixCallback = Arc<dyn Fn(Option<&ValueWrapper>, &[ValueWrapper]) + Send + Sync>;

/// How a hook intercepts its target.
#[derive(Clone)]
pub enum HookKind {
    /// Runs before the original and may suppress it
    Prefix(PrefixCallback),
    /// Runs after the original and may replace its result
    Postfix(PostfixCallback),
}

impl HookKind {
    /// Run one intercepted invocation.
    ///
    /// # Arguments
    /// * `args` - Arguments as passed by the caller
    /// * `result_type` - Return type of the target, `None` for `void`
    /// * `original` - The intercepted function
    ///
    /// # Errors
    /// Returns the error of `original`; callbacks themselves cannot fail.
    pub fn apply(
        &self,
        args: &[Value],
        result_type: Option<ValType>,
        original: &dyn Fn(&[Value]) -> Result<Option<Value>>,
    ) -> Result<Option<Value>> {
        let wrapped: Vec<ValueWrapper> = args.iter().copied().map(ValueWrapper::new).collect();

        match self {
            HookKind::Prefix(callback) => match callback(&wrapped) {
                PrefixResult::Continue => {
                    let args: Vec<Value> = wrapped.iter().map(ValueWrapper::val).collect();
                    original(&args)
                }
                PrefixResult::Skip => Ok(result_type.and_then(Value::zero)),
            },
            HookKind::Postfix(callback) => {
                let result = original(args)?.map(ValueWrapper::new);
                callback(result.as_ref(), &wrapped);
                Ok(result.map(ValueWrapper::into_inner))
            }
        }
    }

    /// `true` for prefix hooks.
    #[must_use]
    pub fn is_prefix(&self) -> bool {
        matches!(self, HookKind::Prefix(_))
    }
}

impl fmt::Debug for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Prefix(_) => f.write_str("Prefix"),
            HookKind::Postfix(_) => f.write_str("Postfix"),
        }
    }
}
