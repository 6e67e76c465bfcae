//! Error taxonomy for the bridge
//!
//! Four families:
//! - bootstrap failures (a host function is missing, init ordering)
//! - call validity failures reported by the host through flag out-parameters
//! - protocol violations by the embedding layer
//! - host call errors, carried verbatim

use crate::host::abi::{CallError, CallErrorType, Operator, VariantType};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// A host-filled `CallError` record, kept exactly as the host wrote it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCallError(pub CallError);

impl HostCallError {
    #[inline]
    pub fn raw(&self) -> CallError {
        self.0
    }

    #[inline]
    pub fn kind(&self) -> Option<CallErrorType> {
        self.0.kind()
    }

    /// `Ok(())` when the host reported success, the untouched record otherwise
    #[inline]
    pub fn check(raw: CallError) -> std::result::Result<(), Self> {
        if raw.is_ok() {
            Ok(())
        } else {
            Err(Self(raw))
        }
    }
}

impl fmt::Display for HostCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let CallError { error, argument, expected } = self.0;
        match self.kind() {
            Some(CallErrorType::InvalidMethod) => write!(f, "invalid method"),
            Some(CallErrorType::InvalidArgument) => {
                write!(f, "invalid argument {} (expected type {})", argument, expected)
            }
            Some(CallErrorType::TooManyArguments) => {
                write!(f, "too many arguments (expected {})", expected)
            }
            Some(CallErrorType::TooFewArguments) => {
                write!(f, "too few arguments (expected {})", expected)
            }
            Some(CallErrorType::InstanceIsNull) => write!(f, "instance is null"),
            Some(CallErrorType::MethodNotConst) => write!(f, "method is not const"),
            Some(CallErrorType::Ok) => write!(f, "ok"),
            None => write!(
                f,
                "host call error {} (argument {}, expected {})",
                error, argument, expected
            ),
        }
    }
}

impl std::error::Error for HostCallError {}

#[derive(Debug, Error)]
pub enum BridgeError {
    // Bootstrap
    #[error("required host function `{name}` is not available")]
    Unresolved { name: &'static str },

    #[error("bridge is already initialized")]
    AlreadyInitialized,

    #[error("bridge is not initialized")]
    NotInitialized,

    // Call validity
    #[error("operator {op:?} is not defined for these operands")]
    InvalidOperator { op: Operator },

    #[error("invalid index {index}")]
    InvalidIndex { index: i64 },

    #[error("index {index} is out of bounds")]
    IndexOutOfBounds { index: i64 },

    #[error("invalid key")]
    InvalidKey,

    #[error("value is not iterable")]
    NotIterable,

    #[error("iteration failed")]
    IterationFailed,

    #[error("{op} is not supported for {ty:?}")]
    Unsupported { ty: VariantType, op: &'static str },

    #[error("unknown variant type id {0}")]
    UnknownType(u32),

    // Protocol violations
    #[error("shape has {slots} slots, limit is {max}")]
    ShapeOverflow { slots: usize, max: usize },

    #[error("{size} bytes is not a frame size class")]
    UnsupportedSize { size: usize },

    #[error("slot {slot} holds {expected} bytes, got a {got}-byte value")]
    SlotSizeMismatch { slot: usize, expected: usize, got: usize },

    #[error("all {limit} virtual trampolines are in use")]
    TrampolinesExhausted { limit: usize },

    #[error("stale or unknown handle {0:#x}")]
    StaleHandle(u64),

    #[error("handle {0:#x} does not fit in a native pointer")]
    HandleTooWide(u64),

    #[error("handle table is full at {limit} entries")]
    HandlesExhausted { limit: usize },

    #[error("class `{0}` is already registered")]
    DuplicateClass(String),

    #[error("class `{0}` is not registered")]
    UnknownClass(String),

    #[error("instance cannot go from {from} to {to}")]
    Lifecycle { from: &'static str, to: &'static str },

    // Host-reported
    #[error("host call failed: {0}")]
    Call(#[from] HostCallError),

    // Configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// Run a host-invoked callback body without letting a panic unwind into the host.
///
/// On panic the payload is logged and `fallback` is returned instead.
#[inline]
pub(crate) fn ffi_guard<R>(callback: &'static str, fallback: R, body: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(payload) => {
            crate::logging::log_ffi_panic(callback, &panic_message(payload.as_ref()));
            fallback
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
