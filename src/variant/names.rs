//! Host strings with a fixed address
//!
//! The host keeps bare pointers to registration names, so the native value
//! lives in its own heap cell and is destroyed only when the owner drops it.

use crate::host::abi::{PtrDestructor, StringNamePtr, VariantType};
use std::fmt;

pub struct StableName {
    native: Box<u64>,
    kind: VariantType,
    destructor: Option<PtrDestructor>,
    text: Box<str>,
}

impl StableName {
    pub(super) fn new(
        native: Box<u64>,
        kind: VariantType,
        destructor: Option<PtrDestructor>,
        text: &str,
    ) -> Self {
        Self { native, kind, destructor, text: text.into() }
    }

    /// Address of the native value; stable for the life of `self`
    #[inline]
    pub fn as_ptr(&self) -> StringNamePtr {
        (&*self.native as *const u64).cast_mut().cast()
    }

    /// Native bits; interned names compare equal by bits
    #[inline]
    pub fn bits(&self) -> u64 {
        *self.native
    }

    #[inline]
    pub fn kind(&self) -> VariantType {
        self.kind
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Drop for StableName {
    fn drop(&mut self) {
        if let Some(destroy) = self.destructor {
            // SAFETY: the native value was built by the host and is destroyed once
            unsafe { destroy(self.as_ptr()) };
        }
    }
}

impl fmt::Debug for StableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StableName")
            .field("kind", &self.kind)
            .field("text", &self.text)
            .finish()
    }
}

/// Read the bits of a host name passed by pointer.
///
/// # Safety
/// `ptr` must point to a live `StringName`.
#[inline]
pub unsafe fn name_bits(ptr: crate::host::abi::ConstStringNamePtr) -> u64 {
    ptr.cast::<u64>().read()
}
