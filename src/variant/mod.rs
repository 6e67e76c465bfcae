//! Variants - the host's 24-byte dynamically typed values
//!
//! Design: `Variant` is three opaque machine words. Only the host (through
//! `VariantBridge` and the type table) interprets them. A `Variant` is not
//! `Clone` and has no `Drop`: copies go through `VariantBridge::copy` and every
//! value must be handed back to `VariantBridge::destroy` exactly once.
//!
//! Architecture:
//! - `ops.rs` - `VariantBridge`: conversion, boxed calls, operators, indexed
//!   and keyed access, hashing
//! - `iter.rs` - the init/next/get iteration protocol and `VariantIter`
//! - `names.rs` - `StableName`, host strings with a fixed address
//! - `ptr.rs` - ptrcall helpers driven by a `CallFrame`

mod iter;
mod names;
mod ops;
mod ptr;

pub use iter::VariantIter;
pub use names::{name_bits, StableName};
pub use ops::{IndexFlags, VariantBridge};

use crate::host::abi::{ConstVariantPtr, VariantPtr, VARIANT_SIZE};

#[repr(C)]
#[derive(Debug, PartialEq, Eq)]
pub struct Variant {
    words: [u64; 3],
}

const _: () = assert!(core::mem::size_of::<Variant>() == VARIANT_SIZE);

impl Variant {
    /// Zeroed storage for a host out-parameter
    #[inline]
    pub(crate) const fn storage() -> Self {
        Self { words: [0; 3] }
    }

    #[inline]
    pub fn as_ptr(&self) -> ConstVariantPtr {
        (self as *const Self).cast()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> VariantPtr {
        (self as *mut Self).cast()
    }

    /// Raw words, for passing the value through opaque storage
    #[inline]
    pub fn into_words(self) -> [u64; 3] {
        self.words
    }

    /// Rebuild a variant from words produced by [`Variant::into_words`].
    ///
    /// # Safety
    /// The words must come from a live variant whose ownership is transferred here.
    #[inline]
    pub unsafe fn from_words(words: [u64; 3]) -> Self {
        Self { words }
    }

    /// Borrow a variant the host passed by pointer.
    ///
    /// # Safety
    /// `ptr` must point to a live variant that outlives `'a`.
    #[inline]
    pub unsafe fn from_ptr<'a>(ptr: ConstVariantPtr) -> &'a Variant {
        &*ptr.cast::<Variant>()
    }

    /// Take ownership of the variant at `ptr`, leaving the slot logically moved-out.
    ///
    /// # Safety
    /// `ptr` must point to a live variant that nobody destroys afterwards.
    #[inline]
    pub unsafe fn take(ptr: ConstVariantPtr) -> Variant {
        ptr.cast::<Variant>().read()
    }

    /// Move this variant into host-owned storage at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be writable storage for one variant that holds no live value.
    #[inline]
    pub unsafe fn write_to(self, ptr: VariantPtr) {
        ptr.cast::<Variant>().write(self)
    }
}
