//! Virtual trampolines - native entry points standing in for closures
//!
//! Design: The host needs a plain function pointer per overridden virtual
//! method, but the target is chosen at registration time on the managed side.
//! A fixed stencil of `TRAMPOLINE_COUNT` thunks is generated at build time;
//! thunk `n` forwards identity `n` plus its arguments to one dispatcher.
//!
//! Identity 0 means "no override" and never maps to a thunk.

mod slots;

pub use slots::VirtualSlots;

use crate::error::ffi_guard;
use crate::host::abi::{ClassCallVirtual, ClassInstancePtr, ConstTypePtr, TypePtr};
use crate::logging::log_virtual_dispatch;
use crate::managed::managed;
use core::ffi::c_void;
use core::num::NonZeroU8;

include!(concat!(env!("OUT_DIR"), "/trampolines.rs"));

/// Identity of a virtual method, `1..=TRAMPOLINE_COUNT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualId(NonZeroU8);

impl VirtualId {
    #[inline]
    pub fn new(raw: u32) -> Option<Self> {
        if raw as usize > TRAMPOLINE_COUNT {
            return None;
        }
        u8::try_from(raw).ok().and_then(NonZeroU8::new).map(Self)
    }

    #[inline]
    pub fn get(self) -> u8 {
        self.0.get()
    }

    /// The thunk carrying this identity
    #[inline]
    pub fn trampoline(self) -> ClassCallVirtual {
        TRAMPOLINES[self.0.get() as usize - 1]
    }

    /// Identity carried in a host userdata pointer
    #[inline]
    pub fn from_userdata(userdata: *mut c_void) -> Option<Self> {
        Self::new(u32::try_from(userdata as usize).ok()?)
    }

    #[inline]
    pub fn as_userdata(self) -> *mut c_void {
        self.get() as usize as *mut c_void
    }
}

/// Trampoline for `identity`, or `None` for 0 and anything past the stencil
#[inline]
pub fn lookup(identity: u32) -> Option<ClassCallVirtual> {
    VirtualId::new(identity).map(VirtualId::trampoline)
}

/// Like [`lookup`] but also rejects identities above `limit`
#[inline]
pub fn lookup_within(identity: u32, limit: usize) -> Option<ClassCallVirtual> {
    if identity as usize > limit {
        return None;
    }
    lookup(identity)
}

/// Reverse lookup: which identity a thunk address carries
pub fn identity_of(function: ClassCallVirtual) -> Option<VirtualId> {
    let address = function as usize;
    TRAMPOLINES
        .iter()
        .position(|&thunk| thunk as usize == address)
        .and_then(|index| VirtualId::new(index as u32 + 1))
}

unsafe extern "C" fn virtual_trampoline<const ID: u8>(
    instance: ClassInstancePtr,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    dispatch(ID, instance, args, ret);
}

/// Shared body of every thunk
#[inline(never)]
pub(crate) fn dispatch(identity: u8, instance: ClassInstancePtr, args: *const ConstTypePtr, ret: TypePtr) {
    ffi_guard("call_virtual", (), || {
        let Some(id) = VirtualId::new(identity as u32) else {
            return;
        };
        log_virtual_dispatch(identity, instance);
        let span = crate::ffi_span!("call_virtual", identity);
        let _enter = span.enter();
        match managed() {
            Ok(target) => target.call_virtual(id, instance as usize as u64, args, ret),
            Err(err) => tracing::warn!(target: "trampoline", identity, error = %err, "virtual call dropped"),
        }
    })
}

/// Entry point for the userdata flavor of virtual dispatch
pub(crate) unsafe extern "C" fn call_virtual_with_data(
    instance: ClassInstancePtr,
    _name: crate::host::abi::ConstStringNamePtr,
    userdata: *mut c_void,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    match VirtualId::from_userdata(userdata) {
        Some(id) => dispatch(id.get(), instance, args, ret),
        None => tracing::warn!(target: "trampoline", userdata = ?userdata, "virtual call without identity"),
    }
}
