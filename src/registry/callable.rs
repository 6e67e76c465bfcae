//! Host callables whose target lives on the managed side
//!
//! The callable userdata is the managed callable handle. The library pointer
//! is used as the token, so `callable_userdata` only recognizes callables
//! this bridge created.

use super::callbacks::{argument_slice, report};
use crate::error::{ffi_guard, BridgeError, Result};
use crate::handle::userdata;
use crate::host::abi::*;
use crate::host_fn;
use crate::managed::managed;
use crate::runtime::Bridge;
use crate::variant::Variant;
use core::ffi::c_void;

/// Native Callable storage
pub type NativeCallable = [u64; 2];

#[inline]
fn callable_handle(userdata: *mut c_void) -> u64 {
    userdata as usize as u64
}

impl Bridge {
    /// Create a host Callable for managed callable `callable`
    pub fn create_callable(&self, callable: u64, object_id: ObjectId) -> Result<NativeCallable> {
        let create = host_fn!(self.api(), callable_custom_create2)?;
        if callable == 0 {
            return Err(BridgeError::StaleHandle(0));
        }
        let callable_userdata = userdata(callable).ok_or(BridgeError::HandleTooWide(callable))?;
        let mut info = CallableCustomInfo2 {
            callable_userdata,
            token: self.library().cast(),
            object_id,
            call_func: Some(call),
            is_valid_func: Some(is_valid),
            free_func: Some(free),
            hash_func: Some(hash),
            equal_func: Some(equal),
            less_than_func: Some(less_than),
            to_string_func: Some(to_string),
            get_argument_count_func: Some(argument_count),
        };
        let mut native: NativeCallable = [0; 2];
        // SAFETY: `native` is Callable-sized and `info` lives across the call
        unsafe { create(native.as_mut_ptr().cast(), &mut info) };
        tracing::debug!(target: "registry", callable, object_id, "custom callable created");
        Ok(native)
    }

    /// Same as [`Bridge::create_callable`], boxed as a variant
    pub fn callable_variant(&self, callable: u64, object_id: ObjectId) -> Result<Variant> {
        let mut native = self.create_callable(callable, object_id)?;
        let variants = self.variants();
        // SAFETY: `native` holds a live Callable; it is released after the copy
        unsafe {
            let value = variants.from_native_ptr(VariantType::Callable, native.as_ptr().cast());
            variants.destroy_native(VariantType::Callable, native.as_mut_ptr().cast());
            value
        }
    }

    /// Managed handle behind a host Callable, if this bridge created it
    pub fn callable_userdata(&self, native: &NativeCallable) -> Result<Option<u64>> {
        let get = host_fn!(self.api(), callable_custom_get_userdata)?;
        // SAFETY: `native` holds a Callable
        let userdata = unsafe { get(native.as_ptr().cast(), self.library().cast()) };
        Ok((!userdata.is_null()).then(|| callable_handle(userdata)))
    }
}

unsafe extern "C" fn call(
    userdata: *mut c_void,
    args: *const ConstVariantPtr,
    argument_count: Int,
    r_return: VariantPtr,
    r_error: *mut CallError,
) {
    let failed = CallError::with(CallErrorType::InvalidMethod, 0, 0);
    let outcome = ffi_guard("callable_call", Err(failed), || {
        let target = managed().map_err(|_| failed)?;
        let args = argument_slice(args, argument_count);
        crate::logging::log_dispatch("callable_call", args.len());
        target.callable_call(callable_handle(userdata), args, r_return)
    });
    report(r_error, outcome);
}

unsafe extern "C" fn is_valid(userdata: *mut c_void) -> Bool {
    ffi_guard("callable_is_valid", 0, || {
        managed().map_or(false, |m| m.callable_is_valid(callable_handle(userdata))) as Bool
    })
}

unsafe extern "C" fn free(userdata: *mut c_void) {
    ffi_guard("callable_free", (), || {
        if let Ok(target) = managed() {
            target.callable_free(callable_handle(userdata));
        }
    })
}

unsafe extern "C" fn hash(userdata: *mut c_void) -> u32 {
    ffi_guard("callable_hash", 0, || {
        managed().map_or(0, |m| m.callable_hash(callable_handle(userdata)))
    })
}

unsafe extern "C" fn equal(a: *mut c_void, b: *mut c_void) -> Bool {
    ffi_guard("callable_equal", 0, || {
        managed().map_or(a == b, |m| m.callable_equal(callable_handle(a), callable_handle(b))) as Bool
    })
}

unsafe extern "C" fn less_than(a: *mut c_void, b: *mut c_void) -> Bool {
    ffi_guard("callable_less_than", 0, || {
        managed().map_or(a < b, |m| m.callable_less(callable_handle(a), callable_handle(b))) as Bool
    })
}

unsafe extern "C" fn to_string(userdata: *mut c_void, r_is_valid: *mut Bool, r_out: StringPtr) {
    ffi_guard("callable_to_string", (), || {
        let valid = managed().map_or(false, |m| m.callable_to_string(callable_handle(userdata), r_out));
        if !r_is_valid.is_null() {
            *r_is_valid = valid as Bool;
        }
    })
}

unsafe extern "C" fn argument_count(userdata: *mut c_void, r_is_valid: *mut Bool) -> Int {
    ffi_guard("callable_argument_count", 0, || {
        let count = managed()
            .ok()
            .and_then(|m| m.callable_argument_count(callable_handle(userdata)));
        if !r_is_valid.is_null() {
            *r_is_valid = count.is_some() as Bool;
        }
        count.unwrap_or(0)
    })
}
