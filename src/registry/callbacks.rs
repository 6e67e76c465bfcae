//! Class callbacks handed to the host
//!
//! Each one is a thin `extern "C"` shim. The instance pointer the host passes
//! is the managed instance handle, forwarded unchanged.

use crate::error::ffi_guard;
use crate::handle::Handle;
use crate::host::abi::*;
use crate::managed::managed;
use crate::registry::PropertyList;
use crate::runtime::bridge;
use crate::trampoline::lookup;
use core::ffi::c_void;
use core::ptr;

#[inline]
fn instance_handle(instance: ClassInstancePtr) -> u64 {
    instance as usize as u64
}

/// Argument pointers as a slice; empty for a null array
///
/// # Safety
/// When non-null, `args` must point to `count` readable pointers.
#[inline]
pub(crate) unsafe fn argument_slice<'a, T>(args: *const *const T, count: Int) -> &'a [*const T] {
    if args.is_null() || count <= 0 {
        &[]
    } else {
        core::slice::from_raw_parts(args, count as usize)
    }
}

/// Store a call outcome into the host's error record
///
/// # Safety
/// `r_error` must be null or writable.
#[inline]
pub(crate) unsafe fn report(r_error: *mut CallError, outcome: Result<(), CallError>) {
    if r_error.is_null() {
        return;
    }
    *r_error = match outcome {
        Ok(()) => CallError::ok(),
        Err(error) => {
            crate::logging::log_host_call_error("managed call", error.error, error.argument, error.expected);
            error
        }
    };
}

pub(crate) unsafe extern "C" fn set(instance: ClassInstancePtr, name: ConstStringNamePtr, value: ConstVariantPtr) -> Bool {
    ffi_guard("set", 0, || {
        managed().map_or(false, |m| m.set_property(instance_handle(instance), name, value)) as Bool
    })
}

pub(crate) unsafe extern "C" fn get(instance: ClassInstancePtr, name: ConstStringNamePtr, r_ret: VariantPtr) -> Bool {
    ffi_guard("get", 0, || {
        managed().map_or(false, |m| m.get_property(instance_handle(instance), name, r_ret)) as Bool
    })
}

pub(crate) unsafe extern "C" fn get_property_list(instance: ClassInstancePtr, r_count: *mut u32) -> *const PropertyInfo {
    ffi_guard("get_property_list", ptr::null(), || {
        let (list, count) = lend_property_list(instance_handle(instance));
        if !r_count.is_null() {
            *r_count = count;
        }
        list
    })
}

/// Build and lend the managed property list for `instance`
pub(crate) fn lend_property_list(instance: u64) -> (*const PropertyInfo, u32) {
    let (Ok(bridge), Ok(target)) = (bridge(), managed()) else {
        return (ptr::null(), 0);
    };
    let defs = target.property_list(instance);
    match PropertyList::build(&bridge.variants(), &defs) {
        Ok(list) => bridge.registry().lend_properties(list),
        Err(err) => {
            tracing::warn!(target: "registry", instance, error = %err, "property list dropped");
            (ptr::null(), 0)
        }
    }
}

pub(crate) unsafe extern "C" fn free_property_list(_instance: ClassInstancePtr, list: *const PropertyInfo, _count: u32) {
    ffi_guard("free_property_list", (), || {
        if list.is_null() {
            return;
        }
        if let Ok(bridge) = bridge() {
            if !bridge.registry().return_properties(list) {
                tracing::warn!(target: "registry", list = ?list, "unknown property list returned");
            }
        }
    })
}

pub(crate) unsafe extern "C" fn property_can_revert(instance: ClassInstancePtr, name: ConstStringNamePtr) -> Bool {
    ffi_guard("property_can_revert", 0, || {
        managed().map_or(false, |m| m.property_can_revert(instance_handle(instance), name)) as Bool
    })
}

pub(crate) unsafe extern "C" fn property_get_revert(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    r_ret: VariantPtr,
) -> Bool {
    ffi_guard("property_get_revert", 0, || {
        managed().map_or(false, |m| m.property_get_revert(instance_handle(instance), name, r_ret)) as Bool
    })
}

pub(crate) unsafe extern "C" fn validate_property(instance: ClassInstancePtr, property: *mut PropertyInfo) -> Bool {
    ffi_guard("validate_property", 0, || {
        let Some(property) = property.as_mut() else {
            return 0;
        };
        managed().map_or(false, |m| m.validate_property(instance_handle(instance), property)) as Bool
    })
}

pub(crate) unsafe extern "C" fn notification(instance: ClassInstancePtr, what: i32, reversed: Bool) {
    ffi_guard("notification", (), || {
        if let Ok(target) = managed() {
            target.notification(instance_handle(instance), what, reversed != 0);
        }
    })
}

pub(crate) unsafe extern "C" fn to_string(instance: ClassInstancePtr, r_is_valid: *mut Bool, r_out: StringPtr) {
    ffi_guard("to_string", (), || {
        let valid = managed().map_or(false, |m| m.to_string(instance_handle(instance), r_out));
        if !r_is_valid.is_null() {
            *r_is_valid = valid as Bool;
        }
    })
}

pub(crate) unsafe extern "C" fn reference(instance: ClassInstancePtr) {
    ffi_guard("reference", (), || {
        if let Ok(target) = managed() {
            target.reference(instance_handle(instance), true);
        }
    })
}

pub(crate) unsafe extern "C" fn unreference(instance: ClassInstancePtr) {
    ffi_guard("unreference", (), || {
        if let Ok(target) = managed() {
            target.reference(instance_handle(instance), false);
        }
    })
}

pub(crate) unsafe extern "C" fn create_instance(class_userdata: *mut c_void, _notify_postinitialize: Bool) -> ObjectPtr {
    ffi_guard("create_instance", ptr::null_mut(), || {
        let Some(class) = Handle::from_ptr(class_userdata) else {
            return ptr::null_mut();
        };
        match bridge().and_then(|bridge| bridge.construct(class)) {
            Ok(object) => object,
            Err(err) => {
                tracing::error!(target: "lifecycle", class = class.to_raw(), error = %err, "instance construction failed");
                ptr::null_mut()
            }
        }
    })
}

pub(crate) unsafe extern "C" fn free_instance(class_userdata: *mut c_void, instance: ClassInstancePtr) {
    ffi_guard("free_instance", (), || {
        let result = bridge().and_then(|bridge| bridge.release(instance_handle(instance)));
        if let Err(err) = result {
            tracing::error!(
                target: "lifecycle",
                class = class_userdata as usize,
                instance = instance_handle(instance),
                error = %err,
                "instance release failed"
            );
        }
    })
}

pub(crate) unsafe extern "C" fn recreate_instance(class_userdata: *mut c_void, object: ObjectPtr) -> ClassInstancePtr {
    ffi_guard("recreate_instance", ptr::null_mut(), || {
        let Some(class) = Handle::from_ptr(class_userdata) else {
            return ptr::null_mut();
        };
        match bridge().and_then(|bridge| bridge.recreate(class, object)) {
            Ok(instance) => instance as usize as ClassInstancePtr,
            Err(err) => {
                tracing::error!(target: "lifecycle", class = class.to_raw(), error = %err, "instance recreation failed");
                ptr::null_mut()
            }
        }
    })
}

pub(crate) unsafe extern "C" fn get_virtual(
    class_userdata: *mut c_void,
    name: ConstStringNamePtr,
    _hash: u32,
) -> Option<ClassCallVirtual> {
    ffi_guard("get_virtual", None, || {
        let bridge = bridge().ok()?;
        let id = bridge.resolve_virtual(class_userdata, name)?;
        lookup(id.get() as u32)
    })
}

pub(crate) unsafe extern "C" fn get_virtual_call_data(
    class_userdata: *mut c_void,
    name: ConstStringNamePtr,
    _hash: u32,
) -> *mut c_void {
    ffi_guard("get_virtual_call_data", ptr::null_mut(), || {
        bridge()
            .ok()
            .and_then(|bridge| bridge.resolve_virtual(class_userdata, name))
            .map_or(ptr::null_mut(), |id| id.as_userdata())
    })
}

pub(crate) unsafe extern "C" fn method_call(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstVariantPtr,
    argument_count: Int,
    r_return: VariantPtr,
    r_error: *mut CallError,
) {
    let failed = CallError::with(CallErrorType::InvalidMethod, 0, 0);
    let outcome = ffi_guard("method_call", Err(failed), || {
        let target = managed().map_err(|_| failed)?;
        let args = argument_slice(args, argument_count);
        crate::logging::log_dispatch("method_call", args.len());
        target.call(method_userdata as usize as u64, instance_handle(instance), args, r_return)
    });
    report(r_error, outcome);
}

pub(crate) unsafe extern "C" fn method_ptrcall(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstTypePtr,
    r_ret: TypePtr,
) {
    ffi_guard("method_ptrcall", (), || {
        if let Ok(target) = managed() {
            target.ptrcall(method_userdata as usize as u64, instance_handle(instance), args, r_ret);
        }
    })
}
