//! Script instances and placeholders
//!
//! The script userdata is the managed script handle. Property access, revert,
//! validation, notification and to-string share the class callbacks; the rest
//! forward to the `script_*` side of `Managed`.

use super::callbacks::{self, argument_slice, report};
use super::descriptors::{PropertyList, ScriptMethodList};
use crate::error::{ffi_guard, BridgeError, Result};
use crate::handle::userdata;
use crate::host::abi::*;
use crate::host_fn;
use crate::managed::managed;
use crate::runtime::{bridge, Bridge};
use crate::variant::Variant;
use core::ffi::c_void;
use core::ptr;

pub(crate) static SCRIPT_INSTANCE_INFO: ScriptInstanceInfo3 = ScriptInstanceInfo3 {
    set_func: Some(callbacks::set),
    get_func: Some(callbacks::get),
    get_property_list_func: Some(callbacks::get_property_list),
    free_property_list_func: Some(callbacks::free_property_list),
    get_class_category_func: Some(class_category),
    property_can_revert_func: Some(callbacks::property_can_revert),
    property_get_revert_func: Some(callbacks::property_get_revert),
    get_owner_func: Some(owner),
    get_property_state_func: Some(property_state),
    get_method_list_func: Some(method_list),
    free_method_list_func: Some(free_method_list),
    get_property_type_func: Some(property_type),
    validate_property_func: Some(callbacks::validate_property),
    has_method_func: Some(has_method),
    get_method_argument_count_func: Some(method_argument_count),
    call_func: Some(call),
    notification_func: Some(callbacks::notification),
    to_string_func: Some(callbacks::to_string),
    refcount_incremented_func: Some(refcount_incremented),
    refcount_decremented_func: Some(refcount_decremented),
    get_script_func: Some(script),
    is_placeholder_func: Some(is_placeholder),
    set_fallback_func: Some(set_fallback),
    get_fallback_func: Some(get_fallback),
    get_language_func: Some(language),
    free_func: Some(free),
};

#[inline]
fn script_handle(instance: ScriptInstanceDataPtr) -> u64 {
    instance as usize as u64
}

impl Bridge {
    /// Host script instance backed by managed script handle `script`
    pub fn create_script_instance(&self, script: u64) -> Result<ScriptInstancePtr> {
        let create = host_fn!(self.api(), script_instance_create3)?;
        if script == 0 {
            return Err(BridgeError::StaleHandle(0));
        }
        let data = userdata(script).ok_or(BridgeError::HandleTooWide(script))?;
        // SAFETY: the info table is static
        let instance = unsafe { create(&SCRIPT_INSTANCE_INFO, data) };
        tracing::debug!(target: "registry", script, "script instance created");
        Ok(instance)
    }

    pub fn create_placeholder(&self, language: ObjectPtr, script: ObjectPtr, owner: ObjectPtr) -> Result<ScriptInstancePtr> {
        let create = host_fn!(self.api(), placeholder_script_instance_create)?;
        // SAFETY: the caller passes live host objects
        Ok(unsafe { create(language, script, owner) })
    }

    /// Push the editor-visible property list and values into a placeholder.
    ///
    /// `properties` must hold an Array and `values` a Dictionary.
    pub fn update_placeholder(&self, placeholder: ScriptInstancePtr, properties: &Variant, values: &Variant) -> Result<()> {
        let update = host_fn!(self.api(), placeholder_script_instance_update)?;
        let variants = self.variants();
        let mut array = [0u64; 2];
        let mut dictionary = [0u64; 2];

        // SAFETY: both buffers are large enough for the native handles
        unsafe {
            variants.to_native_ptr(VariantType::Array, properties, array.as_mut_ptr().cast())?;
            if let Err(err) = variants.to_native_ptr(VariantType::Dictionary, values, dictionary.as_mut_ptr().cast()) {
                variants.destroy_native(VariantType::Array, array.as_mut_ptr().cast());
                return Err(err);
            }
            update(placeholder, array.as_ptr().cast(), dictionary.as_ptr().cast());
            variants.destroy_native(VariantType::Array, array.as_mut_ptr().cast());
            variants.destroy_native(VariantType::Dictionary, dictionary.as_mut_ptr().cast());
        }
        Ok(())
    }

    /// Script instance data attached to `object` by `language`, if any
    pub fn script_instance_of(&self, object: ObjectPtr, language: ObjectPtr) -> Result<Option<u64>> {
        let get = host_fn!(self.api(), object_get_script_instance)?;
        // SAFETY: the caller passes live host objects
        let data = unsafe { get(object, language) };
        Ok((!data.is_null()).then(|| script_handle(data)))
    }
}

unsafe extern "C" fn class_category(instance: ScriptInstanceDataPtr, r_class_category: *mut PropertyInfo) -> Bool {
    ffi_guard("get_class_category", 0, || {
        let script = script_handle(instance);
        let (Ok(bridge), Ok(target)) = (bridge(), managed()) else {
            return 0;
        };
        let Some(category) = target.script_class_category(script) else {
            return 0;
        };
        let Ok(list) = PropertyList::build(&bridge.variants(), std::slice::from_ref(&category)) else {
            return 0;
        };
        match (bridge.registry().set_category(script, list), r_class_category.as_mut()) {
            (Some(info), Some(out)) => {
                *out = info;
                1
            }
            _ => 0,
        }
    })
}

unsafe extern "C" fn owner(instance: ScriptInstanceDataPtr) -> ObjectPtr {
    ffi_guard("get_owner", ptr::null_mut(), || {
        managed().map_or(ptr::null_mut(), |m| m.script_owner(script_handle(instance)))
    })
}

unsafe extern "C" fn property_state(
    instance: ScriptInstanceDataPtr,
    add_func: Option<ScriptPropertyStateAdd>,
    userdata: *mut c_void,
) {
    ffi_guard("get_property_state", (), || {
        let (Some(add), Ok(target)) = (add_func, managed()) else {
            return;
        };
        target.script_property_state(script_handle(instance), &mut |name, value| {
            // SAFETY: `add` and `userdata` come from the same host call
            unsafe { add(name, value, userdata) }
        });
    })
}

unsafe extern "C" fn method_list(instance: ScriptInstanceDataPtr, r_count: *mut u32) -> *const MethodInfo {
    ffi_guard("get_method_list", ptr::null(), || {
        let script = script_handle(instance);
        let (list, count) = match (bridge(), managed()) {
            (Ok(bridge), Ok(target)) => {
                match ScriptMethodList::build(&bridge.variants(), target.script_method_list(script)) {
                    Ok(list) => bridge.registry().lend_methods(list),
                    Err(err) => {
                        tracing::warn!(target: "registry", script, error = %err, "method list dropped");
                        (ptr::null(), 0)
                    }
                }
            }
            _ => (ptr::null(), 0),
        };
        if !r_count.is_null() {
            *r_count = count;
        }
        list
    })
}

unsafe extern "C" fn free_method_list(_instance: ScriptInstanceDataPtr, list: *const MethodInfo, _count: u32) {
    ffi_guard("free_method_list", (), || {
        if list.is_null() {
            return;
        }
        if let Ok(bridge) = bridge() {
            if !bridge.registry().return_methods(list) {
                tracing::warn!(target: "registry", list = ?list, "unknown method list returned");
            }
        }
    })
}

unsafe extern "C" fn property_type(
    instance: ScriptInstanceDataPtr,
    name: ConstStringNamePtr,
    r_is_valid: *mut Bool,
) -> RawVariantType {
    ffi_guard("get_property_type", VariantType::Nil.raw(), || {
        let ty = managed().ok().and_then(|m| m.script_property_type(script_handle(instance), name));
        if !r_is_valid.is_null() {
            *r_is_valid = ty.is_some() as Bool;
        }
        ty.unwrap_or(VariantType::Nil).raw()
    })
}

unsafe extern "C" fn has_method(instance: ScriptInstanceDataPtr, name: ConstStringNamePtr) -> Bool {
    ffi_guard("has_method", 0, || {
        managed().map_or(false, |m| m.script_has_method(script_handle(instance), name)) as Bool
    })
}

unsafe extern "C" fn method_argument_count(
    instance: ScriptInstanceDataPtr,
    name: ConstStringNamePtr,
    r_is_valid: *mut Bool,
) -> Int {
    ffi_guard("get_method_argument_count", 0, || {
        let count = managed()
            .ok()
            .and_then(|m| m.script_method_argument_count(script_handle(instance), name));
        if !r_is_valid.is_null() {
            *r_is_valid = count.is_some() as Bool;
        }
        count.unwrap_or(0)
    })
}

unsafe extern "C" fn call(
    instance: ScriptInstanceDataPtr,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    argument_count: Int,
    r_return: VariantPtr,
    r_error: *mut CallError,
) {
    let failed = CallError::with(CallErrorType::InvalidMethod, 0, 0);
    let outcome = ffi_guard("script_call", Err(failed), || {
        let target = managed().map_err(|_| failed)?;
        let args = argument_slice(args, argument_count);
        crate::logging::log_dispatch("script_call", args.len());
        target.script_call(script_handle(instance), method, args, r_return)
    });
    report(r_error, outcome);
}

unsafe extern "C" fn refcount_incremented(instance: ScriptInstanceDataPtr) {
    ffi_guard("refcount_incremented", (), || {
        if let Ok(target) = managed() {
            target.script_refcount_incremented(script_handle(instance));
        }
    })
}

unsafe extern "C" fn refcount_decremented(instance: ScriptInstanceDataPtr) -> Bool {
    ffi_guard("refcount_decremented", 1, || {
        managed().map_or(true, |m| m.script_refcount_decremented(script_handle(instance))) as Bool
    })
}

unsafe extern "C" fn script(instance: ScriptInstanceDataPtr) -> ObjectPtr {
    ffi_guard("get_script", ptr::null_mut(), || {
        managed().map_or(ptr::null_mut(), |m| m.script_object(script_handle(instance)))
    })
}

unsafe extern "C" fn is_placeholder(instance: ScriptInstanceDataPtr) -> Bool {
    ffi_guard("is_placeholder", 0, || {
        managed().map_or(false, |m| m.script_is_placeholder(script_handle(instance))) as Bool
    })
}

unsafe extern "C" fn set_fallback(instance: ScriptInstanceDataPtr, name: ConstStringNamePtr, value: ConstVariantPtr) -> Bool {
    ffi_guard("set_fallback", 0, || {
        managed().map_or(false, |m| m.script_set_fallback(script_handle(instance), name, value)) as Bool
    })
}

unsafe extern "C" fn get_fallback(instance: ScriptInstanceDataPtr, name: ConstStringNamePtr, r_ret: VariantPtr) -> Bool {
    ffi_guard("get_fallback", 0, || {
        managed().map_or(false, |m| m.script_get_fallback(script_handle(instance), name, r_ret)) as Bool
    })
}

unsafe extern "C" fn language(instance: ScriptInstanceDataPtr) -> ObjectPtr {
    ffi_guard("get_language", ptr::null_mut(), || {
        managed().map_or(ptr::null_mut(), |m| m.script_language(script_handle(instance)))
    })
}

unsafe extern "C" fn free(instance: ScriptInstanceDataPtr) {
    ffi_guard("script_free", (), || {
        let script = script_handle(instance);
        if let Ok(bridge) = bridge() {
            bridge.registry().forget_script(script);
        }
        if let Ok(target) = managed() {
            target.script_free(script);
        }
    })
}
