//! The managed side - where every host callback ends up
//!
//! The bridge never interprets userdata. Class, method, instance, script,
//! callable and task handles are passed to the `Managed` implementation exactly as the
//! host handed them back. Exactly one implementation is installed per process,
//! before the host starts calling in.

use crate::error::{BridgeError, Result};
use crate::host::abi::*;
use crate::registry::{MethodDef, PropertyDef};
use crate::trampoline::VirtualId;
use once_cell::sync::OnceCell;

static MANAGED: OnceCell<Box<dyn Managed>> = OnceCell::new();

/// Install the managed dispatcher; only the first call succeeds
pub fn install_managed(target: impl Managed + 'static) -> Result<()> {
    MANAGED.set(Box::new(target)).map_err(|_| BridgeError::AlreadyInitialized)
}

/// The installed dispatcher
pub fn managed() -> Result<&'static dyn Managed> {
    MANAGED.get().map(|target| target.as_ref()).ok_or(BridgeError::NotInitialized)
}

/// Receiver for host callbacks.
///
/// Handles are opaque `u64`s chosen by the implementation. Methods with a
/// default body are optional; the defaults answer "not handled".
#[allow(unused_variables)]
pub trait Managed: Send + Sync {
    // ------------------------------------------------------------------------
    // Extension lifecycle
    // ------------------------------------------------------------------------

    fn initialize(&self, level: u32) {}

    fn deinitialize(&self, level: u32) {}

    // ------------------------------------------------------------------------
    // Classes and instances
    // ------------------------------------------------------------------------

    /// Create the managed half of a new object; returns its instance handle
    fn create_instance(&self, class: u64, object: ObjectPtr) -> u64;

    /// The host dropped the object. Called once, after the instance is unbound.
    fn free_instance(&self, class: u64, instance: u64) {}

    /// Dispatch a virtual call that arrived through trampoline `id`
    fn call_virtual(&self, id: VirtualId, instance: u64, args: *const ConstTypePtr, ret: TypePtr) {}

    /// Boxed method call. Argument pointers reference host-owned variants.
    fn call(&self, method: u64, instance: u64, args: &[ConstVariantPtr], ret: VariantPtr) -> std::result::Result<(), CallError> {
        Err(CallError::with(CallErrorType::InvalidMethod, 0, 0))
    }

    /// Direct method call through typed pointers
    fn ptrcall(&self, method: u64, instance: u64, args: *const ConstTypePtr, ret: TypePtr) {}

    fn set_property(&self, instance: u64, name: ConstStringNamePtr, value: ConstVariantPtr) -> bool {
        false
    }

    fn get_property(&self, instance: u64, name: ConstStringNamePtr, ret: VariantPtr) -> bool {
        false
    }

    fn property_list(&self, instance: u64) -> Vec<PropertyDef> {
        Vec::new()
    }

    fn property_can_revert(&self, instance: u64, name: ConstStringNamePtr) -> bool {
        false
    }

    fn property_get_revert(&self, instance: u64, name: ConstStringNamePtr, ret: VariantPtr) -> bool {
        false
    }

    fn validate_property(&self, instance: u64, property: &mut PropertyInfo) -> bool {
        false
    }

    fn notification(&self, instance: u64, what: i32, reversed: bool) {}

    /// Write a host String into `out` and return true, or leave it untouched
    fn to_string(&self, instance: u64, out: StringPtr) -> bool {
        false
    }

    /// Reference count changed on a refcounted object
    fn reference(&self, instance: u64, increment: bool) {}

    // ------------------------------------------------------------------------
    // Instance bindings
    // ------------------------------------------------------------------------

    /// The host asks for a binding for an object that has none yet
    fn binding_created(&self, object: ObjectPtr) -> u64 {
        0
    }

    fn binding_freed(&self, object: ObjectPtr, binding: u64) {}

    /// Returns true when the binding may be released
    fn binding_reference(&self, binding: u64, increment: bool) -> bool {
        true
    }

    // ------------------------------------------------------------------------
    // Script instances
    // ------------------------------------------------------------------------

    fn script_owner(&self, script: u64) -> ObjectPtr {
        core::ptr::null_mut()
    }

    fn script_class_category(&self, script: u64) -> Option<PropertyDef> {
        None
    }

    /// Report every stored property through `add`
    fn script_property_state(&self, script: u64, add: &mut dyn FnMut(ConstStringNamePtr, ConstVariantPtr)) {}

    fn script_method_list(&self, script: u64) -> Vec<MethodDef> {
        Vec::new()
    }

    fn script_property_type(&self, script: u64, name: ConstStringNamePtr) -> Option<VariantType> {
        None
    }

    fn script_has_method(&self, script: u64, name: ConstStringNamePtr) -> bool {
        false
    }

    fn script_method_argument_count(&self, script: u64, name: ConstStringNamePtr) -> Option<i64> {
        None
    }

    fn script_call(
        &self,
        script: u64,
        method: ConstStringNamePtr,
        args: &[ConstVariantPtr],
        ret: VariantPtr,
    ) -> std::result::Result<(), CallError> {
        Err(CallError::with(CallErrorType::InvalidMethod, 0, 0))
    }

    fn script_refcount_incremented(&self, script: u64) {}

    /// Returns true when the script instance may be freed
    fn script_refcount_decremented(&self, script: u64) -> bool {
        true
    }

    fn script_object(&self, script: u64) -> ObjectPtr {
        core::ptr::null_mut()
    }

    fn script_is_placeholder(&self, script: u64) -> bool {
        false
    }

    fn script_set_fallback(&self, script: u64, name: ConstStringNamePtr, value: ConstVariantPtr) -> bool {
        false
    }

    fn script_get_fallback(&self, script: u64, name: ConstStringNamePtr, ret: VariantPtr) -> bool {
        false
    }

    fn script_language(&self, script: u64) -> ObjectPtr {
        core::ptr::null_mut()
    }

    fn script_free(&self, script: u64) {}

    // ------------------------------------------------------------------------
    // Custom callables
    // ------------------------------------------------------------------------

    fn callable_call(&self, callable: u64, args: &[ConstVariantPtr], ret: VariantPtr) -> std::result::Result<(), CallError> {
        Err(CallError::with(CallErrorType::InvalidMethod, 0, 0))
    }

    fn callable_is_valid(&self, callable: u64) -> bool {
        true
    }

    fn callable_free(&self, callable: u64) {}

    fn callable_hash(&self, callable: u64) -> u32 {
        (callable ^ (callable >> 32)) as u32
    }

    fn callable_equal(&self, left: u64, right: u64) -> bool {
        left == right
    }

    fn callable_less(&self, left: u64, right: u64) -> bool {
        left < right
    }

    fn callable_to_string(&self, callable: u64, out: StringPtr) -> bool {
        false
    }

    fn callable_argument_count(&self, callable: u64) -> Option<i64> {
        None
    }

    // ------------------------------------------------------------------------
    // Worker thread pool
    // ------------------------------------------------------------------------

    /// Body of a task queued with `Bridge::add_task`. Runs on a host worker thread.
    fn run_task(&self, task: u64) {}

    /// One element of a group task; elements may run concurrently
    fn run_group_task(&self, task: u64, index: u32) {}
}
