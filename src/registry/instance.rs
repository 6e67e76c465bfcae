//! Object lifecycle
//!
//! An instance moves `Constructed -> Bound -> Live -> Unbound -> Freed`.
//! Construction may stop early, so `Unbound` is reachable from any earlier
//! state. Nothing leaves `Freed`, and the managed side hears about the free
//! only after the host has dropped the binding.

use crate::error::{ffi_guard, BridgeError, Result};
use crate::handle::{userdata, Handle};
use crate::host::abi::*;
use crate::host_fn;
use crate::logging::log_lifecycle;
use crate::managed::managed;
use crate::runtime::Bridge;
use core::ffi::c_void;
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Constructed,
    Bound,
    Live,
    Unbound,
    Freed,
}

impl InstanceState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Constructed => "constructed",
            Self::Bound => "bound",
            Self::Live => "live",
            Self::Unbound => "unbound",
            Self::Freed => "freed",
        }
    }

    pub fn can_become(self, next: Self) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Constructed, Bound) | (Bound, Live) | (Constructed | Bound | Live, Unbound) | (Unbound, Freed)
        )
    }

    fn advance(self, next: Self) -> Result<Self> {
        if self.can_become(next) {
            Ok(next)
        } else {
            Err(BridgeError::Lifecycle { from: self.name(), to: next.name() })
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InstanceRecord {
    object: usize,
    class: Handle,
    managed_class: u64,
    state: InstanceState,
}

/// Live instances keyed by managed instance handle
#[derive(Default)]
pub struct Lifecycle {
    instances: DashMap<u64, InstanceRecord>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state; `None` once the instance is freed or was never seen
    pub fn state(&self, instance: u64) -> Option<InstanceState> {
        self.instances.get(&instance).map(|record| record.state)
    }

    pub fn object(&self, instance: u64) -> Option<ObjectPtr> {
        self.instances.get(&instance).map(|record| record.object as ObjectPtr)
    }

    pub fn class(&self, instance: u64) -> Option<Handle> {
        self.instances.get(&instance).map(|record| record.class)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn begin(&self, instance: u64, object: ObjectPtr, class: Handle, managed_class: u64) -> Result<()> {
        if instance == 0 {
            return Err(BridgeError::StaleHandle(0));
        }
        if userdata(instance).is_none() {
            return Err(BridgeError::HandleTooWide(instance));
        }
        if let Some(existing) = self.instances.get(&instance) {
            return Err(BridgeError::Lifecycle { from: existing.state.name(), to: InstanceState::Constructed.name() });
        }
        self.instances.insert(
            instance,
            InstanceRecord { object: object as usize, class, managed_class, state: InstanceState::Constructed },
        );
        log_lifecycle(instance, "new", InstanceState::Constructed.name());
        Ok(())
    }

    fn advance(&self, instance: u64, next: InstanceState) -> Result<InstanceRecord> {
        let mut record = self.instances.get_mut(&instance).ok_or(BridgeError::StaleHandle(instance))?;
        let from = record.state;
        record.state = from.advance(next)?;
        log_lifecycle(instance, from.name(), next.name());
        Ok(*record)
    }

    fn finish(&self, instance: u64) -> Result<()> {
        self.advance(instance, InstanceState::Freed)?;
        self.instances.remove(&instance);
        Ok(())
    }
}

/// Binding hooks installed on every object this bridge creates
pub(crate) static INSTANCE_BINDING_CALLBACKS: InstanceBindingCallbacks = InstanceBindingCallbacks {
    create_callback: Some(binding_create),
    free_callback: Some(binding_free),
    reference_callback: Some(binding_reference),
};

unsafe extern "C" fn binding_create(_token: *mut c_void, object: *mut c_void) -> *mut c_void {
    ffi_guard("binding_create", core::ptr::null_mut(), || {
        managed()
            .ok()
            .and_then(|m| userdata(m.binding_created(object)))
            .unwrap_or(core::ptr::null_mut())
    })
}

unsafe extern "C" fn binding_free(_token: *mut c_void, object: *mut c_void, binding: *mut c_void) {
    ffi_guard("binding_free", (), || {
        if let Ok(target) = managed() {
            target.binding_freed(object, binding as usize as u64);
        }
    })
}

unsafe extern "C" fn binding_reference(_token: *mut c_void, binding: *mut c_void, reference: Bool) -> Bool {
    ffi_guard("binding_reference", 1, || {
        managed().map_or(true, |m| m.binding_reference(binding as usize as u64, reference != 0)) as Bool
    })
}

impl Bridge {
    /// Build a new object of a registered class.
    ///
    /// The host constructs the native parent first; the managed instance is
    /// then created, attached and bound, in that order. A failure after the
    /// host object exists destroys it again and frees the managed instance.
    pub fn construct(&self, class: Handle) -> Result<ObjectPtr> {
        let construct = host_fn!(self.api(), classdb_construct_object2)?;
        let set_instance = host_fn!(self.api(), object_set_instance)?;
        let destroy = host_fn!(self.api(), object_destroy)?;
        let record = self.registry().get(class)?;
        let target = managed()?;

        // SAFETY: the parent name is kept alive by the class record
        let object = unsafe { construct(record.parent_ptr()) };
        if object.is_null() {
            return Err(BridgeError::UnknownClass(record.parent().to_string()));
        }

        let instance = target.create_instance(record.managed(), object);
        if let Err(err) = self.lifecycle().begin(instance, object, class, record.managed()) {
            // nothing is attached yet, so the host frees only its own half
            // SAFETY: `object` was just created by the host and is unshared
            unsafe { destroy(object) };
            if instance != 0 {
                target.free_instance(record.managed(), instance);
            }
            log_lifecycle(instance, InstanceState::Constructed.name(), "abandoned");
            return Err(err);
        }

        // SAFETY: `object` was just created by the host
        unsafe { set_instance(object, record.name_ptr(), instance as usize as ClassInstancePtr) };
        let attached = self.lifecycle().advance(instance, InstanceState::Bound).and_then(|_| {
            self.bind(object, instance);
            self.lifecycle().advance(instance, InstanceState::Live)
        });
        if let Err(err) = attached {
            // the host releases the attached instance through the free callback
            // SAFETY: `object` has not been handed out
            unsafe { destroy(object) };
            if self.lifecycle().object(instance) == Some(object) {
                self.release(instance)?;
            }
            return Err(err);
        }
        Ok(object)
    }

    /// Rebuild the managed half of an object the host kept across a reload
    pub fn recreate(&self, class: Handle, object: ObjectPtr) -> Result<u64> {
        let record = self.registry().get(class)?;
        let target = managed()?;
        let instance = target.create_instance(record.managed(), object);
        if let Err(err) = self.lifecycle().begin(instance, object, class, record.managed()) {
            if instance != 0 {
                target.free_instance(record.managed(), instance);
            }
            return Err(err);
        }
        // the host attaches the returned instance itself
        self.lifecycle().advance(instance, InstanceState::Bound)?;
        self.bind(object, instance);
        self.lifecycle().advance(instance, InstanceState::Live)?;
        Ok(instance)
    }

    fn bind(&self, object: ObjectPtr, instance: u64) {
        if let Some(set_binding) = self.api().object_set_instance_binding {
            // SAFETY: the callbacks table is static
            unsafe {
                set_binding(
                    object,
                    self.library().cast(),
                    instance as usize as *mut c_void,
                    &INSTANCE_BINDING_CALLBACKS,
                )
            };
        }
    }

    /// The host is dropping the object behind `instance`
    pub fn release(&self, instance: u64) -> Result<()> {
        let record = self.lifecycle().advance(instance, InstanceState::Unbound)?;
        managed()?.free_instance(record.managed_class, instance);
        self.lifecycle().finish(instance)
    }

    /// Ask the host to destroy an object; release follows through the free callback
    pub fn destroy(&self, object: ObjectPtr) -> Result<()> {
        let destroy = host_fn!(self.api(), object_destroy)?;
        // SAFETY: the caller hands over a live object
        unsafe { destroy(object) };
        Ok(())
    }

    /// Binding this library holds on `object`, created on demand
    pub fn binding(&self, object: ObjectPtr) -> Result<u64> {
        let get_binding = host_fn!(self.api(), object_get_instance_binding)?;
        // SAFETY: the callbacks table is static
        let binding = unsafe { get_binding(object, self.library().cast(), &INSTANCE_BINDING_CALLBACKS) };
        Ok(binding as usize as u64)
    }

    pub fn instance_id(&self, object: ObjectPtr) -> Result<ObjectId> {
        let get_id = host_fn!(self.api(), object_get_instance_id)?;
        // SAFETY: the caller passes a live object
        Ok(unsafe { get_id(object) })
    }

    /// Object behind a host id, `None` once it is gone
    pub fn object_from_id(&self, id: ObjectId) -> Result<Option<ObjectPtr>> {
        let from_id = host_fn!(self.api(), object_get_instance_from_id)?;
        // SAFETY: any id is a valid query
        let object = unsafe { from_id(id) };
        Ok((!object.is_null()).then_some(object))
    }

    /// `object` seen as an instance of `class`, `None` when it does not derive from it
    pub fn cast_to(&self, object: ObjectPtr, class: &str) -> Result<Option<ObjectPtr>> {
        let get_tag = host_fn!(self.api(), classdb_get_class_tag)?;
        let cast = host_fn!(self.api(), object_cast_to)?;
        let name = self.variants().string_name(class)?;
        // SAFETY: `name` outlives both calls
        let tag = unsafe { get_tag(name.as_ptr()) };
        if tag.is_null() {
            return Err(BridgeError::UnknownClass(class.to_string()));
        }
        // SAFETY: the tag came from the host for this query
        let viewed = unsafe { cast(object, tag) };
        Ok((!viewed.is_null()).then_some(viewed))
    }

    /// Engine singleton registered under `name`
    pub fn singleton(&self, name: &str) -> Result<Option<ObjectPtr>> {
        let get_singleton = host_fn!(self.api(), global_get_singleton)?;
        let name = self.variants().string_name(name)?;
        // SAFETY: `name` outlives the call
        let object = unsafe { get_singleton(name.as_ptr()) };
        Ok((!object.is_null()).then_some(object))
    }
}
