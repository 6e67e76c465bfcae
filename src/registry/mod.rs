//! Class registration and object lifecycle
//!
//! Design: Every class the managed side publishes gets a `ClassRecord` in a
//! handle table. The record's handle is the class userdata the host passes
//! back to every class-level callback. Records own the descriptors the host
//! points into, so they outlive the registration and are dropped only after
//! the host has been told to forget the class.
//!
//! Architecture:
//! - `descriptors.rs` - property, method and signal descriptors with stable addresses
//! - `callbacks.rs` - `extern "C"` class callbacks forwarding to `Managed`
//! - `instance.rs` - construct/bind/release state machine and instance bindings
//! - `script.rs` - script and placeholder instances
//! - `callable.rs` - host callables backed by managed handles
//! - `task.rs` - worker thread pool tasks

mod callable;
mod callbacks;
mod descriptors;
mod instance;
mod script;
mod task;

pub use descriptors::{
    MethodDef, MethodDescriptor, PropertyDef, PropertyList, ScriptMethodList, VirtualMethodDescriptor,
    PROPERTY_HINT_NONE, PROPERTY_USAGE_DEFAULT, PROPERTY_USAGE_EDITOR, PROPERTY_USAGE_STORAGE,
};
pub use callable::NativeCallable;
pub use instance::{InstanceState, Lifecycle};
pub use task::GroupTask;

use crate::config::VirtualDispatch;
use crate::error::{BridgeError, Result};
use crate::handle::{Handle, HandleTable};
use crate::host::abi::*;
use crate::host_fn;
use crate::logging::{log_member, log_registration, log_unregistration};
use crate::runtime::Bridge;
use crate::trampoline::{VirtualId, VirtualSlots};
use crate::variant::{name_bits, StableName};
use core::ptr;
use dashmap::DashMap;
use descriptors::{PropertyDescriptor, SignalDescriptor};
use parking_lot::Mutex;
use std::sync::Arc;

/// What the managed side declares about a class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub parent: String,
    /// Managed class handle, passed to `Managed::create_instance`
    pub handle: u64,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_exposed: bool,
    pub is_runtime: bool,
    /// Editor icon, a resource path
    pub icon_path: Option<String>,
    /// Virtual methods the class overrides
    pub virtuals: Vec<String>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>, parent: impl Into<String>, handle: u64) -> Self {
        Self {
            name: name.into(),
            parent: parent.into(),
            handle,
            is_virtual: false,
            is_abstract: false,
            is_exposed: true,
            is_runtime: false,
            icon_path: None,
            virtuals: Vec::new(),
        }
    }

    pub fn with_icon(mut self, path: impl Into<String>) -> Self {
        self.icon_path = Some(path.into());
        self
    }

    pub fn with_virtual(mut self, method: impl Into<String>) -> Self {
        self.virtuals.push(method.into());
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn runtime_class(mut self) -> Self {
        self.is_runtime = true;
        self
    }
}

#[derive(Default)]
struct Members {
    methods: Vec<MethodDescriptor>,
    virtual_methods: Vec<VirtualMethodDescriptor>,
    properties: Vec<PropertyDescriptor>,
    signals: Vec<SignalDescriptor>,
    names: Vec<StableName>,
}

/// A registered class and everything the host may point into
pub struct ClassRecord {
    class_name: String,
    parent_name: String,
    managed: u64,
    name: StableName,
    parent: StableName,
    icon: Option<StableName>,
    virtuals: DashMap<u64, VirtualId>,
    members: Mutex<Members>,
}

impl ClassRecord {
    #[inline]
    pub fn name(&self) -> &str {
        &self.class_name
    }

    #[inline]
    pub fn parent(&self) -> &str {
        &self.parent_name
    }

    #[inline]
    pub fn managed(&self) -> u64 {
        self.managed
    }

    #[inline]
    pub(crate) fn name_ptr(&self) -> StringNamePtr {
        self.name.as_ptr()
    }

    #[inline]
    pub(crate) fn parent_ptr(&self) -> StringNamePtr {
        self.parent.as_ptr()
    }

    /// Identity for a host-side virtual name, if the class overrides it
    pub fn virtual_id(&self, name: u64) -> Option<VirtualId> {
        self.virtuals.get(&name).map(|id| *id)
    }

    pub fn method_count(&self) -> usize {
        self.members.lock().methods.len()
    }

    /// Overridable methods the class declared for its subclasses
    pub fn virtual_method_count(&self) -> usize {
        self.members.lock().virtual_methods.len()
    }

    pub fn property_count(&self) -> usize {
        self.members.lock().properties.len()
    }

    pub fn signal_count(&self) -> usize {
        self.members.lock().signals.len()
    }
}

/// All registered classes plus the lists currently lent to the host
pub struct ClassRegistry {
    classes: HandleTable<ClassRecord>,
    by_name: DashMap<String, Handle>,
    slots: VirtualSlots,
    property_lists: DashMap<usize, descriptors::PropertyList>,
    method_lists: DashMap<usize, ScriptMethodList>,
    categories: DashMap<u64, descriptors::PropertyList>,
}

impl ClassRegistry {
    pub fn new(virtual_slots: usize) -> Self {
        Self {
            classes: HandleTable::new(),
            by_name: DashMap::new(),
            slots: VirtualSlots::new(virtual_slots),
            property_lists: DashMap::new(),
            method_lists: DashMap::new(),
            categories: DashMap::new(),
        }
    }

    pub fn get(&self, class: Handle) -> Result<Arc<ClassRecord>> {
        self.classes.get(class)
    }

    pub fn find(&self, name: &str) -> Option<Handle> {
        self.by_name.get(name).map(|handle| *handle)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    #[inline]
    pub fn slots(&self) -> &VirtualSlots {
        &self.slots
    }

    /// Number of property and method lists the host has not handed back yet
    pub fn lent_lists(&self) -> usize {
        self.property_lists.len() + self.method_lists.len()
    }

    /// Keep a property list alive until the host frees it
    pub(crate) fn lend_properties(&self, list: descriptors::PropertyList) -> (*const PropertyInfo, u32) {
        if list.is_empty() {
            return (ptr::null(), 0);
        }
        let raw = list.as_ptr();
        let count = list.len() as u32;
        self.property_lists.insert(raw as usize, list);
        (raw, count)
    }

    pub(crate) fn return_properties(&self, list: *const PropertyInfo) -> bool {
        self.property_lists.remove(&(list as usize)).is_some()
    }

    pub(crate) fn lend_methods(&self, list: ScriptMethodList) -> (*const MethodInfo, u32) {
        if list.is_empty() {
            return (ptr::null(), 0);
        }
        let raw = list.as_ptr();
        let count = list.len() as u32;
        self.method_lists.insert(raw as usize, list);
        (raw, count)
    }

    pub(crate) fn return_methods(&self, list: *const MethodInfo) -> bool {
        self.method_lists.remove(&(list as usize)).is_some()
    }

    /// Category list for a script instance; replaced on every request
    pub(crate) fn set_category(&self, script: u64, list: descriptors::PropertyList) -> Option<PropertyInfo> {
        let info = list.get(0).copied();
        self.categories.insert(script, list);
        info
    }

    pub(crate) fn forget_script(&self, script: u64) {
        self.categories.remove(&script);
    }
}

impl Bridge {
    /// Publish a class to the host.
    ///
    /// Virtual identities are assigned before anything reaches the host, so a
    /// class that cannot get all of them is refused whole.
    pub fn register_class(&self, def: ClassDef) -> Result<Handle> {
        let register = host_fn!(self.api(), classdb_register_extension_class4)?;
        if self.registry().by_name.contains_key(&def.name) {
            return Err(BridgeError::DuplicateClass(def.name));
        }

        let variants = self.variants();
        let name = variants.string_name(&def.name)?;
        let parent = variants.string_name(&def.parent)?;
        let icon = def.icon_path.as_deref().map(|path| variants.string(path)).transpose()?;

        let virtuals = DashMap::new();
        let mut names = Vec::with_capacity(def.virtuals.len());
        for method in &def.virtuals {
            let id = self.registry().slots.assign(&def.name, method)?;
            let method_name = variants.string_name(method)?;
            virtuals.insert(method_name.bits(), id);
            names.push(method_name);
        }

        let record = ClassRecord {
            class_name: def.name.clone(),
            parent_name: def.parent.clone(),
            managed: def.handle,
            name,
            parent,
            icon,
            virtuals,
            members: Mutex::new(Members { names, ..Members::default() }),
        };
        let (name_ptr, parent_ptr) = (record.name_ptr(), record.parent_ptr());
        let icon_ptr = record.icon.as_ref().map_or(ptr::null(), |icon| icon.as_ptr().cast_const());
        let handle = self.registry().classes.insert(record)?;

        let info = self.creation_info(&def, handle, icon_ptr);
        crate::time_block!("register_class", {
            // SAFETY: names and info are live for the call; the host copies `info`
            unsafe { register(self.library(), name_ptr, parent_ptr, &info) }
        });
        self.registry().by_name.insert(def.name.clone(), handle);

        log_registration(&def.name, &def.parent);
        Ok(handle)
    }

    fn creation_info(&self, def: &ClassDef, handle: Handle, icon_path: ConstStringPtr) -> ClassCreationInfo4 {
        let (get_virtual, get_call_data, call_with_data) = match self.config().virtual_dispatch {
            VirtualDispatch::Trampoline => (Some(callbacks::get_virtual as ClassGetVirtual), None, None),
            VirtualDispatch::CallData => (
                None,
                Some(callbacks::get_virtual_call_data as ClassGetVirtualCallData),
                Some(crate::trampoline::call_virtual_with_data as ClassCallVirtualWithData),
            ),
        };

        ClassCreationInfo4 {
            is_virtual: def.is_virtual as Bool,
            is_abstract: def.is_abstract as Bool,
            is_exposed: def.is_exposed as Bool,
            is_runtime: def.is_runtime as Bool,
            icon_path,
            set_func: Some(callbacks::set),
            get_func: Some(callbacks::get),
            get_property_list_func: Some(callbacks::get_property_list),
            free_property_list_func: Some(callbacks::free_property_list),
            property_can_revert_func: Some(callbacks::property_can_revert),
            property_get_revert_func: Some(callbacks::property_get_revert),
            validate_property_func: Some(callbacks::validate_property),
            notification_func: Some(callbacks::notification),
            to_string_func: Some(callbacks::to_string),
            reference_func: Some(callbacks::reference),
            unreference_func: Some(callbacks::unreference),
            create_instance_func: Some(callbacks::create_instance),
            free_instance_func: Some(callbacks::free_instance),
            recreate_instance_func: Some(callbacks::recreate_instance),
            get_virtual_func: get_virtual,
            get_virtual_call_data_func: get_call_data,
            call_virtual_with_data_func: call_with_data,
            class_userdata: handle.as_ptr(),
        }
    }

    pub fn register_method(&self, class: Handle, def: MethodDef) -> Result<()> {
        let register = host_fn!(self.api(), classdb_register_extension_class_method)?;
        let record = self.registry().get(class)?;
        let method_name = def.name.clone();
        let descriptor = MethodDescriptor::build(
            &self.variants(),
            def,
            Some(callbacks::method_call),
            Some(callbacks::method_ptrcall),
        )?;

        // SAFETY: the descriptor is kept alive by the record below
        unsafe { register(self.library(), record.name_ptr(), descriptor.info()) };
        record.members.lock().methods.push(descriptor);
        log_member(record.name(), "method", &method_name);
        Ok(())
    }

    /// Declare a method subclasses and scripts may override.
    ///
    /// The method handle and default values are not used; the declaration
    /// only describes the signature.
    pub fn register_virtual_method(&self, class: Handle, def: MethodDef) -> Result<()> {
        let register = host_fn!(self.api(), classdb_register_extension_class_virtual_method)?;
        let record = self.registry().get(class)?;
        let method_name = def.name.clone();
        let descriptor = VirtualMethodDescriptor::build(&self.variants(), def)?;

        // SAFETY: the descriptor is kept alive by the record below
        unsafe { register(self.library(), record.name_ptr(), descriptor.info()) };
        record.members.lock().virtual_methods.push(descriptor);
        log_member(record.name(), "virtual method", &method_name);
        Ok(())
    }

    pub fn register_constant(&self, class: Handle, enum_name: &str, name: &str, value: i64, bitfield: bool) -> Result<()> {
        let register = host_fn!(self.api(), classdb_register_extension_class_integer_constant)?;
        let record = self.registry().get(class)?;
        let variants = self.variants();
        let enum_name_sn = variants.string_name(enum_name)?;
        let constant = variants.string_name(name)?;

        // SAFETY: names are kept alive by the record below
        unsafe {
            register(
                self.library(),
                record.name_ptr(),
                enum_name_sn.as_ptr(),
                constant.as_ptr(),
                value,
                bitfield as Bool,
            )
        };
        record.members.lock().names.extend([enum_name_sn, constant]);
        log_member(record.name(), "constant", name);
        Ok(())
    }

    pub fn register_property(&self, class: Handle, property: PropertyDef, setter: &str, getter: &str) -> Result<()> {
        let register = host_fn!(self.api(), classdb_register_extension_class_property)?;
        let record = self.registry().get(class)?;
        let descriptor = self.property_descriptor(&property, setter, getter)?;

        // SAFETY: the descriptor is kept alive by the record below
        unsafe {
            register(
                self.library(),
                record.name_ptr(),
                descriptor.info.as_ptr(),
                descriptor.setter.as_ptr(),
                descriptor.getter.as_ptr(),
            )
        };
        record.members.lock().properties.push(descriptor);
        log_member(record.name(), "property", &property.name);
        Ok(())
    }

    pub fn register_property_indexed(
        &self,
        class: Handle,
        property: PropertyDef,
        setter: &str,
        getter: &str,
        index: i64,
    ) -> Result<()> {
        let register = host_fn!(self.api(), classdb_register_extension_class_property_indexed)?;
        let record = self.registry().get(class)?;
        let descriptor = self.property_descriptor(&property, setter, getter)?;

        // SAFETY: as in `register_property`
        unsafe {
            register(
                self.library(),
                record.name_ptr(),
                descriptor.info.as_ptr(),
                descriptor.setter.as_ptr(),
                descriptor.getter.as_ptr(),
                index,
            )
        };
        record.members.lock().properties.push(descriptor);
        log_member(record.name(), "indexed property", &property.name);
        Ok(())
    }

    fn property_descriptor(&self, property: &PropertyDef, setter: &str, getter: &str) -> Result<PropertyDescriptor> {
        let variants = self.variants();
        Ok(PropertyDescriptor {
            info: descriptors::PropertyList::build(&variants, std::slice::from_ref(property))?,
            setter: variants.string_name(setter)?,
            getter: variants.string_name(getter)?,
        })
    }

    pub fn register_group(&self, class: Handle, name: &str, prefix: &str) -> Result<()> {
        let register = host_fn!(self.api(), classdb_register_extension_class_property_group)?;
        self.register_grouping(class, "group", name, prefix, register)
    }

    pub fn register_subgroup(&self, class: Handle, name: &str, prefix: &str) -> Result<()> {
        let register = host_fn!(self.api(), classdb_register_extension_class_property_subgroup)?;
        self.register_grouping(class, "subgroup", name, prefix, register)
    }

    fn register_grouping(
        &self,
        class: Handle,
        kind: &str,
        name: &str,
        prefix: &str,
        register: unsafe extern "C" fn(ClassLibraryPtr, ConstStringNamePtr, ConstStringPtr, ConstStringPtr),
    ) -> Result<()> {
        let record = self.registry().get(class)?;
        let variants = self.variants();
        let group = variants.string(name)?;
        let prefix = variants.string(prefix)?;

        // SAFETY: strings are kept alive by the record below
        unsafe { register(self.library(), record.name_ptr(), group.as_ptr(), prefix.as_ptr()) };
        record.members.lock().names.extend([group, prefix]);
        log_member(record.name(), kind, name);
        Ok(())
    }

    pub fn register_signal(&self, class: Handle, name: &str, arguments: &[PropertyDef]) -> Result<()> {
        let register = host_fn!(self.api(), classdb_register_extension_class_signal)?;
        let record = self.registry().get(class)?;
        let variants = self.variants();
        let descriptor = SignalDescriptor {
            name: variants.string_name(name)?,
            arguments: descriptors::PropertyList::build(&variants, arguments)?,
        };

        // SAFETY: the descriptor is kept alive by the record below
        unsafe {
            register(
                self.library(),
                record.name_ptr(),
                descriptor.name.as_ptr(),
                descriptor.arguments.as_ptr(),
                descriptor.arguments.len() as Int,
            )
        };
        record.members.lock().signals.push(descriptor);
        log_member(record.name(), "signal", name);
        Ok(())
    }

    /// Identity for an additional virtual override on an existing class
    pub fn register_virtual(&self, class: Handle, method: &str) -> Result<VirtualId> {
        let record = self.registry().get(class)?;
        let id = self.registry().slots.assign(record.name(), method)?;
        let name = self.variants().string_name(method)?;
        record.virtuals.insert(name.bits(), id);
        record.members.lock().names.push(name);
        log_member(record.name(), "virtual", method);
        Ok(id)
    }

    /// Tell the host to forget a class, then release its descriptors
    pub fn unregister_class(&self, class: Handle) -> Result<()> {
        let unregister = host_fn!(self.api(), classdb_unregister_extension_class)?;
        let record = self.registry().get(class)?;

        // SAFETY: the record keeps its name alive across the call
        unsafe { unregister(self.library(), record.name_ptr()) };
        self.registry().by_name.remove(record.name());
        self.registry().classes.remove(class)?;
        log_unregistration(record.name());
        Ok(())
    }

    /// Class record for userdata the host passed back
    pub(crate) fn class_from_userdata(&self, userdata: *mut core::ffi::c_void) -> Result<Arc<ClassRecord>> {
        self.registry().classes.get_raw(userdata as usize as u64)
    }

    /// Identity the class assigned to the virtual named by `name`
    ///
    /// # Safety
    /// `name` must be null or point to a live host StringName.
    pub(crate) unsafe fn resolve_virtual(&self, userdata: *mut core::ffi::c_void, name: ConstStringNamePtr) -> Option<VirtualId> {
        if name.is_null() {
            return None;
        }
        let record = self.class_from_userdata(userdata).ok()?;
        record
            .virtual_id(name_bits(name))
            .filter(|id| id.get() as usize <= self.config().virtual_slots)
    }
}
