//! Registration descriptors
//!
//! The host may keep raw pointers into these structures after the call that
//! registered them returns. Every name lives in a `StableName` (its own heap
//! cell) and every array is a boxed slice that is never resized, so moving a
//! descriptor never moves what the host points at. Descriptors are released
//! only when their class is unregistered.

use crate::error::{BridgeError, Result};
use crate::handle::userdata;
use crate::host::abi::*;
use crate::variant::{StableName, Variant, VariantBridge};
use core::ptr;

pub const PROPERTY_HINT_NONE: u32 = 0;
pub const PROPERTY_USAGE_STORAGE: u32 = 2;
pub const PROPERTY_USAGE_EDITOR: u32 = 4;
pub const PROPERTY_USAGE_DEFAULT: u32 = PROPERTY_USAGE_STORAGE | PROPERTY_USAGE_EDITOR;

/// Rust-side description of a property, argument or return value
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub name: String,
    pub ty: VariantType,
    pub class_name: String,
    pub hint: u32,
    pub hint_string: String,
    pub usage: u32,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, ty: VariantType) -> Self {
        Self {
            name: name.into(),
            ty,
            class_name: String::new(),
            hint: PROPERTY_HINT_NONE,
            hint_string: String::new(),
            usage: PROPERTY_USAGE_DEFAULT,
        }
    }

    pub fn with_hint(mut self, hint: u32, hint_string: impl Into<String>) -> Self {
        self.hint = hint;
        self.hint_string = hint_string.into();
        self
    }

    pub fn with_usage(mut self, usage: u32) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }
}

/// Native `PropertyInfo` array with the names it points at
pub struct PropertyList {
    infos: Box<[PropertyInfo]>,
    _names: Vec<StableName>,
}

// SAFETY: the raw pointers in `infos` only reference the owned `_names`
unsafe impl Send for PropertyList {}
unsafe impl Sync for PropertyList {}

impl PropertyList {
    pub fn build(variants: &VariantBridge<'_>, defs: &[PropertyDef]) -> Result<Self> {
        let mut names = Vec::with_capacity(defs.len() * 3);
        let infos = defs
            .iter()
            .map(|def| {
                let name = variants.string_name(&def.name)?;
                let class_name = variants.string_name(&def.class_name)?;
                let hint_string = variants.string(&def.hint_string)?;
                let info = PropertyInfo {
                    type_: def.ty.raw(),
                    name: name.as_ptr(),
                    class_name: class_name.as_ptr(),
                    hint: def.hint,
                    hint_string: hint_string.as_ptr(),
                    usage: def.usage,
                };
                names.extend([name, class_name, hint_string]);
                Ok(info)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { infos: infos.into_boxed_slice(), _names: names })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const PropertyInfo {
        self.infos.as_ptr()
    }

    /// Mutable pointer for host fields typed `*mut`; the host only reads it
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut PropertyInfo {
        self.infos.as_ptr().cast_mut()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&PropertyInfo> {
        self.infos.get(index)
    }
}

/// Rust-side description of a method
#[derive(Debug)]
pub struct MethodDef {
    pub name: String,
    /// Managed method handle, passed back verbatim on every call
    pub handle: u64,
    pub flags: u32,
    pub return_value: Option<PropertyDef>,
    pub return_metadata: ArgumentMetadata,
    pub arguments: Vec<PropertyDef>,
    pub argument_metadata: Vec<ArgumentMetadata>,
    /// Values for the trailing arguments; ownership moves into the descriptor
    pub defaults: Vec<Variant>,
}

impl MethodDef {
    pub fn new(name: impl Into<String>, handle: u64) -> Self {
        Self {
            name: name.into(),
            handle,
            flags: method_flags::DEFAULT,
            return_value: None,
            return_metadata: ArgumentMetadata::None,
            arguments: Vec::new(),
            argument_metadata: Vec::new(),
            defaults: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_return(mut self, value: PropertyDef) -> Self {
        self.return_value = Some(value);
        self
    }

    pub fn with_argument(mut self, argument: PropertyDef) -> Self {
        self.arguments.push(argument);
        self.argument_metadata.push(ArgumentMetadata::None);
        self
    }

    pub fn with_default(mut self, value: Variant) -> Self {
        self.defaults.push(value);
        self
    }
}

/// Published method; owns its default argument values
pub struct MethodDescriptor {
    name: StableName,
    has_return: bool,
    return_value: PropertyList,
    arguments: PropertyList,
    _argument_metadata: Box<[ArgumentMetadata]>,
    defaults: Box<[Variant]>,
    default_ptrs: Box<[VariantPtr]>,
    destroy: unsafe extern "C" fn(VariantPtr),
    info: ClassMethodInfo,
}

// SAFETY: the raw pointers in `info` and `default_ptrs` reference owned boxes
unsafe impl Send for MethodDescriptor {}
unsafe impl Sync for MethodDescriptor {}

impl MethodDescriptor {
    pub fn build(
        variants: &VariantBridge<'_>,
        def: MethodDef,
        call: Option<ClassMethodCall>,
        ptrcall: Option<ClassMethodPtrCall>,
    ) -> Result<Self> {
        let MethodDef {
            name,
            handle,
            flags,
            return_value,
            return_metadata,
            arguments,
            mut argument_metadata,
            defaults,
        } = def;

        let has_return = return_value.is_some();
        let return_def = return_value.unwrap_or_else(|| PropertyDef::new("", VariantType::Nil));
        let return_value = PropertyList::build(variants, std::slice::from_ref(&return_def))?;
        let argument_list = PropertyList::build(variants, &arguments)?;
        argument_metadata.resize(arguments.len(), ArgumentMetadata::None);
        let mut argument_metadata = argument_metadata.into_boxed_slice();

        let mut defaults = defaults.into_boxed_slice();
        let mut default_ptrs: Box<[VariantPtr]> = defaults.iter_mut().map(Variant::as_mut_ptr).collect();
        let name = variants.string_name(&name)?;
        let method_userdata = userdata(handle).ok_or(BridgeError::HandleTooWide(handle))?;

        let info = ClassMethodInfo {
            name: name.as_ptr(),
            method_userdata,
            call_func: call,
            ptrcall_func: ptrcall,
            method_flags: flags,
            has_return_value: has_return as Bool,
            return_value_info: return_value.as_mut_ptr(),
            return_value_metadata: return_metadata,
            argument_count: argument_list.len() as u32,
            arguments_info: argument_list.as_mut_ptr(),
            arguments_metadata: argument_metadata.as_mut_ptr(),
            default_argument_count: default_ptrs.len() as u32,
            default_arguments: if default_ptrs.is_empty() { ptr::null_mut() } else { default_ptrs.as_mut_ptr() },
        };

        Ok(Self {
            name,
            has_return,
            return_value,
            arguments: argument_list,
            _argument_metadata: argument_metadata,
            defaults,
            default_ptrs,
            destroy: variants.api().variant_destroy,
            info,
        })
    }

    #[inline]
    pub fn info(&self) -> &ClassMethodInfo {
        &self.info
    }

    #[inline]
    pub fn name(&self) -> &StableName {
        &self.name
    }

    #[inline]
    pub fn argument_count(&self) -> usize {
        self.arguments.len()
    }

    /// Description in the shape script instances report
    pub fn script_info(&self, id: i32) -> MethodInfo {
        MethodInfo {
            name: self.name.as_ptr(),
            return_value: self.return_value.get(0).copied().unwrap_or_else(no_value),
            flags: self.info.method_flags,
            id,
            argument_count: self.arguments.len() as u32,
            arguments: self.arguments.as_mut_ptr(),
            default_argument_count: self.default_ptrs.len() as u32,
            default_arguments: if self.default_ptrs.is_empty() {
                ptr::null_mut()
            } else {
                self.default_ptrs.as_ptr().cast_mut()
            },
        }
    }

    #[inline]
    pub fn has_return(&self) -> bool {
        self.has_return
    }

    #[inline]
    pub fn defaults(&self) -> &[Variant] {
        &self.defaults
    }
}

impl Drop for MethodDescriptor {
    fn drop(&mut self) {
        for value in self.defaults.iter_mut() {
            // SAFETY: each default is live and destroyed once, here
            unsafe { (self.destroy)(value.as_mut_ptr()) };
        }
    }
}

fn no_value() -> PropertyInfo {
    PropertyInfo {
        type_: VariantType::Nil.raw(),
        name: ptr::null_mut(),
        class_name: ptr::null_mut(),
        hint: PROPERTY_HINT_NONE,
        hint_string: ptr::null_mut(),
        usage: 0,
    }
}

/// Virtual method a class declares; its handle and defaults are not used
pub struct VirtualMethodDescriptor {
    _name: StableName,
    _return_value: Option<PropertyList>,
    _arguments: PropertyList,
    _argument_metadata: Box<[ArgumentMetadata]>,
    info: ClassVirtualMethodInfo,
}

// SAFETY: the raw pointers in `info` reference the owned lists and name
unsafe impl Send for VirtualMethodDescriptor {}
unsafe impl Sync for VirtualMethodDescriptor {}

impl VirtualMethodDescriptor {
    pub fn build(variants: &VariantBridge<'_>, def: MethodDef) -> Result<Self> {
        let MethodDef {
            name,
            flags,
            return_value,
            return_metadata,
            arguments,
            mut argument_metadata,
            defaults,
            ..
        } = def;
        for value in defaults {
            variants.destroy(value);
        }

        let return_value = return_value
            .map(|value| PropertyList::build(variants, std::slice::from_ref(&value)))
            .transpose()?;
        let arguments = PropertyList::build(variants, &arguments)?;
        argument_metadata.resize(arguments.len(), ArgumentMetadata::None);
        let mut argument_metadata = argument_metadata.into_boxed_slice();
        let name = variants.string_name(&name)?;

        let info = ClassVirtualMethodInfo {
            name: name.as_ptr(),
            method_flags: flags | method_flags::VIRTUAL,
            return_value: return_value.as_ref().and_then(|list| list.get(0).copied()).unwrap_or_else(no_value),
            return_value_metadata: return_metadata,
            argument_count: arguments.len() as u32,
            arguments: if arguments.is_empty() { ptr::null_mut() } else { arguments.as_mut_ptr() },
            arguments_metadata: argument_metadata.as_mut_ptr(),
        };
        Ok(Self {
            _name: name,
            _return_value: return_value,
            _arguments: arguments,
            _argument_metadata: argument_metadata,
            info,
        })
    }

    #[inline]
    pub fn info(&self) -> &ClassVirtualMethodInfo {
        &self.info
    }
}

/// Script method list lent to the host until it hands it back
pub struct ScriptMethodList {
    _methods: Vec<MethodDescriptor>,
    infos: Box<[MethodInfo]>,
}

// SAFETY: as for `MethodDescriptor`
unsafe impl Send for ScriptMethodList {}
unsafe impl Sync for ScriptMethodList {}

impl ScriptMethodList {
    pub fn build(variants: &VariantBridge<'_>, defs: Vec<MethodDef>) -> Result<Self> {
        let methods = defs
            .into_iter()
            .map(|def| MethodDescriptor::build(variants, def, None, None))
            .collect::<Result<Vec<_>>>()?;
        let infos = methods
            .iter()
            .enumerate()
            .map(|(id, method)| method.script_info(id as i32))
            .collect();
        Ok(Self { _methods: methods, infos })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const MethodInfo {
        self.infos.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

/// Published property with its accessor names
pub struct PropertyDescriptor {
    pub(crate) info: PropertyList,
    pub(crate) setter: StableName,
    pub(crate) getter: StableName,
}

/// Published signal
pub struct SignalDescriptor {
    pub(crate) name: StableName,
    pub(crate) arguments: PropertyList,
}
