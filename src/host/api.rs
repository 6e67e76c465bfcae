//! Host function table resolved by name at startup
//!
//! Required entries must resolve or loading fails. Optional entries are kept
//! as `Option` and turn into `BridgeError::Unresolved` only when a caller
//! actually needs them.

use super::abi::*;
use crate::error::{BridgeError, Result};
use crate::logging::{log_resolved, log_unresolved};
use core::ffi::{c_char, c_void};
use core::ptr::NonNull;
use std::ffi::CString;

/// Name to function-pointer lookup supplied by the host
pub trait Resolver {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>>;
}

/// Resolver backed by the host's `get_proc_address`
#[derive(Clone, Copy)]
pub struct ProcAddress(pub GetProcAddress);

impl Resolver for ProcAddress {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        let name = CString::new(name).ok()?;
        // SAFETY: the host contract allows lookups with any NUL-terminated name
        let function = unsafe { (self.0)(name.as_ptr()) }?;
        NonNull::new(function as *mut c_void)
    }
}

impl<F> Resolver for F
where
    F: Fn(&str) -> Option<NonNull<c_void>>,
{
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        self(name)
    }
}

macro_rules! host_api {
    (
        required { $( $req:ident : fn( $($req_arg:ty),* ) $(-> $req_ret:ty)? ; )* }
        optional { $( $opt:ident : fn( $($opt_arg:ty),* ) $(-> $opt_ret:ty)? ; )* }
    ) => {
        /// Host functions used by the bridge
        #[derive(Clone, Copy)]
        pub struct HostApi {
            $( pub $req: unsafe extern "C" fn( $($req_arg),* ) $(-> $req_ret)?, )*
            $( pub $opt: Option<unsafe extern "C" fn( $($opt_arg),* ) $(-> $opt_ret)?>, )*
        }

        impl HostApi {
            /// Resolve every entry, failing on the first missing required one
            pub fn load(resolver: &dyn Resolver) -> Result<Self> {
                Ok(Self {
                    $( $req: {
                        let raw = resolver.resolve(stringify!($req)).ok_or_else(|| {
                            log_unresolved(stringify!($req), true);
                            BridgeError::Unresolved { name: stringify!($req) }
                        })?;
                        log_resolved(stringify!($req));
                        // SAFETY: the host publishes this name with exactly this signature
                        unsafe {
                            core::mem::transmute::<*mut c_void, unsafe extern "C" fn( $($req_arg),* ) $(-> $req_ret)?>(raw.as_ptr())
                        }
                    }, )*
                    $( $opt: match resolver.resolve(stringify!($opt)) {
                        Some(raw) => {
                            log_resolved(stringify!($opt));
                            // SAFETY: as above
                            Some(unsafe {
                                core::mem::transmute::<*mut c_void, unsafe extern "C" fn( $($opt_arg),* ) $(-> $opt_ret)?>(raw.as_ptr())
                            })
                        }
                        None => {
                            log_unresolved(stringify!($opt), false);
                            None
                        }
                    }, )*
                })
            }

            /// Names the bridge asks the host for, required ones first
            pub const NAMES: &'static [&'static str] = &[
                $( stringify!($req), )*
                $( stringify!($opt), )*
            ];

            pub const REQUIRED: &'static [&'static str] = &[ $( stringify!($req), )* ];
        }
    };
}

host_api! {
    required {
        variant_new_copy: fn(VariantPtr, ConstVariantPtr);
        variant_new_nil: fn(VariantPtr);
        variant_destroy: fn(VariantPtr);
        variant_call: fn(VariantPtr, ConstStringNamePtr, *const ConstVariantPtr, Int, VariantPtr, *mut CallError);
        variant_evaluate: fn(RawOperator, ConstVariantPtr, ConstVariantPtr, VariantPtr, *mut Bool);
        variant_set_keyed: fn(VariantPtr, ConstVariantPtr, ConstVariantPtr, *mut Bool);
        variant_set_indexed: fn(VariantPtr, Int, ConstVariantPtr, *mut Bool, *mut Bool);
        variant_get_keyed: fn(ConstVariantPtr, ConstVariantPtr, VariantPtr, *mut Bool);
        variant_get_indexed: fn(ConstVariantPtr, Int, VariantPtr, *mut Bool, *mut Bool);
        variant_has_key: fn(ConstVariantPtr, ConstVariantPtr, *mut Bool) -> Bool;
        variant_iter_init: fn(ConstVariantPtr, VariantPtr, *mut Bool) -> Bool;
        variant_iter_next: fn(ConstVariantPtr, VariantPtr, *mut Bool) -> Bool;
        variant_iter_get: fn(ConstVariantPtr, VariantPtr, VariantPtr, *mut Bool);
        variant_hash: fn(ConstVariantPtr) -> Int;
        variant_recursive_hash: fn(ConstVariantPtr, Int) -> Int;
        variant_booleanize: fn(ConstVariantPtr) -> Bool;
        variant_duplicate: fn(ConstVariantPtr, VariantPtr, Bool);
        variant_get_type: fn(ConstVariantPtr) -> RawVariantType;
        get_variant_from_type_constructor: fn(RawVariantType) -> Option<VariantFromTypeConstructor>;
        get_variant_to_type_constructor: fn(RawVariantType) -> Option<TypeFromVariantConstructor>;
        variant_get_ptr_destructor: fn(RawVariantType) -> Option<PtrDestructor>;
        string_name_new_with_utf8_chars_and_len: fn(StringNamePtr, *const c_char, Int);
        mem_alloc: fn(usize) -> *mut c_void;
        mem_free: fn(*mut c_void);
    }
    optional {
        variant_call_static: fn(RawVariantType, ConstStringNamePtr, *const ConstVariantPtr, Int, VariantPtr, *mut CallError);
        variant_set_named: fn(VariantPtr, ConstStringNamePtr, ConstVariantPtr, *mut Bool);
        variant_get_named: fn(ConstVariantPtr, ConstStringNamePtr, VariantPtr, *mut Bool);
        variant_hash_compare: fn(ConstVariantPtr, ConstVariantPtr) -> Bool;
        variant_stringify: fn(ConstVariantPtr, StringPtr);
        variant_has_method: fn(ConstVariantPtr, ConstStringNamePtr) -> Bool;
        variant_can_convert: fn(RawVariantType, RawVariantType) -> Bool;
        variant_can_convert_strict: fn(RawVariantType, RawVariantType) -> Bool;
        variant_get_ptr_internal_getter: fn(RawVariantType) -> Option<VariantGetInternalPtr>;
        variant_get_ptr_indexed_setter: fn(RawVariantType) -> Option<PtrIndexedSetter>;
        variant_get_ptr_indexed_getter: fn(RawVariantType) -> Option<PtrIndexedGetter>;
        variant_get_ptr_keyed_setter: fn(RawVariantType) -> Option<PtrKeyedSetter>;
        variant_get_ptr_keyed_getter: fn(RawVariantType) -> Option<PtrKeyedGetter>;
        variant_get_ptr_operator_evaluator: fn(RawOperator, RawVariantType, RawVariantType) -> Option<PtrOperatorEvaluator>;
        variant_get_ptr_builtin_method: fn(RawVariantType, ConstStringNamePtr, Int) -> Option<PtrBuiltInMethod>;
        variant_get_ptr_constructor: fn(RawVariantType, i32) -> Option<PtrConstructor>;
        variant_get_ptr_utility_function: fn(ConstStringNamePtr, Int) -> Option<PtrUtilityFunction>;
        string_new_with_utf8_chars_and_len: fn(StringPtr, *const c_char, Int);
        global_get_singleton: fn(ConstStringNamePtr) -> ObjectPtr;
        classdb_construct_object2: fn(ConstStringNamePtr) -> ObjectPtr;
        classdb_get_class_tag: fn(ConstStringNamePtr) -> *mut c_void;
        classdb_get_method_bind: fn(ConstStringNamePtr, ConstStringNamePtr, Int) -> MethodBindPtr;
        object_destroy: fn(ObjectPtr);
        object_set_instance: fn(ObjectPtr, ConstStringNamePtr, ClassInstancePtr);
        object_get_instance_binding: fn(ObjectPtr, *mut c_void, *const InstanceBindingCallbacks) -> *mut c_void;
        object_set_instance_binding: fn(ObjectPtr, *mut c_void, *mut c_void, *const InstanceBindingCallbacks);
        object_free_instance_binding: fn(ObjectPtr, *mut c_void);
        object_get_instance_id: fn(ConstObjectPtr) -> ObjectId;
        object_get_instance_from_id: fn(ObjectId) -> ObjectPtr;
        object_cast_to: fn(ConstObjectPtr, *mut c_void) -> ObjectPtr;
        object_method_bind_call: fn(MethodBindPtr, ObjectPtr, *const ConstVariantPtr, Int, VariantPtr, *mut CallError);
        object_method_bind_ptrcall: fn(MethodBindPtr, ObjectPtr, *const ConstTypePtr, TypePtr);
        object_get_script_instance: fn(ConstObjectPtr, ObjectPtr) -> ScriptInstanceDataPtr;
        classdb_register_extension_class4: fn(ClassLibraryPtr, ConstStringNamePtr, ConstStringNamePtr, *const ClassCreationInfo4);
        classdb_register_extension_class_method: fn(ClassLibraryPtr, ConstStringNamePtr, *const ClassMethodInfo);
        classdb_register_extension_class_integer_constant: fn(ClassLibraryPtr, ConstStringNamePtr, ConstStringNamePtr, ConstStringNamePtr, Int, Bool);
        classdb_register_extension_class_property: fn(ClassLibraryPtr, ConstStringNamePtr, *const PropertyInfo, ConstStringNamePtr, ConstStringNamePtr);
        classdb_register_extension_class_property_indexed: fn(ClassLibraryPtr, ConstStringNamePtr, *const PropertyInfo, ConstStringNamePtr, ConstStringNamePtr, Int);
        classdb_register_extension_class_property_group: fn(ClassLibraryPtr, ConstStringNamePtr, ConstStringPtr, ConstStringPtr);
        classdb_register_extension_class_property_subgroup: fn(ClassLibraryPtr, ConstStringNamePtr, ConstStringPtr, ConstStringPtr);
        classdb_register_extension_class_signal: fn(ClassLibraryPtr, ConstStringNamePtr, ConstStringNamePtr, *const PropertyInfo, Int);
        classdb_register_extension_class_virtual_method: fn(ClassLibraryPtr, ConstStringNamePtr, *const ClassVirtualMethodInfo);
        classdb_unregister_extension_class: fn(ClassLibraryPtr, ConstStringNamePtr);
        callable_custom_create2: fn(TypePtr, *mut CallableCustomInfo2);
        callable_custom_get_userdata: fn(ConstTypePtr, *mut c_void) -> *mut c_void;
        script_instance_create3: fn(*const ScriptInstanceInfo3, ScriptInstanceDataPtr) -> ScriptInstancePtr;
        placeholder_script_instance_create: fn(ObjectPtr, ObjectPtr, ObjectPtr) -> ScriptInstancePtr;
        placeholder_script_instance_update: fn(ScriptInstancePtr, ConstTypePtr, ConstTypePtr);
        worker_thread_pool_add_native_task: fn(ObjectPtr, WorkerThreadPoolTask, *mut c_void, Bool, ConstStringPtr) -> i64;
        worker_thread_pool_add_native_group_task: fn(ObjectPtr, WorkerThreadPoolGroupTask, *mut c_void, i32, i32, Bool, ConstStringPtr) -> i64;
    }
}

/// Unwrap an optional host entry, naming it in the error when missing
#[macro_export]
#[doc(hidden)]
macro_rules! host_fn {
    ($api:expr, $name:ident) => {
        $api.$name.ok_or($crate::error::BridgeError::Unresolved { name: stringify!($name) })
    };
}
