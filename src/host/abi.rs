//! Host ABI - raw types shared with the engine
//!
//! Design: Everything here is `#[repr(C)]` and mirrors the engine's extension
//! header. Opaque handles are plain pointers; nothing in this module
//! dereferences them.

use core::ffi::{c_char, c_void};

pub type Bool = u8;
pub type Int = i64;

pub type VariantPtr = *mut c_void;
pub type ConstVariantPtr = *const c_void;
pub type TypePtr = *mut c_void;
pub type ConstTypePtr = *const c_void;
pub type StringNamePtr = *mut c_void;
pub type ConstStringNamePtr = *const c_void;
pub type StringPtr = *mut c_void;
pub type ConstStringPtr = *const c_void;
pub type ObjectPtr = *mut c_void;
pub type ConstObjectPtr = *const c_void;
pub type ClassInstancePtr = *mut c_void;
pub type ScriptInstanceDataPtr = *mut c_void;
pub type ScriptInstancePtr = *mut c_void;
pub type MethodBindPtr = *const c_void;
pub type ClassLibraryPtr = *mut c_void;
pub type ObjectId = u64;

/// Raw variant type id as it crosses the boundary
pub type RawVariantType = u32;
pub type RawOperator = u32;

/// Number of bytes the host reserves for a variant (three machine words)
pub const VARIANT_SIZE: usize = 24;

/// Variant type ids, in host order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum VariantType {
    Nil = 0,
    Bool,
    Int,
    Float,
    String,
    Vector2,
    Vector2i,
    Rect2,
    Rect2i,
    Vector3,
    Vector3i,
    Transform2D,
    Vector4,
    Vector4i,
    Plane,
    Quaternion,
    Aabb,
    Basis,
    Transform3D,
    Projection,
    Color,
    StringName,
    NodePath,
    Rid,
    Object,
    Callable,
    Signal,
    Dictionary,
    Array,
    PackedByteArray,
    PackedInt32Array,
    PackedInt64Array,
    PackedFloat32Array,
    PackedFloat64Array,
    PackedStringArray,
    PackedVector2Array,
    PackedVector3Array,
    PackedColorArray,
    PackedVector4Array,
}

impl VariantType {
    /// One past the last valid type id
    pub const MAX: u32 = 39;

    pub const ALL: [VariantType; Self::MAX as usize] = {
        use VariantType::*;
        [
            Nil, Bool, Int, Float, String, Vector2, Vector2i, Rect2, Rect2i, Vector3,
            Vector3i, Transform2D, Vector4, Vector4i, Plane, Quaternion, Aabb, Basis,
            Transform3D, Projection, Color, StringName, NodePath, Rid, Object, Callable,
            Signal, Dictionary, Array, PackedByteArray, PackedInt32Array, PackedInt64Array,
            PackedFloat32Array, PackedFloat64Array, PackedStringArray, PackedVector2Array,
            PackedVector3Array, PackedColorArray, PackedVector4Array,
        ]
    };

    #[inline]
    pub const fn from_raw(raw: RawVariantType) -> Option<Self> {
        if raw < Self::MAX {
            Some(Self::ALL[raw as usize])
        } else {
            None
        }
    }

    #[inline]
    pub const fn raw(self) -> RawVariantType {
        self as RawVariantType
    }

    /// Size in bytes of the type's native (unboxed) form, single precision build
    pub const fn native_size(self) -> usize {
        use VariantType::*;
        match self {
            Nil => 0,
            Bool => 1,
            Int | Float => 8,
            String | StringName | NodePath | Rid | Object | Dictionary | Array => 8,
            Vector2 | Vector2i => 8,
            Vector3 | Vector3i => 12,
            Rect2 | Rect2i | Vector4 | Vector4i | Plane | Quaternion | Color => 16,
            Callable | Signal => 16,
            Transform2D | Aabb => 24,
            Basis => 36,
            Transform3D => 48,
            Projection => 64,
            PackedByteArray | PackedInt32Array | PackedInt64Array | PackedFloat32Array
            | PackedFloat64Array | PackedStringArray | PackedVector2Array
            | PackedVector3Array | PackedColorArray | PackedVector4Array => 16,
        }
    }
}

/// Operators understood by `variant_evaluate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Operator {
    Equal = 0,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Negate,
    Positive,
    Module,
    Power,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitOr,
    BitXor,
    BitNegate,
    And,
    Or,
    Xor,
    Not,
    In,
}

impl Operator {
    pub const MAX: u32 = 25;

    #[inline]
    pub const fn raw(self) -> RawOperator {
        self as RawOperator
    }
}

/// Host call error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CallErrorType {
    Ok = 0,
    InvalidMethod,
    InvalidArgument,
    TooManyArguments,
    TooFewArguments,
    InstanceIsNull,
    MethodNotConst,
}

/// Error record filled by the host on boxed calls.
///
/// The code is kept as a raw integer so unknown values from newer hosts pass
/// through untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CallError {
    pub error: i32,
    pub argument: i32,
    pub expected: i32,
}

impl CallError {
    #[inline]
    pub const fn ok() -> Self {
        Self { error: 0, argument: 0, expected: 0 }
    }

    #[inline]
    pub const fn with(kind: CallErrorType, argument: i32, expected: i32) -> Self {
        Self { error: kind as i32, argument, expected }
    }

    #[inline]
    pub const fn is_ok(&self) -> bool {
        self.error == CallErrorType::Ok as i32
    }

    pub const fn kind(&self) -> Option<CallErrorType> {
        use CallErrorType::*;
        match self.error {
            0 => Some(Ok),
            1 => Some(InvalidMethod),
            2 => Some(InvalidArgument),
            3 => Some(TooManyArguments),
            4 => Some(TooFewArguments),
            5 => Some(InstanceIsNull),
            6 => Some(MethodNotConst),
            _ => None,
        }
    }
}

/// Argument metadata attached to method descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ArgumentMetadata {
    #[default]
    None = 0,
    IntIsInt8,
    IntIsInt16,
    IntIsInt32,
    IntIsInt64,
    IntIsUint8,
    IntIsUint16,
    IntIsUint32,
    IntIsUint64,
    RealIsFloat,
    RealIsDouble,
    IntIsChar16,
    IntIsChar32,
}

pub mod method_flags {
    pub const NORMAL: u32 = 1;
    pub const EDITOR: u32 = 2;
    pub const CONST: u32 = 4;
    pub const VIRTUAL: u32 = 8;
    pub const VARARG: u32 = 16;
    pub const STATIC: u32 = 32;
    pub const DEFAULT: u32 = NORMAL;
}

pub mod initialization_level {
    pub const CORE: u32 = 0;
    pub const SERVERS: u32 = 1;
    pub const SCENE: u32 = 2;
    pub const EDITOR: u32 = 3;
}

// ============================================================================
// Descriptors
// ============================================================================

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PropertyInfo {
    pub type_: RawVariantType,
    pub name: StringNamePtr,
    pub class_name: StringNamePtr,
    pub hint: u32,
    pub hint_string: StringPtr,
    pub usage: u32,
}

/// Method description used by script instances
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MethodInfo {
    pub name: StringNamePtr,
    pub return_value: PropertyInfo,
    pub flags: u32,
    pub id: i32,
    pub argument_count: u32,
    pub arguments: *mut PropertyInfo,
    pub default_argument_count: u32,
    pub default_arguments: *mut VariantPtr,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ClassMethodInfo {
    pub name: StringNamePtr,
    pub method_userdata: *mut c_void,
    pub call_func: Option<ClassMethodCall>,
    pub ptrcall_func: Option<ClassMethodPtrCall>,
    pub method_flags: u32,
    pub has_return_value: Bool,
    pub return_value_info: *mut PropertyInfo,
    pub return_value_metadata: ArgumentMetadata,
    pub argument_count: u32,
    pub arguments_info: *mut PropertyInfo,
    pub arguments_metadata: *mut ArgumentMetadata,
    pub default_argument_count: u32,
    pub default_arguments: *mut VariantPtr,
}

/// Overridable method an extension class declares for its subclasses
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ClassVirtualMethodInfo {
    pub name: StringNamePtr,
    pub method_flags: u32,
    pub return_value: PropertyInfo,
    pub return_value_metadata: ArgumentMetadata,
    pub argument_count: u32,
    pub arguments: *mut PropertyInfo,
    pub arguments_metadata: *mut ArgumentMetadata,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ClassCreationInfo4 {
    pub is_virtual: Bool,
    pub is_abstract: Bool,
    pub is_exposed: Bool,
    pub is_runtime: Bool,
    pub icon_path: ConstStringPtr,
    pub set_func: Option<ClassSet>,
    pub get_func: Option<ClassGet>,
    pub get_property_list_func: Option<ClassGetPropertyList>,
    pub free_property_list_func: Option<ClassFreePropertyList>,
    pub property_can_revert_func: Option<ClassPropertyCanRevert>,
    pub property_get_revert_func: Option<ClassPropertyGetRevert>,
    pub validate_property_func: Option<ClassValidateProperty>,
    pub notification_func: Option<ClassNotification>,
    pub to_string_func: Option<ClassToString>,
    pub reference_func: Option<ClassReference>,
    pub unreference_func: Option<ClassReference>,
    pub create_instance_func: Option<ClassCreateInstance>,
    pub free_instance_func: Option<ClassFreeInstance>,
    pub recreate_instance_func: Option<ClassRecreateInstance>,
    pub get_virtual_func: Option<ClassGetVirtual>,
    pub get_virtual_call_data_func: Option<ClassGetVirtualCallData>,
    pub call_virtual_with_data_func: Option<ClassCallVirtualWithData>,
    pub class_userdata: *mut c_void,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct InstanceBindingCallbacks {
    pub create_callback: Option<InstanceBindingCreate>,
    pub free_callback: Option<InstanceBindingFree>,
    pub reference_callback: Option<InstanceBindingReference>,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct CallableCustomInfo2 {
    pub callable_userdata: *mut c_void,
    pub token: *mut c_void,
    pub object_id: ObjectId,
    pub call_func: Option<CallableCall>,
    pub is_valid_func: Option<CallableIsValid>,
    pub free_func: Option<CallableFree>,
    pub hash_func: Option<CallableHash>,
    pub equal_func: Option<CallableCompare>,
    pub less_than_func: Option<CallableCompare>,
    pub to_string_func: Option<CallableToString>,
    pub get_argument_count_func: Option<CallableArgumentCount>,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ScriptInstanceInfo3 {
    pub set_func: Option<ClassSet>,
    pub get_func: Option<ClassGet>,
    pub get_property_list_func: Option<ClassGetPropertyList>,
    pub free_property_list_func: Option<ClassFreePropertyList>,
    pub get_class_category_func: Option<ScriptGetClassCategory>,
    pub property_can_revert_func: Option<ClassPropertyCanRevert>,
    pub property_get_revert_func: Option<ClassPropertyGetRevert>,
    pub get_owner_func: Option<ScriptGetOwner>,
    pub get_property_state_func: Option<ScriptGetPropertyState>,
    pub get_method_list_func: Option<ScriptGetMethodList>,
    pub free_method_list_func: Option<ScriptFreeMethodList>,
    pub get_property_type_func: Option<ScriptGetPropertyType>,
    pub validate_property_func: Option<ClassValidateProperty>,
    pub has_method_func: Option<ScriptHasMethod>,
    pub get_method_argument_count_func: Option<ScriptGetMethodArgumentCount>,
    pub call_func: Option<ScriptCall>,
    pub notification_func: Option<ClassNotification>,
    pub to_string_func: Option<ClassToString>,
    pub refcount_incremented_func: Option<ScriptRefCountIncremented>,
    pub refcount_decremented_func: Option<ScriptRefCountDecremented>,
    pub get_script_func: Option<ScriptGetOwner>,
    pub is_placeholder_func: Option<ScriptIsPlaceholder>,
    pub set_fallback_func: Option<ClassSet>,
    pub get_fallback_func: Option<ClassGet>,
    pub get_language_func: Option<ScriptGetOwner>,
    pub free_func: Option<ScriptFree>,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct Initialization {
    pub minimum_initialization_level: u32,
    pub userdata: *mut c_void,
    pub initialize: Option<InitializeCallback>,
    pub deinitialize: Option<InitializeCallback>,
}

// ============================================================================
// Host -> extension callback signatures
// ============================================================================

pub type InitializeCallback = unsafe extern "C" fn(userdata: *mut c_void, level: u32);

pub type ClassMethodCall = unsafe extern "C" fn(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstVariantPtr,
    argument_count: Int,
    r_return: VariantPtr,
    r_error: *mut CallError,
);
pub type ClassMethodPtrCall = unsafe extern "C" fn(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstTypePtr,
    r_ret: TypePtr,
);

pub type ClassSet =
    unsafe extern "C" fn(instance: ClassInstancePtr, name: ConstStringNamePtr, value: ConstVariantPtr) -> Bool;
pub type ClassGet =
    unsafe extern "C" fn(instance: ClassInstancePtr, name: ConstStringNamePtr, r_ret: VariantPtr) -> Bool;
pub type ClassGetPropertyList =
    unsafe extern "C" fn(instance: ClassInstancePtr, r_count: *mut u32) -> *const PropertyInfo;
pub type ClassFreePropertyList =
    unsafe extern "C" fn(instance: ClassInstancePtr, list: *const PropertyInfo, count: u32);
pub type ClassPropertyCanRevert =
    unsafe extern "C" fn(instance: ClassInstancePtr, name: ConstStringNamePtr) -> Bool;
pub type ClassPropertyGetRevert =
    unsafe extern "C" fn(instance: ClassInstancePtr, name: ConstStringNamePtr, r_ret: VariantPtr) -> Bool;
pub type ClassValidateProperty =
    unsafe extern "C" fn(instance: ClassInstancePtr, property: *mut PropertyInfo) -> Bool;
pub type ClassNotification = unsafe extern "C" fn(instance: ClassInstancePtr, what: i32, reversed: Bool);
pub type ClassToString =
    unsafe extern "C" fn(instance: ClassInstancePtr, r_is_valid: *mut Bool, r_out: StringPtr);
pub type ClassReference = unsafe extern "C" fn(instance: ClassInstancePtr);
pub type ClassCreateInstance =
    unsafe extern "C" fn(class_userdata: *mut c_void, notify_postinitialize: Bool) -> ObjectPtr;
pub type ClassFreeInstance = unsafe extern "C" fn(class_userdata: *mut c_void, instance: ClassInstancePtr);
pub type ClassRecreateInstance =
    unsafe extern "C" fn(class_userdata: *mut c_void, object: ObjectPtr) -> ClassInstancePtr;
pub type ClassCallVirtual =
    unsafe extern "C" fn(instance: ClassInstancePtr, args: *const ConstTypePtr, r_ret: TypePtr);
pub type ClassGetVirtual = unsafe extern "C" fn(
    class_userdata: *mut c_void,
    name: ConstStringNamePtr,
    hash: u32,
) -> Option<ClassCallVirtual>;
pub type ClassGetVirtualCallData =
    unsafe extern "C" fn(class_userdata: *mut c_void, name: ConstStringNamePtr, hash: u32) -> *mut c_void;
pub type ClassCallVirtualWithData = unsafe extern "C" fn(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    virtual_call_userdata: *mut c_void,
    args: *const ConstTypePtr,
    r_ret: TypePtr,
);

pub type InstanceBindingCreate = unsafe extern "C" fn(token: *mut c_void, instance: *mut c_void) -> *mut c_void;
pub type InstanceBindingFree =
    unsafe extern "C" fn(token: *mut c_void, instance: *mut c_void, binding: *mut c_void);
pub type InstanceBindingReference =
    unsafe extern "C" fn(token: *mut c_void, binding: *mut c_void, reference: Bool) -> Bool;

pub type CallableCall = unsafe extern "C" fn(
    userdata: *mut c_void,
    args: *const ConstVariantPtr,
    argument_count: Int,
    r_return: VariantPtr,
    r_error: *mut CallError,
);
pub type CallableIsValid = unsafe extern "C" fn(userdata: *mut c_void) -> Bool;
pub type CallableFree = unsafe extern "C" fn(userdata: *mut c_void);
pub type CallableHash = unsafe extern "C" fn(userdata: *mut c_void) -> u32;
pub type CallableCompare = unsafe extern "C" fn(a: *mut c_void, b: *mut c_void) -> Bool;
pub type CallableToString =
    unsafe extern "C" fn(userdata: *mut c_void, r_is_valid: *mut Bool, r_out: StringPtr);
pub type CallableArgumentCount = unsafe extern "C" fn(userdata: *mut c_void, r_is_valid: *mut Bool) -> Int;

pub type ScriptGetClassCategory =
    unsafe extern "C" fn(instance: ScriptInstanceDataPtr, r_class_category: *mut PropertyInfo) -> Bool;
pub type ScriptGetOwner = unsafe extern "C" fn(instance: ScriptInstanceDataPtr) -> ObjectPtr;
pub type ScriptPropertyStateAdd =
    unsafe extern "C" fn(name: ConstStringNamePtr, value: ConstVariantPtr, userdata: *mut c_void);
pub type ScriptGetPropertyState = unsafe extern "C" fn(
    instance: ScriptInstanceDataPtr,
    add_func: Option<ScriptPropertyStateAdd>,
    userdata: *mut c_void,
);
pub type ScriptGetMethodList =
    unsafe extern "C" fn(instance: ScriptInstanceDataPtr, r_count: *mut u32) -> *const MethodInfo;
pub type ScriptFreeMethodList =
    unsafe extern "C" fn(instance: ScriptInstanceDataPtr, list: *const MethodInfo, count: u32);
pub type ScriptGetPropertyType = unsafe extern "C" fn(
    instance: ScriptInstanceDataPtr,
    name: ConstStringNamePtr,
    r_is_valid: *mut Bool,
) -> RawVariantType;
pub type ScriptHasMethod = unsafe extern "C" fn(instance: ScriptInstanceDataPtr, name: ConstStringNamePtr) -> Bool;
pub type ScriptGetMethodArgumentCount =
    unsafe extern "C" fn(instance: ScriptInstanceDataPtr, name: ConstStringNamePtr, r_is_valid: *mut Bool) -> Int;
pub type ScriptCall = unsafe extern "C" fn(
    instance: ScriptInstanceDataPtr,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    argument_count: Int,
    r_return: VariantPtr,
    r_error: *mut CallError,
);
pub type ScriptRefCountIncremented = unsafe extern "C" fn(instance: ScriptInstanceDataPtr);
pub type ScriptRefCountDecremented = unsafe extern "C" fn(instance: ScriptInstanceDataPtr) -> Bool;
pub type ScriptIsPlaceholder = unsafe extern "C" fn(instance: ScriptInstanceDataPtr) -> Bool;
pub type ScriptFree = unsafe extern "C" fn(instance: ScriptInstanceDataPtr);

/// May run on any host worker thread
pub type WorkerThreadPoolTask = unsafe extern "C" fn(userdata: *mut c_void);
pub type WorkerThreadPoolGroupTask = unsafe extern "C" fn(userdata: *mut c_void, index: u32);

// ============================================================================
// Per-type and ptrcall function shapes returned by the host
// ============================================================================

pub type VariantFromTypeConstructor = unsafe extern "C" fn(r_variant: VariantPtr, native: TypePtr);
pub type TypeFromVariantConstructor = unsafe extern "C" fn(r_native: TypePtr, variant: VariantPtr);
pub type VariantGetInternalPtr = unsafe extern "C" fn(variant: VariantPtr) -> *mut c_void;
pub type PtrDestructor = unsafe extern "C" fn(base: TypePtr);
pub type PtrIndexedSetter = unsafe extern "C" fn(base: TypePtr, index: Int, value: ConstTypePtr);
pub type PtrIndexedGetter = unsafe extern "C" fn(base: ConstTypePtr, index: Int, r_value: TypePtr);
pub type PtrKeyedSetter = unsafe extern "C" fn(base: TypePtr, key: ConstTypePtr, value: ConstTypePtr);
pub type PtrKeyedGetter = unsafe extern "C" fn(base: ConstTypePtr, key: ConstTypePtr, r_value: TypePtr);
pub type PtrOperatorEvaluator =
    unsafe extern "C" fn(left: ConstTypePtr, right: ConstTypePtr, r_result: TypePtr);
pub type PtrBuiltInMethod =
    unsafe extern "C" fn(base: TypePtr, args: *const ConstTypePtr, r_return: TypePtr, argument_count: i32);
pub type PtrConstructor = unsafe extern "C" fn(base: TypePtr, args: *const ConstTypePtr);
pub type PtrUtilityFunction =
    unsafe extern "C" fn(r_return: TypePtr, args: *const ConstTypePtr, argument_count: i32);

/// Host entry for name-based function lookup
pub type GetProcAddress = unsafe extern "C" fn(name: *const c_char) -> Option<unsafe extern "C" fn()>;
