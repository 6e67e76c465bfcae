//! Boxed variant operations

use super::names::StableName;
use super::Variant;
use crate::error::{BridgeError, HostCallError, Result};
use crate::frame::{decode_variants, CallFrame, SizeClass, NIBBLE_SLOTS};
use crate::host::abi::*;
use crate::host::HostApi;
use crate::host_fn;
use crate::logging::{log_dispatch, log_host_call_error};
use crate::type_table::TypeTable;
use core::ffi::c_void;
use core::mem;
use smallvec::SmallVec;

/// Validity and bounds flags reported by indexed access, kept separate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexFlags {
    pub valid: bool,
    pub out_of_bounds: bool,
}

impl IndexFlags {
    fn into_result(self, index: i64) -> Result<()> {
        match (self.valid, self.out_of_bounds) {
            (true, _) => Ok(()),
            (false, true) => Err(BridgeError::IndexOutOfBounds { index }),
            (false, false) => Err(BridgeError::InvalidIndex { index }),
        }
    }
}

/// Variant operations over an injected host table and type table
#[derive(Clone, Copy)]
pub struct VariantBridge<'a> {
    pub(super) api: &'a HostApi,
    pub(super) types: &'a TypeTable,
    recursion_limit: u32,
    frame_slots: usize,
}

impl<'a> VariantBridge<'a> {
    pub fn new(api: &'a HostApi, types: &'a TypeTable) -> Self {
        Self { api, types, recursion_limit: 100, frame_slots: NIBBLE_SLOTS }
    }

    /// Argument limit for frames built by and passed to the ptrcall helpers
    pub fn with_frame_slots(mut self, slots: usize) -> Self {
        self.frame_slots = slots;
        self
    }

    #[inline]
    pub fn frame_slots(&self) -> usize {
        self.frame_slots
    }

    /// Empty frame bounded by the configured slot limit
    pub fn frame(&self, ret: SizeClass) -> CallFrame {
        CallFrame::new(ret).limited(self.frame_slots)
    }

    pub fn frame_returning<T>(&self) -> Result<CallFrame> {
        Ok(self.frame(SizeClass::of::<T>()?))
    }

    pub(super) fn check_frame(&self, frame: &CallFrame) -> Result<()> {
        if frame.len() > self.frame_slots {
            return Err(BridgeError::ShapeOverflow { slots: frame.len(), max: self.frame_slots });
        }
        Ok(())
    }

    /// Default depth for [`VariantBridge::recursive_hash`]
    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    #[inline]
    pub fn api(&self) -> &'a HostApi {
        self.api
    }

    #[inline]
    pub fn types(&self) -> &'a TypeTable {
        self.types
    }

    // ------------------------------------------------------------------------
    // Construction and destruction
    // ------------------------------------------------------------------------

    pub fn nil(&self) -> Variant {
        let mut out = Variant::storage();
        // SAFETY: `out` is writable variant storage
        unsafe { (self.api.variant_new_nil)(out.as_mut_ptr()) };
        out
    }

    pub fn copy(&self, value: &Variant) -> Variant {
        let mut out = Variant::storage();
        // SAFETY: `value` is live, `out` is writable storage
        unsafe { (self.api.variant_new_copy)(out.as_mut_ptr(), value.as_ptr()) };
        out
    }

    /// Release a variant. Consuming it makes a second destroy impossible.
    pub fn destroy(&self, mut value: Variant) {
        // SAFETY: `value` is live and owned
        unsafe { (self.api.variant_destroy)(value.as_mut_ptr()) };
    }

    pub fn duplicate(&self, value: &Variant, deep: bool) -> Variant {
        let mut out = Variant::storage();
        // SAFETY: as in `copy`
        unsafe { (self.api.variant_duplicate)(value.as_ptr(), out.as_mut_ptr(), deep as Bool) };
        out
    }

    pub fn get_type(&self, value: &Variant) -> Result<VariantType> {
        // SAFETY: `value` is live
        let raw = unsafe { (self.api.variant_get_type)(value.as_ptr()) };
        VariantType::from_raw(raw).ok_or(BridgeError::UnknownType(raw))
    }

    // ------------------------------------------------------------------------
    // Native conversion
    // ------------------------------------------------------------------------

    fn check_native_size<T>(ty: VariantType) -> Result<()> {
        let expected = ty.native_size();
        if mem::size_of::<T>() != expected {
            return Err(BridgeError::SlotSizeMismatch { slot: 1, expected, got: mem::size_of::<T>() });
        }
        Ok(())
    }

    /// Box a native value of type `ty`
    pub fn from_native<T: Copy>(&self, ty: VariantType, value: T) -> Result<Variant> {
        Self::check_native_size::<T>(ty)?;
        let mut frame = CallFrame::void();
        frame.push(value)?;
        let (slots, _) = frame.pointers();
        // SAFETY: slot 0 holds a `T` of the type's native size
        unsafe { self.from_native_ptr(ty, slots[0]) }
    }

    /// Box the native value at `native`.
    ///
    /// # Safety
    /// `native` must point to a valid native value of type `ty`.
    pub unsafe fn from_native_ptr(&self, ty: VariantType, native: ConstTypePtr) -> Result<Variant> {
        let construct = self.types.from_native(ty)?;
        let mut out = Variant::storage();
        construct(out.as_mut_ptr(), native.cast_mut());
        Ok(out)
    }

    /// Unbox a variant into a native value of type `ty`
    pub fn to_native<T: Copy>(&self, ty: VariantType, value: &Variant) -> Result<T> {
        Self::check_native_size::<T>(ty)?;
        let mut frame = CallFrame::returning::<T>()?;
        // SAFETY: the return slot is sized for `T`
        unsafe { self.to_native_ptr(ty, value, frame.return_ptr())? };
        frame.read_return::<T>()
    }

    /// Unbox into caller storage.
    ///
    /// # Safety
    /// `out` must be writable storage for a native value of type `ty`.
    pub unsafe fn to_native_ptr(&self, ty: VariantType, value: &Variant, out: TypePtr) -> Result<()> {
        let convert = self.types.to_native(ty)?;
        convert(out, value.as_ptr().cast_mut());
        Ok(())
    }

    /// Run the type's destructor on a native value; plain data has none.
    ///
    /// # Safety
    /// `native` must hold a live native value of type `ty`.
    pub unsafe fn destroy_native(&self, ty: VariantType, native: TypePtr) {
        if let Some(destroy) = self.types.ops(ty).destructor {
            destroy(native);
        }
    }

    /// Pointer to the payload inside the variant
    pub fn internal_ptr(&self, ty: VariantType, value: &mut Variant) -> Result<*mut c_void> {
        let get = self.types.internal_ptr(ty)?;
        // SAFETY: `value` is live
        Ok(unsafe { get(value.as_mut_ptr()) })
    }

    // ------------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------------

    /// Intern `text` as a host `StringName`
    pub fn string_name(&self, text: &str) -> Result<StableName> {
        let mut native = Box::new(0u64);
        // SAFETY: `native` is writable pointer-sized storage, `text` is valid UTF-8
        unsafe {
            (self.api.string_name_new_with_utf8_chars_and_len)(
                (&mut *native as *mut u64).cast(),
                text.as_ptr().cast(),
                text.len() as Int,
            )
        };
        Ok(StableName::new(
            native,
            VariantType::StringName,
            self.types.ops(VariantType::StringName).destructor,
            text,
        ))
    }

    /// Build a host `String` from UTF-8
    pub fn string(&self, text: &str) -> Result<StableName> {
        let new_string = host_fn!(self.api, string_new_with_utf8_chars_and_len)?;
        let mut native = Box::new(0u64);
        // SAFETY: as in `string_name`
        unsafe { new_string((&mut *native as *mut u64).cast(), text.as_ptr().cast(), text.len() as Int) };
        Ok(StableName::new(native, VariantType::String, self.types.ops(VariantType::String).destructor, text))
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    pub(super) fn argument_pointers(args: &[Variant]) -> SmallVec<[ConstVariantPtr; 8]> {
        let mut slots: SmallVec<[*mut c_void; 8]> = SmallVec::from_elem(core::ptr::null_mut(), args.len());
        decode_variants(args.as_ptr().cast_mut().cast(), args.len(), &mut slots);
        slots.into_iter().map(|p| p as ConstVariantPtr).collect()
    }

    pub(super) fn finish_call(&self, operation: &'static str, ret: Variant, error: CallError) -> Result<Variant> {
        match HostCallError::check(error) {
            Ok(()) => Ok(ret),
            Err(err) => {
                log_host_call_error(operation, error.error, error.argument, error.expected);
                self.destroy(ret);
                Err(err.into())
            }
        }
    }

    /// Call a method by name on `target`; arguments are passed as 24-byte slots
    pub fn call(&self, target: &mut Variant, method: &StableName, args: &[Variant]) -> Result<Variant> {
        log_dispatch("variant_call", args.len());
        let pointers = Self::argument_pointers(args);
        let mut ret = Variant::storage();
        let mut error = CallError::ok();
        // SAFETY: every pointer addresses a live variant in `args`
        unsafe {
            (self.api.variant_call)(
                target.as_mut_ptr(),
                method.as_ptr(),
                pointers.as_ptr(),
                args.len() as Int,
                ret.as_mut_ptr(),
                &mut error,
            )
        };
        self.finish_call("variant_call", ret, error)
    }

    /// Call a static method of a builtin type
    pub fn call_static(&self, ty: VariantType, method: &StableName, args: &[Variant]) -> Result<Variant> {
        let call_static = host_fn!(self.api, variant_call_static)?;
        log_dispatch("variant_call_static", args.len());
        let pointers = Self::argument_pointers(args);
        let mut ret = Variant::storage();
        let mut error = CallError::ok();
        // SAFETY: as in `call`
        unsafe {
            call_static(ty.raw(), method.as_ptr(), pointers.as_ptr(), args.len() as Int, ret.as_mut_ptr(), &mut error)
        };
        self.finish_call("variant_call_static", ret, error)
    }

    pub fn has_method(&self, value: &Variant, method: &StableName) -> Result<bool> {
        let has_method = host_fn!(self.api, variant_has_method)?;
        // SAFETY: both pointers are live
        Ok(unsafe { has_method(value.as_ptr(), method.as_ptr()) } != 0)
    }

    // ------------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------------

    /// Evaluate `left op right`
    pub fn evaluate(&self, op: Operator, left: &Variant, right: &Variant) -> Result<Variant> {
        let mut ret = Variant::storage();
        let mut valid: Bool = 0;
        // SAFETY: operands are live, `ret` is writable storage
        unsafe { (self.api.variant_evaluate)(op.raw(), left.as_ptr(), right.as_ptr(), ret.as_mut_ptr(), &mut valid) };
        if valid == 0 {
            self.destroy(ret);
            return Err(BridgeError::InvalidOperator { op });
        }
        Ok(ret)
    }

    pub fn booleanize(&self, value: &Variant) -> bool {
        // SAFETY: `value` is live
        unsafe { (self.api.variant_booleanize)(value.as_ptr()) != 0 }
    }

    pub fn can_convert(&self, from: VariantType, to: VariantType, strict: bool) -> Result<bool> {
        let check = if strict {
            host_fn!(self.api, variant_can_convert_strict)?
        } else {
            host_fn!(self.api, variant_can_convert)?
        };
        // SAFETY: plain integer arguments
        Ok(unsafe { check(from.raw(), to.raw()) } != 0)
    }

    // ------------------------------------------------------------------------
    // Indexed access
    // ------------------------------------------------------------------------

    /// Indexed read returning both host flags untouched
    pub fn try_get_indexed(&self, value: &Variant, index: i64) -> (Variant, IndexFlags) {
        let mut ret = Variant::storage();
        let (mut valid, mut oob): (Bool, Bool) = (0, 0);
        // SAFETY: `value` is live, `ret` is writable storage
        unsafe { (self.api.variant_get_indexed)(value.as_ptr(), index, ret.as_mut_ptr(), &mut valid, &mut oob) };
        (ret, IndexFlags { valid: valid != 0, out_of_bounds: oob != 0 })
    }

    pub fn get_indexed(&self, value: &Variant, index: i64) -> Result<Variant> {
        let (ret, flags) = self.try_get_indexed(value, index);
        match flags.into_result(index) {
            Ok(()) => Ok(ret),
            Err(err) => {
                self.destroy(ret);
                Err(err)
            }
        }
    }

    /// Indexed write returning both host flags untouched
    pub fn try_set_indexed(&self, target: &mut Variant, index: i64, value: &Variant) -> IndexFlags {
        let (mut valid, mut oob): (Bool, Bool) = (0, 0);
        // SAFETY: both variants are live
        unsafe { (self.api.variant_set_indexed)(target.as_mut_ptr(), index, value.as_ptr(), &mut valid, &mut oob) };
        IndexFlags { valid: valid != 0, out_of_bounds: oob != 0 }
    }

    pub fn set_indexed(&self, target: &mut Variant, index: i64, value: &Variant) -> Result<()> {
        self.try_set_indexed(target, index, value).into_result(index)
    }

    // ------------------------------------------------------------------------
    // Keyed and named access
    // ------------------------------------------------------------------------

    pub fn get_keyed(&self, value: &Variant, key: &Variant) -> Result<Variant> {
        let mut ret = Variant::storage();
        let mut valid: Bool = 0;
        // SAFETY: inputs are live, `ret` is writable storage
        unsafe { (self.api.variant_get_keyed)(value.as_ptr(), key.as_ptr(), ret.as_mut_ptr(), &mut valid) };
        if valid == 0 {
            self.destroy(ret);
            return Err(BridgeError::InvalidKey);
        }
        Ok(ret)
    }

    pub fn set_keyed(&self, target: &mut Variant, key: &Variant, value: &Variant) -> Result<()> {
        let mut valid: Bool = 0;
        // SAFETY: all variants are live
        unsafe { (self.api.variant_set_keyed)(target.as_mut_ptr(), key.as_ptr(), value.as_ptr(), &mut valid) };
        if valid == 0 {
            return Err(BridgeError::InvalidKey);
        }
        Ok(())
    }

    pub fn has_key(&self, value: &Variant, key: &Variant) -> Result<bool> {
        let mut valid: Bool = 0;
        // SAFETY: both variants are live
        let found = unsafe { (self.api.variant_has_key)(value.as_ptr(), key.as_ptr(), &mut valid) };
        if valid == 0 {
            return Err(BridgeError::InvalidKey);
        }
        Ok(found != 0)
    }

    pub fn get_named(&self, value: &Variant, name: &StableName) -> Result<Variant> {
        let get_named = host_fn!(self.api, variant_get_named)?;
        let mut ret = Variant::storage();
        let mut valid: Bool = 0;
        // SAFETY: as in `get_keyed`
        unsafe { get_named(value.as_ptr(), name.as_ptr(), ret.as_mut_ptr(), &mut valid) };
        if valid == 0 {
            self.destroy(ret);
            return Err(BridgeError::InvalidKey);
        }
        Ok(ret)
    }

    pub fn set_named(&self, target: &mut Variant, name: &StableName, value: &Variant) -> Result<()> {
        let set_named = host_fn!(self.api, variant_set_named)?;
        let mut valid: Bool = 0;
        // SAFETY: as in `set_keyed`
        unsafe { set_named(target.as_mut_ptr(), name.as_ptr(), value.as_ptr(), &mut valid) };
        if valid == 0 {
            return Err(BridgeError::InvalidKey);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Hashing and text
    // ------------------------------------------------------------------------

    pub fn hash(&self, value: &Variant) -> i64 {
        // SAFETY: `value` is live
        unsafe { (self.api.variant_hash)(value.as_ptr()) }
    }

    /// Hash that follows nested containers down to `depth` levels
    /// (the configured limit when `None`)
    pub fn recursive_hash(&self, value: &Variant, depth: Option<u32>) -> i64 {
        let depth = depth.unwrap_or(self.recursion_limit);
        // SAFETY: `value` is live
        unsafe { (self.api.variant_recursive_hash)(value.as_ptr(), depth as Int) }
    }

    pub fn hash_compare(&self, left: &Variant, right: &Variant) -> Result<bool> {
        let compare = host_fn!(self.api, variant_hash_compare)?;
        // SAFETY: both variants are live
        Ok(unsafe { compare(left.as_ptr(), right.as_ptr()) } != 0)
    }

    /// Text form of `value`, as a `String` variant
    pub fn stringify(&self, value: &Variant) -> Result<Variant> {
        let stringify = host_fn!(self.api, variant_stringify)?;
        let mut native = [0u64; 1];
        let native_ptr: TypePtr = native.as_mut_ptr().cast();
        // SAFETY: `native` is storage for one host String, which is destroyed below
        unsafe {
            stringify(value.as_ptr(), native_ptr);
            let boxed = self.from_native_ptr(VariantType::String, native_ptr);
            self.destroy_native(VariantType::String, native_ptr);
            boxed
        }
    }
}
