//! Ptrcalls - direct calls through typed pointers into a `CallFrame`
//!
//! Each helper looks the host function up once and then feeds it the frame's
//! decoded argument pointers and return slot. Frames wider than the configured
//! slot limit are refused before the host sees them.

use super::names::StableName;
use super::ops::VariantBridge;
use super::Variant;
use crate::error::{BridgeError, Result};
use crate::frame::CallFrame;
use crate::host::abi::*;
use crate::host_fn;
use crate::logging::log_dispatch;

impl<'a> VariantBridge<'a> {
    pub fn builtin_method(&self, ty: VariantType, method: &StableName, hash: i64) -> Result<PtrBuiltInMethod> {
        let get = host_fn!(self.api, variant_get_ptr_builtin_method)?;
        // SAFETY: the name is live for the duration of the lookup
        unsafe { get(ty.raw(), method.as_ptr(), hash) }
            .ok_or(BridgeError::Unsupported { ty, op: "builtin_method" })
    }

    /// Call a builtin method on the native value at `base`.
    ///
    /// # Safety
    /// `base` must hold a native value of the method's type, and the frame's
    /// slots must match the method's signature.
    pub unsafe fn call_builtin(&self, method: PtrBuiltInMethod, base: TypePtr, frame: &mut CallFrame) -> Result<()> {
        self.check_frame(frame)?;
        let (args, count) = frame.pointers();
        log_dispatch("ptr_builtin_method", count);
        method(base, args.as_ptr().cast(), frame.return_ptr(), count as i32);
        Ok(())
    }

    pub fn operator_evaluator(
        &self,
        op: Operator,
        left: VariantType,
        right: VariantType,
    ) -> Result<PtrOperatorEvaluator> {
        let get = host_fn!(self.api, variant_get_ptr_operator_evaluator)?;
        // SAFETY: plain integer arguments
        unsafe { get(op.raw(), left.raw(), right.raw()) }.ok_or(BridgeError::InvalidOperator { op })
    }

    /// Evaluate with the frame's first two slots as operands (one for unary
    /// operators) and its return slot as the result.
    ///
    /// # Safety
    /// The slots must hold natives of the types the evaluator was fetched for.
    pub unsafe fn evaluate_native(&self, evaluator: PtrOperatorEvaluator, frame: &mut CallFrame) -> Result<()> {
        if !(1..=2).contains(&frame.len()) {
            return Err(BridgeError::ShapeOverflow { slots: frame.len(), max: 2 });
        }
        let (args, _) = frame.pointers();
        // a unary operator sees the NULL terminator as its right operand
        evaluator(args[0], args[1], frame.return_ptr());
        Ok(())
    }

    pub fn constructor(&self, ty: VariantType, index: i32) -> Result<PtrConstructor> {
        let get = host_fn!(self.api, variant_get_ptr_constructor)?;
        // SAFETY: plain integer arguments
        unsafe { get(ty.raw(), index) }.ok_or(BridgeError::Unsupported { ty, op: "constructor" })
    }

    /// Construct into the frame's return slot from its arguments.
    ///
    /// # Safety
    /// The return slot and arguments must match the constructor's signature.
    pub unsafe fn construct(&self, constructor: PtrConstructor, frame: &mut CallFrame) -> Result<()> {
        self.check_frame(frame)?;
        let (args, _) = frame.pointers();
        constructor(frame.return_ptr(), args.as_ptr().cast());
        Ok(())
    }

    pub fn utility_function(&self, name: &StableName, hash: i64) -> Result<PtrUtilityFunction> {
        let get = host_fn!(self.api, variant_get_ptr_utility_function)?;
        // SAFETY: the name is live for the duration of the lookup
        unsafe { get(name.as_ptr(), hash) }.ok_or(BridgeError::Unsupported { ty: VariantType::Nil, op: "utility_function" })
    }

    /// # Safety
    /// The frame's slots must match the utility function's signature.
    pub unsafe fn call_utility(&self, function: PtrUtilityFunction, frame: &mut CallFrame) -> Result<()> {
        self.check_frame(frame)?;
        let (args, count) = frame.pointers();
        log_dispatch("ptr_utility_function", count);
        function(frame.return_ptr(), args.as_ptr().cast(), count as i32);
        Ok(())
    }

    pub fn method_bind(&self, class: &StableName, method: &StableName, hash: i64) -> Result<MethodBindPtr> {
        let get = host_fn!(self.api, classdb_get_method_bind)?;
        // SAFETY: both names are live for the duration of the lookup
        let bind = unsafe { get(class.as_ptr(), method.as_ptr(), hash) };
        if bind.is_null() {
            return Err(BridgeError::Unsupported { ty: VariantType::Object, op: "method_bind" });
        }
        Ok(bind)
    }

    /// # Safety
    /// `object` must be a live object of the bound class and the frame must
    /// match the method's signature.
    pub unsafe fn method_bind_ptrcall(&self, bind: MethodBindPtr, object: ObjectPtr, frame: &mut CallFrame) -> Result<()> {
        let ptrcall = host_fn!(self.api, object_method_bind_ptrcall)?;
        self.check_frame(frame)?;
        let (args, count) = frame.pointers();
        log_dispatch("object_method_bind_ptrcall", count);
        ptrcall(bind, object, args.as_ptr().cast(), frame.return_ptr());
        Ok(())
    }

    /// Boxed counterpart of [`VariantBridge::method_bind_ptrcall`].
    ///
    /// # Safety
    /// `object` must be a live object of the bound class.
    pub unsafe fn method_bind_call(&self, bind: MethodBindPtr, object: ObjectPtr, args: &[Variant]) -> Result<Variant> {
        let call = host_fn!(self.api, object_method_bind_call)?;
        log_dispatch("object_method_bind_call", args.len());
        let pointers = Self::argument_pointers(args);
        let mut ret = Variant::storage();
        let mut error = CallError::ok();
        call(bind, object, pointers.as_ptr(), args.len() as Int, ret.as_mut_ptr(), &mut error);
        self.finish_call("object_method_bind_call", ret, error)
    }
}
