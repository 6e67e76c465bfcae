//! Per-variant-type operation table
//!
//! Filled once from the host while the bridge loads, read-only afterwards.
//! A missing entry means the host does not support that operation for that
//! type; accessors turn it into `BridgeError::Unsupported`.

use crate::error::{BridgeError, Result};
use crate::host::abi::*;
use crate::host::HostApi;

/// Everything the host offers for one variant type
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeOps {
    pub from_native: Option<VariantFromTypeConstructor>,
    pub to_native: Option<TypeFromVariantConstructor>,
    pub destructor: Option<PtrDestructor>,
    pub internal_ptr: Option<VariantGetInternalPtr>,
    pub indexed_get: Option<PtrIndexedGetter>,
    pub indexed_set: Option<PtrIndexedSetter>,
    pub keyed_get: Option<PtrKeyedGetter>,
    pub keyed_set: Option<PtrKeyedSetter>,
}

impl TypeOps {
    /// Ask the host for every per-type entry of `ty`
    fn load(api: &HostApi, ty: VariantType) -> Self {
        let raw = ty.raw();
        // SAFETY: the getters only read `raw`, which is a valid type id
        unsafe {
            Self {
                from_native: (api.get_variant_from_type_constructor)(raw),
                to_native: (api.get_variant_to_type_constructor)(raw),
                destructor: (api.variant_get_ptr_destructor)(raw),
                internal_ptr: api.variant_get_ptr_internal_getter.and_then(|get| get(raw)),
                indexed_get: api.variant_get_ptr_indexed_getter.and_then(|get| get(raw)),
                indexed_set: api.variant_get_ptr_indexed_setter.and_then(|get| get(raw)),
                keyed_get: api.variant_get_ptr_keyed_getter.and_then(|get| get(raw)),
                keyed_set: api.variant_get_ptr_keyed_setter.and_then(|get| get(raw)),
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.from_native.is_none()
            && self.to_native.is_none()
            && self.destructor.is_none()
            && self.internal_ptr.is_none()
            && self.indexed_get.is_none()
            && self.indexed_set.is_none()
            && self.keyed_get.is_none()
            && self.keyed_set.is_none()
    }
}

pub struct TypeTable {
    rows: [TypeOps; VariantType::MAX as usize],
}

macro_rules! accessors {
    ($( $field:ident : $ty:ty ),* $(,)?) => {
        $(
            #[inline]
            pub fn $field(&self, ty: VariantType) -> Result<$ty> {
                self.rows[ty as usize]
                    .$field
                    .ok_or(BridgeError::Unsupported { ty, op: stringify!($field) })
            }
        )*
    };
}

impl TypeTable {
    /// Table with no supported operations
    pub fn empty() -> Self {
        Self { rows: [TypeOps::default(); VariantType::MAX as usize] }
    }

    /// Populate every row from 1 up to the last type id; nil has no row
    pub fn load(api: &HostApi) -> Self {
        let _timer = crate::logging::perf::track("type_table_load");
        let mut table = Self::empty();
        for &ty in &VariantType::ALL[1..] {
            table.rows[ty as usize] = TypeOps::load(api, ty);
        }
        tracing::debug!(
            target: "host",
            event = "type_table",
            populated = table.populated(),
            "type table loaded"
        );
        table
    }

    #[inline]
    pub fn ops(&self, ty: VariantType) -> &TypeOps {
        &self.rows[ty as usize]
    }

    /// Types with at least one host entry
    pub fn populated(&self) -> usize {
        self.rows.iter().filter(|row| !row.is_empty()).count()
    }

    /// Types that can go to a variant and back
    pub fn convertible(&self) -> impl Iterator<Item = VariantType> + '_ {
        VariantType::ALL
            .iter()
            .copied()
            .filter(|&ty| self.ops(ty).from_native.is_some() && self.ops(ty).to_native.is_some())
    }

    accessors! {
        from_native: VariantFromTypeConstructor,
        to_native: TypeFromVariantConstructor,
        destructor: PtrDestructor,
        internal_ptr: VariantGetInternalPtr,
        indexed_get: PtrIndexedGetter,
        indexed_set: PtrIndexedSetter,
        keyed_get: PtrKeyedGetter,
        keyed_set: PtrKeyedSetter,
    }
}
