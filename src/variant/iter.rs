//! Iteration protocol
//!
//! The iterator state is itself a variant. It is only valid for the container
//! it was initialized from, and only while that container is not mutated: the
//! host does not define what happens when iteration resumes after a mutation,
//! and neither does this module. To restart, drop the state and call
//! `iter_init` again.

use super::ops::VariantBridge;
use super::Variant;
use crate::error::{BridgeError, Result};
use crate::host::abi::Bool;

impl<'a> VariantBridge<'a> {
    /// Start iterating `container`. `Ok(None)` means it is iterable but empty.
    pub fn iter_init(&self, container: &Variant) -> Result<Option<Variant>> {
        let mut iter = Variant::storage();
        let mut valid: Bool = 0;
        // SAFETY: `container` is live, `iter` is writable storage
        let more = unsafe { (self.api.variant_iter_init)(container.as_ptr(), iter.as_mut_ptr(), &mut valid) };
        if valid == 0 {
            self.destroy(iter);
            return Err(BridgeError::NotIterable);
        }
        if more == 0 {
            self.destroy(iter);
            return Ok(None);
        }
        Ok(Some(iter))
    }

    /// Advance `iter`; `Ok(false)` once the container is exhausted
    pub fn iter_next(&self, container: &Variant, iter: &mut Variant) -> Result<bool> {
        let mut valid: Bool = 0;
        // SAFETY: both variants are live
        let more = unsafe { (self.api.variant_iter_next)(container.as_ptr(), iter.as_mut_ptr(), &mut valid) };
        if valid == 0 {
            return Err(BridgeError::IterationFailed);
        }
        Ok(more != 0)
    }

    /// Current element
    pub fn iter_get(&self, container: &Variant, iter: &mut Variant) -> Result<Variant> {
        let mut ret = Variant::storage();
        let mut valid: Bool = 0;
        // SAFETY: both variants are live, `ret` is writable storage
        unsafe { (self.api.variant_iter_get)(container.as_ptr(), iter.as_mut_ptr(), ret.as_mut_ptr(), &mut valid) };
        if valid == 0 {
            self.destroy(ret);
            return Err(BridgeError::IterationFailed);
        }
        Ok(ret)
    }

    /// Iterate `container` with a Rust iterator; elements are owned copies
    pub fn iter<'c>(&self, container: &'c Variant) -> Result<VariantIter<'a, 'c>> {
        let state = self.iter_init(container)?;
        Ok(VariantIter { bridge: *self, container, state, started: false })
    }
}

/// Single pass over a container. The borrow of the container keeps it from
/// being mutated through safe code while the iterator lives.
pub struct VariantIter<'a, 'c> {
    bridge: VariantBridge<'a>,
    container: &'c Variant,
    state: Option<Variant>,
    started: bool,
}

impl<'a, 'c> VariantIter<'a, 'c> {
    fn finish(&mut self) {
        if let Some(state) = self.state.take() {
            self.bridge.destroy(state);
        }
    }
}

impl<'a, 'c> Iterator for VariantIter<'a, 'c> {
    type Item = Result<Variant>;

    fn next(&mut self) -> Option<Self::Item> {
        let state = self.state.as_mut()?;
        if self.started {
            match self.bridge.iter_next(self.container, state) {
                Ok(true) => {}
                Ok(false) => {
                    self.finish();
                    return None;
                }
                Err(err) => {
                    self.finish();
                    return Some(Err(err));
                }
            }
        }
        self.started = true;
        let item = self.bridge.iter_get(self.container, state);
        if item.is_err() {
            self.finish();
        }
        Some(item)
    }
}

impl Drop for VariantIter<'_, '_> {
    fn drop(&mut self) {
        self.finish();
    }
}
