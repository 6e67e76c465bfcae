//! Generation-checked handle table
//!
//! Userdata handed to the host is an integer, never a pointer into Rust
//! memory. A handle packs a slot index and the slot's generation, so a handle
//! that outlives its entry is rejected instead of aliasing a newer one.

use crate::error::{BridgeError, Result};
use core::ffi::c_void;
use core::num::NonZeroU64;
use parking_lot::RwLock;
use std::sync::Arc;

/// Low half of a pointer-sized word holds the slot index, high half the generation
const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u64 = (1 << (usize::BITS - INDEX_BITS)) - 1;

/// Entries a table can hold while every handle still fits in a pointer
pub const MAX_ENTRIES: usize = INDEX_MASK as usize;

/// Managed handle as host userdata; `None` when it does not fit a pointer
#[inline]
pub fn userdata(raw: u64) -> Option<*mut c_void> {
    usize::try_from(raw).ok().map(|addr| addr as *mut c_void)
}

/// `(generation << INDEX_BITS) | (index + 1)`; never zero, never wider than a pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU64);

impl Handle {
    fn new(index: u32, generation: u32) -> Self {
        let raw = ((generation as u64 & GENERATION_MASK) << INDEX_BITS) | (index as u64 + 1);
        // `index + 1` is at least one
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        if usize::try_from(raw).is_err() {
            return None;
        }
        NonZeroU64::new(raw).map(Self)
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0.get()
    }

    /// Handle carried in a host userdata pointer
    #[inline]
    pub fn from_ptr(ptr: *const c_void) -> Option<Self> {
        Self::from_raw(ptr as usize as u64)
    }

    /// Userdata pointer carrying this handle; never dereferenced
    #[inline]
    pub fn as_ptr(self) -> *mut c_void {
        self.to_raw() as usize as *mut c_void
    }

    /// `usize::MAX` for a raw value with no index bits, which no slot matches
    #[inline]
    fn index(self) -> usize {
        (self.0.get() & INDEX_MASK).wrapping_sub(1) as usize
    }

    #[inline]
    fn generation(self) -> u32 {
        ((self.0.get() >> INDEX_BITS) & GENERATION_MASK) as u32
    }
}

#[inline]
fn next_generation(generation: u32) -> u32 {
    ((generation as u64 + 1) & GENERATION_MASK).max(1) as u32
}

struct Entry<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

struct Slots<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

/// Arena of shared values addressed by `Handle`
pub struct HandleTable<T> {
    slots: RwLock<Slots<T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots { entries: Vec::new(), free: Vec::new(), len: 0 }),
        }
    }

    pub fn insert(&self, value: T) -> Result<Handle> {
        self.insert_within(value, MAX_ENTRIES)
    }

    fn insert_within(&self, value: T, limit: usize) -> Result<Handle> {
        let mut slots = self.slots.write();
        let value = Some(Arc::new(value));
        let handle = match slots.free.pop() {
            Some(index) => {
                let entry = &mut slots.entries[index as usize];
                entry.value = value;
                Handle::new(index, entry.generation)
            }
            None if slots.entries.len() >= limit => {
                return Err(BridgeError::HandlesExhausted { limit });
            }
            None => {
                let index = slots.entries.len() as u32;
                slots.entries.push(Entry { generation: 1, value });
                Handle::new(index, 1)
            }
        };
        slots.len += 1;
        Ok(handle)
    }

    pub fn get(&self, handle: Handle) -> Result<Arc<T>> {
        let slots = self.slots.read();
        slots
            .entries
            .get(handle.index())
            .filter(|entry| entry.generation == handle.generation())
            .and_then(|entry| entry.value.clone())
            .ok_or(BridgeError::StaleHandle(handle.to_raw()))
    }

    /// Look up a handle received as raw userdata
    pub fn get_raw(&self, raw: u64) -> Result<Arc<T>> {
        Handle::from_raw(raw)
            .ok_or(BridgeError::StaleHandle(raw))
            .and_then(|handle| self.get(handle))
    }

    #[inline]
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_ok()
    }

    /// Remove an entry; its handle and every copy of it become stale
    pub fn remove(&self, handle: Handle) -> Result<Arc<T>> {
        let mut slots = self.slots.write();
        let index = handle.index();
        let value = match slots.entries.get_mut(index) {
            Some(entry) if entry.generation == handle.generation() && entry.value.is_some() => {
                entry.generation = next_generation(entry.generation);
                entry.value.take()
            }
            _ => None,
        };
        let value = value.ok_or(BridgeError::StaleHandle(handle.to_raw()))?;
        slots.free.push(index as u32);
        slots.len -= 1;
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.slots.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of live handles
    pub fn handles(&self) -> Vec<Handle> {
        let slots = self.slots.read();
        slots
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.value.is_some())
            .map(|(index, entry)| Handle::new(index as u32, entry.generation))
            .collect()
    }
}
