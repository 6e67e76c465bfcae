//! Frame decoding
//!
//! Pure address arithmetic. Offsets are aligned relative to the argument base,
//! which callers keep 8-byte aligned.

use super::shape::{ExtendedShape, Shape, SizeClass};
use super::{NIBBLE_SLOTS, VARIANT_STRIDE};
use core::ffi::c_void;
use core::ptr;
use smallvec::SmallVec;

/// Pointer array sized for a full nibble shape plus the NULL terminator
pub type FramePointers = [*mut c_void; NIBBLE_SLOTS + 1];

/// Decoded frame pointers; inline up to a full nibble shape
pub type FrameArgs = SmallVec<[*mut c_void; NIBBLE_SLOTS + 1]>;

/// Placement of one argument inside the argument region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: usize,
    pub size: usize,
    pub align: usize,
}

impl Slot {
    #[inline]
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[inline]
pub const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Iterator turning size classes into slot placements
#[derive(Debug, Clone)]
pub struct SlotLayout<I> {
    classes: I,
    offset: usize,
}

impl<I> SlotLayout<I> {
    #[inline]
    pub fn new(classes: I) -> Self {
        Self { classes, offset: 0 }
    }

    /// Bytes consumed by the slots yielded so far
    #[inline]
    pub fn extent(&self) -> usize {
        self.offset
    }
}

impl<I: Iterator<Item = SizeClass>> Iterator for SlotLayout<I> {
    type Item = Slot;

    #[inline]
    fn next(&mut self) -> Option<Slot> {
        let class = self.classes.next()?;
        if class.is_end() {
            return None;
        }
        let offset = align_up(self.offset, class.align());
        self.offset = offset + class.size();
        Some(Slot { offset, size: class.size(), align: class.align() })
    }
}

/// Slot placements for a nibble shape's arguments
#[inline]
pub fn layout(shape: Shape) -> SlotLayout<impl Iterator<Item = SizeClass>> {
    SlotLayout::new(shape.args())
}

fn decode_classes(
    classes: impl Iterator<Item = SizeClass>,
    base: *mut u8,
    out: &mut [*mut c_void],
) -> usize {
    let mut count = 0;
    for slot in SlotLayout::new(classes) {
        if count == out.len() {
            debug_assert!(false, "pointer array too small for shape");
            return count;
        }
        out[count] = base.wrapping_add(slot.offset).cast();
        count += 1;
    }
    if let Some(terminator) = out.get_mut(count) {
        *terminator = ptr::null_mut();
    }
    count
}

/// Fill `out` with one pointer per argument of `shape`, relative to `base`.
///
/// Returns the number of arguments. The entry after the last argument is set
/// to NULL when `out` has room for it. `base` is never dereferenced.
#[inline]
pub fn decode(shape: Shape, base: *mut u8, out: &mut [*mut c_void]) -> usize {
    decode_classes(shape.args(), base, out)
}

/// Byte-form counterpart of [`decode`]
#[inline]
pub fn decode_extended(shape: &ExtendedShape<'_>, base: *mut u8, out: &mut [*mut c_void]) -> usize {
    decode_classes(shape.args(), base, out)
}

/// Pointers to `count` consecutive 24-byte variants starting at `base`
#[inline]
pub fn decode_variants(base: *mut u8, count: usize, out: &mut [*mut c_void]) -> usize {
    debug_assert!(count <= out.len(), "pointer array too small for variant list");
    let count = count.min(out.len());
    for (i, slot) in out.iter_mut().take(count).enumerate() {
        *slot = base.wrapping_add(i * VARIANT_STRIDE).cast();
    }
    count
}

/// Read a native value out of a decoded slot.
///
/// # Safety
/// `slot` must point to at least `size_of::<T>()` initialized bytes holding a `T`.
#[inline]
pub unsafe fn read_slot<T: Copy>(slot: *const c_void) -> T {
    slot.cast::<T>().read_unaligned()
}

/// Write a native value into a decoded slot.
///
/// # Safety
/// `slot` must be valid for `size_of::<T>()` bytes of writes.
#[inline]
pub unsafe fn write_slot<T: Copy>(slot: *mut c_void, value: T) {
    slot.cast::<T>().write_unaligned(value)
}
