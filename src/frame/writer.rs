//! Managed-side frame packing, the inverse of `decode`

use super::codec::{align_up, decode_extended, FrameArgs, SlotLayout};
use super::shape::{ExtendedShape, Shape, SizeClass};
use super::{MAX_EXTENDED_SLOTS, NIBBLE_SLOTS, WORD_ALIGN};
use crate::error::{BridgeError, Result};
use core::ffi::c_void;
use core::{mem, ptr};
use smallvec::{smallvec, SmallVec};

/// Flat call buffer: an 8-byte aligned return region followed by the arguments.
///
/// Slot numbers in errors follow the shape numbering (0 is the return slot,
/// arguments start at 1). Pointers handed out stay valid until the next
/// `push`. A frame holds at most [`NIBBLE_SLOTS`] arguments unless built with
/// a wider [`CallFrame::limited`] bound, in which case only the byte form
/// describes it.
#[derive(Debug, Clone)]
pub struct CallFrame {
    classes: SmallVec<[u8; NIBBLE_SLOTS + 1]>,
    limit: usize,
    words: SmallVec<[u64; 24]>,
    ret_bytes: usize,
    cursor: usize,
}

impl CallFrame {
    pub fn new(ret: SizeClass) -> Self {
        let ret_bytes = align_up(ret.size(), WORD_ALIGN);
        let mut words = SmallVec::new();
        words.resize(ret_bytes / WORD_ALIGN, 0);
        let mut classes = SmallVec::new();
        classes.push(ret.index());
        Self { classes, limit: NIBBLE_SLOTS, words, ret_bytes, cursor: 0 }
    }

    /// Frame whose return slot holds a `T`
    pub fn returning<T>() -> Result<Self> {
        Ok(Self::new(SizeClass::of::<T>()?))
    }

    /// Frame with no return value
    #[inline]
    pub fn void() -> Self {
        Self::new(SizeClass::END)
    }

    /// Allow up to `max_slots` arguments, capped at [`MAX_EXTENDED_SLOTS`]
    pub fn limited(mut self, max_slots: usize) -> Self {
        self.limit = max_slots.min(MAX_EXTENDED_SLOTS);
        self
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn return_class(&self) -> SizeClass {
        SizeClass::from_index(self.classes[0]).unwrap_or(SizeClass::END)
    }

    /// Nibble form, `None` past [`NIBBLE_SLOTS`] arguments
    pub fn shape(&self) -> Option<Shape> {
        if self.len() > NIBBLE_SLOTS {
            return None;
        }
        Shape::new(self.return_class(), &self.arg_classes().collect::<SmallVec<[_; NIBBLE_SLOTS]>>()).ok()
    }

    /// Byte form; always available
    pub fn extended(&self) -> ExtendedShape<'_> {
        ExtendedShape::from_frame(&self.classes)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.classes.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn arg_classes(&self) -> impl Iterator<Item = SizeClass> + '_ {
        self.classes[1..].iter().filter_map(|&index| SizeClass::from_index(index))
    }

    /// Append a native value; its size must be exactly one of the size classes
    pub fn push<T: Copy>(&mut self, value: T) -> Result<&mut Self> {
        let class = SizeClass::of::<T>()?;
        let slot = self.reserve(class)?;
        // SAFETY: `reserve` grew the buffer to cover `size_of::<T>()` bytes at `slot`
        unsafe { slot.cast::<T>().write_unaligned(value) };
        Ok(self)
    }

    /// Append raw bytes as one argument
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let class = SizeClass::from_size(bytes.len())?;
        let slot = self.reserve(class)?;
        // SAFETY: as in `push`
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), slot, bytes.len()) };
        Ok(self)
    }

    fn reserve(&mut self, class: SizeClass) -> Result<*mut u8> {
        if class.is_end() {
            return Err(BridgeError::UnsupportedSize { size: 0 });
        }
        let len = self.len();
        if len >= self.limit {
            return Err(BridgeError::ShapeOverflow { slots: len + 1, max: self.limit });
        }
        self.classes.push(class.index());
        let offset = align_up(self.cursor, class.align());
        self.cursor = offset + class.size();
        let total = self.ret_bytes + align_up(self.cursor, WORD_ALIGN);
        self.words.resize(total / WORD_ALIGN, 0);
        Ok(self.args_base().wrapping_add(offset))
    }

    /// Return slot, NULL when the frame returns nothing
    #[inline]
    pub fn return_ptr(&mut self) -> *mut c_void {
        if self.return_class().is_end() {
            ptr::null_mut()
        } else {
            self.words.as_mut_ptr().cast()
        }
    }

    /// Start of the argument region
    #[inline]
    pub fn args_base(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast::<u8>().wrapping_add(self.ret_bytes)
    }

    /// Decoded argument pointers, NULL-terminated, and their count
    pub fn pointers(&mut self) -> (FrameArgs, usize) {
        let base = self.args_base();
        let mut out: FrameArgs = smallvec![ptr::null_mut(); self.len() + 1];
        let count = decode_extended(&self.extended(), base, &mut out);
        (out, count)
    }

    /// Offset of argument `index` from the argument base
    pub fn offset_of(&self, index: usize) -> Option<usize> {
        SlotLayout::new(self.arg_classes()).nth(index).map(|slot| slot.offset)
    }

    pub fn read_return<T: Copy>(&self) -> Result<T> {
        let expected = self.return_class().size();
        if mem::size_of::<T>() != expected {
            return Err(BridgeError::SlotSizeMismatch { slot: 0, expected, got: mem::size_of::<T>() });
        }
        // SAFETY: the return region is at least `expected` bytes and zero-initialized
        Ok(unsafe { self.words.as_ptr().cast::<T>().read_unaligned() })
    }

    pub fn arg<T: Copy>(&self, index: usize) -> Result<T> {
        let slot = SlotLayout::new(self.arg_classes())
            .nth(index)
            .ok_or(BridgeError::SlotSizeMismatch { slot: index + 1, expected: 0, got: mem::size_of::<T>() })?;
        if slot.size != mem::size_of::<T>() {
            return Err(BridgeError::SlotSizeMismatch {
                slot: index + 1,
                expected: slot.size,
                got: mem::size_of::<T>(),
            });
        }
        // SAFETY: slot lies inside the buffer, which is fully initialized
        Ok(unsafe {
            self.words
                .as_ptr()
                .cast::<u8>()
                .add(self.ret_bytes + slot.offset)
                .cast::<T>()
                .read_unaligned()
        })
    }
}
