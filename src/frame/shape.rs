//! Shape descriptors

use super::{NIBBLE_SLOTS, WORD_ALIGN};
use crate::error::{BridgeError, Result};

/// Byte sizes selectable by a shape nibble, in wire order
pub const SIZE_CLASSES: [usize; 16] = [0, 1, 2, 4, 8, 12, 16, 24, 32, 36, 40, 48, 64, 72, 96, 128];

/// Index into [`SIZE_CLASSES`]; class 0 ends an argument list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SizeClass(u8);

impl SizeClass {
    pub const END: SizeClass = SizeClass(0);

    #[inline]
    pub const fn from_index(index: u8) -> Option<Self> {
        if (index as usize) < SIZE_CLASSES.len() {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Class holding exactly `bytes`
    pub fn from_size(bytes: usize) -> Result<Self> {
        SIZE_CLASSES
            .iter()
            .position(|&size| size == bytes)
            .map(|index| Self(index as u8))
            .ok_or(BridgeError::UnsupportedSize { size: bytes })
    }

    /// Class for a native type, by its size
    #[inline]
    pub fn of<T>() -> Result<Self> {
        Self::from_size(core::mem::size_of::<T>())
    }

    #[inline]
    pub const fn index(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn size(self) -> usize {
        SIZE_CLASSES[self.0 as usize]
    }

    /// `min(size, 8)`; the end marker aligns to 1
    #[inline]
    pub const fn align(self) -> usize {
        let size = self.size();
        if size == 0 {
            1
        } else if size < WORD_ALIGN {
            size
        } else {
            WORD_ALIGN
        }
    }

    #[inline]
    pub const fn is_end(self) -> bool {
        self.0 == 0
    }
}

/// Nibble-packed shape.
///
/// Nibble 0 is the return slot's class; nibbles 1..=15 are argument classes in
/// call order. The first zero argument nibble ends the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Shape(u64);

impl Shape {
    pub const EMPTY: Shape = Shape(0);

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Build a shape from a return class and argument classes
    pub fn new(ret: SizeClass, args: &[SizeClass]) -> Result<Self> {
        args.iter().try_fold(Self::EMPTY.with_return(ret), |shape, &class| shape.push(class))
    }

    /// Build a shape from byte sizes (0 for no return value)
    pub fn from_sizes(ret: usize, args: &[usize]) -> Result<Self> {
        args.iter().try_fold(Self::EMPTY.with_return(SizeClass::from_size(ret)?), |shape, &size| {
            shape.push(SizeClass::from_size(size)?)
        })
    }

    #[inline]
    pub const fn with_return(self, class: SizeClass) -> Self {
        Self((self.0 & !0xF) | class.0 as u64)
    }

    #[inline]
    pub const fn return_class(self) -> SizeClass {
        SizeClass((self.0 & 0xF) as u8)
    }

    /// Append an argument class after the current last argument
    pub fn push(self, class: SizeClass) -> Result<Self> {
        if class.is_end() {
            return Err(BridgeError::UnsupportedSize { size: 0 });
        }
        let len = self.len();
        if len >= NIBBLE_SLOTS {
            return Err(BridgeError::ShapeOverflow { slots: len + 1, max: NIBBLE_SLOTS });
        }
        let shift = 4 * (len + 1);
        Ok(Self(self.0 | (class.0 as u64) << shift))
    }

    /// Class of argument `index`, `END` past the last slot
    #[inline]
    pub const fn arg(self, index: usize) -> SizeClass {
        if index >= NIBBLE_SLOTS {
            return SizeClass::END;
        }
        SizeClass(((self.0 >> (4 * (index + 1))) & 0xF) as u8)
    }

    /// Argument classes up to the first end marker
    #[inline]
    pub fn args(self) -> ShapeArgs {
        ShapeArgs { shape: self, next: 0 }
    }

    pub fn len(self) -> usize {
        self.args().count()
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.arg(0).is_end()
    }
}

/// Iterator over a nibble shape's argument classes
#[derive(Debug, Clone)]
pub struct ShapeArgs {
    shape: Shape,
    next: usize,
}

impl Iterator for ShapeArgs {
    type Item = SizeClass;

    #[inline]
    fn next(&mut self) -> Option<SizeClass> {
        let class = self.shape.arg(self.next);
        if class.is_end() {
            return None;
        }
        self.next += 1;
        Some(class)
    }
}

/// Byte-per-slot shape for hosts that pass more than 15 arguments.
///
/// Byte 0 is the return class, bytes 1.. are argument classes. A zero byte or
/// the end of the buffer ends the list.
#[derive(Debug, Clone, Copy)]
pub struct ExtendedShape<'a> {
    bytes: &'a [u8],
    len: usize,
}

impl<'a> ExtendedShape<'a> {
    /// Validate a byte shape against the configured slot limit
    pub fn parse(bytes: &'a [u8], max_slots: usize) -> Result<Self> {
        let args = bytes.get(1..).unwrap_or(&[]);
        let mut len = 0;
        for &byte in args {
            let class = SizeClass::from_index(byte)
                .ok_or(BridgeError::UnsupportedSize { size: byte as usize })?;
            if class.is_end() {
                break;
            }
            len += 1;
        }
        if len > max_slots {
            return Err(BridgeError::ShapeOverflow { slots: len, max: max_slots });
        }
        if let Some(&ret) = bytes.first() {
            SizeClass::from_index(ret).ok_or(BridgeError::UnsupportedSize { size: ret as usize })?;
        }
        Ok(Self { bytes, len })
    }

    /// Bytes a `CallFrame` built; every entry is a valid non-end class
    pub(super) fn from_frame(bytes: &'a [u8]) -> Self {
        Self { bytes, len: bytes.len().saturating_sub(1) }
    }

    #[inline]
    pub fn return_class(&self) -> SizeClass {
        self.bytes.first().map(|&b| SizeClass(b)).unwrap_or(SizeClass::END)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn args(&self) -> impl Iterator<Item = SizeClass> + 'a {
        let len = self.len;
        self.bytes.iter().skip(1).take(len).map(|&b| SizeClass(b))
    }
}

impl From<Shape> for Vec<u8> {
    /// Widen a nibble shape into the byte form
    fn from(shape: Shape) -> Vec<u8> {
        std::iter::once(shape.return_class().index())
            .chain(shape.args().map(SizeClass::index))
            .collect()
    }
}
