//! Call frames - shape descriptors and flat argument buffers
//!
//! Design: A call is described by a shape (one size class per slot) and a flat
//! buffer. Decoding only computes addresses into caller-owned storage; it never
//! reads or writes the buffer and never allocates.
//!
//! Architecture:
//! - `shape.rs` - size classes, nibble-packed `Shape`, byte-per-slot `ExtendedShape`
//! - `codec.rs` - slot layout, `decode` and the fixed-stride `decode_variants`
//! - `writer.rs` - `CallFrame`, the packer used on the managed side

mod codec;
mod shape;
mod writer;

pub use codec::{
    align_up, decode, decode_extended, decode_variants, layout, read_slot, write_slot, FrameArgs, FramePointers,
    Slot, SlotLayout,
};
pub use shape::{ExtendedShape, Shape, ShapeArgs, SizeClass, SIZE_CLASSES};
pub use writer::CallFrame;

/// Argument slots addressable by the nibble form (nibble 0 holds the return class)
pub const NIBBLE_SLOTS: usize = 15;

/// Upper bound for the configurable byte-form slot count
pub const MAX_EXTENDED_SLOTS: usize = 255;

/// Slot alignment never exceeds pointer alignment
pub const WORD_ALIGN: usize = 8;

/// Stride of a boxed variant argument array
pub const VARIANT_STRIDE: usize = crate::host::abi::VARIANT_SIZE;
