//! gdbridge - call marshaling between a managed runtime and a native engine ABI
//!
//! The host engine only speaks C: flat argument buffers, 24-byte variants and
//! plain function pointers. This crate provides the pieces a managed runtime
//! needs to meet it there without generating code at run time.
//!
//! Architecture:
//! - `frame` - shape descriptors and flat call-frame layout
//! - `type_table` - per-type host functions, resolved once
//! - `variant` - boxed and ptrcall variant operations
//! - `trampoline` - build-time stencil of identity-tagged thunks
//! - `registry` - class publication, instance lifecycle, scripts, callables
//! - `runtime` - startup and the `gdbridge_library_init` entry point

pub mod config;
pub mod error;
pub mod frame;
pub mod handle;
pub mod host;
pub mod logging;
pub mod managed;
pub mod registry;
pub mod runtime;
pub mod trampoline;
pub mod type_table;
pub mod variant;

// Re-export core types
pub use config::{BridgeConfig, VirtualDispatch};
pub use error::{BridgeError, HostCallError, Result};
pub use frame::{CallFrame, ExtendedShape, Shape, SizeClass};
pub use handle::{Handle, HandleTable};
pub use host::{HostApi, ProcAddress, Resolver};
pub use managed::{install_managed, managed, Managed};
pub use registry::{ClassDef, MethodDef, PropertyDef};
pub use runtime::{bridge, gdbridge_library_init, install, Bridge};
pub use trampoline::{lookup, VirtualId, TRAMPOLINE_COUNT};
pub use type_table::{TypeOps, TypeTable};
pub use variant::{Variant, VariantBridge};
