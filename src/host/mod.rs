//! Host engine interface
//!
//! Architecture:
//! - `abi.rs` - `#[repr(C)]` types and callback signatures shared with the engine
//! - `api.rs` - `HostApi`, the function table resolved by name at startup

pub mod abi;
mod api;

pub use api::{HostApi, ProcAddress, Resolver};

#[cfg(test)]
pub(crate) mod fake;
