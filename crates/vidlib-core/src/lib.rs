//! # vidlib-core
//!
//! Version-independent access to the types and symbols of a native binary.
//!
//! Callers refer to functions, globals, types and fields by stable numeric
//! ids (VIDs) instead of addresses. A per-build symbol database maps those
//! ids to offsets, and a type registry maps vtable addresses found in
//! foreign memory back to Rust wrapper types.
//!
//! The crate is layered:
//! - [`database`]: loading, saving and querying the symbol database
//! - [`registry`]: contracts, concrete wrappers and their vtables
//! - [`resolver`]: addresses to typed wrappers, on [`Context`]
//! - [`cached`]: lazily resolved addresses, field offsets and integers
//!
//! ## Why unsafe code is needed
//!
//! Reading another process uses `process_vm_readv`, and calling a foreign
//! virtual method means turning an address into a function pointer. Both
//! are wrapped in small functions; everything else is safe code.

#![allow(unsafe_code)] // process_vm_readv and foreign function pointers

pub mod cached;
pub mod context;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod prelude;
pub mod registry;
pub mod resolver;
pub mod types;

pub use context::{Context, ContextBuilder};
// Re-export commonly used types
pub use database::{LoadOptions, SymbolDatabase};
pub use error::{Result, VidlibError};
pub use types::{Address, FileVersion};
