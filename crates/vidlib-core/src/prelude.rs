//! Everything needed to declare wrappers and resolve objects.
//!
//! ```
//! use vidlib_core::prelude::*;
//! ```

pub use crate::cached::{CachedFid, CachedVid, LibValue};
pub use crate::context::{Context, ContextBuilder};
pub use crate::database::{ExpectedVersion, LoadOptions, SymbolDatabase};
pub use crate::error::{Result, VidlibError};
pub use crate::memory::{MemorySnapshot, PointerWidth, ProcessMemory, ReadMemory};
pub use crate::memory_object;
pub use crate::registry::{Contract, MemoryObject, ObjectHeader, Unknown, VirtualObject};
pub use crate::types::{Address, FileVersion};
