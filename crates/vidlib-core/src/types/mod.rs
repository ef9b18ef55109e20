//! # Types
//!
//! Plain value types shared by the database, registry and resolver.

pub mod address;
pub mod region;
pub mod version;

// Re-export all public types
pub use address::Address;
pub use region::MemoryRegion;
pub use version::FileVersion;
