//! # Foreign Memory Access
//!
//! Everything in vidlib that touches the target process goes through
//! [`ReadMemory`]. The resolver reads vtable pointers with it, signature
//! verification reads code bytes with it, and validity checks probe regions
//! with it.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemorySnapshot`]: a set of captured byte ranges (offline analysis, tests)
//! - [`ProcessMemory`]: a live process on Linux (`process_vm_readv`)
//!
//! ## Staleness
//!
//! The foreign process mutates its memory whenever it likes. No lock
//! governs it, so every value returned here may be stale the moment it is
//! returned.

mod process;
mod snapshot;

pub use process::ProcessMemory;
pub use snapshot::MemorySnapshot;

use crate::error::{Result, VidlibError};
use crate::types::Address;

/// Pointer size of the target binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerWidth
{
    /// 32-bit target (4-byte pointers)
    Bits32,
    /// 64-bit target (8-byte pointers)
    #[default]
    Bits64,
}

impl PointerWidth
{
    /// Width of the current process.
    pub const fn native() -> Self
    {
        if cfg!(target_pointer_width = "32") {
            PointerWidth::Bits32
        } else {
            PointerWidth::Bits64
        }
    }

    /// Size of one pointer in bytes.
    pub const fn size(self) -> usize
    {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }

    /// Reduce an address to what a target of this width can represent.
    pub const fn normalize(self, address: Address) -> Address
    {
        match self {
            PointerWidth::Bits32 => address.truncate_32(),
            PointerWidth::Bits64 => address,
        }
    }
}

/// Read access to the memory of a target process
///
/// Implementations must return [`VidlibError::MemoryRead`] for unreadable
/// addresses instead of panicking; the resolver deliberately propagates those
/// errors because a bad pointer usually means memory corruption.
pub trait ReadMemory: Send + Sync
{
    /// Fill `buf` with the bytes at `address`.
    ///
    /// ## Errors
    ///
    /// `MemoryRead` if any byte of the range is unreadable.
    fn read_into(&self, address: Address, buf: &mut [u8]) -> Result<()>;

    /// Pointer width of the target.
    fn pointer_width(&self) -> PointerWidth;

    /// Read `len` bytes at `address`.
    fn read_bytes(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let mut buf = vec![0u8; len];
        self.read_into(address, &mut buf)?;
        Ok(buf)
    }

    /// Read one pointer-sized value at `address`.
    fn read_pointer(&self, address: Address) -> Result<Address>
    {
        match self.pointer_width() {
            PointerWidth::Bits32 => {
                let mut buf = [0u8; 4];
                self.read_into(address, &mut buf)?;
                Ok(Address::from(u64::from(u32::from_le_bytes(buf))))
            }
            PointerWidth::Bits64 => {
                let mut buf = [0u8; 8];
                self.read_into(address, &mut buf)?;
                Ok(Address::from(u64::from_le_bytes(buf)))
            }
        }
    }

    /// Whether `len` bytes at `address` can currently be read.
    ///
    /// The default implementation probes with a read; implementations that
    /// know their mappings should answer without copying.
    fn is_readable(&self, address: Address, len: usize) -> bool
    {
        if address.is_null() {
            return false;
        }
        self.read_bytes(address, len).is_ok()
    }
}

impl<M: ReadMemory + ?Sized> ReadMemory for &M
{
    fn read_into(&self, address: Address, buf: &mut [u8]) -> Result<()>
    {
        (**self).read_into(address, buf)
    }

    fn pointer_width(&self) -> PointerWidth
    {
        (**self).pointer_width()
    }

    fn is_readable(&self, address: Address, len: usize) -> bool
    {
        (**self).is_readable(address, len)
    }
}

impl<M: ReadMemory + ?Sized> ReadMemory for std::sync::Arc<M>
{
    fn read_into(&self, address: Address, buf: &mut [u8]) -> Result<()>
    {
        (**self).read_into(address, buf)
    }

    fn pointer_width(&self) -> PointerWidth
    {
        (**self).pointer_width()
    }

    fn is_readable(&self, address: Address, len: usize) -> bool
    {
        (**self).is_readable(address, len)
    }
}

pub(crate) fn read_error(address: Address, message: impl Into<String>) -> VidlibError
{
    VidlibError::MemoryRead {
        address,
        message: message.into(),
    }
}
