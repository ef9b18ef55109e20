//! Captured memory image.

use std::collections::BTreeMap;

use super::{read_error, PointerWidth, ReadMemory};
use crate::error::Result;
use crate::types::Address;

/// Byte ranges captured from a target process
///
/// Reads are served from the captured chunks; a read that is not fully
/// covered by a single chunk fails exactly like an unmapped page would.
/// Used for crash-dump style offline analysis and as the foreign process in
/// tests.
///
/// ```
/// use vidlib_core::memory::{MemorySnapshot, PointerWidth, ReadMemory};
/// use vidlib_core::types::Address;
///
/// let mut memory = MemorySnapshot::new(PointerWidth::Bits64);
/// memory.write_pointer(Address::from(0x2000), Address::from(0x1_4000_1000));
/// assert_eq!(memory.read_pointer(Address::from(0x2000))?, Address::from(0x1_4000_1000));
/// assert!(memory.read_pointer(Address::from(0x3000)).is_err());
/// # Ok::<(), vidlib_core::error::VidlibError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot
{
    width: PointerWidth,
    chunks: BTreeMap<u64, Vec<u8>>,
}

impl MemorySnapshot
{
    /// Create an empty snapshot for a target of the given pointer width.
    pub fn new(width: PointerWidth) -> Self
    {
        Self {
            width,
            chunks: BTreeMap::new(),
        }
    }

    /// Same contents, reinterpreted with a different pointer width.
    #[must_use]
    pub fn with_pointer_width(&self, width: PointerWidth) -> Self
    {
        Self {
            width,
            chunks: self.chunks.clone(),
        }
    }

    /// Add a chunk of bytes starting at `address`.
    ///
    /// Writing over an existing chunk patches it in place when the new bytes
    /// fit inside it; otherwise the chunk is stored separately.
    pub fn insert(&mut self, address: Address, bytes: Vec<u8>)
    {
        if let Some((at, chunk)) = self.chunk_containing_mut(address, bytes.len()) {
            chunk[at..at + bytes.len()].copy_from_slice(&bytes);
            return;
        }
        self.chunks.insert(address.value(), bytes);
    }

    /// Store a pointer-sized value at `address`.
    pub fn write_pointer(&mut self, address: Address, value: Address)
    {
        let bytes = match self.width {
            PointerWidth::Bits32 => (value.value() as u32).to_le_bytes().to_vec(),
            PointerWidth::Bits64 => value.value().to_le_bytes().to_vec(),
        };
        self.insert(address, bytes);
    }

    /// Number of captured chunks.
    pub fn chunk_count(&self) -> usize
    {
        self.chunks.len()
    }

    fn chunk_containing(&self, address: Address, len: usize) -> Option<&[u8]>
    {
        let (&start, chunk) = self.chunks.range(..=address.value()).next_back()?;
        let offset = usize::try_from(address.value() - start).ok()?;
        let end = offset.checked_add(len)?;
        chunk.get(offset..end)
    }

    fn chunk_containing_mut(&mut self, address: Address, len: usize) -> Option<(usize, &mut Vec<u8>)>
    {
        let (&start, chunk) = self.chunks.range_mut(..=address.value()).next_back()?;
        let offset = usize::try_from(address.value() - start).ok()?;
        let end = offset.checked_add(len)?;
        if end > chunk.len() {
            return None;
        }
        Some((offset, chunk))
    }
}

impl ReadMemory for MemorySnapshot
{
    fn read_into(&self, address: Address, buf: &mut [u8]) -> Result<()>
    {
        let bytes = self
            .chunk_containing(address, buf.len())
            .ok_or_else(|| read_error(address, format!("{} bytes not captured in snapshot", buf.len())))?;
        buf.copy_from_slice(bytes);
        Ok(())
    }

    fn pointer_width(&self) -> PointerWidth
    {
        self.width
    }

    fn is_readable(&self, address: Address, len: usize) -> bool
    {
        !address.is_null() && self.chunk_containing(address, len).is_some()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_read_inside_chunk()
    {
        let mut memory = MemorySnapshot::new(PointerWidth::Bits64);
        memory.insert(Address::new(0x1000), vec![1, 2, 3, 4, 5, 6, 7, 8]);

        assert_eq!(memory.read_bytes(Address::new(0x1002), 3).unwrap(), vec![3, 4, 5]);
        assert!(memory.read_bytes(Address::new(0x1006), 4).is_err());
        assert!(memory.read_bytes(Address::new(0x0fff), 2).is_err());
    }

    #[test]
    fn test_insert_patches_existing_chunk()
    {
        let mut memory = MemorySnapshot::new(PointerWidth::Bits64);
        memory.insert(Address::new(0x1000), vec![0; 16]);
        memory.write_pointer(Address::new(0x1008), Address::new(0xAABB));

        assert_eq!(memory.chunk_count(), 1);
        assert_eq!(memory.read_pointer(Address::new(0x1008)).unwrap(), Address::new(0xAABB));
    }

    #[test]
    fn test_is_readable()
    {
        let mut memory = MemorySnapshot::new(PointerWidth::Bits32);
        memory.insert(Address::new(0x40), vec![0; 4]);
        assert!(memory.is_readable(Address::new(0x40), 4));
        assert!(!memory.is_readable(Address::new(0x40), 5));
        assert!(!memory.is_readable(Address::NULL, 1));
    }
}
