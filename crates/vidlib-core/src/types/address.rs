//! Foreign memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed address in the target process
///
/// Wraps a `u64` so that addresses are never confused with module-relative
/// offsets, VIDs or sizes. Arithmetic wraps like pointer arithmetic in the
/// foreign process does; use the `checked_*` variants when overflow matters.
///
/// ## Example
///
/// ```rust
/// use vidlib_core::types::Address;
///
/// let object = Address::from(0x1000);
/// let vtable_slot = object + 0x10;
/// assert_eq!(vtable_slot.value(), 0x1010);
/// assert_eq!(vtable_slot.offset(-0x10), object);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address, used as the "no object" sentinel.
    pub const NULL: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// ```rust
    /// use vidlib_core::types::Address;
    ///
    /// const MODULE_BASE: Address = Address::new(0x1_4000_0000);
    /// assert!(!MODULE_BASE.is_null());
    /// ```
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is the null sentinel.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Apply a signed byte offset, wrapping on overflow.
    pub const fn offset(self, delta: i64) -> Self
    {
        Address(self.0.wrapping_add_signed(delta))
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use vidlib_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, checking for underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Truncate to the low 32 bits, as a 32-bit target would see the value.
    pub const fn truncate_32(self) -> Self
    {
        Address(self.0 & 0xffff_ffff)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_offset_wraps_both_directions()
    {
        let addr = Address::new(0x20);
        assert_eq!(addr.offset(-0x10), Address::new(0x10));
        assert_eq!(addr.offset(0x10), Address::new(0x30));
        assert_eq!(Address::NULL.offset(-1), Address::new(u64::MAX));
    }

    #[test]
    fn test_truncate_32()
    {
        assert_eq!(Address::new(0x1_2345_6789).truncate_32(), Address::new(0x2345_6789));
    }

    #[test]
    fn test_display_is_zero_padded()
    {
        assert_eq!(Address::new(0xabc).to_string(), "0x0000000000000abc");
    }
}
