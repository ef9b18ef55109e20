//! Mapped memory regions of the target process.

use super::Address;

/// Memory region in the target process
///
/// A contiguous mapping with permission flags, such as the executable's
/// `.text` section or a heap arena. Used to check that an object's bytes are
/// readable before trusting a wrapper.
///
/// ## Examples
///
/// ```
/// use vidlib_core::types::{Address, MemoryRegion};
///
/// let text = MemoryRegion::new(
///     Address::from(0x1000),
///     Address::from(0x2000),
///     "r-x".to_string(),
///     Some("/opt/game/game.bin".to_string()),
/// );
/// assert!(text.contains(Address::from(0x1ff8), 8));
/// assert!(!text.contains(Address::from(0x1ffc), 8));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion
{
    /// Start address of the region (inclusive)
    pub start: Address,

    /// End address of the region (exclusive)
    pub end: Address,

    /// Memory permissions as a string
    ///
    /// Examples: `"rwx"`, `"r-x"`, `"rw-p"`, `"r--"`.
    pub permissions: String,

    /// Backing file path or pseudo name (`[heap]`, `[stack]`), if any
    pub path: Option<String>,
}

impl MemoryRegion
{
    /// Create a new memory region
    ///
    /// `end <= start` is not rejected; such a region has size 0.
    pub fn new(start: Address, end: Address, permissions: String, path: Option<String>) -> Self
    {
        Self {
            start,
            end,
            permissions,
            path,
        }
    }

    /// Get the size of the memory region in bytes
    pub fn size(&self) -> u64
    {
        self.end.value().saturating_sub(self.start.value())
    }

    /// Whether `[address, address + len)` lies entirely inside this region.
    pub fn contains(&self, address: Address, len: u64) -> bool
    {
        let Some(end) = address.value().checked_add(len) else {
            return false;
        };
        address >= self.start && end <= self.end.value()
    }

    /// Check if the region is readable
    pub fn is_readable(&self) -> bool
    {
        self.permissions.contains('r')
    }

    /// Check if the region is writable
    pub fn is_writable(&self) -> bool
    {
        self.permissions.contains('w')
    }

    /// Check if the region is executable
    pub fn is_executable(&self) -> bool
    {
        self.permissions.contains('x')
    }

    /// File name component of the backing path, if any.
    pub fn file_name(&self) -> Option<&str>
    {
        let path = self.path.as_deref()?;
        path.rsplit('/').next().filter(|name| !name.is_empty())
    }

    /// Whether readable regions in `regions` cover `[address, address + len)`
    /// without a gap. The range may span several adjacent mappings.
    ///
    /// ```
    /// use vidlib_core::types::{Address, MemoryRegion};
    ///
    /// let regions = [
    ///     MemoryRegion::new(Address::from(0x1000), Address::from(0x2000), "r-x".into(), None),
    ///     MemoryRegion::new(Address::from(0x2000), Address::from(0x3000), "rw-".into(), None),
    /// ];
    /// assert!(MemoryRegion::covers(&regions, Address::from(0x1800), 0x1000));
    /// assert!(!MemoryRegion::covers(&regions, Address::from(0x2800), 0x1000));
    /// ```
    pub fn covers(regions: &[MemoryRegion], address: Address, len: u64) -> bool
    {
        let Some(end) = address.value().checked_add(len) else {
            return false;
        };
        let mut readable: Vec<&MemoryRegion> = regions.iter().filter(|region| region.is_readable()).collect();
        readable.sort_by_key(|region| region.start);

        let mut cursor = address.value();
        for region in readable {
            if cursor >= end {
                break;
            }
            if region.end.value() <= cursor {
                continue;
            }
            if region.start.value() > cursor {
                return false;
            }
            cursor = region.end.value();
        }
        cursor >= end
    }

    /// Parse one line of Linux `/proc/<pid>/maps`.
    ///
    /// Format: `start-end perms offset dev inode [path]`, addresses in hex.
    ///
    /// ```
    /// use vidlib_core::types::{Address, MemoryRegion};
    ///
    /// let line = "7f00a000-7f00b000 r-xp 00000000 08:01 1234  /usr/lib/libc.so.6";
    /// let region = MemoryRegion::parse_maps_line(line).unwrap();
    /// assert_eq!(region.start, Address::from(0x7f00a000));
    /// assert_eq!(region.file_name(), Some("libc.so.6"));
    /// ```
    pub fn parse_maps_line(line: &str) -> Option<Self>
    {
        let mut fields = line.split_whitespace();
        let range = fields.next()?;
        let permissions = fields.next()?.to_string();
        // offset, device, inode
        for _ in 0..3 {
            fields.next()?;
        }
        let path = fields.collect::<Vec<_>>().join(" ");

        let (start, end) = range.split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;

        Some(Self::new(
            Address::from(start),
            Address::from(end),
            permissions,
            (!path.is_empty()).then_some(path),
        ))
    }
}
