//! # Symbol Database
//!
//! Per-binary-version table of functions, globals and types, keyed by
//! version independent ids (VIDs). Code written against VIDs keeps working
//! across releases of the target binary; only the database file changes.
//!
//! ## Namespaces
//!
//! - Functions and globals share one VID namespace (both map a VID to an
//!   address).
//! - Types have their own VID namespace.
//! - Type instance lists are keyed by an opaque 32-bit list id.
//!
//! VID 0 means "no id" and never matches a lookup.
//!
//! ## Addresses
//!
//! Every offset in the database is relative to the module base given in
//! [`LoadOptions`]. Lookups taking a `has_base_applied` flag accept either an
//! absolute address (flag set, base is subtracted) or a raw offset.
//!
//! ## Immutability
//!
//! A database is built once (from a file or a [`DatabaseBuilder`]) and never
//! mutated afterwards, so it can be shared between threads without locks.

mod builder;
mod codec;
mod format;
mod records;
mod signature;
mod validation;

use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use tracing::trace;

pub use builder::DatabaseBuilder;
pub use format::{FORMAT_VERSION, MAX_ALIAS_DEPTH};
pub use records::{FieldInfo, FunctionInfo, GlobalInfo, TypeInfo, TypeInstanceInfo, TypeRegistration};
pub use signature::Signature;
pub use validation::ExpectedVersion;

use crate::error::{Result, VidlibError};
use crate::memory::{PointerWidth, ReadMemory};
use crate::types::{Address, FileVersion};

/// Runtime parameters for a loaded database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions
{
    /// Base address of the target module in the target process
    pub module_base: Address,
    /// Pointer width of the target binary
    pub pointer_width: PointerWidth,
}

impl LoadOptions
{
    /// Options for a 64-bit target loaded at `module_base`.
    pub fn new(module_base: Address) -> Self
    {
        Self {
            module_base,
            pointer_width: PointerWidth::Bits64,
        }
    }

    /// Same options with a different pointer width.
    #[must_use]
    pub fn with_pointer_width(mut self, pointer_width: PointerWidth) -> Self
    {
        self.pointer_width = pointer_width;
        self
    }
}

/// Symbol database of one version of the target binary.
#[derive(Debug, Clone)]
pub struct SymbolDatabase
{
    format_version: i32,
    library_version: i32,
    file_version: FileVersion,
    requested_version: Option<FileVersion>,
    library_base_offset: u64,
    hash: u64,
    module_base: Address,
    pointer_width: PointerWidth,

    types: Vec<TypeInfo>,
    functions: Vec<FunctionInfo>,
    globals: Vec<GlobalInfo>,
    registrations: Vec<TypeRegistration>,
    instances: BTreeMap<u32, Vec<TypeInstanceInfo>>,
    cached_values: Vec<Option<i32>>,

    vid_address: BTreeMap<u64, u64>,
    vid_function: HashMap<u64, usize>,
    vid_global: HashMap<u64, usize>,
    vid_type: HashMap<u64, usize>,
    vtable_type: HashMap<u64, usize>,
}

impl SymbolDatabase
{
    /// Start building a database in memory.
    pub fn builder() -> DatabaseBuilder
    {
        DatabaseBuilder::new()
    }

    /// Format version the data was read with (the writer emits [`FORMAT_VERSION`]).
    pub fn format_version(&self) -> i32
    {
        self.format_version
    }

    /// Version of the library the database was generated for.
    pub fn library_version(&self) -> i32
    {
        self.library_version
    }

    /// Product version the data describes.
    ///
    /// For a database loaded through an alias this is the alias target.
    pub fn file_version(&self) -> FileVersion
    {
        self.file_version
    }

    /// Product version that was originally asked for.
    ///
    /// Differs from [`file_version`](Self::file_version) only when the
    /// requested file was an alias.
    pub fn requested_version(&self) -> FileVersion
    {
        self.requested_version.unwrap_or(self.file_version)
    }

    /// Whether the data was reached through at least one alias file.
    pub fn is_aliased(&self) -> bool
    {
        self.requested_version.is_some()
    }

    /// Preferred base address of the binary the database was generated from.
    pub fn library_base_offset(&self) -> u64
    {
        self.library_base_offset
    }

    /// Content hash of the database.
    pub fn hash(&self) -> u64
    {
        self.hash
    }

    /// Base address all offsets are relative to.
    pub fn module_base(&self) -> Address
    {
        self.module_base
    }

    /// Pointer width of the target.
    pub fn pointer_width(&self) -> PointerWidth
    {
        self.pointer_width
    }

    /// All types in file order.
    pub fn types(&self) -> &[TypeInfo]
    {
        &self.types
    }

    /// All functions sorted by begin offset.
    pub fn functions(&self) -> &[FunctionInfo]
    {
        &self.functions
    }

    /// All globals in file order.
    pub fn globals(&self) -> &[GlobalInfo]
    {
        &self.globals
    }

    /// Type registration pairs for the second registration phase.
    pub fn registrations(&self) -> &[TypeRegistration]
    {
        &self.registrations
    }

    /// Ids of all type instance lists, ascending.
    pub fn type_instance_list_ids(&self) -> impl Iterator<Item = u32> + '_
    {
        self.instances.keys().copied()
    }

    /// All optional cached integers.
    pub fn cached_values(&self) -> &[Option<i32>]
    {
        &self.cached_values
    }

    fn to_offset(&self, address: Address, has_base_applied: bool) -> u64
    {
        let value = self.pointer_width.normalize(address).value();
        if has_base_applied {
            value.wrapping_sub(self.module_base.value())
        } else {
            value
        }
    }

    /// Function containing `address`.
    ///
    /// With `has_base_applied` the address is absolute; otherwise it is an
    /// offset from the module base. Returns `None` outside every function.
    pub fn function_at(&self, address: Address, has_base_applied: bool) -> Option<&FunctionInfo>
    {
        let offset = self.to_offset(address, has_base_applied);
        let index = self.functions.partition_point(|func| func.end <= offset);
        self.functions.get(index).filter(|func| func.contains(offset))
    }

    /// Type whose primary vtable is at `vtable`.
    pub fn type_at_vtable(&self, vtable: Address, has_base_applied: bool) -> Option<&TypeInfo>
    {
        let offset = self.to_offset(vtable, has_base_applied);
        if offset == 0 {
            return None;
        }
        self.vtable_type.get(&offset).map(|&index| &self.types[index])
    }

    /// Function by VID.
    pub fn function(&self, vid: u64) -> Option<&FunctionInfo>
    {
        if vid == 0 {
            return None;
        }
        self.vid_function.get(&vid).map(|&index| &self.functions[index])
    }

    /// Global by VID.
    pub fn global(&self, vid: u64) -> Option<&GlobalInfo>
    {
        if vid == 0 {
            return None;
        }
        self.vid_global.get(&vid).map(|&index| &self.globals[index])
    }

    /// Type by VID.
    pub fn type_info(&self, vid: u64) -> Option<&TypeInfo>
    {
        if vid == 0 {
            return None;
        }
        self.vid_type.get(&vid).map(|&index| &self.types[index])
    }

    /// Entries of a type instance list; empty for unknown ids and id 0.
    pub fn type_instances(&self, list_id: u32) -> &[TypeInstanceInfo]
    {
        if list_id == 0 {
            return &[];
        }
        self.instances.get(&list_id).map_or(&[][..], Vec::as_slice)
    }

    /// Offset of the function or global with this VID.
    pub fn offset_of(&self, vid: u64) -> Option<u64>
    {
        if vid == 0 {
            return None;
        }
        self.vid_address.get(&vid).copied()
    }

    /// Absolute address of the function or global with this VID.
    ///
    /// The result is `module_base + offset + extra_offset`. When `signature`
    /// is given, its bytes must match at `result + pattern_offset` (after the
    /// pointer hops its brackets ask for).
    ///
    /// ## Errors
    ///
    /// - `VidNotFound`: the VID is not in the database
    /// - `InvalidArgument`: the signature text cannot be parsed
    /// - `SignatureMismatch`: the bytes differ
    /// - `MemoryRead`: the signature bytes or a pointer hop are unreadable
    pub fn address_of<M: ReadMemory + ?Sized>(
        &self,
        vid: u64,
        extra_offset: i64,
        pattern_offset: i64,
        signature: Option<&str>,
        memory: &M,
    ) -> Result<Address>
    {
        let offset = self.offset_of(vid).ok_or(VidlibError::VidNotFound(vid))?;
        let base = self.pointer_width.normalize(self.module_base + offset);
        let result = self.pointer_width.normalize(base.offset(extra_offset));

        if let Some(text) = signature.filter(|text| !text.trim().is_empty()) {
            let signature = Signature::parse(text)?;
            let target = self.pointer_width.normalize(result.offset(pattern_offset));
            if !signature.verify(memory, target)? {
                return Err(VidlibError::SignatureMismatch { vid, address: target });
            }
        }
        Ok(result)
    }

    /// Like [`address_of`](Self::address_of) but every failure, including
    /// unreadable memory, yields `None`.
    pub fn try_address_of<M: ReadMemory + ?Sized>(
        &self,
        vid: u64,
        extra_offset: i64,
        pattern_offset: i64,
        signature: Option<&str>,
        memory: &M,
    ) -> Option<Address>
    {
        match self.address_of(vid, extra_offset, pattern_offset, signature, memory) {
            Ok(address) => Some(address),
            Err(err) => {
                trace!(vid, error = %err, "Address lookup failed");
                None
            }
        }
    }

    /// Cached version-specific integer at `index`; `None` for holes and
    /// out-of-range indexes.
    pub fn cached_value(&self, index: usize) -> Option<i32>
    {
        self.cached_values.get(index).copied().flatten()
    }

    /// Write one `"<vid>\t0x<OFFSET>"` line per function and global, ascending by VID.
    ///
    /// ## Errors
    ///
    /// `Io` if writing fails.
    pub fn dump_vids<W: Write>(&self, mut writer: W) -> Result<()>
    {
        for (vid, offset) in &self.vid_address {
            writeln!(writer, "{vid}\t0x{offset:X}")?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::memory::MemorySnapshot;

    fn function(vid: u64, begin: u64, end: u64, name: &str) -> FunctionInfo
    {
        FunctionInfo {
            vid,
            begin,
            end,
            short_name: Some(name.to_string()),
            full_name: None,
        }
    }

    fn sample(options: LoadOptions) -> SymbolDatabase
    {
        let mut builder = SymbolDatabase::builder();
        builder.add_function(function(2, 0x200, 0x280, "second")).unwrap();
        builder.add_function(function(1, 0x100, 0x200, "first")).unwrap();
        builder
            .add_global(GlobalInfo {
                vid: 10,
                begin: 0x5000,
                short_name: Some("g_player".into()),
                type_name: None,
            })
            .unwrap();
        builder
            .add_type(TypeInfo {
                vid: 100,
                vtable: 0x9000,
                name: "class Actor".into(),
                size: Some(0x40),
                fields: Vec::new(),
            })
            .unwrap();
        builder.cached_values(vec![Some(5), None, Some(-1)]);
        builder.build(options).unwrap()
    }

    #[test]
    fn test_function_at_intervals()
    {
        let db = sample(LoadOptions::new(Address::new(0x1_4000_0000)));

        assert_eq!(db.functions()[0].vid, 1);
        assert_eq!(db.function_at(Address::new(0x100), false).unwrap().vid, 1);
        assert_eq!(db.function_at(Address::new(0x1ff), false).unwrap().vid, 1);
        assert_eq!(db.function_at(Address::new(0x200), false).unwrap().vid, 2);
        assert!(db.function_at(Address::new(0x280), false).is_none());
        assert!(db.function_at(Address::new(0xff), false).is_none());
        assert_eq!(db.function_at(Address::new(0x1_4000_0210), true).unwrap().vid, 2);
    }

    #[test]
    fn test_vid_zero_never_matches()
    {
        let db = sample(LoadOptions::default());
        assert!(db.function(0).is_none());
        assert!(db.global(0).is_none());
        assert!(db.type_info(0).is_none());
        assert!(db.offset_of(0).is_none());
        assert!(db.type_instances(0).is_empty());
        assert!(db.type_instances(77).is_empty());
    }

    #[test]
    fn test_type_lookups()
    {
        let db = sample(LoadOptions::new(Address::new(0x40_0000)));
        assert_eq!(db.type_info(100).unwrap().name, "class Actor");
        assert_eq!(db.type_at_vtable(Address::new(0x40_9000), true).unwrap().vid, 100);
        assert_eq!(db.type_at_vtable(Address::new(0x9000), false).unwrap().vid, 100);
        assert!(db.type_at_vtable(Address::new(0x40_0000), true).is_none());
    }

    #[test]
    fn test_32_bit_addresses_are_truncated()
    {
        let options = LoadOptions::new(Address::new(0x40_0000)).with_pointer_width(PointerWidth::Bits32);
        let db = sample(options);
        let dirty = Address::new(0xffff_ffff_0040_0150);
        assert_eq!(db.function_at(dirty, true).unwrap().vid, 1);
    }

    #[test]
    fn test_address_of_and_signature()
    {
        let db = sample(LoadOptions::new(Address::new(0x40_0000)));
        let mut memory = MemorySnapshot::new(PointerWidth::Bits64);
        memory.insert(Address::new(0x40_0204), vec![0x48, 0x8B, 0x05]);

        assert_eq!(db.address_of(2, 0, 0, None, &memory).unwrap(), Address::new(0x40_0200));
        assert_eq!(db.address_of(10, 8, 0, None, &memory).unwrap(), Address::new(0x40_5008));
        assert_eq!(db.address_of(2, 0, 4, Some("48 8B ??"), &memory).unwrap(), Address::new(0x40_0200));

        let err = db.address_of(2, 0, 4, Some("48 8D"), &memory).unwrap_err();
        assert!(matches!(err, VidlibError::SignatureMismatch { vid: 2, .. }));
        assert!(matches!(db.address_of(3, 0, 0, None, &memory), Err(VidlibError::VidNotFound(3))));

        assert!(db.try_address_of(2, 0, 4, Some("48 8D"), &memory).is_none());
        assert!(db.try_address_of(2, 0, 0x100, Some("48"), &memory).is_none());
        assert_eq!(db.try_address_of(1, 0, 0, Some(""), &memory), Some(Address::new(0x40_0100)));
    }

    #[test]
    fn test_cached_values()
    {
        let db = sample(LoadOptions::default());
        assert_eq!(db.cached_value(0), Some(5));
        assert_eq!(db.cached_value(1), None);
        assert_eq!(db.cached_value(2), Some(-1));
        assert_eq!(db.cached_value(3), None);
    }

    #[test]
    fn test_dump_vids()
    {
        let db = sample(LoadOptions::default());
        let mut out = Vec::new();
        db.dump_vids(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1\t0x100\n2\t0x200\n10\t0x5000\n");
    }
}
