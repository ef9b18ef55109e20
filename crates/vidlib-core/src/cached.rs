//! # Cached Accessors
//!
//! Small values declared next to the code that needs a version-specific
//! address or offset, usually in a `static`:
//!
//! ```
//! use vidlib_core::cached::{CachedFid, CachedVid};
//!
//! static SPAWN_ACTOR: CachedVid = CachedVid::new(0x5A_1D3E).with_signature("48 89 5C 24 ??");
//! static ACTOR_HEALTH: CachedFid = CachedFid::new(0x7001, 4);
//! ```
//!
//! The first access resolves through the [`Context`]; later accesses return
//! the published result. Resolution runs at most once per accessor and
//! failures are cached as well: a VID missing from the database stays
//! missing for the life of the process.

use std::fmt;

use once_cell::sync::OnceCell;
use tracing::warn;

use crate::context::Context;
use crate::error::{Result, VidlibError};
use crate::types::Address;

/// Lazily resolved address of a function or global.
pub struct CachedVid
{
    vid: u64,
    extra_offset: i64,
    pattern_offset: i64,
    signature: Option<&'static str>,
    cell: OnceCell<Option<Address>>,
}

impl CachedVid
{
    /// Accessor for `vid` without offsets or signature.
    pub const fn new(vid: u64) -> Self
    {
        Self {
            vid,
            extra_offset: 0,
            pattern_offset: 0,
            signature: None,
            cell: OnceCell::new(),
        }
    }

    /// Add `offset` to the resolved address.
    #[must_use]
    pub const fn with_offset(mut self, offset: i64) -> Self
    {
        self.extra_offset = offset;
        self
    }

    /// Verify `signature` at the resolved address plus `pattern_offset`.
    #[must_use]
    pub const fn with_pattern_offset(mut self, pattern_offset: i64) -> Self
    {
        self.pattern_offset = pattern_offset;
        self
    }

    /// Byte signature the resolved address must match.
    #[must_use]
    pub const fn with_signature(mut self, signature: &'static str) -> Self
    {
        self.signature = Some(signature);
        self
    }

    /// The VID being resolved.
    pub const fn vid(&self) -> u64
    {
        self.vid
    }

    /// The resolved address.
    ///
    /// ## Errors
    ///
    /// `Unresolved` if the VID is missing, the signature does not match, or
    /// the context has no database.
    pub fn value(&self, context: &Context) -> Result<Address>
    {
        self.try_value(context)
            .ok_or_else(|| VidlibError::Unresolved(self.to_string()))
    }

    /// The resolved address, `None` on failure.
    pub fn try_value(&self, context: &Context) -> Option<Address>
    {
        *self.cell.get_or_init(|| {
            let address = context.try_address_of(
                self.vid,
                self.extra_offset,
                self.pattern_offset,
                self.signature,
            );
            if address.is_none() {
                warn!(vid = self.vid, "Failed to resolve cached address");
            }
            address
        })
    }

    /// Whether resolution has already run.
    pub fn is_resolved(&self) -> bool
    {
        self.cell.get().is_some()
    }
}

impl fmt::Display for CachedVid
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "address of vid {}", self.vid)?;
        if self.extra_offset != 0 {
            write!(f, " (offset {})", self.extra_offset)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CachedVid
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("CachedVid")
            .field("vid", &self.vid)
            .field("extra_offset", &self.extra_offset)
            .field("pattern_offset", &self.pattern_offset)
            .field("signature", &self.signature)
            .field("value", &self.cell.get())
            .finish()
    }
}

/// Lazily resolved byte offset of a field inside a type.
pub struct CachedFid
{
    type_vid: u64,
    field_id: u32,
    cell: OnceCell<Option<u32>>,
}

impl CachedFid
{
    /// Accessor for field `field_id` of the type with VID `type_vid`.
    pub const fn new(type_vid: u64, field_id: u32) -> Self
    {
        Self {
            type_vid,
            field_id,
            cell: OnceCell::new(),
        }
    }

    /// The field's offset from the start of the type.
    ///
    /// ## Errors
    ///
    /// `FieldNotFound` if the type or field is unknown or the field has no
    /// offset.
    pub fn value(&self, context: &Context) -> Result<u32>
    {
        self.try_value(context).ok_or(VidlibError::FieldNotFound {
            type_vid: self.type_vid,
            field_id: self.field_id,
        })
    }

    /// The field's offset, `None` on failure.
    pub fn try_value(&self, context: &Context) -> Option<u32>
    {
        *self.cell.get_or_init(|| {
            let offset = context
                .try_database()
                .and_then(|database| database.type_info(self.type_vid))
                .and_then(|info| info.field(self.field_id))
                .and_then(|field| field.begin)
                .and_then(|begin| u32::try_from(begin).ok());
            if offset.is_none() {
                warn!(type_vid = self.type_vid, field_id = self.field_id, "Failed to resolve field offset");
            }
            offset
        })
    }

    /// Address of the field inside the object at `base`.
    ///
    /// ## Errors
    ///
    /// As [`value`](Self::value).
    pub fn address_in(&self, context: &Context, base: Address) -> Result<Address>
    {
        Ok(base + u64::from(self.value(context)?))
    }
}

impl fmt::Debug for CachedFid
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("CachedFid")
            .field("type_vid", &self.type_vid)
            .field("field_id", &self.field_id)
            .field("value", &self.cell.get())
            .finish()
    }
}

/// One entry of the database's version-specific integer cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibValue
{
    index: usize,
}

impl LibValue
{
    /// Entry at `index`.
    pub const fn new(index: usize) -> Self
    {
        Self { index }
    }

    /// The cached integer.
    ///
    /// ## Errors
    ///
    /// `DatabaseNotLoaded`, or `MissingCachedValue` for a hole or an index
    /// past the end.
    pub fn value(self, context: &Context) -> Result<i32>
    {
        context
            .database()?
            .cached_value(self.index)
            .ok_or(VidlibError::MissingCachedValue(self.index))
    }

    /// The cached integer, `None` on any failure.
    pub fn value_safe(self, context: &Context) -> Option<i32>
    {
        context.try_database()?.cached_value(self.index)
    }
}

#[cfg(test)]
mod tests
{
    use std::sync::Arc;

    use super::*;
    use crate::database::{FieldInfo, GlobalInfo, LoadOptions, SymbolDatabase, TypeInfo};
    use crate::memory::{MemorySnapshot, PointerWidth};
    use crate::ContextBuilder;

    fn field(field_id: u32, begin: Option<i32>) -> FieldInfo
    {
        FieldInfo {
            field_id,
            begin,
            short_name: None,
            type_name: None,
        }
    }

    fn context() -> Context
    {
        let mut db = SymbolDatabase::builder();
        db.add_global(GlobalInfo {
            vid: 42,
            begin: 0x2000,
            short_name: Some("g_world".to_string()),
            type_name: None,
        })
        .unwrap();
        db.add_type(TypeInfo {
            vid: 7,
            vtable: 0,
            name: "struct Actor".to_string(),
            size: Some(0x40),
            fields: vec![field(1, Some(0x8)), field(3, Some(0x18)), field(2, None)],
        })
        .unwrap();
        db.cached_values(vec![Some(5), None]);
        let db = db.build(LoadOptions::new(Address::new(0x40_0000))).unwrap();
        ContextBuilder::with_database(Arc::new(MemorySnapshot::new(PointerWidth::Bits64)), db)
            .build()
            .unwrap()
    }

    #[test]
    fn test_cached_vid()
    {
        static WORLD: CachedVid = CachedVid::new(42).with_offset(0x10);
        static MISSING: CachedVid = CachedVid::new(43);

        let context = context();
        assert!(!WORLD.is_resolved());
        assert_eq!(WORLD.value(&context).unwrap(), Address::new(0x40_2010));
        assert!(WORLD.is_resolved());

        assert!(MISSING.try_value(&context).is_none());
        assert!(matches!(MISSING.value(&context), Err(VidlibError::Unresolved(_))));
    }

    #[test]
    fn test_cached_fid_scans_out_of_order_fields()
    {
        let context = context();
        assert_eq!(CachedFid::new(7, 1).value(&context).unwrap(), 0x8);
        // id 3 sits at index 1
        assert_eq!(CachedFid::new(7, 3).value(&context).unwrap(), 0x18);
        assert_eq!(
            CachedFid::new(7, 1).address_in(&context, Address::new(0x1000)).unwrap(),
            Address::new(0x1008)
        );

        assert!(matches!(
            CachedFid::new(7, 2).value(&context),
            Err(VidlibError::FieldNotFound { type_vid: 7, field_id: 2 })
        ));
        assert!(CachedFid::new(8, 1).try_value(&context).is_none());
    }

    #[test]
    fn test_lib_value()
    {
        let context = context();
        assert_eq!(LibValue::new(0).value(&context).unwrap(), 5);
        assert!(matches!(LibValue::new(1).value(&context), Err(VidlibError::MissingCachedValue(1))));
        assert_eq!(LibValue::new(2).value_safe(&context), None);
    }
}
