//! # Process-wide Context
//!
//! A [`Context`] bundles everything resolution needs: the symbol database of
//! the running binary, the type registry, a reader for the target's memory and
//! the module base. It is configured once through a [`ContextBuilder`] and is
//! read-only afterwards, so a single instance can be shared (`Arc<Context>`
//! or a `static` cell) by every thread.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use vidlib_core::memory::{MemorySnapshot, PointerWidth};
//! use vidlib_core::types::Address;
//! use vidlib_core::ContextBuilder;
//!
//! let memory = Arc::new(MemorySnapshot::new(PointerWidth::Bits64));
//! let context = ContextBuilder::new(memory, Address::from(0x1_4000_0000)).build()?;
//! assert!(context.database().is_err());
//! # Ok::<(), vidlib_core::error::VidlibError>(())
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use crate::database::SymbolDatabase;
use crate::error::{Result, VidlibError};
use crate::memory::{PointerWidth, ReadMemory};
use crate::registry::{ConcreteObject, Contract, Implements, TypeDescriptor, TypeRegistry};
use crate::types::Address;

/// Startup configuration of a [`Context`].
///
/// Not thread-safe by intent: it is filled in by one thread during startup.
pub struct ContextBuilder
{
    memory: Arc<dyn ReadMemory>,
    database: Option<Arc<SymbolDatabase>>,
    registry: TypeRegistry,
}

impl ContextBuilder
{
    /// Context for the module at `module_base`, without a symbol database.
    pub fn new(memory: Arc<dyn ReadMemory>, module_base: Address) -> Self
    {
        Self {
            memory,
            database: None,
            registry: TypeRegistry::new(module_base),
        }
    }

    /// Context for a loaded database; the module base is the database's.
    pub fn with_database(memory: Arc<dyn ReadMemory>, database: SymbolDatabase) -> Self
    {
        let mut builder = Self::new(memory, database.module_base());
        builder.database = Some(Arc::new(database));
        builder
    }

    /// Registrations made so far.
    pub fn registry(&self) -> &TypeRegistry
    {
        &self.registry
    }

    /// Assign a fixed id to contract `C`; see [`TypeRegistry::register_interface`].
    ///
    /// ## Errors
    ///
    /// `Configuration` if the id is already taken.
    pub fn register_interface<C: ?Sized + Contract>(&mut self, id: u32, vid: u64) -> Result<&mut Self>
    {
        self.registry.register_interface::<C>(id, vid)?;
        Ok(self)
    }

    /// Assign a fixed id to concrete `T`; see [`TypeRegistry::register_implementation`].
    ///
    /// ## Errors
    ///
    /// `Configuration` if the id is already taken.
    pub fn register_implementation<T: ConcreteObject>(&mut self, id: u32, vid: u64) -> Result<&mut Self>
    {
        self.registry.register_implementation::<T>(id, vid)?;
        Ok(self)
    }

    /// Register `T` as wrapper of contract `C`; see [`TypeRegistry::register_type`].
    ///
    /// ## Errors
    ///
    /// `Configuration` on duplicates or a negative offset.
    pub fn register_type<C, T>(
        &mut self,
        module: Address,
        vtable: Option<Address>,
        offset_in_full_type: i32,
    ) -> Result<Arc<TypeDescriptor>>
    where
        C: ?Sized + Contract,
        T: ConcreteObject + Implements<C>,
    {
        self.registry.register_type::<C, T>(module, vtable, offset_in_full_type)
    }

    /// Finish registration and freeze the context.
    ///
    /// Registers the built-in `dyn Unknown` contract, then resolves every
    /// registration pair of the database.
    ///
    /// ## Errors
    ///
    /// `Configuration` for any invalid or unresolvable registration.
    pub fn build(mut self) -> Result<Context>
    {
        self.registry.register_builtins()?;
        if let Some(database) = &self.database {
            self.registry.register_pairs(database.registrations())?;
        }

        info!(
            module_base = %self.registry.main_module(),
            types = self.registry.len(),
            database = self.database.is_some(),
            "Context ready"
        );
        Ok(Context {
            memory: self.memory,
            database: self.database,
            registry: self.registry,
        })
    }
}

/// Read-only resolution context.
///
/// Object resolution lives in [`crate::resolver`]; this type holds the
/// state and the address helpers.
pub struct Context
{
    memory: Arc<dyn ReadMemory>,
    database: Option<Arc<SymbolDatabase>>,
    registry: TypeRegistry,
}

impl Context
{
    /// The symbol database.
    ///
    /// ## Errors
    ///
    /// `DatabaseNotLoaded` if the context was built without one.
    pub fn database(&self) -> Result<&SymbolDatabase>
    {
        self.database.as_deref().ok_or(VidlibError::DatabaseNotLoaded)
    }

    /// The symbol database, if any.
    pub fn try_database(&self) -> Option<&SymbolDatabase>
    {
        self.database.as_deref()
    }

    /// The type registry.
    pub fn registry(&self) -> &TypeRegistry
    {
        &self.registry
    }

    /// Reader for the target's memory.
    pub fn memory(&self) -> &dyn ReadMemory
    {
        self.memory.as_ref()
    }

    /// Base address of the main module.
    pub fn module_base(&self) -> Address
    {
        self.registry.main_module()
    }

    /// Pointer width of the target.
    pub fn pointer_width(&self) -> PointerWidth
    {
        self.memory.pointer_width()
    }

    /// Absolute address of a function or global; see [`SymbolDatabase::address_of`].
    ///
    /// ## Errors
    ///
    /// `DatabaseNotLoaded` plus every error of [`SymbolDatabase::address_of`].
    pub fn address_of(&self, vid: u64, extra_offset: i64, pattern_offset: i64, signature: Option<&str>) -> Result<Address>
    {
        self.database()?
            .address_of(vid, extra_offset, pattern_offset, signature, self.memory())
    }

    /// Like [`address_of`](Self::address_of) but `None` on any failure.
    pub fn try_address_of(
        &self,
        vid: u64,
        extra_offset: i64,
        pattern_offset: i64,
        signature: Option<&str>,
    ) -> Option<Address>
    {
        let database = self.try_database();
        if database.is_none() {
            debug!(vid, "Address lookup without a symbol database");
        }
        database?.try_address_of(vid, extra_offset, pattern_offset, signature, self.memory())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::database::{GlobalInfo, LoadOptions, TypeRegistration};
    use crate::memory::MemorySnapshot;
    use crate::memory_object;
    use crate::registry::{MemoryObject, ObjectHeader, Unknown};

    trait Item: MemoryObject {}
    impl Contract for dyn Item {}

    #[derive(Default)]
    struct ItemImpl
    {
        header: ObjectHeader,
    }
    impl Item for ItemImpl {}
    memory_object!(ItemImpl => dyn Item);

    fn memory() -> Arc<dyn ReadMemory>
    {
        Arc::new(MemorySnapshot::new(PointerWidth::Bits64))
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_context_is_shareable()
    {
        assert_send_sync::<Context>();
    }

    #[test]
    fn test_build_registers_unknown()
    {
        let context = ContextBuilder::new(memory(), Address::new(0x1000)).build().unwrap();
        assert!(context
            .registry()
            .without_vtable(std::any::TypeId::of::<dyn Unknown>())
            .is_some());
        assert_eq!(context.module_base(), Address::new(0x1000));
        assert!(matches!(context.database(), Err(VidlibError::DatabaseNotLoaded)));
        assert!(context.try_address_of(1, 0, 0, None).is_none());
    }

    #[test]
    fn test_build_runs_database_pairs()
    {
        let mut db = SymbolDatabase::builder();
        db.add_registration(TypeRegistration {
            contract_id: 1,
            concrete_id: 2,
            vtable_offset: Some(0x300),
            offset_in_type: 0,
        });
        db.add_global(GlobalInfo {
            vid: 4,
            begin: 0x80,
            short_name: None,
            type_name: None,
        })
        .unwrap();
        let db = db.build(LoadOptions::new(Address::new(0x10_0000))).unwrap();

        let mut builder = ContextBuilder::with_database(memory(), db.clone());
        builder.register_interface::<dyn Item>(1, 0).unwrap();
        builder.register_implementation::<ItemImpl>(2, 0).unwrap();
        let context = builder.build().unwrap();

        let descriptor = context.registry().by_vtable(Address::new(0x10_0300)).unwrap();
        assert_eq!(descriptor.contract().name(), std::any::type_name::<dyn Item>());
        assert_eq!(context.address_of(4, 0, 0, None).unwrap(), Address::new(0x10_0080));

        // same pairs without the ids registered
        let unresolved = ContextBuilder::with_database(memory(), db).build();
        assert!(matches!(unresolved, Err(VidlibError::Configuration(_))));
    }
}
