//! # Object Resolver
//!
//! Turns raw addresses into typed wrappers:
//!
//! ```text
//! address ──read──▶ vtable pointer ──registry──▶ descriptor ──construct──▶ wrapper
//! ```
//!
//! The wrapper's base is moved back by the descriptor's offset, so a pointer
//! to any registered sub-object yields a wrapper of the complete object.
//!
//! Expected absence (null address, vtable nobody registered) is `Ok(None)`.
//! Unreadable memory is an error: a pointer that cannot be read usually
//! means the caller is holding garbage.

use std::any::TypeId;
use std::sync::Arc;

use tracing::trace;

use crate::context::Context;
use crate::error::{Result, VidlibError};
use crate::memory::ReadMemory;
use crate::registry::{Contract, MemoryObject, TypeDescriptor, TypeKey, VirtualObject};
use crate::types::Address;

impl Context
{
    /// Wrapper of contract `C` for the object at `address`.
    ///
    /// If `C` was registered with a vtable, the pointer at `address` is read
    /// and looked up; an unknown vtable yields `Ok(None)`. Otherwise the
    /// contract's vtable-less registration is used.
    ///
    /// ## Errors
    ///
    /// - `MemoryRead`: the vtable pointer cannot be read
    /// - `Cast`: the object found does not implement `C`
    /// - `Configuration`: `C` has no registration at all
    pub fn from_address<C: ?Sized + Contract>(&self, address: Address) -> Result<Option<Box<C>>>
    {
        if address.is_null() {
            return Ok(None);
        }

        let Some(descriptor) = self.contract_descriptor_at(TypeKey::of::<C>(), address)? else {
            return Ok(None);
        };
        let object = TypeDescriptor::instantiate(descriptor, address);
        descriptor.cast::<C>(object).map(Some)
    }

    /// Wrapper of the type registered with VID `vid`.
    ///
    /// For an implementation VID this uses the implementation's descriptor at
    /// offset 0 (or the smallest offset). If that descriptor has a vtable the
    /// object goes through [`virtual_from_address`](Self::virtual_from_address)
    /// so a wrong vtable yields `None`. An interface VID resolves like
    /// [`from_address`](Self::from_address) does for that contract.
    ///
    /// ## Errors
    ///
    /// - `Configuration`: unknown VID, or a type with no descriptors
    /// - `MemoryRead`: the vtable pointer cannot be read
    /// - `Cast`: an interface VID and an object that does not implement it
    pub fn from_vid(&self, vid: u64, address: Address) -> Result<Option<Box<dyn MemoryObject>>>
    {
        if address.is_null() {
            return Ok(None);
        }

        let registry = self.registry();
        let Some(implementation) = registry.implementation_by_vid(vid) else {
            let contract = registry
                .interface_by_vid(vid)
                .ok_or_else(|| VidlibError::Configuration(format!("type with id {vid} was not found")))?;
            return Ok(self
                .contract_descriptor_at(contract, address)?
                .map(|descriptor| TypeDescriptor::instantiate(descriptor, address)));
        };
        let descriptor = registry
            .descriptors_of(implementation.id())
            .iter()
            .min_by_key(|descriptor| descriptor.offset_in_full_type())
            .ok_or_else(|| {
                VidlibError::Configuration(format!("type `{implementation}` does not have any registered descriptors"))
            })?;

        if descriptor.vtable().is_some() {
            return Ok(self
                .virtual_descriptor_at(address)?
                .map(|found| TypeDescriptor::instantiate(found, address)));
        }
        Ok(Some(TypeDescriptor::instantiate(descriptor, address)))
    }

    /// Wrapper of any registered polymorphic object at `address`.
    ///
    /// Returns `None` for unknown vtables and for objects whose concrete
    /// type does not implement [`VirtualObject`].
    ///
    /// ## Errors
    ///
    /// `MemoryRead` if the vtable pointer cannot be read.
    pub fn virtual_from_address(&self, address: Address) -> Result<Option<Box<dyn VirtualObject>>>
    {
        if address.is_null() {
            return Ok(None);
        }
        let Some(descriptor) = self.virtual_descriptor_at(address)? else {
            return Ok(None);
        };
        let object = TypeDescriptor::instantiate(descriptor, address);
        Ok(descriptor.cast::<dyn VirtualObject>(object).ok())
    }

    /// Address of the sub-object of `object` that implements `C`.
    ///
    /// `None` if the concrete type does not implement `C`.
    pub fn cast_address<C: ?Sized + Contract>(&self, object: &(impl MemoryObject + ?Sized)) -> Option<Address>
    {
        let descriptors = self.registry().descriptors_of(object.concrete_type());
        if let Some(descriptor) = descriptors
            .iter()
            .find(|descriptor| descriptor.contract().id() == TypeId::of::<C>())
        {
            return Some(object.address() + u64::from(descriptor.offset_in_full_type()));
        }

        let implements = descriptors.iter().any(|descriptor| descriptor.implements::<C>())
            || object
                .header()
                .descriptor()
                .is_some_and(|descriptor| descriptor.implements::<C>());
        implements.then(|| object.address())
    }

    /// Vtable pointer of the `C` sub-object of `object`.
    ///
    /// ## Errors
    ///
    /// `MemoryRead` if the pointer cannot be read.
    pub fn vtable_of<C: ?Sized + Contract>(&self, object: &(impl MemoryObject + ?Sized)) -> Result<Option<Address>>
    {
        match self.cast_address::<C>(object) {
            Some(address) if !address.is_null() => self.memory().read_pointer(address).map(Some),
            _ => Ok(None),
        }
    }

    /// Whether the object's bytes are currently readable.
    ///
    /// The size comes from the database entry of the object's implementation
    /// VID, or is one pointer when unknown.
    pub fn is_valid(&self, object: &(impl MemoryObject + ?Sized)) -> bool
    {
        let address = object.address();
        if address.is_null() {
            return false;
        }
        let size = self
            .type_info_of(object)
            .and_then(|info| info.size)
            .and_then(|size| usize::try_from(size).ok())
            .filter(|size| *size > 0)
            .unwrap_or_else(|| self.pointer_width().size());
        self.memory().is_readable(address, size)
    }

    /// Display name of the object's type from the database, or `unknown`.
    pub fn type_name(&self, object: &(impl MemoryObject + ?Sized)) -> String
    {
        self.type_info_of(object)
            .map_or_else(|| "unknown".to_string(), |info| info.name.clone())
    }

    fn type_info_of(&self, object: &(impl MemoryObject + ?Sized)) -> Option<&crate::database::TypeInfo>
    {
        let vid = self.registry().vid_of(object.concrete_type())?;
        self.try_database()?.type_info(vid)
    }

    fn descriptor_at(&self, address: Address) -> Result<Option<&Arc<TypeDescriptor>>>
    {
        let vtable = self.memory().read_pointer(address)?;
        let descriptor = self.registry().by_vtable(vtable);
        if descriptor.is_none() {
            trace!(%address, %vtable, "No type registered for vtable");
        }
        Ok(descriptor)
    }

    /// Descriptor used to wrap the object at `address` as `contract`.
    fn contract_descriptor_at(&self, contract: TypeKey, address: Address) -> Result<Option<&Arc<TypeDescriptor>>>
    {
        if self.registry().has_vtable(contract.id()) {
            let Some(descriptor) = self.descriptor_at(address)? else {
                return Ok(None);
            };
            if !descriptor.implements_contract(contract.id()) {
                return Err(VidlibError::Cast {
                    contract: contract.name(),
                    concrete: descriptor.implementation().name(),
                });
            }
            return Ok(Some(descriptor));
        }

        self.registry()
            .without_vtable(contract.id())
            .map(Some)
            .ok_or_else(|| VidlibError::Configuration(format!("type `{contract}` is not registered")))
    }

    fn virtual_descriptor_at(&self, address: Address) -> Result<Option<&Arc<TypeDescriptor>>>
    {
        Ok(self
            .descriptor_at(address)?
            .filter(|descriptor| descriptor.implements::<dyn VirtualObject>()))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::database::{LoadOptions, SymbolDatabase, TypeInfo};
    use crate::memory::{MemorySnapshot, PointerWidth};
    use crate::memory_object;
    use crate::registry::{ObjectHeader, Unknown};
    use crate::ContextBuilder;

    trait Base: MemoryObject {}
    impl Contract for dyn Base {}

    trait Other: MemoryObject {}
    impl Contract for dyn Other {}

    impl std::fmt::Debug for dyn Base
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
        {
            f.debug_struct(self.concrete_name()).field("address", &self.address()).finish()
        }
    }

    impl std::fmt::Debug for dyn Other
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
        {
            f.debug_struct(self.concrete_name()).field("address", &self.address()).finish()
        }
    }

    #[derive(Default)]
    struct Derived
    {
        header: ObjectHeader,
    }
    impl Base for Derived {}
    impl VirtualObject for Derived {}
    memory_object!(Derived => dyn Base, dyn VirtualObject);

    fn context(memory: MemorySnapshot) -> Context
    {
        let mut builder = ContextBuilder::new(Arc::new(memory), Address::NULL);
        builder
            .register_type::<dyn Base, Derived>(Address::NULL, Some(Address::new(0xAABB)), 16)
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_null_address_is_none()
    {
        let context = context(MemorySnapshot::new(PointerWidth::Bits64));
        assert!(context.from_address::<dyn Base>(Address::NULL).unwrap().is_none());
        assert!(context.virtual_from_address(Address::NULL).unwrap().is_none());
    }

    #[test]
    fn test_offset_moves_base()
    {
        let mut memory = MemorySnapshot::new(PointerWidth::Bits64);
        memory.write_pointer(Address::new(0x5010), Address::new(0xAABB));
        let context = context(memory);

        let object = context.from_address::<dyn Base>(Address::new(0x5010)).unwrap().unwrap();
        assert_eq!(object.address(), Address::new(0x5000));
        assert_eq!(context.cast_address::<dyn Base>(object.as_ref()), Some(Address::new(0x5010)));
        assert_eq!(
            context.vtable_of::<dyn Base>(object.as_ref()).unwrap(),
            Some(Address::new(0xAABB))
        );
        assert!(context.cast_address::<dyn Other>(object.as_ref()).is_none());
    }

    #[test]
    fn test_unknown_vtable_and_bad_pointer()
    {
        let mut memory = MemorySnapshot::new(PointerWidth::Bits64);
        memory.write_pointer(Address::new(0x6000), Address::new(0x1234));
        let context = context(memory);

        assert!(context.from_address::<dyn Base>(Address::new(0x6000)).unwrap().is_none());
        let err = context.from_address::<dyn Base>(Address::new(0x7000)).unwrap_err();
        assert!(matches!(err, VidlibError::MemoryRead { .. }));
    }

    #[test]
    fn test_cast_to_unimplemented_contract_fails()
    {
        let mut memory = MemorySnapshot::new(PointerWidth::Bits64);
        memory.write_pointer(Address::new(0x5010), Address::new(0xAABB));
        let mut builder = ContextBuilder::new(Arc::new(memory), Address::NULL);
        builder
            .register_type::<dyn Base, Derived>(Address::NULL, Some(Address::new(0xAABB)), 16)
            .unwrap();
        builder.register_type::<dyn Other, Derived2>(Address::NULL, Some(Address::new(0xCCDD)), 0).unwrap();
        let context = builder.build().unwrap();

        let err = context.from_address::<dyn Other>(Address::new(0x5010)).unwrap_err();
        assert!(matches!(err, VidlibError::Cast { .. }));
    }

    #[derive(Default)]
    struct Derived2
    {
        header: ObjectHeader,
    }
    impl Other for Derived2 {}
    memory_object!(Derived2 => dyn Other);

    #[test]
    fn test_unregistered_contract_is_configuration_error()
    {
        let context = context(MemorySnapshot::new(PointerWidth::Bits64));
        let err = context.from_address::<dyn Other>(Address::new(0x10)).unwrap_err();
        assert!(matches!(err, VidlibError::Configuration(_)));

        let unknown = context.from_address::<dyn Unknown>(Address::new(0x10)).unwrap().unwrap();
        assert_eq!(unknown.address(), Address::new(0x10));
    }

    #[test]
    fn test_virtual_from_address_requires_virtual_object()
    {
        let mut memory = MemorySnapshot::new(PointerWidth::Bits64);
        memory.write_pointer(Address::new(0x5010), Address::new(0xAABB));
        memory.write_pointer(Address::new(0x8000), Address::new(0xCCDD));
        let mut builder = ContextBuilder::new(Arc::new(memory), Address::NULL);
        builder
            .register_type::<dyn Base, Derived>(Address::NULL, Some(Address::new(0xAABB)), 16)
            .unwrap();
        builder.register_type::<dyn Other, Derived2>(Address::NULL, Some(Address::new(0xCCDD)), 0).unwrap();
        let context = builder.build().unwrap();

        let object = context.virtual_from_address(Address::new(0x5010)).unwrap().unwrap();
        assert_eq!(object.address(), Address::new(0x5000));
        assert!(context.virtual_from_address(Address::new(0x8000)).unwrap().is_none());
    }

    #[test]
    fn test_from_vid_validity_and_names()
    {
        let mut memory = MemorySnapshot::new(PointerWidth::Bits64);
        memory.insert(Address::new(0x5000), vec![0; 0x20]);
        memory.write_pointer(Address::new(0x5010), Address::new(0xAABB));
        memory.write_pointer(Address::new(0x9000), Address::new(0x1234));

        let mut db = SymbolDatabase::builder();
        db.add_type(TypeInfo {
            vid: 777,
            vtable: 0xAABB,
            name: "class Derived".to_string(),
            size: Some(0x20),
            fields: Vec::new(),
        })
        .unwrap();
        let db = db.build(LoadOptions::default()).unwrap();

        let mut builder = ContextBuilder::with_database(Arc::new(memory), db);
        builder.register_implementation::<Derived>(5, 777).unwrap();
        builder
            .register_type::<dyn Base, Derived>(Address::NULL, Some(Address::new(0xAABB)), 16)
            .unwrap();
        let context = builder.build().unwrap();

        let object = context.from_vid(777, Address::new(0x5010)).unwrap().unwrap();
        assert_eq!(object.address(), Address::new(0x5000));
        assert_eq!(context.type_name(object.as_ref()), "class Derived");
        assert!(context.is_valid(object.as_ref()));

        assert!(context.from_vid(777, Address::new(0x9000)).unwrap().is_none());
        assert!(matches!(
            context.from_vid(778, Address::new(0x5010)),
            Err(VidlibError::Configuration(_))
        ));

        let unknown = context.from_address::<dyn Unknown>(Address::new(0x7000_0000)).unwrap().unwrap();
        assert_eq!(context.type_name(unknown.as_ref()), "unknown");
        assert!(!context.is_valid(unknown.as_ref()));
    }
}
