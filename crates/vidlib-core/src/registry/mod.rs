//! # Type Registry
//!
//! Startup-time table connecting contracts, concrete wrappers and the
//! vtables that identify them in foreign memory.
//!
//! Each registration creates one [`TypeDescriptor`]:
//!
//! ```text
//! (contract, concrete, vtable address?, offset in complete object, module)
//! ```
//!
//! Descriptors are indexed three ways:
//!
//! - by absolute vtable address (unique)
//! - by contract, for registrations without a vtable (unique)
//! - by concrete type (several per type, one per sub-object)
//!
//! Registration happens in two phases. First the application registers
//! fixed ids for its contracts and implementations (and any explicit
//! types); then the (contract id, concrete id) pairs stored in the symbol
//! database are resolved against those ids. Registration only exists while
//! a [`ContextBuilder`](crate::ContextBuilder) is being configured; a built
//! context is read-only.

mod object;

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace};

pub use object::{
    ConcreteObject, Contract, ContractCast, Implements, MemoryObject, ObjectHeader, TypeKey, Unknown, UnknownObject,
    VirtualObject,
};

use crate::database::TypeRegistration;
use crate::error::{Result, VidlibError};
use crate::types::Address;

/// Zero-argument constructor of a concrete wrapper.
pub type Constructor = fn() -> Box<dyn MemoryObject>;

fn construct<T: ConcreteObject>() -> Box<dyn MemoryObject>
{
    Box::new(T::default())
}

/// A concrete wrapper type as known to the registry.
#[derive(Debug, Clone)]
pub struct Implementation
{
    key: TypeKey,
    construct: Constructor,
    casts: Arc<[ContractCast]>,
}

impl Implementation
{
    /// Describe concrete type `T`.
    pub fn of<T: ConcreteObject>() -> Self
    {
        Self {
            key: TypeKey::of::<T>(),
            construct: construct::<T>,
            casts: T::contracts().into(),
        }
    }

    /// Identity of the concrete type.
    pub fn key(&self) -> TypeKey
    {
        self.key
    }

    /// Whether the type declared contract `contract`.
    pub fn implements(&self, contract: TypeId) -> bool
    {
        self.casts.iter().any(|cast| cast.contract().id() == contract)
    }
}

/// One registration: how to recognize and construct a wrapper.
pub struct TypeDescriptor
{
    contract: TypeKey,
    implementation: Implementation,
    vtable: Option<Address>,
    offset_in_full_type: u32,
    module: Address,
}

impl TypeDescriptor
{
    /// Contract the registration was made for.
    pub fn contract(&self) -> TypeKey
    {
        self.contract
    }

    /// Concrete wrapper type.
    pub fn implementation(&self) -> TypeKey
    {
        self.implementation.key
    }

    /// Absolute vtable address identifying this sub-object, if any.
    pub fn vtable(&self) -> Option<Address>
    {
        self.vtable
    }

    /// Distance from the start of the complete object to this sub-object.
    pub fn offset_in_full_type(&self) -> u32
    {
        self.offset_in_full_type
    }

    /// Base address of the module the vtable lives in.
    pub fn module(&self) -> Address
    {
        self.module
    }

    /// Whether the concrete type declared `C`.
    pub fn implements<C: ?Sized + Contract>(&self) -> bool
    {
        self.implements_contract(TypeId::of::<C>())
    }

    /// Type-erased form of [`implements`](Self::implements).
    pub fn implements_contract(&self, contract: TypeId) -> bool
    {
        self.implementation.implements(contract)
    }

    /// Construct a wrapper for the sub-object at `address`.
    ///
    /// The wrapper's base is `address - offset_in_full_type`.
    pub fn instantiate(descriptor: &Arc<Self>, address: Address) -> Box<dyn MemoryObject>
    {
        let mut object = (descriptor.implementation.construct)();
        object
            .header_mut()
            .bind(address - u64::from(descriptor.offset_in_full_type), Arc::clone(descriptor));
        object
    }

    /// Convert a wrapper built from this descriptor into contract `C`.
    ///
    /// ## Errors
    ///
    /// `Cast` if the concrete type does not implement `C`.
    pub fn cast<C: ?Sized + Contract>(&self, object: Box<dyn MemoryObject>) -> Result<Box<C>>
    {
        let cast_error = || VidlibError::Cast {
            contract: std::any::type_name::<C>(),
            concrete: self.implementation.key.name(),
        };
        let entry = self
            .implementation
            .casts
            .iter()
            .find(|cast| cast.contract().id() == TypeId::of::<C>())
            .ok_or_else(cast_error)?;
        entry.cast::<C>(object).ok_or_else(cast_error)
    }
}

impl fmt::Debug for TypeDescriptor
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("TypeDescriptor")
            .field("contract", &self.contract.name())
            .field("implementation", &self.implementation.key.name())
            .field("vtable", &self.vtable)
            .field("offset_in_full_type", &self.offset_in_full_type)
            .field("module", &self.module)
            .finish()
    }
}

/// All registrations of a context.
#[derive(Debug, Default)]
pub struct TypeRegistry
{
    main_module: Address,

    by_vtable: HashMap<Address, Arc<TypeDescriptor>>,
    by_contract_without_vtable: HashMap<TypeId, Arc<TypeDescriptor>>,
    contracts_with_vtable: HashSet<TypeId>,
    by_implementation: HashMap<TypeId, SmallVec<[Arc<TypeDescriptor>; 2]>>,
    all: Vec<Arc<TypeDescriptor>>,

    interfaces: HashMap<u32, TypeKey>,
    interface_vids: HashMap<u64, TypeKey>,
    implementations: HashMap<u32, Implementation>,
    implementation_vids: HashMap<u64, TypeKey>,
    vid_of_implementation: HashMap<TypeId, u64>,
}

impl TypeRegistry
{
    /// Empty registry; a module base of zero in a registration means `main_module`.
    pub fn new(main_module: Address) -> Self
    {
        Self {
            main_module,
            ..Self::default()
        }
    }

    /// Base address of the main module.
    pub fn main_module(&self) -> Address
    {
        self.main_module
    }

    /// Assign a fixed id (and optional VID) to contract `C`.
    ///
    /// ## Errors
    ///
    /// `Configuration` if the id is taken. A taken VID is ignored; the
    /// first contract keeps it.
    pub fn register_interface<C: ?Sized + Contract>(&mut self, id: u32, vid: u64) -> Result<()>
    {
        if self.interfaces.contains_key(&id) {
            return Err(VidlibError::Configuration(format!(
                "an interface with id {id} was already registered"
            )));
        }
        let key = TypeKey::of::<C>();
        self.interfaces.insert(id, key);
        if vid != 0 {
            self.interface_vids.entry(vid).or_insert(key);
        }
        Ok(())
    }

    /// Assign a fixed id (and optional VID) to concrete type `T`.
    ///
    /// ## Errors
    ///
    /// `Configuration` if the id is taken.
    pub fn register_implementation<T: ConcreteObject>(&mut self, id: u32, vid: u64) -> Result<()>
    {
        if self.implementations.contains_key(&id) {
            return Err(VidlibError::Configuration(format!(
                "an implementation with id {id} was already registered"
            )));
        }
        let implementation = Implementation::of::<T>();
        if vid != 0 {
            self.implementation_vids.insert(vid, implementation.key);
            self.vid_of_implementation.insert(implementation.key.id(), vid);
        }
        self.implementations.insert(id, implementation);
        Ok(())
    }

    /// Register concrete `T` as the wrapper for contract `C`.
    ///
    /// `vtable` is the absolute vtable address identifying the sub-object
    /// (`None` for types located only by contract); `offset_in_full_type`
    /// is the sub-object's distance from the start of the complete object.
    ///
    /// ## Errors
    ///
    /// `Configuration` for a negative offset, a vtable that is already
    /// registered, or a second vtable-less registration of `C`. Nothing is
    /// inserted on error.
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
        self.insert(
            TypeKey::of::<C>(),
            Implementation::of::<T>(),
            module,
            vtable,
            offset_in_full_type,
        )
    }

    /// Register the built-in [`Unknown`] contract.
    pub(crate) fn register_builtins(&mut self) -> Result<()>
    {
        self.register_type::<dyn Unknown, UnknownObject>(Address::NULL, None, 0)?;
        Ok(())
    }

    /// Resolve a database registration pair against the registered ids.
    ///
    /// ## Errors
    ///
    /// `Configuration` for unknown ids, a concrete type that does not
    /// implement the contract, or any [`register_type`](Self::register_type) error.
    pub fn register_pair(&mut self, pair: &TypeRegistration) -> Result<Arc<TypeDescriptor>>
    {
        let contract = *self.interfaces.get(&pair.contract_id).ok_or_else(|| {
            VidlibError::Configuration(format!("no interface type with id {} is registered", pair.contract_id))
        })?;
        let implementation = self.implementations.get(&pair.concrete_id).cloned().ok_or_else(|| {
            VidlibError::Configuration(format!(
                "no implementation type with id {} is registered",
                pair.concrete_id
            ))
        })?;
        if !implementation.implements(contract.id()) {
            return Err(VidlibError::Configuration(format!(
                "`{}` does not implement `{}`",
                implementation.key, contract
            )));
        }

        let module = self.main_module;
        let vtable = pair
            .vtable_offset
            .filter(|offset| *offset >= 0)
            .map(|offset| module + u64::from(offset.unsigned_abs()));
        self.insert(contract, implementation, module, vtable, pair.offset_in_type)
    }

    fn insert(
        &mut self,
        contract: TypeKey,
        implementation: Implementation,
        module: Address,
        vtable: Option<Address>,
        offset_in_full_type: i32,
    ) -> Result<Arc<TypeDescriptor>>
    {
        let offset = u32::try_from(offset_in_full_type).map_err(|_| {
            VidlibError::Configuration(format!(
                "negative offset {offset_in_full_type} registering `{}` for `{contract}`",
                implementation.key
            ))
        })?;

        match vtable {
            Some(address) if self.by_vtable.contains_key(&address) => {
                return Err(VidlibError::Configuration(format!(
                    "multiple type registrations with vtable {address} (`{contract}`)"
                )));
            }
            None if self.by_contract_without_vtable.contains_key(&contract.id()) => {
                return Err(VidlibError::Configuration(format!(
                    "multiple registrations of `{contract}` without a vtable"
                )));
            }
            _ => {}
        }

        let descriptor = Arc::new(TypeDescriptor {
            contract,
            implementation,
            vtable,
            offset_in_full_type: offset,
            module: if module.is_null() { self.main_module } else { module },
        });
        trace!(?descriptor, "Registered type");

        match vtable {
            Some(address) => {
                self.by_vtable.insert(address, Arc::clone(&descriptor));
                self.contracts_with_vtable.insert(contract.id());
            }
            None => {
                self.by_contract_without_vtable.insert(contract.id(), Arc::clone(&descriptor));
            }
        }
        self.by_implementation
            .entry(descriptor.implementation().id())
            .or_default()
            .push(Arc::clone(&descriptor));
        self.all.push(Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Run the second registration phase over `pairs`.
    pub(crate) fn register_pairs(&mut self, pairs: &[TypeRegistration]) -> Result<()>
    {
        for pair in pairs {
            self.register_pair(pair)?;
        }
        debug!(
            pairs = pairs.len(),
            descriptors = self.all.len(),
            "Registered database type pairs"
        );
        Ok(())
    }

    /// Descriptor whose vtable is `vtable`.
    pub fn by_vtable(&self, vtable: Address) -> Option<&Arc<TypeDescriptor>>
    {
        self.by_vtable.get(&vtable)
    }

    /// Vtable-less descriptor of `contract`.
    pub fn without_vtable(&self, contract: TypeId) -> Option<&Arc<TypeDescriptor>>
    {
        self.by_contract_without_vtable.get(&contract)
    }

    /// Whether any registration of `contract` carries a vtable.
    pub fn has_vtable(&self, contract: TypeId) -> bool
    {
        self.contracts_with_vtable.contains(&contract)
    }

    /// All descriptors of a concrete type.
    pub fn descriptors_of(&self, implementation: TypeId) -> &[Arc<TypeDescriptor>]
    {
        self.by_implementation.get(&implementation).map_or(&[][..], |list| list.as_slice())
    }

    /// Every descriptor in registration order.
    pub fn all(&self) -> &[Arc<TypeDescriptor>]
    {
        &self.all
    }

    /// Contract registered under `id`.
    pub fn interface(&self, id: u32) -> Option<TypeKey>
    {
        self.interfaces.get(&id).copied()
    }

    /// Contract registered with VID `vid`.
    pub fn interface_by_vid(&self, vid: u64) -> Option<TypeKey>
    {
        self.interface_vids.get(&vid).copied()
    }

    /// Concrete type registered under `id`.
    pub fn implementation(&self, id: u32) -> Option<TypeKey>
    {
        self.implementations.get(&id).map(Implementation::key)
    }

    /// Concrete type registered with VID `vid`.
    pub fn implementation_by_vid(&self, vid: u64) -> Option<TypeKey>
    {
        self.implementation_vids.get(&vid).copied()
    }

    /// VID a concrete type was registered with.
    pub fn vid_of(&self, implementation: TypeId) -> Option<u64>
    {
        self.vid_of_implementation.get(&implementation).copied()
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize
    {
        self.all.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool
    {
        self.all.is_empty()
    }
}
