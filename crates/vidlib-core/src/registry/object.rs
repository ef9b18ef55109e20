//! Wrapper objects over foreign memory.
//!
//! A wrapper is a small Rust value holding the base address of a foreign
//! object plus the descriptor it was resolved through. It owns no foreign
//! memory and may become invalid whenever the target frees the object.
//!
//! Wrappers are split in two:
//!
//! - **Contracts**: `dyn Trait` types (with [`MemoryObject`] as supertrait)
//!   that callers ask for, e.g. `dyn Actor`.
//! - **Concrete types**: `Default` structs carrying an [`ObjectHeader`] that
//!   implement one or more contracts. [`memory_object!`](crate::memory_object)
//!   generates the glue.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use super::TypeDescriptor;
use crate::types::Address;

/// Address and descriptor of a wrapper.
#[derive(Debug, Clone, Default)]
pub struct ObjectHeader
{
    address: Address,
    descriptor: Option<Arc<TypeDescriptor>>,
}

impl ObjectHeader
{
    /// Header for a wrapper created by hand at `address`.
    pub fn at(address: Address) -> Self
    {
        Self {
            address,
            descriptor: None,
        }
    }

    /// Base address of the complete foreign object.
    pub fn address(&self) -> Address
    {
        self.address
    }

    /// Descriptor the wrapper was resolved through, if any.
    pub fn descriptor(&self) -> Option<&Arc<TypeDescriptor>>
    {
        self.descriptor.as_ref()
    }

    pub(crate) fn bind(&mut self, address: Address, descriptor: Arc<TypeDescriptor>)
    {
        self.address = address;
        self.descriptor = Some(descriptor);
    }
}

/// Common interface of every wrapper.
///
/// Implemented through [`memory_object!`](crate::memory_object); the
/// implementing struct needs a field `header: ObjectHeader`.
pub trait MemoryObject: Any + Send + Sync
{
    /// Address and descriptor.
    fn header(&self) -> &ObjectHeader;

    /// Mutable header, used when the resolver positions a new wrapper.
    fn header_mut(&mut self) -> &mut ObjectHeader;

    /// Convert into `Box<dyn Any>` for downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    /// `TypeId` of the concrete wrapper struct.
    fn concrete_type(&self) -> TypeId;

    /// Name of the concrete wrapper struct.
    fn concrete_name(&self) -> &'static str;

    /// Base address of the complete foreign object.
    fn address(&self) -> Address
    {
        self.header().address()
    }
}

impl fmt::Debug for dyn MemoryObject
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct(self.concrete_name()).field("address", &self.address()).finish()
    }
}

/// Marker for contract types.
///
/// Implement it for the trait object type of every contract trait:
///
/// ```
/// use vidlib_core::registry::{Contract, MemoryObject};
///
/// pub trait Actor: MemoryObject {}
/// impl Contract for dyn Actor {}
/// ```
pub trait Contract: MemoryObject + 'static {}

impl Contract for dyn MemoryObject {}

/// A concrete wrapper that statically satisfies contract `C`.
pub trait Implements<C: ?Sized + Contract>: MemoryObject
{
    /// Unsize into the contract.
    fn upcast(self: Box<Self>) -> Box<C>;
}

/// A concrete wrapper the registry can construct.
pub trait ConcreteObject: MemoryObject + Default + Sized
{
    /// Every contract this type implements, `dyn MemoryObject` included.
    fn contracts() -> Vec<ContractCast>;
}

/// Identity of a Rust type as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeKey
{
    id: TypeId,
    name: &'static str,
}

impl TypeKey
{
    /// Key of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self
    {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// `TypeId` of the type.
    pub fn id(&self) -> TypeId
    {
        self.id
    }

    /// Type name, for diagnostics only.
    pub fn name(&self) -> &'static str
    {
        self.name
    }
}

impl fmt::Display for TypeKey
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name)
    }
}

type Caster<C> = fn(Box<dyn MemoryObject>) -> Option<Box<C>>;

fn cast_boxed<C: ?Sized + Contract, T: Implements<C>>(object: Box<dyn MemoryObject>) -> Option<Box<C>>
{
    let concrete = object.into_any().downcast::<T>().ok()?;
    Some(<T as Implements<C>>::upcast(concrete))
}

/// Type-erased conversion from a constructed wrapper to one contract.
pub struct ContractCast
{
    contract: TypeKey,
    caster: Box<dyn Any + Send + Sync>,
}

impl ContractCast
{
    /// Conversion of concrete `T` into contract `C`.
    pub fn of<C: ?Sized + Contract, T: Implements<C>>() -> Self
    {
        let caster: Caster<C> = cast_boxed::<C, T>;
        Self {
            contract: TypeKey::of::<C>(),
            caster: Box::new(caster),
        }
    }

    /// Contract this conversion produces.
    pub fn contract(&self) -> TypeKey
    {
        self.contract
    }

    /// Convert `object`; `None` if `C` is not this entry's contract or the
    /// object is not of the concrete type the entry was made for.
    pub fn cast<C: ?Sized + Contract>(&self, object: Box<dyn MemoryObject>) -> Option<Box<C>>
    {
        let caster = self.caster.downcast_ref::<Caster<C>>()?;
        caster(object)
    }
}

impl fmt::Debug for ContractCast
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ContractCast").field("contract", &self.contract.name).finish()
    }
}

/// Implement [`MemoryObject`], [`ConcreteObject`] and [`Implements`] for a wrapper.
///
/// The struct must be `Default` and have a field `header: ObjectHeader`.
/// List every contract the struct implements; `dyn MemoryObject` is added
/// automatically and must not be listed.
///
/// ```
/// use vidlib_core::memory_object;
/// use vidlib_core::registry::{Contract, MemoryObject, ObjectHeader};
///
/// pub trait Actor: MemoryObject {}
/// impl Contract for dyn Actor {}
///
/// #[derive(Default)]
/// struct ActorImpl
/// {
///     header: ObjectHeader,
/// }
///
/// impl Actor for ActorImpl {}
/// memory_object!(ActorImpl => dyn Actor);
/// ```
#[macro_export]
macro_rules! memory_object {
    ($concrete:ty $(=> $($contract:ty),* $(,)?)?) => {
        impl $crate::registry::MemoryObject for $concrete
        {
            fn header(&self) -> &$crate::registry::ObjectHeader
            {
                &self.header
            }

            fn header_mut(&mut self) -> &mut $crate::registry::ObjectHeader
            {
                &mut self.header
            }

            fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn ::std::any::Any>
            {
                self
            }

            fn concrete_type(&self) -> ::std::any::TypeId
            {
                ::std::any::TypeId::of::<$concrete>()
            }

            fn concrete_name(&self) -> &'static str
            {
                ::std::any::type_name::<$concrete>()
            }
        }

        impl $crate::registry::Implements<dyn $crate::registry::MemoryObject> for $concrete
        {
            fn upcast(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn $crate::registry::MemoryObject>
            {
                self
            }
        }

        $($(
            impl $crate::registry::Implements<$contract> for $concrete
            {
                fn upcast(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<$contract>
                {
                    self
                }
            }
        )*)?

        impl $crate::registry::ConcreteObject for $concrete
        {
            fn contracts() -> ::std::vec::Vec<$crate::registry::ContractCast>
            {
                ::std::vec![
                    $crate::registry::ContractCast::of::<dyn $crate::registry::MemoryObject, $concrete>(),
                    $($($crate::registry::ContractCast::of::<$contract, $concrete>(),)*)?
                ]
            }
        }
    };
}

/// Placeholder contract for foreign objects of unknown type.
///
/// Registered without a vtable when a context is built, so
/// `from_address::<dyn Unknown>` always yields a wrapper.
pub trait Unknown: MemoryObject {}

impl Contract for dyn Unknown {}

/// Wrapper behind [`Unknown`].
#[derive(Debug, Default)]
pub struct UnknownObject
{
    header: ObjectHeader,
}

impl Unknown for UnknownObject {}

crate::memory_object!(UnknownObject => dyn Unknown);

/// Contract of polymorphic foreign objects (those identified by a vtable).
///
/// Concrete wrappers of virtual types list `dyn VirtualObject` among their
/// contracts; [`Context::virtual_from_address`](crate::Context::virtual_from_address)
/// only returns objects that do.
pub trait VirtualObject: MemoryObject {}

impl Contract for dyn VirtualObject {}
