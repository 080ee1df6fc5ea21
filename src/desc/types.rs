//! The explicit capability model a type exposes to the engine.
//!
//! There is no runtime reflection: each serializable type describes itself once through
//! [`SerialType::type_info`], usually generated by `#[derive(Serializable)]`. The description
//! carries the wire name, the field accessor table, the base ("superclass") link, the bound
//! hooks and the shape used to compute a default version identifier.

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use super::ClassDesc;
use super::field::FieldSpec;
use crate::error::Result;
use crate::format::modifiers;
use crate::hooks::{
    self, Externalizable, ReadObject, ReadObjectNoData, ReadResolve, WriteObject, WriteReplace,
};
use crate::input::ObjectInput;
use crate::output::ObjectOutput;
use crate::value::{Serializable, Value};

/// Returns the (cached) local descriptor of a type.
pub type DescLookup = fn() -> Result<Arc<ClassDesc>>;
/// Projects an instance onto its base part.
pub type Upcast = fn(&dyn Any) -> Option<&dyn Any>;
/// Mutable counterpart of [`Upcast`].
pub type UpcastMut = fn(&mut dyn Any) -> Option<&mut dyn Any>;
/// Allocates a default instance without running any user construction logic.
pub type Factory = fn() -> Box<dyn Serializable>;

pub(crate) type WriteObjectFn = fn(&dyn Any, &mut dyn ObjectOutput) -> Result<()>;
pub(crate) type ReadObjectFn = fn(&mut dyn Any, &mut dyn ObjectInput) -> Result<()>;
pub(crate) type ReadObjectNoDataFn = fn(&mut dyn Any) -> Result<()>;
pub(crate) type ReplaceFn = fn(&dyn Any) -> Result<Option<Value>>;

/// Implemented by every type that can take part in an object graph.
pub trait SerialType: Any + Sized {
    /// Describes the type. Called once per process; the result is cached in its descriptor.
    fn type_info() -> TypeInfo;
}

/// Implemented by fieldless enums; constants travel by name.
pub trait SerialEnum: SerialType + Copy {
    /// Wire name of the enum type.
    const WIRE_NAME: &'static str;
    /// Constant names in declaration order.
    const CONSTANTS: &'static [&'static str];

    /// Position of this constant in [`SerialEnum::CONSTANTS`].
    fn ordinal(&self) -> usize;

    /// Constant at `ordinal`.
    fn from_ordinal(ordinal: usize) -> Option<Self>;
}

/// Serialization capability of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Default field protocol, optionally customized with hooks.
    Serializable,
    /// Content is written by [`Externalizable`] methods.
    Externalizable,
    /// Enum constants, written by name.
    Enum(&'static [&'static str]),
    /// Known to the registry (e.g. as an array component) but never written.
    NotSerializable,
}

/// Built-in types the engine treats specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Special {
    Object,
    String,
    Class,
    Descriptor,
    EnumBase,
    ProxyBase,
}

/// Inheritance rule of the substitution hooks.
///
/// A hook declared on a base type applies to derived types according to its visibility:
/// public and protected hooks always, package hooks only within the same package (the wire name
/// up to its last `.`), private hooks never.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Inherited everywhere.
    Public,
    /// Inherited everywhere.
    Protected,
    /// Inherited inside the declaring package only.
    Package,
    /// Only for the declaring type.
    #[default]
    Private,
}

/// A member entry of a [`TypeShape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Member name; ignored for constructors.
    pub name: &'static str,
    /// Access and property modifiers (see [`crate::format::modifiers`]).
    pub modifiers: u16,
    /// JVM-style descriptor, e.g. `I` or `(Ljava/lang/String;)V`.
    pub signature: &'static str,
}

/// Declared shape of a type beyond its serial fields.
///
/// Only consulted when computing a default version identifier, so two builds of a type agree
/// on the identifier exactly when they agree on this shape.
#[derive(Debug, Clone, Default)]
pub struct TypeShape {
    /// Class modifiers.
    pub modifiers: u16,
    /// Directly implemented interfaces.
    pub interfaces: Vec<&'static str>,
    /// Whether the type has a static initializer.
    pub static_initializer: bool,
    /// Declared constructors.
    pub constructors: Vec<Member>,
    /// Declared methods.
    pub methods: Vec<Member>,
    /// Declared fields that are not serial fields (transient, static).
    pub fields: Vec<Member>,
}

/// An explicitly declared persistent field.
///
/// When a type declares its persistent fields, only those are written, whether or not an actual
/// field backs them. Unbacked ones can only be reached with put-field / get-field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentField {
    /// Field name.
    pub name: &'static str,
    /// Type signature, e.g. `I` or `Ljava/lang/String;`.
    pub signature: &'static str,
    /// Whether the value is written unshared.
    pub unshared: bool,
}

/// Link from a type to its serializable base part.
#[derive(Clone, Copy)]
pub struct BaseLink {
    pub(crate) lookup: DescLookup,
    pub(crate) upcast: Upcast,
    pub(crate) upcast_mut: UpcastMut,
}

impl std::fmt::Debug for BaseLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseLink").finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Default)]
pub(crate) struct Hooks {
    pub(crate) write_object: Option<WriteObjectFn>,
    pub(crate) read_object: Option<ReadObjectFn>,
    pub(crate) read_object_no_data: Option<ReadObjectNoDataFn>,
    pub(crate) write_external: Option<WriteObjectFn>,
    pub(crate) read_external: Option<ReadObjectFn>,
    pub(crate) write_replace: Option<(ReplaceFn, Visibility)>,
    pub(crate) read_resolve: Option<(ReplaceFn, Visibility)>,
}

/// Self-description of a serializable type. Build it with [`TypeInfo::builder`].
pub struct TypeInfo {
    pub(crate) name: &'static str,
    pub(crate) type_id: TypeId,
    pub(crate) rust_name: &'static str,
    pub(crate) kind: TypeKind,
    pub(crate) special: Option<Special>,
    pub(crate) suid: Option<i64>,
    pub(crate) fields: Vec<FieldSpec>,
    pub(crate) persistent_fields: Option<Vec<PersistentField>>,
    pub(crate) base: Option<BaseLink>,
    pub(crate) hooks: Hooks,
    pub(crate) factory: Option<Factory>,
    pub(crate) proxy_interfaces: Option<Vec<&'static str>>,
    pub(crate) shape: TypeShape,
    pub(crate) lookup: DescLookup,
}

impl std::fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("rust_name", &self.rust_name)
            .field("kind", &self.kind)
            .field("suid", &self.suid)
            .field("fields", &self.fields.len())
            .finish_non_exhaustive()
    }
}

impl TypeInfo {
    /// Starts describing `T` under the wire name `name` (e.g. `"com.example.Point"`).
    pub fn builder<T: SerialType>(name: &'static str) -> TypeInfoBuilder<T> {
        TypeInfoBuilder {
            info: TypeInfo {
                name,
                type_id: TypeId::of::<T>(),
                rust_name: std::any::type_name::<T>(),
                kind: TypeKind::Serializable,
                special: None,
                suid: None,
                fields: Vec::new(),
                persistent_fields: None,
                base: None,
                hooks: Hooks::default(),
                factory: None,
                proxy_interfaces: None,
                shape: TypeShape {
                    modifiers: modifiers::PUBLIC,
                    ..TypeShape::default()
                },
                lookup: super::lookup::<T>,
            },
            interfaces_declared: false,
            _marker: PhantomData,
        }
    }

    /// Wire name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Capability kind.
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Package part of the wire name.
    pub(crate) fn package(&self) -> &'static str {
        package_of(self.name)
    }
}

pub(crate) fn package_of(name: &str) -> &str {
    name.rfind('.').map_or("", |i| &name[..i])
}

/// Typed builder for [`TypeInfo`]. Hook methods are only available when `T` implements the
/// corresponding capability trait.
pub struct TypeInfoBuilder<T> {
    info: TypeInfo,
    interfaces_declared: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: SerialType> TypeInfoBuilder<T> {
    /// Explicit version identifier. Without one, it is computed from the type shape.
    pub fn suid(mut self, suid: i64) -> Self {
        self.info.suid = Some(suid);
        self
    }

    /// Adds a serial field.
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.info.fields.push(field);
        self
    }

    /// Declares a persistent field. Once any is declared, only declared fields are serial fields.
    pub fn persistent_field(
        mut self,
        name: &'static str,
        signature: &'static str,
        unshared: bool,
    ) -> Self {
        self.info
            .persistent_fields
            .get_or_insert_with(Vec::new)
            .push(PersistentField {
                name,
                signature,
                unshared,
            });
        self
    }

    /// Declares that the type has no persistent fields at all.
    pub fn no_persistent_fields(mut self) -> Self {
        self.info.persistent_fields = Some(Vec::new());
        self
    }

    /// Links the serializable base part of `T`.
    pub fn base<B: SerialType>(mut self, upcast: Upcast, upcast_mut: UpcastMut) -> Self {
        self.info.base = Some(BaseLink {
            lookup: super::lookup::<B>,
            upcast,
            upcast_mut,
        });
        self
    }

    /// Binds [`WriteObject`].
    pub fn write_object(mut self) -> Self
    where
        T: WriteObject,
    {
        self.info.hooks.write_object = Some(hooks::write_object_adapter::<T>);
        self
    }

    /// Binds [`ReadObject`].
    pub fn read_object(mut self) -> Self
    where
        T: ReadObject,
    {
        self.info.hooks.read_object = Some(hooks::read_object_adapter::<T>);
        self
    }

    /// Binds [`ReadObjectNoData`].
    pub fn read_object_no_data(mut self) -> Self
    where
        T: ReadObjectNoData,
    {
        self.info.hooks.read_object_no_data = Some(hooks::read_object_no_data_adapter::<T>);
        self
    }

    /// Binds [`WriteReplace`] with the given inheritance visibility.
    pub fn write_replace(mut self, visibility: Visibility) -> Self
    where
        T: WriteReplace,
    {
        self.info.hooks.write_replace = Some((hooks::write_replace_adapter::<T>, visibility));
        self
    }

    /// Binds [`ReadResolve`] with the given inheritance visibility.
    pub fn read_resolve(mut self, visibility: Visibility) -> Self
    where
        T: ReadResolve,
    {
        self.info.hooks.read_resolve = Some((hooks::read_resolve_adapter::<T>, visibility));
        self
    }

    /// Makes the type externalizable. Requires a `Default` factory.
    pub fn externalizable(mut self) -> Self
    where
        T: Externalizable + Default,
    {
        self.info.kind = TypeKind::Externalizable;
        self.info.hooks.write_external = Some(hooks::write_external_adapter::<T>);
        self.info.hooks.read_external = Some(hooks::read_external_adapter::<T>);
        self.info.factory = Some(default_factory::<T>);
        self
    }

    /// Makes the type an enum type.
    pub fn enumeration(mut self) -> Self
    where
        T: SerialEnum,
    {
        self.info.kind = TypeKind::Enum(T::CONSTANTS);
        self
    }

    /// Marks the type as known but not serializable.
    pub fn not_serializable(mut self) -> Self {
        self.info.kind = TypeKind::NotSerializable;
        self
    }

    /// Allocation factory used when reading: the default value, before any field is populated.
    pub fn factory(mut self) -> Self
    where
        T: Default,
    {
        self.info.factory = Some(default_factory::<T>);
        self
    }

    /// Declares the type a proxy implementing `interfaces`. Its base must be
    /// [`ProxyBase`](crate::builtin::ProxyBase).
    pub fn proxy(mut self, interfaces: &[&'static str]) -> Self {
        self.info.proxy_interfaces = Some(interfaces.to_vec());
        self
    }

    /// Class modifiers for the version identifier (default: `PUBLIC`).
    pub fn modifiers(mut self, mods: u16) -> Self {
        self.info.shape.modifiers = mods;
        self
    }

    /// Declares a directly implemented interface.
    pub fn interface(mut self, name: &'static str) -> Self {
        self.info.shape.interfaces.push(name);
        self.interfaces_declared = true;
        self
    }

    /// Declares a static initializer.
    pub fn static_initializer(mut self) -> Self {
        self.info.shape.static_initializer = true;
        self
    }

    /// Declares a constructor.
    pub fn constructor(mut self, mods: u16, signature: &'static str) -> Self {
        self.info.shape.constructors.push(Member {
            name: "<init>",
            modifiers: mods,
            signature,
        });
        self
    }

    /// Declares a method.
    pub fn method(mut self, name: &'static str, mods: u16, signature: &'static str) -> Self {
        self.info.shape.methods.push(Member {
            name,
            modifiers: mods,
            signature,
        });
        self
    }

    /// Declares a non-serial field (transient or static).
    pub fn shape_field(mut self, name: &'static str, mods: u16, signature: &'static str) -> Self {
        self.info.shape.fields.push(Member {
            name,
            modifiers: mods,
            signature,
        });
        self
    }

    pub(crate) fn enum_constants(mut self, constants: &'static [&'static str]) -> Self {
        self.info.kind = TypeKind::Enum(constants);
        self
    }

    pub(crate) fn special(mut self, special: Special) -> Self {
        self.info.special = Some(special);
        self
    }

    /// Finishes the description.
    ///
    /// Types that declare no interfaces implement the marker interface of their kind, unless a
    /// base type already does.
    pub fn build(mut self) -> TypeInfo {
        if !self.interfaces_declared && self.info.base.is_none() && self.info.special.is_none() {
            match self.info.kind {
                TypeKind::Serializable => self.info.shape.interfaces.push("java.io.Serializable"),
                TypeKind::Externalizable => {
                    self.info.shape.interfaces.push("java.io.Externalizable")
                }
                TypeKind::Enum(_) | TypeKind::NotSerializable => {}
            }
        }
        self.info
    }
}

fn default_factory<T: SerialType + Default>() -> Box<dyn Serializable> {
    Box::new(T::default())
}
