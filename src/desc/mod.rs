//! Type descriptors.
//!
//! A [`ClassDesc`] is the serializable contract of one class: its wire name, version identifier,
//! flags, field layout and super descriptor. Two kinds exist:
//!
//! - **Local** descriptors describe a Rust type (via its [`SerialType::type_info`]). They are
//!   built once per type and cached process-wide (see [`lookup`] and [`cache`]).
//! - **Stream** descriptors are read from a stream and bound to a local descriptor when the class
//!   resolves. Binding checks compatibility and matches the stream's fields against the local
//!   fields by name.
//!
//! Descriptors are immutable once built and shared through `Arc`.

pub mod cache;
mod field;
mod layout;
mod types;
mod uid;

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock, OnceLock};

use dashmap::DashMap;

pub use field::{FieldSpec, Getter, SerialField, Setter, StreamField};
pub use layout::ClassDataSlot;
pub use types::{
    BaseLink, DescLookup, Factory, Member, PersistentField, SerialEnum, SerialType, TypeInfo,
    TypeInfoBuilder, TypeKind, TypeShape, Upcast, UpcastMut, Visibility,
};

pub(crate) use field::{FieldAccessor, cast_error};
pub(crate) use types::{ReadObjectFn, ReadObjectNoDataFn, ReplaceFn, Special, WriteObjectFn};

use self::cache::globals;
use self::layout::SlotSpec;
use self::uid::UidInput;
use crate::constants::MAX_CACHED_FIELD_MATCHES;
use crate::error::{Result, StreamError};
use crate::format::{
    ProtocolVersion, SC_BLOCK_DATA, SC_ENUM, SC_EXTERNALIZABLE, SC_SERIALIZABLE, SC_WRITE_METHOD,
    is_primitive_code, modifiers,
};
use crate::value::{ObjectRef, Value};

static INTERNED: LazyLock<DashMap<Arc<str>, ()>> = LazyLock::new(DashMap::new);

/// Returns the process-wide shared copy of `s`.
///
/// Field type strings are interned so that equal signatures share one allocation, and with it
/// one handle per stream.
pub(crate) fn intern(s: &str) -> Arc<str> {
    if let Some(e) = INTERNED.get(s) {
        return e.key().clone();
    }
    INTERNED.entry(Arc::from(s)).or_insert(()).key().clone()
}

pub(crate) fn clear_interned() {
    INTERNED.clear();
}

#[cfg(test)]
pub(crate) fn is_interned(s: &str) -> bool {
    INTERNED.contains_key(s)
}

/// Element type of an array class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ElemType {
    Prim(u8),
    /// Component class name (itself an array name for nested arrays).
    Ref(Arc<str>),
}

/// A substitution hook as found on the nearest declaring type.
#[derive(Clone)]
pub(crate) struct DeclaredHook {
    f: ReplaceFn,
    visibility: Visibility,
    package: Arc<str>,
    path: Vec<Upcast>,
}

/// A substitution hook bound to a type, with the projection to the declaring part.
#[derive(Clone)]
pub(crate) struct InheritedHook {
    f: ReplaceFn,
    path: Vec<Upcast>,
}

impl InheritedHook {
    fn invoke(&self, obj: &dyn Any) -> Result<Option<Value>> {
        let target = self
            .path
            .iter()
            .try_fold(obj, |cur, up| up(cur))
            .ok_or_else(|| {
                StreamError::ClassCast("substitution hook receiver projection failed".to_string())
            })?;
        (self.f)(target)
    }
}

#[derive(Clone, Default)]
pub(crate) struct BoundHooks {
    pub(crate) write_object: Option<WriteObjectFn>,
    pub(crate) read_object: Option<ReadObjectFn>,
    pub(crate) read_object_no_data: Option<ReadObjectNoDataFn>,
    pub(crate) write_external: Option<WriteObjectFn>,
    pub(crate) read_external: Option<ReadObjectFn>,
    write_replace: Option<InheritedHook>,
    read_resolve: Option<InheritedHook>,
    declared_write_replace: Option<DeclaredHook>,
    declared_read_resolve: Option<DeclaredHook>,
}

/// The local class a descriptor is bound to.
pub(crate) struct LocalClass {
    pub(crate) name: Arc<str>,
    pub(crate) type_id: Option<TypeId>,
    pub(crate) rust_name: &'static str,
    pub(crate) kind: TypeKind,
    pub(crate) special: Option<Special>,
    pub(crate) elem: Option<ElemType>,
    pub(crate) hooks: BoundHooks,
    pub(crate) factory: Option<Factory>,
    pub(crate) base: Option<BaseLink>,
    pub(crate) lookup: Option<DescLookup>,
    pub(crate) modifiers: u16,
}

impl LocalClass {
    /// Constant names of an enum class.
    pub(crate) fn enum_constants(&self) -> Option<&'static [&'static str]> {
        match self.kind {
            TypeKind::Enum(constants) => Some(constants),
            _ => None,
        }
    }
}

/// Serializable contract of a class.
pub struct ClassDesc {
    pub(crate) name: Arc<str>,
    pub(crate) suid: i64,
    pub(crate) is_proxy: bool,
    pub(crate) is_enum: bool,
    pub(crate) serializable: bool,
    pub(crate) externalizable: bool,
    pub(crate) has_write_object_data: bool,
    pub(crate) has_block_external_data: bool,
    pub(crate) interfaces: Vec<Arc<str>>,
    pub(crate) fields: Vec<StreamField>,
    pub(crate) prim_data_size: usize,
    pub(crate) num_obj_fields: usize,
    pub(crate) super_desc: Option<Arc<ClassDesc>>,
    pub(crate) local: Option<Arc<LocalClass>>,
    pub(crate) local_desc: Option<Arc<ClassDesc>>,
    pub(crate) is_local: bool,
    pub(crate) resolve_error: Option<StreamError>,
    deserialize_error: Option<String>,
    default_serialize_error: Option<String>,
    layout: OnceLock<Result<Vec<SlotSpec>>>,
}

impl fmt::Debug for ClassDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDesc")
            .field("name", &self.name)
            .field("suid", &self.suid)
            .field("proxy", &self.is_proxy)
            .field("enum", &self.is_enum)
            .field("fields", &self.fields)
            .field("super", &self.super_desc.as_ref().map(|s| s.name.clone()))
            .field("bound", &self.local.is_some())
            .finish()
    }
}

impl ClassDesc {
    /// Wire name of the class.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version identifier.
    pub fn suid(&self) -> i64 {
        self.suid
    }

    /// Whether this is a proxy class descriptor.
    pub fn is_proxy(&self) -> bool {
        self.is_proxy
    }

    /// Whether this is an enum class descriptor.
    pub fn is_enum(&self) -> bool {
        self.is_enum
    }

    /// Whether instances can be serialized (externalizable classes included).
    pub fn is_serializable(&self) -> bool {
        self.serializable
    }

    /// Whether instances write themselves.
    pub fn is_externalizable(&self) -> bool {
        self.externalizable
    }

    /// Whether a custom write hook wrote this class's data.
    pub fn has_write_object_data(&self) -> bool {
        self.has_write_object_data
    }

    /// Whether externalizable data is block-framed.
    pub fn has_block_external_data(&self) -> bool {
        self.has_block_external_data
    }

    /// Interface names of a proxy class.
    pub fn interfaces(&self) -> &[Arc<str>] {
        &self.interfaces
    }

    /// Serial fields, primitives first.
    pub fn fields(&self) -> &[StreamField] {
        &self.fields
    }

    /// Field by name.
    pub fn field(&self, name: &str) -> Option<&StreamField> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    /// Bytes taken by the primitive fields.
    pub fn prim_data_size(&self) -> usize {
        self.prim_data_size
    }

    /// Number of reference fields.
    pub fn num_obj_fields(&self) -> usize {
        self.num_obj_fields
    }

    /// Descriptor of the serializable superclass.
    pub fn super_desc(&self) -> Option<&Arc<ClassDesc>> {
        self.super_desc.as_ref()
    }

    /// Whether a local class backs this descriptor.
    pub fn is_bound(&self) -> bool {
        self.local.is_some()
    }

    /// Whether this is a local descriptor rather than one read from a stream.
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// Local descriptor a stream descriptor is bound to.
    pub fn local_desc(&self) -> Option<&Arc<ClassDesc>> {
        self.local_desc.as_ref()
    }

    /// Deferred resolution failure of the class, if it did not resolve.
    pub fn resolve_error(&self) -> Option<&StreamError> {
        self.resolve_error.as_ref()
    }

    /// Flag byte written for this descriptor under `protocol`.
    pub fn flags(&self, protocol: ProtocolVersion) -> u8 {
        let mut flags = 0;
        if self.externalizable {
            flags |= SC_EXTERNALIZABLE;
            if protocol != ProtocolVersion::V1 {
                flags |= SC_BLOCK_DATA;
            }
        } else if self.serializable {
            flags |= SC_SERIALIZABLE;
        }
        if self.has_write_object_data {
            flags |= SC_WRITE_METHOD;
        }
        if self.is_enum {
            flags |= SC_ENUM;
        }
        flags
    }

    /// Class data slots, topmost ancestor first.
    pub fn class_data_layout(self: &Arc<Self>) -> Result<Vec<ClassDataSlot>> {
        let specs = self.layout.get_or_init(|| layout::compute(self));
        match specs {
            Ok(specs) => Ok(layout::materialize(self, specs)),
            Err(e) => Err(e.clone()),
        }
    }

    pub(crate) fn local(&self) -> Option<&LocalClass> {
        self.local.as_deref()
    }

    pub(crate) fn special(&self) -> Option<Special> {
        self.local.as_ref().and_then(|l| l.special)
    }

    pub(crate) fn hooks(&self) -> Option<&BoundHooks> {
        self.local.as_ref().map(|l| &l.hooks)
    }

    /// Local descriptor view: the descriptor itself if local, else the bound local descriptor.
    pub(crate) fn local_view(self: &Arc<Self>) -> Option<Arc<ClassDesc>> {
        if self.is_local {
            Some(self.clone())
        } else {
            self.local_desc.clone()
        }
    }

    pub(crate) fn has_write_object_method(&self) -> bool {
        self.hooks().is_some_and(|h| h.write_object.is_some())
    }

    pub(crate) fn has_read_object_method(&self) -> bool {
        self.hooks().is_some_and(|h| h.read_object.is_some())
    }

    pub(crate) fn has_read_object_no_data_method(&self) -> bool {
        self.hooks().is_some_and(|h| h.read_object_no_data.is_some())
    }

    pub(crate) fn has_write_replace_method(&self) -> bool {
        self.hooks().is_some_and(|h| h.write_replace.is_some())
    }

    pub(crate) fn has_read_resolve_method(&self) -> bool {
        self.hooks().is_some_and(|h| h.read_resolve.is_some())
    }

    pub(crate) fn invoke_write_replace(&self, obj: &dyn Any) -> Result<Option<Value>> {
        match self.hooks().and_then(|h| h.write_replace.as_ref()) {
            Some(hook) => hook.invoke(obj),
            None => Ok(None),
        }
    }

    pub(crate) fn invoke_read_resolve(&self, obj: &dyn Any) -> Result<Option<Value>> {
        match self.hooks().and_then(|h| h.read_resolve.as_ref()) {
            Some(hook) => hook.invoke(obj),
            None => Ok(None),
        }
    }

    /// Fails if instances cannot be read back.
    pub(crate) fn check_deserialize(&self) -> Result<()> {
        match &self.deserialize_error {
            Some(reason) => Err(StreamError::invalid_class(&*self.name, reason.clone())),
            None => Ok(()),
        }
    }

    /// Fails if the default field protocol cannot be used for this class.
    pub(crate) fn check_default_serialize(&self) -> Result<()> {
        match &self.default_serialize_error {
            Some(reason) => Err(StreamError::invalid_class(&*self.name, reason.clone())),
            None => Ok(()),
        }
    }

    /// Allocates a default instance of the bound class.
    pub(crate) fn new_instance(&self) -> Result<ObjectRef> {
        let local = self
            .local
            .as_ref()
            .ok_or_else(|| StreamError::invalid_class(&*self.name, "class not bound"))?;
        match (local.factory, local.lookup) {
            (Some(factory), Some(lookup)) => Ok(ObjectRef::from_boxed(factory(), lookup)),
            _ => Err(StreamError::invalid_class(
                &*self.name,
                "no valid constructor",
            )),
        }
    }

    /// Descriptor bound to `local` instead (or to no local class), sharing this one's wire shape.
    pub(crate) fn variant_for(
        self: &Arc<Self>,
        local: Option<&Arc<ClassDesc>>,
    ) -> Result<Arc<Self>> {
        let current = if self.is_local {
            Some(self)
        } else {
            self.local_desc.as_ref()
        };
        match (current, local) {
            (None, None) => return Ok(self.clone()),
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => return Ok(self.clone()),
            _ => {}
        }
        if self.is_proxy {
            return Self::init_proxy(
                self.interfaces.clone(),
                local.cloned(),
                self.resolve_error.clone(),
                self.super_desc.clone(),
            );
        }
        Self::init_non_proxy(
            self.wire_model(),
            local.cloned(),
            self.resolve_error.clone(),
            self.super_desc.clone(),
        )
    }

    fn wire_model(&self) -> WireModel {
        WireModel {
            name: self.name.clone(),
            suid: self.suid,
            is_enum: self.is_enum,
            serializable: self.serializable,
            externalizable: self.externalizable,
            has_write_object_data: self.has_write_object_data,
            has_block_external_data: self.has_block_external_data,
            fields: self.fields.clone(),
            prim_data_size: self.prim_data_size,
            num_obj_fields: self.num_obj_fields,
        }
    }

    /// Binds a stream descriptor to a local class.
    pub(crate) fn init_non_proxy(
        model: WireModel,
        local: Option<Arc<ClassDesc>>,
        resolve_error: Option<StreamError>,
        super_desc: Option<Arc<ClassDesc>>,
    ) -> Result<Arc<Self>> {
        let mut deserialize_error = None;
        if let Some(osc) = &local {
            let is_array = osc.local().is_some_and(|l| l.elem.is_some());
            if osc.is_proxy {
                return Err(StreamError::invalid(
                    "cannot bind non-proxy descriptor to a proxy class",
                ));
            }
            if model.is_enum != osc.is_enum {
                return Err(StreamError::invalid(if model.is_enum {
                    "cannot bind enum descriptor to a non-enum class"
                } else {
                    "cannot bind non-enum descriptor to an enum class"
                }));
            }
            if model.serializable == osc.serializable && !is_array && model.suid != osc.suid {
                return Err(StreamError::invalid_class(
                    &*osc.name,
                    format!(
                        "local class incompatible: stream classdesc serialVersionUID = {}, \
                         local class serialVersionUID = {}",
                        model.suid, osc.suid
                    ),
                ));
            }
            if simple_name(&model.name) != simple_name(&osc.name) {
                return Err(StreamError::invalid_class(
                    &*osc.name,
                    format!(
                        "local class name incompatible with stream class name \"{}\"",
                        model.name
                    ),
                ));
            }
            if !model.is_enum {
                if model.serializable == osc.serializable
                    && model.externalizable != osc.externalizable
                {
                    return Err(StreamError::invalid_class(
                        &*osc.name,
                        "Serializable incompatible with Externalizable",
                    ));
                }
                if model.serializable != osc.serializable
                    || model.externalizable != osc.externalizable
                    || !(model.serializable || model.externalizable)
                {
                    deserialize_error = Some("class invalid for deserialization".to_string());
                }
            }
        }

        let fields = match &local {
            Some(osc) => matched_fields(&model.fields, osc)?,
            None => model
                .fields
                .iter()
                .map(|f| StreamField {
                    accessor: None,
                    ..f.clone()
                })
                .collect(),
        };

        let (local_class, deserialize_error) = match &local {
            Some(osc) => (
                osc.local.clone(),
                deserialize_error.or_else(|| osc.deserialize_error.clone()),
            ),
            None => (None, deserialize_error),
        };

        Ok(Arc::new(Self {
            name: model.name,
            suid: model.suid,
            is_proxy: false,
            is_enum: model.is_enum,
            serializable: model.serializable,
            externalizable: model.externalizable,
            has_write_object_data: model.has_write_object_data,
            has_block_external_data: model.has_block_external_data,
            interfaces: Vec::new(),
            fields,
            prim_data_size: model.prim_data_size,
            num_obj_fields: model.num_obj_fields,
            super_desc,
            local: local_class,
            local_desc: local,
            is_local: false,
            resolve_error,
            deserialize_error,
            default_serialize_error: None,
            layout: OnceLock::new(),
        }))
    }

    /// Binds a stream proxy descriptor to a local proxy class.
    pub(crate) fn init_proxy(
        interfaces: Vec<Arc<str>>,
        local: Option<Arc<ClassDesc>>,
        resolve_error: Option<StreamError>,
        super_desc: Option<Arc<ClassDesc>>,
    ) -> Result<Arc<Self>> {
        if let Some(osc) = &local
            && !osc.is_proxy
        {
            return Err(StreamError::invalid(
                "cannot bind proxy descriptor to a non-proxy class",
            ));
        }
        let name = match &local {
            Some(osc) => osc.name.clone(),
            None => Arc::from(format!("$Proxy({})", interfaces.join(",")).as_str()),
        };
        Ok(Arc::new(Self {
            name,
            suid: 0,
            is_proxy: true,
            is_enum: false,
            serializable: true,
            externalizable: local.as_ref().is_some_and(|l| l.externalizable),
            has_write_object_data: false,
            has_block_external_data: true,
            interfaces,
            fields: Vec::new(),
            prim_data_size: 0,
            num_obj_fields: 0,
            super_desc,
            local: local.as_ref().and_then(|l| l.local.clone()),
            deserialize_error: local.as_ref().and_then(|l| l.deserialize_error.clone()),
            local_desc: local,
            is_local: false,
            resolve_error,
            default_serialize_error: None,
            layout: OnceLock::new(),
        }))
    }
}

fn simple_name(name: &str) -> &str {
    name.rfind('.').map_or(name, |i| &name[i + 1..])
}

/// Matches stream fields against the local descriptor's fields by name.
///
/// A matched field keeps the local signature, unshared flag and accessor, and the stream's
/// offset. Stream-only fields stay unbound (their values are discarded on read).
fn matched_fields(wire: &[StreamField], osc: &ClassDesc) -> Result<Vec<StreamField>> {
    let compute = || -> Result<Arc<Vec<StreamField>>> {
        wire.iter()
            .map(|f| {
                let mut m = match osc.fields.iter().find(|lf| lf.name == f.name) {
                    Some(lf) => {
                        if (f.is_primitive() || lf.is_primitive()) && f.type_code != lf.type_code {
                            return Err(StreamError::invalid_class(
                                &*osc.name,
                                format!("incompatible types for field {}", f.name),
                            ));
                        }
                        lf.clone()
                    }
                    None => StreamField {
                        accessor: None,
                        unshared: false,
                        ..f.clone()
                    },
                };
                m.offset = f.offset;
                Ok(m)
            })
            .collect::<Result<Vec<_>>>()
            .map(Arc::new)
    };
    let type_id = osc.local().and_then(|l| l.type_id);
    let matched = match type_id {
        Some(tid) => {
            let key: String = wire
                .iter()
                .map(|f| format!("{}{};", f.name, f.signature))
                .collect();
            // Stream-chosen keys; past the cap, matches are computed without caching.
            if globals::REFLECTORS.len() < MAX_CACHED_FIELD_MATCHES {
                globals::REFLECTORS.get_or_compute((tid, key), compute)?
            } else {
                compute()?
            }
        }
        None => compute()?,
    };
    Ok(matched.as_ref().clone())
}

/// Shape of a descriptor as recorded in a stream, before binding.
#[derive(Debug, Clone)]
pub(crate) struct WireModel {
    pub(crate) name: Arc<str>,
    pub(crate) suid: i64,
    pub(crate) is_enum: bool,
    pub(crate) serializable: bool,
    pub(crate) externalizable: bool,
    pub(crate) has_write_object_data: bool,
    pub(crate) has_block_external_data: bool,
    pub(crate) fields: Vec<StreamField>,
    pub(crate) prim_data_size: usize,
    pub(crate) num_obj_fields: usize,
}

impl WireModel {
    /// Validates a recorded descriptor and computes its field offsets.
    pub(crate) fn new(
        name: &str,
        suid: i64,
        flags: u8,
        mut fields: Vec<StreamField>,
    ) -> Result<Self> {
        let externalizable = flags & SC_EXTERNALIZABLE != 0;
        let sflag = flags & SC_SERIALIZABLE != 0;
        if externalizable && sflag {
            return Err(StreamError::invalid_class(
                name,
                "serializable and externalizable flags conflict",
            ));
        }
        let is_enum = flags & SC_ENUM != 0;
        if is_enum && suid != 0 {
            return Err(StreamError::invalid_class(
                name,
                format!("enum descriptor has non-zero serialVersionUID: {suid}"),
            ));
        }
        if is_enum && !fields.is_empty() {
            return Err(StreamError::invalid_class(
                name,
                format!("enum descriptor has non-zero field count: {}", fields.len()),
            ));
        }
        let (prim_data_size, num_obj_fields) = field::compute_offsets(name, &mut fields)?;
        Ok(Self {
            name: Arc::from(name),
            suid,
            is_enum,
            serializable: externalizable || sflag,
            externalizable,
            has_write_object_data: flags & SC_WRITE_METHOD != 0,
            has_block_external_data: flags & SC_BLOCK_DATA != 0,
            fields,
            prim_data_size,
            num_obj_fields,
        })
    }
}

/// Builds an unbound descriptor by hand, the way it would be recorded in a stream.
///
/// ```rust
/// use objstream::desc::{ClassDescBuilder, StreamField};
/// use objstream::format::SC_SERIALIZABLE;
///
/// let desc = ClassDescBuilder::new("demo.Point")
///     .suid(42)
///     .flags(SC_SERIALIZABLE)
///     .field(StreamField::new("x", "I", false)?)
///     .field(StreamField::new("label", "Ljava/lang/String;", false)?)
///     .build()?;
/// assert_eq!(desc.prim_data_size(), 4);
/// assert!(!desc.is_bound());
/// # Ok::<(), objstream::StreamError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ClassDescBuilder {
    name: String,
    suid: i64,
    flags: u8,
    fields: Vec<StreamField>,
    super_desc: Option<Arc<ClassDesc>>,
}

impl ClassDescBuilder {
    /// Starts a serializable descriptor named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suid: 0,
            flags: SC_SERIALIZABLE,
            fields: Vec::new(),
            super_desc: None,
        }
    }

    /// Version identifier.
    pub fn suid(mut self, suid: i64) -> Self {
        self.suid = suid;
        self
    }

    /// Raw `SC_*` flag byte.
    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Appends a field. Fields keep their order; primitives must come first.
    pub fn field(mut self, field: StreamField) -> Self {
        self.fields.push(field);
        self
    }

    /// Super descriptor.
    pub fn super_desc(mut self, desc: Arc<ClassDesc>) -> Self {
        self.super_desc = Some(desc);
        self
    }

    /// Validates and builds.
    pub fn build(self) -> Result<Arc<ClassDesc>> {
        let model = WireModel::new(&self.name, self.suid, self.flags, self.fields)?;
        ClassDesc::init_non_proxy(model, None, None, self.super_desc)
    }
}

/// Local descriptor of `T`, built on first use and cached.
pub fn lookup<T: SerialType>() -> Result<Arc<ClassDesc>> {
    globals::LOCAL.get_or_compute(TypeId::of::<T>(), || build_local(T::type_info()))
}

/// Local descriptor of the array class with the given wire name (e.g. `[I`, `[Ljava.lang.String;`).
pub fn lookup_array(name: &str) -> Result<Arc<ClassDesc>> {
    globals::ARRAYS.get_or_compute(Arc::from(name), || build_array(name))
}

thread_local! {
    static BUILDING: RefCell<Vec<TypeId>> = const { RefCell::new(Vec::new()) };
}

/// Marks a type as under construction on this thread; detects cyclic base chains.
struct BuildGuard(TypeId);

impl BuildGuard {
    fn enter(type_id: TypeId, name: &str) -> Result<Self> {
        BUILDING.with(|b| {
            let mut building = b.borrow_mut();
            if building.contains(&type_id) {
                return Err(StreamError::invalid_class(name, "Circular reference."));
            }
            building.push(type_id);
            Ok(Self(type_id))
        })
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        BUILDING.with(|b| b.borrow_mut().retain(|t| *t != self.0));
    }
}

fn build_local(info: TypeInfo) -> Result<Arc<ClassDesc>> {
    let _guard = BuildGuard::enter(info.type_id, info.name)?;
    log::debug!("[desc] building local descriptor for {}", info.name);

    let name: Arc<str> = Arc::from(info.name);
    let is_enum = matches!(info.kind, TypeKind::Enum(_));
    let externalizable = info.kind == TypeKind::Externalizable;
    let serializable = info.kind != TypeKind::NotSerializable;
    let is_proxy = info.proxy_interfaces.is_some();

    let base_desc = info.base.map(|b| (b.lookup)()).transpose()?;
    let super_desc = if is_enum && info.special != Some(Special::EnumBase) {
        Some(lookup::<crate::builtin::EnumBase>()?)
    } else {
        base_desc.clone().filter(|d| d.serializable)
    };
    if is_proxy && super_desc.as_ref().is_none_or(|s| s.special() != Some(Special::ProxyBase)) {
        return Err(StreamError::invalid_class(
            info.name,
            "proxy types must have java.lang.reflect.Proxy as their base",
        ));
    }

    let mut default_serialize_error = None;
    let mut fields = if !serializable || externalizable || is_enum || is_proxy {
        Vec::new()
    } else if let Some(declared) = &info.persistent_fields {
        let mut fields = Vec::with_capacity(declared.len());
        for pf in declared {
            let code = pf.signature.as_bytes().first().copied().unwrap_or(0);
            let backing = info
                .fields
                .iter()
                .find(|f| f.name == pf.name && f.type_code == code);
            let mut field = match backing {
                Some(spec) => local_field(info.name, spec)?,
                None => {
                    default_serialize_error =
                        Some("unmatched serializable field(s) declared".to_string());
                    StreamField::interned(pf.name, pf.signature, false)
                        .map_err(|_| invalid_field(info.name, pf.name))?
                }
            };
            field.unshared = pf.unshared;
            fields.push(field);
        }
        fields
    } else {
        info.fields
            .iter()
            .map(|spec| local_field(info.name, spec))
            .collect::<Result<Vec<_>>>()?
    };

    let mut names = HashSet::new();
    for f in &fields {
        if !names.insert(f.name.clone()) {
            return Err(StreamError::invalid_class(
                info.name,
                format!("multiple serializable fields named {}", f.name),
            ));
        }
    }
    fields.sort_by(field::canonical_order);
    let (prim_data_size, num_obj_fields) = field::compute_offsets(info.name, &mut fields)?;

    let suid = match info.suid {
        _ if !serializable || is_enum || is_proxy => 0,
        Some(suid) => suid,
        None => uid::compute(&UidInput::from_shape(
            info.name,
            &info.shape,
            info.fields
                .iter()
                .map(|f| (f.name, f.modifiers, f.signature.as_ref())),
        )),
    };

    let deserialize_error = if is_enum {
        Some("enum type".to_string())
    } else if serializable && info.factory.is_none() && info.special.is_none() {
        Some("no valid constructor".to_string())
    } else {
        None
    };

    let hooks = bind_hooks(&info, base_desc.as_deref(), serializable && !is_enum);

    if let Some(interfaces) = &info.proxy_interfaces {
        crate::registry::note_proxy(interfaces, info.lookup);
    }
    crate::registry::note_local(&name, info.lookup);

    let desc = ClassDesc {
        name: name.clone(),
        suid,
        is_proxy,
        is_enum,
        serializable,
        externalizable,
        has_write_object_data: hooks.write_object.is_some(),
        has_block_external_data: true,
        interfaces: info
            .proxy_interfaces
            .iter()
            .flatten()
            .map(|i| Arc::from(*i))
            .collect(),
        fields,
        prim_data_size,
        num_obj_fields,
        super_desc,
        local: Some(Arc::new(LocalClass {
            name,
            type_id: Some(info.type_id),
            rust_name: info.rust_name,
            kind: info.kind,
            special: info.special,
            elem: None,
            hooks,
            factory: info.factory,
            base: info.base,
            lookup: Some(info.lookup),
            modifiers: info.shape.modifiers,
        })),
        local_desc: None,
        is_local: true,
        resolve_error: None,
        deserialize_error,
        default_serialize_error,
        layout: OnceLock::new(),
    };
    log::debug!(
        "[desc] {} suid={} fields={} prim_bytes={}",
        desc.name,
        desc.suid,
        desc.fields.len(),
        desc.prim_data_size
    );
    Ok(Arc::new(desc))
}

fn invalid_field(class: &str, field: &str) -> StreamError {
    StreamError::invalid_class(class, format!("invalid descriptor for field {field}"))
}

fn local_field(class: &str, spec: &FieldSpec) -> Result<StreamField> {
    let mut field = StreamField::interned(spec.name, &spec.signature, spec.unshared)
        .map_err(|_| invalid_field(class, spec.name))?;
    if field.type_code != spec.type_code {
        return Err(invalid_field(class, spec.name));
    }
    field.accessor = Some(FieldAccessor {
        get: spec.get.clone(),
        set: spec.set.clone(),
    });
    Ok(field)
}

fn bind_hooks(info: &TypeInfo, base_desc: Option<&ClassDesc>, with_hooks: bool) -> BoundHooks {
    if !with_hooks {
        return BoundHooks::default();
    }
    let package: Arc<str> = Arc::from(info.package());
    let inherited = |own: Option<(ReplaceFn, Visibility)>,
                     from_base: fn(&BoundHooks) -> Option<&DeclaredHook>|
     -> (Option<DeclaredHook>, Option<InheritedHook>) {
        let declared = match own {
            Some((f, visibility)) => Some(DeclaredHook {
                f,
                visibility,
                package: package.clone(),
                path: Vec::new(),
            }),
            None => match (info.base, base_desc.and_then(|d| d.hooks()).and_then(from_base)) {
                (Some(link), Some(hook)) => {
                    let mut path = vec![link.upcast];
                    path.extend(hook.path.iter().copied());
                    Some(DeclaredHook {
                        path,
                        ..hook.clone()
                    })
                }
                _ => None,
            },
        };
        let effective = declared
            .as_ref()
            .filter(|d| {
                d.path.is_empty()
                    || match d.visibility {
                        Visibility::Public | Visibility::Protected => true,
                        Visibility::Package => d.package == package,
                        Visibility::Private => false,
                    }
            })
            .map(|d| InheritedHook {
                f: d.f,
                path: d.path.clone(),
            });
        (declared, effective)
    };

    fn base_write_replace(h: &BoundHooks) -> Option<&DeclaredHook> {
        h.declared_write_replace.as_ref()
    }
    fn base_read_resolve(h: &BoundHooks) -> Option<&DeclaredHook> {
        h.declared_read_resolve.as_ref()
    }
    let (declared_write_replace, write_replace) =
        inherited(info.hooks.write_replace, base_write_replace);
    let (declared_read_resolve, read_resolve) =
        inherited(info.hooks.read_resolve, base_read_resolve);

    let externalizable = info.kind == TypeKind::Externalizable;
    BoundHooks {
        write_object: info.hooks.write_object.filter(|_| !externalizable),
        read_object: info.hooks.read_object.filter(|_| !externalizable),
        read_object_no_data: info.hooks.read_object_no_data.filter(|_| !externalizable),
        write_external: info.hooks.write_external,
        read_external: info.hooks.read_external,
        write_replace,
        read_resolve,
        declared_write_replace,
        declared_read_resolve,
    }
}

/// Element type of the array class `name`, or `None` if it is not a valid array class name.
pub(crate) fn parse_array_elem(name: &str) -> Option<ElemType> {
    let rest = name.strip_prefix('[')?;
    match *rest.as_bytes().first()? {
        b'[' => parse_array_elem(rest).map(|_| ElemType::Ref(Arc::from(rest))),
        b'L' => {
            let class = rest.strip_prefix('L')?.strip_suffix(';')?;
            (!class.is_empty() && !class.contains([';', '[']))
                .then(|| ElemType::Ref(Arc::from(class)))
        }
        c if is_primitive_code(c) && rest.len() == 1 => Some(ElemType::Prim(c)),
        _ => None,
    }
}

/// Innermost component class of an array name, `None` for primitive components.
pub(crate) fn array_component_class(name: &str) -> Option<&str> {
    let inner = name.trim_start_matches('[');
    inner.strip_prefix('L')?.strip_suffix(';')
}

fn build_array(name: &str) -> Result<Arc<ClassDesc>> {
    let elem = parse_array_elem(name)
        .ok_or_else(|| StreamError::invalid_class(name, "not an array class name"))?;
    let visibility = match array_component_class(name) {
        Some(component) => crate::registry::local_modifiers(component)
            .map_or(modifiers::PUBLIC, |m| {
                m & (modifiers::PUBLIC | modifiers::PRIVATE | modifiers::PROTECTED)
            }),
        None => modifiers::PUBLIC,
    };
    let mods = visibility | modifiers::FINAL | modifiers::ABSTRACT;
    let suid = uid::compute(&UidInput::array(name, mods));
    let name: Arc<str> = Arc::from(name);
    log::debug!("[desc] array descriptor {name} suid={suid}");
    Ok(Arc::new(ClassDesc {
        name: name.clone(),
        suid,
        is_proxy: false,
        is_enum: false,
        serializable: true,
        externalizable: false,
        has_write_object_data: false,
        has_block_external_data: true,
        interfaces: Vec::new(),
        fields: Vec::new(),
        prim_data_size: 0,
        num_obj_fields: 0,
        super_desc: None,
        local: Some(Arc::new(LocalClass {
            name,
            type_id: None,
            rust_name: "array",
            kind: TypeKind::Serializable,
            special: None,
            elem: Some(elem),
            hooks: BoundHooks::default(),
            factory: None,
            base: None,
            lookup: None,
            modifiers: mods,
        })),
        local_desc: None,
        is_local: true,
        resolve_error: None,
        deserialize_error: None,
        default_serialize_error: None,
        layout: OnceLock::new(),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn array_names() {
        assert_eq!(parse_array_elem("[I"), Some(ElemType::Prim(b'I')));
        assert_eq!(
            parse_array_elem("[Ljava.lang.String;"),
            Some(ElemType::Ref(Arc::from("java.lang.String")))
        );
        assert_eq!(parse_array_elem("[[J"), Some(ElemType::Ref(Arc::from("[J"))));
        assert_eq!(parse_array_elem("[Q"), None);
        assert_eq!(parse_array_elem("[L;"), None);
        assert_eq!(parse_array_elem("I"), None);
        assert_eq!(array_component_class("[[Ldemo.Point;"), Some("demo.Point"));
        assert_eq!(array_component_class("[[I"), None);
    }

    #[test]
    fn array_descriptors_are_cached_with_computed_uid() {
        let a = lookup_array("[I").unwrap();
        let b = lookup_array("[I").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.suid(), 0x4dba602676eab2a5);
        assert_eq!(a.flags(ProtocolVersion::V2), SC_SERIALIZABLE);
        assert!(a.super_desc().is_none());
    }

    #[test]
    fn wire_model_checks_flags() {
        let err =
            WireModel::new("x.A", 1, SC_SERIALIZABLE | SC_EXTERNALIZABLE, vec![]).unwrap_err();
        assert!(err.to_string().contains("flags conflict"));
        let err = WireModel::new("x.E", 5, SC_SERIALIZABLE | SC_ENUM, vec![]).unwrap_err();
        assert!(err.to_string().contains("non-zero serialVersionUID"));
    }

    #[test]
    fn interning_shares_allocations() {
        let a = intern("Ljava/lang/String;");
        let b = intern("Ljava/lang/String;");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn stream_fields_are_not_interned() {
        let f = StreamField::new("f", "Lwire/OnlyInStream;", false).unwrap();
        assert_eq!(f.signature(), "Lwire/OnlyInStream;");
        assert!(!is_interned("Lwire/OnlyInStream;"));

        let g = StreamField::interned("g", "Lwire/Local;", false).unwrap();
        assert!(is_interned(g.signature()));
    }
}
