//! The live object graph handled by the streams.
//!
//! A [`Value`] is a reference: cloning it shares the referent. Sharing is tracked by identity
//! ([`Value::ptr_eq`]), never by equality, so a graph written and read back keeps exactly the
//! same aliasing (and cycles) as the original.

use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::builtin::{ClassClass, StreamClass, StringClass};
use crate::desc::{ClassDesc, DescLookup, SerialEnum, SerialType};
use crate::error::{Result, StreamError};

/// Type-erased instance of a [`SerialType`].
pub trait Serializable: Any {
    /// Upcasts to `Any` for typed access.
    fn as_any(&self) -> &dyn Any;
    /// Mutable counterpart of [`Serializable::as_any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Rust type name, for diagnostics.
    fn rust_type_name(&self) -> &'static str;
}

impl<T: SerialType> Serializable for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn rust_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A reference-typed value.
#[derive(Clone, Default)]
pub enum Value {
    /// The null reference.
    #[default]
    Null,
    /// A string.
    Str(Rc<str>),
    /// An instance of a serializable type.
    Object(ObjectRef),
    /// An array.
    Array(ArrayRef),
    /// An enum constant.
    Enum(EnumRef),
    /// A class object.
    Class(Arc<ClassDesc>),
    /// A class descriptor written as a value.
    Desc(Arc<ClassDesc>),
}

impl Value {
    /// Wraps `value` in a fresh object.
    pub fn object<T: SerialType>(value: T) -> Self {
        Self::Object(ObjectRef::new(value))
    }

    /// The enum constant `value`.
    pub fn enum_const<T: SerialEnum>(value: &T) -> Self {
        Self::Enum(EnumRef::of(value))
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Identity comparison: `true` if both values denote the same referent.
    ///
    /// Enum constants are identified by type and name, class objects and descriptors by their
    /// descriptor allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Class(a), Self::Class(b)) | (Self::Desc(a), Self::Desc(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The object, if this is one.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The array, if this is one.
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The enum constant, if this is one.
    pub fn as_enum(&self) -> Option<&EnumRef> {
        match self {
            Self::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// The class object, if this is one.
    pub fn as_class(&self) -> Option<&Arc<ClassDesc>> {
        match self {
            Self::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Descriptor of the value's class. Fails for `null`.
    pub(crate) fn class_desc(&self) -> Result<Arc<ClassDesc>> {
        match self {
            Self::Str(_) => crate::desc::lookup::<StringClass>(),
            Self::Array(a) => {
                let name = a.try_borrow_checked()?.class_name().to_string();
                crate::desc::lookup_array(&name)
            }
            Self::Enum(e) => e.desc(),
            Self::Object(o) => o.desc(),
            Self::Class(_) => crate::desc::lookup::<ClassClass>(),
            Self::Desc(_) => crate::desc::lookup::<StreamClass>(),
            Self::Null => Err(StreamError::Internal("null has no descriptor".to_string())),
        }
    }

    /// Short description used in error messages.
    pub(crate) fn describe(&self) -> String {
        format!("{self:?}")
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Object(o) => write!(f, "{}@{:p}", o.rust_type_name(), Rc::as_ptr(&o.0)),
            Self::Array(a) => match a.try_borrow() {
                Ok(array) => write!(
                    f,
                    "{}[{}]@{:p}",
                    array.class_name(),
                    array.len(),
                    Rc::as_ptr(&a.0)
                ),
                Err(_) => write!(f, "array@{:p}", Rc::as_ptr(&a.0)),
            },
            Self::Enum(e) => write!(f, "{}.{}", e.type_name, e.name),
            Self::Class(c) => write!(f, "class {}", c.name()),
            Self::Desc(c) => write!(f, "descriptor {}", c.name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::Str(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

impl From<ArrayRef> for Value {
    fn from(a: ArrayRef) -> Self {
        Self::Array(a)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Self::Array(ArrayRef::new(a))
    }
}

impl From<EnumRef> for Value {
    fn from(e: EnumRef) -> Self {
        Self::Enum(e)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A primitive value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prim {
    /// `Z`
    Boolean(bool),
    /// `B`
    Byte(i8),
    /// `C`, one UTF-16 code unit.
    Char(u16),
    /// `S`
    Short(i16),
    /// `I`
    Int(i32),
    /// `J`
    Long(i64),
    /// `F`
    Float(f32),
    /// `D`
    Double(f64),
}

impl Prim {
    /// Type code of the value.
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Boolean(_) => b'Z',
            Self::Byte(_) => b'B',
            Self::Char(_) => b'C',
            Self::Short(_) => b'S',
            Self::Int(_) => b'I',
            Self::Long(_) => b'J',
            Self::Float(_) => b'F',
            Self::Double(_) => b'D',
        }
    }

    /// The zero value of a primitive type code.
    pub fn zero(code: u8) -> Option<Self> {
        Some(match code {
            b'Z' => Self::Boolean(false),
            b'B' => Self::Byte(0),
            b'C' => Self::Char(0),
            b'S' => Self::Short(0),
            b'I' => Self::Int(0),
            b'J' => Self::Long(0),
            b'F' => Self::Float(0.0),
            b'D' => Self::Double(0.0),
            _ => return None,
        })
    }

    /// Appends the big-endian encoding.
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        match *self {
            Self::Boolean(v) => buf.push(u8::from(v)),
            Self::Byte(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Self::Char(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Self::Short(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Self::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Self::Long(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Self::Float(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
            Self::Double(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
        }
    }

    /// Decodes a value of type `code` from the front of `bytes`.
    pub(crate) fn decode(code: u8, bytes: &[u8]) -> Result<Self> {
        fn take<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
            bytes
                .get(..N)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| StreamError::Internal("primitive buffer too short".to_string()))
        }
        Ok(match code {
            b'Z' => Self::Boolean(take::<1>(bytes)?[0] != 0),
            b'B' => Self::Byte(i8::from_be_bytes(take(bytes)?)),
            b'C' => Self::Char(u16::from_be_bytes(take(bytes)?)),
            b'S' => Self::Short(i16::from_be_bytes(take(bytes)?)),
            b'I' => Self::Int(i32::from_be_bytes(take(bytes)?)),
            b'J' => Self::Long(i64::from_be_bytes(take(bytes)?)),
            b'F' => Self::Float(f32::from_bits(u32::from_be_bytes(take(bytes)?))),
            b'D' => Self::Double(f64::from_bits(u64::from_be_bytes(take(bytes)?))),
            other => {
                return Err(StreamError::Internal(format!(
                    "not a primitive type code: {}",
                    other as char
                )));
            }
        })
    }
}

/// Value of a single field: a primitive or a reference.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Primitive field value.
    Prim(Prim),
    /// Reference field value.
    Ref(Value),
}

impl FieldValue {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Prim(p) => format!("{p:?}"),
            Self::Ref(v) => v.describe(),
        }
    }
}

pub(crate) struct ObjectCell {
    lookup: DescLookup,
    type_id: TypeId,
    value: RefCell<Box<dyn Serializable>>,
}

/// Shared handle to an instance of a serializable type.
#[derive(Clone)]
pub struct ObjectRef(Rc<ObjectCell>);

impl ObjectRef {
    /// Wraps `value`.
    pub fn new<T: SerialType>(value: T) -> Self {
        Self(Rc::new(ObjectCell {
            lookup: crate::desc::lookup::<T>,
            type_id: TypeId::of::<T>(),
            value: RefCell::new(Box::new(value)),
        }))
    }

    /// Wraps an instance produced by a factory.
    pub(crate) fn from_boxed(value: Box<dyn Serializable>, lookup: DescLookup) -> Self {
        let type_id = Any::type_id(value.as_any());
        Self(Rc::new(ObjectCell {
            lookup,
            type_id,
            value: RefCell::new(value),
        }))
    }

    /// Borrows the instance as `T`. `None` if it is not a `T` or is mutably borrowed.
    pub fn borrow<T: 'static>(&self) -> Option<Ref<'_, T>> {
        let r = self.0.value.try_borrow().ok()?;
        Ref::filter_map(r, |b| b.as_any().downcast_ref::<T>()).ok()
    }

    /// Mutably borrows the instance as `T`. `None` if it is not a `T` or is already borrowed.
    pub fn borrow_mut<T: 'static>(&self) -> Option<RefMut<'_, T>> {
        let r = self.0.value.try_borrow_mut().ok()?;
        RefMut::filter_map(r, |b| b.as_any_mut().downcast_mut::<T>()).ok()
    }

    /// Returns `true` if the instance is a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.0.type_id == TypeId::of::<T>()
    }

    /// Descriptor of the concrete type.
    pub fn desc(&self) -> Result<Arc<ClassDesc>> {
        (self.0.lookup)()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.0.type_id
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn rust_type_name(&self) -> &'static str {
        match self.0.value.try_borrow() {
            Ok(b) => b.rust_type_name(),
            Err(_) => "object",
        }
    }

    pub(crate) fn try_borrow_any(&self) -> Result<Ref<'_, Box<dyn Serializable>>> {
        self.0.value.try_borrow().map_err(|_| {
            StreamError::IllegalState(format!(
                "{} is mutably borrowed while being serialized",
                self.rust_type_name()
            ))
        })
    }

    pub(crate) fn try_borrow_any_mut(&self) -> Result<RefMut<'_, Box<dyn Serializable>>> {
        self.0.value.try_borrow_mut().map_err(|_| {
            StreamError::IllegalState(
                "object is borrowed while its fields are being populated".to_string(),
            )
        })
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.rust_type_name(), Rc::as_ptr(&self.0))
    }
}

/// Array contents, one typed vector per element kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Array {
    /// `[Z`
    Boolean(Vec<bool>),
    /// `[B`
    Byte(Vec<i8>),
    /// `[C`
    Char(Vec<u16>),
    /// `[S`
    Short(Vec<i16>),
    /// `[I`
    Int(Vec<i32>),
    /// `[J`
    Long(Vec<i64>),
    /// `[F`
    Float(Vec<f32>),
    /// `[D`
    Double(Vec<f64>),
    /// Array of references.
    Object {
        /// Wire class name, e.g. `[Ljava.lang.String;` or `[[I`.
        class_name: Arc<str>,
        /// The elements.
        elements: Vec<Value>,
    },
}

impl PartialEq for Value {
    /// Identity, see [`Value::ptr_eq`].
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Array {
    /// An array of references with the given wire class name.
    pub fn objects(class_name: &str, elements: Vec<Value>) -> Self {
        Self::Object {
            class_name: Arc::from(class_name),
            elements,
        }
    }

    /// A `java.lang.Object[]`.
    pub fn of_objects(elements: Vec<Value>) -> Self {
        Self::objects("[Ljava.lang.Object;", elements)
    }

    /// A `java.lang.String[]`.
    pub fn strings(elements: Vec<Value>) -> Self {
        Self::objects("[Ljava.lang.String;", elements)
    }

    /// Wire class name.
    pub fn class_name(&self) -> &str {
        match self {
            Self::Boolean(_) => "[Z",
            Self::Byte(_) => "[B",
            Self::Char(_) => "[C",
            Self::Short(_) => "[S",
            Self::Int(_) => "[I",
            Self::Long(_) => "[J",
            Self::Float(_) => "[F",
            Self::Double(_) => "[D",
            Self::Object { class_name, .. } => class_name,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(v) => v.len(),
            Self::Byte(v) => v.len(),
            Self::Char(v) => v.len(),
            Self::Short(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::Object { elements, .. } => elements.len(),
        }
    }

    /// Returns `true` if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reference elements; `None` for primitive arrays.
    pub fn elements(&self) -> Option<&[Value]> {
        match self {
            Self::Object { elements, .. } => Some(elements),
            _ => None,
        }
    }
}

/// Shared handle to an array.
#[derive(Clone)]
pub struct ArrayRef(Rc<RefCell<Array>>);

impl ArrayRef {
    /// Wraps `array`.
    pub fn new(array: Array) -> Self {
        Self(Rc::new(RefCell::new(array)))
    }

    /// Borrows the contents.
    ///
    /// # Panics
    /// Panics if the array is mutably borrowed; see [`ArrayRef::try_borrow`].
    pub fn borrow(&self) -> Ref<'_, Array> {
        self.0.borrow()
    }

    /// Borrows the contents, failing if they are mutably borrowed.
    pub fn try_borrow(&self) -> std::result::Result<Ref<'_, Array>, std::cell::BorrowError> {
        self.0.try_borrow()
    }

    /// Mutably borrows the contents.
    ///
    /// # Panics
    /// Panics if the array is already borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, Array> {
        self.0.borrow_mut()
    }

    /// A new array with the same elements (references are shared, not copied).
    pub fn shallow_clone(&self) -> Result<Self> {
        let array = self.try_borrow_checked()?;
        Ok(Self::new(array.clone()))
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn try_borrow_checked(&self) -> Result<Ref<'_, Array>> {
        self.0
            .try_borrow()
            .map_err(|_| StreamError::IllegalState("array is mutably borrowed".to_string()))
    }

    pub(crate) fn try_borrow_mut_checked(&self) -> Result<RefMut<'_, Array>> {
        self.0
            .try_borrow_mut()
            .map_err(|_| StreamError::IllegalState("array is already borrowed".to_string()))
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Array(self.clone()), f)
    }
}

/// An enum constant.
#[derive(Clone)]
pub struct EnumRef {
    pub(crate) lookup: DescLookup,
    pub(crate) type_name: Arc<str>,
    pub(crate) name: &'static str,
    pub(crate) ordinal: usize,
}

impl EnumRef {
    /// The constant `value` of `T`.
    pub fn of<T: SerialEnum>(value: &T) -> Self {
        let ordinal = value.ordinal();
        Self {
            lookup: crate::desc::lookup::<T>,
            type_name: Arc::from(T::WIRE_NAME),
            name: T::CONSTANTS.get(ordinal).copied().unwrap_or_default(),
            ordinal,
        }
    }

    /// Converts back to `T`, if this is a constant of `T`.
    pub fn get<T: SerialEnum>(&self) -> Option<T> {
        (*self.type_name == *T::WIRE_NAME)
            .then(|| T::from_ordinal(self.ordinal))
            .flatten()
    }

    /// Wire name of the enum type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Constant name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declaration index.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Descriptor of the enum type.
    pub fn desc(&self) -> Result<Arc<ClassDesc>> {
        (self.lookup)()
    }
}

impl PartialEq for EnumRef {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.name == other.name
    }
}

impl Eq for EnumRef {}

impl std::hash::Hash for EnumRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_name.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for EnumRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.name)
    }
}
