//! Field layout: the accessor table of a local type and the ordered field list of a descriptor.

use std::any::Any;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

use super::intern;
use crate::error::{Result, StreamError};
use crate::format::{is_primitive_code, modifiers};
use crate::value::{Array, ArrayRef, EnumRef, FieldValue, ObjectRef, Prim, Value};

/// Reads a field out of an instance.
pub type Getter = Arc<dyn Fn(&dyn Any) -> Result<FieldValue> + Send + Sync>;
/// Stores a field into an instance.
pub type Setter = Arc<dyn Fn(&mut dyn Any, FieldValue) -> Result<()> + Send + Sync>;

/// One entry of a type's field accessor table.
#[derive(Clone)]
pub struct FieldSpec {
    pub(crate) name: &'static str,
    pub(crate) type_code: u8,
    pub(crate) signature: Cow<'static, str>,
    pub(crate) modifiers: u16,
    pub(crate) unshared: bool,
    pub(crate) get: Getter,
    pub(crate) set: Setter,
}

impl std::fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("unshared", &self.unshared)
            .finish_non_exhaustive()
    }
}

impl FieldSpec {
    /// Describes field `name` of `T`, reached through the two projections.
    pub fn new<T: 'static, F: SerialField>(
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        let getter: Getter = Arc::new(move |obj: &dyn Any| {
            obj.downcast_ref::<T>()
                .map(|t| get(t).to_field())
                .ok_or_else(|| receiver_mismatch::<T>(name))
        });
        let setter: Setter = Arc::new(move |obj: &mut dyn Any, value: FieldValue| {
            let t = obj
                .downcast_mut::<T>()
                .ok_or_else(|| receiver_mismatch::<T>(name))?;
            *get_mut(t) = F::from_field(value)?;
            Ok(())
        });
        Self {
            name,
            type_code: F::TYPE_CODE,
            signature: F::signature(),
            modifiers: modifiers::PRIVATE,
            unshared: false,
            get: getter,
            set: setter,
        }
    }

    /// Writes and reads the field's value unshared.
    pub fn unshared(mut self) -> Self {
        self.unshared = true;
        self
    }

    /// Overrides the type signature of a reference field, e.g. `Lcom/example/Node;`.
    pub fn signature(mut self, signature: &'static str) -> Self {
        if !is_primitive_code(self.type_code) {
            self.signature = Cow::Borrowed(signature);
            self.type_code = signature.as_bytes().first().copied().unwrap_or(b'L');
        }
        self
    }

    /// Field modifiers for the version identifier (default: `PRIVATE`).
    pub fn modifiers(mut self, mods: u16) -> Self {
        self.modifiers = mods;
        self
    }

    /// Field name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

fn receiver_mismatch<T>(field: &str) -> StreamError {
    StreamError::ClassCast(format!(
        "field {field} accessed on an instance that is not a {}",
        std::any::type_name::<T>()
    ))
}

#[derive(Clone)]
pub(crate) struct FieldAccessor {
    pub(crate) get: Getter,
    pub(crate) set: Setter,
}

/// A field as recorded in a descriptor: name, type, position and (for descriptors bound to a
/// local type) the accessor of the matching local field.
#[derive(Clone)]
pub struct StreamField {
    pub(crate) name: Arc<str>,
    pub(crate) type_code: u8,
    pub(crate) signature: Arc<str>,
    pub(crate) offset: usize,
    pub(crate) unshared: bool,
    pub(crate) accessor: Option<FieldAccessor>,
}

impl std::fmt::Debug for StreamField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamField")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("offset", &self.offset)
            .field("unshared", &self.unshared)
            .field("bound", &self.accessor.is_some())
            .finish()
    }
}

impl StreamField {
    /// Creates an unbound field. The signature's first character is the type code.
    pub fn new(name: &str, signature: &str, unshared: bool) -> Result<Self> {
        let code = signature.as_bytes().first().copied().unwrap_or(0);
        let valid = is_primitive_code(code) && signature.len() == 1
            || (code == b'L' || code == b'[') && signature.len() > 1;
        if !valid {
            return Err(StreamError::invalid(format!(
                "illegal signature for field {name}: {signature:?}"
            )));
        }
        Ok(Self {
            name: Arc::from(name),
            type_code: code,
            signature: Arc::from(signature),
            offset: 0,
            unshared,
            accessor: None,
        })
    }

    /// Like [`StreamField::new`], with the signature taken from the process-wide interned set.
    ///
    /// Only local descriptors use this; fields read from a stream own their signature.
    pub(crate) fn interned(name: &str, signature: &str, unshared: bool) -> Result<Self> {
        let mut field = Self::new(name, signature, unshared)?;
        field.signature = intern(signature);
        Ok(field)
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Single-character type code (`I`, `L`, `[`, ...).
    pub fn type_code(&self) -> u8 {
        self.type_code
    }

    /// Full signature; the type code alone for primitives.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Type string written for reference fields; `None` for primitives.
    pub fn type_string(&self) -> Option<&Arc<str>> {
        (!self.is_primitive()).then_some(&self.signature)
    }

    /// Byte offset among primitives, or index among references.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the field holds a primitive.
    pub fn is_primitive(&self) -> bool {
        is_primitive_code(self.type_code)
    }

    /// Whether the field is written unshared.
    pub fn is_unshared(&self) -> bool {
        self.unshared
    }

    /// Whether a local field backs this entry.
    pub fn is_bound(&self) -> bool {
        self.accessor.is_some()
    }
}

/// Canonical order: primitives first, then by name.
pub(crate) fn canonical_order(a: &StreamField, b: &StreamField) -> Ordering {
    match (a.is_primitive(), b.is_primitive()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name.cmp(&b.name),
    }
}

/// Assigns offsets. Returns `(prim_data_size, num_obj_fields)`.
///
/// Fails with "illegal field order" if a primitive field follows a reference field.
pub(crate) fn compute_offsets(class: &str, fields: &mut [StreamField]) -> Result<(usize, usize)> {
    let mut prim_data_size = 0;
    let mut num_obj_fields = 0;
    let mut first_obj_index = None;
    for (i, f) in fields.iter_mut().enumerate() {
        match crate::format::primitive_size(f.type_code) {
            Some(size) => {
                f.offset = prim_data_size;
                prim_data_size += size;
            }
            None => {
                f.offset = num_obj_fields;
                num_obj_fields += 1;
                first_obj_index.get_or_insert(i);
            }
        }
    }
    if let Some(first) = first_obj_index
        && first + num_obj_fields != fields.len()
    {
        return Err(StreamError::invalid_class(class, "illegal field order"));
    }
    Ok((prim_data_size, num_obj_fields))
}

/// Rust types usable as serial fields.
pub trait SerialField: Sized + 'static {
    /// Type code of the field.
    const TYPE_CODE: u8;

    /// Field signature.
    fn signature() -> Cow<'static, str>;

    /// Converts the field into its wire value.
    fn to_field(&self) -> FieldValue;

    /// Converts a wire value back, failing with [`StreamError::ClassCast`] on a type mismatch.
    fn from_field(value: FieldValue) -> Result<Self>;
}

pub(crate) fn cast_error(expected: &str, got: &FieldValue) -> StreamError {
    StreamError::ClassCast(format!(
        "cannot assign {} to a field of type {expected}",
        got.describe()
    ))
}

macro_rules! prim_field {
    ($ty:ty, $variant:ident, $code:expr) => {
        impl SerialField for $ty {
            const TYPE_CODE: u8 = $code;

            fn signature() -> Cow<'static, str> {
                Cow::Borrowed(match $code {
                    b'Z' => "Z",
                    b'B' => "B",
                    b'C' => "C",
                    b'S' => "S",
                    b'I' => "I",
                    b'J' => "J",
                    b'F' => "F",
                    _ => "D",
                })
            }

            fn to_field(&self) -> FieldValue {
                FieldValue::Prim(Prim::$variant(*self))
            }

            fn from_field(value: FieldValue) -> Result<Self> {
                match value {
                    FieldValue::Prim(Prim::$variant(v)) => Ok(v),
                    other => Err(cast_error(stringify!($ty), &other)),
                }
            }
        }
    };
}

prim_field!(bool, Boolean, b'Z');
prim_field!(i8, Byte, b'B');
prim_field!(u16, Char, b'C');
prim_field!(i16, Short, b'S');
prim_field!(i32, Int, b'I');
prim_field!(i64, Long, b'J');
prim_field!(f32, Float, b'F');
prim_field!(f64, Double, b'D');

impl SerialField for Value {
    const TYPE_CODE: u8 = b'L';

    fn signature() -> Cow<'static, str> {
        Cow::Borrowed("Ljava/lang/Object;")
    }

    fn to_field(&self) -> FieldValue {
        FieldValue::Ref(self.clone())
    }

    fn from_field(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Ref(v) => Ok(v),
            other => Err(cast_error("Object", &other)),
        }
    }
}

impl SerialField for Option<Rc<str>> {
    const TYPE_CODE: u8 = b'L';

    fn signature() -> Cow<'static, str> {
        Cow::Borrowed("Ljava/lang/String;")
    }

    fn to_field(&self) -> FieldValue {
        FieldValue::Ref(self.clone().map_or(Value::Null, Value::Str))
    }

    fn from_field(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Ref(Value::Null) => Ok(None),
            FieldValue::Ref(Value::Str(s)) => Ok(Some(s)),
            other => Err(cast_error("String", &other)),
        }
    }
}

impl SerialField for Option<String> {
    const TYPE_CODE: u8 = b'L';

    fn signature() -> Cow<'static, str> {
        Cow::Borrowed("Ljava/lang/String;")
    }

    fn to_field(&self) -> FieldValue {
        FieldValue::Ref(self.as_deref().map_or(Value::Null, Value::from))
    }

    fn from_field(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Ref(Value::Null) => Ok(None),
            FieldValue::Ref(Value::Str(s)) => Ok(Some(s.to_string())),
            other => Err(cast_error("String", &other)),
        }
    }
}

impl SerialField for String {
    const TYPE_CODE: u8 = b'L';

    fn signature() -> Cow<'static, str> {
        Cow::Borrowed("Ljava/lang/String;")
    }

    fn to_field(&self) -> FieldValue {
        FieldValue::Ref(Value::from(self.as_str()))
    }

    fn from_field(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Ref(Value::Str(s)) => Ok(s.to_string()),
            other => Err(cast_error("String (non-null)", &other)),
        }
    }
}

impl SerialField for Option<ObjectRef> {
    const TYPE_CODE: u8 = b'L';

    fn signature() -> Cow<'static, str> {
        Cow::Borrowed("Ljava/lang/Object;")
    }

    fn to_field(&self) -> FieldValue {
        FieldValue::Ref(self.clone().map_or(Value::Null, Value::Object))
    }

    fn from_field(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Ref(Value::Null) => Ok(None),
            FieldValue::Ref(Value::Object(o)) => Ok(Some(o)),
            other => Err(cast_error("object", &other)),
        }
    }
}

impl SerialField for Option<ArrayRef> {
    const TYPE_CODE: u8 = b'[';

    fn signature() -> Cow<'static, str> {
        Cow::Borrowed("[Ljava/lang/Object;")
    }

    fn to_field(&self) -> FieldValue {
        FieldValue::Ref(self.clone().map_or(Value::Null, Value::Array))
    }

    fn from_field(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Ref(Value::Null) => Ok(None),
            FieldValue::Ref(Value::Array(a)) => Ok(Some(a)),
            other => Err(cast_error("array", &other)),
        }
    }
}

impl SerialField for Option<EnumRef> {
    const TYPE_CODE: u8 = b'L';

    fn signature() -> Cow<'static, str> {
        Cow::Borrowed("Ljava/lang/Enum;")
    }

    fn to_field(&self) -> FieldValue {
        FieldValue::Ref(self.clone().map_or(Value::Null, Value::Enum))
    }

    fn from_field(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Ref(Value::Null) => Ok(None),
            FieldValue::Ref(Value::Enum(e)) => Ok(Some(e)),
            other => Err(cast_error("enum", &other)),
        }
    }
}

macro_rules! prim_array_field {
    ($ty:ty, $variant:ident, $sig:expr) => {
        impl SerialField for Vec<$ty> {
            const TYPE_CODE: u8 = b'[';

            fn signature() -> Cow<'static, str> {
                Cow::Borrowed($sig)
            }

            fn to_field(&self) -> FieldValue {
                FieldValue::Ref(Value::Array(ArrayRef::new(Array::$variant(self.clone()))))
            }

            fn from_field(value: FieldValue) -> Result<Self> {
                if let FieldValue::Ref(Value::Array(a)) = &value
                    && let Ok(array) = a.try_borrow()
                    && let Array::$variant(v) = &*array
                {
                    return Ok(v.clone());
                }
                Err(cast_error($sig, &value))
            }
        }
    };
}

prim_array_field!(bool, Boolean, "[Z");
prim_array_field!(i8, Byte, "[B");
prim_array_field!(u16, Char, "[C");
prim_array_field!(i16, Short, "[S");
prim_array_field!(i32, Int, "[I");
prim_array_field!(i64, Long, "[J");
prim_array_field!(f32, Float, "[F");
prim_array_field!(f64, Double, "[D");

impl SerialField for Vec<String> {
    const TYPE_CODE: u8 = b'[';

    fn signature() -> Cow<'static, str> {
        Cow::Borrowed("[Ljava/lang/String;")
    }

    fn to_field(&self) -> FieldValue {
        let elements = self.iter().map(|s| Value::from(s.as_str())).collect();
        FieldValue::Ref(Value::Array(ArrayRef::new(Array::strings(elements))))
    }

    fn from_field(value: FieldValue) -> Result<Self> {
        if let FieldValue::Ref(Value::Array(a)) = &value
            && let Ok(array) = a.try_borrow()
            && let Array::Object { elements, .. } = &*array
        {
            return elements
                .iter()
                .map(|e| match e {
                    Value::Str(s) => Ok(s.to_string()),
                    other => Err(StreamError::ClassCast(format!(
                        "array element {other:?} is not a string"
                    ))),
                })
                .collect();
        }
        Err(cast_error("String[]", &value))
    }
}
