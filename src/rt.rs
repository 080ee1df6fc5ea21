//! Runtime utilities for generated code (Macros).
//! Do not use directly.

use std::borrow::Cow;

use crate::desc::{SerialEnum, cast_error};
use crate::error::Result;
use crate::value::{EnumRef, FieldValue, Value};

/// Field signature of a type with wire name `name`, e.g. `Lcom/example/Color;`.
pub fn object_signature(name: &str) -> Cow<'static, str> {
    Cow::Owned(format!("L{};", name.replace('.', "/")))
}

/// Wire value of an enum field.
pub fn enum_to_field<E: SerialEnum>(value: &E) -> FieldValue {
    FieldValue::Ref(Value::Enum(EnumRef::of(value)))
}

/// Enum field from its wire value. `null` and constants of other types are a cast error.
pub fn enum_from_field<E: SerialEnum>(value: FieldValue) -> Result<E> {
    if let FieldValue::Ref(Value::Enum(e)) = &value
        && let Some(v) = e.get::<E>()
    {
        return Ok(v);
    }
    Err(cast_error(E::WIRE_NAME, &value))
}

/// Enum constant at `ordinal` from a constant table.
pub fn enum_from_ordinal<E: Copy>(table: &[E], ordinal: usize) -> Option<E> {
    table.get(ordinal).copied()
}
