use std::sync::Arc;

use crate::desc::{ClassDesc, SerialField};
use crate::error::{Result, StreamError};
use crate::value::{FieldValue, Prim, Value};

/// Field values of one class as read by
/// [`ObjectInput::read_fields`](super::ObjectInput::read_fields).
///
/// Lookups name a field and a default. The default is returned when the stream does not carry
/// the field but the local class declares it; naming a field neither side knows is an error.
pub struct GetField {
    desc: Arc<ClassDesc>,
    local: Option<Arc<ClassDesc>>,
    prim_vals: Vec<u8>,
    obj_vals: Vec<Value>,
    obj_failed: Vec<bool>,
}

impl std::fmt::Debug for GetField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetField")
            .field("class", &self.desc.name())
            .field("prim_bytes", &self.prim_vals.len())
            .field("objects", &self.obj_vals)
            .finish()
    }
}

impl GetField {
    pub(crate) fn new(
        desc: Arc<ClassDesc>,
        prim_vals: Vec<u8>,
        obj_vals: Vec<Value>,
        obj_failed: Vec<bool>,
    ) -> Self {
        Self {
            local: desc.local_view(),
            desc,
            prim_vals,
            obj_vals,
            obj_failed,
        }
    }

    /// Descriptor of the class the values belong to, as recorded in the stream.
    pub fn desc(&self) -> &Arc<ClassDesc> {
        &self.desc
    }

    /// Whether `name` is absent from the stream and would yield the caller's default.
    pub fn defaulted(&self, name: &str) -> Result<bool> {
        Ok(self.offset(name, None)?.is_none())
    }

    /// Reads a `boolean` field.
    pub fn get_boolean(&self, name: &str, default: bool) -> Result<bool> {
        self.get(name, default)
    }

    /// Reads a `byte` field.
    pub fn get_byte(&self, name: &str, default: i8) -> Result<i8> {
        self.get(name, default)
    }

    /// Reads a `char` field.
    pub fn get_char(&self, name: &str, default: u16) -> Result<u16> {
        self.get(name, default)
    }

    /// Reads a `short` field.
    pub fn get_short(&self, name: &str, default: i16) -> Result<i16> {
        self.get(name, default)
    }

    /// Reads an `int` field.
    pub fn get_int(&self, name: &str, default: i32) -> Result<i32> {
        self.get(name, default)
    }

    /// Reads a `long` field.
    pub fn get_long(&self, name: &str, default: i64) -> Result<i64> {
        self.get(name, default)
    }

    /// Reads a `float` field.
    pub fn get_float(&self, name: &str, default: f32) -> Result<f32> {
        self.get(name, default)
    }

    /// Reads a `double` field.
    pub fn get_double(&self, name: &str, default: f64) -> Result<f64> {
        self.get(name, default)
    }

    /// Reads a reference field. A referent whose class failed to resolve reads as `null`.
    pub fn get_object(&self, name: &str, default: Value) -> Result<Value> {
        match self.offset(name, Some(b'L'))? {
            Some(i) => Ok(if self.obj_failed[i] {
                Value::Null
            } else {
                self.obj_vals[i].clone()
            }),
            None => Ok(default),
        }
    }

    /// Reads any field into a typed Rust value.
    pub fn get<F: SerialField>(&self, name: &str, default: F) -> Result<F> {
        if crate::format::is_primitive_code(F::TYPE_CODE) {
            match self.offset(name, Some(F::TYPE_CODE))? {
                Some(off) => {
                    let bytes = self.prim_vals.get(off..).ok_or_else(|| {
                        StreamError::Internal(format!(
                            "field {name} lies outside the primitive data"
                        ))
                    })?;
                    F::from_field(FieldValue::Prim(Prim::decode(F::TYPE_CODE, bytes)?))
                }
                None => Ok(default),
            }
        } else {
            match self.offset(name, Some(b'L'))? {
                Some(_) => F::from_field(FieldValue::Ref(self.get_object(name, Value::Null)?)),
                None => Ok(default),
            }
        }
    }

    /// Offset of the stream field `name` matching `code` (`L` for any reference type, `None` for
    /// any type). `Ok(None)` if only the local class declares it.
    fn offset(&self, name: &str, code: Option<u8>) -> Result<Option<usize>> {
        let matches = |f: &&crate::desc::StreamField| {
            f.name() == name
                && match code {
                    None => true,
                    Some(b'L') => !f.is_primitive(),
                    Some(c) => f.type_code() == c,
                }
        };
        if let Some(f) = self.desc.fields().iter().find(matches) {
            return Ok(Some(f.offset()));
        }
        if self
            .local
            .as_ref()
            .is_some_and(|l| l.fields().iter().any(|f| matches(&f)))
        {
            return Ok(None);
        }
        let ty = match code {
            None => "any".to_string(),
            Some(b'L') => "object".to_string(),
            Some(c) => (c as char).to_string(),
        };
        Err(StreamError::invalid_class(
            self.desc.name(),
            format!("no such field {name} with type {ty}"),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::desc::{ClassDescBuilder, StreamField};

    fn fields() -> GetField {
        let desc = ClassDescBuilder::new("demo.Pair")
            .field(StreamField::new("a", "I", false).unwrap())
            .field(StreamField::new("flag", "Z", false).unwrap())
            .field(StreamField::new("name", "Ljava/lang/String;", false).unwrap())
            .field(StreamField::new("other", "Ljava/lang/Object;", false).unwrap())
            .build()
            .unwrap();
        GetField::new(
            desc,
            vec![0, 0, 1, 0, 1],
            vec![Value::from("n"), Value::from("lost")],
            vec![false, true],
        )
    }

    #[test]
    fn typed_lookups() {
        let g = fields();
        assert_eq!(g.get_int("a", 0).unwrap(), 256);
        assert!(g.get_boolean("flag", false).unwrap());
        assert_eq!(g.get_object("name", Value::Null).unwrap().as_str(), Some("n"));
        assert_eq!(g.get::<String>("name", String::new()).unwrap(), "n");
    }

    #[test]
    fn failed_referents_read_as_null() {
        assert!(fields().get_object("other", Value::from("d")).unwrap().is_null());
    }

    #[test]
    fn unknown_fields_and_wrong_types_fail() {
        let g = fields();
        assert!(g.get_long("a", 0).is_err());
        assert!(g.get_int("missing", 0).is_err());
        assert!(g.defaulted("missing").is_err());
        assert!(!g.defaulted("a").unwrap());
    }
}
