use std::sync::Arc;

use crate::desc::{ClassDesc, SerialField};
use crate::error::{Result, StreamError};
use crate::value::{FieldValue, Prim, Value};

/// Field values staged by a custom write hook, written with
/// [`ObjectOutput::write_fields`](super::ObjectOutput::write_fields).
///
/// Fields that are never put are written as zero or `null`.
pub struct PutField {
    desc: Arc<ClassDesc>,
    prim_vals: Vec<u8>,
    obj_vals: Vec<Value>,
}

impl std::fmt::Debug for PutField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutField")
            .field("class", &self.desc.name())
            .field("prim_bytes", &self.prim_vals.len())
            .field("objects", &self.obj_vals.len())
            .finish()
    }
}

impl PutField {
    pub(crate) fn new(desc: Arc<ClassDesc>) -> Self {
        Self {
            prim_vals: vec![0; desc.prim_data_size()],
            obj_vals: vec![Value::Null; desc.num_obj_fields()],
            desc,
        }
    }

    /// Stages a `boolean` field.
    pub fn put_boolean(&mut self, name: &str, v: bool) -> Result<()> {
        self.put_prim(name, Prim::Boolean(v))
    }

    /// Stages a `byte` field.
    pub fn put_byte(&mut self, name: &str, v: i8) -> Result<()> {
        self.put_prim(name, Prim::Byte(v))
    }

    /// Stages a `char` field.
    pub fn put_char(&mut self, name: &str, v: u16) -> Result<()> {
        self.put_prim(name, Prim::Char(v))
    }

    /// Stages a `short` field.
    pub fn put_short(&mut self, name: &str, v: i16) -> Result<()> {
        self.put_prim(name, Prim::Short(v))
    }

    /// Stages an `int` field.
    pub fn put_int(&mut self, name: &str, v: i32) -> Result<()> {
        self.put_prim(name, Prim::Int(v))
    }

    /// Stages a `long` field.
    pub fn put_long(&mut self, name: &str, v: i64) -> Result<()> {
        self.put_prim(name, Prim::Long(v))
    }

    /// Stages a `float` field.
    pub fn put_float(&mut self, name: &str, v: f32) -> Result<()> {
        self.put_prim(name, Prim::Float(v))
    }

    /// Stages a `double` field.
    pub fn put_double(&mut self, name: &str, v: f64) -> Result<()> {
        self.put_prim(name, Prim::Double(v))
    }

    /// Stages a reference field.
    pub fn put_object(&mut self, name: &str, v: impl Into<Value>) -> Result<()> {
        let index = self.obj_index(name)?;
        self.obj_vals[index] = v.into();
        Ok(())
    }

    /// Stages any field from a typed Rust value.
    pub fn put<F: SerialField>(&mut self, name: &str, v: &F) -> Result<()> {
        match v.to_field() {
            FieldValue::Prim(p) => self.put_prim(name, p),
            FieldValue::Ref(r) => self.put_object(name, r),
        }
    }

    fn put_prim(&mut self, name: &str, v: Prim) -> Result<()> {
        let code = v.type_code();
        let field = self
            .desc
            .fields()
            .iter()
            .find(|f| f.name() == name && f.type_code() == code)
            .ok_or_else(|| self.no_such_field(name, &(code as char).to_string()))?;
        let offset = field.offset();
        let mut bytes = Vec::with_capacity(8);
        v.encode_into(&mut bytes);
        self.prim_vals[offset..offset + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    fn obj_index(&self, name: &str) -> Result<usize> {
        self.desc
            .fields()
            .iter()
            .find(|f| f.name() == name && !f.is_primitive())
            .map(|f| f.offset())
            .ok_or_else(|| self.no_such_field(name, "object"))
    }

    fn no_such_field(&self, name: &str, ty: &str) -> StreamError {
        StreamError::invalid_class(
            self.desc.name(),
            format!("no such field {name} with type {ty}"),
        )
    }

    pub(crate) fn prim_data(&self) -> &[u8] {
        &self.prim_vals
    }

    /// Staged references with their unshared flags, in field order.
    pub(crate) fn objects(&self) -> Vec<(Value, bool)> {
        let obj_fields = self.desc.fields().iter().filter(|f| !f.is_primitive());
        self.obj_vals
            .iter()
            .cloned()
            .zip(obj_fields.map(|f| f.is_unshared()))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::desc::{ClassDescBuilder, StreamField};

    fn desc() -> Arc<ClassDesc> {
        ClassDescBuilder::new("demo.Pair")
            .field(StreamField::new("a", "I", false).unwrap())
            .field(StreamField::new("b", "J", false).unwrap())
            .field(StreamField::new("name", "Ljava/lang/String;", true).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn primitives_land_at_their_offsets() {
        let mut p = PutField::new(desc());
        p.put_long("b", -1).unwrap();
        p.put_int("a", 0x01020304).unwrap();
        assert_eq!(&p.prim_data()[..4], &[1, 2, 3, 4]);
        assert_eq!(&p.prim_data()[4..], &[0xFF; 8]);
    }

    #[test]
    fn wrong_type_or_name_is_rejected() {
        let mut p = PutField::new(desc());
        assert!(p.put_long("a", 1).is_err());
        assert!(p.put_int("missing", 1).is_err());
        assert!(p.put_object("a", "x").is_err());
    }

    #[test]
    fn objects_carry_unshared_flags() {
        let mut p = PutField::new(desc());
        p.put("name", &"n".to_string()).unwrap();
        let objs = p.objects();
        assert_eq!(objs.len(), 1);
        assert_eq!(objs[0].0.as_str(), Some("n"));
        assert!(objs[0].1);
    }
}
