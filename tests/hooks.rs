#![allow(missing_docs)]

use std::cell::RefCell;
use std::rc::Rc;

use objstream::{
    ClassAnnotator, ClassDesc, DataInput, DataOutput, Externalizable, ObjStream, ObjectInput,
    ObjectInputStream, ObjectOutput, ObjectOutputStream, ObjectRef, ObjectReplacer,
    ObjectResolver, ReadObject, ReadResolve, Serializable, StreamError, TypeRegistry, Value,
    WriteObject, WriteReplace,
};

// --- Custom field data ---

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Account", suid = 1, write_object, read_object)]
struct Account {
    owner: String,
    balance: i64,
    #[serial(skip)]
    history: Vec<String>,
}

impl WriteObject for Account {
    fn write_object(&self, out: &mut dyn ObjectOutput) -> objstream::Result<()> {
        out.default_write_object()?;
        out.write_int(self.history.len() as i32)?;
        for entry in &self.history {
            out.write_utf(entry)?;
        }
        out.write_object(&Value::from("audit"))
    }
}

impl ReadObject for Account {
    fn read_object(&mut self, input: &mut dyn ObjectInput) -> objstream::Result<()> {
        input.default_read_object(self)?;
        let n = input.read_int()?;
        for _ in 0..n {
            self.history.push(input.read_utf()?);
        }
        let marker = input.read_object()?;
        if marker.as_str() != Some("audit") {
            return Err(StreamError::invalid("missing audit marker"));
        }
        Ok(())
    }
}

// Writes optional data that no reader hook consumes.
#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Chatty", suid = 1, write_object)]
struct Chatty {
    id: i32,
}

impl WriteObject for Chatty {
    fn write_object(&self, out: &mut dyn ObjectOutput) -> objstream::Result<()> {
        out.default_write_object()?;
        out.write_long(-1)?;
        out.write_object(&Value::from("ignored"))?;
        out.write_utf("trailing")
    }
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Temperature", suid = 1, write_object, read_object)]
struct Temperature {
    celsius: f64,
    label: Option<String>,
}

impl WriteObject for Temperature {
    fn write_object(&self, out: &mut dyn ObjectOutput) -> objstream::Result<()> {
        let put = out.put_fields()?;
        put.put_double("celsius", self.celsius)?;
        put.put_object("label", self.label.clone())?;
        out.write_fields()
    }
}

impl ReadObject for Temperature {
    fn read_object(&mut self, input: &mut dyn ObjectInput) -> objstream::Result<()> {
        let fields = input.read_fields()?;
        if fields.defaulted("celsius")? {
            return Err(StreamError::invalid("celsius missing from stream"));
        }
        self.celsius = fields.get_double("celsius", f64::NAN)?;
        self.label = fields.get("label", None)?;
        Ok(())
    }
}

// Written without hooks, read by a hook that expects trailing data.
#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Ticket", suid = 4)]
struct TicketPlain {
    id: i32,
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Ticket", suid = 4, read_object)]
struct TicketHooked {
    id: i32,
    #[serial(skip)]
    trailing: Option<objstream::Result<i32>>,
}

impl ReadObject for TicketHooked {
    fn read_object(&mut self, input: &mut dyn ObjectInput) -> objstream::Result<()> {
        input.default_read_object(self)?;
        self.trailing = Some(input.read_int());
        Ok(())
    }
}

// --- Substitution ---

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Secret", suid = 1, write_replace = "private")]
struct Secret {
    password: String,
}

impl WriteReplace for Secret {
    fn write_replace(&self) -> objstream::Result<Option<Value>> {
        Ok(Some(Value::from("<redacted>")))
    }
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Token", suid = 1, read_resolve = "private")]
struct Token {
    id: i32,
}

impl ReadResolve for Token {
    fn read_resolve(&self) -> objstream::Result<Option<Value>> {
        Ok(Some(Value::from(format!("token-{}", self.id))))
    }
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Holder", suid = 1)]
struct Holder {
    a: Value,
    b: Value,
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.shapes.Shape", suid = 1, write_replace = "package")]
struct Shape {
    sides: i32,
}

impl WriteReplace for Shape {
    fn write_replace(&self) -> objstream::Result<Option<Value>> {
        Ok(Some(Value::from(format!("{}-gon", self.sides))))
    }
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.shapes.Square", suid = 1)]
struct Square {
    #[serial(base)]
    shape: Shape,
    side: i32,
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.other.Tile", suid = 1)]
struct Tile {
    #[serial(base)]
    shape: Shape,
}

// --- Externalizable ---

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Matrix", suid = 1, externalizable)]
struct Matrix {
    #[serial(skip)]
    rows: Vec<Vec<i32>>,
}

impl Externalizable for Matrix {
    fn write_external(&self, out: &mut dyn ObjectOutput) -> objstream::Result<()> {
        out.write_int(self.rows.len() as i32)?;
        for row in &self.rows {
            out.write_object(&Value::from(objstream::Array::Int(row.clone())))?;
        }
        Ok(())
    }

    fn read_external(&mut self, input: &mut dyn ObjectInput) -> objstream::Result<()> {
        let n = input.read_int()?;
        for _ in 0..n {
            let row = input.read_object()?;
            let array = row.as_array().ok_or_else(|| StreamError::invalid("row is not an array"))?;
            match &*array.borrow() {
                objstream::Array::Int(v) => self.rows.push(v.clone()),
                _ => return Err(StreamError::invalid("row is not an int[]")),
            }
        }
        Ok(())
    }
}

// --- Validation ---

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Validated", suid = 1, read_object)]
struct Validated {
    value: i32,
}

thread_local! {
    static VALIDATION_LOG: RefCell<Vec<i32>> = const { RefCell::new(Vec::new()) };
}

impl ReadObject for Validated {
    fn read_object(&mut self, input: &mut dyn ObjectInput) -> objstream::Result<()> {
        input.default_read_object(self)?;
        let value = self.value;
        for priority in [1, 10, 5] {
            input.register_validation(
                Box::new(move || {
                    VALIDATION_LOG.with(|l| l.borrow_mut().push(priority));
                    if value < 0 {
                        Err(StreamError::InvalidObject("negative value".into()))
                    } else {
                        Ok(())
                    }
                }),
                priority,
            )?;
        }
        Ok(())
    }
}

// --- Stream-level hooks ---

struct Uppercase;

impl ObjectReplacer for Uppercase {
    fn replace_object(&mut self, value: &Value) -> objstream::Result<Value> {
        Ok(match value.as_str() {
            Some(s) => Value::from(s.to_uppercase()),
            None => value.clone(),
        })
    }
}

struct Counting(Rc<RefCell<usize>>);

impl ObjectResolver for Counting {
    fn resolve_object(&mut self, value: &Value) -> objstream::Result<Value> {
        *self.0.borrow_mut() += 1;
        Ok(match value.as_str() {
            Some("swap me") => Value::from("swapped"),
            _ => value.clone(),
        })
    }
}

struct Stamp;

impl ClassAnnotator for Stamp {
    fn annotate_class(
        &mut self,
        desc: &ClassDesc,
        out: &mut dyn ObjectOutput,
    ) -> objstream::Result<()> {
        out.write_utf(desc.name())?;
        out.write_object(&Value::from("annotation"))
    }
}

fn field_str(holder: &ObjectRef, pick: fn(&Holder) -> &Value) -> Option<String> {
    holder
        .borrow::<Holder>()
        .and_then(|h| pick(&h).as_str().map(str::to_string))
}

// --- TESTS ---

/// Hook-written optional data is read back by the matching read hook.
#[test]
fn test_write_and_read_object_hooks() -> objstream::Result<()> {
    let account = Account {
        owner: "ada".into(),
        balance: 1200,
        history: vec!["open".into(), "deposit".into()],
    };
    let back = ObjStream::deep_copy(&Value::object(account))?;
    let obj = back.as_object().expect("object");
    let account = obj.borrow::<Account>().expect("an Account");
    assert_eq!(account.owner, "ada");
    assert_eq!(account.balance, 1200);
    assert_eq!(account.history, vec!["open".to_string(), "deposit".to_string()]);
    Ok(())
}

/// Optional data nobody reads is skipped, and the stream stays aligned.
#[test]
fn test_unread_optional_data_is_skipped() -> objstream::Result<()> {
    let mut out = ObjectOutputStream::new(Vec::new())?;
    out.write_object(&Value::object(Chatty { id: 4 }))?;
    out.write_object(&Value::from("after"))?;
    let bytes = out.into_inner()?;

    let mut input = ObjectInputStream::new(&bytes[..])?;
    let chatty = input.read_object()?;
    assert_eq!(
        chatty.as_object().and_then(ObjectRef::borrow::<Chatty>).map(|c| c.id),
        Some(4)
    );
    assert_eq!(input.read_object()?.as_str(), Some("after"));
    Ok(())
}

/// Fields staged with `put_fields` are read back with `read_fields`.
#[test]
fn test_put_and_get_fields() -> objstream::Result<()> {
    let t = Temperature {
        celsius: 21.5,
        label: Some("lab".into()),
    };
    let back = ObjStream::deep_copy(&Value::object(t))?;
    let obj = back.as_object().expect("object");
    let t = obj.borrow::<Temperature>().expect("a Temperature");
    assert_eq!(t.celsius, 21.5);
    assert_eq!(t.label.as_deref(), Some("lab"));
    Ok(())
}

/// A write-replace hook substitutes the written value.
#[test]
fn test_write_replace() -> objstream::Result<()> {
    let secret = Value::object(Secret {
        password: "hunter2".into(),
    });
    let bytes = ObjStream::to_bytes(&secret)?;
    assert!(!bytes.windows(7).any(|w| w == b"hunter2"));
    assert_eq!(ObjStream::from_bytes(&bytes)?.as_str(), Some("<redacted>"));
    Ok(())
}

/// Past the default fields of a class written without custom data, primitive reads hit the
/// end of optional data and the fields stay populated.
#[test]
fn test_default_data_end_without_custom_data() -> objstream::Result<()> {
    let bytes = ObjStream::to_bytes(&Value::object(TicketPlain { id: 3 }))?;

    let registry = TypeRegistry::new();
    registry.register::<TicketHooked>()?;
    let mut input = ObjectInputStream::new(&bytes[..])?;
    input.set_class_resolver(Box::new(registry));
    let back = input.read_object()?;

    let obj = back.as_object().expect("object");
    let t = obj.borrow::<TicketHooked>().expect("a TicketHooked");
    assert_eq!(t.id, 3);
    assert!(matches!(
        t.trailing,
        Some(Err(StreamError::OptionalData { length: 0, eof: true }))
    ));
    Ok(())
}

/// A resolved object replaces the instance, back-references included.
#[test]
fn test_read_resolve_updates_back_references() -> objstream::Result<()> {
    let token = Value::object(Token { id: 9 });
    let holder = Value::object(Holder {
        a: token.clone(),
        b: token,
    });
    let back = ObjStream::deep_copy(&holder)?;
    let obj = back.as_object().expect("object");
    assert_eq!(field_str(obj, |h| &h.a).as_deref(), Some("token-9"));
    assert_eq!(field_str(obj, |h| &h.b).as_deref(), Some("token-9"));
    let h = obj.borrow::<Holder>().expect("a Holder");
    assert!(h.a.ptr_eq(&h.b));
    Ok(())
}

/// Package-visible substitution hooks apply inside the package only.
#[test]
fn test_inherited_write_replace_visibility() -> objstream::Result<()> {
    let square = Value::object(Square {
        shape: Shape { sides: 4 },
        side: 2,
    });
    assert_eq!(ObjStream::deep_copy(&square)?.as_str(), Some("4-gon"));

    let tile = Value::object(Tile {
        shape: Shape { sides: 6 },
    });
    let back = ObjStream::deep_copy(&tile)?;
    let sides = back
        .as_object()
        .and_then(ObjectRef::borrow::<Tile>)
        .map(|t| t.shape.sides);
    assert_eq!(sides, Some(6));
    Ok(())
}

/// Externalizable content may contain nested objects.
#[test]
fn test_externalizable_with_nested_objects() -> objstream::Result<()> {
    let m = Matrix {
        rows: vec![vec![1, 2], vec![], vec![3]],
    };
    let back = ObjStream::deep_copy(&Value::object(m))?;
    let rows = back
        .as_object()
        .and_then(ObjectRef::borrow::<Matrix>)
        .map(|m| m.rows.clone());
    assert_eq!(rows, Some(vec![vec![1, 2], vec![], vec![3]]));
    Ok(())
}

/// Validations run after the graph is complete, highest priority first.
#[test]
fn test_validation_order_and_failure() -> objstream::Result<()> {
    VALIDATION_LOG.with(|l| l.borrow_mut().clear());
    let back = ObjStream::deep_copy(&Value::object(Validated { value: 3 }))?;
    assert!(back.as_object().is_some());
    assert_eq!(VALIDATION_LOG.with(|l| l.borrow().clone()), vec![10, 5, 1]);

    let res = ObjStream::deep_copy(&Value::object(Validated { value: -1 }));
    assert!(matches!(res, Err(StreamError::InvalidObject(_))));
    Ok(())
}

/// Validations can only be registered while an object is being read.
#[test]
fn test_validation_outside_read() -> objstream::Result<()> {
    let bytes = ObjStream::to_bytes(&Value::Null)?;
    let mut input = ObjectInputStream::new(&bytes[..])?;
    let res = input.register_validation(Box::new(|| -> objstream::Result<()> { Ok(()) }), 0);
    assert!(matches!(res, Err(StreamError::NotActive(_))));
    Ok(())
}

/// The stream-level replacer sees every value, strings included.
#[test]
fn test_object_replacer() -> objstream::Result<()> {
    let mut out = ObjectOutputStream::new(Vec::new())?;
    out.set_object_replacer(Some(Box::new(Uppercase)));
    out.write_object(&Value::object(Holder {
        a: Value::from("left"),
        b: Value::Null,
    }))?;
    let bytes = out.into_inner()?;

    let back = ObjStream::from_bytes(&bytes)?;
    let obj = back.as_object().expect("object");
    assert_eq!(field_str(obj, |h| &h.a).as_deref(), Some("LEFT"));
    Ok(())
}

/// The stream-level resolver runs on every value read.
#[test]
fn test_object_resolver() -> objstream::Result<()> {
    let mut out = ObjectOutputStream::new(Vec::new())?;
    out.write_object(&Value::from("swap me"))?;
    out.write_object(&Value::from("keep me"))?;
    let bytes = out.into_inner()?;

    let calls = Rc::new(RefCell::new(0));
    let mut input = ObjectInputStream::new(&bytes[..])?;
    input.set_object_resolver(Some(Box::new(Counting(calls.clone()))));
    assert_eq!(input.read_object()?.as_str(), Some("swapped"));
    assert_eq!(input.read_object()?.as_str(), Some("keep me"));
    assert_eq!(*calls.borrow(), 2);
    Ok(())
}

/// Class annotations are written after each descriptor and skipped by the reader.
#[test]
fn test_class_annotations_are_skipped() -> objstream::Result<()> {
    let mut out = ObjectOutputStream::new(Vec::new())?;
    out.set_class_annotator(Some(Box::new(Stamp)));
    out.write_object(&Value::object(Account {
        owner: "bob".into(),
        balance: 1,
        history: Vec::new(),
    }))?;
    out.write_int(77)?;
    let bytes = out.into_inner()?;
    assert!(bytes.windows(10).any(|w| w == b"annotation"));

    let mut input = ObjectInputStream::new(&bytes[..])?;
    let back = input.read_object()?;
    assert_eq!(
        back.as_object()
            .and_then(ObjectRef::borrow::<Account>)
            .map(|a| a.owner.clone())
            .as_deref(),
        Some("bob")
    );
    assert_eq!(input.read_int()?, 77);
    Ok(())
}

/// Hook-only operations fail outside a hook.
#[test]
fn test_hook_calls_outside_hooks() -> objstream::Result<()> {
    let mut out = ObjectOutputStream::new(Vec::new())?;
    assert!(matches!(
        out.default_write_object(),
        Err(StreamError::NotActive(_))
    ));
    assert!(matches!(out.write_fields(), Err(StreamError::NotActive(_))));
    Ok(())
}
