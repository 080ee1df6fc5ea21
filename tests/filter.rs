#![allow(missing_docs)]

use std::sync::{Arc, Mutex};

use objstream::{
    Array, FilterInfo, FilterStatus, ObjStream, ObjectInput, ObjectInputFilter, ObjectInputStream,
    ObjectRef, ObjectResolver, PatternFilter, ReadResolve, Serializable, StreamConfig, StreamError,
    Value,
};

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.safe.Reading", suid = 1)]
struct Reading {
    value: i32,
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.unsafe.Gadget", suid = 1)]
struct Gadget {
    armed: bool,
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.safe.Link", suid = 1)]
struct Link {
    next: Option<ObjectRef>,
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.safe.Samples", suid = 1, read_resolve = "private")]
struct Samples {
    count: i32,
}

impl ReadResolve for Samples {
    fn read_resolve(&self) -> objstream::Result<Option<Value>> {
        Ok(Some(Value::from(Array::Int(vec![0; self.count as usize]))))
    }
}

struct ArmEverything;

impl ObjectResolver for ArmEverything {
    fn resolve_object(&mut self, value: &Value) -> objstream::Result<Value> {
        Ok(match value.as_object() {
            Some(_) => Value::object(Gadget { armed: true }),
            None => value.clone(),
        })
    }
}

fn chain(len: usize) -> Value {
    let mut next = None;
    for _ in 0..len {
        next = Some(ObjectRef::new(Link { next }));
    }
    Value::from(next)
}

fn read_with(bytes: &[u8], pattern: &str) -> objstream::Result<Value> {
    let config = StreamConfig::default().with_filter(pattern);
    ObjStream::from_bytes_with(bytes, &config)
}

fn is_rejection(res: &objstream::Result<Value>) -> bool {
    matches!(
        res,
        Err(StreamError::InvalidClass { reason, .. }) if reason == "filter status: REJECTED"
    )
}

// --- TESTS ---

/// Class patterns allow and reject by package; the first match decides.
#[test]
fn test_class_patterns() -> objstream::Result<()> {
    let reading = ObjStream::to_bytes(&Value::object(Reading { value: 1 }))?;
    let gadget = ObjStream::to_bytes(&Value::object(Gadget { armed: true }))?;

    let pattern = "demo.safe.*;!*";
    assert!(read_with(&reading, pattern)?.as_object().is_some());
    assert!(is_rejection(&read_with(&gadget, pattern)));

    let pattern = "!demo.unsafe.Gadget";
    assert!(read_with(&reading, pattern).is_ok());
    assert!(is_rejection(&read_with(&gadget, pattern)));

    assert!(read_with(&gadget, "demo.**;!demo.unsafe.*").is_ok());
    assert!(is_rejection(&read_with(&gadget, "!demo.unsafe.G*")));
    Ok(())
}

/// Array lengths above the limit are rejected before any element is read.
#[test]
fn test_array_limit() -> objstream::Result<()> {
    let small = ObjStream::to_bytes(&Value::from(Array::Long(vec![1, 2, 3])))?;
    let large = ObjStream::to_bytes(&Value::from(Array::Long(vec![1, 2, 3, 4])))?;
    assert!(read_with(&small, "maxarray=3").is_ok());
    assert!(is_rejection(&read_with(&large, "maxarray=3")));
    Ok(())
}

/// Nesting deeper than the limit is rejected.
#[test]
fn test_depth_limit() -> objstream::Result<()> {
    let shallow = ObjStream::to_bytes(&chain(2))?;
    let deep = ObjStream::to_bytes(&chain(3))?;
    assert!(read_with(&shallow, "maxdepth=2").is_ok());
    assert!(is_rejection(&read_with(&deep, "maxdepth=2")));
    Ok(())
}

/// The byte limit counts everything consumed so far.
#[test]
fn test_byte_limit() -> objstream::Result<()> {
    let bytes = ObjStream::to_bytes(&chain(5))?;
    assert!(read_with(&bytes, &format!("maxbytes={}", bytes.len())).is_ok());
    assert!(is_rejection(&read_with(&bytes, "maxbytes=16")));
    Ok(())
}

/// Reference counting covers back-references as well as new objects.
#[test]
fn test_reference_limit() -> objstream::Result<()> {
    let shared = Value::object(Reading { value: 2 });
    let array = Array::of_objects(vec![shared.clone(), shared.clone(), shared]);
    let bytes = ObjStream::to_bytes(&Value::from(array))?;
    assert!(read_with(&bytes, "maxrefs=10").is_ok());
    assert!(is_rejection(&read_with(&bytes, "maxrefs=2")));
    Ok(())
}

/// A closure filter sees each class once per descriptor and can veto.
#[test]
fn test_closure_filter() -> objstream::Result<()> {
    let bytes = ObjStream::to_bytes(&chain(2))?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let filter = move |info: &FilterInfo<'_>| -> objstream::Result<FilterStatus> {
        if let Some(class) = info.class {
            log.lock().expect("lock").push(class.name().to_string());
        }
        Ok(FilterStatus::Undecided)
    };

    let mut input = ObjectInputStream::new(&bytes[..])?;
    input.set_filter(Arc::new(filter))?;
    assert!(input.filter().is_some());
    input.read_object()?;
    assert_eq!(*seen.lock().expect("lock"), vec!["demo.safe.Link".to_string()]);
    Ok(())
}

/// A failing filter counts as a rejection.
#[test]
fn test_filter_error_rejects() -> objstream::Result<()> {
    let bytes = ObjStream::to_bytes(&Value::object(Reading { value: 3 }))?;
    let filter = |_: &FilterInfo<'_>| -> objstream::Result<FilterStatus> {
        Err(StreamError::IllegalState("filter broke".into()))
    };
    let mut input = ObjectInputStream::new(&bytes[..])?;
    input.set_filter(Arc::new(filter))?;
    assert!(is_rejection(&input.read_object()));
    Ok(())
}

/// Malformed patterns are refused up front.
#[test]
fn test_pattern_parsing() {
    assert!(PatternFilter::parse("maxdepth=10;demo.**;!*").is_ok());
    assert_eq!(
        PatternFilter::parse("maxarray=5").map(|f| f.pattern().to_string()).ok(),
        Some("maxarray=5".to_string())
    );
    assert!(PatternFilter::parse("maxdepth=ten").is_err());
    assert!(PatternFilter::parse("maxwidth=3").is_err());
    assert!(PatternFilter::parse("demo.*.Thing").is_err());
    assert!(matches!(
        ObjStream::from_bytes_with(
            &[0xAC, 0xED, 0x00, 0x05, 0x70],
            &StreamConfig::default().with_filter("maxrefs=x")
        ),
        Err(StreamError::IllegalState(_))
    ));
}

/// Pattern filters judge arrays by their component class.
#[test]
fn test_pattern_filter_on_arrays() -> objstream::Result<()> {
    objstream::register::<Gadget>()?;
    let filter = PatternFilter::parse("!demo.unsafe.*")?;
    let gadgets = Array::objects("[Ldemo.unsafe.Gadget;", vec![Value::object(Gadget::default())]);
    let bytes = ObjStream::to_bytes(&Value::from(gadgets))?;
    let mut input = ObjectInputStream::new(&bytes[..])?;
    input.set_filter(Arc::new(filter))?;
    assert!(is_rejection(&input.read_object()));
    Ok(())
}

/// The filter cannot change once reading has started.
#[test]
fn test_filter_fixed_after_first_read() -> objstream::Result<()> {
    let bytes = ObjStream::to_bytes(&Value::from("x"))?;
    let mut input = ObjectInputStream::new(&bytes[..])?;
    input.read_object()?;
    let filter: Arc<dyn ObjectInputFilter> = Arc::new(PatternFilter::parse("*")?);
    assert!(matches!(input.set_filter(filter), Err(StreamError::IllegalState(_))));
    Ok(())
}

/// Arrays produced by a resolve hook are checked against the array limit.
#[test]
fn test_resolved_array_is_filtered() -> objstream::Result<()> {
    let few = ObjStream::to_bytes(&Value::object(Samples { count: 4 }))?;
    let many = ObjStream::to_bytes(&Value::object(Samples { count: 20 }))?;

    let back = read_with(&few, "maxarray=8")?;
    assert_eq!(back.as_array().expect("array").borrow().len(), 4);
    assert!(is_rejection(&read_with(&many, "maxarray=8")));
    Ok(())
}

/// Objects substituted by a stream-level resolver are checked by class.
#[test]
fn test_resolver_substitute_is_filtered() -> objstream::Result<()> {
    let bytes = ObjStream::to_bytes(&Value::object(Reading { value: 5 }))?;

    let mut input = ObjectInputStream::new(&bytes[..])?;
    input.set_filter(Arc::new(PatternFilter::parse("demo.safe.*;!*")?))?;
    input.set_object_resolver(Some(Box::new(ArmEverything)));
    assert!(is_rejection(&input.read_object()));

    let mut input = ObjectInputStream::new(&bytes[..])?;
    input.set_filter(Arc::new(PatternFilter::parse("demo.**")?))?;
    input.set_object_resolver(Some(Box::new(ArmEverything)));
    let back = input.read_object()?;
    assert!(back.as_object().expect("object").borrow::<Gadget>().is_some());
    Ok(())
}
