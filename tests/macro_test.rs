#![allow(missing_docs)]

use objstream::desc::lookup;
use objstream::{
    ObjStream, ObjectOutput, ObjectRef, ProtocolVersion, SerialEnum, SerialField, Serializable,
    StreamError, Value, WriteObject,
};

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Record", suid = 12)]
struct Record {
    zeta: i32,
    #[serial(rename = "alpha")]
    first: i64,
    label: Option<String>,
    #[serial(unshared)]
    data: Option<ObjectRef>,
    #[serial(signature = "Ldemo/Record;")]
    parent: Option<ObjectRef>,
    #[serial(transient)]
    scratch: i32,
    flag: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serializable)]
#[serial(name = "demo.Signal")]
enum Signal {
    #[default]
    Stop,
    Caution,
    Go,
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Light", suid = 2)]
struct Light {
    signal: Signal,
    id: i16,
}

#[derive(Debug, Serializable)]
#[serial(name = "demo.Handle", suid = 3, no_factory)]
struct Handle {
    fd: i32,
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Marker", suid = 4)]
struct Marker;

#[derive(Debug, Default, Serializable)]
#[serial(name = "demo.Shape", write_object)]
struct ShapeA {
    width: i32,
    height: i32,
}

impl WriteObject for ShapeA {
    fn write_object(&self, out: &mut dyn ObjectOutput) -> objstream::Result<()> {
        out.default_write_object()
    }
}

mod other {
    use objstream::{ObjectOutput, Serializable, WriteObject};

    #[derive(Debug, Default, Serializable)]
    #[serial(name = "demo.Shape", write_object)]
    pub struct ShapeB {
        pub width: i32,
        pub height: i32,
    }

    impl WriteObject for ShapeB {
        fn write_object(&self, out: &mut dyn ObjectOutput) -> objstream::Result<()> {
            out.default_write_object()
        }
    }

    #[derive(Debug, Default, Serializable)]
    #[serial(name = "demo.Shape", write_object)]
    pub struct ShapeC {
        pub width: i32,
        pub height: i32,
        pub depth: i32,
    }

    impl WriteObject for ShapeC {
        fn write_object(&self, out: &mut dyn ObjectOutput) -> objstream::Result<()> {
            out.default_write_object()
        }
    }
}

// --- TESTS ---

/// Derived descriptors list primitives first, each group ordered by name.
#[test]
fn test_field_layout() -> objstream::Result<()> {
    let desc = lookup::<Record>()?;
    assert_eq!(desc.name(), "demo.Record");
    assert_eq!(desc.suid(), 12);

    let names: Vec<&str> = desc.fields().iter().map(|f| f.name()).collect();
    assert_eq!(names, ["alpha", "flag", "zeta", "data", "label", "parent"]);

    let signatures: Vec<&str> = desc.fields().iter().map(|f| f.signature()).collect();
    assert_eq!(
        signatures,
        ["J", "Z", "I", "Ljava/lang/Object;", "Ljava/lang/String;", "Ldemo/Record;"]
    );
    assert!(desc.field("data").is_some_and(|f| f.is_unshared()));
    assert!(desc.field("scratch").is_none());
    assert_eq!(desc.prim_data_size(), 13);
    assert_eq!(desc.num_obj_fields(), 3);
    Ok(())
}

/// Renamed and transient fields behave as declared on a round trip.
#[test]
fn test_record_round_trip() -> objstream::Result<()> {
    let r = Record {
        zeta: -1,
        first: 1 << 40,
        label: Some("rec".into()),
        data: None,
        parent: None,
        scratch: 55,
        flag: true,
    };
    let back = ObjStream::deep_copy(&Value::object(r))?;
    let obj = back.as_object().expect("object");
    let r = obj.borrow::<Record>().expect("a Record");
    assert_eq!((r.zeta, r.first, r.flag), (-1, 1 << 40, true));
    assert_eq!(r.label.as_deref(), Some("rec"));
    assert_eq!(r.scratch, 0);
    Ok(())
}

/// Enum derives expose their constants and travel by name inside objects.
#[test]
fn test_enum_derive() -> objstream::Result<()> {
    assert_eq!(Signal::WIRE_NAME, "demo.Signal");
    assert_eq!(Signal::CONSTANTS, ["Stop", "Caution", "Go"]);
    assert_eq!(Signal::Go.ordinal(), 2);
    assert_eq!(Signal::from_ordinal(1), Some(Signal::Caution));
    assert_eq!(Signal::from_ordinal(3), None);
    assert_eq!(<Signal as SerialField>::signature(), "Ldemo/Signal;");

    let desc = lookup::<Signal>()?;
    assert!(desc.is_enum());
    assert_eq!(desc.suid(), 0);
    assert_eq!(desc.super_desc().map(|s| s.name()), Some("java.lang.Enum"));

    let back = ObjStream::deep_copy(&Value::object(Light {
        signal: Signal::Caution,
        id: 12,
    }))?;
    let obj = back.as_object().expect("object");
    let light = obj.borrow::<Light>().expect("a Light");
    assert_eq!(light.signal, Signal::Caution);
    assert_eq!(light.id, 12);
    Ok(())
}

/// Types without a factory can be written but not read.
#[test]
fn test_no_factory() -> objstream::Result<()> {
    let bytes = ObjStream::to_bytes(&Value::object(Handle { fd: 3 }))?;
    match ObjStream::from_bytes(&bytes) {
        Err(StreamError::InvalidClass { class, reason }) => {
            assert_eq!(class.as_deref(), Some("demo.Handle"));
            assert_eq!(reason, "no valid constructor");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

/// Unit structs are objects without fields.
#[test]
fn test_unit_struct() -> objstream::Result<()> {
    let desc = lookup::<Marker>()?;
    assert!(desc.fields().is_empty());
    let back = ObjStream::deep_copy(&Value::object(Marker))?;
    assert!(back.as_object().is_some_and(|o| o.is::<Marker>()));
    Ok(())
}

/// Without an explicit identifier, types of the same shape agree and any field change differs.
#[test]
fn test_computed_suid() -> objstream::Result<()> {
    let a = lookup::<ShapeA>()?;
    let b = lookup::<other::ShapeB>()?;
    let c = lookup::<other::ShapeC>()?;
    assert_eq!(a.suid(), b.suid());
    assert_ne!(a.suid(), c.suid());
    assert_ne!(a.suid(), 0);

    // SERIALIZABLE | WRITE_METHOD
    assert_eq!(a.flags(ProtocolVersion::V2), 0x03);
    Ok(())
}
