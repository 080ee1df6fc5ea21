#![allow(missing_docs)]

use objstream::{
    Array, DataInput, DataOutput, Externalizable, ObjStream, ObjectInput, ObjectInputStream,
    ObjectOutput, ObjectOutputStream, ObjectRef, ProtocolVersion, Serializable, StreamConfig,
    StreamError, Value,
};

#[derive(Debug, Default, Serializable)]
#[serial(name = "Pt", suid = 1)]
struct Pt {
    x: i32,
}

#[derive(Debug, Default, Serializable)]
#[serial(name = "Ext", suid = 2, externalizable)]
struct Ext {
    value: i32,
}

impl Externalizable for Ext {
    fn write_external(&self, out: &mut dyn ObjectOutput) -> objstream::Result<()> {
        out.write_int(self.value)
    }

    fn read_external(&mut self, input: &mut dyn ObjectInput) -> objstream::Result<()> {
        self.value = input.read_int()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serializable)]
#[serial(name = "Tone")]
enum Tone {
    Low,
    High,
}

const HEADER: [u8; 4] = [0xAC, 0xED, 0x00, 0x05];

fn with_header(body: &[u8]) -> Vec<u8> {
    let mut v = HEADER.to_vec();
    v.extend_from_slice(body);
    v
}

const PT_RECORD: [u8; 27] = [
    0x73, 0x72, 0x00, 0x02, b'P', b't', // TC_OBJECT TC_CLASSDESC "Pt"
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // suid
    0x02, 0x00, 0x01, b'I', 0x00, 0x01, b'x', // SERIALIZABLE, one field: int x
    0x78, 0x70, // end of annotation, no super
    0x00, 0x00, 0x00, 0x05, // x
];

fn pt_stream() -> Vec<u8> {
    with_header(&PT_RECORD)
}

// --- TESTS ---

/// An empty stream is only the header.
#[test]
fn test_header_only() -> objstream::Result<()> {
    let out = ObjectOutputStream::new(Vec::new())?;
    assert_eq!(out.into_inner()?, HEADER.to_vec());
    Ok(())
}

/// Null is a single tag.
#[test]
fn test_null_record() -> objstream::Result<()> {
    assert_eq!(ObjStream::to_bytes(&Value::Null)?, with_header(&[0x70]));
    Ok(())
}

/// A simple object encodes to the documented byte layout.
#[test]
fn test_object_layout() -> objstream::Result<()> {
    let bytes = ObjStream::to_bytes(&Value::object(Pt { x: 5 }))?;
    assert_eq!(bytes, pt_stream());
    Ok(())
}

/// The reader accepts hand-written bytes of the same layout.
#[test]
fn test_object_from_known_bytes() -> objstream::Result<()> {
    objstream::register::<Pt>()?;
    let v = ObjStream::from_bytes(&pt_stream())?;
    let x = v.as_object().and_then(ObjectRef::borrow::<Pt>).map(|p| p.x);
    assert_eq!(x, Some(5));
    Ok(())
}

/// The second write of a string is a back-reference to the first handle.
#[test]
fn test_string_back_reference() -> objstream::Result<()> {
    let s = Value::from("hi");
    let mut out = ObjectOutputStream::new(Vec::new())?;
    out.write_object(&s)?;
    out.write_object(&s)?;
    let bytes = out.into_inner()?;
    assert_eq!(
        bytes,
        with_header(&[0x74, 0x00, 0x02, b'h', b'i', 0x71, 0x00, 0x7E, 0x00, 0x00])
    );
    Ok(())
}

/// Primitive writes are framed as block data.
#[test]
fn test_block_data_framing() -> objstream::Result<()> {
    let mut out = ObjectOutputStream::new(Vec::new())?;
    out.write_int(1)?;
    out.write_short(-1)?;
    let bytes = out.into_inner()?;
    assert_eq!(
        bytes,
        with_header(&[0x77, 0x06, 0x00, 0x00, 0x00, 0x01, 0xFF, 0xFF])
    );
    Ok(())
}

/// Runs longer than 255 bytes use the long block-data form.
#[test]
fn test_long_block_data() -> objstream::Result<()> {
    let mut out = ObjectOutputStream::new(Vec::new())?;
    for _ in 0..100 {
        out.write_int(0x01020304)?;
    }
    let bytes = out.into_inner()?;
    assert_eq!(&bytes[4..9], &[0x7A, 0x00, 0x00, 0x01, 0x90]);
    assert_eq!(bytes.len(), 4 + 5 + 400);

    let mut input = ObjectInputStream::new(&bytes[..])?;
    for _ in 0..100 {
        assert_eq!(input.read_int()?, 0x01020304);
    }
    Ok(())
}

/// NUL and supplementary characters use the modified UTF-8 forms.
#[test]
fn test_modified_utf8() -> objstream::Result<()> {
    let mut out = ObjectOutputStream::new(Vec::new())?;
    out.write_utf("a\u{0}\u{1F600}")?;
    let bytes = out.into_inner()?;
    assert_eq!(
        bytes,
        with_header(&[
            0x77, 0x0B, // block of 11 bytes
            0x00, 0x09, // utf length
            b'a', 0xC0, 0x80, // 'a', NUL
            0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80, // surrogate pair
        ])
    );

    let mut input = ObjectInputStream::new(&bytes[..])?;
    assert_eq!(input.read_utf()?, "a\u{0}\u{1F600}");
    Ok(())
}

/// Strings over 65535 encoded bytes are written as long strings.
#[test]
fn test_long_string() -> objstream::Result<()> {
    let text = "x".repeat(70_000);
    let bytes = ObjStream::to_bytes(&Value::from(text.as_str()))?;
    assert_eq!(bytes[4], 0x7C);
    assert_eq!(&bytes[5..13], &70_000u64.to_be_bytes());

    let back = ObjStream::from_bytes(&bytes)?;
    assert_eq!(back.as_str().map(str::len), Some(70_000));
    Ok(())
}

/// `write_utf` refuses strings whose encoding does not fit the length prefix.
#[test]
fn test_write_utf_too_long() -> objstream::Result<()> {
    let mut out = ObjectOutputStream::new(Vec::new())?;
    let res = out.write_utf(&"y".repeat(70_000));
    assert!(matches!(res, Err(StreamError::UtfDataFormat(_))));
    Ok(())
}

/// Enum constants are a descriptor chain ending at `java.lang.Enum` plus the constant name.
#[test]
fn test_enum_layout() -> objstream::Result<()> {
    let bytes = ObjStream::to_bytes(&Value::enum_const(&Tone::High))?;
    let body = &bytes[4..];
    assert_eq!(&body[..6], &[0x7E, 0x72, 0x00, 0x04, b'T', b'o']);
    // Enum descriptors have a zero identifier and the SERIALIZABLE | ENUM flags.
    assert_eq!(&body[8..16], &[0; 8]);
    assert_eq!(body[16], 0x12);
    assert!(body.ends_with(&[0x74, 0x00, 0x04, b'H', b'i', b'g', b'h']));
    Ok(())
}

/// Protocol 2 frames externalizable data; protocol 1 writes it raw.
#[test]
fn test_externalizable_protocols() -> objstream::Result<()> {
    let prefix = [
        0x73, 0x72, 0x00, 0x03, b'E', b'x', b't', // TC_OBJECT TC_CLASSDESC "Ext"
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, // suid
    ];

    let v2 = ObjStream::to_bytes(&Value::object(Ext { value: 5 }))?;
    let mut expected = prefix.to_vec();
    expected.extend_from_slice(&[0x0C, 0x00, 0x00, 0x78, 0x70]);
    expected.extend_from_slice(&[0x77, 0x04, 0x00, 0x00, 0x00, 0x05, 0x78]);
    assert_eq!(v2, with_header(&expected));

    let config = StreamConfig::default().with_protocol(ProtocolVersion::V1);
    let v1 = ObjStream::to_bytes_with(&Value::object(Ext { value: 5 }), &config)?;
    let mut expected = prefix.to_vec();
    expected.extend_from_slice(&[0x04, 0x00, 0x00, 0x78, 0x70]);
    expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x05]);
    assert_eq!(v1, with_header(&expected));

    for bytes in [v2, v1] {
        let back = ObjStream::from_bytes(&bytes)?;
        let value = back.as_object().and_then(ObjectRef::borrow::<Ext>).map(|e| e.value);
        assert_eq!(value, Some(5));
    }
    Ok(())
}

/// The protocol can only change before anything has been written.
#[test]
fn test_protocol_switch_after_write() -> objstream::Result<()> {
    let mut out = ObjectOutputStream::new(Vec::new())?;
    out.use_protocol_version(ProtocolVersion::V1)?;
    assert_eq!(out.protocol_version(), ProtocolVersion::V1);
    out.write_object(&Value::from("s"))?;
    assert!(matches!(
        out.use_protocol_version(ProtocolVersion::V2),
        Err(StreamError::IllegalState(_))
    ));
    Ok(())
}

/// Primitive arrays are a descriptor, a length and the raw elements.
#[test]
fn test_int_array_layout() -> objstream::Result<()> {
    let bytes = ObjStream::to_bytes(&Value::from(Array::Int(vec![1, -1])))?;
    let body = &bytes[4..];
    assert_eq!(&body[..6], &[0x75, 0x72, 0x00, 0x02, b'[', b'I']);
    assert!(body.ends_with(&[
        0x78, 0x70, // no annotation, no super
        0x00, 0x00, 0x00, 0x02, // length
        0x00, 0x00, 0x00, 0x01, 0xFF, 0xFF, 0xFF, 0xFF,
    ]));
    Ok(())
}

/// A repeated string inside an array is written once and then referenced by handle.
#[test]
fn test_string_array_back_reference() -> objstream::Result<()> {
    let a = Value::from("a");
    let array = Array::strings(vec![a.clone(), Value::from("b"), a]);
    let bytes = ObjStream::to_bytes(&Value::from(array))?;
    let body = &bytes[4..];
    assert_eq!(&body[..4], &[0x75, 0x72, 0x00, 0x13]);
    assert_eq!(&body[4..23], b"[Ljava.lang.String;");
    assert!(body.ends_with(&[
        0x78, 0x70, // no annotation, no super
        0x00, 0x00, 0x00, 0x03, // length
        0x74, 0x00, 0x01, b'a', // handle 0x7E0002
        0x74, 0x00, 0x01, b'b',
        0x71, 0x00, 0x7E, 0x00, 0x02,
    ]));
    Ok(())
}

/// A stream must start with the magic number.
#[test]
fn test_bad_magic_rejected() {
    let res = ObjectInputStream::new(&[0xCA, 0xFE, 0x00, 0x05][..]);
    assert!(matches!(res, Err(StreamError::StreamCorrupted(_))));
}
