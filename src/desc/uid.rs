//! Default version identifier ("serialVersionUID") computation.
//!
//! The identifier is the first eight bytes (little-endian) of a SHA-1 digest over a canonical
//! rendering of the type's shape. The rendering and its inclusion rules are part of the wire
//! contract; two peers only agree if they compute them bit for bit the same way.

use std::cmp::Ordering;

use sha1::{Digest, Sha1};

use super::types::TypeShape;
use crate::block::utf;
use crate::format::modifiers::*;

const CLASS_MASK: u16 = PUBLIC | FINAL | INTERFACE | ABSTRACT;
const FIELD_MASK: u16 = PUBLIC | PRIVATE | PROTECTED | STATIC | FINAL | VOLATILE | TRANSIENT;
const METHOD_MASK: u16 =
    PUBLIC | PRIVATE | PROTECTED | STATIC | FINAL | SYNCHRONIZED | NATIVE | ABSTRACT | STRICT;

/// Borrowed view of everything that feeds the identifier.
#[derive(Debug, Default)]
pub(crate) struct UidInput<'a> {
    pub(crate) name: &'a str,
    pub(crate) modifiers: u16,
    pub(crate) is_array: bool,
    pub(crate) interfaces: Vec<&'a str>,
    /// `(name, modifiers, signature)`
    pub(crate) fields: Vec<(&'a str, u16, &'a str)>,
    pub(crate) static_initializer: bool,
    /// `(modifiers, signature)`
    pub(crate) constructors: Vec<(u16, &'a str)>,
    /// `(name, modifiers, signature)`
    pub(crate) methods: Vec<(&'a str, u16, &'a str)>,
}

impl<'a> UidInput<'a> {
    /// Input for a declared type: the shape plus its serial fields.
    pub(crate) fn from_shape(
        name: &'a str,
        shape: &'a TypeShape,
        serial_fields: impl IntoIterator<Item = (&'a str, u16, &'a str)>,
    ) -> Self {
        let mut fields: Vec<_> = serial_fields.into_iter().collect();
        fields.extend(shape.fields.iter().map(|m| (m.name, m.modifiers, m.signature)));
        Self {
            name,
            modifiers: shape.modifiers,
            is_array: false,
            interfaces: shape.interfaces.clone(),
            fields,
            static_initializer: shape.static_initializer,
            constructors: shape
                .constructors
                .iter()
                .map(|m| (m.modifiers, m.signature))
                .collect(),
            methods: shape
                .methods
                .iter()
                .map(|m| (m.name, m.modifiers, m.signature))
                .collect(),
        }
    }

    /// Input for an array class: name and modifiers only.
    pub(crate) fn array(name: &'a str, modifiers: u16) -> Self {
        Self {
            name,
            modifiers,
            is_array: true,
            ..Self::default()
        }
    }
}

/// Computes the default identifier.
pub(crate) fn compute(input: &UidInput<'_>) -> i64 {
    let mut buf = Vec::with_capacity(256);

    put_utf(&mut buf, input.name);

    let mut class_mods = input.modifiers & CLASS_MASK;
    if class_mods & INTERFACE != 0 {
        class_mods = if input.methods.is_empty() {
            class_mods & !ABSTRACT
        } else {
            class_mods | ABSTRACT
        };
    }
    put_int(&mut buf, class_mods);

    if !input.is_array {
        let mut interfaces = input.interfaces.clone();
        interfaces.sort_by(|a, b| utf16_cmp(a, b));
        for name in interfaces {
            put_utf(&mut buf, name);
        }
    }

    let mut fields = input.fields.clone();
    fields.sort_by(|a, b| utf16_cmp(a.0, b.0));
    for (name, mods, sig) in fields {
        let mods = mods & FIELD_MASK;
        if mods & PRIVATE == 0 || mods & (STATIC | TRANSIENT) == 0 {
            put_utf(&mut buf, name);
            put_int(&mut buf, mods);
            put_utf(&mut buf, sig);
        }
    }

    if input.static_initializer {
        put_utf(&mut buf, "<clinit>");
        put_int(&mut buf, STATIC);
        put_utf(&mut buf, "()V");
    }

    let mut ctors = input.constructors.clone();
    ctors.sort_by(|a, b| utf16_cmp(a.1, b.1));
    for (mods, sig) in ctors {
        let mods = mods & METHOD_MASK;
        if mods & PRIVATE == 0 {
            put_utf(&mut buf, "<init>");
            put_int(&mut buf, mods);
            put_utf(&mut buf, &sig.replace('/', "."));
        }
    }

    let mut methods = input.methods.clone();
    methods.sort_by(|a, b| utf16_cmp(a.0, b.0).then_with(|| utf16_cmp(a.2, b.2)));
    for (name, mods, sig) in methods {
        let mods = mods & METHOD_MASK;
        if mods & PRIVATE == 0 {
            put_utf(&mut buf, name);
            put_int(&mut buf, mods);
            put_utf(&mut buf, &sig.replace('/', "."));
        }
    }

    let digest = Sha1::digest(&buf);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(head)
}

fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn put_utf(buf: &mut Vec<u8>, s: &str) {
    let bytes = utf::encode(s);
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(&bytes);
}

fn put_int(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&i32::from(v).to_be_bytes());
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ARRAY_MODS: u16 = PUBLIC | FINAL | ABSTRACT;

    #[test]
    fn primitive_array_identifiers() {
        assert_eq!(compute(&UidInput::array("[I", ARRAY_MODS)), 0x4dba602676eab2a5);
        assert_eq!(
            compute(&UidInput::array("[B", ARRAY_MODS)) as u64,
            0xacf317f8060854e0
        );
        assert_eq!(compute(&UidInput::array("[J", ARRAY_MODS)), 0x782004b512b17593);
        assert_eq!(compute(&UidInput::array("[Z", ARRAY_MODS)), 0x578f203914b85de2);
    }

    #[test]
    fn object_array_identifiers() {
        assert_eq!(
            compute(&UidInput::array("[Ljava.lang.String;", ARRAY_MODS)) as u64,
            0xadd256e7e91d7b47
        );
        assert_eq!(
            compute(&UidInput::array("[Ljava.lang.Object;", ARRAY_MODS)) as u64,
            0x90ce589f1073296c
        );
    }

    fn point() -> UidInput<'static> {
        UidInput {
            name: "demo.Point",
            modifiers: PUBLIC,
            interfaces: vec!["java.io.Serializable"],
            fields: vec![("x", PRIVATE, "I"), ("y", PRIVATE, "I")],
            ..UidInput::default()
        }
    }

    #[test]
    fn plain_class_identifier() {
        assert_eq!(compute(&point()), -233878248644427907);
    }

    #[test]
    fn private_transient_fields_do_not_count() {
        let mut input = point();
        input
            .fields
            .push(("cache", PRIVATE | TRANSIENT, "Ljava/lang/Object;"));
        assert_eq!(compute(&input), -233878248644427907);
    }

    #[test]
    fn members_feed_the_identifier() {
        let mut input = point();
        input.fields.push(("label", PUBLIC, "Ljava/lang/String;"));
        input.static_initializer = true;
        input.constructors.push((PUBLIC, "()V"));
        input.methods = vec![
            ("scale", PUBLIC, "(Ldemo/Point;)V"),
            ("area", PUBLIC, "()D"),
            ("helper", PRIVATE, "()V"),
        ];
        assert_eq!(compute(&input), -7139107159576107403);
    }
}
