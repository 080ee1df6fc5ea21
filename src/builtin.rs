//! Built-in classes every stream can name.
//!
//! These stand in for the platform classes the wire format refers to by name. Strings, class
//! objects and descriptors have their own records and never go through the ordinary object path;
//! their types exist so the names resolve and array component checks succeed.

use crate::desc::{FieldSpec, SerialType, Special, TypeInfo};
use crate::format::modifiers;
use crate::value::Value;

/// `java.lang.Object`. Not serializable; only named as an array component or a field type.
#[derive(Debug, Default)]
pub struct Object;

impl SerialType for Object {
    fn type_info() -> TypeInfo {
        TypeInfo::builder::<Self>("java.lang.Object")
            .not_serializable()
            .special(Special::Object)
            .build()
    }
}

/// `java.lang.String`.
#[derive(Debug, Default)]
pub struct StringClass;

impl SerialType for StringClass {
    fn type_info() -> TypeInfo {
        TypeInfo::builder::<Self>("java.lang.String")
            .suid(-6849794470754667710)
            .modifiers(modifiers::PUBLIC | modifiers::FINAL)
            .special(Special::String)
            .build()
    }
}

/// `java.lang.Class`.
#[derive(Debug, Default)]
pub struct ClassClass;

impl SerialType for ClassClass {
    fn type_info() -> TypeInfo {
        TypeInfo::builder::<Self>("java.lang.Class")
            .suid(3206093459760846163)
            .modifiers(modifiers::PUBLIC | modifiers::FINAL)
            .special(Special::Class)
            .build()
    }
}

/// `java.io.ObjectStreamClass`, the class of descriptors written as objects.
#[derive(Debug, Default)]
pub struct StreamClass;

impl SerialType for StreamClass {
    fn type_info() -> TypeInfo {
        TypeInfo::builder::<Self>("java.io.ObjectStreamClass")
            .suid(-6120832682080437368)
            .special(Special::Descriptor)
            .build()
    }
}

/// `java.lang.Enum`, the super descriptor of every enum type.
#[derive(Debug, Default)]
pub struct EnumBase;

impl SerialType for EnumBase {
    fn type_info() -> TypeInfo {
        TypeInfo::builder::<Self>("java.lang.Enum")
            .modifiers(modifiers::PUBLIC | modifiers::ABSTRACT)
            .enum_constants(&[])
            .special(Special::EnumBase)
            .build()
    }
}

/// `java.lang.reflect.Proxy`, the base of every proxy type.
///
/// Its single field holds the invocation handler, which is an ordinary object.
#[derive(Debug, Default)]
pub struct ProxyBase {
    /// Invocation handler.
    pub h: Value,
}

impl SerialType for ProxyBase {
    fn type_info() -> TypeInfo {
        TypeInfo::builder::<Self>("java.lang.reflect.Proxy")
            .suid(-2222568056686623797)
            .field(
                FieldSpec::new("h", |p: &Self| &p.h, |p: &mut Self| &mut p.h)
                    .signature("Ljava/lang/reflect/InvocationHandler;")
                    .modifiers(modifiers::PROTECTED),
            )
            .factory()
            .special(Special::ProxyBase)
            .build()
    }
}

/// Failure record written by an aborted writer, carrying the message of the original error.
#[derive(Debug, Default)]
pub struct WriteFailure {
    /// Description of the failure that aborted the writer.
    pub message: Option<String>,
}

impl WriteFailure {
    /// Wire name of the record type.
    pub const WIRE_NAME: &'static str = "objstream.WriteFailure";
}

impl SerialType for WriteFailure {
    fn type_info() -> TypeInfo {
        TypeInfo::builder::<Self>(Self::WIRE_NAME)
            .suid(1)
            .field(FieldSpec::new(
                "message",
                |w: &Self| &w.message,
                |w: &mut Self| &mut w.message,
            ))
            .factory()
            .build()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::desc;

    #[test]
    fn builtin_descriptors() {
        let s = desc::lookup::<StringClass>().unwrap();
        assert_eq!(s.suid(), -6849794470754667710);
        assert!(s.fields().is_empty());

        let e = desc::lookup::<EnumBase>().unwrap();
        assert!(e.is_enum());
        assert_eq!(e.suid(), 0);
        assert!(e.super_desc().is_none());

        let p = desc::lookup::<ProxyBase>().unwrap();
        assert_eq!(p.fields().len(), 1);
        assert_eq!(
            p.fields()[0].signature(),
            "Ljava/lang/reflect/InvocationHandler;"
        );

        let o = desc::lookup::<Object>().unwrap();
        assert!(!o.is_serializable());
    }
}
