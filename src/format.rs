//! Defines the physical layout of an object stream.
//!
//! # Layout
//! A stream starts with a fixed 4-byte header followed by a sequence of records. Every record
//! starts with a one-byte type code (`TC_*`); primitive data written outside of records is
//! carried in block-data records.
//!
//! ```text
//! [MAGIC u16] [VERSION u16] [record] [record] ...
//! ```
//!
//! All multi-byte quantities are big-endian. Strings inside descriptors use modified UTF-8
//! with a 2-byte length prefix.
//!
//! ## Descriptor Anatomy
//! `TC_CLASSDESC [name utf] [suid i64] [flags u8] [field count u16] [fields..]
//! [annotation.. TC_ENDBLOCKDATA] [super descriptor | TC_NULL]`

/// Magic number written at the start of every stream.
pub const STREAM_MAGIC: u16 = 0xACED;

/// Version number written after the magic.
pub const STREAM_VERSION: u16 = 5;

/// First type code value.
pub const TC_BASE: u8 = 0x70;
/// Null object reference.
pub const TC_NULL: u8 = 0x70;
/// Reference to an object already written into the stream.
pub const TC_REFERENCE: u8 = 0x71;
/// New class descriptor.
pub const TC_CLASSDESC: u8 = 0x72;
/// New object.
pub const TC_OBJECT: u8 = 0x73;
/// New string.
pub const TC_STRING: u8 = 0x74;
/// New array.
pub const TC_ARRAY: u8 = 0x75;
/// Reference to a class object.
pub const TC_CLASS: u8 = 0x76;
/// Block of optional data; the byte following the tag is the block length.
pub const TC_BLOCKDATA: u8 = 0x77;
/// End of optional block data for an object.
pub const TC_ENDBLOCKDATA: u8 = 0x78;
/// Stream reset.
pub const TC_RESET: u8 = 0x79;
/// Long block data; the 4-byte integer following the tag is the block length.
pub const TC_BLOCKDATALONG: u8 = 0x7A;
/// Failure record written by an aborted writer.
pub const TC_EXCEPTION: u8 = 0x7B;
/// Long string.
pub const TC_LONGSTRING: u8 = 0x7C;
/// New proxy class descriptor.
pub const TC_PROXYCLASSDESC: u8 = 0x7D;
/// New enum constant.
pub const TC_ENUM: u8 = 0x7E;
/// Last type code value.
pub const TC_MAX: u8 = 0x7E;

/// First wire handle to be assigned.
pub const BASE_WIRE_HANDLE: i32 = 0x7E_0000;

/// The class has a custom write hook.
pub const SC_WRITE_METHOD: u8 = 0x01;
/// The class is serializable.
pub const SC_SERIALIZABLE: u8 = 0x02;
/// The class is externalizable.
pub const SC_EXTERNALIZABLE: u8 = 0x04;
/// Externalizable data is written in block-data mode (protocol version 2).
pub const SC_BLOCK_DATA: u8 = 0x08;
/// The class is an enum type.
pub const SC_ENUM: u8 = 0x10;

/// Java-style access and property modifiers, used when hashing a type shape.
pub mod modifiers {
    /// `public`
    pub const PUBLIC: u16 = 0x0001;
    /// `private`
    pub const PRIVATE: u16 = 0x0002;
    /// `protected`
    pub const PROTECTED: u16 = 0x0004;
    /// `static`
    pub const STATIC: u16 = 0x0008;
    /// `final`
    pub const FINAL: u16 = 0x0010;
    /// `synchronized`
    pub const SYNCHRONIZED: u16 = 0x0020;
    /// `volatile`
    pub const VOLATILE: u16 = 0x0040;
    /// `transient`
    pub const TRANSIENT: u16 = 0x0080;
    /// `native`
    pub const NATIVE: u16 = 0x0100;
    /// `interface`
    pub const INTERFACE: u16 = 0x0200;
    /// `abstract`
    pub const ABSTRACT: u16 = 0x0400;
    /// `strictfp`
    pub const STRICT: u16 = 0x0800;
}

/// Stream protocol version.
///
/// Version 1 writes externalizable data without block framing, which makes it impossible for
/// a reader to skip it when the class is unknown. Version 2 is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ProtocolVersion {
    /// Unframed externalizable data.
    #[serde(rename = "1")]
    V1,
    /// Block-framed externalizable data.
    #[default]
    #[serde(rename = "2")]
    V2,
}

impl ProtocolVersion {
    /// Numeric version.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

/// Human-readable name of a type code, used in diagnostics and by the inspector.
pub fn tag_name(tc: u8) -> &'static str {
    match tc {
        TC_NULL => "TC_NULL",
        TC_REFERENCE => "TC_REFERENCE",
        TC_CLASSDESC => "TC_CLASSDESC",
        TC_OBJECT => "TC_OBJECT",
        TC_STRING => "TC_STRING",
        TC_ARRAY => "TC_ARRAY",
        TC_CLASS => "TC_CLASS",
        TC_BLOCKDATA => "TC_BLOCKDATA",
        TC_ENDBLOCKDATA => "TC_ENDBLOCKDATA",
        TC_RESET => "TC_RESET",
        TC_BLOCKDATALONG => "TC_BLOCKDATALONG",
        TC_EXCEPTION => "TC_EXCEPTION",
        TC_LONGSTRING => "TC_LONGSTRING",
        TC_PROXYCLASSDESC => "TC_PROXYCLASSDESC",
        TC_ENUM => "TC_ENUM",
        _ => "TC_UNKNOWN",
    }
}

/// Returns `true` for the single-character type codes of primitive fields.
pub fn is_primitive_code(code: u8) -> bool {
    matches!(code, b'Z' | b'B' | b'C' | b'S' | b'I' | b'J' | b'F' | b'D')
}

/// Size in bytes of a primitive value with the given type code.
pub fn primitive_size(code: u8) -> Option<usize> {
    match code {
        b'Z' | b'B' => Some(1),
        b'C' | b'S' => Some(2),
        b'I' | b'F' => Some(4),
        b'J' | b'D' => Some(8),
        _ => None,
    }
}
