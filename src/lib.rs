//! # objstream
//!
//! An object-graph serialization engine speaking the Java object stream format: handle-based
//! sharing, block-data framing and class-descriptor reconciliation between writer and reader.
//!
//! ## Overview
//!
//! objstream writes arbitrary graphs of typed objects (cycles and shared references included)
//! and reads them back with identity preserved. Instead of flattening values, the writer assigns
//! every object, string, array, enum constant, class and descriptor a handle the first time it
//! appears; later occurrences are written as a back-reference to that handle.
//!
//! ### Key Features
//!
//! *   **Identity Preservation:** Shared structure and cycles survive a round trip. Unshared
//!     writes and reads opt out per value.
//! *   **Schema Evolution:** Each record carries a class descriptor with a 64-bit version
//!     identifier and the field list. The reader matches stream fields to local fields by name
//!     and type; missing fields keep their defaults and unknown ones are read and dropped.
//! *   **Custom Hooks:** Types may take over their own data (`WriteObject` / `ReadObject`),
//!     append optional data, substitute themselves on either side, or implement the whole
//!     protocol (`Externalizable`).
//! *   **Admission Control:** A filter sees every class, array length, nesting depth,
//!     reference count and byte count before the reader allocates anything.
//! *   **Inspection:** [`StreamInspector`] decodes any stream into a tree report without
//!     resolving classes.
//!
//! ## Architecture
//!
//! ### The Stream Model
//!
//! ```text
//! [Magic 0xACED] [Version 5] [Content] [Content] ...
//! ```
//!
//! Each content item is either an object record (tagged `TC_OBJECT`, `TC_STRING`, `TC_ARRAY`,
//! ...) or a run of primitive data framed as block data. Class data of an object is written
//! slot by slot, from the topmost serializable ancestor down to the concrete type.
//!
//! ### Descriptors
//!
//! [`desc::ClassDesc`] is the engine's view of a type: wire name, version identifier, flags,
//! field list with offsets and, for local types, the accessor table and bound hooks. Local
//! descriptors are built once per type from [`SerialType::type_info`] and cached; stream
//! descriptors are reconciled against them when read.
//!
//! ### Writer and Reader
//!
//! [`ObjectOutputStream`] and [`ObjectInputStream`] are the two engines. Both expose a primitive
//! data surface ([`DataOutput`] / [`DataInput`]) and an object surface ([`ObjectOutput`] /
//! [`ObjectInput`]) that hooks receive.
//!
//! ## Usage Patterns
//!
//! ### Basic Serialization
//!
//! ```rust
//! use objstream::{ObjStream, ObjectRef, Serializable, Value};
//!
//! #[derive(Debug, Default, Serializable)]
//! #[serial(name = "demo.Point", suid = 1)]
//! struct Point {
//!     x: i32,
//!     y: i32,
//!     label: Option<String>,
//! }
//!
//! objstream::register::<Point>()?;
//! let p = Value::object(Point { x: 1, y: 2, label: Some("origin".into()) });
//! let bytes = ObjStream::to_bytes(&p)?;
//!
//! let back = ObjStream::from_bytes(&bytes)?;
//! let point = back.as_object().and_then(ObjectRef::borrow::<Point>).unwrap();
//! assert_eq!((point.x, point.y), (1, 2));
//! # Ok::<(), objstream::StreamError>(())
//! ```
//!
//! ### Streams
//!
//! ```rust
//! use objstream::{DataInput, DataOutput, ObjectInput, ObjectInputStream, ObjectOutput,
//!     ObjectOutputStream, Value};
//!
//! let mut out = ObjectOutputStream::new(Vec::new())?;
//! out.write_int(42)?;
//! out.write_object(&Value::from("answer"))?;
//! let bytes = out.into_inner()?;
//!
//! let mut input = ObjectInputStream::new(&bytes[..])?;
//! assert_eq!(input.read_int()?, 42);
//! assert_eq!(input.read_object()?.as_str(), Some("answer"));
//! # Ok::<(), objstream::StreamError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** `unsafe` code is used only to memory-map files in
//!   [`ObjStream::load`] and [`StreamInspector::inspect_file`].
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** All failures correspond to a [`StreamError`].
//! * **Single-threaded Graphs:** Values are `Rc`-based and stay on the thread that built them;
//!   descriptors, the registry and the filter are shared process-wide.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

extern crate self as objstream;

// --- PUBLIC API MODULES ---
pub mod api;
pub mod block;
pub mod builtin;
pub mod config;
pub mod constants;
pub mod desc;
pub mod error;
pub mod filter;
pub mod format;
pub mod hooks;
pub mod input;
pub mod inspector;
pub mod output;
pub mod registry;
pub mod value;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod handles;

// --- MACRO SUPPORT MODULES ---

/// Runtime utilities used by the derived code.
#[doc(hidden)]
pub mod rt;

// --- RE-EXPORTS ---

pub use api::ObjStream;
pub use block::{DataInput, DataOutput};
pub use config::StreamConfig;
pub use desc::{ClassDesc, FieldSpec, SerialEnum, SerialField, SerialType, TypeInfo, Visibility};
pub use error::{Result, StreamError};
pub use filter::{FilterInfo, FilterStatus, ObjectInputFilter, PatternFilter};
pub use format::ProtocolVersion;
pub use hooks::{
    ClassAnnotator, Externalizable, ObjectInputValidation, ObjectReplacer, ObjectResolver,
    ReadObject, ReadObjectNoData, ReadResolve, WriteObject, WriteReplace,
};
pub use input::{GetField, ObjectInput, ObjectInputStream};
pub use inspector::{RecordInfo, StreamInspector, StreamReport};
pub use output::{ObjectOutput, ObjectOutputStream, PutField};
pub use registry::{ClassResolver, TypeRegistry, register, register_proxy};
pub use value::{Array, ArrayRef, EnumRef, FieldValue, ObjectRef, Prim, Serializable, Value};

// Re-export the derive macro so it is accessible as `objstream::Serializable`
pub use objstream_derive::Serializable;
