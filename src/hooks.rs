//! Capability traits for custom serialization behavior.
//!
//! A type opts into a hook by implementing the trait and declaring it in its [`TypeInfo`]
//! (`#[serial(write_object)]`, `#[serial(read_resolve)]`, ... with the derive macro). The
//! binding is resolved once when the type's descriptor is built; nothing is looked up per call.
//!
//! | Trait | Runs | Notes |
//! |-------|------|-------|
//! | [`WriteObject`] | while writing this type's own fields | data is framed as block data |
//! | [`ReadObject`] | while reading this type's own fields | must mirror `WriteObject` |
//! | [`ReadObjectNoData`] | stream has no data for this ancestor | |
//! | [`WriteReplace`] | before an instance is written | inheritable |
//! | [`ReadResolve`] | after an instance was read | inheritable |
//! | [`Externalizable`] | replaces the whole field protocol | needs a `Default` factory |
//!
//! [`TypeInfo`]: crate::desc::TypeInfo

use std::any::Any;

use crate::desc::ClassDesc;
use crate::error::{Result, StreamError};
use crate::input::ObjectInput;
use crate::output::ObjectOutput;
use crate::value::Value;

/// Custom write hook for the fields of the implementing type.
///
/// Call [`ObjectOutput::default_write_object`] (or `put_fields` + `write_fields`) first to emit the
/// declared fields, then write any optional data.
pub trait WriteObject {
    /// Writes this type's part of the object.
    fn write_object(&self, out: &mut dyn ObjectOutput) -> Result<()>;
}

/// Custom read hook, the dual of [`WriteObject`].
///
/// Restore the declared fields with `input.default_read_object(self)` (or
/// [`ObjectInput::read_fields`]) before reading any optional data.
pub trait ReadObject {
    /// Reads this type's part of the object.
    fn read_object(&mut self, input: &mut dyn ObjectInput) -> Result<()>;
}

/// Called instead of reading when the stream carries no data for this class.
///
/// Happens when the writer's version of the object did not have this class as an ancestor.
pub trait ReadObjectNoData {
    /// Initializes this type's part of the object without stream data.
    fn read_object_no_data(&mut self) -> Result<()>;
}

/// Substitutes another value for this instance when it is written.
pub trait WriteReplace {
    /// `Ok(None)` keeps the instance; `Ok(Some(v))` writes `v` instead (possibly `Value::Null`).
    fn write_replace(&self) -> Result<Option<Value>>;
}

/// Substitutes another value for this instance after it has been read.
pub trait ReadResolve {
    /// `Ok(None)` keeps the instance; `Ok(Some(v))` hands `v` to the caller instead.
    fn read_resolve(&self) -> Result<Option<Value>>;
}

/// Types that take full control of their wire representation.
///
/// Only the class identity is written by the engine; all content comes from these methods.
pub trait Externalizable {
    /// Writes the whole content of the instance.
    fn write_external(&self, out: &mut dyn ObjectOutput) -> Result<()>;

    /// Restores the content written by [`Externalizable::write_external`] into a default instance.
    fn read_external(&mut self, input: &mut dyn ObjectInput) -> Result<()>;
}

/// Deferred validation, run once the whole graph has been read.
pub trait ObjectInputValidation {
    /// Validates the object graph; an error aborts the read.
    fn validate_object(&self) -> Result<()>;
}

impl<F> ObjectInputValidation for F
where
    F: Fn() -> Result<()>,
{
    fn validate_object(&self) -> Result<()> {
        self()
    }
}

/// Stream-level substitution on write, applied after type-declared substitution.
pub trait ObjectReplacer {
    /// Returns the value to write in place of `value` (return a clone to keep it).
    fn replace_object(&mut self, value: &Value) -> Result<Value>;
}

/// Stream-level substitution on read, applied after type-declared substitution.
pub trait ObjectResolver {
    /// Returns the value to hand out in place of `value`.
    fn resolve_object(&mut self, value: &Value) -> Result<Value>;
}

/// Writes class annotations after each descriptor.
///
/// Whatever is written here is framed as block data and terminated by `TC_ENDBLOCKDATA`; the
/// reader skips it.
pub trait ClassAnnotator {
    /// Annotates an ordinary class descriptor.
    fn annotate_class(&mut self, desc: &ClassDesc, out: &mut dyn ObjectOutput) -> Result<()>;

    /// Annotates a proxy class descriptor. Defaults to [`ClassAnnotator::annotate_class`].
    fn annotate_proxy_class(&mut self, desc: &ClassDesc, out: &mut dyn ObjectOutput) -> Result<()> {
        self.annotate_class(desc, out)
    }
}

// --- Adapters binding typed hooks to type-erased function pointers ---

pub(crate) fn downcast_ref<T: 'static>(this: &dyn Any) -> Result<&T> {
    this.downcast_ref::<T>().ok_or_else(|| {
        StreamError::ClassCast(format!(
            "hook receiver is not a {}",
            std::any::type_name::<T>()
        ))
    })
}

pub(crate) fn downcast_mut<T: 'static>(this: &mut dyn Any) -> Result<&mut T> {
    this.downcast_mut::<T>().ok_or_else(|| {
        StreamError::ClassCast(format!(
            "hook receiver is not a {}",
            std::any::type_name::<T>()
        ))
    })
}

pub(crate) fn write_object_adapter<T: WriteObject + 'static>(
    this: &dyn Any,
    out: &mut dyn ObjectOutput,
) -> Result<()> {
    downcast_ref::<T>(this)?.write_object(out)
}

pub(crate) fn read_object_adapter<T: ReadObject + 'static>(
    this: &mut dyn Any,
    input: &mut dyn ObjectInput,
) -> Result<()> {
    downcast_mut::<T>(this)?.read_object(input)
}

pub(crate) fn read_object_no_data_adapter<T: ReadObjectNoData + 'static>(
    this: &mut dyn Any,
) -> Result<()> {
    downcast_mut::<T>(this)?.read_object_no_data()
}

pub(crate) fn write_replace_adapter<T: WriteReplace + 'static>(
    this: &dyn Any,
) -> Result<Option<Value>> {
    downcast_ref::<T>(this)?.write_replace()
}

pub(crate) fn read_resolve_adapter<T: ReadResolve + 'static>(
    this: &dyn Any,
) -> Result<Option<Value>> {
    downcast_ref::<T>(this)?.read_resolve()
}

pub(crate) fn write_external_adapter<T: Externalizable + 'static>(
    this: &dyn Any,
    out: &mut dyn ObjectOutput,
) -> Result<()> {
    downcast_ref::<T>(this)?.write_external(out)
}

pub(crate) fn read_external_adapter<T: Externalizable + 'static>(
    this: &mut dyn Any,
    input: &mut dyn ObjectInput,
) -> Result<()> {
    downcast_mut::<T>(this)?.read_external(input)
}
