//! The reader engine.
//!
//! [`ObjectInputStream`] reconstructs object graphs from the stream format. Every record that
//! introduces a referent gets a handle in the order it appears, so back-references resolve to the
//! very same value and shared structure and cycles come back intact.
//!
//! ## Reading an object
//!
//! 1. Read the class descriptor (resolving the class, checking the filter, skipping annotations).
//! 2. Allocate a default instance through the type's factory and bind its handle at once, so
//!    references to the object from inside its own data resolve.
//! 3. Read the class data slot by slot, topmost ancestor first. A slot with a
//!    [`ReadObject`](crate::hooks::ReadObject) hook is read by the hook; other slots are read in
//!    full and only then assigned.
//! 4. Apply type-declared substitution (`ReadResolve`), then the stream-level [`ObjectResolver`].
//!
//! A class that cannot be resolved does not stop the read. The failure is recorded against the
//! object's handle, the object's data is read and discarded, and the failure surfaces from the
//! top-level call whose result depends on it.
//!
//! Validation callbacks registered while reading run once the outermost call has finished,
//! highest priority first.

mod get_field;
mod validation;

pub use get_field::GetField;

use std::any::Any;
use std::fmt;
use std::io::Read;
use std::rc::Rc;
use std::sync::Arc;

use self::validation::ValidationList;
use crate::block::{BlockDataInput, DataInput};
use crate::builtin::WriteFailure;
use crate::config::StreamConfig;
use crate::constants::{ARRAY_PREALLOC_LIMIT, MAX_BLOCK_SIZE, MAX_PROXY_INTERFACES};
use crate::desc::{
    self, ClassDataSlot, ClassDesc, ElemType, ReadObjectFn, Special, StreamField, WireModel,
};
use crate::error::{Result, StreamError};
use crate::filter::{FilterInfo, FilterStatus, ObjectInputFilter};
use crate::format::{
    STREAM_MAGIC, STREAM_VERSION, TC_ARRAY, TC_BLOCKDATA, TC_BLOCKDATALONG, TC_CLASS,
    TC_CLASSDESC, TC_ENDBLOCKDATA, TC_ENUM, TC_EXCEPTION, TC_LONGSTRING, TC_NULL, TC_OBJECT,
    TC_PROXYCLASSDESC, TC_REFERENCE, TC_RESET, TC_STRING, primitive_size,
};
use crate::handles::{Handle, ReadEntry, ReadHandles};
use crate::hooks::{ObjectInputValidation, ObjectResolver};
use crate::registry::ClassResolver;
use crate::value::{Array, ArrayRef, EnumRef, FieldValue, ObjectRef, Prim, Value};

/// Bytes of primitive array data pulled from the source per read.
const PRIM_ARRAY_CHUNK: usize = MAX_BLOCK_SIZE * 8;

/// The object-level input surface handed to hooks.
pub trait ObjectInput: DataInput {
    /// Reads the next object, sharing values that were read before.
    fn read_object(&mut self) -> Result<Value>;

    /// Reads the next object as a fresh copy that later back-references may not refer to.
    fn read_unshared(&mut self) -> Result<Value>;

    /// Reads the declared fields of the class whose hook is running and assigns them to
    /// `target`, which must be the hook's receiver.
    fn default_read_object(&mut self, target: &mut dyn Any) -> Result<()>;

    /// Reads the declared fields of the class whose hook is running without assigning them.
    fn read_fields(&mut self) -> Result<GetField>;

    /// Registers a callback to run once the whole graph has been read. Callbacks with a higher
    /// `priority` run first.
    fn register_validation(
        &mut self,
        callback: Box<dyn ObjectInputValidation>,
        priority: i32,
    ) -> Result<()>;

    /// Bytes of primitive data readable without blocking on the next record.
    fn available(&mut self) -> Result<usize>;
}

/// The class whose read hook is running.
struct ReadContext {
    desc: Arc<ClassDesc>,
    handle: Handle,
    used: bool,
}

/// Field values read for one slot, as `(field index, value)` pairs.
type SlotValues = Vec<(usize, FieldValue)>;

/// Reconstructs object graphs from a byte source.
///
/// ```rust
/// use objstream::{DataInput, DataOutput, ObjectInput, ObjectInputStream, ObjectOutput,
///     ObjectOutputStream, Value};
///
/// let mut out = ObjectOutputStream::new(Vec::new())?;
/// let greeting = Value::from("hello");
/// out.write_object(&greeting)?;
/// out.write_object(&greeting)?;
/// out.write_int(7)?;
/// let bytes = out.into_inner()?;
///
/// let mut input = ObjectInputStream::new(&bytes[..])?;
/// let a = input.read_object()?;
/// let b = input.read_object()?;
/// assert!(a.ptr_eq(&b));
/// assert_eq!(input.read_int()?, 7);
/// # Ok::<(), objstream::StreamError>(())
/// ```
pub struct ObjectInputStream<R: Read> {
    bin: BlockDataInput<R>,
    handles: ReadHandles,
    /// Handle of the value most recently read; `None` for null.
    pass_handle: Option<Handle>,
    depth: usize,
    total_refs: u64,
    context: Option<ReadContext>,
    vlist: ValidationList,
    resolver: Box<dyn ClassResolver>,
    filter: Option<Arc<dyn ObjectInputFilter>>,
    filter_set: bool,
    object_resolver: Option<Box<dyn ObjectResolver>>,
}

impl<R: Read> fmt::Debug for ObjectInputStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectInputStream")
            .field("handles", &self.handles.len())
            .field("depth", &self.depth)
            .field("references", &self.total_refs)
            .field("validations", &self.vlist.len())
            .field("filter", &self.filter.is_some())
            .field("object_resolver", &self.object_resolver.is_some())
            .finish()
    }
}

impl<R: Read> ObjectInputStream<R> {
    /// Creates a stream with the default configuration and reads the stream header.
    pub fn new(input: R) -> Result<Self> {
        Self::with_config(input, &StreamConfig::default())
    }

    /// Creates a stream and reads the stream header.
    pub fn with_config(input: R, config: &StreamConfig) -> Result<Self> {
        let mut stream = Self {
            bin: BlockDataInput::new(input),
            handles: ReadHandles::new(),
            pass_handle: None,
            depth: 0,
            total_refs: 0,
            context: None,
            vlist: ValidationList::new(),
            resolver: config.resolver(),
            filter: config.input_filter()?,
            filter_set: config.filter.is_some(),
            object_resolver: None,
        };
        let magic = stream.bin.read_unsigned_short()?;
        let version = stream.bin.read_unsigned_short()?;
        if magic != STREAM_MAGIC || version != STREAM_VERSION {
            return Err(StreamError::corrupted(format!(
                "invalid stream header: {magic:04X}{version:04X}"
            )));
        }
        stream.bin.set_block_data_mode(true)?;
        log::debug!("[reader] stream opened");
        Ok(stream)
    }

    /// Replaces the class resolver, returning the previous one.
    pub fn set_class_resolver(
        &mut self,
        resolver: Box<dyn ClassResolver>,
    ) -> Box<dyn ClassResolver> {
        std::mem::replace(&mut self.resolver, resolver)
    }

    /// Installs the stream's filter.
    ///
    /// Only allowed before the first object is read, and only once (a filter inherited from the
    /// process-wide setting may be replaced).
    pub fn set_filter(&mut self, filter: Arc<dyn ObjectInputFilter>) -> Result<()> {
        if self.total_refs > 0 {
            return Err(StreamError::IllegalState(
                "filter can not be set after an object has been read".to_string(),
            ));
        }
        if self.filter_set {
            return Err(StreamError::IllegalState(
                "filter can not be set more than once".to_string(),
            ));
        }
        self.filter = Some(filter);
        self.filter_set = true;
        Ok(())
    }

    /// The filter in effect, if any.
    pub fn filter(&self) -> Option<&Arc<dyn ObjectInputFilter>> {
        self.filter.as_ref()
    }

    /// Installs (or removes) the stream-level resolver, returning the previous one.
    pub fn set_object_resolver(
        &mut self,
        resolver: Option<Box<dyn ObjectResolver>>,
    ) -> Option<Box<dyn ObjectResolver>> {
        std::mem::replace(&mut self.object_resolver, resolver)
    }

    /// Number of handles assigned since the stream was opened or last reset.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Bytes consumed from the source so far.
    pub fn bytes_read(&self) -> u64 {
        self.bin.bytes_read()
    }

    fn clear(&mut self) {
        self.handles.clear();
        self.vlist.clear();
    }

    fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
        self.bin.set_depth(depth);
    }

    fn read_top(&mut self, unshared: bool) -> Result<Value> {
        let outer = self.pass_handle;
        let open = self.handles.open_count();
        let res = self.read_object0(unshared).and_then(|obj| {
            self.handles.mark_dependency(outer, self.pass_handle)?;
            if let Some(err) = self.handles.lookup_exception(self.pass_handle) {
                return Err(err);
            }
            if self.depth == 0 {
                self.vlist.run()?;
            }
            Ok(obj)
        });
        if res.is_err() {
            self.handles.abandon_open(open);
            if self.depth == 0 {
                self.vlist.clear();
            }
        }
        self.pass_handle = outer;
        res
    }

    fn read_object0(&mut self, unshared: bool) -> Result<Value> {
        let old_mode = self.bin.block_data_mode();
        if old_mode {
            let remaining = self.bin.current_block_remaining()?;
            if remaining > 0 {
                return Err(StreamError::OptionalData {
                    length: remaining,
                    eof: false,
                });
            }
            if self.bin.default_data_end() {
                return Err(StreamError::OptionalData {
                    length: 0,
                    eof: true,
                });
            }
            self.bin.set_block_data_mode(false)?;
        }
        if self.bin.take_reset() {
            self.handle_reset()?;
        }

        let res = self.read_record(unshared, old_mode);
        let restored = self.bin.set_block_data_mode(old_mode);
        let value = res?;
        restored?;
        Ok(value)
    }

    fn read_record(&mut self, unshared: bool, old_mode: bool) -> Result<Value> {
        let mut tc = self.bin.peek_byte()?;
        while tc == TC_RESET {
            self.bin.read_byte()?;
            self.handle_reset()?;
            tc = self.bin.peek_byte()?;
        }

        self.set_depth(self.depth + 1);
        self.total_refs += 1;
        let res = self.dispatch(tc, unshared, old_mode);
        self.set_depth(self.depth - 1);
        res
    }

    fn dispatch(&mut self, tc: u8, unshared: bool, old_mode: bool) -> Result<Value> {
        match tc {
            TC_NULL => {
                self.bin.read_byte()?;
                self.pass_handle = None;
                Ok(Value::Null)
            }
            TC_REFERENCE => self.read_handle(unshared),
            TC_CLASS => self.read_class(unshared),
            TC_CLASSDESC | TC_PROXYCLASSDESC => Ok(self
                .read_class_desc(unshared)?
                .map_or(Value::Null, Value::Desc)),
            TC_STRING | TC_LONGSTRING => {
                let s = self.read_string(unshared)?;
                self.check_resolve(Value::Str(s))
            }
            TC_ARRAY => {
                let array = self.read_array(unshared)?;
                self.check_resolve(array)
            }
            TC_ENUM => {
                let constant = self.read_enum(unshared)?;
                self.check_resolve(constant)
            }
            TC_OBJECT => {
                let obj = self.read_ordinary_object(unshared)?;
                self.check_resolve(obj)
            }
            TC_EXCEPTION => Err(StreamError::WriteAborted(self.read_fatal_exception()?)),
            TC_BLOCKDATA | TC_BLOCKDATALONG => {
                if !old_mode {
                    return Err(StreamError::corrupted("unexpected block data"));
                }
                self.bin.set_block_data_mode(true)?;
                self.bin.peek()?;
                Err(StreamError::OptionalData {
                    length: self.bin.current_block_remaining()?,
                    eof: false,
                })
            }
            TC_ENDBLOCKDATA => {
                if old_mode {
                    Err(StreamError::OptionalData {
                        length: 0,
                        eof: true,
                    })
                } else {
                    Err(StreamError::corrupted("unexpected end of block data"))
                }
            }
            tc => Err(StreamError::corrupted(format!("invalid type code: {tc:02X}"))),
        }
    }

    fn handle_reset(&mut self) -> Result<()> {
        if self.depth > 0 {
            return Err(StreamError::corrupted(format!(
                "unexpected reset; recursion depth: {}",
                self.depth
            )));
        }
        self.clear();
        log::debug!("[reader] reset");
        Ok(())
    }

    /// Applies the stream-level resolver to a freshly read value.
    fn check_resolve(&mut self, obj: Value) -> Result<Value> {
        if self.handles.lookup_exception(self.pass_handle).is_some() {
            return Ok(obj);
        }
        let Some(mut resolver) = self.object_resolver.take() else {
            return Ok(obj);
        };
        let rep = resolver.resolve_object(&obj);
        self.object_resolver = Some(resolver);
        let rep = rep?;
        if !rep.ptr_eq(&obj) {
            self.filter_replacement(&rep, false)?;
            if let Some(handle) = self.pass_handle {
                self.handles.set_object(handle, rep.clone())?;
            }
            log::trace!("[reader] resolved {obj:?} to {rep:?}");
        }
        Ok(rep)
    }

    fn filter_check(&self, class: Option<&ClassDesc>, array_length: i64) -> Result<()> {
        let Some(filter) = &self.filter else {
            return Ok(());
        };
        let info = FilterInfo {
            class,
            array_length,
            references: self.total_refs,
            depth: self.depth as u64,
            stream_bytes: self.bin.bytes_read(),
        };
        let status = match filter.check_input(&info) {
            Ok(status) => status,
            Err(e) => {
                log::debug!("[reader] filter failed: {e}");
                FilterStatus::Rejected
            }
        };
        if status == FilterStatus::Rejected {
            log::debug!(
                "[reader] filter rejected {} (array length {array_length}, depth {}, refs {})",
                class.map_or("back-reference", |c| c.name()),
                self.depth,
                self.total_refs
            );
            return Err(StreamError::invalid("filter status: REJECTED"));
        }
        Ok(())
    }

    /// Filters a substituted value. Only arrays are checked when `arrays_only` is set.
    fn filter_replacement(&self, rep: &Value, arrays_only: bool) -> Result<()> {
        if self.filter.is_none() {
            return Ok(());
        }
        match rep {
            Value::Null => Ok(()),
            Value::Array(a) => {
                let len = a.try_borrow_checked()?.len();
                self.filter_check(Some(&*rep.class_desc()?), len as i64)
            }
            _ if arrays_only => Ok(()),
            other => self.filter_check(Some(&*other.class_desc()?), -1),
        }
    }

    fn read_handle(&mut self, unshared: bool) -> Result<Value> {
        self.bin.read_byte()?;
        let wire = self.bin.read_int()?;
        let handle = Handle::from_wire(wire)
            .filter(|h| h.index() < self.handles.len())
            .ok_or_else(|| StreamError::corrupted(format!("invalid handle value: {wire:08X}")))?;
        self.pass_handle = Some(handle);
        if unshared {
            return Err(StreamError::InvalidObject(
                "cannot read back reference as unshared".to_string(),
            ));
        }
        let value = match self.handles.lookup_object(handle) {
            Some(ReadEntry::Object(v)) => v.clone(),
            Some(ReadEntry::Unshared) => {
                return Err(StreamError::InvalidObject(
                    "cannot read back reference to unshared object".to_string(),
                ));
            }
            Some(ReadEntry::Pending | ReadEntry::Failed(_)) | None => Value::Null,
        };
        self.filter_check(None, -1)?;
        log::trace!("[reader] back-reference to handle {handle}");
        Ok(value)
    }

    fn read_class_desc(&mut self, unshared: bool) -> Result<Option<Arc<ClassDesc>>> {
        match self.bin.peek_byte()? {
            TC_NULL => {
                self.bin.read_byte()?;
                self.pass_handle = None;
                Ok(None)
            }
            TC_REFERENCE => match self.read_handle(unshared)? {
                Value::Desc(d) => Ok(Some(d)),
                other => Err(StreamError::corrupted(format!(
                    "back-reference to {} where a class descriptor was expected",
                    other.describe()
                ))),
            },
            TC_PROXYCLASSDESC => self.read_proxy_desc(unshared).map(Some),
            TC_CLASSDESC => self.read_non_proxy_desc(unshared).map(Some),
            tc => Err(StreamError::corrupted(format!("invalid type code: {tc:02X}"))),
        }
    }

    /// Reads a descriptor that must be present.
    fn read_required_desc(&mut self, what: &str) -> Result<Arc<ClassDesc>> {
        self.read_class_desc(false)?
            .ok_or_else(|| StreamError::corrupted(format!("{what} without class descriptor")))
    }

    fn desc_entry(unshared: bool) -> ReadEntry {
        if unshared {
            ReadEntry::Unshared
        } else {
            ReadEntry::Pending
        }
    }

    fn read_non_proxy_desc(&mut self, unshared: bool) -> Result<Arc<ClassDesc>> {
        self.bin.read_byte()?;
        let handle = self.handles.assign(Self::desc_entry(unshared));
        self.pass_handle = None;
        let model = self.read_wire_model()?;

        self.bin.set_block_data_mode(true)?;
        let (local, resolve_error) = match self.resolver.resolve_class(&model.name, model.suid) {
            Ok(d) => (Some(d), None),
            Err(e @ StreamError::ClassNotFound(_)) => {
                log::debug!("[reader] class {} not resolved: {e}", model.name);
                (None, Some(e))
            }
            Err(e) => return Err(e),
        };
        self.filter_check(local.as_deref(), -1)?;
        self.skip_custom_data()?;

        let super_desc = self.read_super_desc()?;
        let desc = ClassDesc::init_non_proxy(model, local, resolve_error, super_desc)?;
        self.handles.set_object(handle, Value::Desc(desc.clone()))?;
        self.handles.finish(handle)?;
        self.pass_handle = Some(handle);
        log::debug!(
            "[reader] descriptor {} suid={} bound={}",
            desc.name(),
            desc.suid(),
            desc.is_bound()
        );
        Ok(desc)
    }

    fn read_proxy_desc(&mut self, unshared: bool) -> Result<Arc<ClassDesc>> {
        self.bin.read_byte()?;
        let handle = self.handles.assign(Self::desc_entry(unshared));
        self.pass_handle = None;

        let count = self.bin.read_int()?;
        if count > MAX_PROXY_INTERFACES {
            return Err(StreamError::InvalidObject(format!(
                "interface limit exceeded: {count}"
            )));
        }
        let count = usize::try_from(count)
            .map_err(|_| StreamError::corrupted(format!("negative interface count: {count}")))?;
        let mut interfaces: Vec<Arc<str>> = Vec::with_capacity(count);
        for _ in 0..count {
            interfaces.push(Arc::from(self.bin.read_utf()?));
        }

        self.bin.set_block_data_mode(true)?;
        let (local, resolve_error) = match self.resolver.resolve_proxy_class(&interfaces) {
            Ok(d) if !d.is_proxy() => {
                return Err(StreamError::invalid_class(d.name(), "Not a proxy"));
            }
            Ok(d) => (Some(d), None),
            Err(e @ StreamError::ClassNotFound(_)) => {
                log::debug!("[reader] proxy class not resolved: {e}");
                (None, Some(e))
            }
            Err(e) => return Err(e),
        };
        self.filter_check(local.as_deref(), -1)?;
        self.skip_custom_data()?;

        let super_desc = self.read_super_desc()?;
        let desc = ClassDesc::init_proxy(interfaces, local, resolve_error, super_desc)?;
        self.handles.set_object(handle, Value::Desc(desc.clone()))?;
        self.handles.finish(handle)?;
        self.pass_handle = Some(handle);
        log::debug!("[reader] proxy descriptor {}", desc.name());
        Ok(desc)
    }

    fn read_super_desc(&mut self) -> Result<Option<Arc<ClassDesc>>> {
        self.total_refs += 1;
        self.set_depth(self.depth + 1);
        let res = self.read_class_desc(false);
        self.set_depth(self.depth - 1);
        res
    }

    /// Name, version identifier, flags and fields of a descriptor record.
    fn read_wire_model(&mut self) -> Result<WireModel> {
        let name = self.bin.read_utf()?;
        let suid = self.bin.read_long()?;
        let flags = self.bin.read_unsigned_byte()?;
        let count = self.bin.read_short()?;
        let count = usize::try_from(count).map_err(|_| {
            StreamError::invalid_class(&name, format!("negative field count: {count}"))
        })?;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let code = self.bin.read_unsigned_byte()?;
            let field_name = self.bin.read_utf()?;
            let signature = if code == b'L' || code == b'[' {
                self.read_type_string()?
            } else {
                Some(Rc::from((code as char).to_string()))
            };
            let field = signature
                .and_then(|sig| StreamField::new(&field_name, &sig, false).ok())
                .ok_or_else(|| {
                    StreamError::invalid_class(
                        &name,
                        format!("invalid descriptor for field {field_name}"),
                    )
                })?;
            fields.push(field);
        }
        WireModel::new(&name, suid, flags, fields)
    }

    fn read_type_string(&mut self) -> Result<Option<Rc<str>>> {
        let old = self.pass_handle;
        let res = match self.bin.peek_byte()? {
            TC_NULL => self.bin.read_byte().map(|_| None),
            TC_REFERENCE => match self.read_handle(false)? {
                Value::Str(s) => Ok(Some(s)),
                Value::Null => Ok(None),
                other => Err(StreamError::corrupted(format!(
                    "back-reference to {} where a type string was expected",
                    other.describe()
                ))),
            },
            TC_STRING | TC_LONGSTRING => self.read_string(false).map(Some),
            tc => Err(StreamError::corrupted(format!("invalid type code: {tc:02X}"))),
        };
        self.pass_handle = old;
        res
    }

    fn read_class(&mut self, unshared: bool) -> Result<Value> {
        self.bin.read_byte()?;
        let desc = self.read_required_desc("class")?;
        let value = desc.local_view().map_or(Value::Null, Value::Class);
        let handle = self.handles.assign(if unshared {
            ReadEntry::Unshared
        } else {
            ReadEntry::Object(value.clone())
        });
        if let Some(e) = desc.resolve_error() {
            self.handles.mark_exception(handle, e.clone())?;
        }
        self.handles.finish(handle)?;
        self.pass_handle = Some(handle);
        Ok(value)
    }

    fn read_string(&mut self, unshared: bool) -> Result<Rc<str>> {
        let s: Rc<str> = match self.bin.read_unsigned_byte()? {
            TC_STRING => Rc::from(self.bin.read_utf()?),
            TC_LONGSTRING => Rc::from(self.bin.read_long_utf()?),
            tc => {
                return Err(StreamError::corrupted(format!("invalid type code: {tc:02X}")));
            }
        };
        let handle = self.handles.assign(if unshared {
            ReadEntry::Unshared
        } else {
            ReadEntry::Object(Value::Str(s.clone()))
        });
        self.handles.finish(handle)?;
        self.pass_handle = Some(handle);
        Ok(s)
    }

    fn read_array(&mut self, unshared: bool) -> Result<Value> {
        self.bin.read_byte()?;
        let desc = self.read_required_desc("array")?;
        let len = self.bin.read_int()?;
        let local = desc.local_view();
        self.filter_check(local.as_deref(), i64::from(len))?;
        let len = usize::try_from(len)
            .map_err(|_| StreamError::corrupted(format!("negative array length: {len}")))?;
        let elem = desc::parse_array_elem(desc.name())
            .ok_or_else(|| StreamError::invalid_class(desc.name(), "not an array class"))?;

        let resolved = desc.is_bound();
        let array = ArrayRef::new(match &elem {
            ElemType::Prim(_) => Array::Byte(Vec::new()),
            ElemType::Ref(_) => Array::Object {
                class_name: desc.name.clone(),
                elements: Vec::new(),
            },
        });
        let value = Value::Array(array.clone());
        let handle = self.handles.assign(match (unshared, resolved) {
            (true, _) => ReadEntry::Unshared,
            (false, true) => ReadEntry::Object(value.clone()),
            (false, false) => ReadEntry::Object(Value::Null),
        });
        if let Some(e) = desc.resolve_error() {
            self.handles.mark_exception(handle, e.clone())?;
        }

        match elem {
            ElemType::Prim(code) => {
                let contents = self.read_prim_array(code, len)?;
                *array.try_borrow_mut_checked()? = contents;
            }
            ElemType::Ref(_) => {
                let mut elements = Vec::with_capacity(len.min(ARRAY_PREALLOC_LIMIT));
                for _ in 0..len {
                    let element = self.read_object0(false)?;
                    if resolved {
                        self.handles.mark_dependency(Some(handle), self.pass_handle)?;
                    }
                    elements.push(element);
                }
                if let Array::Object { elements: slot, .. } =
                    &mut *array.try_borrow_mut_checked()?
                {
                    *slot = elements;
                }
            }
        }
        self.handles.finish(handle)?;
        self.pass_handle = Some(handle);
        Ok(if resolved { value } else { Value::Null })
    }

    fn read_prim_array(&mut self, code: u8, len: usize) -> Result<Array> {
        let size = primitive_size(code).ok_or_else(|| {
            StreamError::Internal(format!("not a primitive type code: {}", code as char))
        })?;
        let total = len
            .checked_mul(size)
            .ok_or_else(|| StreamError::corrupted(format!("array length {len} too large")))?;
        let mut bytes = Vec::with_capacity(len.min(ARRAY_PREALLOC_LIMIT) * size);
        let mut chunk = vec![0u8; total.min(PRIM_ARRAY_CHUNK)];
        let mut remaining = total;
        while remaining > 0 {
            let n = remaining.min(chunk.len());
            self.bin.read_fully(&mut chunk[..n])?;
            bytes.extend_from_slice(&chunk[..n]);
            remaining -= n;
        }
        Ok(decode_prim_array(code, &bytes))
    }

    fn read_enum(&mut self, unshared: bool) -> Result<Value> {
        self.bin.read_byte()?;
        let desc = self.read_required_desc("enum constant")?;
        if !desc.is_enum() {
            return Err(StreamError::invalid_class(desc.name(), "non-enum class"));
        }
        let handle = self.handles.assign(if unshared {
            ReadEntry::Unshared
        } else {
            ReadEntry::Object(Value::Null)
        });
        if let Some(e) = desc.resolve_error() {
            self.handles.mark_exception(handle, e.clone())?;
        }
        let name = self.read_string(false)?;

        let mut result = Value::Null;
        if let Some(local) = desc.local() {
            let constants = local
                .enum_constants()
                .ok_or_else(|| StreamError::invalid_class(&*local.name, "non-enum class"))?;
            let ordinal = constants.iter().position(|c| **c == *name).ok_or_else(|| {
                StreamError::InvalidObject(format!(
                    "enum constant {name} does not exist in {}",
                    local.name
                ))
            })?;
            let lookup = local.lookup.ok_or_else(|| {
                StreamError::invalid_class(&*local.name, "enum type has no descriptor")
            })?;
            result = Value::Enum(EnumRef {
                lookup,
                type_name: local.name.clone(),
                name: constants[ordinal],
                ordinal,
            });
            if !unshared {
                self.handles.set_object(handle, result.clone())?;
            }
        }
        self.handles.finish(handle)?;
        self.pass_handle = Some(handle);
        Ok(result)
    }

    fn read_ordinary_object(&mut self, unshared: bool) -> Result<Value> {
        self.bin.read_byte()?;
        let desc = self.read_required_desc("object")?;
        desc.check_deserialize()?;
        if desc.is_enum()
            || matches!(
                desc.special(),
                Some(
                    Special::Object
                        | Special::String
                        | Special::Class
                        | Special::Descriptor
                        | Special::EnumBase
                )
            )
        {
            return Err(StreamError::invalid_class(desc.name(), "invalid class descriptor"));
        }

        let obj = if desc.is_bound() {
            Some(desc.new_instance()?)
        } else {
            None
        };
        let value = obj.clone().map_or(Value::Null, Value::Object);
        let handle = self.handles.assign(if unshared {
            ReadEntry::Unshared
        } else {
            ReadEntry::Object(value.clone())
        });
        self.pass_handle = Some(handle);
        if let Some(e) = desc.resolve_error() {
            self.handles.mark_exception(handle, e.clone())?;
        }

        if desc.is_externalizable() {
            self.read_external_data(obj.as_ref(), &desc, handle)?;
        } else {
            self.read_serial_data(obj.as_ref(), &desc, handle)?;
        }
        self.handles.finish(handle)?;
        self.pass_handle = Some(handle);

        let mut result = value;
        if let Some(o) = &obj
            && self.handles.lookup_exception(Some(handle)).is_none()
            && desc.has_read_resolve_method()
        {
            let rep = {
                let guard = o.try_borrow_any()?;
                desc.invoke_read_resolve(guard.as_any())?
            };
            if let Some(mut rep) = rep {
                if unshared && let Value::Array(a) = &rep {
                    rep = Value::Array(a.shallow_clone()?);
                }
                if !rep.ptr_eq(&result) {
                    self.filter_replacement(&rep, true)?;
                    self.handles.set_object(handle, rep.clone())?;
                    log::trace!("[reader] {} resolved to {rep:?}", desc.name());
                    result = rep;
                }
            }
        }
        Ok(result)
    }

    fn read_external_data(
        &mut self,
        obj: Option<&ObjectRef>,
        desc: &ClassDesc,
        handle: Handle,
    ) -> Result<()> {
        let saved = self.context.take();
        let res = self.run_external(obj, desc, handle);
        self.context = saved;
        res
    }

    fn run_external(
        &mut self,
        obj: Option<&ObjectRef>,
        desc: &ClassDesc,
        handle: Handle,
    ) -> Result<()> {
        let blocked = desc.has_block_external_data();
        if blocked {
            self.bin.set_block_data_mode(true)?;
        }
        if let Some(o) = obj {
            let hook = desc
                .hooks()
                .and_then(|h| h.read_external)
                .ok_or_else(|| {
                    StreamError::invalid_class(desc.name(), "no read_external binding")
                })?;
            let res = {
                let mut guard = o.try_borrow_any_mut()?;
                hook(guard.as_any_mut(), self)
            };
            match res {
                Err(e @ StreamError::ClassNotFound(_)) => self.handles.mark_exception(handle, e)?,
                other => other?,
            }
        }
        if blocked {
            self.skip_custom_data()?;
        }
        Ok(())
    }

    /// Reads the class data of an object slot by slot.
    ///
    /// Field values are assigned only once a slot has been read completely. When no slot with
    /// data has a read hook, assignment waits until every slot has been read.
    fn read_serial_data(
        &mut self,
        obj: Option<&ObjectRef>,
        desc: &Arc<ClassDesc>,
        handle: Handle,
    ) -> Result<()> {
        let slots = desc.class_data_layout()?;
        let batch = !slots
            .iter()
            .any(|s| s.has_data() && s.desc().has_read_object_method());
        let mut pending: Vec<(ClassDataSlot, SlotValues)> = Vec::new();

        for slot in &slots {
            let slot_desc = slot.desc();
            let live = obj.filter(|_| self.handles.lookup_exception(Some(handle)).is_none());
            if slot.has_data() {
                match (live, slot_desc.hooks().and_then(|h| h.read_object)) {
                    (Some(o), Some(hook)) => self.invoke_read_hook(o, slot, hook, handle)?,
                    (live, _) => {
                        let values = self.read_slot_fields(slot_desc, handle)?;
                        if let Some(o) = live {
                            if batch {
                                pending.push((slot.clone(), values));
                            } else {
                                self.commit(o, slot, values, handle)?;
                            }
                        }
                    }
                }
                if slot_desc.has_write_object_data() {
                    self.skip_custom_data()?;
                } else {
                    self.bin.set_block_data_mode(false)?;
                }
            } else if let Some(o) = live
                && let Some(hook) = slot_desc.hooks().and_then(|h| h.read_object_no_data)
            {
                let mut guard = o.try_borrow_any_mut()?;
                let part = slot
                    .project_mut(guard.as_any_mut())
                    .ok_or_else(|| unreachable_slot(slot))?;
                hook(part)?;
            }
        }

        if let Some(o) = obj {
            for (slot, values) in pending {
                self.commit(o, &slot, values, handle)?;
            }
        }
        Ok(())
    }

    /// Reads the default field data of one class: primitive bytes, then each reference.
    ///
    /// Returns the values of the fields bound to a local field; the others are discarded.
    fn read_slot_fields(&mut self, desc: &ClassDesc, handle: Handle) -> Result<SlotValues> {
        let mut prims = vec![0u8; desc.prim_data_size()];
        self.bin.read_fully(&mut prims)?;

        let mut values = Vec::with_capacity(desc.fields().len());
        for (i, field) in desc.fields().iter().enumerate() {
            if field.is_primitive() && field.is_bound() {
                let bytes = prims.get(field.offset()..).ok_or_else(|| {
                    StreamError::Internal(format!(
                        "field {} lies outside the primitive data",
                        field.name()
                    ))
                })?;
                values.push((i, FieldValue::Prim(Prim::decode(field.type_code(), bytes)?)));
            }
        }
        for (i, field) in desc.fields().iter().enumerate() {
            if field.is_primitive() {
                continue;
            }
            let value = self.read_object0(field.is_unshared())?;
            if field.is_bound() {
                self.handles.mark_dependency(Some(handle), self.pass_handle)?;
                values.push((i, FieldValue::Ref(value)));
            }
        }
        self.pass_handle = Some(handle);
        Ok(values)
    }

    fn commit(
        &mut self,
        obj: &ObjectRef,
        slot: &ClassDataSlot,
        values: SlotValues,
        handle: Handle,
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let skip_refs = self.handles.lookup_exception(Some(handle)).is_some();
        let mut guard = obj.try_borrow_any_mut()?;
        let part = slot
            .project_mut(guard.as_any_mut())
            .ok_or_else(|| unreachable_slot(slot))?;
        assign_fields(slot.desc(), part, values, skip_refs)
    }

    fn invoke_read_hook(
        &mut self,
        obj: &ObjectRef,
        slot: &ClassDataSlot,
        hook: ReadObjectFn,
        handle: Handle,
    ) -> Result<()> {
        let saved = self.context.replace(ReadContext {
            desc: slot.desc().clone(),
            handle,
            used: false,
        });
        let res = self.run_read_hook(obj, slot, hook, handle);
        self.context = saved;
        self.bin.set_default_data_end(false);
        match res {
            Err(e @ StreamError::ClassNotFound(_)) => self.handles.mark_exception(handle, e),
            other => other,
        }
    }

    fn run_read_hook(
        &mut self,
        obj: &ObjectRef,
        slot: &ClassDataSlot,
        hook: ReadObjectFn,
        handle: Handle,
    ) -> Result<()> {
        self.bin.set_block_data_mode(true)?;
        self.pass_handle = Some(handle);
        let mut guard = obj.try_borrow_any_mut()?;
        let part = slot
            .project_mut(guard.as_any_mut())
            .ok_or_else(|| unreachable_slot(slot))?;
        hook(part, self)
    }

    /// Marks the running hook's fields as consumed.
    fn claim_context(&mut self) -> Result<(Arc<ClassDesc>, Handle)> {
        let ctx = self
            .context
            .as_mut()
            .ok_or_else(|| StreamError::NotActive("not in call to read_object".to_string()))?;
        if ctx.used {
            return Err(StreamError::NotActive(
                "not in read_object invocation or fields already read".to_string(),
            ));
        }
        ctx.used = true;
        Ok((ctx.desc.clone(), ctx.handle))
    }

    /// Skips optional data up to and including the closing `TC_ENDBLOCKDATA`, reading (and
    /// discarding) any objects on the way.
    fn skip_custom_data(&mut self) -> Result<()> {
        let old = self.pass_handle;
        loop {
            if self.bin.block_data_mode() {
                self.bin.skip_block_data()?;
                self.bin.set_block_data_mode(false)?;
            }
            match self.bin.peek_byte()? {
                TC_BLOCKDATA | TC_BLOCKDATALONG => {
                    self.bin.set_block_data_mode(true)?;
                }
                TC_ENDBLOCKDATA => {
                    self.bin.read_byte()?;
                    self.pass_handle = old;
                    return Ok(());
                }
                _ => {
                    self.read_object0(false)?;
                }
            }
        }
    }

    /// Reads the failure record of an aborted writer and returns its message.
    fn read_fatal_exception(&mut self) -> Result<String> {
        self.bin.read_byte()?;
        self.clear();
        let record = self.read_object0(false)?;
        self.clear();
        let message = record
            .as_object()
            .and_then(|o| o.borrow::<WriteFailure>().and_then(|w| w.message.clone()));
        Ok(message.unwrap_or_else(|| record.describe()))
    }

    fn after_read(&mut self) -> Result<()> {
        if self.bin.take_reset() {
            self.handle_reset()?;
        }
        Ok(())
    }
}

impl<R: Read> DataInput for ObjectInputStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.bin.read(buf)?;
        self.after_read()?;
        Ok(n)
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        let res = self.bin.read_fully(buf);
        self.after_read()?;
        res
    }
}

impl<R: Read> ObjectInput for ObjectInputStream<R> {
    fn read_object(&mut self) -> Result<Value> {
        self.read_top(false)
    }

    fn read_unshared(&mut self) -> Result<Value> {
        self.read_top(true)
    }

    fn default_read_object(&mut self, target: &mut dyn Any) -> Result<()> {
        let (desc, handle) = self.claim_context()?;
        self.bin.set_block_data_mode(false)?;
        let values = self.read_slot_fields(&desc, handle)?;
        let skip_refs = self.handles.lookup_exception(Some(handle)).is_some();
        assign_fields(&desc, target, values, skip_refs)?;
        self.bin.set_block_data_mode(true)?;
        if !desc.has_write_object_data() {
            self.bin.set_default_data_end(true);
        }
        match self.handles.lookup_exception(Some(handle)) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn read_fields(&mut self) -> Result<GetField> {
        let (desc, handle) = self.claim_context()?;
        self.bin.set_block_data_mode(false)?;
        let mut prims = vec![0u8; desc.prim_data_size()];
        self.bin.read_fully(&mut prims)?;

        let mut objects = Vec::with_capacity(desc.num_obj_fields());
        let mut failed = Vec::with_capacity(desc.num_obj_fields());
        for field in desc.fields().iter().filter(|f| !f.is_primitive()) {
            let value = self.read_object0(field.is_unshared())?;
            self.handles.mark_dependency(Some(handle), self.pass_handle)?;
            failed.push(self.handles.lookup_exception(self.pass_handle).is_some());
            objects.push(value);
        }
        self.pass_handle = Some(handle);

        self.bin.set_block_data_mode(true)?;
        if !desc.has_write_object_data() {
            self.bin.set_default_data_end(true);
        }
        Ok(GetField::new(desc, prims, objects, failed))
    }

    fn register_validation(
        &mut self,
        callback: Box<dyn ObjectInputValidation>,
        priority: i32,
    ) -> Result<()> {
        if self.depth == 0 {
            return Err(StreamError::NotActive("stream inactive".to_string()));
        }
        self.vlist.register(callback, priority);
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        if !self.bin.block_data_mode() {
            return Ok(0);
        }
        self.bin.peek()?;
        self.bin.current_block_remaining()
    }
}

/// Assigns buffered field values through the descriptor's setters. Reference values are dropped
/// when `skip_refs` is set.
fn assign_fields(
    desc: &ClassDesc,
    target: &mut dyn Any,
    values: SlotValues,
    skip_refs: bool,
) -> Result<()> {
    for (index, value) in values {
        if skip_refs && matches!(value, FieldValue::Ref(_)) {
            continue;
        }
        let accessor = desc
            .fields()
            .get(index)
            .and_then(|f| f.accessor.as_ref())
            .ok_or_else(|| StreamError::Internal(format!("no setter for field {index}")))?;
        (accessor.set)(&mut *target, value)?;
    }
    Ok(())
}

fn decode_prim_array(code: u8, bytes: &[u8]) -> Array {
    match code {
        b'Z' => Array::Boolean(bytes.iter().map(|b| *b != 0).collect()),
        b'B' => Array::Byte(bytes.iter().map(|b| *b as i8).collect()),
        b'C' => Array::Char(
            bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect(),
        ),
        b'S' => Array::Short(
            bytes
                .chunks_exact(2)
                .map(|c| i16::from_be_bytes([c[0], c[1]]))
                .collect(),
        ),
        b'I' => Array::Int(
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        b'F' => Array::Float(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_bits(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
                .collect(),
        ),
        b'J' => Array::Long(bytes.chunks_exact(8).map(be_u64).map(|v| v as i64).collect()),
        _ => Array::Double(bytes.chunks_exact(8).map(be_u64).map(f64::from_bits).collect()),
    }
}

fn be_u64(c: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(c);
    u64::from_be_bytes(b)
}

fn unreachable_slot(slot: &ClassDataSlot) -> StreamError {
    StreamError::ClassCast(format!(
        "object has no local part for {}",
        slot.desc().name()
    ))
}
