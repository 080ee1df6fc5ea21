//! The writer engine.
//!
//! [`ObjectOutputStream`] serializes object graphs into the stream format. Every referent is
//! written once; later occurrences become back-references to its handle, so shared structure
//! and cycles survive a round trip.
//!
//! ## Writing an object
//!
//! 1. Apply the recorded substitution for the value, if any.
//! 2. Null, back-reference, class object or descriptor: write the short record and stop.
//! 3. Run type-declared substitution (`WriteReplace`) until the class stops changing, then the
//!    stream-level [`ObjectReplacer`].
//! 4. Dispatch on the kind: string, array, enum constant or ordinary object.
//!
//! Ordinary objects are written slot by slot along their class data layout, topmost ancestor
//! first. A slot with a [`WriteObject`](crate::hooks::WriteObject) hook is written by the hook in
//! block mode and terminated with `TC_ENDBLOCKDATA`; other slots use the default field protocol.
//!
//! If a top-level write fails, the stream records the failure (`TC_EXCEPTION` followed by a
//! [`WriteFailure`] object) so a reader sees why the stream ends, then returns the original error.

mod put_field;

pub use put_field::PutField;

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use crate::block::{BlockDataOutput, DataOutput, utf};
use crate::builtin::WriteFailure;
use crate::config::StreamConfig;
use crate::constants::MAX_SHORT_UTF;
use crate::desc::{ClassDataSlot, ClassDesc, Special, WriteObjectFn, cast_error};
use crate::error::{Result, StreamError};
use crate::format::{
    ProtocolVersion, STREAM_MAGIC, STREAM_VERSION, TC_ARRAY, TC_CLASS, TC_CLASSDESC,
    TC_ENDBLOCKDATA, TC_ENUM, TC_EXCEPTION, TC_LONGSTRING, TC_NULL, TC_OBJECT,
    TC_PROXYCLASSDESC, TC_REFERENCE, TC_RESET, TC_STRING,
};
use crate::handles::{Handle, Identity, ReplaceTable, WriteHandles};
use crate::hooks::{ClassAnnotator, ObjectReplacer};
use crate::value::{Array, ArrayRef, EnumRef, FieldValue, ObjectRef, Value};

/// The object-level output surface handed to hooks.
pub trait ObjectOutput: DataOutput {
    /// Writes `value` (and everything reachable from it), sharing earlier occurrences.
    fn write_object(&mut self, value: &Value) -> Result<()>;

    /// Writes `value` as a fresh, unshared copy. Later writes never refer back to it.
    fn write_unshared(&mut self, value: &Value) -> Result<()>;

    /// Writes the declared fields of the class whose hook is running.
    fn default_write_object(&mut self) -> Result<()>;

    /// Staging buffer for the declared fields of the class whose hook is running.
    fn put_fields(&mut self) -> Result<&mut PutField>;

    /// Writes the fields staged with [`ObjectOutput::put_fields`].
    fn write_fields(&mut self) -> Result<()>;

    /// Forgets every object written so far. Only valid between top-level writes.
    fn reset(&mut self) -> Result<()>;

    /// Flushes buffered data to the sink.
    fn flush(&mut self) -> Result<()>;
}

/// The object and slot whose write hook is running.
struct WriteContext {
    obj: ObjectRef,
    slot: ClassDataSlot,
}

/// Serializes object graphs into a byte sink.
///
/// ```rust
/// use objstream::{DataOutput, ObjectOutput, ObjectOutputStream, Value};
///
/// let mut out = ObjectOutputStream::new(Vec::new())?;
/// let greeting = Value::from("hello");
/// out.write_object(&greeting)?;
/// out.write_object(&greeting)?; // back-reference
/// out.write_int(7)?;
/// let bytes = out.into_inner()?;
/// assert_eq!(&bytes[..4], &[0xAC, 0xED, 0x00, 0x05]);
/// # Ok::<(), objstream::StreamError>(())
/// ```
pub struct ObjectOutputStream<W: Write> {
    bout: BlockDataOutput<W>,
    handles: WriteHandles,
    subs: ReplaceTable,
    protocol: ProtocolVersion,
    depth: usize,
    context: Option<WriteContext>,
    cur_put: Option<PutField>,
    replacer: Option<Box<dyn ObjectReplacer>>,
    annotator: Option<Box<dyn ClassAnnotator>>,
}

impl<W: Write> fmt::Debug for ObjectOutputStream<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectOutputStream")
            .field("protocol", &self.protocol)
            .field("handles", &self.handles.len())
            .field("depth", &self.depth)
            .field("replacer", &self.replacer.is_some())
            .field("annotator", &self.annotator.is_some())
            .finish()
    }
}

impl<W: Write> ObjectOutputStream<W> {
    /// Creates a stream with the default configuration and writes the stream header.
    pub fn new(out: W) -> Result<Self> {
        Self::with_config(out, &StreamConfig::default())
    }

    /// Creates a stream and writes the stream header.
    pub fn with_config(out: W, config: &StreamConfig) -> Result<Self> {
        let mut stream = Self {
            bout: BlockDataOutput::new(out),
            handles: WriteHandles::new(),
            subs: ReplaceTable::new(),
            protocol: config.protocol,
            depth: 0,
            context: None,
            cur_put: None,
            replacer: None,
            annotator: None,
        };
        stream.bout.write_short(STREAM_MAGIC as i16)?;
        stream.bout.write_short(STREAM_VERSION as i16)?;
        stream.bout.set_block_data_mode(true)?;
        log::debug!(
            "[writer] stream opened, protocol {}",
            stream.protocol.as_u8()
        );
        Ok(stream)
    }

    /// Switches the protocol used for externalizable data. Only allowed before anything has
    /// been written.
    pub fn use_protocol_version(&mut self, protocol: ProtocolVersion) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(StreamError::IllegalState("stream non-empty".to_string()));
        }
        self.protocol = protocol;
        Ok(())
    }

    /// Protocol version in use.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Installs (or removes) the stream-level replacer, returning the previous one.
    pub fn set_object_replacer(
        &mut self,
        replacer: Option<Box<dyn ObjectReplacer>>,
    ) -> Option<Box<dyn ObjectReplacer>> {
        std::mem::replace(&mut self.replacer, replacer)
    }

    /// Installs (or removes) the class annotator, returning the previous one.
    pub fn set_class_annotator(
        &mut self,
        annotator: Option<Box<dyn ClassAnnotator>>,
    ) -> Option<Box<dyn ClassAnnotator>> {
        std::mem::replace(&mut self.annotator, annotator)
    }

    /// Number of handles assigned since the stream was opened or last reset.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Reference to the sink. Data still buffered in the framer is not visible in it.
    pub fn get_ref(&self) -> &W {
        self.bout.get_ref()
    }

    /// Flushes everything and returns the sink.
    pub fn into_inner(self) -> Result<W> {
        self.bout.into_inner()
    }

    fn clear(&mut self) {
        self.subs.clear();
        self.handles.clear();
    }

    fn write_top(&mut self, value: &Value, unshared: bool) -> Result<()> {
        let res = self.write_object0(value, unshared);
        if let Err(e) = &res
            && self.depth == 0
            && records_failure(e)
        {
            log::debug!("[writer] aborting stream: {e}");
            if let Err(nested) = self.write_fatal_exception(e) {
                log::warn!("[writer] failed to record write failure: {nested}");
            }
        }
        res
    }

    /// Writes the failure record of an aborted top-level write.
    fn write_fatal_exception(&mut self, err: &StreamError) -> Result<()> {
        self.clear();
        let old_mode = self.bout.set_block_data_mode(false)?;
        self.bout.write_tag(TC_EXCEPTION)?;
        let record = Value::object(WriteFailure {
            message: Some(err.to_string()),
        });
        let res = self.write_object0(&record, false);
        self.clear();
        self.bout.set_block_data_mode(old_mode)?;
        res
    }

    fn write_object0(&mut self, value: &Value, unshared: bool) -> Result<()> {
        let old_mode = self.bout.set_block_data_mode(false)?;
        self.depth += 1;
        let res = self.write_value(value, unshared);
        self.depth -= 1;
        let restored = self.bout.set_block_data_mode(old_mode);
        res?;
        restored.map(drop)
    }

    /// Short records that need no further dispatch. `Ok(true)` if one was written.
    fn write_short_record(&mut self, obj: &Value, unshared: bool) -> Result<bool> {
        if obj.is_null() {
            self.write_null()?;
            return Ok(true);
        }
        if !unshared && let Some(handle) = self.handles.lookup_value(obj) {
            self.write_handle(handle)?;
            return Ok(true);
        }
        match obj {
            Value::Class(d) => self.write_class(d, unshared)?,
            Value::Desc(d) => self.write_class_desc(Some(d), unshared)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn write_value(&mut self, value: &Value, unshared: bool) -> Result<()> {
        let mut obj = self.subs.lookup(value);
        if self.write_short_record(&obj, unshared)? {
            return Ok(());
        }

        let orig = obj.clone();
        let mut desc = obj.class_desc()?;
        while desc.has_write_replace_method() {
            let Value::Object(o) = &obj else { break };
            let rep = {
                let guard = o.try_borrow_any()?;
                desc.invoke_write_replace(guard.as_any())?
            };
            let Some(rep) = rep else { break };
            obj = rep;
            if obj.is_null() {
                break;
            }
            let rep_desc = obj.class_desc()?;
            if Arc::ptr_eq(&rep_desc, &desc) {
                break;
            }
            desc = rep_desc;
        }
        if let Some(mut replacer) = self.replacer.take() {
            let rep = replacer.replace_object(&obj);
            self.replacer = Some(replacer);
            let rep = rep?;
            if !rep.is_null() && !rep.ptr_eq(&obj) {
                desc = rep.class_desc()?;
            }
            obj = rep;
        }

        if !obj.ptr_eq(&orig) {
            if unshared && let Value::Array(a) = &obj {
                obj = Value::Array(a.shallow_clone()?);
            }
            self.subs.assign(&orig, &obj);
            log::trace!("[writer] substituted {orig:?} with {obj:?}");
            if self.write_short_record(&obj, unshared)? {
                return Ok(());
            }
        }

        match &obj {
            Value::Str(s) => self.write_string(&obj, s, unshared),
            Value::Array(a) => self.write_array(&obj, a, &desc, unshared),
            Value::Enum(e) => self.write_enum(&obj, e, &desc, unshared),
            Value::Object(o) => {
                if desc.is_enum() {
                    return Err(StreamError::invalid_class(
                        desc.name(),
                        "enum constants must be written as enum values",
                    ));
                }
                if !desc.is_serializable()
                    || desc.special().is_some_and(|s| s != Special::ProxyBase)
                {
                    return Err(StreamError::NotSerializable(format!(
                        "{} ({})",
                        desc.name(),
                        o.rust_type_name()
                    )));
                }
                self.write_ordinary_object(&obj, o, &desc, unshared)
            }
            Value::Null | Value::Class(_) | Value::Desc(_) => Err(StreamError::Internal(
                "short record escaped dispatch".to_string(),
            )),
        }
    }

    fn write_null(&mut self) -> Result<()> {
        self.bout.write_tag(TC_NULL)
    }

    fn write_handle(&mut self, handle: Handle) -> Result<()> {
        log::trace!("[writer] back-reference to handle {handle}");
        self.bout.write_tag(TC_REFERENCE)?;
        self.bout.write_int(handle.to_wire())
    }

    fn write_class(&mut self, desc: &Arc<ClassDesc>, unshared: bool) -> Result<()> {
        self.bout.write_tag(TC_CLASS)?;
        self.write_class_desc(Some(desc), false)?;
        self.handles
            .assign_value(&Value::Class(desc.clone()), unshared);
        Ok(())
    }

    fn write_class_desc(&mut self, desc: Option<&Arc<ClassDesc>>, unshared: bool) -> Result<()> {
        let Some(desc) = desc else {
            return self.write_null();
        };
        let as_value = Value::Desc(desc.clone());
        if !unshared && let Some(handle) = self.handles.lookup_value(&as_value) {
            return self.write_handle(handle);
        }
        if desc.is_proxy() {
            self.write_proxy_desc(desc, &as_value, unshared)
        } else {
            self.write_non_proxy_desc(desc, &as_value, unshared)
        }
    }

    fn write_proxy_desc(
        &mut self,
        desc: &Arc<ClassDesc>,
        as_value: &Value,
        unshared: bool,
    ) -> Result<()> {
        self.bout.write_tag(TC_PROXYCLASSDESC)?;
        self.handles.assign_value(as_value, unshared);
        let interfaces = desc.interfaces();
        self.bout.write_int(len_i32(interfaces.len())?)?;
        for interface in interfaces {
            self.bout.write_utf(interface)?;
        }
        self.annotate(desc, true)?;
        self.write_class_desc(desc.super_desc(), false)
    }

    fn write_non_proxy_desc(
        &mut self,
        desc: &Arc<ClassDesc>,
        as_value: &Value,
        unshared: bool,
    ) -> Result<()> {
        self.bout.write_tag(TC_CLASSDESC)?;
        self.handles.assign_value(as_value, unshared);
        self.bout.write_utf(desc.name())?;
        self.bout.write_long(desc.suid())?;
        self.bout.write_byte(desc.flags(self.protocol) as i8)?;

        let fields = desc.fields();
        let count = i16::try_from(fields.len())
            .map_err(|_| StreamError::invalid_class(desc.name(), "too many fields"))?;
        self.bout.write_short(count)?;
        for field in fields {
            self.bout.write_byte(field.type_code() as i8)?;
            self.bout.write_utf(field.name())?;
            if let Some(type_string) = field.type_string() {
                self.write_type_string(type_string)?;
            }
        }
        log::debug!("[writer] descriptor {} suid={}", desc.name(), desc.suid());
        self.annotate(desc, false)?;
        self.write_class_desc(desc.super_desc(), false)
    }

    fn write_type_string(&mut self, s: &Arc<str>) -> Result<()> {
        match self.handles.lookup(&Identity::type_string(s)) {
            Some(handle) => self.write_handle(handle),
            None => {
                self.handles.assign_type_string(s);
                self.write_utf_record(s)
            }
        }
    }

    /// Class annotations, framed as block data.
    fn annotate(&mut self, desc: &ClassDesc, proxy: bool) -> Result<()> {
        self.bout.set_block_data_mode(true)?;
        if let Some(mut annotator) = self.annotator.take() {
            let res = if proxy {
                annotator.annotate_proxy_class(desc, self)
            } else {
                annotator.annotate_class(desc, self)
            };
            self.annotator = Some(annotator);
            res?;
        }
        self.bout.set_block_data_mode(false)?;
        self.bout.write_tag(TC_ENDBLOCKDATA)
    }

    fn write_string(&mut self, value: &Value, s: &str, unshared: bool) -> Result<()> {
        self.handles.assign_value(value, unshared);
        self.write_utf_record(s)
    }

    fn write_utf_record(&mut self, s: &str) -> Result<()> {
        let len = utf::utf_length(s);
        if len <= MAX_SHORT_UTF {
            self.bout.write_tag(TC_STRING)?;
            self.bout.write_utf_with_len(s, len)
        } else {
            self.bout.write_tag(TC_LONGSTRING)?;
            self.bout.write_long_utf(s)
        }
    }

    fn write_array(
        &mut self,
        value: &Value,
        array: &ArrayRef,
        desc: &Arc<ClassDesc>,
        unshared: bool,
    ) -> Result<()> {
        self.bout.write_tag(TC_ARRAY)?;
        self.write_class_desc(Some(desc), false)?;
        self.handles.assign_value(value, unshared);

        let elements = {
            let contents = array.try_borrow_checked()?;
            match &*contents {
                Array::Object { elements, .. } => Some(elements.clone()),
                prim => {
                    self.write_prim_array(prim)?;
                    None
                }
            }
        };
        if let Some(elements) = elements {
            self.bout.write_int(len_i32(elements.len())?)?;
            for element in &elements {
                self.write_object0(element, false)?;
            }
        }
        Ok(())
    }

    fn write_prim_array(&mut self, array: &Array) -> Result<()> {
        self.bout.write_int(len_i32(array.len())?)?;
        let mut buf = Vec::new();
        match array {
            Array::Boolean(v) => buf.extend(v.iter().map(|b| u8::from(*b))),
            Array::Byte(v) => buf.extend(v.iter().map(|b| *b as u8)),
            Array::Char(v) => buf.extend(v.iter().flat_map(|c| c.to_be_bytes())),
            Array::Short(v) => buf.extend(v.iter().flat_map(|s| s.to_be_bytes())),
            Array::Int(v) => buf.extend(v.iter().flat_map(|i| i.to_be_bytes())),
            Array::Long(v) => buf.extend(v.iter().flat_map(|l| l.to_be_bytes())),
            Array::Float(v) => buf.extend(v.iter().flat_map(|f| f.to_bits().to_be_bytes())),
            Array::Double(v) => buf.extend(v.iter().flat_map(|d| d.to_bits().to_be_bytes())),
            Array::Object { .. } => {
                return Err(StreamError::Internal(
                    "object array in primitive path".to_string(),
                ));
            }
        }
        self.bout.write_bytes(&buf, false)
    }

    fn write_enum(
        &mut self,
        value: &Value,
        constant: &EnumRef,
        desc: &Arc<ClassDesc>,
        unshared: bool,
    ) -> Result<()> {
        self.bout.write_tag(TC_ENUM)?;
        self.write_class_desc(Some(desc), false)?;
        self.handles.assign_value(value, unshared);
        let name = Value::from(constant.name());
        self.write_string(&name, constant.name(), false)
    }

    fn write_ordinary_object(
        &mut self,
        value: &Value,
        obj: &ObjectRef,
        desc: &Arc<ClassDesc>,
        unshared: bool,
    ) -> Result<()> {
        self.bout.write_tag(TC_OBJECT)?;
        self.write_class_desc(Some(desc), false)?;
        self.handles.assign_value(value, unshared);
        if desc.is_externalizable() && !desc.is_proxy() {
            self.write_external_data(obj, desc)
        } else {
            self.write_serial_data(obj, desc)
        }
    }

    fn write_external_data(&mut self, obj: &ObjectRef, desc: &ClassDesc) -> Result<()> {
        let hook = desc
            .hooks()
            .and_then(|h| h.write_external)
            .ok_or_else(|| StreamError::invalid_class(desc.name(), "no write_external binding"))?;
        let saved_put = self.cur_put.take();
        let saved_context = self.context.take();
        let res = self.run_external(obj, hook);
        self.context = saved_context;
        self.cur_put = saved_put;
        res
    }

    fn run_external(&mut self, obj: &ObjectRef, hook: WriteObjectFn) -> Result<()> {
        let guard = obj.try_borrow_any()?;
        if self.protocol == ProtocolVersion::V1 {
            return hook(guard.as_any(), self);
        }
        self.bout.set_block_data_mode(true)?;
        hook(guard.as_any(), self)?;
        self.bout.set_block_data_mode(false)?;
        self.bout.write_tag(TC_ENDBLOCKDATA)
    }

    fn write_serial_data(&mut self, obj: &ObjectRef, desc: &Arc<ClassDesc>) -> Result<()> {
        for slot in desc.class_data_layout()? {
            let hook = slot.desc().hooks().and_then(|h| h.write_object);
            match hook {
                Some(hook) => {
                    let saved_put = self.cur_put.take();
                    let saved_context = self.context.replace(WriteContext {
                        obj: obj.clone(),
                        slot: slot.clone(),
                    });
                    let res = self.run_write_hook(obj, &slot, hook);
                    self.context = saved_context;
                    self.cur_put = saved_put;
                    res?;
                }
                None => self.default_write_fields(obj, &slot)?,
            }
        }
        Ok(())
    }

    fn run_write_hook(
        &mut self,
        obj: &ObjectRef,
        slot: &ClassDataSlot,
        hook: WriteObjectFn,
    ) -> Result<()> {
        self.bout.set_block_data_mode(true)?;
        {
            let guard = obj.try_borrow_any()?;
            let part = slot
                .project(guard.as_any())
                .ok_or_else(|| unreachable_slot(slot))?;
            hook(part, self)?;
        }
        self.bout.set_block_data_mode(false)?;
        self.bout.write_tag(TC_ENDBLOCKDATA)
    }

    /// Writes the declared fields of one slot: primitive bytes first, then each reference.
    fn default_write_fields(&mut self, obj: &ObjectRef, slot: &ClassDataSlot) -> Result<()> {
        let desc = slot.desc();
        desc.check_default_serialize()?;
        let (prims, refs) = {
            let guard = obj.try_borrow_any()?;
            let part = slot
                .project(guard.as_any())
                .ok_or_else(|| unreachable_slot(slot))?;
            let mut prims = Vec::with_capacity(desc.prim_data_size());
            let mut refs = Vec::with_capacity(desc.num_obj_fields());
            for field in desc.fields() {
                let accessor = field.accessor.as_ref().ok_or_else(|| {
                    StreamError::invalid_class(
                        desc.name(),
                        format!("unbound field {}", field.name()),
                    )
                })?;
                match (accessor.get)(part)? {
                    FieldValue::Prim(p)
                        if field.is_primitive() && p.type_code() == field.type_code() =>
                    {
                        p.encode_into(&mut prims);
                    }
                    FieldValue::Ref(v) if !field.is_primitive() => {
                        refs.push((v, field.is_unshared()))
                    }
                    other => return Err(cast_error(field.signature(), &other)),
                }
            }
            (prims, refs)
        };
        self.bout.write_bytes(&prims, false)?;
        for (value, unshared) in &refs {
            self.write_object0(value, *unshared)?;
        }
        Ok(())
    }
}

impl<W: Write> DataOutput for ObjectOutputStream<W> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.bout.write_bytes(buf, false)
    }

    fn write_boolean(&mut self, v: bool) -> Result<()> {
        self.bout.write_boolean(v)
    }

    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.bout.write_byte(v)
    }

    fn write_short(&mut self, v: i16) -> Result<()> {
        self.bout.write_short(v)
    }

    fn write_char(&mut self, v: u16) -> Result<()> {
        self.bout.write_char(v)
    }

    fn write_int(&mut self, v: i32) -> Result<()> {
        self.bout.write_int(v)
    }

    fn write_long(&mut self, v: i64) -> Result<()> {
        self.bout.write_long(v)
    }

    fn write_float(&mut self, v: f32) -> Result<()> {
        self.bout.write_float(v)
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.bout.write_double(v)
    }

    fn write_utf(&mut self, s: &str) -> Result<()> {
        self.bout.write_utf(s)
    }
}

impl<W: Write> ObjectOutput for ObjectOutputStream<W> {
    fn write_object(&mut self, value: &Value) -> Result<()> {
        self.write_top(value, false)
    }

    fn write_unshared(&mut self, value: &Value) -> Result<()> {
        self.write_top(value, true)
    }

    fn default_write_object(&mut self) -> Result<()> {
        let (obj, slot) = match &self.context {
            Some(ctx) => (ctx.obj.clone(), ctx.slot.clone()),
            None => {
                return Err(StreamError::NotActive(
                    "not in call to write_object".to_string(),
                ));
            }
        };
        self.bout.set_block_data_mode(false)?;
        self.default_write_fields(&obj, &slot)?;
        self.bout.set_block_data_mode(true)?;
        Ok(())
    }

    fn put_fields(&mut self) -> Result<&mut PutField> {
        if self.cur_put.is_none() {
            let desc = match &self.context {
                Some(ctx) => ctx.slot.desc().clone(),
                None => {
                    return Err(StreamError::NotActive(
                        "not in call to write_object".to_string(),
                    ));
                }
            };
            self.cur_put = Some(PutField::new(desc));
        }
        self.cur_put
            .as_mut()
            .ok_or_else(|| StreamError::Internal("put field buffer vanished".to_string()))
    }

    fn write_fields(&mut self) -> Result<()> {
        let (prims, refs) = match &self.cur_put {
            Some(put) => (put.prim_data().to_vec(), put.objects()),
            None => {
                return Err(StreamError::NotActive(
                    "no current PutField object".to_string(),
                ));
            }
        };
        self.bout.set_block_data_mode(false)?;
        self.bout.write_bytes(&prims, false)?;
        for (value, unshared) in &refs {
            self.write_object0(value, *unshared)?;
        }
        self.bout.set_block_data_mode(true)?;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        if self.depth != 0 {
            return Err(StreamError::IllegalState("stream active".to_string()));
        }
        self.bout.set_block_data_mode(false)?;
        self.bout.write_tag(TC_RESET)?;
        self.clear();
        self.bout.set_block_data_mode(true)?;
        log::debug!("[writer] reset");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.bout.flush()
    }
}

/// Errors that leave a failure record in the stream. Caller mistakes and hook errors do not.
fn records_failure(err: &StreamError) -> bool {
    !matches!(
        err,
        StreamError::Custom(_)
            | StreamError::ClassCast(_)
            | StreamError::IllegalState(_)
            | StreamError::Internal(_)
    )
}

fn len_i32(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| StreamError::IllegalState(format!("length {len} exceeds i32")))
}

fn unreachable_slot(slot: &ClassDataSlot) -> StreamError {
    StreamError::ClassCast(format!(
        "object has no local part for {}",
        slot.desc().name()
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn written(f: impl FnOnce(&mut ObjectOutputStream<Vec<u8>>)) -> Vec<u8> {
        let mut out = ObjectOutputStream::new(Vec::new()).unwrap();
        f(&mut out);
        out.into_inner().unwrap()
    }

    #[test]
    fn header_only() {
        assert_eq!(written(|_| {}), vec![0xAC, 0xED, 0x00, 0x05]);
    }

    #[test]
    fn null_and_string() {
        let bytes = written(|out| {
            out.write_object(&Value::Null).unwrap();
            out.write_object(&Value::from("hi")).unwrap();
        });
        assert_eq!(&bytes[4..], &[TC_NULL, TC_STRING, 0, 2, b'h', b'i']);
    }

    #[test]
    fn repeated_string_is_a_back_reference() {
        let s = Value::from("a");
        let bytes = written(|out| {
            out.write_object(&s).unwrap();
            out.write_object(&s).unwrap();
        });
        assert_eq!(
            &bytes[4..],
            &[TC_STRING, 0, 1, b'a', TC_REFERENCE, 0x00, 0x7E, 0x00, 0x00]
        );
    }

    #[test]
    fn unshared_string_is_written_twice() {
        let s = Value::from("a");
        let bytes = written(|out| {
            out.write_unshared(&s).unwrap();
            out.write_object(&s).unwrap();
        });
        assert_eq!(&bytes[4..], &[TC_STRING, 0, 1, b'a', TC_STRING, 0, 1, b'a']);
    }

    #[test]
    fn primitives_between_objects_are_block_framed() {
        let bytes = written(|out| {
            out.write_int(1).unwrap();
            out.write_object(&Value::Null).unwrap();
        });
        assert_eq!(&bytes[4..], &[0x77, 4, 0, 0, 0, 1, TC_NULL]);
    }

    #[test]
    fn reset_clears_handles() {
        let s = Value::from("a");
        let mut out = ObjectOutputStream::new(Vec::new()).unwrap();
        out.write_object(&s).unwrap();
        assert_eq!(out.handle_count(), 1);
        out.reset().unwrap();
        assert_eq!(out.handle_count(), 0);
        out.write_object(&s).unwrap();
        let bytes = out.into_inner().unwrap();
        assert_eq!(&bytes[4..], &[TC_STRING, 0, 1, b'a', TC_RESET, TC_STRING, 0, 1, b'a']);
    }

    #[test]
    fn hook_only_calls_fail_outside_hooks() {
        let mut out = ObjectOutputStream::new(Vec::new()).unwrap();
        assert!(matches!(out.default_write_object(), Err(StreamError::NotActive(_))));
        assert!(matches!(out.put_fields(), Err(StreamError::NotActive(_))));
        assert!(matches!(out.write_fields(), Err(StreamError::NotActive(_))));
    }

    #[test]
    fn protocol_switch_requires_empty_stream() {
        let mut out = ObjectOutputStream::new(Vec::new()).unwrap();
        out.use_protocol_version(ProtocolVersion::V1).unwrap();
        out.write_object(&Value::from("x")).unwrap();
        assert!(out.use_protocol_version(ProtocolVersion::V2).is_err());
    }

    #[test]
    fn int_array_layout() {
        let bytes = written(|out| {
            out.write_object(&Value::from(Array::Int(vec![1, 2]))).unwrap();
        });
        let body = &bytes[4..];
        assert_eq!(body[0], TC_ARRAY);
        assert_eq!(body[1], TC_CLASSDESC);
        assert_eq!(&body[2..6], &[0, 2, b'[', b'I']);
        assert_eq!(&body[6..14], &0x4dba602676eab2a5u64.to_be_bytes());
        // flags, field count, end of annotations, no super descriptor
        assert_eq!(&body[14..18], &[0x02, 0, 0, TC_ENDBLOCKDATA]);
        assert_eq!(body[18], TC_NULL);
        assert_eq!(&body[19..], &[0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 2]);
    }
}
