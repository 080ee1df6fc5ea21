//! Tools for inspecting the raw record structure of a stream.
//! Useful for debugging evolution problems and checking what a writer actually produced.
//!
//! The inspector decodes tags, descriptors, handles, field values and block data without
//! resolving any class, so it works on streams whose types are not known to this process.
//!
//! ```rust
//! use objstream::{ObjStream, StreamInspector, Value};
//!
//! let bytes = ObjStream::to_bytes(&Value::from("hi"))?;
//! let report = StreamInspector::inspect(&bytes)?;
//! assert_eq!(report.records[0].tag, "TC_STRING");
//! println!("{report}");
//! # Ok::<(), objstream::StreamError>(())
//! ```

use std::fs::File;
use std::path::Path;
use std::rc::Rc;

use memmap2::Mmap;
use serde::Serialize;

use crate::block::{BlockDataInput, DataInput};
use crate::error::{Result, StreamError};
use crate::format::{
    BASE_WIRE_HANDLE, SC_BLOCK_DATA, SC_EXTERNALIZABLE, SC_SERIALIZABLE, SC_WRITE_METHOD,
    TC_ARRAY, TC_BLOCKDATA, TC_BLOCKDATALONG, TC_CLASS, TC_CLASSDESC, TC_ENDBLOCKDATA, TC_ENUM,
    TC_EXCEPTION, TC_LONGSTRING, TC_NULL, TC_OBJECT, TC_PROXYCLASSDESC, TC_REFERENCE, TC_RESET,
    TC_STRING, is_primitive_code, primitive_size, tag_name,
};
use crate::value::Prim;

/// Nesting beyond this is reported as corruption instead of recursing further.
const MAX_NESTING: usize = 512;

/// Array elements shown inline for primitive arrays.
const ARRAY_PREVIEW: usize = 16;

/// Bytes shown inline for block data.
const BLOCK_PREVIEW: usize = 16;

/// A structural report of a stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    /// Stream magic as read.
    pub magic: u16,
    /// Stream version as read.
    pub version: u16,
    /// Total bytes decoded, header included.
    pub total_bytes: u64,
    /// Handles assigned over the whole stream, across resets.
    pub handles_assigned: usize,
    /// Top-level records in stream order.
    pub records: Vec<RecordInfo>,
}

/// One decoded record or component of a record.
#[derive(Debug, Clone, Serialize)]
pub struct RecordInfo {
    /// Offset of the record in the stream.
    pub offset: u64,
    /// Tag name (e.g. `TC_OBJECT`), or `field` / `classdata` for structural entries.
    pub tag: &'static str,
    /// Wire handle assigned by this record.
    pub handle: Option<i32>,
    /// Human-readable summary.
    pub detail: String,
    /// Nested records.
    pub children: Vec<RecordInfo>,
}

impl RecordInfo {
    fn new(offset: u64, tag: &'static str, detail: impl Into<String>) -> Self {
        Self {
            offset,
            tag,
            handle: None,
            detail: detail.into(),
            children: Vec::new(),
        }
    }
}

/// The stream inspector tool.
#[derive(Debug)]
pub struct StreamInspector;

impl StreamInspector {
    /// Decodes a complete stream held in memory.
    pub fn inspect(bytes: &[u8]) -> Result<StreamReport> {
        Decoder::new(bytes).run()
    }

    /// Decodes a stream file through a memory map.
    pub fn inspect_file<P: AsRef<Path>>(path: P) -> Result<StreamReport> {
        let file = File::open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            return Self::inspect(&[]);
        }
        // Safety: the map is only read while this call runs.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Self::inspect(&mmap[..])
    }
}

/// What the inspector remembers about a recorded descriptor.
#[derive(Debug)]
struct DescInfo {
    name: String,
    flags: u8,
    /// `(type code, name, type string)` in stream order.
    fields: Vec<(u8, String, String)>,
    super_desc: Option<Rc<DescInfo>>,
}

#[derive(Debug, Clone)]
enum Entry {
    Desc(Rc<DescInfo>),
    Str(String),
    Other(String),
}

struct Decoder<'a> {
    input: BlockDataInput<&'a [u8]>,
    handles: Vec<Entry>,
    assigned: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            input: BlockDataInput::new(bytes),
            handles: Vec::new(),
            assigned: 0,
            depth: 0,
        }
    }

    fn run(mut self) -> Result<StreamReport> {
        let magic = self.input.read_unsigned_short()?;
        let version = self.input.read_unsigned_short()?;
        let mut records = Vec::new();
        while let Some(tc) = self.input.peek()? {
            let record = match tc {
                TC_BLOCKDATA | TC_BLOCKDATALONG => self.block_data()?,
                _ => self.content()?,
            };
            records.push(record);
        }
        Ok(StreamReport {
            magic,
            version,
            total_bytes: self.input.bytes_read(),
            handles_assigned: self.assigned,
            records,
        })
    }

    fn offset(&self) -> u64 {
        self.input.bytes_read()
    }

    fn new_handle(&mut self, entry: Entry) -> i32 {
        let index = i32::try_from(self.handles.len()).unwrap_or(i32::MAX);
        let wire = BASE_WIRE_HANDLE.saturating_add(index);
        self.handles.push(entry);
        self.assigned += 1;
        wire
    }

    fn set_handle(&mut self, wire: i32, entry: Entry) {
        if let Some(slot) = usize::try_from(wire - BASE_WIRE_HANDLE)
            .ok()
            .and_then(|i| self.handles.get_mut(i))
        {
            *slot = entry;
        }
    }

    fn lookup(&self, wire: i32) -> Result<&Entry> {
        usize::try_from(wire.wrapping_sub(BASE_WIRE_HANDLE))
            .ok()
            .and_then(|i| self.handles.get(i))
            .ok_or_else(|| StreamError::corrupted(format!("invalid handle value: {wire:08X}")))
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(StreamError::corrupted("records nested too deeply"));
        }
        self.depth += 1;
        let res = f(self);
        self.depth -= 1;
        res
    }

    /// Decodes one object record.
    fn content(&mut self) -> Result<RecordInfo> {
        self.nested(Self::content0)
    }

    fn content0(&mut self) -> Result<RecordInfo> {
        let offset = self.offset();
        let tc = self.input.peek_byte()?;
        match tc {
            TC_NULL => {
                self.input.read_byte()?;
                Ok(RecordInfo::new(offset, tag_name(tc), "null"))
            }
            TC_REFERENCE => {
                self.input.read_byte()?;
                let wire = self.input.read_int()?;
                let target = match self.lookup(wire)? {
                    Entry::Desc(d) => format!("descriptor {}", d.name),
                    Entry::Str(s) => format!("{s:?}"),
                    Entry::Other(label) => label.clone(),
                };
                Ok(RecordInfo::new(
                    offset,
                    tag_name(tc),
                    format!("-> {wire:#08X} {target}"),
                ))
            }
            TC_STRING | TC_LONGSTRING => {
                let (record, _) = self.string()?;
                Ok(record)
            }
            TC_CLASSDESC | TC_PROXYCLASSDESC => Ok(self.class_desc()?.0),
            TC_CLASS => {
                self.input.read_byte()?;
                let (desc_record, desc) = self.class_desc()?;
                let name = desc.map_or_else(|| "null".to_string(), |d| d.name.clone());
                let mut record = RecordInfo::new(offset, tag_name(tc), name.clone());
                record.handle = Some(self.new_handle(Entry::Other(format!("class {name}"))));
                record.children.push(desc_record);
                Ok(record)
            }
            TC_ARRAY => self.array(),
            TC_ENUM => self.enum_constant(),
            TC_OBJECT => self.object(),
            TC_EXCEPTION => {
                self.input.read_byte()?;
                self.handles.clear();
                let mut record = RecordInfo::new(offset, tag_name(tc), "writer aborted");
                record.children.push(self.content()?);
                self.handles.clear();
                Ok(record)
            }
            TC_RESET => {
                self.input.read_byte()?;
                self.handles.clear();
                Ok(RecordInfo::new(offset, tag_name(tc), "handles cleared"))
            }
            TC_BLOCKDATA | TC_BLOCKDATALONG => self.block_data(),
            TC_ENDBLOCKDATA => Err(StreamError::corrupted("unexpected end of block data")),
            other => Err(StreamError::corrupted(format!("invalid type code: {other:02X}"))),
        }
    }

    fn block_data(&mut self) -> Result<RecordInfo> {
        let offset = self.offset();
        let tc = self.input.read_unsigned_byte()?;
        let len = if tc == TC_BLOCKDATA {
            usize::from(self.input.read_unsigned_byte()?)
        } else {
            let len = self.input.read_int()?;
            usize::try_from(len).map_err(|_| {
                StreamError::corrupted(format!("illegal block data header length: {len}"))
            })?
        };
        let mut data = vec![0u8; len];
        self.input.read_fully(&mut data)?;
        let preview: Vec<String> = data
            .iter()
            .take(BLOCK_PREVIEW)
            .map(|b| format!("{b:02X}"))
            .collect();
        let more = if len > BLOCK_PREVIEW { " .." } else { "" };
        Ok(RecordInfo::new(
            offset,
            tag_name(tc),
            format!("{len} bytes [{}{more}]", preview.join(" ")),
        ))
    }

    fn string(&mut self) -> Result<(RecordInfo, String)> {
        let offset = self.offset();
        let tc = self.input.read_unsigned_byte()?;
        let s = if tc == TC_STRING {
            self.input.read_utf()?
        } else {
            self.input.read_long_utf()?
        };
        let mut record = RecordInfo::new(offset, tag_name(tc), format!("{s:?}"));
        record.handle = Some(self.new_handle(Entry::Str(s.clone())));
        Ok((record, s))
    }

    /// Reads a field type string: a string record or a back-reference to one.
    fn type_string(&mut self) -> Result<String> {
        match self.input.peek_byte()? {
            TC_STRING | TC_LONGSTRING => Ok(self.string()?.1),
            TC_REFERENCE => {
                self.input.read_byte()?;
                let wire = self.input.read_int()?;
                match self.lookup(wire)? {
                    Entry::Str(s) => Ok(s.clone()),
                    _ => Err(StreamError::corrupted(format!(
                        "handle {wire:08X} is not a type string"
                    ))),
                }
            }
            tc => Err(StreamError::corrupted(format!("invalid type code: {tc:02X}"))),
        }
    }

    fn class_desc(&mut self) -> Result<(RecordInfo, Option<Rc<DescInfo>>)> {
        self.nested(Self::class_desc0)
    }

    fn class_desc0(&mut self) -> Result<(RecordInfo, Option<Rc<DescInfo>>)> {
        let offset = self.offset();
        let tc = self.input.peek_byte()?;
        match tc {
            TC_NULL => {
                self.input.read_byte()?;
                Ok((RecordInfo::new(offset, tag_name(tc), "null"), None))
            }
            TC_REFERENCE => {
                self.input.read_byte()?;
                let wire = self.input.read_int()?;
                match self.lookup(wire)? {
                    Entry::Desc(d) => {
                        let d = d.clone();
                        let record = RecordInfo::new(
                            offset,
                            tag_name(tc),
                            format!("-> {wire:#08X} descriptor {}", d.name),
                        );
                        Ok((record, Some(d)))
                    }
                    _ => Err(StreamError::corrupted(format!(
                        "handle {wire:08X} is not a class descriptor"
                    ))),
                }
            }
            TC_CLASSDESC => self.non_proxy_desc(),
            TC_PROXYCLASSDESC => self.proxy_desc(),
            other => Err(StreamError::corrupted(format!("invalid type code: {other:02X}"))),
        }
    }

    fn non_proxy_desc(&mut self) -> Result<(RecordInfo, Option<Rc<DescInfo>>)> {
        let offset = self.offset();
        let tc = self.input.read_unsigned_byte()?;
        let name = self.input.read_utf()?;
        let suid = self.input.read_long()?;
        let handle = self.new_handle(Entry::Other(format!("descriptor {name} (incomplete)")));
        let flags = self.input.read_unsigned_byte()?;
        let count = self.input.read_short()?;
        let count = usize::try_from(count)
            .map_err(|_| StreamError::corrupted(format!("negative field count: {count}")))?;

        let mut record = RecordInfo::new(
            offset,
            tag_name(tc),
            format!("{name} suid={suid} flags={}", describe_flags(flags)),
        );
        record.handle = Some(handle);

        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let field_offset = self.offset();
            let code = self.input.read_unsigned_byte()?;
            let field_name = self.input.read_utf()?;
            let ty = if is_primitive_code(code) {
                (code as char).to_string()
            } else if code == b'L' || code == b'[' {
                self.type_string()?
            } else {
                return Err(StreamError::corrupted(format!(
                    "invalid field type code {:02X} for {field_name}",
                    code
                )));
            };
            record.children.push(RecordInfo::new(
                field_offset,
                "field",
                format!("{ty} {field_name}"),
            ));
            fields.push((code, field_name, ty));
        }

        record.children.extend(self.annotations()?);
        let (super_record, super_desc) = self.class_desc()?;
        record.children.push(super_record);

        let desc = Rc::new(DescInfo {
            name,
            flags,
            fields,
            super_desc,
        });
        self.set_handle(handle, Entry::Desc(desc.clone()));
        Ok((record, Some(desc)))
    }

    fn proxy_desc(&mut self) -> Result<(RecordInfo, Option<Rc<DescInfo>>)> {
        let offset = self.offset();
        let tc = self.input.read_unsigned_byte()?;
        let handle = self.new_handle(Entry::Other("proxy descriptor (incomplete)".to_string()));
        let count = self.input.read_int()?;
        let count = usize::try_from(count)
            .map_err(|_| StreamError::corrupted(format!("negative interface count: {count}")))?;
        let mut interfaces = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            interfaces.push(self.input.read_utf()?);
        }
        let mut record = RecordInfo::new(
            offset,
            tag_name(tc),
            format!("proxy implementing [{}]", interfaces.join(", ")),
        );
        record.handle = Some(handle);
        record.children.extend(self.annotations()?);
        let (super_record, super_desc) = self.class_desc()?;
        record.children.push(super_record);

        let desc = Rc::new(DescInfo {
            name: format!("$Proxy[{}]", interfaces.join(", ")),
            flags: SC_SERIALIZABLE,
            fields: Vec::new(),
            super_desc,
        });
        self.set_handle(handle, Entry::Desc(desc.clone()));
        Ok((record, Some(desc)))
    }

    /// Reads records up to and including `TC_ENDBLOCKDATA`.
    fn annotations(&mut self) -> Result<Vec<RecordInfo>> {
        let mut records = Vec::new();
        loop {
            match self.input.peek_byte()? {
                TC_ENDBLOCKDATA => {
                    self.input.read_byte()?;
                    return Ok(records);
                }
                TC_BLOCKDATA | TC_BLOCKDATALONG => records.push(self.block_data()?),
                _ => records.push(self.content()?),
            }
        }
    }

    fn required_desc(&mut self, what: &str) -> Result<(RecordInfo, Rc<DescInfo>)> {
        match self.class_desc()? {
            (record, Some(desc)) => Ok((record, desc)),
            (_, None) => Err(StreamError::corrupted(format!("{what} without class descriptor"))),
        }
    }

    fn array(&mut self) -> Result<RecordInfo> {
        let offset = self.offset();
        let tc = self.input.read_unsigned_byte()?;
        let (desc_record, desc) = self.required_desc("array")?;
        let handle = self.new_handle(Entry::Other(format!("array {}", desc.name)));
        let len = self.input.read_int()?;
        let len = usize::try_from(len)
            .map_err(|_| StreamError::corrupted(format!("negative array length: {len}")))?;

        let mut record = RecordInfo::new(offset, tag_name(tc), String::new());
        record.handle = Some(handle);
        record.children.push(desc_record);

        let elem = desc.name.as_bytes().get(1).copied();
        match elem.filter(|c| is_primitive_code(*c) && desc.name.len() == 2) {
            Some(code) => {
                let size = primitive_size(code).unwrap_or(1);
                let mut shown = Vec::new();
                let mut bytes = vec![0u8; size];
                for i in 0..len {
                    self.input.read_fully(&mut bytes)?;
                    if i < ARRAY_PREVIEW {
                        shown.push(format_prim(Prim::decode(code, &bytes)?));
                    }
                }
                let more = if len > ARRAY_PREVIEW { ", .." } else { "" };
                record.detail = format!("{} length {len}: [{}{more}]", desc.name, shown.join(", "));
            }
            None => {
                record.detail = format!("{} length {len}", desc.name);
                for _ in 0..len {
                    record.children.push(self.content()?);
                }
            }
        }
        Ok(record)
    }

    fn enum_constant(&mut self) -> Result<RecordInfo> {
        let offset = self.offset();
        let tc = self.input.read_unsigned_byte()?;
        let (desc_record, desc) = self.required_desc("enum constant")?;
        let handle = self.new_handle(Entry::Other(format!("enum {}", desc.name)));
        let constant = match self.input.peek_byte()? {
            TC_STRING | TC_LONGSTRING => self.string()?,
            TC_REFERENCE => {
                let reference = self.content()?;
                let detail = reference.detail.clone();
                (reference, detail)
            }
            other => {
                return Err(StreamError::corrupted(format!("invalid type code: {other:02X}")));
            }
        };
        let mut record = RecordInfo::new(
            offset,
            tag_name(tc),
            format!("{}.{}", desc.name, constant.1.trim_matches('"')),
        );
        record.handle = Some(handle);
        self.set_handle(handle, Entry::Other(format!("enum {}", record.detail)));
        record.children.push(desc_record);
        record.children.push(constant.0);
        Ok(record)
    }

    fn object(&mut self) -> Result<RecordInfo> {
        let offset = self.offset();
        let tc = self.input.read_unsigned_byte()?;
        let (desc_record, desc) = self.required_desc("object")?;
        let handle = self.new_handle(Entry::Other(format!("object of {}", desc.name)));
        let mut record = RecordInfo::new(offset, tag_name(tc), desc.name.clone());
        record.handle = Some(handle);
        record.children.push(desc_record);

        let mut chain = Vec::new();
        let mut cur = Some(desc);
        while let Some(d) = cur {
            cur = d.super_desc.clone();
            chain.push(d);
        }
        for d in chain.iter().rev() {
            record.children.push(self.class_data(d)?);
        }
        Ok(record)
    }

    fn class_data(&mut self, desc: &DescInfo) -> Result<RecordInfo> {
        let mut record = RecordInfo::new(self.offset(), "classdata", desc.name.clone());
        if desc.flags & SC_EXTERNALIZABLE != 0 {
            if desc.flags & SC_BLOCK_DATA == 0 {
                return Err(StreamError::corrupted(format!(
                    "external data of {} is unframed and cannot be decoded",
                    desc.name
                )));
            }
            record.children.extend(self.annotations()?);
            return Ok(record);
        }
        if desc.flags & SC_SERIALIZABLE == 0 {
            return Ok(record);
        }

        for (code, name, ty) in desc.fields.iter().filter(|f| is_primitive_code(f.0)) {
            let offset = self.offset();
            let mut bytes = vec![0u8; primitive_size(*code).unwrap_or(1)];
            self.input.read_fully(&mut bytes)?;
            let value = format_prim(Prim::decode(*code, &bytes)?);
            record
                .children
                .push(RecordInfo::new(offset, "field", format!("{ty} {name} = {value}")));
        }
        for (_, name, ty) in desc.fields.iter().filter(|f| !is_primitive_code(f.0)) {
            let mut field = RecordInfo::new(self.offset(), "field", format!("{ty} {name}"));
            field.children.push(self.content()?);
            record.children.push(field);
        }
        if desc.flags & SC_WRITE_METHOD != 0 {
            record.children.extend(self.annotations()?);
        }
        Ok(record)
    }
}

fn describe_flags(flags: u8) -> String {
    let names = [
        (SC_WRITE_METHOD, "WRITE_METHOD"),
        (SC_SERIALIZABLE, "SERIALIZABLE"),
        (SC_EXTERNALIZABLE, "EXTERNALIZABLE"),
        (SC_BLOCK_DATA, "BLOCK_DATA"),
        (crate::format::SC_ENUM, "ENUM"),
    ];
    let set: Vec<&str> = names
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if set.is_empty() {
        format!("{flags:#04X}")
    } else {
        format!("{flags:#04X} ({})", set.join("|"))
    }
}

fn format_prim(p: Prim) -> String {
    match p {
        Prim::Boolean(v) => v.to_string(),
        Prim::Byte(v) => v.to_string(),
        Prim::Char(v) => char::from_u32(u32::from(v))
            .map_or_else(|| format!("\\u{v:04X}"), |c| format!("{c:?}")),
        Prim::Short(v) => v.to_string(),
        Prim::Int(v) => v.to_string(),
        Prim::Long(v) => v.to_string(),
        Prim::Float(v) => v.to_string(),
        Prim::Double(v) => v.to_string(),
    }
}

impl std::fmt::Display for StreamReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== OBJSTREAM INSPECTOR REPORT ===")?;
        writeln!(f, "Magic:   {:04X}", self.magic)?;
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Size:    {} bytes", self.total_bytes)?;
        writeln!(f, "Handles: {}", self.handles_assigned)?;
        writeln!(f, "\n[CONTENTS]")?;
        for (i, record) in self.records.iter().enumerate() {
            record.fmt_recursive(f, "", i + 1 == self.records.len())?;
        }
        Ok(())
    }
}

impl RecordInfo {
    fn fmt_recursive(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        prefix: &str,
        is_last: bool,
    ) -> std::fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };
        let handle = self
            .handle
            .map(|h| format!(" [{h:#08X}]"))
            .unwrap_or_default();

        writeln!(
            f,
            "{prefix}{connector}{} @{}{handle} {}",
            self.tag, self.offset, self.detail
        )?;

        for (i, child) in self.children.iter().enumerate() {
            let is_last_child = i + 1 == self.children.len();
            child.fmt_recursive(f, &format!("{prefix}{child_prefix}"), is_last_child)?;
        }
        Ok(())
    }
}
