//! One-call entry points for whole graphs.
//!
//! ```rust
//! use objstream::{Array, ObjStream, Value};
//!
//! let numbers = Value::from(Array::Int(vec![1, 2, 3]));
//! let copy = ObjStream::deep_copy(&numbers)?;
//! assert!(!copy.ptr_eq(&numbers));
//! assert_eq!(*copy.as_array().unwrap().borrow(), Array::Int(vec![1, 2, 3]));
//! # Ok::<(), objstream::StreamError>(())
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::config::StreamConfig;
use crate::error::Result;
use crate::input::{ObjectInput, ObjectInputStream};
use crate::output::{ObjectOutput, ObjectOutputStream};
use crate::value::Value;

/// The main entry point for whole-graph operations.
#[derive(Debug)]
pub struct ObjStream;

impl ObjStream {
    /// Serializes `root` into a complete stream.
    pub fn to_bytes(root: &Value) -> Result<Vec<u8>> {
        Self::to_bytes_with(root, &StreamConfig::default())
    }

    /// Serializes `root` with explicit settings.
    pub fn to_bytes_with(root: &Value, config: &StreamConfig) -> Result<Vec<u8>> {
        let mut out = ObjectOutputStream::with_config(Vec::new(), config)?;
        out.write_object(root)?;
        out.into_inner()
    }

    /// Reads the first object of a stream.
    pub fn from_bytes(bytes: &[u8]) -> Result<Value> {
        Self::from_bytes_with(bytes, &StreamConfig::default())
    }

    /// Reads the first object of a stream with explicit settings.
    pub fn from_bytes_with(bytes: &[u8], config: &StreamConfig) -> Result<Value> {
        ObjectInputStream::with_config(bytes, config)?.read_object()
    }

    /// Copies a graph by writing it and reading it back. Shared and cyclic structure is kept.
    pub fn deep_copy(root: &Value) -> Result<Value> {
        Self::from_bytes(&Self::to_bytes(root)?)
    }

    /// Writes `root` to a file, replacing it if it exists.
    pub fn save<P: AsRef<Path>>(path: P, root: &Value) -> Result<()> {
        Self::save_with(path, root, &StreamConfig::default())
    }

    /// Writes `root` to a file with explicit settings.
    pub fn save_with<P: AsRef<Path>>(path: P, root: &Value, config: &StreamConfig) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut out = ObjectOutputStream::with_config(BufWriter::new(file), config)?;
        out.write_object(root)?;
        let mut sink = out.into_inner()?;
        sink.flush()?;
        log::debug!("[writer] saved graph to {}", path.display());
        Ok(())
    }

    /// Reads the first object of a file through a memory map.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Value> {
        Self::load_with(path, &StreamConfig::default())
    }

    /// Reads the first object of a file with explicit settings.
    pub fn load_with<P: AsRef<Path>>(path: P, config: &StreamConfig) -> Result<Value> {
        let file = File::open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            return Self::from_bytes_with(&[], config);
        }
        // Safety: the map is only read while this call runs. Truncating the file concurrently
        // is outside what the library can guard against.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_bytes_with(&mmap[..], config)
    }
}
