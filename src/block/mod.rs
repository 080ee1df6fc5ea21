//! Block-data framing.
//!
//! The framer sits between the object engine and the raw byte sink or source. It operates in
//! one of two modes:
//!
//! - **Raw mode**: bytes pass through unframed. Used for records (tags, descriptors, field
//!   values of default serialization).
//! - **Block mode**: primitive data is grouped into `TC_BLOCKDATA` / `TC_BLOCKDATALONG`
//!   records of at most [`MAX_BLOCK_SIZE`](crate::constants::MAX_BLOCK_SIZE) bytes. Used for
//!   top-level primitive writes and for the optional data of custom hooks.
//!
//! The [`DataOutput`] and [`DataInput`] traits are the primitive surface shared by the framer
//! and by the object streams built on top of it.

mod input;
mod output;
pub mod utf;

pub use input::BlockDataInput;
pub use output::BlockDataOutput;

use crate::constants::MAX_SHORT_UTF;
use crate::error::{Result, StreamError};

/// Big-endian primitive output.
///
/// Every method has a default implementation on top of [`DataOutput::write`].
pub trait DataOutput {
    /// Writes all of `buf`.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Writes a boolean as one byte.
    fn write_boolean(&mut self, v: bool) -> Result<()> {
        self.write(&[u8::from(v)])
    }

    /// Writes a signed byte.
    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.write(&v.to_be_bytes())
    }

    /// Writes a 16-bit integer.
    fn write_short(&mut self, v: i16) -> Result<()> {
        self.write(&v.to_be_bytes())
    }

    /// Writes a UTF-16 code unit.
    fn write_char(&mut self, v: u16) -> Result<()> {
        self.write(&v.to_be_bytes())
    }

    /// Writes a 32-bit integer.
    fn write_int(&mut self, v: i32) -> Result<()> {
        self.write(&v.to_be_bytes())
    }

    /// Writes a 64-bit integer.
    fn write_long(&mut self, v: i64) -> Result<()> {
        self.write(&v.to_be_bytes())
    }

    /// Writes a 32-bit float.
    fn write_float(&mut self, v: f32) -> Result<()> {
        self.write(&v.to_bits().to_be_bytes())
    }

    /// Writes a 64-bit float.
    fn write_double(&mut self, v: f64) -> Result<()> {
        self.write(&v.to_bits().to_be_bytes())
    }

    /// Writes a string as a 2-byte length followed by its modified UTF-8 bytes.
    fn write_utf(&mut self, s: &str) -> Result<()> {
        let len = utf::utf_length(s);
        if len > MAX_SHORT_UTF {
            return Err(StreamError::UtfDataFormat(format!(
                "encoded string too long: {len} bytes"
            )));
        }
        let mut buf = Vec::with_capacity(len as usize + 2);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
        utf::encode_into(s, &mut buf);
        self.write(&buf)
    }
}

/// Big-endian primitive input.
pub trait DataInput {
    /// Reads up to `buf.len()` bytes. Returns `0` at the end of the available data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Fills `buf` completely.
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut off = 0;
        while off < buf.len() {
            let n = self.read(&mut buf[off..])?;
            if n == 0 {
                return Err(StreamError::eof());
            }
            off += n;
        }
        Ok(())
    }

    /// Skips up to `n` bytes, returning the number actually skipped.
    fn skip_bytes(&mut self, n: usize) -> Result<usize> {
        let mut scratch = [0u8; 256];
        let mut skipped = 0;
        while skipped < n {
            let want = (n - skipped).min(scratch.len());
            let got = self.read(&mut scratch[..want])?;
            if got == 0 {
                break;
            }
            skipped += got;
        }
        Ok(skipped)
    }

    /// Reads a boolean.
    fn read_boolean(&mut self) -> Result<bool> {
        Ok(self.read_unsigned_byte()? != 0)
    }

    /// Reads a signed byte.
    fn read_byte(&mut self) -> Result<i8> {
        let mut b = [0u8; 1];
        self.read_fully(&mut b)?;
        Ok(i8::from_be_bytes(b))
    }

    /// Reads an unsigned byte.
    fn read_unsigned_byte(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_fully(&mut b)?;
        Ok(b[0])
    }

    /// Reads a 16-bit integer.
    fn read_short(&mut self) -> Result<i16> {
        let mut b = [0u8; 2];
        self.read_fully(&mut b)?;
        Ok(i16::from_be_bytes(b))
    }

    /// Reads an unsigned 16-bit integer.
    fn read_unsigned_short(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_fully(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    /// Reads a UTF-16 code unit.
    fn read_char(&mut self) -> Result<u16> {
        self.read_unsigned_short()
    }

    /// Reads a 32-bit integer.
    fn read_int(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_fully(&mut b)?;
        Ok(i32::from_be_bytes(b))
    }

    /// Reads a 64-bit integer.
    fn read_long(&mut self) -> Result<i64> {
        let mut b = [0u8; 8];
        self.read_fully(&mut b)?;
        Ok(i64::from_be_bytes(b))
    }

    /// Reads a 32-bit float.
    fn read_float(&mut self) -> Result<f32> {
        let mut b = [0u8; 4];
        self.read_fully(&mut b)?;
        Ok(f32::from_bits(u32::from_be_bytes(b)))
    }

    /// Reads a 64-bit float.
    fn read_double(&mut self) -> Result<f64> {
        let mut b = [0u8; 8];
        self.read_fully(&mut b)?;
        Ok(f64::from_bits(u64::from_be_bytes(b)))
    }

    /// Reads a string written by [`DataOutput::write_utf`].
    fn read_utf(&mut self) -> Result<String> {
        let len = self.read_unsigned_short()? as usize;
        let mut buf = vec![0u8; len];
        self.read_fully(&mut buf)?;
        utf::decode(&buf)
    }
}
