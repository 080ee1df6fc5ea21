use std::io::Write;

use super::{DataOutput, utf};
use crate::constants::{MAX_BLOCK_SIZE, MAX_SHORT_UTF, SHORT_BLOCK_MAX};
use crate::error::{Result, StreamError};
use crate::format::{TC_BLOCKDATA, TC_BLOCKDATALONG};

/// Buffered output with two modes: raw (bytes pass through unframed) and block-data (bytes are
/// grouped into length-prefixed records).
///
/// The internal buffer is used in both modes so small primitive writes never hit the sink one by
/// one; only in block mode does draining it produce a block header.
#[derive(Debug)]
pub struct BlockDataOutput<W: Write> {
    out: W,
    blkmode: bool,
    buf: Box<[u8; MAX_BLOCK_SIZE]>,
    pos: usize,
}

impl<W: Write> BlockDataOutput<W> {
    /// Wraps a sink. The framer starts in raw mode.
    pub fn new(out: W) -> Self {
        Self {
            out,
            blkmode: false,
            buf: Box::new([0u8; MAX_BLOCK_SIZE]),
            pos: 0,
        }
    }

    /// Switches mode, draining buffered data first. Returns the previous mode.
    pub fn set_block_data_mode(&mut self, mode: bool) -> Result<bool> {
        if self.blkmode == mode {
            return Ok(self.blkmode);
        }
        self.drain()?;
        self.blkmode = mode;
        Ok(!mode)
    }

    /// Returns `true` in block mode.
    pub fn block_data_mode(&self) -> bool {
        self.blkmode
    }

    /// Writes `b`.
    ///
    /// With `copy` unset, data that would fill a whole block while the buffer is empty is written
    /// straight to the sink behind its own header. With `copy` set the bytes always go through
    /// the buffer, so the caller may reuse `b` immediately (and raw mode stays buffered).
    pub fn write_bytes(&mut self, mut b: &[u8], copy: bool) -> Result<()> {
        if !(copy || self.blkmode) {
            self.drain()?;
            self.out.write_all(b)?;
            return Ok(());
        }
        while !b.is_empty() {
            if self.pos >= MAX_BLOCK_SIZE {
                self.drain()?;
            }
            if b.len() >= MAX_BLOCK_SIZE && !copy && self.pos == 0 {
                self.write_block_header(MAX_BLOCK_SIZE)?;
                self.out.write_all(&b[..MAX_BLOCK_SIZE])?;
                b = &b[MAX_BLOCK_SIZE..];
            } else {
                let wlen = b.len().min(MAX_BLOCK_SIZE - self.pos);
                self.buf[self.pos..self.pos + wlen].copy_from_slice(&b[..wlen]);
                self.pos += wlen;
                b = &b[wlen..];
            }
        }
        Ok(())
    }

    /// Writes a single tag byte.
    pub fn write_tag(&mut self, tc: u8) -> Result<()> {
        self.write_bytes(&[tc], true)
    }

    /// Writes a string with an 8-byte length prefix, for strings too long for
    /// [`DataOutput::write_utf`].
    pub fn write_long_utf(&mut self, s: &str) -> Result<()> {
        let len = utf::utf_length(s);
        self.write_long(len as i64)?;
        self.write_bytes(&utf::encode(s), true)
    }

    /// Writes `s` with a 2-byte length prefix. `len` must be its modified UTF-8 length.
    pub(crate) fn write_utf_with_len(&mut self, s: &str, len: u64) -> Result<()> {
        if len > MAX_SHORT_UTF {
            return Err(StreamError::UtfDataFormat(format!(
                "encoded string too long: {len} bytes"
            )));
        }
        self.write_bytes(&(len as u16).to_be_bytes(), true)?;
        self.write_bytes(&utf::encode(s), true)
    }

    /// Writes all buffered data to the sink without flushing it.
    pub fn drain(&mut self) -> Result<()> {
        if self.pos == 0 {
            return Ok(());
        }
        if self.blkmode {
            self.write_block_header(self.pos)?;
        }
        self.out.write_all(&self.buf[..self.pos])?;
        self.pos = 0;
        Ok(())
    }

    /// Drains and flushes the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.drain()?;
        self.out.flush()?;
        Ok(())
    }

    /// Flushes and returns the sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.out)
    }

    /// Borrows the sink.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn write_block_header(&mut self, len: usize) -> Result<()> {
        if len <= SHORT_BLOCK_MAX {
            self.out.write_all(&[TC_BLOCKDATA, len as u8])?;
        } else {
            let mut hbuf = [0u8; 5];
            hbuf[0] = TC_BLOCKDATALONG;
            hbuf[1..].copy_from_slice(&(len as i32).to_be_bytes());
            self.out.write_all(&hbuf)?;
        }
        log::trace!("[block] header len={len}");
        Ok(())
    }
}

impl<W: Write> DataOutput for BlockDataOutput<W> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.write_bytes(buf, false)
    }

    fn write_boolean(&mut self, v: bool) -> Result<()> {
        self.write_bytes(&[u8::from(v)], true)
    }

    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.write_bytes(&v.to_be_bytes(), true)
    }

    fn write_short(&mut self, v: i16) -> Result<()> {
        self.write_bytes(&v.to_be_bytes(), true)
    }

    fn write_char(&mut self, v: u16) -> Result<()> {
        self.write_bytes(&v.to_be_bytes(), true)
    }

    fn write_int(&mut self, v: i32) -> Result<()> {
        self.write_bytes(&v.to_be_bytes(), true)
    }

    fn write_long(&mut self, v: i64) -> Result<()> {
        self.write_bytes(&v.to_be_bytes(), true)
    }

    fn write_float(&mut self, v: f32) -> Result<()> {
        self.write_bytes(&v.to_bits().to_be_bytes(), true)
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.write_bytes(&v.to_bits().to_be_bytes(), true)
    }

    fn write_utf(&mut self, s: &str) -> Result<()> {
        self.write_utf_with_len(s, utf::utf_length(s))
    }
}
