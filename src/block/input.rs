use std::io::{ErrorKind, Read};

use super::{DataInput, utf};
use crate::constants::MAX_BLOCK_SIZE;
use crate::error::{Result, StreamError};
use crate::format::{TC_BASE, TC_BLOCKDATA, TC_BLOCKDATALONG, TC_MAX, TC_RESET};

/// Source wrapper with a one-byte lookahead and a consumed-bytes counter.
#[derive(Debug)]
struct PeekInput<R: Read> {
    inner: R,
    peekb: Option<u8>,
    total: u64,
}

impl<R: Read> PeekInput<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            peekb: None,
            total: 0,
        }
    }

    fn raw_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Next byte without consuming it. `None` at end of stream.
    fn peek(&mut self) -> Result<Option<u8>> {
        if self.peekb.is_none() {
            let mut b = [0u8; 1];
            if self.raw_read(&mut b)? == 1 {
                self.peekb = Some(b[0]);
            }
        }
        Ok(self.peekb)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = match self.peekb.take() {
            Some(b) => {
                buf[0] = b;
                1 + self.raw_read(&mut buf[1..])?
            }
            None => self.raw_read(buf)?,
        };
        self.total += n as u64;
        Ok(n)
    }

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
}

/// Input counterpart of [`BlockDataOutput`](super::BlockDataOutput).
///
/// In block mode the reader consumes block headers transparently: a primitive read that crosses
/// the end of one block continues into the next one. Reaching a record that is not block data
/// ends the optional data; reads then return `0` (or fail with
/// [`StreamError::OptionalData`] for fixed-size reads).
///
/// `TC_RESET` markers can only appear between records. When one shows up while a block header is
/// expected, it is consumed and reported through [`BlockDataInput::take_reset`] so the object
/// layer can discard its handle table; at non-zero recursion depth it is a format error.
#[derive(Debug)]
pub struct BlockDataInput<R: Read> {
    input: PeekInput<R>,
    blkmode: bool,
    buf: Box<[u8; MAX_BLOCK_SIZE]>,
    pos: usize,
    /// End of valid data in `buf`; `None` once no more block data is available.
    end: Option<usize>,
    /// Bytes of the current block not yet pulled into `buf`.
    unread: usize,
    default_data_end: bool,
    depth: usize,
    reset_pending: bool,
}

impl<R: Read> BlockDataInput<R> {
    /// Wraps a source. The framer starts in raw mode.
    pub fn new(inner: R) -> Self {
        Self {
            input: PeekInput::new(inner),
            blkmode: false,
            buf: Box::new([0u8; MAX_BLOCK_SIZE]),
            pos: 0,
            end: None,
            unread: 0,
            default_data_end: false,
            depth: 0,
            reset_pending: false,
        }
    }

    /// Switches mode and returns the previous one.
    ///
    /// Entering block mode forgets any previous block state. Leaving it while buffered block data
    /// is still unread is an [`StreamError::IllegalState`].
    pub fn set_block_data_mode(&mut self, mode: bool) -> Result<bool> {
        if self.blkmode == mode {
            return Ok(self.blkmode);
        }
        if mode {
            self.pos = 0;
            self.end = Some(0);
            self.unread = 0;
        } else if matches!(self.end, Some(end) if self.pos < end) {
            return Err(StreamError::IllegalState("unread block data".to_string()));
        }
        self.blkmode = mode;
        Ok(!mode)
    }

    /// Returns `true` in block mode.
    pub fn block_data_mode(&self) -> bool {
        self.blkmode
    }

    /// Consumes the rest of the current run of block data.
    pub fn skip_block_data(&mut self) -> Result<()> {
        if !self.blkmode {
            return Err(StreamError::IllegalState(
                "not in block data mode".to_string(),
            ));
        }
        while self.end.is_some() {
            self.refill()?;
        }
        Ok(())
    }

    /// Bytes left in the current block (buffered and unread). Zero if no block is active.
    pub fn current_block_remaining(&self) -> Result<usize> {
        if !self.blkmode {
            return Err(StreamError::IllegalState(
                "not in block data mode".to_string(),
            ));
        }
        Ok(self.end.map_or(0, |end| end - self.pos + self.unread))
    }

    /// Next byte without consuming it, or `None` if no more data is available in this mode.
    pub fn peek(&mut self) -> Result<Option<u8>> {
        if self.blkmode {
            if self.end == Some(self.pos) {
                self.refill()?;
            }
            Ok(self.end.map(|_| self.buf[self.pos]))
        } else {
            self.input.peek()
        }
    }

    /// Next byte without consuming it; end of data is an error.
    pub fn peek_byte(&mut self) -> Result<u8> {
        self.peek()?.ok_or_else(StreamError::eof)
    }

    /// Bytes consumed from the underlying source so far.
    pub fn bytes_read(&self) -> u64 {
        self.input.total
    }

    /// Reads a string with an 8-byte length prefix.
    pub fn read_long_utf(&mut self) -> Result<String> {
        let len = self.read_long()?;
        let len = usize::try_from(len).map_err(|_| {
            StreamError::UtfDataFormat(format!("illegal long string length: {len}"))
        })?;
        let mut bytes = Vec::with_capacity(len.min(MAX_BLOCK_SIZE * 64));
        let mut chunk = [0u8; 4096];
        while bytes.len() < len {
            let want = (len - bytes.len()).min(chunk.len());
            self.read_fully(&mut chunk[..want])?;
            bytes.extend_from_slice(&chunk[..want]);
        }
        utf::decode(&bytes)
    }

    /// Marks the end of the default data written for the current class (no custom data follows).
    pub(crate) fn set_default_data_end(&mut self, value: bool) {
        self.default_data_end = value;
    }

    pub(crate) fn default_data_end(&self) -> bool {
        self.default_data_end
    }

    /// Recursion depth of the object layer, consulted when a reset marker is found.
    pub(crate) fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
    }

    /// Returns and clears the flag raised by a reset marker consumed inside the framer.
    pub(crate) fn take_reset(&mut self) -> bool {
        std::mem::take(&mut self.reset_pending)
    }

    fn refill(&mut self) -> Result<()> {
        let res = self.try_refill();
        if res.is_err() {
            self.pos = 0;
            self.end = None;
            self.unread = 0;
        }
        res
    }

    fn try_refill(&mut self) -> Result<()> {
        loop {
            self.pos = 0;
            if self.unread > 0 {
                let want = self.unread.min(MAX_BLOCK_SIZE);
                let n = self.input.read(&mut self.buf[..want])?;
                if n == 0 {
                    return Err(StreamError::corrupted(
                        "unexpected EOF in middle of data block",
                    ));
                }
                self.end = Some(n);
                self.unread -= n;
            } else {
                match self.read_block_header()? {
                    Some(len) => {
                        self.end = Some(0);
                        self.unread = len;
                    }
                    None => {
                        self.end = None;
                        self.unread = 0;
                    }
                }
            }
            if self.end != Some(self.pos) {
                return Ok(());
            }
        }
    }

    /// Reads the next block header. `None` if the next record is not block data.
    fn read_block_header(&mut self) -> Result<Option<usize>> {
        if self.default_data_end {
            return Ok(None);
        }
        loop {
            let Some(tc) = self.input.peek()? else {
                return Ok(None);
            };
            match tc {
                TC_BLOCKDATA => {
                    let mut hbuf = [0u8; 2];
                    self.read_header(&mut hbuf)?;
                    return Ok(Some(hbuf[1] as usize));
                }
                TC_BLOCKDATALONG => {
                    let mut hbuf = [0u8; 5];
                    self.read_header(&mut hbuf)?;
                    let len = i32::from_be_bytes([hbuf[1], hbuf[2], hbuf[3], hbuf[4]]);
                    if len < 0 {
                        return Err(StreamError::corrupted(format!(
                            "illegal block data header length: {len}"
                        )));
                    }
                    return Ok(Some(len as usize));
                }
                TC_RESET => {
                    self.read_header(&mut [0u8; 1])?;
                    if self.depth > 0 {
                        return Err(StreamError::corrupted(format!(
                            "unexpected reset; recursion depth: {}",
                            self.depth
                        )));
                    }
                    log::debug!("[reader] reset marker inside block data");
                    self.reset_pending = true;
                }
                tc if !(TC_BASE..=TC_MAX).contains(&tc) => {
                    return Err(StreamError::corrupted(format!(
                        "invalid type code: {tc:02X}"
                    )));
                }
                _ => return Ok(None),
            }
        }
    }

    fn read_header(&mut self, hbuf: &mut [u8]) -> Result<()> {
        self.input.read_fully(hbuf).map_err(|e| {
            if e.is_eof() {
                StreamError::corrupted("unexpected EOF while reading block data header")
            } else {
                e
            }
        })
    }
}

impl<R: Read> DataInput for BlockDataInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.blkmode {
            return self.input.read(buf);
        }
        if self.end == Some(self.pos) {
            self.refill()?;
        }
        match self.end {
            None => Ok(0),
            Some(end) => {
                let n = buf.len().min(end - self.pos);
                buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
                self.pos += n;
                Ok(n)
            }
        }
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut off = 0;
        while off < buf.len() {
            let n = self.read(&mut buf[off..])?;
            if n == 0 {
                return Err(if self.blkmode {
                    StreamError::OptionalData {
                        length: 0,
                        eof: true,
                    }
                } else {
                    StreamError::eof()
                });
            }
            off += n;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::block::{BlockDataOutput, DataOutput};
    use crate::format::TC_ENDBLOCKDATA;

    fn framed(f: impl FnOnce(&mut BlockDataOutput<Vec<u8>>)) -> Vec<u8> {
        let mut out = BlockDataOutput::new(Vec::new());
        out.set_block_data_mode(true).unwrap();
        f(&mut out);
        out.set_block_data_mode(false).unwrap();
        out.into_inner().unwrap()
    }

    #[test]
    fn primitives_cross_block_boundaries() {
        // Two one-byte-short blocks force the int to straddle a header.
        let mut bytes = vec![TC_BLOCKDATA, 2, 0, 0, TC_BLOCKDATA, 2, 1, 2];
        bytes.push(TC_ENDBLOCKDATA);
        let mut input = BlockDataInput::new(&bytes[..]);
        input.set_block_data_mode(true).unwrap();
        assert_eq!(input.read_int().unwrap(), 0x0102);
        assert_eq!(input.current_block_remaining().unwrap(), 0);
        assert_eq!(input.peek().unwrap(), None);
        input.set_block_data_mode(false).unwrap();
        assert_eq!(input.peek_byte().unwrap(), TC_ENDBLOCKDATA);
    }

    #[test]
    fn large_payload_round_trips() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7) as u8).collect();
        let bytes = framed(|out| out.write(&data).unwrap());
        let mut input = BlockDataInput::new(&bytes[..]);
        input.set_block_data_mode(true).unwrap();
        let mut back = vec![0u8; data.len()];
        input.read_fully(&mut back).unwrap();
        assert_eq!(back, data);
        assert_eq!(input.bytes_read(), bytes.len() as u64);
    }

    #[test]
    fn reading_past_block_data_is_optional_data_eof() {
        let mut bytes = framed(|out| out.write_short(3).unwrap());
        bytes.push(TC_ENDBLOCKDATA);
        let mut input = BlockDataInput::new(&bytes[..]);
        input.set_block_data_mode(true).unwrap();
        assert_eq!(input.read_short().unwrap(), 3);
        assert!(matches!(
            input.read_int(),
            Err(StreamError::OptionalData { eof: true, .. })
        ));
    }

    #[test]
    fn leaving_block_mode_with_unread_data_fails() {
        let bytes = framed(|out| out.write_long(1).unwrap());
        let mut input = BlockDataInput::new(&bytes[..]);
        input.set_block_data_mode(true).unwrap();
        input.read_int().unwrap();
        assert!(matches!(
            input.set_block_data_mode(false),
            Err(StreamError::IllegalState(_))
        ));
        input.skip_block_data().unwrap();
        input.set_block_data_mode(false).unwrap();
    }

    #[test]
    fn truncated_block_is_corruption_not_eof() {
        let bytes = [TC_BLOCKDATA, 10, 1, 2, 3];
        let mut input = BlockDataInput::new(&bytes[..]);
        input.set_block_data_mode(true).unwrap();
        let mut buf = [0u8; 10];
        let err = input.read_fully(&mut buf).unwrap_err();
        assert!(matches!(err, StreamError::StreamCorrupted(_)), "{err}");
    }

    #[test]
    fn negative_long_header_is_rejected() {
        let bytes = [TC_BLOCKDATALONG, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut input = BlockDataInput::new(&bytes[..]);
        input.set_block_data_mode(true).unwrap();
        assert!(matches!(
            input.read_byte(),
            Err(StreamError::StreamCorrupted(_))
        ));
    }

    #[test]
    fn reset_between_blocks() {
        let bytes = [TC_BLOCKDATA, 1, 9, TC_RESET, TC_BLOCKDATA, 1, 8];
        let mut input = BlockDataInput::new(&bytes[..]);
        input.set_block_data_mode(true).unwrap();
        assert_eq!(input.read_byte().unwrap(), 9);
        assert_eq!(input.read_byte().unwrap(), 8);
        assert!(input.take_reset());
        assert!(!input.take_reset());

        let mut nested = BlockDataInput::new(&bytes[..]);
        nested.set_depth(1);
        nested.set_block_data_mode(true).unwrap();
        nested.read_byte().unwrap();
        assert!(matches!(
            nested.read_byte(),
            Err(StreamError::StreamCorrupted(_))
        ));
    }

    #[test]
    fn default_data_end_hides_following_blocks() {
        let bytes = framed(|out| out.write_int(1).unwrap());
        let mut input = BlockDataInput::new(&bytes[..]);
        input.set_default_data_end(true);
        input.set_block_data_mode(true).unwrap();
        assert_eq!(input.peek().unwrap(), None);
        assert!(input.default_data_end());
    }
}
