use std::io::{self, Read, Write};

use tracing::{debug, info};

use crate::checksum::{adler32_update, ADLER32_INIT};
use crate::codec::{Codec, CompressResult, Progress};
use crate::error::{CodecError, StreamError};
use crate::filter::{is_known_filter, Filter, FilterOutcome};
use crate::format::{BlockHeader, ByteOrder, BLOCK_HEADER_SIZE, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, TERMINAL_MAGIC};

/// Stream totals carried next to the block stream by the container format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamTotals {
    pub u_len: u64,
    pub c_len: u64,
    pub u_adler: u32,
    pub c_adler: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackOptions {
    pub byte_order: ByteOrder,
    /// Largest `u_len` a block header may declare.
    pub max_block_size: usize,
    /// Must match the value the stream was packed with.
    pub addvalue: u32,
    /// Totals recorded at pack time; checked at the end when present.
    pub expected: Option<StreamTotals>,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::default(),
            max_block_size: DEFAULT_BLOCK_SIZE,
            addvalue: 0,
            expected: None,
        }
    }
}

/// A short read inside the stream is an input overrun, never a clean end.
fn read_exact_or_overrun<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<(), StreamError> {
    input.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => StreamError::Codec(CodecError::InputOverrun),
        _ => StreamError::Io(e),
    })
}

/// Sequential block stream reader.
///
/// # Read sequence
/// 1. Read a 12-byte block header.
/// 2. End marker: check the magic and that no byte follows, then stop.
/// 3. Otherwise read `c_len` payload bytes, decode (or copy, for a literal
///    block), unfilter, and append to the output.
/// 4. At the end compare both running checksums against the expected
///    totals.
pub struct Unpacker<'a> {
    codec: &'a dyn Codec,
    opts: UnpackOptions,
}

impl<'a> Unpacker<'a> {
    pub fn new(codec: &'a dyn Codec, opts: UnpackOptions) -> Result<Self, StreamError> {
        if opts.max_block_size == 0 || opts.max_block_size > MAX_BLOCK_SIZE {
            return Err(CodecError::InvalidArgument.into());
        }
        Ok(Self { codec, opts })
    }

    fn check_header(&self, h: &BlockHeader) -> Result<(), StreamError> {
        if h.c_len == 0 || h.c_len > h.u_len {
            return Err(StreamError::Corrupted(format!("block sizes u_len={} c_len={}", h.u_len, h.c_len)));
        }
        if h.u_len as usize > self.opts.max_block_size {
            return Err(StreamError::Corrupted(format!(
                "block of {} bytes exceeds the {}-byte limit",
                h.u_len, self.opts.max_block_size
            )));
        }
        if h.is_literal() {
            if h.filter != 0 {
                return Err(StreamError::Corrupted("literal block carries a filter".into()));
            }
        } else if h.method != self.codec.method().id() {
            return Err(StreamError::MethodMismatch { expected: self.codec.method(), found: h.method });
        }
        if !is_known_filter(h.filter) {
            return Err(StreamError::Corrupted(format!("unknown filter 0x{:02x}", h.filter)));
        }
        Ok(())
    }

    fn decode_block(&self, h: &BlockHeader, payload: Vec<u8>) -> Result<Vec<u8>, StreamError> {
        if h.is_literal() {
            return Ok(payload);
        }
        let u_len = h.u_len as usize;
        let mut block = self.codec.decompress(&payload, u_len, &CompressResult::None)?;
        if block.len() != u_len {
            return Err(StreamError::Corrupted(format!(
                "block decoded to {} bytes, header declares {}",
                block.len(),
                u_len
            )));
        }
        if h.filter != 0 {
            let mut filter = Filter::new(h.filter, self.opts.addvalue).with_cto(h.cto);
            if filter.unfilter(&mut block, false)? == FilterOutcome::NotApplicable {
                return Err(StreamError::Corrupted(format!(
                    "filter 0x{:02x} cannot apply to a {}-byte block",
                    h.filter, u_len
                )));
            }
        }
        Ok(block)
    }

    /// Unpack one complete stream from `input` into `output`.
    pub fn unpack<R: Read, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
        mut progress: Option<&mut dyn Progress>,
    ) -> Result<StreamTotals, StreamError> {
        let order = self.opts.byte_order;
        let mut totals = StreamTotals { u_adler: ADLER32_INIT, c_adler: ADLER32_INIT, ..Default::default() };
        let mut blocks = 0u32;

        loop {
            let mut raw = [0u8; BLOCK_HEADER_SIZE];
            read_exact_or_overrun(input, &mut raw)?;
            let h = BlockHeader::from_bytes(&raw, order);

            if h.is_terminal() {
                if h.c_len != TERMINAL_MAGIC {
                    return Err(StreamError::Corrupted(format!("bad end marker {:#010x}", h.c_len)));
                }
                let mut probe = [0u8; 1];
                if input.read(&mut probe)? != 0 {
                    return Err(CodecError::InputNotConsumed.into());
                }
                break;
            }

            self.check_header(&h)?;
            let mut payload = vec![0u8; h.c_len as usize];
            read_exact_or_overrun(input, &mut payload)?;
            totals.c_adler = adler32_update(totals.c_adler, &payload);

            let block = self.decode_block(&h, payload)?;
            totals.u_adler = adler32_update(totals.u_adler, &block);
            totals.u_len += block.len() as u64;
            totals.c_len += h.c_len as u64;
            output.write_all(&block)?;

            debug!(block = blocks, u_len = h.u_len, c_len = h.c_len, filter = h.filter, "block read");
            blocks += 1;
            if let Some(p) = progress.as_deref_mut() {
                p.update(totals.c_len, totals.u_len);
            }
        }

        if let Some(want) = self.opts.expected {
            if want.u_len != totals.u_len || want.c_len != totals.c_len {
                return Err(StreamError::Corrupted(format!(
                    "stream sizes {}/{} differ from recorded {}/{}",
                    totals.u_len, totals.c_len, want.u_len, want.c_len
                )));
            }
            if want.c_adler != totals.c_adler {
                return Err(CodecError::ChecksumMismatch { expected: want.c_adler, actual: totals.c_adler }.into());
            }
            if want.u_adler != totals.u_adler {
                return Err(CodecError::ChecksumMismatch { expected: want.u_adler, actual: totals.u_adler }.into());
            }
        }
        info!(blocks, u_len = totals.u_len, c_len = totals.c_len, "unpack finished");
        Ok(totals)
    }
}
