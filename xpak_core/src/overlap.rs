//! In-place decompression check.
//!
//! A runtime stub decompresses a block into the same memory the compressed
//! bytes occupy: the payload sits at the high end of a buffer and output
//! grows from offset 0 towards it. [`test_overlap`] re-runs the real decoder
//! over exactly that layout inside one owned arena and fails if output would
//! ever overwrite a compressed byte that has not been read yet.

use tracing::trace;

use crate::codec::{Codec, CompressResult, DecodeBuffer};
use crate::error::CodecError;

/// Slack between the end of the decompressed data and the end of the
/// compressed data in the in-place layout.
pub const OVERLAP_OVERHEAD: usize = 2048;

/// Offset of the compressed bytes in an in-place layout whose compressed
/// data ends `overhead` bytes past the end of the decompressed data.
pub fn src_offset_for(u_len: usize, c_len: usize, overhead: usize) -> usize {
    (u_len + overhead).saturating_sub(c_len)
}

/// One buffer holding compressed input at `[read, src_end)` and output at
/// `[0, write)`.
///
/// Invariant: `write <= read` after every operation. Output may only land on
/// bytes the decoder has already consumed.
pub struct OverlapArena {
    buf: Vec<u8>,
    read: usize,
    src_end: usize,
    write: usize,
    dst_cap: usize,
}

impl OverlapArena {
    pub fn new(compressed: &[u8], src_offset: usize, dst_len: usize) -> Result<Self, CodecError> {
        let src_end = src_offset
            .checked_add(compressed.len())
            .ok_or(CodecError::InvalidArgument)?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(src_end)
            .map_err(|_| CodecError::OutOfMemory)?;
        buf.resize(src_offset, 0);
        buf.extend_from_slice(compressed);
        Ok(Self {
            buf,
            read: src_offset,
            src_end,
            write: 0,
            dst_cap: dst_len.min(src_end),
        })
    }

    pub fn output(&self) -> &[u8] {
        &self.buf[..self.write]
    }

    fn reserve_output(&mut self, n: usize) -> Result<usize, CodecError> {
        let end = self.write.checked_add(n).ok_or(CodecError::OutputOverrun)?;
        if end > self.dst_cap {
            return Err(CodecError::OutputOverrun);
        }
        if end > self.read {
            return Err(CodecError::OverlapOverrun);
        }
        Ok(end)
    }
}

impl DecodeBuffer for OverlapArena {
    fn input_remaining(&self) -> usize {
        self.src_end - self.read
    }

    fn input_window(&self, max: usize) -> &[u8] {
        let end = self.src_end.min(self.read.saturating_add(max));
        &self.buf[self.read..end]
    }

    fn consume(&mut self, n: usize) {
        self.read = (self.read + n).min(self.src_end);
    }

    fn output_len(&self) -> usize {
        self.write
    }

    fn output_room(&self) -> usize {
        self.dst_cap - self.write
    }

    fn push_slice(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let end = self.reserve_output(bytes.len())?;
        self.buf[self.write..end].copy_from_slice(bytes);
        self.write = end;
        Ok(())
    }

    fn copy_match(&mut self, distance: usize, len: usize) -> Result<(), CodecError> {
        if distance == 0 || distance > self.write {
            return Err(CodecError::LookbehindOverrun);
        }
        let end = self.reserve_output(len)?;
        for i in self.write..end {
            self.buf[i] = self.buf[i - distance];
        }
        self.write = end;
        Ok(())
    }
}

/// Decode `compressed` in place and check the result.
///
/// The compressed bytes are placed at `[src_offset, src_offset + len)` of a
/// scratch arena and decoded towards offset 0. Succeeds with `dst_len` only
/// if the decoder consumed every input byte, produced exactly `dst_len`
/// bytes, and (when `truth` is given) produced exactly `truth`.
pub fn test_overlap(
    codec: &dyn Codec,
    compressed: &[u8],
    truth: Option<&[u8]>,
    src_offset: usize,
    dst_len: usize,
    result: &CompressResult,
) -> Result<usize, CodecError> {
    let mut arena = OverlapArena::new(compressed, src_offset, dst_len)?;
    codec.decode(&mut arena, result)?;
    if arena.input_remaining() > 0 {
        return Err(CodecError::InputNotConsumed);
    }
    if arena.output_len() != dst_len {
        trace!(got = arena.output_len(), want = dst_len, "overlap decode length mismatch");
        return Err(CodecError::Error);
    }
    if let Some(truth) = truth {
        // Right length but corrupted by the overlap is still a failure.
        if arena.output() != truth {
            return Err(CodecError::Error);
        }
    }
    Ok(dst_len)
}

/// Smallest overhead for which `compressed` decodes in place.
///
/// Binary search over `[1, min(u_len / 4 + 512, upper_limit)]`, starting
/// optimistically at 16 and stopping once the remaining interval is no
/// wider than `range`.
pub fn find_overlap_overhead(
    codec: &dyn Codec,
    compressed: &[u8],
    truth: Option<&[u8]>,
    u_len: usize,
    result: &CompressResult,
    range: usize,
    upper_limit: usize,
) -> Result<usize, CodecError> {
    let mut low = 1usize;
    let mut high = (u_len / 4 + 512).min(upper_limit);
    let mut m = high.min(16);
    let mut overhead = 0usize;
    let mut probes = 0u32;

    while high >= low {
        probes += 1;
        let src_offset = src_offset_for(u_len, compressed.len(), m);
        if test_overlap(codec, compressed, truth, src_offset, u_len, result).is_ok() {
            overhead = m;
            if m - low < range {
                break;
            }
            high = m - 1;
        } else {
            low = m + 1;
        }
        m = (low & high) + ((low ^ high) >> 1);
    }
    trace!(overhead, probes, "overlap overhead search finished");

    if overhead == 0 {
        return Err(CodecError::Error);
    }
    Ok(overhead)
}
