use crate::config::CompressConfig;
use crate::error::CodecError;
use crate::method::Method;

/// Match statistics reported by the NRV encoder.
///
/// Only a worst-case hint for sizing decoder work areas; decoding never
/// depends on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NrvResult {
    pub max_offset: u32,
    pub max_match: u32,
    /// Longest run of consecutive literals.
    pub max_run: u32,
    /// Distance of the first match in the stream, 0 when there is none.
    pub first_offset: u32,
    pub matches: u32,
}

/// Final LZMA parameters chosen by the encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LzmaResult {
    pub pos_bits: u32,
    pub lit_pos_bits: u32,
    pub lit_context_bits: u32,
    pub dict_size: u32,
    pub num_probs: u32,
}

/// Output metadata of one `compress` call, handed back unchanged to the
/// paired `decompress` / overlap test of the same block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressResult {
    #[default]
    None,
    Nrv(NrvResult),
    Lzma(LzmaResult),
}

/// Coarse-grained progress observer: `(bytes_in_so_far, bytes_out_so_far)`.
pub trait Progress {
    fn update(&mut self, bytes_in: u64, bytes_out: u64);
}

impl<F: FnMut(u64, u64)> Progress for F {
    fn update(&mut self, bytes_in: u64, bytes_out: u64) {
        self(bytes_in, bytes_out)
    }
}

/// Source and destination of one decode run.
///
/// Decoders never see raw slices: they pull compressed bytes and push
/// output through this interface, which lets the same decoder run either
/// into a separate buffer ([`LinearBuffer`]) or in place inside one arena
/// where output grows towards the unread input
/// ([`crate::overlap::OverlapArena`]).
pub trait DecodeBuffer {
    /// Compressed bytes not yet consumed.
    fn input_remaining(&self) -> usize;

    /// Up to `max` unconsumed compressed bytes, without consuming them.
    fn input_window(&self, max: usize) -> &[u8];

    /// Mark `n` bytes of the current window as consumed.
    fn consume(&mut self, n: usize);

    /// Bytes produced so far.
    fn output_len(&self) -> usize;

    /// Bytes that may still be produced before `OutputOverrun`.
    fn output_room(&self) -> usize;

    /// Append decoded bytes.
    fn push_slice(&mut self, bytes: &[u8]) -> Result<(), CodecError>;

    /// Append `len` bytes copied from `distance` bytes back in the output.
    /// Source and destination may overlap.
    fn copy_match(&mut self, distance: usize, len: usize) -> Result<(), CodecError>;

    fn read_byte(&mut self) -> Result<u8, CodecError> {
        let b = *self.input_window(1).first().ok_or(CodecError::InputOverrun)?;
        self.consume(1);
        Ok(b)
    }

    fn push_byte(&mut self, b: u8) -> Result<(), CodecError> {
        self.push_slice(&[b])
    }
}

/// Decode from a borrowed slice into a fresh bounded `Vec`.
pub struct LinearBuffer<'a> {
    src: &'a [u8],
    pos: usize,
    out: Vec<u8>,
    capacity: usize,
}

impl<'a> LinearBuffer<'a> {
    pub fn new(src: &'a [u8], capacity: usize) -> Result<Self, CodecError> {
        let mut out = Vec::new();
        out.try_reserve_exact(capacity)
            .map_err(|_| CodecError::OutOfMemory)?;
        Ok(Self { src, pos: 0, out, capacity })
    }

    pub fn into_output(self) -> Vec<u8> {
        self.out
    }
}

impl DecodeBuffer for LinearBuffer<'_> {
    fn input_remaining(&self) -> usize {
        self.src.len() - self.pos
    }

    fn input_window(&self, max: usize) -> &[u8] {
        let end = self.src.len().min(self.pos.saturating_add(max));
        &self.src[self.pos..end]
    }

    fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.src.len());
    }

    fn output_len(&self) -> usize {
        self.out.len()
    }

    fn output_room(&self) -> usize {
        self.capacity - self.out.len()
    }

    fn push_slice(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() > self.output_room() {
            return Err(CodecError::OutputOverrun);
        }
        self.out.extend_from_slice(bytes);
        Ok(())
    }

    fn copy_match(&mut self, distance: usize, len: usize) -> Result<(), CodecError> {
        if distance == 0 || distance > self.out.len() {
            return Err(CodecError::LookbehindOverrun);
        }
        if len > self.output_room() {
            return Err(CodecError::OutputOverrun);
        }
        let start = self.out.len() - distance;
        for i in 0..len {
            let b = self.out[start + i];
            self.out.push(b);
        }
        Ok(())
    }
}

/// One compression back end.
///
/// Each implementation:
/// - Is identified by the [`Method`] id stored in every block header.
/// - Translates all of its native errors into [`CodecError`].
/// - Decodes through a [`DecodeBuffer`], so the overlap verifier can drive
///   the exact same decoder over an in-place layout.
pub trait Codec: Send + Sync {
    fn method(&self) -> Method;

    fn name(&self) -> &'static str {
        self.method().name()
    }

    /// Compress `src` at `level` (1..=10). The output may be larger than the
    /// input; deciding to store literally instead is the caller's job.
    fn compress(
        &self,
        src: &[u8],
        level: u32,
        config: &CompressConfig,
        progress: Option<&mut dyn Progress>,
    ) -> Result<(Vec<u8>, CompressResult), CodecError>;

    /// Decode the complete compressed stream available in `io`.
    ///
    /// Stops at the logical end of the stream; unconsumed trailing input is
    /// left for the caller to reject.
    fn decode(&self, io: &mut dyn DecodeBuffer, result: &CompressResult) -> Result<(), CodecError>;

    /// Version of the linked or built-in implementation.
    fn version_string(&self) -> String;

    /// One-time consistency check run by the codec init gate.
    fn self_check(&self) -> Result<(), CodecError>;

    /// Decode `src` into a new buffer of at most `capacity` bytes.
    fn decompress(
        &self,
        src: &[u8],
        capacity: usize,
        result: &CompressResult,
    ) -> Result<Vec<u8>, CodecError> {
        let mut io = LinearBuffer::new(src, capacity)?;
        self.decode(&mut io, result)?;
        if io.input_remaining() > 0 {
            return Err(CodecError::InputNotConsumed);
        }
        Ok(io.into_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_buffer_bounds() {
        let src = [1u8, 2, 3];
        let mut io = LinearBuffer::new(&src, 4).unwrap();
        assert_eq!(io.read_byte().unwrap(), 1);
        io.push_byte(b'a').unwrap();
        io.copy_match(1, 3).unwrap();
        assert_eq!(io.output_room(), 0);
        assert_eq!(io.push_byte(0), Err(CodecError::OutputOverrun));
        assert_eq!(io.input_window(8), &[2, 3]);
        io.consume(2);
        assert_eq!(io.read_byte(), Err(CodecError::InputOverrun));
        assert_eq!(io.into_output(), b"aaaa");
    }

    #[test]
    fn lookbehind_is_checked() {
        let mut io = LinearBuffer::new(&[], 8).unwrap();
        io.push_slice(b"ab").unwrap();
        assert_eq!(io.copy_match(3, 1), Err(CodecError::LookbehindOverrun));
        assert_eq!(io.copy_match(0, 1), Err(CodecError::LookbehindOverrun));
        io.copy_match(2, 5).unwrap();
        assert_eq!(io.into_output(), b"abababa");
    }

    #[test]
    fn closures_are_progress_observers() {
        let mut seen = Vec::new();
        {
            let mut cb = |i: u64, o: u64| seen.push((i, o));
            let p: &mut dyn Progress = &mut cb;
            p.update(10, 4);
        }
        assert_eq!(seen, vec![(10, 4)]);
    }
}
