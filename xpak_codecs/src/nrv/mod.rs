//! Native NRV2B / NRV2D / NRV2E codecs.
//!
//! All three variants share one LZ77 front end and differ only in how match
//! offsets and lengths are coded. Each comes in three flag-group widths.

mod bits;
mod decoder;
mod encoder;
mod matcher;

use xpak_core::{Codec, CodecError, CompressConfig, CompressResult, DecodeBuffer, Method, Progress};

use bits::BitWidth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Variant {
    B,
    D,
    E,
}

impl Variant {
    /// Distances beyond this cost one extra byte of minimum match length.
    pub(crate) fn far_threshold(self) -> usize {
        match self {
            Variant::B => 0xd00,
            Variant::D | Variant::E => 0x500,
        }
    }
}

/// Fixed input of the init-time self check and its exact encoded size for
/// NRV2B with 8-bit groups at level 9.
const SELF_CHECK_LEN: usize = 16 * 1024;
const SELF_CHECK_NRV2B8_LEN: usize = 34;

#[derive(Debug, Clone, Copy)]
pub struct NrvCodec {
    method: Method,
    variant: Variant,
    width: BitWidth,
}

impl NrvCodec {
    /// `None` for methods that are not NRV.
    pub fn new(method: Method) -> Option<Self> {
        let (variant, width) = match method {
            Method::Nrv2bLe32 => (Variant::B, BitWidth::Le32),
            Method::Nrv2b8 => (Variant::B, BitWidth::Byte),
            Method::Nrv2bLe16 => (Variant::B, BitWidth::Le16),
            Method::Nrv2dLe32 => (Variant::D, BitWidth::Le32),
            Method::Nrv2d8 => (Variant::D, BitWidth::Byte),
            Method::Nrv2dLe16 => (Variant::D, BitWidth::Le16),
            Method::Nrv2eLe32 => (Variant::E, BitWidth::Le32),
            Method::Nrv2e8 => (Variant::E, BitWidth::Byte),
            Method::Nrv2eLe16 => (Variant::E, BitWidth::Le16),
            _ => return None,
        };
        Some(Self { method, variant, width })
    }
}

impl Codec for NrvCodec {
    fn method(&self) -> Method {
        self.method
    }

    fn compress(
        &self,
        src: &[u8],
        level: u32,
        config: &CompressConfig,
        progress: Option<&mut dyn Progress>,
    ) -> Result<(Vec<u8>, CompressResult), CodecError> {
        let params = config.resolve_nrv(level, src.len())?;
        let (out, stats) = encoder::encode(src, self.variant, self.width, &params, progress);
        Ok((out, CompressResult::Nrv(stats)))
    }

    fn decode(&self, io: &mut dyn DecodeBuffer, _result: &CompressResult) -> Result<(), CodecError> {
        decoder::decode(io, self.variant, self.width)
    }

    fn version_string(&self) -> String {
        format!("nrv {}", env!("CARGO_PKG_VERSION"))
    }

    fn self_check(&self) -> Result<(), CodecError> {
        let zeros = vec![0u8; SELF_CHECK_LEN];
        let (packed, result) = self.compress(&zeros, 9, &CompressConfig::default(), None)?;
        if self.method == Method::Nrv2b8 && packed.len() != SELF_CHECK_NRV2B8_LEN {
            return Err(CodecError::Error);
        }
        if self.decompress(&packed, zeros.len(), &result)? != zeros {
            return Err(CodecError::Error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpak_core::LinearBuffer;

    fn nrv(method: Method) -> NrvCodec {
        NrvCodec::new(method).unwrap()
    }

    fn text(len: usize) -> Vec<u8> {
        let words: [&[u8]; 6] = [b"alpha ", b"beta ", b"gamma\n", b"delta ", b"pack ", b"stub "];
        let mut out = Vec::with_capacity(len);
        let mut state = 0x2545_f491u32;
        while out.len() < len {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            out.extend_from_slice(words[state as usize % words.len()]);
        }
        out.truncate(len);
        out
    }

    #[test]
    fn zero_fixture_has_known_size() {
        let c = nrv(Method::Nrv2b8);
        let zeros = vec![0u8; 16384];
        let (packed, result) = c.compress(&zeros, 9, &CompressConfig::default(), None).unwrap();
        assert_eq!(packed.len(), 34);
        match result {
            CompressResult::Nrv(s) => {
                assert_eq!(s.matches, 8);
                assert_eq!(s.first_offset, 1);
                assert_eq!(s.max_match, 2048);
                assert_eq!(s.max_run, 1);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(c.decompress(&packed, 16384, &result).unwrap(), zeros);
        assert_eq!(c.decompress(&packed, 16383, &result), Err(CodecError::OutputOverrun));
        assert_eq!(c.decompress(&packed[..33], 16384, &result), Err(CodecError::InputOverrun));
    }

    #[test]
    fn every_variant_and_width_round_trips_text() {
        let data = text(40_000);
        for m in Method::ALL.iter().copied().filter(|m| m.is_nrv()) {
            let c = nrv(m);
            for level in [1, 6, 10] {
                let (packed, result) = c.compress(&data, level, &CompressConfig::default(), None).unwrap();
                assert!(packed.len() < data.len() / 2, "{m} level {level}: {}", packed.len());
                assert_eq!(c.decompress(&packed, data.len(), &result).unwrap(), data, "{m} level {level}");
            }
        }
    }

    #[test]
    fn far_matches_need_three_bytes() {
        // Two-byte repeats at a large distance must be coded as literals.
        let mut data = vec![0u8; 8];
        data.extend_from_slice(b"Qz");
        let mut state = 1u32;
        for _ in 0..0x1000 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            data.push(b'a' + (state >> 16) as u8 % 26);
        }
        data.extend_from_slice(b"Qz");
        for m in [Method::Nrv2b8, Method::Nrv2d8, Method::Nrv2e8] {
            let c = nrv(m);
            let (packed, result) = c.compress(&data, 10, &CompressConfig::default(), None).unwrap();
            assert_eq!(c.decompress(&packed, data.len(), &result).unwrap(), data);
        }
    }

    #[test]
    fn empty_input_is_just_the_end_marker() {
        let c = nrv(Method::Nrv2e8);
        let (packed, result) = c.compress(&[], 5, &CompressConfig::default(), None).unwrap();
        assert!(!packed.is_empty());
        assert!(c.decompress(&packed, 0, &result).unwrap().is_empty());
    }

    #[test]
    fn stops_at_end_marker() {
        let c = nrv(Method::Nrv2dLe16);
        let data = text(1000);
        let (mut packed, result) = c.compress(&data, 7, &CompressConfig::default(), None).unwrap();
        packed.push(0x55);
        assert_eq!(c.decompress(&packed, data.len(), &result), Err(CodecError::InputNotConsumed));

        let mut io = LinearBuffer::new(&packed, data.len()).unwrap();
        c.decode(&mut io, &result).unwrap();
        assert_eq!(io.input_remaining(), 1);
    }

    #[test]
    fn offset_before_start_is_lookbehind_overrun() {
        // match flag, gamma 3, offset byte 0x05, length bits "01": a copy
        // from distance 6 with no output yet
        let c = nrv(Method::Nrv2b8);
        let stream = [0b0110_1000, 0x05];
        assert_eq!(
            c.decompress(&stream, 64, &CompressResult::None),
            Err(CodecError::LookbehindOverrun)
        );
    }

    #[test]
    fn progress_is_reported() {
        let c = nrv(Method::Nrv2eLe32);
        let data = text(200_000);
        let mut calls = Vec::new();
        let mut cb = |i: u64, o: u64| calls.push((i, o));
        c.compress(&data, 3, &CompressConfig::default(), Some(&mut cb)).unwrap();
        assert!(calls.len() >= 3);
        assert_eq!(calls.last().unwrap().0, data.len() as u64);
        assert!(calls.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn self_check_passes_for_all_nrv_methods() {
        for m in Method::ALL.iter().copied().filter(|m| m.is_nrv()) {
            nrv(m).self_check().unwrap();
        }
    }
}
