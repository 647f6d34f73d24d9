//! Raw LZMA1 through liblzma.
//!
//! Each payload starts with two property bytes,
//! `[(lc + lp) << 3 | pb, lp << 4 | lc]`, followed by a raw LZMA1 stream
//! terminated by an end-of-payload marker.

use tracing::{debug, warn};
use xpak_core::config::{lzma_num_probs, LzmaParams};
use xpak_core::{Codec, CodecError, CompressConfig, CompressResult, DecodeBuffer, LzmaResult, Method, Progress};
use liblzma::stream::{Action, Filters, LzmaOptions, Status, Stream};

use crate::stream::{drive, Step, StreamDecoder};

/// Smallest dictionary liblzma accepts.
const MIN_DICT_SIZE: u32 = 4096;

#[derive(Debug, Clone, Copy, Default)]
pub struct LzmaCodec;

fn map_err(e: liblzma::stream::Error) -> CodecError {
    match e {
        liblzma::stream::Error::Mem | liblzma::stream::Error::MemLimit => CodecError::OutOfMemory,
        other => {
            debug!(error = %other, "liblzma error");
            CodecError::Error
        }
    }
}

fn filters(p: &LzmaParams, preset: u32) -> Result<Filters, CodecError> {
    let mut opts = LzmaOptions::new_preset(preset).map_err(map_err)?;
    opts.dict_size(p.dict_size)
        .literal_context_bits(p.lit_context_bits)
        .literal_position_bits(p.lit_pos_bits)
        .position_bits(p.pos_bits)
        .nice_len(p.fast_bytes);
    let mut filters = Filters::new();
    filters.lzma1(&opts);
    Ok(filters)
}

pub(crate) fn properties(p: &LzmaParams) -> [u8; 2] {
    [
        (((p.lit_context_bits + p.lit_pos_bits) << 3) | p.pos_bits) as u8,
        ((p.lit_pos_bits << 4) | p.lit_context_bits) as u8,
    ]
}

/// Parse the two property bytes back into `(pb, lp, lc)`.
pub(crate) fn parse_properties(b: [u8; 2]) -> Result<(u32, u32, u32), CodecError> {
    let pb = (b[0] & 7) as u32;
    let lp = (b[1] >> 4) as u32;
    let lc = (b[1] & 0xf) as u32;
    if (b[0] >> 3) as u32 != lc + lp || pb > 4 || lp > 4 || lc > 8 {
        return Err(CodecError::Error);
    }
    Ok((pb, lp, lc))
}

struct LzmaStep {
    stream: Stream,
}

impl StreamDecoder for LzmaStep {
    fn step(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step, CodecError> {
        let (in0, out0) = (self.stream.total_in(), self.stream.total_out());
        let status = self.stream.process(input, output, Action::Run).map_err(map_err)?;
        Ok(Step {
            consumed: (self.stream.total_in() - in0) as usize,
            produced: (self.stream.total_out() - out0) as usize,
            finished: matches!(status, Status::StreamEnd),
        })
    }
}

impl Codec for LzmaCodec {
    fn method(&self) -> Method {
        Method::Lzma
    }

    fn compress(
        &self,
        src: &[u8],
        level: u32,
        config: &CompressConfig,
        mut progress: Option<&mut dyn Progress>,
    ) -> Result<(Vec<u8>, CompressResult), CodecError> {
        let mut p = config.resolve_lzma(level, src.len())?;
        p.dict_size = p.dict_size.max(MIN_DICT_SIZE);
        let mut stream = Stream::new_raw_encoder(&filters(&p, level.min(9))?).map_err(map_err)?;

        let mut out = Vec::with_capacity(src.len() / 2 + 64);
        // Every payload carries its own property bytes so blocks decode independently.
        out.extend_from_slice(&properties(&p));
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(4096));
            }
            let consumed = stream.total_in() as usize;
            let status = stream.process_vec(&src[consumed..], &mut out, Action::Finish).map_err(map_err)?;
            if let Some(cb) = progress.as_deref_mut() {
                cb.update(stream.total_in(), out.len() as u64);
            }
            if matches!(status, Status::StreamEnd) {
                break;
            }
        }

        Ok((
            out,
            CompressResult::Lzma(LzmaResult {
                pos_bits: p.pos_bits,
                lit_pos_bits: p.lit_pos_bits,
                lit_context_bits: p.lit_context_bits,
                dict_size: p.dict_size,
                num_probs: p.num_probs,
            }),
        ))
    }

    fn decode(&self, io: &mut dyn DecodeBuffer, result: &CompressResult) -> Result<(), CodecError> {
        let (pb, lp, lc) = parse_properties([io.read_byte()?, io.read_byte()?])?;
        let dict_size = match result {
            CompressResult::Lzma(r) => r.dict_size,
            _ => u32::try_from(io.output_room()).unwrap_or(u32::MAX),
        }
        .max(MIN_DICT_SIZE);
        if let CompressResult::Lzma(r) = result {
            if (r.pos_bits, r.lit_pos_bits, r.lit_context_bits) != (pb, lp, lc) {
                warn!("lzma properties differ from the encoder's result");
                return Err(CodecError::Error);
            }
        }

        let params = LzmaParams {
            pos_bits: pb,
            lit_pos_bits: lp,
            lit_context_bits: lc,
            dict_size,
            fast_bytes: 273,
            num_probs: lzma_num_probs(lc, lp),
        };
        let stream = Stream::new_raw_decoder(&filters(&params, 6)?).map_err(map_err)?;
        drive(&mut LzmaStep { stream }, io)
    }

    fn version_string(&self) -> String {
        "liblzma (liblzma-rs 0.3)".to_string()
    }

    fn self_check(&self) -> Result<(), CodecError> {
        let sample: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8 ^ (i >> 7) as u8).collect();
        let (packed, result) = self.compress(&sample, 5, &CompressConfig::default(), None)?;
        if self.decompress(&packed, sample.len(), &result)? != sample {
            return Err(CodecError::Error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_bytes() {
        let p = LzmaParams {
            pos_bits: 2,
            lit_pos_bits: 0,
            lit_context_bits: 3,
            dict_size: 1 << 16,
            fast_bytes: 64,
            num_probs: lzma_num_probs(3, 0),
        };
        let b = properties(&p);
        assert_eq!(b, [0x1a, 0x03]);
        assert_eq!(parse_properties(b).unwrap(), (2, 0, 3));
        assert_eq!(parse_properties([0x22, 0x03]), Err(CodecError::Error));
    }

    #[test]
    fn decodes_without_encoder_result() {
        let data: Vec<u8> = b"lzma block ".iter().cycle().take(50_000).copied().collect();
        let (packed, result) = LzmaCodec.compress(&data, 7, &CompressConfig::default(), None).unwrap();
        assert!(matches!(result, CompressResult::Lzma(_)));
        assert!(packed.len() < 2000);
        assert_eq!(LzmaCodec.decompress(&packed, data.len(), &CompressResult::None).unwrap(), data);
    }

    #[test]
    fn custom_literal_bits_round_trip() {
        let mut cfg = CompressConfig::default();
        cfg.lzma.lit_context_bits = Some(1);
        cfg.lzma.lit_pos_bits = Some(2);
        cfg.lzma.pos_bits = Some(0);
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 13) as u8).collect();
        let (packed, result) = LzmaCodec.compress(&data, 3, &cfg, None).unwrap();
        assert_eq!(&packed[..2], &[(3 << 3) as u8, 0x21]);
        assert_eq!(LzmaCodec.decompress(&packed, data.len(), &result).unwrap(), data);
    }
}
