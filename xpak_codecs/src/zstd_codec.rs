use tracing::debug;
use xpak_core::config::{check_level, MAX_LEVEL};
use xpak_core::{Codec, CodecError, CompressConfig, CompressResult, DecodeBuffer, Method, Progress};
use zstd::stream::raw::{Decoder, InBuffer, Operation, OutBuffer};
use zstd::zstd_safe;

use crate::stream::{drive, Step, StreamDecoder};

/// Zstandard frames, one per block.
///
/// Levels 1..=9 map to the same zstd level; level 10 maps to zstd's maximum.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

fn zstd_level(level: u32) -> i32 {
    if level >= MAX_LEVEL {
        zstd_safe::max_c_level()
    } else {
        level as i32
    }
}

struct ZstdStep {
    inner: Decoder<'static>,
}

impl StreamDecoder for ZstdStep {
    fn step(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step, CodecError> {
        let mut src = InBuffer::around(input);
        let mut dst = OutBuffer::around(output);
        let hint = self.inner.run(&mut src, &mut dst).map_err(|e| {
            debug!(error = %e, "zstd decode failed");
            CodecError::Error
        })?;
        Ok(Step {
            consumed: src.pos(),
            produced: dst.pos(),
            finished: hint == 0,
        })
    }
}

impl Codec for ZstdCodec {
    fn method(&self) -> Method {
        Method::Zstd
    }

    fn compress(
        &self,
        src: &[u8],
        level: u32,
        config: &CompressConfig,
        mut progress: Option<&mut dyn Progress>,
    ) -> Result<(Vec<u8>, CompressResult), CodecError> {
        check_level(level)?;
        config.validate()?;
        let out = zstd::bulk::compress(src, zstd_level(level)).map_err(|e| {
            debug!(error = %e, "zstd compress failed");
            CodecError::Error
        })?;
        if let Some(cb) = progress.as_deref_mut() {
            cb.update(src.len() as u64, out.len() as u64);
        }
        Ok((out, CompressResult::None))
    }

    fn decode(&self, io: &mut dyn DecodeBuffer, _result: &CompressResult) -> Result<(), CodecError> {
        let inner = Decoder::new().map_err(|_| CodecError::OutOfMemory)?;
        drive(&mut ZstdStep { inner }, io)
    }

    fn version_string(&self) -> String {
        zstd_safe::version_string().to_string()
    }

    /// The linked library must be the one the bindings were generated for.
    fn self_check(&self) -> Result<(), CodecError> {
        let built = zstd_safe::VERSION_MAJOR * 10_000 + zstd_safe::VERSION_MINOR * 100 + zstd_safe::VERSION_RELEASE;
        if zstd_safe::version_number() != built {
            debug!(linked = zstd_safe::version_number(), built, "zstd version mismatch");
            return Err(CodecError::Error);
        }
        let sample = b"zstd self check ".repeat(64);
        let (packed, result) = self.compress(&sample, 3, &CompressConfig::default(), None)?;
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
    fn level_mapping() {
        assert_eq!(zstd_level(1), 1);
        assert_eq!(zstd_level(9), 9);
        assert_eq!(zstd_level(10), zstd_safe::max_c_level());
    }
}
