use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tracing::debug;
use xpak_core::config::check_level;
use xpak_core::{Codec, CodecError, CompressConfig, CompressResult, DecodeBuffer, Method, Progress};

use crate::stream::{drive, Step, StreamDecoder};

/// Raw DEFLATE (no zlib or gzip wrapper).
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateCodec;

struct DeflateStep {
    inner: Decompress,
}

impl StreamDecoder for DeflateStep {
    fn step(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step, CodecError> {
        let (in0, out0) = (self.inner.total_in(), self.inner.total_out());
        let status = self
            .inner
            .decompress(input, output, FlushDecompress::None)
            .map_err(|e| {
                debug!(error = %e, "inflate failed");
                CodecError::Error
            })?;
        Ok(Step {
            consumed: (self.inner.total_in() - in0) as usize,
            produced: (self.inner.total_out() - out0) as usize,
            finished: matches!(status, Status::StreamEnd),
        })
    }
}

impl Codec for DeflateCodec {
    fn method(&self) -> Method {
        Method::Deflate
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
        let mut enc = Compress::new(Compression::new(level.min(9)), false);
        let mut out = Vec::with_capacity(src.len() / 2 + 64);
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(4096));
            }
            let consumed = enc.total_in() as usize;
            let status = enc
                .compress_vec(&src[consumed..], &mut out, FlushCompress::Finish)
                .map_err(|_| CodecError::Error)?;
            if let Some(cb) = progress.as_deref_mut() {
                cb.update(enc.total_in(), out.len() as u64);
            }
            if matches!(status, Status::StreamEnd) {
                break;
            }
        }
        Ok((out, CompressResult::None))
    }

    fn decode(&self, io: &mut dyn DecodeBuffer, _result: &CompressResult) -> Result<(), CodecError> {
        drive(&mut DeflateStep { inner: Decompress::new(false) }, io)
    }

    fn version_string(&self) -> String {
        "flate2 raw deflate".to_string()
    }

    fn self_check(&self) -> Result<(), CodecError> {
        let sample = b"deflate self check ".repeat(64);
        let (packed, result) = self.compress(&sample, 6, &CompressConfig::default(), None)?;
        if self.decompress(&packed, sample.len(), &result)? != sample {
            return Err(CodecError::Error);
        }
        Ok(())
    }
}
