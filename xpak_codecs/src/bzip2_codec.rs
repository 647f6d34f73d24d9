use bzip2::{Action, Compress, Compression, Decompress, Status};
use xpak_core::{Codec, CodecError, CompressConfig, CompressResult, DecodeBuffer, Method, Progress};

use crate::stream::{drive, Step, StreamDecoder};

/// libbzip2's default work factor.
const WORK_FACTOR: u32 = 30;

#[derive(Debug, Clone, Copy, Default)]
pub struct Bzip2Codec;

struct Bzip2Step {
    inner: Decompress,
}

impl StreamDecoder for Bzip2Step {
    fn step(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step, CodecError> {
        let (in0, out0) = (self.inner.total_in(), self.inner.total_out());
        let status = self
            .inner
            .decompress(input, output)
            .map_err(|_| CodecError::Error)?;
        Ok(Step {
            consumed: (self.inner.total_in() - in0) as usize,
            produced: (self.inner.total_out() - out0) as usize,
            finished: matches!(status, Status::StreamEnd),
        })
    }
}

impl Codec for Bzip2Codec {
    fn method(&self) -> Method {
        Method::Bzip2
    }

    fn compress(
        &self,
        src: &[u8],
        level: u32,
        config: &CompressConfig,
        mut progress: Option<&mut dyn Progress>,
    ) -> Result<(Vec<u8>, CompressResult), CodecError> {
        let params = config.resolve_bzip2(level, src.len())?;
        let mut enc = Compress::new(Compression::new(params.block_size_100k), WORK_FACTOR);
        let mut out = Vec::with_capacity(src.len() / 2 + 64);
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(4096));
            }
            let consumed = enc.total_in() as usize;
            let status = enc
                .compress_vec(&src[consumed..], &mut out, Action::Finish)
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
        drive(&mut Bzip2Step { inner: Decompress::new(false) }, io)
    }

    fn version_string(&self) -> String {
        "libbzip2 (bzip2 0.4)".to_string()
    }

    fn self_check(&self) -> Result<(), CodecError> {
        let sample = b"bzip2 self check ".repeat(64);
        let (packed, result) = self.compress(&sample, 9, &CompressConfig::default(), None)?;
        if self.decompress(&packed, sample.len(), &result)? != sample {
            return Err(CodecError::Error);
        }
        Ok(())
    }
}
