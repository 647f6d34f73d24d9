//! Compression back ends for xpak.
//!
//! Nine NRV variants are implemented natively; LZMA, DEFLATE, bzip2 and
//! zstd wrap their reference libraries. Everything is reached through
//! [`codec_by_method`] or the free functions below, which run the one-time
//! [`init`] check first.

mod bzip2_codec;
mod deflate_codec;
mod lzma_codec;
mod nrv;
mod stream;
mod zstd_codec;

pub use bzip2_codec::Bzip2Codec;
pub use deflate_codec::DeflateCodec;
pub use lzma_codec::LzmaCodec;
pub use nrv::NrvCodec;
pub use zstd_codec::ZstdCodec;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, error};
use xpak_core::{Codec, CodecError, CompressConfig, CompressResult, Method, Progress};

static INIT: OnceCell<Result<(), CodecError>> = OnceCell::new();

/// Resolve the codec for a method id stored in a block header.
pub fn codec_by_method(method: Method) -> Result<Arc<dyn Codec>, CodecError> {
    match method {
        Method::Lzma => Ok(Arc::new(LzmaCodec)),
        Method::Deflate => Ok(Arc::new(DeflateCodec)),
        Method::Zstd => Ok(Arc::new(ZstdCodec)),
        Method::Bzip2 => Ok(Arc::new(Bzip2Codec)),
        nrv => match NrvCodec::new(nrv) {
            Some(c) => Ok(Arc::new(c)),
            None => Err(CodecError::UnsupportedMethod { method: nrv }),
        },
    }
}

/// Run every back end's self check once per process.
///
/// Later calls return the first outcome without re-running anything.
pub fn init() -> Result<(), CodecError> {
    *INIT.get_or_init(|| {
        for method in Method::ALL {
            let codec = codec_by_method(method)?;
            if let Err(e) = codec.self_check() {
                error!(method = %method, error = %e, "codec self check failed");
                return Err(e);
            }
            debug!(method = %method, version = %codec.version_string(), "codec ready");
        }
        Ok(())
    })
}

pub fn version_string(method: Method) -> Result<String, CodecError> {
    Ok(codec_by_method(method)?.version_string())
}

pub fn compress(
    method: Method,
    src: &[u8],
    level: u32,
    config: &CompressConfig,
    progress: Option<&mut dyn Progress>,
) -> Result<(Vec<u8>, CompressResult), CodecError> {
    init()?;
    codec_by_method(method)?.compress(src, level, config, progress)
}

pub fn decompress(
    method: Method,
    src: &[u8],
    capacity: usize,
    result: &CompressResult,
) -> Result<Vec<u8>, CodecError> {
    init()?;
    codec_by_method(method)?.decompress(src, capacity, result)
}

/// In-place decode check; see [`xpak_core::overlap::test_overlap`].
pub fn test_overlap(
    method: Method,
    compressed: &[u8],
    truth: Option<&[u8]>,
    src_offset: usize,
    dst_len: usize,
    result: &CompressResult,
) -> Result<usize, CodecError> {
    init()?;
    let codec = codec_by_method(method)?;
    xpak_core::overlap::test_overlap(codec.as_ref(), compressed, truth, src_offset, dst_len, result)
}
