use thiserror::Error;

use crate::method::Method;

/// Backend-agnostic codec outcome.
///
/// Every backend translates its native failure codes into one of these
/// variants; nothing backend-specific crosses the codec boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("codec error")]
    Error,
    #[error("out of memory")]
    OutOfMemory,
    #[error("data is not compressible")]
    NotCompressible,
    #[error("compressed input ended before the stream was complete")]
    InputOverrun,
    #[error("destination buffer is too small")]
    OutputOverrun,
    #[error("match refers to data before the start of the output")]
    LookbehindOverrun,
    #[error("end-of-stream marker not found")]
    EofNotFound,
    #[error("trailing bytes after a complete stream")]
    InputNotConsumed,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("no codec is registered for method {method}")]
    UnsupportedMethod { method: Method },
    /// In-place decoding wrote over compressed bytes it had not read yet.
    #[error("in-place output overran unread compressed input")]
    OverlapOverrun,
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("filter 0x{id:02x} violated its own invariant: {reason}")]
    FilterViolation { id: u8, reason: &'static str },
}

/// Errors raised by the block stream packer and unpacker.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Well-formed reads that decode to the wrong shape.
    #[error("corrupted stream: {0}")]
    Corrupted(String),

    #[error("block uses method {found}, but the stream codec is {expected:?}")]
    MethodMismatch { expected: Method, found: u8 },

    /// A self-check inside the packer failed; this is a bug, not bad input.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Collapse the error into the flat codec taxonomy where one exists.
    pub fn codec_error(&self) -> Option<CodecError> {
        match self {
            StreamError::Codec(e) => Some(*e),
            _ => None,
        }
    }
}
