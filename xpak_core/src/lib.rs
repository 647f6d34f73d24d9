pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod format;
pub mod method;
pub mod overlap;
pub mod packer;
pub mod unpacker;

pub use codec::{Codec, CompressResult, DecodeBuffer, LinearBuffer, LzmaResult, NrvResult, Progress};
pub use config::CompressConfig;
pub use error::{CodecError, StreamError};
pub use filter::{Filter, FilterOutcome, FilterStats};
pub use format::{BlockHeader, ByteOrder, BLOCK_HEADER_SIZE, TERMINAL_MAGIC};
pub use method::Method;
pub use overlap::{test_overlap, OverlapArena, OVERLAP_OVERHEAD};
pub use packer::{PackOptions, PackSummary, Packer};
pub use unpacker::{StreamTotals, UnpackOptions, Unpacker};
