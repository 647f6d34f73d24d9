//! Per-method tuning knobs.
//!
//! Every knob is an `Option<u32>` override. `None` means "derive from the
//! level and input size"; `Some(v)` must lie inside the knob's bounds or the
//! whole call is rejected with [`CodecError::InvalidArgument`] before any
//! compression work starts. Resolution happens only in the `resolve_*`
//! methods below.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CodecError;

/// Highest accepted compression level.
pub const MAX_LEVEL: u32 = 10;

/// Longest match the NRV encoder will emit.
pub const NRV_MATCH_LIMIT: u32 = 2048;

/// Largest match distance an NRV stream can encode.
pub const NRV_OFFSET_LIMIT: u32 = 0x00ff_ffff;

/// Probability slots the LZMA decoder needs for the given literal bits.
pub fn lzma_num_probs(lit_context_bits: u32, lit_pos_bits: u32) -> u32 {
    1846 + (768 << (lit_context_bits + lit_pos_bits))
}

/// A bounded integer parameter.
#[derive(Debug, Clone, Copy)]
pub struct Knob {
    pub name: &'static str,
    pub min: u32,
    pub max: u32,
}

impl Knob {
    const fn new(name: &'static str, min: u32, max: u32) -> Self {
        Self { name, min, max }
    }

    pub fn check(&self, value: Option<u32>) -> Result<(), CodecError> {
        match value {
            Some(v) if v < self.min || v > self.max => {
                debug!(knob = self.name, value = v, min = self.min, max = self.max, "override out of range");
                Err(CodecError::InvalidArgument)
            }
            _ => Ok(()),
        }
    }

    /// The override if present, else `default` clamped into bounds.
    pub fn resolve(&self, value: Option<u32>, default: u32) -> Result<u32, CodecError> {
        self.check(value)?;
        Ok(value.unwrap_or_else(|| default.clamp(self.min, self.max)))
    }
}

// ── Knob tables ───────────────────────────────────────────────────────────

pub const NRV_MAX_OFFSET: Knob = Knob::new("nrv.max_offset", 1, NRV_OFFSET_LIMIT);
pub const NRV_MAX_MATCH: Knob = Knob::new("nrv.max_match", 16, NRV_MATCH_LIMIT);
pub const NRV_HASH_BITS: Knob = Knob::new("nrv.hash_bits", 10, 22);
pub const NRV_MAX_CHAIN: Knob = Knob::new("nrv.max_chain", 1, 65536);

pub const LZMA_POS_BITS: Knob = Knob::new("lzma.pos_bits", 0, 4);
pub const LZMA_LIT_POS_BITS: Knob = Knob::new("lzma.lit_pos_bits", 0, 4);
pub const LZMA_LIT_CONTEXT_BITS: Knob = Knob::new("lzma.lit_context_bits", 0, 8);
pub const LZMA_DICT_SIZE: Knob = Knob::new("lzma.dict_size", 1, 1 << 30);
pub const LZMA_FAST_BYTES: Knob = Knob::new("lzma.fast_bytes", 5, 273);
pub const LZMA_MAX_NUM_PROBS: Knob = Knob::new("lzma.max_num_probs", 1846 + 768, u32::MAX);

pub const BZIP2_BLOCK_SIZE: Knob = Knob::new("bzip2.block_size_100k", 1, 9);

// ── Overrides ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NrvConfig {
    pub max_offset: Option<u32>,
    pub max_match: Option<u32>,
    pub hash_bits: Option<u32>,
    /// Hash-chain candidates examined per position.
    pub max_chain: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LzmaConfig {
    pub pos_bits: Option<u32>,
    pub lit_pos_bits: Option<u32>,
    pub lit_context_bits: Option<u32>,
    pub dict_size: Option<u32>,
    pub fast_bytes: Option<u32>,
    /// Ceiling on the decoder's probability table; lc/lp shrink to fit.
    pub max_num_probs: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Bzip2Config {
    pub block_size_100k: Option<u32>,
}

/// Overrides for every method, carried through the packer unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressConfig {
    pub nrv: NrvConfig,
    pub lzma: LzmaConfig,
    pub bzip2: Bzip2Config,
}

// ── Resolved parameters ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NrvParams {
    pub max_offset: usize,
    pub max_match: usize,
    pub hash_bits: u32,
    pub max_chain: usize,
    /// One-step lazy evaluation before committing to a match.
    pub lazy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaParams {
    pub pos_bits: u32,
    pub lit_pos_bits: u32,
    pub lit_context_bits: u32,
    pub dict_size: u32,
    pub fast_bytes: u32,
    pub num_probs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bzip2Params {
    pub block_size_100k: u32,
}

pub fn check_level(level: u32) -> Result<(), CodecError> {
    if level == 0 || level > MAX_LEVEL {
        return Err(CodecError::InvalidArgument);
    }
    Ok(())
}

impl CompressConfig {
    /// Reject any out-of-range override without resolving anything.
    pub fn validate(&self) -> Result<(), CodecError> {
        NRV_MAX_OFFSET.check(self.nrv.max_offset)?;
        NRV_MAX_MATCH.check(self.nrv.max_match)?;
        NRV_HASH_BITS.check(self.nrv.hash_bits)?;
        NRV_MAX_CHAIN.check(self.nrv.max_chain)?;
        LZMA_POS_BITS.check(self.lzma.pos_bits)?;
        LZMA_LIT_POS_BITS.check(self.lzma.lit_pos_bits)?;
        LZMA_LIT_CONTEXT_BITS.check(self.lzma.lit_context_bits)?;
        LZMA_DICT_SIZE.check(self.lzma.dict_size)?;
        LZMA_FAST_BYTES.check(self.lzma.fast_bytes)?;
        LZMA_MAX_NUM_PROBS.check(self.lzma.max_num_probs)?;
        BZIP2_BLOCK_SIZE.check(self.bzip2.block_size_100k)?;
        Ok(())
    }

    pub fn resolve_nrv(&self, level: u32, src_len: usize) -> Result<NrvParams, CodecError> {
        check_level(level)?;
        self.validate()?;
        let c = &self.nrv;

        let default_offset = match level {
            1..=3 => 8 * 1024 - 1,
            4 => 32 * 1024 - 1,
            5 | 6 => 1024 * 1024 - 1,
            7 | 8 => 2 * 1024 * 1024 - 1,
            _ => 4 * 1024 * 1024 - 1,
        };
        let default_chain = [4, 8, 16, 32, 64, 128, 256, 512, 2048, 4096][level as usize - 1];
        let default_hash_bits = if level <= 3 { 14 } else { 16 };

        let max_offset = NRV_MAX_OFFSET.resolve(c.max_offset, default_offset)? as usize;
        Ok(NrvParams {
            max_offset: max_offset.min(src_len.max(1)),
            max_match: NRV_MAX_MATCH.resolve(c.max_match, NRV_MATCH_LIMIT)? as usize,
            hash_bits: NRV_HASH_BITS.resolve(c.hash_bits, default_hash_bits)?,
            max_chain: NRV_MAX_CHAIN.resolve(c.max_chain, default_chain)? as usize,
            lazy: level >= 5,
        })
    }

    pub fn resolve_lzma(&self, level: u32, src_len: usize) -> Result<LzmaParams, CodecError> {
        check_level(level)?;
        self.validate()?;
        let c = &self.lzma;

        let pos_bits = LZMA_POS_BITS.resolve(c.pos_bits, 2)?;
        let mut lit_pos_bits = LZMA_LIT_POS_BITS.resolve(c.lit_pos_bits, 0)?;
        let mut lit_context_bits = LZMA_LIT_CONTEXT_BITS.resolve(c.lit_context_bits, 3)?;

        // The raw LZMA1 encoder accepts at most four literal bits in total.
        if lit_context_bits + lit_pos_bits > 4 {
            let clamped = 4u32.saturating_sub(lit_pos_bits);
            debug!(lc = lit_context_bits, lp = lit_pos_bits, clamped, "clamping lzma literal context bits");
            lit_context_bits = clamped;
        }

        if let Some(ceiling) = c.max_num_probs {
            while lzma_num_probs(lit_context_bits, lit_pos_bits) > ceiling {
                if lit_pos_bits > lit_context_bits {
                    lit_pos_bits -= 1;
                } else if lit_context_bits > 0 {
                    lit_context_bits -= 1;
                } else {
                    break;
                }
            }
            if lzma_num_probs(lit_context_bits, lit_pos_bits) > ceiling {
                return Err(CodecError::Error);
            }
        }

        let default_dict = 1u32 << (16 + level.min(10));
        let src_cap = u32::try_from(src_len.max(1)).unwrap_or(u32::MAX);
        let dict_size = LZMA_DICT_SIZE.resolve(c.dict_size, default_dict)?.min(src_cap);
        let default_fast = if level >= 8 { 273 } else { 64 };
        let fast_bytes = LZMA_FAST_BYTES.resolve(c.fast_bytes, default_fast)?;

        Ok(LzmaParams {
            pos_bits,
            lit_pos_bits,
            lit_context_bits,
            dict_size,
            fast_bytes,
            num_probs: lzma_num_probs(lit_context_bits, lit_pos_bits),
        })
    }

    pub fn resolve_bzip2(&self, level: u32, src_len: usize) -> Result<Bzip2Params, CodecError> {
        check_level(level)?;
        self.validate()?;
        let mut default = src_len.div_ceil(100_000).clamp(1, 9) as u32;
        if level <= 3 {
            default = default.min(level);
        }
        Ok(Bzip2Params {
            block_size_100k: BZIP2_BLOCK_SIZE.resolve(self.bzip2.block_size_100k, default)?,
        })
    }
}
