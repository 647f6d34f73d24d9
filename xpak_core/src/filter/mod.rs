//! Reversible pre-compression transforms.
//!
//! A [`Filter`] is created per block (or per candidate trial), applied in
//! place with [`Filter::filter`], and undone with [`Filter::unfilter`]. The
//! adler32 of the buffer is recorded before filtering so that a verifying
//! unfilter proves the pair is a true inverse.

mod calltrick;
mod cto;
mod delta;

use once_cell::sync::Lazy;
use tracing::trace;

use crate::checksum::adler32;
use crate::error::CodecError;
use calltrick::{CallTrick, Opcode, Swap};
use delta::Delta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Filter,
    Unfilter,
    Scan,
}

/// Result of one filter or scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Buffer length outside the filter's bounds, or the filter cannot run
    /// on this content. The buffer is unchanged.
    NotApplicable,
    /// Ran, but found nothing to transform; prefer the identity filter.
    NoMatches,
    Transformed,
}

/// Statistics written by the last run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub calls: u32,
    pub noncalls: u32,
    pub wrongcalls: u32,
    pub firstcall: u32,
    pub lastcall: u32,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Identity,
    CallTrick(CallTrick),
    Cto(Opcode, Swap),
    Delta(Delta),
}

#[derive(Debug, Clone, Copy)]
struct FilterEntry {
    id: u8,
    min_len: usize,
    /// Exclusive upper bound; 0 means unbounded.
    max_len: usize,
    kind: Kind,
}

impl FilterEntry {
    fn accepts(&self, len: usize) -> bool {
        len >= self.min_len && (self.max_len == 0 || len < self.max_len)
    }
}

fn entries() -> Vec<FilterEntry> {
    let opcodes = [Opcode::E8, Opcode::E9, Opcode::E8E9];
    let swaps = [Swap::None, Swap::LeToBe, Swap::BeToLe];
    let mut v = vec![FilterEntry { id: 0x00, min_len: 0, max_len: 0, kind: Kind::Identity }];

    for (base, width, min_len) in [(0x01u8, 2usize, 4usize), (0x11, 4, 6)] {
        for (si, &swap) in swaps.iter().enumerate() {
            for (oi, &opcode) in opcodes.iter().enumerate() {
                v.push(FilterEntry {
                    id: base + (si * 3 + oi) as u8,
                    min_len,
                    max_len: 0,
                    kind: Kind::CallTrick(CallTrick { width, opcode, swap }),
                });
            }
        }
    }
    for (si, &swap) in swaps.iter().enumerate() {
        for (oi, &opcode) in opcodes.iter().enumerate() {
            v.push(FilterEntry {
                id: 0x21 + (si * 3 + oi) as u8,
                min_len: 6,
                max_len: 0x00ff_ffff,
                kind: Kind::Cto(opcode, swap),
            });
        }
    }
    for (base, width) in [(0x80u8, 1usize), (0x90, 2), (0xa0, 4)] {
        for lanes in 1..=4usize {
            let d = Delta { width, lanes };
            v.push(FilterEntry { id: base + lanes as u8 - 1, min_len: d.min_len(), max_len: 0, kind: Kind::Delta(d) });
        }
    }
    v
}

/// Dense id → entry table, built once on first use.
static FILTER_TABLE: Lazy<[Option<FilterEntry>; 256]> = Lazy::new(|| {
    let mut table = [None; 256];
    for e in entries() {
        table[e.id as usize] = Some(e);
    }
    table
});

fn lookup(id: u8) -> Option<FilterEntry> {
    FILTER_TABLE[id as usize]
}

/// Every id the engine implements, ascending.
pub fn known_filters() -> Vec<u8> {
    (0..=255u8).filter(|&id| lookup(id).is_some()).collect()
}

pub fn is_known_filter(id: u8) -> bool {
    lookup(id).is_some()
}

/// One filter invocation: identity, parameters, and what the last run saw.
#[derive(Debug, Clone)]
pub struct Filter {
    pub id: u8,
    /// Base address added to rewritten call targets.
    pub addvalue: u32,
    /// Marker byte chosen by (or handed to) the cto filters.
    pub cto: u8,
    /// Marker bytes to try first, in order.
    pub preferred_ctos: Vec<u8>,
    /// adler32 of the buffer before filtering.
    pub adler: u32,
    /// Compression level; at level 1 the checksum is skipped.
    pub level: u32,
    pub stats: FilterStats,
}

impl Filter {
    pub fn new(id: u8, addvalue: u32) -> Self {
        Self {
            id,
            addvalue,
            cto: 0,
            preferred_ctos: Vec::new(),
            adler: 0,
            level: 0,
            stats: FilterStats::default(),
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_cto(mut self, cto: u8) -> Self {
        self.cto = cto;
        self
    }

    pub fn with_preferred_ctos(mut self, ctos: &[u8]) -> Self {
        self.preferred_ctos = ctos.to_vec();
        self
    }

    fn entry(&self) -> Result<FilterEntry, CodecError> {
        lookup(self.id).ok_or(CodecError::InvalidArgument)
    }

    fn outcome(&self) -> FilterOutcome {
        if self.id != 0 && self.stats.calls == 0 {
            FilterOutcome::NoMatches
        } else {
            FilterOutcome::Transformed
        }
    }

    fn apply(&mut self, entry: FilterEntry, buf: &mut [u8], dir: Direction) -> Result<FilterOutcome, CodecError> {
        match entry.kind {
            Kind::Identity => {}
            Kind::CallTrick(ct) => ct.run(buf, self.addvalue, dir, &mut self.stats),
            Kind::Delta(d) => d.run(buf, dir, &mut self.stats),
            Kind::Cto(opcode, swap) if dir == Direction::Unfilter => {
                cto::unfilter(buf, opcode, swap, self.addvalue, self.cto, &mut self.stats)
            }
            Kind::Cto(opcode, swap) => {
                match cto::filter(buf, opcode, swap, self.addvalue, &self.preferred_ctos, dir, &mut self.stats) {
                    Ok(cto8) => self.cto = cto8,
                    Err(cto::CtoError::NotApplicable) => return Ok(FilterOutcome::NotApplicable),
                    Err(cto::CtoError::BufferNotRestored) => {
                        return Err(CodecError::FilterViolation { id: self.id, reason: "buffer not restored" })
                    }
                }
            }
        }
        Ok(self.outcome())
    }

    /// Transform `buf` in place.
    pub fn filter(&mut self, buf: &mut [u8]) -> Result<FilterOutcome, CodecError> {
        let entry = self.entry()?;
        self.stats = FilterStats::default();
        if !entry.accepts(buf.len()) {
            return Ok(FilterOutcome::NotApplicable);
        }
        if self.level != 1 {
            self.adler = adler32(buf);
        }
        let outcome = self.apply(entry, buf, Direction::Filter)?;
        trace!(id = self.id, len = buf.len(), calls = self.stats.calls, ?outcome, "filter");
        Ok(outcome)
    }

    /// Undo [`Filter::filter`] in place. With `verify`, the restored buffer
    /// must hash to the adler32 recorded before filtering.
    pub fn unfilter(&mut self, buf: &mut [u8], verify: bool) -> Result<FilterOutcome, CodecError> {
        let entry = self.entry()?;
        self.stats = FilterStats::default();
        if !entry.accepts(buf.len()) {
            return Ok(FilterOutcome::NotApplicable);
        }
        let outcome = self.apply(entry, buf, Direction::Unfilter)?;
        if verify && self.level != 1 && self.id != 0 && adler32(buf) != self.adler {
            return Err(CodecError::FilterViolation { id: self.id, reason: "checksum differs after unfilter" });
        }
        Ok(outcome)
    }

    /// Dry run: report whether the filter would apply, leaving `buf` as is.
    pub fn scan(&mut self, buf: &[u8]) -> Result<FilterOutcome, CodecError> {
        let entry = self.entry()?;
        self.stats = FilterStats::default();
        if !entry.accepts(buf.len()) {
            return Ok(FilterOutcome::NotApplicable);
        }
        if matches!(entry.kind, Kind::Identity) {
            return Ok(FilterOutcome::Transformed);
        }
        let mut scratch = buf.to_vec();
        self.apply(entry, &mut scratch, Direction::Scan)
    }

    /// `(filter_len, cto)` for the decompression stub, from the last run.
    pub fn stub_constants(&self) -> (u32, u8) {
        match lookup(self.id).map(|e| e.kind) {
            None | Some(Kind::Identity) => (0, 0),
            Some(_) if (self.id & 0x0f) % 3 == 0 => (self.stats.calls, self.cto),
            Some(_) => (self.stats.lastcall.saturating_sub(self.stats.calls * 4), self.cto),
        }
    }
}
