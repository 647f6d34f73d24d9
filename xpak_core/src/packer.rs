use std::io::{self, Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::checksum::{adler32, adler32_update, ADLER32_INIT};
use crate::codec::{Codec, CompressResult, Progress};
use crate::config::{check_level, CompressConfig};
use crate::error::{CodecError, StreamError};
use crate::filter::{is_known_filter, Filter, FilterOutcome, FilterStats};
use crate::format::{BlockHeader, ByteOrder, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};
use crate::method::Method;
use crate::overlap::{src_offset_for, test_overlap, OVERLAP_OVERHEAD};

/// Filter candidates explored for a single-block payload.
pub const DEFAULT_FILTER_CANDIDATES: [u8; 2] = [0x13, 0x23];

/// Whether a compressed size is worth shipping: at least 12.5% and at least
/// 512 bytes smaller than the original.
pub fn check_compression_ratio(c_len: u64, u_len: u64) -> bool {
    let gain = u_len.saturating_sub(c_len);
    c_len < u_len && gain >= u_len / 8 && gain >= 512
}

/// Packing parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackOptions {
    pub method: Method,
    /// 1 (fastest) ..= 10 (smallest).
    pub level: u32,
    /// Raw bytes per block; capped at the payload size.
    pub block_size: usize,
    /// Pin one filter instead of exploring candidates.
    pub filter: Option<u8>,
    pub filter_candidates: Vec<u8>,
    pub addvalue: u32,
    pub preferred_ctos: Vec<u8>,
    pub byte_order: ByteOrder,
    pub overlap_overhead: usize,
    pub config: CompressConfig,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            method: Method::default(),
            level: 8,
            block_size: DEFAULT_BLOCK_SIZE,
            filter: None,
            filter_candidates: DEFAULT_FILTER_CANDIDATES.to_vec(),
            addvalue: 0,
            preferred_ctos: Vec::new(),
            byte_order: ByteOrder::default(),
            overlap_overhead: OVERLAP_OVERHEAD,
            config: CompressConfig::default(),
        }
    }
}

/// Totals of a finished pack run, which the caller stores next to the
/// stream for the unpacker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackSummary {
    pub u_len: u64,
    /// Payload bytes, excluding block headers.
    pub c_len: u64,
    /// Every byte the sink received, headers and end marker included.
    pub bytes_written: u64,
    pub u_adler: u32,
    pub c_adler: u32,
    pub blocks: u32,
    pub literal_blocks: u32,
    /// Blocks that compressed but failed the in-place check.
    pub overlap_rejects: u32,
    pub filter_id: u8,
    pub filter_cto: u8,
    pub filter_len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterStrategy {
    NoFilter,
    UseSpecified(u8),
    TryBest,
}

/// Winner of the candidate trials for one chunk.
struct Candidate {
    compressed: Vec<u8>,
    result: CompressResult,
    filter_id: u8,
    cto: u8,
    stats: FilterStats,
}

/// Output sink that counts bytes and hashes block payloads as they pass.
pub struct CountingWriter<W> {
    inner: W,
    written: u64,
    payload_adler: u32,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0, payload_adler: ADLER32_INIT }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn payload_adler(&self) -> u32 {
        self.payload_adler
    }

    pub fn write_payload(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all(buf)?;
        self.payload_adler = adler32_update(self.payload_adler, buf);
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Block stream packer.
///
/// # Pack contract
/// [`pack`](Packer::pack) reads the whole payload from a seekable source in
/// chunks of `block_size` bytes and writes one block per chunk, then the
/// end-of-stream marker:
/// ```text
/// [HEADER 12][payload c_len] [HEADER 12][payload c_len] ... [END MARKER 12]
/// ```
/// A block is stored compressed only when that is smaller and the
/// compressed form has been proven to decode in place; otherwise it is stored
/// literally (`c_len == u_len`).
pub struct Packer<'a> {
    codec: &'a dyn Codec,
    opts: PackOptions,
}

impl<'a> Packer<'a> {
    pub fn new(codec: &'a dyn Codec, opts: PackOptions) -> Result<Self, StreamError> {
        check_level(opts.level)?;
        opts.config.validate()?;
        if opts.method != codec.method() {
            return Err(StreamError::MethodMismatch { expected: codec.method(), found: opts.method.id() });
        }
        if opts.block_size == 0 || opts.block_size > MAX_BLOCK_SIZE {
            return Err(CodecError::InvalidArgument.into());
        }
        let unknown = opts
            .filter
            .iter()
            .chain(&opts.filter_candidates)
            .any(|&id| !is_known_filter(id));
        if unknown {
            return Err(CodecError::InvalidArgument.into());
        }
        Ok(Self { codec, opts })
    }

    pub fn options(&self) -> &PackOptions {
        &self.opts
    }

    fn strategy(&self, index: u32, single_chunk: bool) -> FilterStrategy {
        match self.opts.filter {
            _ if index > 0 => FilterStrategy::NoFilter,
            Some(id) => FilterStrategy::UseSpecified(id),
            None if single_chunk => FilterStrategy::TryBest,
            None => FilterStrategy::NoFilter,
        }
    }

    fn candidates(&self, strategy: FilterStrategy) -> Vec<u8> {
        match strategy {
            FilterStrategy::NoFilter => vec![0],
            FilterStrategy::UseSpecified(id) => vec![id, 0],
            FilterStrategy::TryBest => {
                let mut ids: Vec<u8> = self.opts.filter_candidates.iter().copied().take(2).collect();
                ids.push(0);
                ids.dedup();
                ids
            }
        }
    }

    /// Filter, compress, self-check and unfilter one candidate. `None` when
    /// the filter does not apply or finds nothing to do.
    fn try_candidate(&self, chunk: &[u8], id: u8) -> Result<Option<Candidate>, StreamError> {
        let level = self.opts.level;
        let mut work = chunk.to_vec();
        let mut filter = Filter::new(id, self.opts.addvalue)
            .with_level(level)
            .with_preferred_ctos(&self.opts.preferred_ctos);

        match filter.filter(&mut work)? {
            FilterOutcome::Transformed => {}
            outcome => {
                trace!(filter = id, ?outcome, "filter skipped");
                return Ok(None);
            }
        }

        let (compressed, result) =
            match self.codec.compress(&work, level, &self.opts.config, None) {
                Ok(r) => r,
                Err(CodecError::NotCompressible) => return Ok(None),
                Err(e) => return Err(e.into()),
            };

        if level > 1 {
            let check = self.codec.decompress(&compressed, work.len(), &result)?;
            if adler32(&check) != adler32(&work) {
                return Err(StreamError::Internal(format!(
                    "{} round trip mismatch on a {}-byte chunk",
                    self.codec.name(),
                    work.len()
                )));
            }
        }

        filter.unfilter(&mut work, true)?;
        trace!(filter = id, u_len = chunk.len(), c_len = compressed.len(), "candidate");
        Ok(Some(Candidate { compressed, result, filter_id: id, cto: filter.cto, stats: filter.stats }))
    }

    fn best_candidate(&self, chunk: &[u8], strategy: FilterStrategy) -> Result<Option<Candidate>, StreamError> {
        let mut best: Option<Candidate> = None;
        for id in self.candidates(strategy) {
            let Some(c) = self.try_candidate(chunk, id)? else {
                continue;
            };
            if best.as_ref().map_or(true, |b| c.compressed.len() < b.compressed.len()) {
                best = Some(c);
            }
            if matches!(strategy, FilterStrategy::UseSpecified(_)) {
                break;
            }
        }
        Ok(best)
    }

    /// In-place check: ground truth only for unfiltered blocks, the filter's
    /// own checksum covers the rest.
    fn verify_overlap(&self, chunk: &[u8], best: &Candidate) -> bool {
        let truth = (best.filter_id == 0).then_some(chunk);
        let src_offset = src_offset_for(chunk.len(), best.compressed.len(), self.opts.overlap_overhead);
        match test_overlap(self.codec, &best.compressed, truth, src_offset, chunk.len(), &best.result) {
            Ok(_) => true,
            Err(e) => {
                warn!(u_len = chunk.len(), c_len = best.compressed.len(), error = %e, "in-place decode failed, storing block literally");
                false
            }
        }
    }

    /// Pack all of `input` into `output`.
    pub fn pack<R, W>(
        &self,
        input: &mut R,
        output: W,
        mut progress: Option<&mut dyn Progress>,
    ) -> Result<PackSummary, StreamError>
    where
        R: Read + Seek,
        W: Write,
    {
        let total = input.seek(SeekFrom::End(0))?;
        input.seek(SeekFrom::Start(0))?;
        let chunk_size = (self.opts.block_size as u64).min(total.max(1)) as usize;
        let single_chunk = total <= chunk_size as u64;
        let order = self.opts.byte_order;

        let mut out = CountingWriter::new(output);
        let mut summary = PackSummary { u_adler: ADLER32_INIT, c_adler: ADLER32_INIT, ..Default::default() };
        let mut chunk = vec![0u8; chunk_size];

        while summary.u_len < total {
            let want = chunk_size.min((total - summary.u_len) as usize);
            let buf = &mut chunk[..want];
            input.read_exact(buf)?;
            let buf = &chunk[..want];

            let strategy = self.strategy(summary.blocks, single_chunk);
            let mut best = self.best_candidate(buf, strategy)?;
            if let Some(b) = &best {
                if b.compressed.len() >= buf.len() {
                    best = None;
                } else if !self.verify_overlap(buf, b) {
                    summary.overlap_rejects += 1;
                    best = None;
                }
            }

            let header;
            let payload: &[u8];
            match &best {
                Some(b) => {
                    header = BlockHeader {
                        u_len: want as u32,
                        c_len: b.compressed.len() as u32,
                        method: self.codec.method().id(),
                        filter: b.filter_id,
                        cto: b.cto,
                        extra: 0,
                    };
                    payload = &b.compressed;
                    if summary.blocks == 0 && b.filter_id != 0 {
                        let mut f = Filter::new(b.filter_id, self.opts.addvalue).with_cto(b.cto);
                        f.stats = b.stats;
                        let (filter_len, cto) = f.stub_constants();
                        summary.filter_id = b.filter_id;
                        summary.filter_cto = cto;
                        summary.filter_len = filter_len;
                    }
                }
                None => {
                    header = BlockHeader {
                        u_len: want as u32,
                        c_len: want as u32,
                        method: self.codec.method().id(),
                        ..Default::default()
                    };
                    payload = buf;
                    summary.literal_blocks += 1;
                }
            }

            out.write_all(&header.to_bytes(order))?;
            out.write_payload(payload)?;
            summary.u_adler = adler32_update(summary.u_adler, buf);
            summary.c_adler = adler32_update(summary.c_adler, payload);
            summary.u_len += want as u64;
            summary.c_len += payload.len() as u64;
            summary.blocks += 1;
            debug!(
                block = summary.blocks - 1,
                u_len = header.u_len,
                c_len = header.c_len,
                filter = header.filter,
                literal = header.is_literal(),
                "block written"
            );
            if let Some(p) = progress.as_deref_mut() {
                p.update(summary.u_len, summary.c_len);
            }
        }

        out.write_all(&BlockHeader::terminal().to_bytes(order))?;
        out.flush()?;
        summary.bytes_written = out.bytes_written();

        self.verify_totals(input, &out, &summary)?;
        info!(
            method = %self.codec.method(),
            u_len = summary.u_len,
            c_len = summary.c_len,
            blocks = summary.blocks,
            "pack finished"
        );
        Ok(summary)
    }

    /// Re-read the input and compare both running checksums with what was
    /// actually consumed and emitted.
    fn verify_totals<R: Read + Seek, W: Write>(
        &self,
        input: &mut R,
        out: &CountingWriter<W>,
        summary: &PackSummary,
    ) -> Result<(), StreamError> {
        input.seek(SeekFrom::Start(0))?;
        let mut adler = ADLER32_INIT;
        let mut seen = 0u64;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            adler = adler32_update(adler, &buf[..n]);
            seen += n as u64;
        }
        if seen != summary.u_len {
            return Err(StreamError::Corrupted(format!(
                "input changed size while packing: {} bytes packed, {} now",
                summary.u_len, seen
            )));
        }
        if adler != summary.u_adler {
            return Err(CodecError::ChecksumMismatch { expected: summary.u_adler, actual: adler }.into());
        }
        if out.payload_adler() != summary.c_adler {
            return Err(CodecError::ChecksumMismatch { expected: summary.c_adler, actual: out.payload_adler() }.into());
        }
        Ok(())
    }
}
