//! End-to-end packer / unpacker tests over in-memory streams.
use std::io::Cursor;

use proptest::prelude::*;
use xpak_codecs::codec_by_method;
use xpak_core::filter::known_filters;
use xpak_core::{
    BlockHeader, ByteOrder, CodecError, CompressResult, Filter, FilterOutcome, Method, PackOptions, PackSummary, Packer,
    StreamError, StreamTotals, UnpackOptions, Unpacker, BLOCK_HEADER_SIZE,
};

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

/// x86-flavoured bytes: short instruction runs with `call rel32` into a
/// handful of fixed targets.
fn code_like_bytes(len: usize) -> Vec<u8> {
    let body: [&[u8]; 4] = [
        b"\x55\x48\x89\xe5\x48\x83\xec\x10",
        b"\x8b\x45\xfc\x01\xc0\x89\x45\xf8",
        b"\x48\x8b\x7d\xf0\x31\xc0",
        b"\xc9\xc3\x90\x90",
    ];
    let targets = [0x100u32, 0x2400, 0x5a00, 0x9000];
    let mut out = Vec::with_capacity(len + 16);
    let mut i = 0usize;
    while out.len() < len {
        out.extend_from_slice(body[i % body.len()]);
        out.push(0xe8);
        let next = out.len() as u32 + 4;
        out.extend_from_slice(&targets[(i / 3) % targets.len()].wrapping_sub(next).to_le_bytes());
        i += 1;
    }
    out.truncate(len);
    out
}

fn pack(data: &[u8], opts: PackOptions) -> (Vec<u8>, PackSummary) {
    let codec = codec_by_method(opts.method).unwrap();
    let packer = Packer::new(codec.as_ref(), opts).unwrap();
    let mut out = Vec::new();
    let summary = packer.pack(&mut Cursor::new(data), &mut out, None).unwrap();
    (out, summary)
}

fn unpack(stream: &[u8], method: Method, opts: UnpackOptions) -> Result<(Vec<u8>, StreamTotals), StreamError> {
    let codec = codec_by_method(method)?;
    let unpacker = Unpacker::new(codec.as_ref(), opts)?;
    let mut out = Vec::new();
    let totals = unpacker.unpack(&mut Cursor::new(stream), &mut out, None)?;
    Ok((out, totals))
}

fn totals(s: &PackSummary) -> StreamTotals {
    StreamTotals { u_len: s.u_len, c_len: s.c_len, u_adler: s.u_adler, c_adler: s.c_adler }
}

fn headers(stream: &[u8], order: ByteOrder) -> Vec<BlockHeader> {
    let mut pos = 0;
    let mut out = Vec::new();
    loop {
        let raw: [u8; BLOCK_HEADER_SIZE] = stream[pos..pos + BLOCK_HEADER_SIZE].try_into().unwrap();
        let h = BlockHeader::from_bytes(&raw, order);
        if h.is_terminal() {
            return out;
        }
        pos += BLOCK_HEADER_SIZE + h.c_len as usize;
        out.push(h);
    }
}

// ── round trips ───────────────────────────────────────────────────────────

#[test]
fn multi_block_round_trip() {
    let data = compressible_bytes(300_000);
    let opts = PackOptions { method: Method::Nrv2eLe32, block_size: 64 * 1024, ..Default::default() };
    let (stream, summary) = pack(&data, opts);

    assert_eq!(summary.blocks, 5); // 4 full + 1 partial
    assert_eq!(summary.literal_blocks, 0);
    assert_eq!(summary.u_len, data.len() as u64);
    assert_eq!(summary.bytes_written, stream.len() as u64);
    assert_eq!(summary.bytes_written, summary.c_len + 6 * BLOCK_HEADER_SIZE as u64);
    assert!(stream.len() < data.len() / 10);

    let expected = UnpackOptions { expected: Some(totals(&summary)), ..Default::default() };
    let (out, got) = unpack(&stream, Method::Nrv2eLe32, expected).unwrap();
    assert_eq!(out, data);
    assert_eq!(got, totals(&summary));
}

#[test]
fn lengths_around_block_size_round_trip() {
    let block_size = 16 * 1024;
    for method in Method::ALL {
        for len in [1, block_size - 1, block_size, block_size + 1] {
            let data = code_like_bytes(len);
            let opts = PackOptions { method, block_size, ..Default::default() };
            let (stream, summary) = pack(&data, opts);
            assert_eq!(summary.blocks as usize, len.div_ceil(block_size), "{method} len {len}");
            assert_eq!(summary.u_len, len as u64);

            let expected = UnpackOptions { expected: Some(totals(&summary)), ..Default::default() };
            let (out, _) = unpack(&stream, method, expected).unwrap();
            assert_eq!(out, data, "{method} len {len}");
        }
    }
}

#[test]
fn every_lzma_block_decodes_on_its_own() {
    let data = compressible_bytes(150_000);
    let opts = PackOptions { method: Method::Lzma, level: 6, block_size: 50_000, ..Default::default() };
    let (stream, summary) = pack(&data, opts);
    assert_eq!(summary.blocks, 3);

    let codec = codec_by_method(Method::Lzma).unwrap();
    let mut pos = 0;
    for (i, h) in headers(&stream, ByteOrder::Little).into_iter().enumerate() {
        let payload = &stream[pos + BLOCK_HEADER_SIZE..pos + BLOCK_HEADER_SIZE + h.c_len as usize];
        let out = codec.decompress(payload, h.u_len as usize, &CompressResult::None).unwrap();
        assert_eq!(out, &data[i * 50_000..(i + 1) * 50_000], "block {i}");
        pos += BLOCK_HEADER_SIZE + h.c_len as usize;
    }
}

#[test]
fn library_methods_round_trip() {
    let data = compressible_bytes(150_000);
    for method in [Method::Lzma, Method::Deflate, Method::Zstd, Method::Bzip2] {
        let opts = PackOptions { method, level: 6, block_size: 100_000, ..Default::default() };
        let (stream, summary) = pack(&data, opts);
        assert_eq!(summary.literal_blocks, 0, "{method}");
        let (out, _) = unpack(&stream, method, UnpackOptions::default()).unwrap();
        assert_eq!(out, data, "{method}");
    }
}

#[test]
fn empty_input_is_just_the_end_marker() {
    let (stream, summary) = pack(&[], PackOptions::default());
    assert_eq!(stream.len(), BLOCK_HEADER_SIZE);
    assert_eq!(summary.blocks, 0);
    let (out, got) = unpack(&stream, Method::default(), UnpackOptions::default()).unwrap();
    assert!(out.is_empty());
    assert_eq!(got.u_adler, 1);
}

#[test]
fn random_data_is_stored_literally() {
    let data = pseudo_random_bytes(100_000, 99);
    let opts = PackOptions { method: Method::Nrv2bLe32, block_size: 40_000, ..Default::default() };
    let (stream, summary) = pack(&data, opts);
    assert_eq!(summary.literal_blocks, 3);
    assert_eq!(summary.c_len, summary.u_len);
    for h in headers(&stream, ByteOrder::Little) {
        assert!(h.is_literal());
        assert_eq!(h.filter, 0);
    }
    let (out, _) = unpack(&stream, Method::Nrv2bLe32, UnpackOptions::default()).unwrap();
    assert_eq!(out, data);
}

#[test]
fn big_endian_headers() {
    let data = compressible_bytes(50_000);
    let opts = PackOptions { method: Method::Nrv2d8, byte_order: ByteOrder::Big, ..Default::default() };
    let (stream, _) = pack(&data, opts);
    assert_eq!(&stream[..4], &(data.len() as u32).to_be_bytes());

    let be = UnpackOptions { byte_order: ByteOrder::Big, ..Default::default() };
    assert_eq!(unpack(&stream, Method::Nrv2d8, be).unwrap().0, data);
    assert!(unpack(&stream, Method::Nrv2d8, UnpackOptions::default()).is_err());
}

#[test]
fn progress_reports_each_block() {
    let data = compressible_bytes(100_000);
    let codec = codec_by_method(Method::Nrv2b8).unwrap();
    let packer = Packer::new(codec.as_ref(), PackOptions { method: Method::Nrv2b8, block_size: 25_000, ..Default::default() })
        .unwrap();
    let mut seen = Vec::new();
    let mut cb = |i: u64, o: u64| seen.push((i, o));
    packer.pack(&mut Cursor::new(&data), Vec::new(), Some(&mut cb)).unwrap();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[3].0, 100_000);
}

// ── filters ───────────────────────────────────────────────────────────────

#[test]
fn pinned_filter_applies_to_first_block_only() {
    let data = code_like_bytes(200_000);
    let opts = PackOptions {
        method: Method::Nrv2eLe32,
        block_size: 64 * 1024,
        filter: Some(0x13),
        ..Default::default()
    };
    let (stream, summary) = pack(&data, opts);
    let hs = headers(&stream, ByteOrder::Little);
    assert_eq!(hs.len(), 4);
    assert_eq!(hs[0].filter, 0x13);
    assert!(hs[1..].iter().all(|h| h.filter == 0));
    assert_eq!(summary.filter_id, 0x13);
    assert!(summary.filter_len > 0);

    let (out, _) = unpack(&stream, Method::Nrv2eLe32, UnpackOptions::default()).unwrap();
    assert_eq!(out, data);
}

#[test]
fn single_block_explores_candidates() {
    let data = code_like_bytes(60_000);
    let opts = PackOptions { method: Method::Nrv2bLe32, ..Default::default() };
    let (stream, summary) = pack(&data, opts);
    assert_eq!(summary.blocks, 1);
    let h = headers(&stream, ByteOrder::Little)[0];
    assert!([0x00, 0x13, 0x23].contains(&h.filter));
    assert_eq!(h.filter, summary.filter_id);
    let (out, _) = unpack(&stream, Method::Nrv2bLe32, UnpackOptions::default()).unwrap();
    assert_eq!(out, data);
}

#[test]
fn delta_filter_round_trip() {
    // 16-bit samples on a slow ramp
    let data: Vec<u8> = (0..40_000u32).flat_map(|i| ((i * 3 + (i % 7)) as u16).to_le_bytes()).collect();
    let opts = PackOptions { method: Method::Lzma, filter: Some(0x90), ..Default::default() };
    let (stream, _) = pack(&data, opts);
    assert_eq!(headers(&stream, ByteOrder::Little)[0].filter, 0x90);
    let (out, _) = unpack(&stream, Method::Lzma, UnpackOptions::default()).unwrap();
    assert_eq!(out, data);
}

// ── in-place safety ───────────────────────────────────────────────────────

#[test]
fn block_failing_in_place_check_is_stored_literally() {
    // Zeros up front decode far ahead of the incompressible tail.
    let mut data = vec![0u8; 64 * 1024];
    data.extend(pseudo_random_bytes(64 * 1024, 5));
    let opts = PackOptions { method: Method::Nrv2eLe32, ..Default::default() };
    let (stream, summary) = pack(&data, opts);
    assert_eq!(summary.overlap_rejects, 1);
    assert_eq!(summary.literal_blocks, 1);
    assert!(headers(&stream, ByteOrder::Little)[0].is_literal());
    assert_eq!(unpack(&stream, Method::Nrv2eLe32, UnpackOptions::default()).unwrap().0, data);
}

// ── failures ──────────────────────────────────────────────────────────────

#[test]
fn trailing_bytes_after_end_marker() {
    let (mut stream, _) = pack(&compressible_bytes(10_000), PackOptions::default());
    stream.push(0);
    let err = unpack(&stream, Method::default(), UnpackOptions::default()).unwrap_err();
    assert_eq!(err.codec_error(), Some(CodecError::InputNotConsumed));
}

#[test]
fn truncated_stream_is_input_overrun() {
    let (stream, _) = pack(&compressible_bytes(10_000), PackOptions::default());
    for cut in [5, BLOCK_HEADER_SIZE + 3, stream.len() - 1] {
        let err = unpack(&stream[..cut], Method::default(), UnpackOptions::default()).unwrap_err();
        assert_eq!(err.codec_error(), Some(CodecError::InputOverrun), "cut at {cut}");
    }
}

#[test]
fn recorded_checksum_mismatch() {
    let (stream, summary) = pack(&compressible_bytes(10_000), PackOptions::default());
    let mut want = totals(&summary);
    want.u_adler ^= 1;
    let err = unpack(&stream, Method::default(), UnpackOptions { expected: Some(want), ..Default::default() })
        .unwrap_err();
    assert!(matches!(err.codec_error(), Some(CodecError::ChecksumMismatch { .. })), "{err}");
}

#[test]
fn wrong_codec_is_method_mismatch() {
    let (stream, _) = pack(&compressible_bytes(10_000), PackOptions { method: Method::Nrv2eLe32, ..Default::default() });
    let err = unpack(&stream, Method::Nrv2bLe32, UnpackOptions::default()).unwrap_err();
    assert!(matches!(err, StreamError::MethodMismatch { found: 8, .. }), "{err}");
}

#[test]
fn oversized_block_header_is_rejected() {
    let data = compressible_bytes(100_000);
    let (stream, _) = pack(&data, PackOptions { block_size: 100_000, ..Default::default() });
    let small = UnpackOptions { max_block_size: 50_000, ..Default::default() };
    assert!(matches!(unpack(&stream, Method::default(), small), Err(StreamError::Corrupted(_))));
}

#[test]
fn packer_rejects_bad_options() {
    let codec = codec_by_method(Method::Nrv2b8).unwrap();
    let bad = [
        PackOptions { method: Method::Nrv2b8, level: 0, ..Default::default() },
        PackOptions { method: Method::Nrv2b8, filter: Some(0x7f), ..Default::default() },
        PackOptions { method: Method::Nrv2b8, block_size: 0, ..Default::default() },
        PackOptions { method: Method::Zstd, ..Default::default() },
    ];
    for opts in bad {
        assert!(Packer::new(codec.as_ref(), opts).is_err());
    }
}

// ── filter law ────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn unfilter_inverts_filter(
        idx in 0usize..64,
        data in prop::collection::vec(prop_oneof![Just(0xe8u8), Just(0xe9u8), Just(0u8), any::<u8>()], 0..600),
        addvalue in prop_oneof![Just(0u32), any::<u32>()],
    ) {
        let ids = known_filters();
        let id = ids[idx % ids.len()];
        let mut buf = data.clone();
        let mut f = Filter::new(id, addvalue);
        match f.filter(&mut buf) {
            Ok(FilterOutcome::Transformed | FilterOutcome::NoMatches) => {
                f.unfilter(&mut buf, true).unwrap();
                prop_assert_eq!(buf, data);
            }
            Ok(FilterOutcome::NotApplicable) => prop_assert_eq!(buf, data),
            // Refused mid-pass; callers filter a scratch copy.
            Err(CodecError::FilterViolation { .. }) => {}
            Err(e) => return Err(TestCaseError::fail(format!("filter 0x{id:02x}: {e}"))),
        }
    }
}
