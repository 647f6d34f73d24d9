mod envelope;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::{debug, warn};
use tracing_subscriber::{fmt, EnvFilter};

use envelope::{Envelope, ENVELOPE_SIZE};
use xpak_codecs::codec_by_method;
use xpak_core::overlap::find_overlap_overhead;
use xpak_core::packer::check_compression_ratio;
use xpak_core::{
    BlockHeader, ByteOrder, CompressResult, Method, PackOptions, Packer, UnpackOptions, Unpacker, BLOCK_HEADER_SIZE,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "xpak", about = "Pack payloads into in-place decodable block streams", version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG wins
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Little,
    Big,
}

impl From<OrderArg> for ByteOrder {
    fn from(o: OrderArg) -> Self {
        match o {
            OrderArg::Little => ByteOrder::Little,
            OrderArg::Big => ByteOrder::Big,
        }
    }
}

#[derive(clap::Args, Default)]
struct PackArgs {
    /// Pack profile (TOML, same fields as the flags below)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Compression method, e.g. nrv2e_le32, lzma, zstd
    #[arg(short, long)]
    method: Option<Method>,
    /// 1 (fastest) ..= 10 (smallest)
    #[arg(short, long)]
    level: Option<u32>,
    /// Raw bytes per block
    #[arg(short, long)]
    block_size: Option<usize>,
    /// Pin a filter id (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_filter_id)]
    filter: Option<u8>,
    /// Value added to call targets by the call-trick filters
    #[arg(long)]
    addvalue: Option<u32>,
    /// Byte order of the block headers
    #[arg(long, value_enum)]
    byte_order: Option<OrderArg>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a file into an xpak stream
    Pack {
        /// Source file ("-" reads stdin)
        input: PathBuf,
        /// Destination file
        output: PathBuf,
        #[command(flatten)]
        args: PackArgs,
    },
    /// Restore the original bytes of an xpak file
    Unpack {
        /// Source xpak file
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
    },
    /// Print the envelope and block list
    Inspect {
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
    /// Measure the smallest in-place overhead each compressed block needs
    Overlap {
        file: PathBuf,
        /// Stop searching once the interval is this narrow
        #[arg(long, default_value_t = 1)]
        range: usize,
    },
    /// List compression methods and backend versions
    Methods,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn parse_filter_id(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid filter id '{s}': {e}"))
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).with_writer(io::stderr).try_init();
}

/// Profile from `--config`, then explicit flags on top.
fn pack_options(args: &PackArgs) -> anyhow::Result<PackOptions> {
    let mut opts = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading profile {:?}", path))?;
            toml::from_str::<PackOptions>(&text).with_context(|| format!("parsing profile {:?}", path))?
        }
        None => PackOptions::default(),
    };
    if let Some(m) = args.method {
        opts.method = m;
    }
    if let Some(l) = args.level {
        opts.level = l;
    }
    if let Some(b) = args.block_size {
        opts.block_size = b;
    }
    if args.filter.is_some() {
        opts.filter = args.filter;
    }
    if let Some(a) = args.addvalue {
        opts.addvalue = a;
    }
    if let Some(o) = args.byte_order {
        opts.byte_order = o.into();
    }
    Ok(opts)
}

fn read_envelope<R: Read>(r: &mut R) -> anyhow::Result<Envelope> {
    let mut buf = [0u8; ENVELOPE_SIZE];
    r.read_exact(&mut buf).context("reading xpak envelope")?;
    Envelope::from_bytes(&buf)
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_pack(input: &Path, output: &Path, args: &PackArgs) -> anyhow::Result<Envelope> {
    let opts = pack_options(args)?;
    let codec = codec_by_method(opts.method)?;
    let packer = Packer::new(codec.as_ref(), opts.clone()).context("invalid pack options")?;

    let mut dst = BufWriter::new(
        File::create(output).with_context(|| format!("creating output file {:?}", output))?,
    );
    dst.write_all(&[0u8; ENVELOPE_SIZE])?;

    let t0 = Instant::now();
    let summary = if input.to_str() == Some("-") {
        let mut data = Vec::new();
        io::stdin().lock().read_to_end(&mut data)?;
        packer.pack(&mut Cursor::new(data), &mut dst, None)
    } else {
        let file = File::open(input).with_context(|| format!("opening input file {:?}", input))?;
        packer.pack(&mut BufReader::new(file), &mut dst, None)
    }
    .context("packing")?;
    let elapsed = t0.elapsed();

    let narrow = |v: u64, what: &str| u32::try_from(v).with_context(|| format!("{what} of {v} bytes exceeds 4 GiB"));
    let env = Envelope {
        method: opts.method,
        level: opts.level as u8,
        filter_id: summary.filter_id,
        cto: summary.filter_cto,
        byte_order: opts.byte_order,
        block_size: narrow(opts.block_size as u64, "block size")?,
        u_len: narrow(summary.u_len, "input")?,
        c_len: narrow(summary.c_len, "payload")?,
        u_adler: summary.u_adler,
        c_adler: summary.c_adler,
        addvalue: opts.addvalue,
        filter_len: summary.filter_len,
    };
    let mut file = dst.into_inner().map_err(|e| e.into_error())?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&env.to_bytes())?;
    file.sync_all()?;

    if !check_compression_ratio(summary.c_len, summary.u_len) {
        warn!(u_len = summary.u_len, c_len = summary.c_len, "payload does not compress enough to be worth packing");
    }

    eprintln!("  method      : {} (level {})", opts.method, opts.level);
    eprintln!("  blocks      : {} ({} stored literally)", summary.blocks, summary.literal_blocks);
    if summary.overlap_rejects > 0 {
        eprintln!("  in-place    : {} block(s) failed the overlap check", summary.overlap_rejects);
    }
    if summary.filter_id != 0 {
        eprintln!("  filter      : 0x{:02x} (cto 0x{:02x})", summary.filter_id, summary.filter_cto);
    }
    eprintln!("  raw size    : {}", human_bytes(summary.u_len));
    eprintln!("  packed      : {}", human_bytes(summary.bytes_written + ENVELOPE_SIZE as u64));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(env)
}

fn run_unpack(input: &Path, output: &Path) -> anyhow::Result<()> {
    let mut src = BufReader::new(File::open(input).with_context(|| format!("opening {:?}", input))?);
    let env = read_envelope(&mut src)?;
    debug!(?env, "envelope");

    let codec = codec_by_method(env.method)?;
    let opts = UnpackOptions {
        byte_order: env.byte_order,
        max_block_size: env.block_size as usize,
        addvalue: env.addvalue,
        expected: Some(env.totals()),
    };
    let unpacker = Unpacker::new(codec.as_ref(), opts).context("invalid envelope")?;

    let mut dst: Box<dyn Write> = if output.to_str() == Some("-") {
        Box::new(io::stdout().lock())
    } else {
        Box::new(BufWriter::new(
            File::create(output).with_context(|| format!("creating output file {:?}", output))?,
        ))
    };
    let t0 = Instant::now();
    let totals = unpacker.unpack(&mut src, &mut dst, None).context("unpacking")?;
    dst.flush()?;

    eprintln!("  raw size    : {}", human_bytes(totals.u_len));
    eprintln!("  elapsed     : {:.3}s", t0.elapsed().as_secs_f64());
    Ok(())
}

/// Walk the block headers, handing each non-literal payload to `visit`.
fn for_each_block<F>(file: &Path, mut visit: F) -> anyhow::Result<Envelope>
where
    F: FnMut(usize, &BlockHeader, Option<&[u8]>) -> anyhow::Result<()>,
{
    let mut src = BufReader::new(File::open(file).with_context(|| format!("opening {:?}", file))?);
    let env = read_envelope(&mut src)?;
    let mut index = 0;
    loop {
        let mut raw = [0u8; BLOCK_HEADER_SIZE];
        src.read_exact(&mut raw).with_context(|| format!("reading header of block {index}"))?;
        let h = BlockHeader::from_bytes(&raw, env.byte_order);
        if h.is_terminal() {
            break;
        }
        if h.is_literal() {
            src.seek_relative(h.c_len as i64)?;
            visit(index, &h, None)?;
        } else {
            let mut payload = vec![0u8; h.c_len as usize];
            src.read_exact(&mut payload).with_context(|| format!("reading payload of block {index}"))?;
            visit(index, &h, Some(&payload))?;
        }
        index += 1;
    }
    Ok(env)
}

fn run_inspect(file: &Path, show_blocks: bool) -> anyhow::Result<()> {
    let mut src = File::open(file).with_context(|| format!("opening {:?}", file))?;
    let env = read_envelope(&mut src)?;
    let size = src.metadata()?.len();

    println!("=== xpak file: {:?} ===", file);
    println!();
    println!("  method         : {} (id={})", env.method, env.method.id());
    println!("  level          : {}", env.level);
    println!("  byte order     : {:?}", env.byte_order);
    println!("  block size     : {}", human_bytes(env.block_size as u64));
    println!("  raw size       : {}", human_bytes(env.u_len as u64));
    println!("  payload        : {}", human_bytes(env.c_len as u64));
    println!("  file on disk   : {}", human_bytes(size));
    println!("  u_adler        : {:08x}", env.u_adler);
    println!("  c_adler        : {:08x}", env.c_adler);
    if env.filter_id != 0 {
        println!("  filter         : 0x{:02x} cto=0x{:02x} len={}", env.filter_id, env.cto, env.filter_len);
    }

    if show_blocks {
        println!();
        println!("  {:>6}  {:>12}  {:>12}  {:>6}  {:>4}  {:>8}", "block", "raw", "stored", "method", "flt", "kind");
        println!("  {}", "-".repeat(58));
        for_each_block(file, |i, h, _| {
            println!(
                "  {:>6}  {:>12}  {:>12}  {:>6}  {:>4}  {:>8}",
                i,
                human_bytes(h.u_len as u64),
                human_bytes(h.c_len as u64),
                h.method,
                format!("{:02x}", h.filter),
                if h.is_literal() { "literal" } else { "packed" }
            );
            Ok(())
        })?;
    }
    Ok(())
}

fn run_overlap(file: &Path, range: usize) -> anyhow::Result<()> {
    let mut worst = 0usize;
    let mut env_method = None;
    let env = for_each_block(file, |i, h, payload| {
        let Some(payload) = payload else {
            println!("  block {i:>4}: literal");
            return Ok(());
        };
        let method = Method::try_from(h.method).with_context(|| format!("block {i}: unknown method {}", h.method))?;
        let codec = codec_by_method(method)?;
        env_method.get_or_insert(method);
        let decoded = codec
            .decompress(payload, h.u_len as usize, &CompressResult::None)
            .with_context(|| format!("decoding block {i}"))?;
        let overhead = find_overlap_overhead(
            codec.as_ref(),
            payload,
            Some(decoded.as_slice()),
            decoded.len(),
            &CompressResult::None,
            range,
            usize::MAX,
        )
        .with_context(|| format!("block {i}: no overhead decodes in place"))?;
        worst = worst.max(overhead);
        println!("  block {i:>4}: {} -> {}  overhead {overhead}", h.u_len, h.c_len);
        Ok(())
    })?;
    if let Some(m) = env_method {
        if m != env.method {
            bail!("blocks use {m} but the envelope says {}", env.method);
        }
    }
    println!("  worst case   : {worst} bytes");
    Ok(())
}

fn run_methods() -> anyhow::Result<()> {
    println!("  {:>3}  {:<12}  {}", "id", "name", "backend");
    for m in Method::ALL {
        println!("  {:>3}  {:<12}  {}", m.id(), m.name(), xpak_codecs::version_string(m)?);
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    xpak_codecs::init().context("codec self check failed")?;

    match cli.command {
        Commands::Pack { input, output, args } => run_pack(&input, &output, &args).map(|_| ()),
        Commands::Unpack { input, output } => run_unpack(&input, &output),
        Commands::Inspect { file, blocks } => run_inspect(&file, blocks),
        Commands::Overlap { file, range } => run_overlap(&file, range),
        Commands::Methods => run_methods(),
    }
}
