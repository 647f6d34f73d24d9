use tracing::trace;
use xpak_core::config::NrvParams;
use xpak_core::{NrvResult, Progress};

use super::bits::{BitWidth, BitWriter};
use super::matcher::Matcher;
use super::Variant;

const PROGRESS_STEP: usize = 64 * 1024;

/// Gamma value that marks end of stream once combined with a 0xff byte.
const EOF_GAMMA: u32 = 0x0100_0002;

struct Emitter {
    w: BitWriter,
    variant: Variant,
    last_off: usize,
}

impl Emitter {
    fn literal(&mut self, b: u8) {
        self.w.put_bit(1);
        self.w.put_byte(b);
    }

    fn matched(&mut self, dist: usize, len: usize) {
        let far = (dist > self.variant.far_threshold()) as usize;
        let l = (len - 1 - far) as u32;
        let repeat = dist == self.last_off;
        self.w.put_bit(0);

        match self.variant {
            Variant::B => {
                if repeat {
                    self.w.put_gamma_ss11(2);
                } else {
                    let v = (dist - 1) as u32;
                    self.w.put_gamma_ss11((v >> 8) + 3);
                    self.w.put_byte(v as u8);
                }
                if l <= 3 {
                    self.w.put_bit(l >> 1);
                    self.w.put_bit(l & 1);
                } else {
                    self.w.put_bit(0);
                    self.w.put_bit(0);
                    self.w.put_gamma_ss11(l - 2);
                }
            }
            Variant::D => {
                let h = if l <= 3 { l >> 1 } else { 0 };
                self.offset_ss12(dist, h, repeat);
                if l <= 3 {
                    self.w.put_bit(l & 1);
                } else {
                    self.w.put_bit(0);
                    self.w.put_gamma_ss11(l - 2);
                }
            }
            Variant::E => {
                let h = (l <= 2) as u32;
                self.offset_ss12(dist, h, repeat);
                match l {
                    1 | 2 => self.w.put_bit(l - 1),
                    3 | 4 => {
                        self.w.put_bit(1);
                        self.w.put_bit(l - 3);
                    }
                    _ => {
                        self.w.put_bit(0);
                        self.w.put_gamma_ss11(l - 3);
                    }
                }
            }
        }
        self.last_off = dist;
    }

    /// Offset with the first length bit `h` folded in (2D / 2E layout).
    fn offset_ss12(&mut self, dist: usize, h: u32, repeat: bool) {
        if repeat {
            self.w.put_gamma_ss12(2);
            self.w.put_bit(h);
        } else {
            let v = (((dist - 1) as u32) << 1) | (1 - h);
            self.w.put_gamma_ss12((v >> 8) + 3);
            self.w.put_byte(v as u8);
        }
    }

    fn end(mut self) -> Vec<u8> {
        self.w.put_bit(0);
        match self.variant {
            Variant::B => self.w.put_gamma_ss11(EOF_GAMMA),
            Variant::D | Variant::E => self.w.put_gamma_ss12(EOF_GAMMA),
        }
        self.w.put_byte(0xff);
        self.w.finish()
    }
}

/// Usable match at `p`: at least two bytes, and at least three when the
/// distance is beyond the variant's far threshold.
fn usable(found: (usize, usize), variant: Variant) -> (usize, usize) {
    let (len, dist) = found;
    let min = 2 + (dist > variant.far_threshold()) as usize;
    if len >= min {
        found
    } else {
        (0, 0)
    }
}

pub(crate) fn encode(
    src: &[u8],
    variant: Variant,
    width: BitWidth,
    params: &NrvParams,
    mut progress: Option<&mut dyn Progress>,
) -> (Vec<u8>, NrvResult) {
    let mut matcher = Matcher::new(src, params);
    let mut em = Emitter {
        w: BitWriter::new(width, src.len() / 2 + 64),
        variant,
        last_off: 1,
    };
    let mut stats = NrvResult::default();
    let mut run = 0u32;
    let mut next_report = PROGRESS_STEP;

    let mut p = 0;
    while p < src.len() {
        let (len, dist) = usable(matcher.longest(p, em.last_off), variant);
        matcher.insert(p);

        if len > 0 && params.lazy && p + 1 < src.len() {
            let (next_len, _) = usable(matcher.longest(p + 1, em.last_off), variant);
            if next_len > len {
                em.literal(src[p]);
                run += 1;
                p += 1;
                continue;
            }
        }

        if len == 0 {
            em.literal(src[p]);
            run += 1;
            p += 1;
        } else {
            em.matched(dist, len);
            stats.max_run = stats.max_run.max(run);
            run = 0;
            if stats.matches == 0 {
                stats.first_offset = dist as u32;
            }
            stats.matches += 1;
            stats.max_offset = stats.max_offset.max(dist as u32);
            stats.max_match = stats.max_match.max(len as u32);
            for q in p + 1..p + len {
                matcher.insert(q);
            }
            p += len;
        }

        if p >= next_report {
            if let Some(cb) = progress.as_deref_mut() {
                cb.update(p as u64, em.w.len() as u64);
            }
            next_report = p + PROGRESS_STEP;
        }
    }
    stats.max_run = stats.max_run.max(run);

    let out = em.end();
    if let Some(cb) = progress.as_deref_mut() {
        cb.update(src.len() as u64, out.len() as u64);
    }
    trace!(
        u_len = src.len(),
        c_len = out.len(),
        matches = stats.matches,
        max_offset = stats.max_offset,
        "nrv block encoded"
    );
    (out, stats)
}
