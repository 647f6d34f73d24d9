//! "Clever" 32-bit call trick.
//!
//! Only calls whose destination lies inside the buffer are rewritten. The
//! rewritten operand is stored big-endian with a marker byte (the cto) in
//! its high byte, so the unfilter can tell rewritten calls from untouched
//! ones. The cto is picked among high bytes that no untouched call uses.
//!
//! The swapped variants differ only in the byte order of the untouched
//! operand: a be->le swap reads and restores displacements big-endian. The
//! marked form is big-endian in every variant.

use super::calltrick::{Opcode, Swap};
use super::{Direction, FilterStats};

/// Addresses must fit below the cto byte.
const ADDRESS_LIMIT: u64 = 1 << 24;

/// Why the filter could not run on this buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CtoError {
    /// A destination plus addvalue does not fit in 24 bits, or every
    /// candidate marker byte is already in use.
    NotApplicable,
    /// A call was restored to a form the unfilter would misread.
    BufferNotRestored,
}

fn get_be32(b: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Byte order of call displacements as they appear in the input.
#[derive(Debug, Clone, Copy)]
struct Operand {
    big: bool,
}

impl Operand {
    fn new(swap: Swap) -> Self {
        Self { big: swap == Swap::BeToLe }
    }

    fn get(self, b: &[u8], at: usize) -> u32 {
        let raw = [b[at], b[at + 1], b[at + 2], b[at + 3]];
        if self.big {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        }
    }

    fn put(self, b: &mut [u8], at: usize, v: u32) {
        let raw = if self.big { v.to_be_bytes() } else { v.to_le_bytes() };
        b[at..at + 4].copy_from_slice(&raw);
    }
}

/// First free marker byte, trying `preferred` in order before 0..=255.
fn pick_cto(used: &[bool; 256], preferred: &[u8]) -> Option<u8> {
    preferred
        .iter()
        .copied()
        .find(|&c| !used[c as usize])
        .or_else(|| (0..=255u8).find(|&c| !used[c as usize]))
}

pub(crate) fn filter(
    buf: &mut [u8],
    opcode: Opcode,
    swap: Swap,
    addvalue: u32,
    preferred: &[u8],
    dir: Direction,
    stats: &mut FilterStats,
) -> Result<u8, CtoError> {
    let size = buf.len();
    let limit = size - 5;
    let operand = Operand::new(swap);

    // Pass 1: collect marker bytes used by calls leaving the buffer.
    let mut used = [false; 256];
    for ic in 0..limit {
        if !opcode.matches(buf[ic]) {
            continue;
        }
        let jc = operand.get(buf, ic + 1).wrapping_add(ic as u32 + 1) as usize;
        if jc < size {
            if jc as u64 + addvalue as u64 >= ADDRESS_LIMIT {
                return Err(CtoError::NotApplicable);
            }
        } else {
            used[buf[ic + 1] as usize] = true;
        }
    }
    let cto8 = pick_cto(&used, preferred).ok_or(CtoError::NotApplicable)?;
    let cto = (cto8 as u32) << 24;
    let write = dir == Direction::Filter;

    // Pass 2: rewrite.
    let mut lastnoncall = size;
    let mut ic = 0;
    while ic < limit {
        if !opcode.matches(buf[ic]) {
            ic += 1;
            continue;
        }
        let jc = operand.get(buf, ic + 1).wrapping_add(ic as u32 + 1);
        if (jc as usize) < size {
            if write {
                buf[ic + 1..ic + 5].copy_from_slice(&(jc + addvalue + cto).to_be_bytes());
            }
            if ic.wrapping_sub(lastnoncall) < 5 {
                // A marked-looking opcode in the previous four bytes: keep
                // this site as a plain non-call.
                let shadowed = (1..=4).any(|kc| {
                    ic >= kc && opcode.matches(buf[ic - kc]) && buf[ic - kc + 1] == cto8
                });
                if shadowed {
                    if write {
                        operand.put(buf, ic + 1, jc.wrapping_sub(ic as u32 + 1));
                    }
                    if buf[ic + 1] == cto8 {
                        return Err(CtoError::BufferNotRestored);
                    }
                    lastnoncall = ic;
                    stats.wrongcalls += 1;
                    ic += 1;
                    continue;
                }
            }
            if stats.calls == 0 {
                stats.firstcall = ic as u32 + 1;
            }
            stats.calls += 1;
            ic += 4;
            stats.lastcall = ic as u32 + 1;
        } else {
            lastnoncall = ic;
            stats.noncalls += 1;
        }
        ic += 1;
    }
    Ok(cto8)
}

pub(crate) fn unfilter(buf: &mut [u8], opcode: Opcode, swap: Swap, addvalue: u32, cto8: u8, stats: &mut FilterStats) {
    let limit = buf.len() - 5;
    let operand = Operand::new(swap);
    let cto = (cto8 as u32) << 24;
    let mut ic = 0;
    while ic < limit {
        if opcode.matches(buf[ic]) {
            if buf[ic + 1] == cto8 {
                let jc = get_be32(buf, ic + 1);
                let disp = jc
                    .wrapping_sub(ic as u32 + 1)
                    .wrapping_sub(addvalue)
                    .wrapping_sub(cto);
                operand.put(buf, ic + 1, disp);
                if stats.calls == 0 {
                    stats.firstcall = ic as u32 + 1;
                }
                stats.calls += 1;
                ic += 4;
                stats.lastcall = ic as u32 + 1;
            } else {
                stats.noncalls += 1;
            }
        }
        ic += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inside_call_is_marked_and_restored() {
        // e8 at 0 calling offset 0x10; e8 at 8 calling far outside
        let mut buf = vec![0u8; 32];
        buf[0] = 0xe8;
        buf[1..5].copy_from_slice(&(0x10u32 - 1).to_le_bytes());
        buf[8] = 0xe8;
        buf[9..13].copy_from_slice(&0x7000_0000u32.to_le_bytes());
        let original = buf.clone();

        let mut stats = FilterStats::default();
        let cto = filter(&mut buf, Opcode::E8, Swap::None, 0, &[], Direction::Filter, &mut stats).unwrap();
        // low byte 0x00 of the outside call is taken, so the marker is 0x01
        assert_eq!(cto, 0x01);
        assert_eq!(&buf[1..5], &[0x01, 0x00, 0x00, 0x10]);
        assert_eq!((stats.calls, stats.noncalls), (1, 1));

        let mut back = FilterStats::default();
        unfilter(&mut buf, Opcode::E8, Swap::None, 0, cto, &mut back);
        assert_eq!(buf, original);
        assert_eq!(back.calls, 1);
    }

    #[test]
    fn preferred_marker_wins_when_free() {
        let mut used = [false; 256];
        used[0] = true;
        assert_eq!(pick_cto(&used, &[0xff, 0x80]), Some(0xff));
        used[0xff] = true;
        assert_eq!(pick_cto(&used, &[0xff, 0x80]), Some(0x80));
        assert_eq!(pick_cto(&used, &[]), Some(1));
        assert_eq!(pick_cto(&[true; 256], &[3]), None);
    }

    #[test]
    fn large_addvalue_is_not_applicable() {
        let mut buf = vec![0u8; 16];
        buf[0] = 0xe8;
        let r = filter(&mut buf, Opcode::E8, Swap::None, 0x00ff_ffff, &[], Direction::Filter, &mut FilterStats::default());
        assert_eq!(r, Err(CtoError::NotApplicable));
    }

    #[test]
    fn big_endian_operands_are_read_big_endian() {
        let mut buf = vec![0u8; 32];
        buf[0] = 0xe9;
        buf[1..5].copy_from_slice(&(0x10u32 - 1).to_be_bytes());
        buf[8] = 0xe9;
        buf[9..13].copy_from_slice(&0x7000_0000u32.to_be_bytes());
        let original = buf.clone();

        let mut stats = FilterStats::default();
        let cto = filter(&mut buf, Opcode::E9, Swap::BeToLe, 0, &[], Direction::Filter, &mut stats).unwrap();
        // the outside call's first operand byte 0x70 is taken, 0x00 is free
        assert_eq!(cto, 0x00);
        assert_eq!(&buf[1..5], &[0x00, 0x00, 0x00, 0x10]);
        assert_eq!((stats.calls, stats.noncalls), (1, 1));

        let mut back = FilterStats::default();
        unfilter(&mut buf, Opcode::E9, Swap::BeToLe, 0, cto, &mut back);
        assert_eq!(buf, original);
    }
}
