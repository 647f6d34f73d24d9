//! Naive call trick: every e8/e9 opcode's operand is rewritten from a
//! relative displacement to an absolute address (plus `addvalue`), whether
//! or not it is really a call.

use super::{Direction, FilterStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Opcode {
    E8,
    E9,
    E8E9,
}

impl Opcode {
    pub(crate) fn matches(self, b: u8) -> bool {
        match self {
            Opcode::E8 => b == 0xe8,
            Opcode::E9 => b == 0xe9,
            Opcode::E8E9 => b == 0xe8 || b == 0xe9,
        }
    }
}

/// Byte order of the operand before and after filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Swap {
    None,
    /// Read little-endian, store big-endian.
    LeToBe,
    /// Read big-endian, store little-endian.
    BeToLe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CallTrick {
    /// Operand width in bytes: 2 or 4.
    pub width: usize,
    pub opcode: Opcode,
    pub swap: Swap,
}

fn get(b: &[u8], big: bool) -> u32 {
    let fold = |acc: u32, &x: &u8| acc << 8 | x as u32;
    if big {
        b.iter().fold(0, fold)
    } else {
        b.iter().rev().fold(0, fold)
    }
}

fn set(b: &mut [u8], v: u32, big: bool) {
    let n = b.len();
    for (i, slot) in b.iter_mut().enumerate() {
        let shift = if big { 8 * (n - 1 - i) } else { 8 * i };
        *slot = (v >> shift) as u8;
    }
}

impl CallTrick {
    fn mask(&self) -> u32 {
        if self.width == 2 {
            0xffff
        } else {
            u32::MAX
        }
    }

    /// Offsets of rewritten operands. Opcode bytes are never modified and
    /// operands are skipped, so filter and unfilter visit the same sites.
    fn call_sites(&self, buf: &[u8]) -> Vec<usize> {
        let mut sites = Vec::new();
        let end = buf.len() - (self.width + 1);
        let mut i = 0;
        loop {
            if self.opcode.matches(buf[i]) {
                sites.push(i + 1);
                i += self.width;
            }
            i += 1;
            if i >= end {
                break;
            }
        }
        sites
    }

    /// Operand byte order read and written in each direction.
    fn orders(&self, dir: Direction) -> (bool, bool) {
        match (self.swap, dir) {
            (Swap::None, _) => (false, false),
            (Swap::LeToBe, Direction::Unfilter) => (true, false),
            (Swap::LeToBe, _) => (false, true),
            (Swap::BeToLe, Direction::Unfilter) => (false, true),
            (Swap::BeToLe, _) => (true, false),
        }
    }

    pub(crate) fn run(&self, buf: &mut [u8], addvalue: u32, dir: Direction, stats: &mut FilterStats) {
        let (read_big, write_big) = self.orders(dir);
        let mask = self.mask();
        for a in self.call_sites(buf) {
            let operand = &mut buf[a..a + self.width];
            let bias = (a as u32).wrapping_add(addvalue);
            let v = get(operand, read_big);
            let nv = match dir {
                Direction::Unfilter => v.wrapping_sub(bias),
                _ => v.wrapping_add(bias),
            } & mask;
            if dir != Direction::Scan {
                set(operand, nv, write_big);
            }
            if stats.calls == 0 {
                stats.firstcall = a as u32;
            }
            stats.lastcall = a as u32;
            stats.calls += 1;
        }
        if stats.lastcall != 0 {
            stats.lastcall += self.width as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ct32(opcode: Opcode, swap: Swap) -> CallTrick {
        CallTrick { width: 4, opcode, swap }
    }

    #[test]
    fn e8_operand_becomes_absolute() {
        // call +0x10 at offset 2
        let mut buf = vec![0x90, 0x90, 0xe8, 0x10, 0, 0, 0, 0x90, 0x90];
        let mut stats = FilterStats::default();
        ct32(Opcode::E8, Swap::None).run(&mut buf, 0x1000, Direction::Filter, &mut stats);
        // 0x10 + operand offset 3 + addvalue
        assert_eq!(&buf[3..7], &0x1013u32.to_le_bytes());
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.firstcall, 3);
        assert_eq!(stats.lastcall, 7);
    }

    #[test]
    fn operands_are_skipped() {
        // The second e8 sits inside the first operand and must not be touched.
        let buf = vec![0xe8, 0xe8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(ct32(Opcode::E8, Swap::None).call_sites(&buf), vec![1]);
    }

    #[test]
    fn swapped_operand_round_trip() {
        let original = vec![0xe9, 1, 2, 3, 4, 0xe8, 5, 6, 7, 8, 0, 0];
        let ct = ct32(Opcode::E8E9, Swap::LeToBe);
        let mut buf = original.clone();
        let mut stats = FilterStats::default();
        ct.run(&mut buf, 0, Direction::Filter, &mut stats);
        assert_eq!(&buf[1..5], &(0x0403_0201u32 + 1).to_be_bytes());
        ct.run(&mut buf, 0, Direction::Unfilter, &mut FilterStats::default());
        assert_eq!(buf, original);
        assert_eq!(stats.calls, 2);
    }

    #[test]
    fn sixteen_bit_wraps() {
        let ct = CallTrick { width: 2, opcode: Opcode::E8, swap: Swap::None };
        let original = vec![0xe8, 0xff, 0xff, 0x00];
        let mut buf = original.clone();
        ct.run(&mut buf, 0, Direction::Filter, &mut FilterStats::default());
        assert_eq!(&buf[1..3], &[0x00, 0x00]);
        ct.run(&mut buf, 0, Direction::Unfilter, &mut FilterStats::default());
        assert_eq!(buf, original);
    }
}
