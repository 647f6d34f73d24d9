//! Delta ("sub") filters: each element is replaced by its difference from
//! the previous element of the same lane. `lanes` interleaved streams are
//! tracked independently, which suits tables of fixed-size records.

use super::{Direction, FilterStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Delta {
    /// Element width in bytes: 1, 2 or 4 (little-endian).
    pub width: usize,
    /// Interleaved lanes, 1..=4.
    pub lanes: usize,
}

impl Delta {
    pub(crate) fn min_len(&self) -> usize {
        self.width * (self.lanes + 1)
    }

    fn mask(&self) -> u32 {
        match self.width {
            1 => 0xff,
            2 => 0xffff,
            _ => u32::MAX,
        }
    }

    fn load(&self, chunk: &[u8]) -> u32 {
        chunk.iter().rev().fold(0u32, |acc, &x| acc << 8 | x as u32)
    }

    fn store(&self, chunk: &mut [u8], v: u32) {
        for (i, slot) in chunk.iter_mut().enumerate() {
            *slot = (v >> (8 * i)) as u8;
        }
    }

    pub(crate) fn run(&self, buf: &mut [u8], dir: Direction, stats: &mut FilterStats) {
        let count = buf.len() / self.width;
        let mask = self.mask();
        let mut prev = [0u32; 4];
        let mut lane = self.lanes - 1;

        if dir != Direction::Scan {
            for chunk in buf.chunks_exact_mut(self.width) {
                let x = self.load(chunk);
                match dir {
                    Direction::Filter => {
                        self.store(chunk, x.wrapping_sub(prev[lane]) & mask);
                        prev[lane] = x;
                    }
                    _ => {
                        prev[lane] = prev[lane].wrapping_add(x) & mask;
                        self.store(chunk, prev[lane]);
                    }
                }
                lane = if lane == 0 { self.lanes - 1 } else { lane - 1 };
            }
        }
        stats.calls = (count - self.lanes) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_becomes_constant() {
        let mut buf: Vec<u8> = (10..30).collect();
        Delta { width: 1, lanes: 1 }.run(&mut buf, Direction::Filter, &mut FilterStats::default());
        assert_eq!(buf[0], 10);
        assert!(buf[1..].iter().all(|&b| b == 1));
    }

    #[test]
    fn lanes_are_independent() {
        // two interleaved 16-bit ramps with different steps
        let mut buf = Vec::new();
        for i in 0..8u16 {
            buf.extend_from_slice(&(100 + i).to_le_bytes());
            buf.extend_from_slice(&(5000 + 7 * i).to_le_bytes());
        }
        let original = buf.clone();
        let d = Delta { width: 2, lanes: 2 };
        let mut stats = FilterStats::default();
        d.run(&mut buf, Direction::Filter, &mut stats);
        assert_eq!(stats.calls, 14);
        assert_eq!(&buf[4..8], &[1, 0, 7, 0]);
        d.run(&mut buf, Direction::Unfilter, &mut FilterStats::default());
        assert_eq!(buf, original);
    }

    #[test]
    fn trailing_partial_element_is_untouched() {
        let mut buf = vec![1, 0, 2, 0, 9];
        Delta { width: 2, lanes: 1 }.run(&mut buf, Direction::Filter, &mut FilterStats::default());
        assert_eq!(buf, vec![1, 0, 1, 0, 9]);
    }
}
