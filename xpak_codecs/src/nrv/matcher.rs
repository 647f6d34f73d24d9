//! Hash-chain match finder over one in-memory block.

use xpak_core::config::NrvParams;

const NIL: u32 = u32::MAX;
const HASH_LEN: usize = 3;

pub(crate) struct Matcher<'a> {
    src: &'a [u8],
    head: Vec<u32>,
    prev: Vec<u32>,
    hash_shift: u32,
    max_chain: usize,
    max_offset: usize,
    max_match: usize,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(src: &'a [u8], params: &NrvParams) -> Self {
        Self {
            src,
            head: vec![NIL; 1 << params.hash_bits],
            prev: vec![NIL; src.len()],
            hash_shift: 32 - params.hash_bits,
            max_chain: params.max_chain,
            max_offset: params.max_offset,
            max_match: params.max_match,
        }
    }

    fn hash(&self, p: usize) -> usize {
        let s = self.src;
        let v = s[p] as u32 | (s[p + 1] as u32) << 8 | (s[p + 2] as u32) << 16;
        (v.wrapping_mul(0x9e37_79b1) >> self.hash_shift) as usize
    }

    /// Register position `p` as a future match source. Each position is
    /// inserted at most once, in increasing order.
    pub(crate) fn insert(&mut self, p: usize) {
        if p + HASH_LEN > self.src.len() {
            return;
        }
        let h = self.hash(p);
        self.prev[p] = self.head[h];
        self.head[h] = p as u32;
    }

    fn match_len(&self, from: usize, p: usize, limit: usize) -> usize {
        let s = self.src;
        let mut n = 0;
        while n < limit && s[from + n] == s[p + n] {
            n += 1;
        }
        n
    }

    /// Longest match for position `p` as `(len, distance)`, `(0, 0)` if none
    /// of at least two bytes exists. A match at `last_off` is tried first and
    /// keeps ties since it encodes cheapest.
    pub(crate) fn longest(&self, p: usize, last_off: usize) -> (usize, usize) {
        let limit = self.max_match.min(self.src.len() - p);
        if limit < 2 {
            return (0, 0);
        }

        let mut best = (0, 0);
        if last_off <= p && last_off <= self.max_offset {
            let len = self.match_len(p - last_off, p, limit);
            if len >= 2 {
                best = (len, last_off);
            }
        }
        if best.0 >= limit || p + HASH_LEN > self.src.len() {
            return best;
        }

        let mut cand = self.head[self.hash(p)];
        let mut chain = self.max_chain;
        while cand != NIL && chain > 0 {
            let c = cand as usize;
            let dist = p - c;
            if dist > self.max_offset {
                break;
            }
            if self.src[c + best.0] == self.src[p + best.0] {
                let len = self.match_len(c, p, limit);
                if len > best.0 {
                    best = (len, dist);
                    if len >= limit {
                        break;
                    }
                }
            }
            cand = self.prev[c];
            chain -= 1;
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NrvParams {
        NrvParams { max_offset: 1 << 20, max_match: 2048, hash_bits: 12, max_chain: 64, lazy: false }
    }

    #[test]
    fn finds_earlier_occurrence() {
        let src = b"abcdefXXabcdefYY";
        let mut m = Matcher::new(src, &params());
        for p in 0..8 {
            m.insert(p);
        }
        assert_eq!(m.longest(8, 1), (6, 8));
    }

    #[test]
    fn repeat_distance_wins_ties() {
        let src = b"abcabcabc";
        let mut m = Matcher::new(src, &params());
        for p in 0..6 {
            m.insert(p);
        }
        // distance 3 and 6 both give 3 bytes; the chain prefers the nearer one
        assert_eq!(m.longest(6, 1), (3, 3));
        assert_eq!(m.longest(6, 6), (3, 6));
    }

    #[test]
    fn offset_limit_is_respected() {
        let mut src = b"wxyz".to_vec();
        src.extend_from_slice(&[0u8; 64]);
        src.extend_from_slice(b"wxyz");
        let mut p = params();
        p.max_offset = 32;
        let mut m = Matcher::new(&src, &p);
        for i in 0..68 {
            m.insert(i);
        }
        assert_eq!(m.longest(68, 1000), (0, 0));
    }

    #[test]
    fn run_of_one_byte_uses_distance_one() {
        let src = [7u8; 100];
        let mut m = Matcher::new(&src, &params());
        m.insert(0);
        assert_eq!(m.longest(1, 1), (99, 1));
    }
}
