//! Bit buffer shared by the NRV encoder and decoder.
//!
//! Flag bits are packed MSB-first into groups of 8, 16 or 32 bits. A group's
//! slot in the byte stream is reserved when its first bit is written, so
//! literal and offset bytes interleave with the groups exactly in the order
//! the decoder will ask for them.

use xpak_core::{CodecError, DecodeBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BitWidth {
    Byte,
    Le16,
    Le32,
}

impl BitWidth {
    pub(crate) fn bits(self) -> u32 {
        match self {
            BitWidth::Byte => 8,
            BitWidth::Le16 => 16,
            BitWidth::Le32 => 32,
        }
    }

    fn bytes(self) -> usize {
        self.bits() as usize / 8
    }
}

pub(crate) struct BitWriter {
    out: Vec<u8>,
    width: BitWidth,
    slot: Option<usize>,
    acc: u32,
    count: u32,
}

impl BitWriter {
    pub(crate) fn new(width: BitWidth, capacity: usize) -> Self {
        Self { out: Vec::with_capacity(capacity), width, slot: None, acc: 0, count: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.out.len()
    }

    fn flush_group(&mut self) {
        if let Some(at) = self.slot.take() {
            let v = self.acc << (self.width.bits() - self.count);
            match self.width {
                BitWidth::Byte => self.out[at] = v as u8,
                BitWidth::Le16 => self.out[at..at + 2].copy_from_slice(&(v as u16).to_le_bytes()),
                BitWidth::Le32 => self.out[at..at + 4].copy_from_slice(&v.to_le_bytes()),
            }
        }
    }

    pub(crate) fn put_bit(&mut self, bit: u32) {
        if self.slot.is_none() || self.count == self.width.bits() {
            self.flush_group();
            self.slot = Some(self.out.len());
            self.out.resize(self.out.len() + self.width.bytes(), 0);
            self.acc = 0;
            self.count = 0;
        }
        self.acc = (self.acc << 1) | (bit & 1);
        self.count += 1;
    }

    pub(crate) fn put_byte(&mut self, b: u8) {
        self.out.push(b);
    }

    /// Elias-gamma style code where every data bit is followed by a stop
    /// flag. `v >= 2`.
    pub(crate) fn put_gamma_ss11(&mut self, v: u32) {
        let top = 31 - v.leading_zeros();
        for i in (0..top).rev() {
            self.put_bit((v >> i) & 1);
            self.put_bit((i == 0) as u32);
        }
    }

    /// Denser gamma code with one stop flag per two data bits. `v >= 2`.
    pub(crate) fn put_gamma_ss12(&mut self, v: u32) {
        let mut i = v - 2;
        if i >= 2 {
            let mut t: u32 = 2;
            loop {
                i -= t;
                t <<= 2;
                if i < t {
                    break;
                }
            }
            loop {
                t >>= 1;
                self.put_bit((i & t != 0) as u32);
                self.put_bit(0);
                t >>= 1;
                self.put_bit((i & t != 0) as u32);
                if t <= 2 {
                    break;
                }
            }
        }
        self.put_bit(i & 1);
        self.put_bit(1);
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        self.flush_group();
        self.out
    }
}

pub(crate) struct BitReader {
    width: BitWidth,
    acc: u32,
    left: u32,
}

impl BitReader {
    pub(crate) fn new(width: BitWidth) -> Self {
        Self { width, acc: 0, left: 0 }
    }

    pub(crate) fn get_bit(&mut self, io: &mut dyn DecodeBuffer) -> Result<u32, CodecError> {
        if self.left == 0 {
            let mut v = 0u32;
            for i in 0..self.width.bytes() {
                v |= (io.read_byte()? as u32) << (8 * i);
            }
            self.acc = v;
            self.left = self.width.bits();
        }
        self.left -= 1;
        Ok((self.acc >> self.left) & 1)
    }

    pub(crate) fn get_gamma_ss11(
        &mut self,
        io: &mut dyn DecodeBuffer,
        limit: u32,
        overflow: CodecError,
    ) -> Result<u32, CodecError> {
        let mut m = 1u32;
        loop {
            m = m * 2 + self.get_bit(io)?;
            if m > limit {
                return Err(overflow);
            }
            if self.get_bit(io)? == 1 {
                return Ok(m);
            }
        }
    }

    pub(crate) fn get_gamma_ss12(
        &mut self,
        io: &mut dyn DecodeBuffer,
        limit: u32,
        overflow: CodecError,
    ) -> Result<u32, CodecError> {
        let mut m = 1u32;
        loop {
            m = m * 2 + self.get_bit(io)?;
            if m > limit {
                return Err(overflow);
            }
            if self.get_bit(io)? == 1 {
                return Ok(m);
            }
            m = (m - 1) * 2 + self.get_bit(io)?;
            if m > limit {
                return Err(overflow);
            }
        }
    }
}
