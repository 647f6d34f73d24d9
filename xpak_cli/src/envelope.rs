//! Fixed 40-byte file header written by `xpak pack` in front of the block
//! stream. It carries what the unpacker cannot learn from the blocks
//! themselves. All fields are little-endian.
//!
//! ```text
//! 0   magic "XPAK"      16  u_len       u32
//! 4   version     u8    20  c_len       u32
//! 5   method      u8    24  u_adler     u32
//! 6   level       u8    28  c_adler     u32
//! 7   filter id   u8    32  addvalue    u32
//! 8   cto         u8    36  filter_len  u32
//! 9   byte order  u8
//! 10  reserved    u16
//! 12  block size  u32
//! ```

use anyhow::{bail, Context};
use xpak_core::{ByteOrder, Method, StreamTotals};

pub const ENVELOPE_SIZE: usize = 40;
pub const MAGIC: [u8; 4] = *b"XPAK";
pub const VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub method: Method,
    pub level: u8,
    pub filter_id: u8,
    pub cto: u8,
    pub byte_order: ByteOrder,
    pub block_size: u32,
    pub u_len: u32,
    pub c_len: u32,
    pub u_adler: u32,
    pub c_adler: u32,
    pub addvalue: u32,
    pub filter_len: u32,
}

impl Envelope {
    pub fn totals(&self) -> StreamTotals {
        StreamTotals {
            u_len: self.u_len as u64,
            c_len: self.c_len as u64,
            u_adler: self.u_adler,
            c_adler: self.c_adler,
        }
    }

    pub fn to_bytes(&self) -> [u8; ENVELOPE_SIZE] {
        let mut buf = [0u8; ENVELOPE_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = VERSION;
        buf[5] = self.method.id();
        buf[6] = self.level;
        buf[7] = self.filter_id;
        buf[8] = self.cto;
        buf[9] = match self.byte_order {
            ByteOrder::Little => 0,
            ByteOrder::Big => 1,
        };
        let words = [
            self.block_size,
            self.u_len,
            self.c_len,
            self.u_adler,
            self.c_adler,
            self.addvalue,
            self.filter_len,
        ];
        for (i, w) in words.iter().enumerate() {
            let at = 12 + 4 * i;
            buf[at..at + 4].copy_from_slice(&w.to_le_bytes());
        }
        buf
    }

    pub fn from_bytes(buf: &[u8; ENVELOPE_SIZE]) -> anyhow::Result<Self> {
        if buf[0..4] != MAGIC {
            bail!("not an xpak file (magic {:02x?})", &buf[0..4]);
        }
        if buf[4] != VERSION {
            bail!("unsupported xpak version {}", buf[4]);
        }
        let method = Method::try_from(buf[5]).with_context(|| format!("unknown method id {}", buf[5]))?;
        let byte_order = match buf[9] {
            0 => ByteOrder::Little,
            1 => ByteOrder::Big,
            other => bail!("invalid byte order flag {other}"),
        };
        let word = |i: usize| {
            let at = 12 + 4 * i;
            u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
        };
        Ok(Self {
            method,
            level: buf[6],
            filter_id: buf[7],
            cto: buf[8],
            byte_order,
            block_size: word(0),
            u_len: word(1),
            c_len: word(2),
            u_adler: word(3),
            c_adler: word(4),
            addvalue: word(5),
            filter_len: word(6),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            method: Method::Lzma,
            level: 9,
            filter_id: 0x23,
            cto: 0x7f,
            byte_order: ByteOrder::Big,
            block_size: 512 * 1024,
            u_len: 1_000_000,
            c_len: 321_000,
            u_adler: 0xdead_beef,
            c_adler: 0x0102_0304,
            addvalue: 0x40_0000,
            filter_len: 77,
        }
    }

    #[test]
    fn layout() {
        let b = sample().to_bytes();
        assert_eq!(&b[0..4], b"XPAK");
        assert_eq!(b[5], 14);
        assert_eq!(b[9], 1);
        assert_eq!(&b[16..20], &1_000_000u32.to_le_bytes());
        assert_eq!(&b[36..40], &77u32.to_le_bytes());
        assert_eq!(Envelope::from_bytes(&b).unwrap(), sample());
    }

    #[test]
    fn rejects_foreign_headers() {
        let mut b = sample().to_bytes();
        b[0] = b'Z';
        assert!(Envelope::from_bytes(&b).is_err());

        let mut b = sample().to_bytes();
        b[5] = 1;
        assert!(Envelope::from_bytes(&b).is_err());

        let mut b = sample().to_bytes();
        b[9] = 2;
        assert!(Envelope::from_bytes(&b).is_err());
    }
}
