use serde::{Deserialize, Serialize};

/// Size of one block header in bytes.
///   u_len:u32 + c_len:u32 + method:u8 + filter:u8 + cto:u8 + extra:u8
///   = 4 + 4 + 1 + 1 + 1 + 1 = 12
pub const BLOCK_HEADER_SIZE: usize = 12;

/// Stored in place of `c_len` by the end-of-stream marker: "UPX!" read
/// little-endian. Always written little-endian, whatever the target order.
pub const TERMINAL_MAGIC: u32 = 0x2158_5055;

/// Default raw bytes per block: 512 KiB.
pub const DEFAULT_BLOCK_SIZE: usize = 512 * 1024;

/// Upper bound for the block size option and for headers read back.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// Byte order of the numeric header fields, chosen per target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    fn put_u32(self, v: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    fn get_u32(self, b: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        }
    }
}

// ── Block header ───────────────────────────────────────────────────────────

/// Header preceding every block payload.
///
/// `c_len == u_len` marks a block stored literally. `u_len == 0` marks the
/// end of the stream; no payload follows it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub u_len: u32,
    pub c_len: u32,
    pub method: u8,
    pub filter: u8,
    /// Call-target-origin byte of the filter, 0 when unused.
    pub cto: u8,
    pub extra: u8,
}

impl BlockHeader {
    pub fn terminal() -> Self {
        Self { c_len: TERMINAL_MAGIC, ..Default::default() }
    }

    pub fn is_terminal(&self) -> bool {
        self.u_len == 0
    }

    pub fn is_literal(&self) -> bool {
        !self.is_terminal() && self.c_len == self.u_len
    }

    /// Serialize to exactly `BLOCK_HEADER_SIZE` bytes.
    pub fn to_bytes(&self, order: ByteOrder) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0..4].copy_from_slice(&order.put_u32(self.u_len));
        let c_len = if self.is_terminal() {
            self.c_len.to_le_bytes()
        } else {
            order.put_u32(self.c_len)
        };
        buf[4..8].copy_from_slice(&c_len);
        buf[8] = self.method;
        buf[9] = self.filter;
        buf[10] = self.cto;
        buf[11] = self.extra;
        buf
    }

    /// Deserialize from `BLOCK_HEADER_SIZE` bytes. Field validation is left to
    /// the reader, which knows its limits.
    pub fn from_bytes(buf: &[u8; BLOCK_HEADER_SIZE], order: ByteOrder) -> Self {
        let word = |at: usize| [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
        let u_len = order.get_u32(word(0));
        // u_len == 0 reads the same in both orders; the magic is always le32
        let c_len = if u_len == 0 {
            u32::from_le_bytes(word(4))
        } else {
            order.get_u32(word(4))
        };
        Self {
            u_len,
            c_len,
            method: buf[8],
            filter: buf[9],
            cto: buf[10],
            extra: buf[11],
        }
    }
}
