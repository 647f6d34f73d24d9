use std::fmt;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Compression method stored in every block header.
///
/// The NRV family is split by variant (B/D/E) and by the width of the bit
/// buffer the decoder refills (8-bit, little-endian 16-bit, little-endian
/// 32-bit). The id is part of the wire format and never changes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Nrv2bLe32 = 2,
    Nrv2b8 = 3,
    Nrv2bLe16 = 4,
    Nrv2dLe32 = 5,
    Nrv2d8 = 6,
    Nrv2dLe16 = 7,
    #[default]
    Nrv2eLe32 = 8,
    Nrv2e8 = 9,
    Nrv2eLe16 = 10,
    Lzma = 14,
    Deflate = 15,
    Zstd = 16,
    Bzip2 = 17,
}

impl Method {
    pub const ALL: [Method; 13] = [
        Method::Nrv2bLe32,
        Method::Nrv2b8,
        Method::Nrv2bLe16,
        Method::Nrv2dLe32,
        Method::Nrv2d8,
        Method::Nrv2dLe16,
        Method::Nrv2eLe32,
        Method::Nrv2e8,
        Method::Nrv2eLe16,
        Method::Lzma,
        Method::Deflate,
        Method::Zstd,
        Method::Bzip2,
    ];

    pub fn id(self) -> u8 {
        self.into()
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Nrv2bLe32 => "nrv2b_le32",
            Method::Nrv2b8 => "nrv2b8",
            Method::Nrv2bLe16 => "nrv2b_le16",
            Method::Nrv2dLe32 => "nrv2d_le32",
            Method::Nrv2d8 => "nrv2d8",
            Method::Nrv2dLe16 => "nrv2d_le16",
            Method::Nrv2eLe32 => "nrv2e_le32",
            Method::Nrv2e8 => "nrv2e8",
            Method::Nrv2eLe16 => "nrv2e_le16",
            Method::Lzma => "lzma",
            Method::Deflate => "deflate",
            Method::Zstd => "zstd",
            Method::Bzip2 => "bzip2",
        }
    }

    pub fn is_nrv(self) -> bool {
        self.id() <= Method::Nrv2eLe16.id()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Method::ALL.iter().map(|m| m.name()).collect();
                format!("unknown method '{}'; expected one of {}", s, names.join(", "))
            })
    }
}
