use xpak_core::{CodecError, DecodeBuffer};

use super::bits::{BitReader, BitWidth};
use super::Variant;

/// Largest gamma value an offset may carry: 24 bits of high offset plus the
/// reserved codes 2 (repeat) and the end marker.
const OFFSET_GAMMA_LIMIT: u32 = 0x00ff_ffff + 3;
const LENGTH_GAMMA_LIMIT: u32 = 0x7fff_ffff;

pub(crate) fn decode(io: &mut dyn DecodeBuffer, variant: Variant, width: BitWidth) -> Result<(), CodecError> {
    let mut bits = BitReader::new(width);
    let mut last_off = 1usize;

    loop {
        while bits.get_bit(io)? == 1 {
            let b = io.read_byte()?;
            io.push_byte(b)?;
        }

        let (dist, h) = match variant {
            Variant::B => {
                let m = bits.get_gamma_ss11(io, OFFSET_GAMMA_LIMIT, CodecError::LookbehindOverrun)?;
                if m != 2 {
                    let v = ((m - 3) << 8) | io.read_byte()? as u32;
                    if v == u32::MAX {
                        return Ok(());
                    }
                    last_off = v as usize + 1;
                }
                (last_off, 0)
            }
            Variant::D | Variant::E => {
                let m = bits.get_gamma_ss12(io, OFFSET_GAMMA_LIMIT, CodecError::LookbehindOverrun)?;
                if m == 2 {
                    (last_off, bits.get_bit(io)?)
                } else {
                    let v = ((m - 3) << 8) | io.read_byte()? as u32;
                    if v == u32::MAX {
                        return Ok(());
                    }
                    last_off = (v >> 1) as usize + 1;
                    (last_off, !v & 1)
                }
            }
        };

        let mut len = match variant {
            Variant::B => {
                let l = bits.get_bit(io)? * 2 + bits.get_bit(io)?;
                if l == 0 {
                    bits.get_gamma_ss11(io, LENGTH_GAMMA_LIMIT, CodecError::OutputOverrun)? + 2
                } else {
                    l
                }
            }
            Variant::D => {
                let l = h * 2 + bits.get_bit(io)?;
                if l == 0 {
                    bits.get_gamma_ss11(io, LENGTH_GAMMA_LIMIT, CodecError::OutputOverrun)? + 2
                } else {
                    l
                }
            }
            Variant::E => {
                if h == 1 {
                    1 + bits.get_bit(io)?
                } else if bits.get_bit(io)? == 1 {
                    3 + bits.get_bit(io)?
                } else {
                    bits.get_gamma_ss11(io, LENGTH_GAMMA_LIMIT, CodecError::OutputOverrun)? + 3
                }
            }
        } as usize;
        len += (dist > variant.far_threshold()) as usize;
        io.copy_match(dist, len + 1)?;
    }
}
