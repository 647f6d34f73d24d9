use adler2::Adler32;

/// adler32 of the empty string.
pub const ADLER32_INIT: u32 = 1;

pub fn adler32(buf: &[u8]) -> u32 {
    adler2::adler32_slice(buf)
}

/// Continue a running adler32 over `buf`.
pub fn adler32_update(adler: u32, buf: &[u8]) -> u32 {
    let mut a = Adler32::from_checksum(adler);
    a.write_slice(buf);
    a.checksum()
}
