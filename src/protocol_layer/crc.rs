//! The CRC-32 that protects every PD packet, see [5.6.2].
//!
//! Reflected polynomial 0x04C11DB7, initial value 0xFFFFFFFF, final inversion. The CRC is
//! sent least-significant byte first, after the last data object.

const POLYNOMIAL: u32 = 0xEDB8_8320;

/// Compute the CRC over a byte stream.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;

    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLYNOMIAL } else { crc >> 1 };
        }
    }

    !crc
}
