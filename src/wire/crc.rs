//! CRC-8-CCITT (poly 0x07, init 0x00, no final XOR, MSB-first).
//!
//! The checksum appears as the trailing byte of every command and response
//! frame on the wire (see [`crate::wire::frame`]). It is computed the same
//! way on both ends, so a response with a corrupted CRC is distinguishable
//! from one that is merely short.

const POLY: u8 = 0x07;

/// Computes CRC-8 over `bytes`, matching the firmware's bit-banged reference
/// implementation byte-for-byte.
pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc: u8 = 0x00;
    for &b in bytes {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Returns `true` if the last byte of `framed` is the correct CRC-8 of the
/// bytes preceding it. `framed` must contain at least one byte.
pub fn verify(framed: &[u8]) -> bool {
    match framed.split_last() {
        Some((crc, body)) => crc8(body) == *crc,
        None => false,
    }
}
