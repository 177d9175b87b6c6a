//! The binary wire-protocol stack (§4.A-C): CRC-8, SLIP framing, and the
//! primitive type codec. Everything here is pure and synchronous; I/O lives
//! in [`crate::transport`].

pub mod crc;
pub mod frame;
pub mod slip;
pub mod types;
