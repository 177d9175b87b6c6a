//! Command and response frame shapes (§3): the bytes a [`Frame`] carries
//! once SLIP has stripped its own framing, before and after the trailing
//! CRC-8 is attached or checked.

use crate::wire::crc::{crc8, verify};

/// Sentinel first byte of an error response payload (§3).
pub const ERROR_MARKER: u8 = 0xFF;

/// Builds a command frame: `[tag] [args] [crc]`.
pub fn build_command(tag: u8, args: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(args.len() + 2);
    frame.push(tag);
    frame.extend_from_slice(args);
    let crc = crc8(&frame);
    frame.push(crc);
    frame
}

/// Outcome of validating and splitting a raw response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFrame {
    /// The device reported an error (first payload byte `0xFF`, length 2).
    DeviceError(u8),
    /// A return-value payload (CRC already stripped).
    Payload(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("response frame shorter than the minimum 1 byte (at least a CRC)")]
    Truncated,
    #[error("response frame failed CRC-8 verification")]
    CrcMismatch,
}

/// Validates a raw response frame (post-SLIP-decode, pre-type-decode):
/// checks minimum length and the trailing CRC, then classifies the payload
/// as a device error or a plain return value (§4.E step 4-5).
///
/// A 1-byte frame is a bare CRC over an empty payload — the response to a
/// `void`-returning tool — not a truncated one.
pub fn parse_response(raw: &[u8]) -> Result<ResponseFrame, FrameError> {
    if raw.is_empty() {
        return Err(FrameError::Truncated);
    }
    if !verify(raw) {
        return Err(FrameError::CrcMismatch);
    }
    let payload = &raw[..raw.len() - 1];
    if payload.len() == 2 && payload[0] == ERROR_MARKER {
        Ok(ResponseFrame::DeviceError(payload[1]))
    } else {
        Ok(ResponseFrame::Payload(payload.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_command_appends_tag_and_crc() {
        let frame = build_command(0x01, &[0x05, 0x00]);
        assert_eq!(frame[0], 0x01);
        assert_eq!(&frame[1..3], &[0x05, 0x00]);
        assert_eq!(frame.len(), 4);
        assert!(crc8(&frame[..3]) == frame[3]);
    }

    #[test]
    fn parse_response_rejects_empty_input() {
        assert_eq!(parse_response(&[]), Err(FrameError::Truncated));
    }

    #[test]
    fn parse_response_rejects_bad_crc() {
        let mut raw = vec![0x00, 0x00];
        raw.push(crc8(&raw) ^ 0xFF);
        assert_eq!(parse_response(&raw), Err(FrameError::CrcMismatch));
    }

    #[test]
    fn parse_response_recognizes_device_error() {
        let payload = [ERROR_MARKER, 0x02];
        let mut raw = payload.to_vec();
        raw.push(crc8(&payload));
        assert_eq!(parse_response(&raw), Ok(ResponseFrame::DeviceError(0x02)));
    }

    #[test]
    fn parse_response_returns_plain_payload() {
        let payload = [0x00, 0x00];
        let mut raw = payload.to_vec();
        raw.push(crc8(&payload));
        assert_eq!(
            parse_response(&raw),
            Ok(ResponseFrame::Payload(payload.to_vec()))
        );
    }

    #[test]
    fn empty_payload_is_not_mistaken_for_device_error() {
        let raw = vec![crc8(&[])];
        assert_eq!(parse_response(&raw), Ok(ResponseFrame::Payload(Vec::new())));
    }
}
