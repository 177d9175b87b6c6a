//! Primitive wire types and their little-endian encoding (§4.C).
//!
//! `i16`/`i32` encode as two's-complement little-endian integers, `CStr` as
//! UTF-8 followed by a single NUL terminator, and `void` as zero bytes.
//! Parameter lists are the concatenation of each parameter's encoding in
//! declaration order, with no delimiters or length prefixes — the decoder
//! walks the same type list the encoder used.

use crate::error::CodecError;
use serde::{Deserialize, Serialize};

/// Maximum encoded argument-list length (§4.C): one byte reserved for the
/// tag plus one for the trailing CRC leaves 253 of the 256-byte frame.
pub const MAX_ARGS_LEN: usize = 253;
/// Maximum encoded return-value length (§4.C): the trailing CRC leaves 254
/// of the 256-byte frame, and there is no leading tag on a response.
pub const MAX_RETURN_LEN: usize = 254;

/// The closed set of wire-representable types (§3). `Void` is only valid as
/// a return type, standing for "no payload".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireType {
    I16,
    I32,
    CStr,
    Void,
}

impl WireType {
    /// JSON Schema primitive type name used in `tools/list` (§4.G).
    pub fn json_schema_type(self) -> &'static str {
        match self {
            WireType::I16 | WireType::I32 => "integer",
            WireType::CStr => "string",
            WireType::Void => "null",
        }
    }
}

/// A decoded wire value, tagged by the type that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    I16(i16),
    I32(i32),
    CStr(String),
    Void,
}

impl WireValue {
    pub fn wire_type(&self) -> WireType {
        match self {
            WireValue::I16(_) => WireType::I16,
            WireValue::I32(_) => WireType::I32,
            WireValue::CStr(_) => WireType::CStr,
            WireValue::Void => WireType::Void,
        }
    }

    /// Renders the value as MCP result text (§4.G): decimal for integers,
    /// the raw string for `CStr`, and a fixed phrase for `void`.
    pub fn render_text(&self) -> String {
        match self {
            WireValue::I16(v) => v.to_string(),
            WireValue::I32(v) => v.to_string(),
            WireValue::CStr(s) => s.clone(),
            WireValue::Void => "Command executed successfully".to_string(),
        }
    }

    /// Appends this value's wire encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            WireValue::I16(v) => {
                out.extend_from_slice(&v.to_le_bytes());
                Ok(())
            }
            WireValue::I32(v) => {
                out.extend_from_slice(&v.to_le_bytes());
                Ok(())
            }
            WireValue::CStr(s) => {
                if s.as_bytes().contains(&0x00) {
                    return Err(CodecError::InteriorNul);
                }
                out.extend_from_slice(s.as_bytes());
                out.push(0x00);
                Ok(())
            }
            WireValue::Void => Ok(()),
        }
    }

    #[cfg(test)]
    fn encode_to_vec(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }
}

/// Decodes a single value of `ty` from the front of `input`, returning the
/// value and the number of bytes consumed.
pub fn decode_one(ty: WireType, input: &[u8]) -> Result<(WireValue, usize), CodecError> {
    match ty {
        WireType::I16 => {
            if input.len() < 2 {
                return Err(CodecError::Truncated {
                    needed: 2,
                    have: input.len(),
                });
            }
            let v = i16::from_le_bytes([input[0], input[1]]);
            Ok((WireValue::I16(v), 2))
        }
        WireType::I32 => {
            if input.len() < 4 {
                return Err(CodecError::Truncated {
                    needed: 4,
                    have: input.len(),
                });
            }
            let v = i32::from_le_bytes([input[0], input[1], input[2], input[3]]);
            Ok((WireValue::I32(v), 4))
        }
        WireType::CStr => {
            let nul_pos = input
                .iter()
                .position(|&b| b == 0x00)
                .ok_or(CodecError::UnterminatedString)?;
            let s = std::str::from_utf8(&input[..nul_pos])
                .map_err(|_| CodecError::InvalidUtf8)?
                .to_string();
            Ok((WireValue::CStr(s), nul_pos + 1))
        }
        WireType::Void => Ok((WireValue::Void, 0)),
    }
}

/// Encodes an ordered parameter list, enforcing the §4.C size limit before
/// any I/O is attempted.
pub fn encode_params(values: &[WireValue]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    for v in values {
        v.encode(&mut out)?;
    }
    if out.len() > MAX_ARGS_LEN {
        return Err(CodecError::ArgumentsTooLarge {
            len: out.len(),
            limit: MAX_ARGS_LEN,
        });
    }
    Ok(out)
}

/// Decodes the return payload for a tool whose return type is `ty`.
/// `None` denotes `void`. Fails if trailing bytes remain after the declared
/// type has been consumed, or if the payload exceeds the §4.C size limit.
pub fn decode_return(ty: Option<WireType>, payload: &[u8]) -> Result<WireValue, CodecError> {
    if payload.len() > MAX_RETURN_LEN {
        return Err(CodecError::ReturnTooLarge {
            len: payload.len(),
            limit: MAX_RETURN_LEN,
        });
    }
    let ty = ty.unwrap_or(WireType::Void);
    let (value, consumed) = decode_one(ty, payload)?;
    if consumed != payload.len() {
        return Err(CodecError::TrailingBytes {
            len: payload.len() - consumed,
        });
    }
    Ok(value)
}
