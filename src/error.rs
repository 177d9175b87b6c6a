//! The adapter's error taxonomy (§7). Each layer owns one [`thiserror`] enum;
//! the dispatcher is the single place that maps these into JSON-RPC error
//! codes, so no other module needs to know the code table.

use thiserror::Error;

/// Errors from the type codec (§4.C): malformed payloads, oversize
/// encodings, and strings that can't be represented as a `CStr`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload too short: need at least {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("CStr value missing NUL terminator within bounds")]
    UnterminatedString,

    #[error("CStr value is not valid UTF-8")]
    InvalidUtf8,

    #[error("CStr value contains an interior NUL byte")]
    InteriorNul,

    #[error("{len} trailing bytes after decoding the declared return type")]
    TrailingBytes { len: usize },

    #[error("encoded argument list is {len} bytes, exceeds the {limit}-byte limit")]
    ArgumentsTooLarge { len: usize, limit: usize },

    #[error("encoded return value is {len} bytes, exceeds the {limit}-byte limit")]
    ReturnTooLarge { len: usize, limit: usize },
}

/// Errors from loading and validating a manifest (§4.D).
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest JSON at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("manifest invalid: {0}")]
    Invalid(String),

    #[error("no tool named {0:?}")]
    UnknownName(String),

    #[error("no tool with tag {0}")]
    UnknownTag(u8),
}

/// Errors from a single serial transaction (§4.E). None of these poison the
/// transactor; the next call may proceed once the supervisor permits.
#[derive(Debug, Error)]
pub enum TransactError {
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("response frame failed CRC-8 verification")]
    CrcMismatch,

    #[error("response frame shorter than the minimum 2 bytes (payload + CRC)")]
    TruncatedResponse,

    #[error("device reported error code {0:#04x}")]
    DeviceError(u8),

    #[error("connection is not ready: {0}")]
    NotReady(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors surfaced at the MCP dispatch boundary (§4.G), after argument
/// coercion but before the JSON-RPC response is assembled.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown tool {0:?}")]
    UnknownTool(String),

    #[error("missing required argument {0:?}")]
    MissingArgument(String),

    #[error("argument {name:?} has the wrong type, expected {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("argument {name:?} is out of range for {ty}: {value}")]
    OutOfRange {
        name: String,
        ty: &'static str,
        value: i64,
    },

    #[error("argument {name:?} contains an interior NUL byte")]
    InteriorNul { name: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transact(#[from] TransactError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("connection is not ready: {0}")]
    NotReady(String),

    #[error("requested timeout {requested_ms}ms exceeds the maximum of {max_ms}ms")]
    TimeoutOutOfRange { requested_ms: u64, max_ms: u64 },
}

/// JSON-RPC 2.0 error codes used by the dispatcher (§4.G, §7).
pub mod jsonrpc_code {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

impl DispatchError {
    /// Maps this error onto the JSON-RPC error code table in §7.
    pub fn jsonrpc_code(&self) -> i32 {
        use jsonrpc_code::*;
        match self {
            DispatchError::UnknownTool(_)
            | DispatchError::MissingArgument(_)
            | DispatchError::TypeMismatch { .. }
            | DispatchError::OutOfRange { .. }
            | DispatchError::InteriorNul { .. }
            | DispatchError::Codec(_)
            | DispatchError::TimeoutOutOfRange { .. } => INVALID_PARAMS,
            DispatchError::Transact(_) | DispatchError::Manifest(_) | DispatchError::NotReady(_) => {
                INTERNAL_ERROR
            }
        }
    }
}

/// Fatal startup failures (§7): bad flags, a port already in use. These are
/// the only errors that terminate the process.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
