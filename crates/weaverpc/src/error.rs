//! # Error Definitions
//!
//! Failures of the envelope protocol itself. These are distinct from handler
//! failures, which travel inside a `Reply::Error` and never surface here.

/// Operational failures while encoding or decoding protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A message could not be serialized.
    Encode(String),
    /// The bytes were not a well-formed message of the expected shape.
    Decode(String),
    /// The request tag does not name any known capability.
    UnknownRequest(String),
    /// A textual HRL did not have the `hrl://<dna>/<resource>` shape.
    InvalidHrl(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "Failed to encode message: {}", msg),
            Self::Decode(msg) => write!(f, "Failed to decode message: {}", msg),
            Self::UnknownRequest(tag) => write!(f, "Unknown request type '{}'", tag),
            Self::InvalidHrl(raw) => write!(f, "Invalid HRL '{}'", raw),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
