//! Sealing of session descriptions into text tokens the operators paste to
//! each other.

mod envelope;
mod key;

use std::fmt;

use thiserror::Error;

pub use envelope::SignalingCodec;
pub use key::{KEY_LEN, SignalingKey};

/// Why a token could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeFault {
    Empty,
    Encoding,
    Truncated,
    /// Wrong key and tampering look the same from here.
    Authentication,
    Utf8,
}

impl fmt::Display for EnvelopeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            EnvelopeFault::Empty => "token is empty",
            EnvelopeFault::Encoding => "token is not valid base64",
            EnvelopeFault::Truncated => "token is too short",
            EnvelopeFault::Authentication => "authentication failed (wrong key or modified token)",
            EnvelopeFault::Utf8 => "payload is not utf-8",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(EnvelopeFault),
    #[error("invalid signaling key: {0}")]
    InvalidKey(String),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("sealing failed: {0}")]
    Seal(String),
    #[error("malformed session description: {0}")]
    MalformedDescription(String),
}

impl SignalingError {
    pub fn is_invalid_envelope(&self) -> bool {
        matches!(self, SignalingError::InvalidEnvelope(_))
    }
}
