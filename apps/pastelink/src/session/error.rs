use peer_transport::TransportError;
use thiserror::Error;

use super::SessionState;
use crate::signaling::{EnvelopeFault, SignalingError};

/// Fatal session failures. Any of these ends the process.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(EnvelopeFault),
    #[error("malformed session description: {0}")]
    MalformedDescription(String),
    #[error("signaling failed: {0}")]
    Signaling(SignalingError),
    #[error("transport error: {0}")]
    Transport(TransportError),
    #[error("operator input closed before the peer token arrived")]
    InputClosed,
    #[error("session cannot move from {from} to {to}")]
    OutOfOrder {
        from: SessionState,
        to: SessionState,
    },
}

impl From<SignalingError> for SessionError {
    fn from(err: SignalingError) -> Self {
        match err {
            SignalingError::InvalidEnvelope(fault) => SessionError::InvalidEnvelope(fault),
            SignalingError::MalformedDescription(reason) => {
                SessionError::MalformedDescription(reason)
            }
            other => SessionError::Signaling(other),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::MalformedDescription(reason) => {
                SessionError::MalformedDescription(reason)
            }
            other => SessionError::Transport(other),
        }
    }
}
