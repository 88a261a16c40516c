//! The boundary between the manual-signaling core and whatever real-time
//! engine actually moves bytes between the two peers.
//!
//! The core never looks inside a [`SessionDescription`] and never frames
//! channel payloads itself; it drives an implementation of [`PeerTransport`]
//! and reacts to the events delivered to its [`ChannelEventSink`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

mod description;
pub mod loopback;
mod stats;

pub use description::{DescriptionKind, SessionDescription};
pub use loopback::{LoopbackNetwork, LoopbackPeer};
pub use stats::{StatsEntry, StatsSnapshot};

/// Payload delivered on (or queued for) a data channel.
///
/// The variant is decided by the transport when the message arrives; the
/// receiving side never sniffs bytes to guess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
}

impl ChannelMessage {
    pub fn len(&self) -> usize {
        match self {
            ChannelMessage::Text(text) => text.len(),
            ChannelMessage::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, ChannelMessage::Binary(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send on closed channel (state: {0})")]
    SendOnClosedChannel(ChannelState),
    #[error("malformed session description: {0}")]
    MalformedDescription(String),
    #[error("statistics unavailable: {0}")]
    StatsUnavailable(String),
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("transport closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A bidirectional message channel owned by the transport.
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn state(&self) -> ChannelState;

    /// Queue a message for delivery. Returns once the message is enqueued,
    /// not when the peer has received it.
    fn send(&self, message: ChannelMessage) -> TransportResult<()>;
}

/// Receiver of channel events. The transport calls into it from its own
/// event context, so implementations must not block.
#[async_trait]
pub trait ChannelEventSink: Send + Sync {
    async fn on_open(&self, channel: Arc<dyn DataChannel>);

    async fn on_message(&self, message: ChannelMessage);
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create the outgoing data channel. Must happen before the local offer
    /// so the offer negotiates it.
    async fn open_channel(
        &self,
        label: &str,
        sink: Arc<dyn ChannelEventSink>,
    ) -> TransportResult<()>;

    /// Route channels announced by the remote peer to `sink`.
    fn accept_channels(&self, sink: Arc<dyn ChannelEventSink>);

    /// Create an offer and install it as the local description. The result
    /// already carries every gathered candidate.
    async fn create_local_offer(&self) -> TransportResult<SessionDescription>;

    /// Create an answer and install it as the local description.
    async fn create_local_answer(&self) -> TransportResult<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> TransportResult<()>;

    async fn stats_snapshot(&self) -> TransportResult<StatsSnapshot>;

    async fn close(&self) -> TransportResult<()>;
}
