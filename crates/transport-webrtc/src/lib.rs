//! [`PeerTransport`] implemented on webrtc-rs.
//!
//! Negotiation is non-trickle: local descriptions are returned only after
//! ICE gathering finished, so one pasted description carries every
//! candidate the peer will need.

use std::sync::Arc;

use async_trait::async_trait;
use peer_transport::{
    ChannelEventSink, DescriptionKind, PeerTransport, SessionDescription, StatsSnapshot,
    TransportError, TransportResult,
};
use thiserror::Error;
use tracing::{debug, info};
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

pub mod channel;
pub mod chunk;
pub mod config;
mod stats;

pub use channel::RtcChannel;
pub use config::WebRtcConfig;

#[derive(Debug, Error)]
pub enum WebRtcError {
    #[error("webrtc error: {0}")]
    Rtc(#[from] webrtc::Error),
    #[error("chunking failed: {0}")]
    Chunk(#[from] chunk::ChunkError),
}

pub struct WebRtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
    config: WebRtcConfig,
}

impl WebRtcTransport {
    pub async fn new(config: WebRtcConfig) -> TransportResult<Self> {
        let api = APIBuilder::new().build();
        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers(),
            ..Default::default()
        };
        let peer_connection = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|err| TransportError::Setup(format!("peer connection: {err}")))?;

        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                Box::pin(async move {
                    info!(target = "webrtc", ?state, "peer connection state changed");
                })
            },
        ));

        Ok(Self {
            peer_connection: Arc::new(peer_connection),
            config,
        })
    }

    /// Install `description` locally and wait until candidate gathering is
    /// complete, then return the final local description.
    async fn set_local_and_gather(
        &self,
        description: RTCSessionDescription,
    ) -> TransportResult<SessionDescription> {
        let mut gathering_complete = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|err| TransportError::Negotiation(format!("set local description: {err}")))?;
        let _ = gathering_complete.recv().await;
        debug!(target = "webrtc", "ice gathering complete");

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| TransportError::Negotiation("local description missing".into()))?;
        from_rtc(local)
    }
}

fn from_rtc(description: RTCSessionDescription) -> TransportResult<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => DescriptionKind::Offer,
        RTCSdpType::Answer => DescriptionKind::Answer,
        other => {
            return Err(TransportError::MalformedDescription(format!(
                "unsupported description type {other}"
            )));
        }
    };
    Ok(SessionDescription::new(kind, description.sdp))
}

fn to_rtc(description: SessionDescription) -> TransportResult<RTCSessionDescription> {
    let parsed = match description.kind {
        DescriptionKind::Offer => RTCSessionDescription::offer(description.sdp),
        DescriptionKind::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(|err| TransportError::MalformedDescription(err.to_string()))
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn open_channel(
        &self,
        label: &str,
        sink: Arc<dyn ChannelEventSink>,
    ) -> TransportResult<()> {
        let init = RTCDataChannelInit {
            ordered: Some(self.config.ordered),
            max_retransmits: self.config.max_retransmits,
            ..Default::default()
        };
        let data_channel = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|err| TransportError::Setup(format!("create data channel: {err}")))?;
        debug!(target = "webrtc", label, "created data channel");
        channel::bind_channel(data_channel, sink, &self.config);
        Ok(())
    }

    fn accept_channels(&self, sink: Arc<dyn ChannelEventSink>) {
        let config = self.config.clone();
        self.peer_connection
            .on_data_channel(Box::new(move |data_channel: Arc<RTCDataChannel>| {
                let sink = Arc::clone(&sink);
                let config = config.clone();
                Box::pin(async move {
                    debug!(
                        target = "webrtc",
                        label = %data_channel.label(),
                        "remote data channel announced"
                    );
                    channel::bind_channel(data_channel, sink, &config);
                })
            }));
    }

    async fn create_local_offer(&self) -> TransportResult<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|err| TransportError::Negotiation(format!("create offer: {err}")))?;
        self.set_local_and_gather(offer).await
    }

    async fn create_local_answer(&self) -> TransportResult<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|err| TransportError::Negotiation(format!("create answer: {err}")))?;
        self.set_local_and_gather(answer).await
    }

    async fn set_remote_description(&self, description: SessionDescription) -> TransportResult<()> {
        let remote = to_rtc(description)?;
        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|err| TransportError::MalformedDescription(err.to_string()))
    }

    async fn stats_snapshot(&self) -> TransportResult<StatsSnapshot> {
        let report = self.peer_connection.get_stats().await;
        Ok(stats::snapshot_from_report(&report))
    }

    async fn close(&self) -> TransportResult<()> {
        self.peer_connection
            .close()
            .await
            .map_err(|err| TransportError::Setup(format!("close: {err}")))
    }
}
