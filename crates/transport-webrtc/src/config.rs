use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::chunk::{self, ChunkConfig};

pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Configuration for the WebRTC transport.
#[derive(Clone, Debug)]
pub struct WebRtcConfig {
    /// ICE servers used for candidate gathering. Empty means host
    /// candidates only.
    pub ice_urls: Vec<String>,
    /// Whether the data channel should be ordered
    pub ordered: bool,
    /// Maximum number of retransmissions for unreliable channels
    pub max_retransmits: Option<u16>,
    /// Outbound queue size above which the pump waits before sending more
    pub buffered_high_water: usize,
    pub chunk: ChunkConfig,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_urls: vec![DEFAULT_STUN_URL.to_string()],
            ordered: true,
            max_retransmits: None,
            buffered_high_water: 4 * 1024 * 1024,
            chunk: *chunk::runtime_config(),
        }
    }
}

impl WebRtcConfig {
    pub fn new(ice_urls: Vec<String>) -> Self {
        Self {
            ice_urls,
            ..Default::default()
        }
    }

    /// Host candidates only, for peers on the same network.
    pub fn localhost() -> Self {
        Self::new(Vec::new())
    }

    pub(crate) fn ice_servers(&self) -> Vec<RTCIceServer> {
        if self.ice_urls.is_empty() {
            return Vec::new();
        }
        vec![RTCIceServer {
            urls: self.ice_urls.clone(),
            ..Default::default()
        }]
    }
}
