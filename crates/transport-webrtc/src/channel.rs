use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use peer_transport::{
    ChannelEventSink, ChannelMessage, ChannelState, DataChannel, TransportError, TransportResult,
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

use crate::WebRtcError;
use crate::chunk::{self, ChunkConfig, Reassembler};
use crate::config::WebRtcConfig;

const BACKPRESSURE_POLL: Duration = Duration::from_millis(5);

/// [`DataChannel`] over an `RTCDataChannel`. `send` only enqueues; a pump
/// task owns the actual writes so callers never wait on SCTP.
pub struct RtcChannel {
    label: String,
    inner: Arc<RTCDataChannel>,
    outbound: mpsc::UnboundedSender<ChannelMessage>,
}

impl DataChannel for RtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> ChannelState {
        channel_state(self.inner.ready_state())
    }

    fn send(&self, message: ChannelMessage) -> TransportResult<()> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(TransportError::SendOnClosedChannel(state));
        }
        trace!(
            target = "webrtc",
            label = %self.label,
            bytes = message.len(),
            binary = message.is_binary(),
            "queueing outbound message"
        );
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Closed)
    }
}

pub(crate) fn channel_state(state: RTCDataChannelState) -> ChannelState {
    match state {
        RTCDataChannelState::Open => ChannelState::Open,
        RTCDataChannelState::Closing => ChannelState::Closing,
        RTCDataChannelState::Closed => ChannelState::Closed,
        _ => ChannelState::Connecting,
    }
}

/// Install open/message/close handlers on `data_channel` that forward to
/// `sink`, and start the outbound pump.
pub(crate) fn bind_channel(
    data_channel: Arc<RTCDataChannel>,
    sink: Arc<dyn ChannelEventSink>,
    config: &WebRtcConfig,
) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let channel = Arc::new(RtcChannel {
        label: data_channel.label().to_string(),
        inner: Arc::clone(&data_channel),
        outbound: outbound_tx,
    });
    tokio::spawn(pump_outbound(
        Arc::clone(&data_channel),
        outbound_rx,
        config.chunk,
        config.buffered_high_water,
    ));

    let open_sink = Arc::clone(&sink);
    data_channel.on_open(Box::new(move || {
        let channel = Arc::clone(&channel);
        let open_sink = Arc::clone(&open_sink);
        Box::pin(async move {
            info!(target = "webrtc", label = %channel.label, "data channel open");
            open_sink.on_open(channel).await;
        })
    }));

    let label = data_channel.label().to_string();
    data_channel.on_close(Box::new(move || {
        let label = label.clone();
        Box::pin(async move {
            info!(target = "webrtc", label = %label, "data channel closed");
        })
    }));

    let reassembler = Arc::new(Mutex::new(Reassembler::new(config.chunk)));
    let chunk_config = config.chunk;
    data_channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let sink = Arc::clone(&sink);
        let reassembler = Arc::clone(&reassembler);
        Box::pin(async move {
            if let Some(message) = classify_inbound(msg, &reassembler, &chunk_config) {
                sink.on_message(message).await;
            }
        })
    }));
}

fn classify_inbound(
    msg: DataChannelMessage,
    reassembler: &Mutex<Reassembler>,
    config: &ChunkConfig,
) -> Option<ChannelMessage> {
    if msg.is_string {
        return match String::from_utf8(msg.data.to_vec()) {
            Ok(text) => Some(ChannelMessage::Text(text)),
            Err(err) => {
                warn!(target = "webrtc", error = %err, "dropping non-utf8 text message");
                None
            }
        };
    }

    match chunk::decode_chunk(&msg.data, config) {
        Ok(None) => Some(ChannelMessage::Binary(msg.data)),
        Ok(Some(frame)) => match reassembler.lock().ingest(frame, Instant::now()) {
            Ok(completed) => completed.map(ChannelMessage::Binary),
            Err(err) => {
                warn!(target = "webrtc", error = %err, "dropping chunked message");
                None
            }
        },
        Err(err) => {
            warn!(target = "webrtc", error = %err, "dropping malformed chunk frame");
            None
        }
    }
}

async fn pump_outbound(
    data_channel: Arc<RTCDataChannel>,
    mut outbound: mpsc::UnboundedReceiver<ChannelMessage>,
    chunk_config: ChunkConfig,
    high_water: usize,
) {
    while let Some(message) = outbound.recv().await {
        let result = match message {
            ChannelMessage::Text(text) => data_channel
                .send_text(text)
                .await
                .map(|_| ())
                .map_err(WebRtcError::from),
            ChannelMessage::Binary(bytes) => {
                send_framed(&data_channel, &bytes, &chunk_config, high_water).await
            }
        };
        if let Err(err) = result {
            warn!(
                target = "webrtc",
                label = %data_channel.label(),
                error = %err,
                "data channel send failed"
            );
            if data_channel.ready_state() == RTCDataChannelState::Closed {
                break;
            }
        }
    }
    debug!(target = "webrtc", label = %data_channel.label(), "outbound pump finished");
}

async fn send_framed(
    data_channel: &RTCDataChannel,
    payload: &Bytes,
    config: &ChunkConfig,
    high_water: usize,
) -> Result<(), WebRtcError> {
    let msg_id = rand::random::<u128>();
    let frames = chunk::split_message(payload, msg_id, config)?;
    debug!(
        target = "webrtc",
        bytes = payload.len(),
        frames = frames.len(),
        "sending framed binary message"
    );
    for frame in &frames {
        while data_channel.buffered_amount().await > high_water {
            tokio::time::sleep(BACKPRESSURE_POLL).await;
        }
        data_channel.send(&chunk::encode_chunk(frame)).await?;
    }
    Ok(())
}
