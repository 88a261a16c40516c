//! In-memory transport: peers created from the same [`LoopbackNetwork`]
//! connect to each other once their descriptions have been exchanged, and
//! channel messages are delivered through tokio queues in order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{
    ChannelEventSink, ChannelMessage, ChannelState, DataChannel, DescriptionKind, PeerTransport,
    SessionDescription, StatsSnapshot, TransportError, TransportResult,
};

const SDP_PREFIX: &str = "loopback:";

#[derive(Default)]
struct NetworkInner {
    next_id: AtomicU64,
    peers: Mutex<HashMap<u64, Weak<PeerInner>>>,
}

/// Shared medium that loopback peers discover each other through.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer(&self) -> LoopbackPeer {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let port = 50_000u16.saturating_add(id as u16);
        let inner = Arc::new(PeerInner {
            id,
            network: Arc::clone(&self.inner),
            state: Mutex::new(PeerState::default()),
            calls: Mutex::new(Vec::new()),
            stats: Mutex::new(Some(StatsSnapshot::single_pair(
                ("host", "127.0.0.1", port),
                ("host", "127.0.0.1", port.saturating_add(1000)),
            ))),
        });
        self.inner
            .peers
            .lock()
            .insert(id, Arc::downgrade(&inner));
        LoopbackPeer { inner }
    }

    fn lookup(&self, id: u64) -> Option<Arc<PeerInner>> {
        lookup(&self.inner, id)
    }
}

fn lookup(network: &NetworkInner, id: u64) -> Option<Arc<PeerInner>> {
    network.peers.lock().get(&id).and_then(Weak::upgrade)
}

#[derive(Default)]
struct PeerState {
    outgoing: Option<(String, Arc<dyn ChannelEventSink>)>,
    acceptor: Option<Arc<dyn ChannelEventSink>>,
    local: Option<SessionDescription>,
    remote_peer: Option<u64>,
    channel: Option<Arc<LoopbackChannel>>,
    closed: bool,
}

struct PeerInner {
    id: u64,
    network: Arc<NetworkInner>,
    state: Mutex<PeerState>,
    calls: Mutex<Vec<&'static str>>,
    stats: Mutex<Option<StatsSnapshot>>,
}

impl PeerInner {
    fn record(&self, call: &'static str) {
        trace!(target = "loopback", peer = self.id, call, "transport call");
        self.calls.lock().push(call);
    }
}

/// One side of a loopback connection.
#[derive(Clone)]
pub struct LoopbackPeer {
    inner: Arc<PeerInner>,
}

impl LoopbackPeer {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Transport operations in the order they were invoked.
    pub fn calls(&self) -> Vec<&'static str> {
        self.inner.calls.lock().clone()
    }

    /// Replace the statistics snapshot; `None` makes the stats call fail.
    pub fn set_stats(&self, stats: Option<StatsSnapshot>) {
        *self.inner.stats.lock() = stats;
    }

    /// The local end of the data channel, once connected.
    pub fn channel(&self) -> Option<Arc<LoopbackChannel>> {
        self.inner.state.lock().channel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    fn network(&self) -> LoopbackNetwork {
        LoopbackNetwork {
            inner: Arc::clone(&self.inner.network),
        }
    }
}

fn parse_peer_id(description: &SessionDescription) -> TransportResult<u64> {
    description
        .sdp
        .trim()
        .strip_prefix(SDP_PREFIX)
        .and_then(|rest| rest.parse::<u64>().ok())
        .ok_or_else(|| {
            TransportError::MalformedDescription(format!(
                "not a loopback {} description",
                description.kind
            ))
        })
}

#[async_trait]
impl PeerTransport for LoopbackPeer {
    async fn open_channel(
        &self,
        label: &str,
        sink: Arc<dyn ChannelEventSink>,
    ) -> TransportResult<()> {
        self.inner.record("open_channel");
        self.inner.state.lock().outgoing = Some((label.to_string(), sink));
        Ok(())
    }

    fn accept_channels(&self, sink: Arc<dyn ChannelEventSink>) {
        self.inner.record("accept_channels");
        self.inner.state.lock().acceptor = Some(sink);
    }

    async fn create_local_offer(&self) -> TransportResult<SessionDescription> {
        self.inner.record("create_local_offer");
        let mut state = self.inner.state.lock();
        if state.local.is_some() {
            return Err(TransportError::Negotiation(
                "local description already set".into(),
            ));
        }
        let offer = SessionDescription::new(
            DescriptionKind::Offer,
            format!("{SDP_PREFIX}{}", self.inner.id),
        );
        state.local = Some(offer.clone());
        Ok(offer)
    }

    async fn create_local_answer(&self) -> TransportResult<SessionDescription> {
        self.inner.record("create_local_answer");
        let mut state = self.inner.state.lock();
        if state.remote_peer.is_none() {
            return Err(TransportError::Negotiation(
                "cannot answer without a remote offer".into(),
            ));
        }
        let answer = SessionDescription::new(
            DescriptionKind::Answer,
            format!("{SDP_PREFIX}{}", self.inner.id),
        );
        state.local = Some(answer.clone());
        Ok(answer)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> TransportResult<()> {
        self.inner.record("set_remote_description");
        let remote_id = parse_peer_id(&description)?;
        let remote = self.network().lookup(remote_id).ok_or_else(|| {
            TransportError::Negotiation(format!("no loopback peer {remote_id}"))
        })?;

        match description.kind {
            DescriptionKind::Offer => {
                let mut state = self.inner.state.lock();
                if state.local.is_some() {
                    return Err(TransportError::Negotiation(
                        "offer received after local description".into(),
                    ));
                }
                state.remote_peer = Some(remote_id);
                Ok(())
            }
            DescriptionKind::Answer => {
                let answers_us = remote.state.lock().remote_peer == Some(self.inner.id);
                {
                    let mut state = self.inner.state.lock();
                    let has_offer = matches!(
                        state.local.as_ref().map(|local| local.kind),
                        Some(DescriptionKind::Offer)
                    );
                    if !has_offer {
                        return Err(TransportError::Negotiation(
                            "answer received without a local offer".into(),
                        ));
                    }
                    if !answers_us {
                        return Err(TransportError::Negotiation(
                            "answer does not belong to this offer".into(),
                        ));
                    }
                    state.remote_peer = Some(remote_id);
                }
                connect(&self.inner, &remote);
                Ok(())
            }
        }
    }

    async fn stats_snapshot(&self) -> TransportResult<StatsSnapshot> {
        self.inner.record("stats_snapshot");
        self.inner
            .stats
            .lock()
            .clone()
            .ok_or_else(|| TransportError::StatsUnavailable("stats disabled for peer".into()))
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner.record("close");
        let mut state = self.inner.state.lock();
        state.closed = true;
        if let Some(channel) = state.channel.as_ref() {
            channel.set_state(ChannelState::Closed);
        }
        Ok(())
    }
}

fn connect(offerer: &Arc<PeerInner>, answerer: &Arc<PeerInner>) {
    let outgoing = offerer.state.lock().outgoing.clone();
    let acceptor = answerer.state.lock().acceptor.clone();
    let (Some((label, offerer_sink)), Some(answerer_sink)) = (outgoing, acceptor) else {
        debug!(
            target = "loopback",
            offerer = offerer.id,
            answerer = answerer.id,
            "connected without a data channel"
        );
        return;
    };

    let shared_state = Arc::new(Mutex::new(ChannelState::Open));
    let (to_answerer, answerer_rx) = mpsc::unbounded_channel();
    let (to_offerer, offerer_rx) = mpsc::unbounded_channel();
    let offerer_end = Arc::new(LoopbackChannel::new(
        label.clone(),
        Arc::clone(&shared_state),
        to_answerer,
    ));
    let answerer_end = Arc::new(LoopbackChannel::new(label, shared_state, to_offerer));
    offerer.state.lock().channel = Some(Arc::clone(&offerer_end));
    answerer.state.lock().channel = Some(Arc::clone(&answerer_end));

    tokio::spawn(async move {
        answerer_sink.on_open(answerer_end).await;
        offerer_sink.on_open(offerer_end).await;
        tokio::spawn(deliver(answerer_rx, answerer_sink));
        tokio::spawn(deliver(offerer_rx, offerer_sink));
    });
}

async fn deliver(
    mut inbound: mpsc::UnboundedReceiver<ChannelMessage>,
    sink: Arc<dyn ChannelEventSink>,
) {
    while let Some(message) = inbound.recv().await {
        sink.on_message(message).await;
    }
}

/// Loopback data channel end. Both ends share one state cell.
pub struct LoopbackChannel {
    label: String,
    state: Arc<Mutex<ChannelState>>,
    outbound: mpsc::UnboundedSender<ChannelMessage>,
    sent: AtomicUsize,
}

impl LoopbackChannel {
    fn new(
        label: String,
        state: Arc<Mutex<ChannelState>>,
        outbound: mpsc::UnboundedSender<ChannelMessage>,
    ) -> Self {
        Self {
            label,
            state,
            outbound,
            sent: AtomicUsize::new(0),
        }
    }

    /// A channel with no peer behind it; everything sent on it shows up on
    /// the returned receiver.
    pub fn detached(
        label: &str,
        state: ChannelState,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self::new(label.to_string(), Arc::new(Mutex::new(state)), tx);
        (Arc::new(channel), rx)
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    /// Number of messages accepted by `send`.
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl DataChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn send(&self, message: ChannelMessage) -> TransportResult<()> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(TransportError::SendOnClosedChannel(state));
        }
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Closed)?;
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        opened: Mutex<Vec<Arc<dyn DataChannel>>>,
        received: Mutex<Vec<ChannelMessage>>,
    }

    #[async_trait]
    impl ChannelEventSink for Recorder {
        async fn on_open(&self, channel: Arc<dyn DataChannel>) {
            self.opened.lock().push(channel);
        }

        async fn on_message(&self, message: ChannelMessage) {
            self.received.lock().push(message);
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn offer_answer_opens_channel_and_delivers_in_order() {
        let network = LoopbackNetwork::new();
        let offerer = network.peer();
        let answerer = network.peer();
        let offerer_events = Arc::new(Recorder::default());
        let answerer_events = Arc::new(Recorder::default());

        offerer
            .open_channel("chat", offerer_events.clone())
            .await
            .expect("open channel");
        answerer.accept_channels(answerer_events.clone());

        let offer = offerer.create_local_offer().await.expect("offer");
        answerer
            .set_remote_description(offer)
            .await
            .expect("remote offer");
        let answer = answerer.create_local_answer().await.expect("answer");
        offerer
            .set_remote_description(answer)
            .await
            .expect("remote answer");

        eventually(|| offerer_events.opened.lock().len() == 1).await;
        let channel = offerer_events.opened.lock()[0].clone();
        assert_eq!(channel.label(), "chat");
        assert_eq!(channel.state(), ChannelState::Open);

        channel
            .send(ChannelMessage::Text("one".into()))
            .expect("send text");
        channel
            .send(ChannelMessage::Binary(Bytes::from_static(b"two")))
            .expect("send binary");

        eventually(|| answerer_events.received.lock().len() == 2).await;
        let received = answerer_events.received.lock().clone();
        assert_eq!(received[0], ChannelMessage::Text("one".into()));
        assert_eq!(received[1], ChannelMessage::Binary(Bytes::from_static(b"two")));
        assert_eq!(
            offerer.calls(),
            vec![
                "open_channel",
                "create_local_offer",
                "set_remote_description"
            ]
        );
    }

    #[tokio::test]
    async fn answer_without_offer_is_rejected() {
        let network = LoopbackNetwork::new();
        let peer = network.peer();
        let other = network.peer();
        let stray = SessionDescription::new(
            DescriptionKind::Answer,
            format!("{SDP_PREFIX}{}", other.id()),
        );
        let err = peer
            .set_remote_description(stray)
            .await
            .expect_err("answer without offer");
        assert!(matches!(err, TransportError::Negotiation(_)));
    }

    #[tokio::test]
    async fn foreign_sdp_is_malformed() {
        let network = LoopbackNetwork::new();
        let peer = network.peer();
        let err = peer
            .set_remote_description(SessionDescription::new(DescriptionKind::Offer, "v=0"))
            .await
            .expect_err("foreign sdp");
        assert!(matches!(err, TransportError::MalformedDescription(_)));
    }

    #[test]
    fn detached_channel_refuses_sends_unless_open() {
        let (channel, mut rx) = LoopbackChannel::detached("chat", ChannelState::Connecting);
        let err = channel
            .send(ChannelMessage::Text("early".into()))
            .expect_err("not open");
        assert!(matches!(
            err,
            TransportError::SendOnClosedChannel(ChannelState::Connecting)
        ));
        assert!(rx.try_recv().is_err());

        channel.set_state(ChannelState::Open);
        channel
            .send(ChannelMessage::Text("late".into()))
            .expect("open send");
        assert_eq!(channel.sent_count(), 1);
        assert_eq!(rx.try_recv().ok(), Some(ChannelMessage::Text("late".into())));
    }

    #[tokio::test]
    async fn stats_can_be_disabled() {
        let network = LoopbackNetwork::new();
        let peer = network.peer();
        assert!(peer.stats_snapshot().await.expect("stats").len() >= 4);
        peer.set_stats(None);
        assert!(matches!(
            peer.stats_snapshot().await,
            Err(TransportError::StatsUnavailable(_))
        ));
    }
}
