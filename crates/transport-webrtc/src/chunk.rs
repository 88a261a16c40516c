//! Framing for binary messages that exceed what a single SCTP message may
//! carry. Each frame is `version | msg_id | seq | total | payload`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::warn;

pub const CHUNK_VERSION: u8 = 0xC1;
const HEADER_LEN: usize = 1 + 16 + 4 + 4;
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 16 * 1024;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_GC_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_INFLIGHT: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkConfig {
    pub max_chunk_bytes: usize,
    pub max_message_bytes: usize,
    pub max_inflight: usize,
    pub gc_timeout: Duration,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            gc_timeout: DEFAULT_GC_TIMEOUT,
        }
    }
}

impl ChunkConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_chunk_bytes: parse_usize_env(
                "PASTELINK_WEBRTC_MAX_CHUNK_BYTES",
                defaults.max_chunk_bytes,
                HEADER_LEN + 1,
            ),
            max_message_bytes: parse_usize_env(
                "PASTELINK_WEBRTC_MAX_MESSAGE_BYTES",
                defaults.max_message_bytes,
                HEADER_LEN + 1,
            ),
            ..defaults
        }
    }

    pub fn payload_capacity(&self) -> usize {
        self.max_chunk_bytes.saturating_sub(HEADER_LEN).max(1)
    }

    pub fn max_chunks(&self) -> usize {
        self.max_message_bytes.div_ceil(self.payload_capacity())
    }
}

pub fn runtime_config() -> &'static ChunkConfig {
    static CONFIG: Lazy<ChunkConfig> = Lazy::new(ChunkConfig::from_env);
    &CONFIG
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("message exceeds max size: {0} bytes")]
    MessageTooLarge(usize),
    #[error("chunk frame too large: {0} bytes")]
    ChunkTooLarge(usize),
    #[error("chunk frame malformed: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    pub msg_id: u128,
    pub seq: u32,
    pub total: u32,
    pub payload: Bytes,
}

#[derive(Debug)]
struct PartialMessage {
    created_at: Instant,
    total: u32,
    chunks: Vec<Option<Bytes>>,
    received: u32,
    received_bytes: usize,
}

impl PartialMessage {
    fn new(total: u32, created_at: Instant) -> Self {
        Self {
            created_at,
            total,
            chunks: vec![None; total as usize],
            received: 0,
            received_bytes: 0,
        }
    }

    fn assemble(&self) -> Result<Bytes, ChunkError> {
        let mut combined = Vec::with_capacity(self.received_bytes);
        for chunk in &self.chunks {
            let chunk = chunk
                .as_ref()
                .ok_or(ChunkError::Malformed("missing chunk during reassembly"))?;
            combined.extend_from_slice(chunk);
        }
        Ok(Bytes::from(combined))
    }
}

/// Collects frames per message id and yields the payload once every
/// sequence number has arrived. Duplicate frames are ignored.
pub struct Reassembler {
    partials: HashMap<u128, PartialMessage>,
    config: ChunkConfig,
}

impl Reassembler {
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            partials: HashMap::new(),
            config,
        }
    }

    pub fn pending(&self) -> usize {
        self.partials.len()
    }

    pub fn ingest(&mut self, frame: ChunkFrame, now: Instant) -> Result<Option<Bytes>, ChunkError> {
        validate_chunk_bounds(&frame, &self.config)?;
        if frame.total == 1 {
            return Ok(Some(frame.payload));
        }

        self.gc(now);
        if !self.partials.contains_key(&frame.msg_id)
            && self.partials.len() >= self.config.max_inflight
        {
            self.evict_oldest();
        }

        let ChunkFrame {
            msg_id,
            seq,
            total,
            payload,
        } = frame;
        let entry = self
            .partials
            .entry(msg_id)
            .or_insert_with(|| PartialMessage::new(total, now));

        if entry.total != total {
            self.partials.remove(&msg_id);
            return Err(ChunkError::Malformed("chunk total changed for message"));
        }

        let slot = &mut entry.chunks[seq as usize];
        if slot.is_none() {
            entry.received += 1;
            entry.received_bytes = entry.received_bytes.saturating_add(payload.len());
            *slot = Some(payload);
        }

        if entry.received_bytes > self.config.max_message_bytes {
            let size = entry.received_bytes;
            self.partials.remove(&msg_id);
            return Err(ChunkError::MessageTooLarge(size));
        }

        if entry.received < entry.total {
            return Ok(None);
        }
        let assembled = entry.assemble();
        self.partials.remove(&msg_id);
        assembled.map(Some)
    }

    /// Drop partial messages older than the configured timeout.
    pub fn gc(&mut self, now: Instant) -> usize {
        let timeout = self.config.gc_timeout;
        let before = self.partials.len();
        self.partials.retain(|msg_id, partial| {
            let expired = now.saturating_duration_since(partial.created_at) > timeout;
            if expired {
                warn!(
                    target = "webrtc::chunk",
                    msg_id = %msg_id,
                    received = partial.received,
                    total = partial.total,
                    "dropping incomplete message"
                );
            }
            !expired
        });
        before - self.partials.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .partials
            .iter()
            .min_by_key(|(_, partial)| partial.created_at)
            .map(|(msg_id, _)| *msg_id);
        if let Some(msg_id) = oldest {
            warn!(target = "webrtc::chunk", msg_id = %msg_id, "evicting partial message at capacity");
            self.partials.remove(&msg_id);
        }
    }
}

pub fn split_message(
    payload: &[u8],
    msg_id: u128,
    config: &ChunkConfig,
) -> Result<Vec<ChunkFrame>, ChunkError> {
    if payload.len() > config.max_message_bytes {
        return Err(ChunkError::MessageTooLarge(payload.len()));
    }
    if payload.is_empty() {
        return Ok(vec![ChunkFrame {
            msg_id,
            seq: 0,
            total: 1,
            payload: Bytes::new(),
        }]);
    }

    let pieces: Vec<&[u8]> = payload.chunks(config.payload_capacity()).collect();
    if pieces.len() > config.max_chunks() {
        return Err(ChunkError::MessageTooLarge(payload.len()));
    }
    let total =
        u32::try_from(pieces.len()).map_err(|_| ChunkError::Malformed("chunk total overflow"))?;

    Ok(pieces
        .into_iter()
        .zip(0u32..)
        .map(|(piece, seq)| ChunkFrame {
            msg_id,
            seq,
            total,
            payload: Bytes::copy_from_slice(piece),
        })
        .collect())
}

pub fn encode_chunk(frame: &ChunkFrame) -> Bytes {
    let mut buf = Vec::with_capacity(HEADER_LEN.saturating_add(frame.payload.len()));
    buf.push(CHUNK_VERSION);
    buf.extend_from_slice(&frame.msg_id.to_be_bytes());
    buf.extend_from_slice(&frame.seq.to_be_bytes());
    buf.extend_from_slice(&frame.total.to_be_bytes());
    buf.extend_from_slice(&frame.payload);
    Bytes::from(buf)
}

/// `Ok(None)` means the bytes are not a chunk frame at all and should be
/// delivered as they are.
pub fn decode_chunk(bytes: &Bytes, config: &ChunkConfig) -> Result<Option<ChunkFrame>, ChunkError> {
    if bytes.first().copied() != Some(CHUNK_VERSION) {
        return Ok(None);
    }
    if bytes.len() < HEADER_LEN {
        return Err(ChunkError::Malformed("chunk frame too short"));
    }
    if bytes.len() > config.max_chunk_bytes {
        return Err(ChunkError::ChunkTooLarge(bytes.len()));
    }
    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(&bytes[1..17]);
    let mut seq_bytes = [0u8; 4];
    seq_bytes.copy_from_slice(&bytes[17..21]);
    let mut total_bytes = [0u8; 4];
    total_bytes.copy_from_slice(&bytes[21..25]);

    let frame = ChunkFrame {
        msg_id: u128::from_be_bytes(id_bytes),
        seq: u32::from_be_bytes(seq_bytes),
        total: u32::from_be_bytes(total_bytes),
        payload: bytes.slice(HEADER_LEN..),
    };
    validate_chunk_bounds(&frame, config)?;
    Ok(Some(frame))
}

fn validate_chunk_bounds(frame: &ChunkFrame, config: &ChunkConfig) -> Result<(), ChunkError> {
    if frame.total == 0 {
        return Err(ChunkError::Malformed("chunk total cannot be zero"));
    }
    if frame.seq >= frame.total {
        return Err(ChunkError::Malformed("chunk seq out of range"));
    }
    if frame.payload.len() > config.payload_capacity() {
        return Err(ChunkError::ChunkTooLarge(frame.payload.len()));
    }
    if frame.total as usize > config.max_chunks() {
        return Err(ChunkError::MessageTooLarge(
            frame.total as usize * config.payload_capacity(),
        ));
    }
    Ok(())
}

fn parse_usize_env(var: &str, default: usize, min: usize) -> usize {
    match std::env::var(var) {
        Ok(value) => match value.trim().parse::<usize>() {
            Ok(parsed) if parsed >= min => parsed,
            Ok(parsed) => {
                warn!(
                    target = "webrtc::chunk",
                    var, parsed, min, default, "chunk config below minimum; using default"
                );
                default
            }
            Err(err) => {
                warn!(
                    target = "webrtc::chunk",
                    var,
                    error = %err,
                    default,
                    "failed to parse chunk config from env; using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{seq::SliceRandom, thread_rng};

    fn small_config() -> ChunkConfig {
        ChunkConfig {
            max_chunk_bytes: HEADER_LEN + 8,
            max_message_bytes: 1024,
            max_inflight: 4,
            gc_timeout: Duration::from_secs(1),
        }
    }

    fn reassemble(frames: Vec<ChunkFrame>, config: ChunkConfig) -> Option<Bytes> {
        let mut reassembler = Reassembler::new(config);
        let mut recovered = None;
        for frame in frames {
            if let Some(done) = reassembler
                .ingest(frame, Instant::now())
                .expect("ingest chunk")
            {
                recovered = Some(done);
            }
        }
        recovered
    }

    #[test]
    fn twenty_mib_probe_survives_framing() {
        let config = ChunkConfig::default();
        let payload = vec![b'x'; 20 * 1024 * 1024];
        let frames = split_message(&payload, 99, &config).expect("split");
        assert_eq!(frames.len(), payload.len().div_ceil(config.payload_capacity()));

        let mut reassembler = Reassembler::new(config);
        let mut recovered = None;
        for frame in &frames {
            let wire = encode_chunk(frame);
            assert!(wire.len() <= config.max_chunk_bytes);
            let decoded = decode_chunk(&wire, &config)
                .expect("decode")
                .expect("chunk frame");
            if let Some(done) = reassembler.ingest(decoded, Instant::now()).expect("ingest") {
                recovered = Some(done);
            }
        }
        let recovered = recovered.expect("message completed");
        assert_eq!(recovered.len(), payload.len());
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn shuffled_and_duplicated_frames_reassemble() {
        let config = small_config();
        let payload = b"abcdefghijklmnopqrstuvwxyz0123456789".to_vec();
        let frames = split_message(&payload, 42, &config).expect("split");
        assert!(frames.len() > 2);

        let mut shuffled = frames.clone();
        shuffled.shuffle(&mut thread_rng());
        shuffled.insert(1, frames[0].clone());

        assert_eq!(
            reassemble(shuffled, config).as_deref(),
            Some(payload.as_slice())
        );
    }

    #[test]
    fn empty_payload_is_a_single_frame() {
        let config = small_config();
        let frames = split_message(&[], 1, &config).expect("split");
        assert_eq!(frames.len(), 1);
        assert_eq!(reassemble(frames, config), Some(Bytes::new()));
    }

    #[test]
    fn foreign_binary_is_not_a_frame() {
        let config = small_config();
        let raw = Bytes::from_static(b"\x00plain bytes");
        assert_eq!(decode_chunk(&raw, &config), Ok(None));
    }

    #[test]
    fn truncated_header_is_malformed() {
        let config = small_config();
        let raw = Bytes::from_static(&[CHUNK_VERSION, 0, 1]);
        assert!(matches!(
            decode_chunk(&raw, &config),
            Err(ChunkError::Malformed(_))
        ));
    }

    #[test]
    fn oversize_rejected() {
        let config = small_config();
        let payload = vec![0u8; config.max_message_bytes + 1];
        assert!(matches!(
            split_message(&payload, 5, &config),
            Err(ChunkError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn stale_partials_are_collected() {
        let config = ChunkConfig {
            gc_timeout: Duration::from_millis(20),
            ..small_config()
        };
        let mut reassembler = Reassembler::new(config);
        let first = ChunkFrame {
            msg_id: 9,
            seq: 0,
            total: 2,
            payload: Bytes::from_static(b"hello"),
        };
        assert_eq!(reassembler.ingest(first, Instant::now()), Ok(None));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(reassembler.gc(Instant::now()), 1);
        assert_eq!(reassembler.pending(), 0);
    }
}
