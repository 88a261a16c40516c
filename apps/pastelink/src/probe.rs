use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use peer_transport::{ChannelMessage, DataChannel, TransportError};
use tracing::{debug, warn};

use crate::console::Terminal;

pub const MIB: usize = 1024 * 1024;
pub const DEFAULT_PROBE_BYTES: usize = 20 * MIB;
const FILLER: u8 = b'x';

/// Local send-side throughput check.
///
/// Known limitation: `send` only enqueues, so the figure reported is the
/// time to hand the payload to the transport, not the time for it to reach
/// the peer.
#[derive(Debug, Clone, Copy)]
pub struct SpeedProbe {
    size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReport {
    pub bytes: usize,
    pub elapsed: Duration,
    /// MiB per second.
    pub throughput: f64,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sent {} in {:.2} seconds ({:.2} MB/s)",
            size_label(self.bytes),
            self.elapsed.as_secs_f64(),
            self.throughput
        )
    }
}

/// MiB per second; zero when no measurable time elapsed.
pub fn throughput(bytes: usize, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds > 0.0 {
        bytes as f64 / MIB as f64 / seconds
    } else {
        0.0
    }
}

fn size_label(bytes: usize) -> String {
    if bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{:.2}MB", bytes as f64 / MIB as f64)
    }
}

impl SpeedProbe {
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    pub fn run(
        &self,
        channel: &dyn DataChannel,
        terminal: &dyn Terminal,
    ) -> Result<ProbeReport, TransportError> {
        terminal.line(&format!(
            "Starting speed test: sending {} of data...",
            size_label(self.size)
        ));
        let payload = Bytes::from(vec![FILLER; self.size]);

        let started = Instant::now();
        let sent = channel.send(ChannelMessage::Binary(payload));
        let elapsed = started.elapsed();

        if let Err(err) = sent {
            warn!(target = "probe", error = %err, "speed test payload rejected");
            terminal.line(&format!("Speed test failed: {err}"));
            return Err(err);
        }

        let report = ProbeReport {
            bytes: self.size,
            elapsed,
            throughput: throughput(self.size, elapsed),
        };
        debug!(
            target = "probe",
            bytes = report.bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "speed test payload queued"
        );
        terminal.line(&report.to_string());
        Ok(report)
    }
}
