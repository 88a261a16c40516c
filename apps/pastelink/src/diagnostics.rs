//! Which network path the connection ended up on, read from the transport's
//! statistics.

use std::fmt;

use peer_transport::{PeerTransport, StatsEntry, StatsSnapshot, TransportError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::console::Terminal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Direct,
    NatAssisted,
    Relayed,
    Unknown,
}

impl PathKind {
    pub fn describe(self) -> &'static str {
        match self {
            PathKind::Relayed => "Using TURN relay",
            PathKind::NatAssisted => "NAT traversal via STUN (srflx)",
            PathKind::Direct => "Local network direct (host)",
            PathKind::Unknown => "Other connection type",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEndpoint {
    pub candidate_type: String,
    pub address: String,
    pub port: u16,
}

impl fmt::Display for CandidateEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.candidate_type, self.address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticResult {
    pub path: PathKind,
    pub local: Option<CandidateEndpoint>,
    pub remote: Option<CandidateEndpoint>,
}

impl DiagnosticResult {
    pub fn unknown() -> Self {
        Self {
            path: PathKind::Unknown,
            local: None,
            remote: None,
        }
    }

    pub fn report_lines(&self) -> Vec<String> {
        let (Some(local), Some(remote)) = (&self.local, &self.remote) else {
            return vec![NO_SELECTED_PAIR.to_string()];
        };
        vec![
            "Connected via:".to_string(),
            format!("Local: {local}"),
            format!("Remote: {remote}"),
            self.path.describe().to_string(),
        ]
    }
}

const NO_SELECTED_PAIR: &str = "No selected candidate pair found";

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("{0}")]
    Unavailable(#[from] TransportError),
    #[error("no selected candidate pair")]
    NoSelectedPair,
    #[error("stats entry {0} is missing or not a candidate")]
    MissingEntry(String),
}

/// Relayed beats NAT-assisted beats direct, whichever side the candidate is
/// on.
pub fn classify(local_type: &str, remote_type: &str) -> PathKind {
    let either = |kind: &str| local_type == kind || remote_type == kind;
    if either("relay") {
        PathKind::Relayed
    } else if either("srflx") {
        PathKind::NatAssisted
    } else if either("host") {
        PathKind::Direct
    } else {
        PathKind::Unknown
    }
}

pub fn resolve(snapshot: &StatsSnapshot) -> Result<DiagnosticResult, DiagnosticsError> {
    let pair_id = snapshot
        .entries()
        .find_map(|(_, entry)| match entry {
            StatsEntry::Transport {
                selected_candidate_pair_id: Some(pair_id),
            } => Some(pair_id.clone()),
            _ => None,
        })
        .ok_or(DiagnosticsError::NoSelectedPair)?;

    let (local_id, remote_id) = match snapshot.get(&pair_id) {
        Some(StatsEntry::CandidatePair {
            local_candidate_id,
            remote_candidate_id,
        }) => (local_candidate_id.clone(), remote_candidate_id.clone()),
        _ => return Err(DiagnosticsError::NoSelectedPair),
    };

    let local = endpoint(snapshot, &local_id)?;
    let remote = endpoint(snapshot, &remote_id)?;
    Ok(DiagnosticResult {
        path: classify(&local.candidate_type, &remote.candidate_type),
        local: Some(local),
        remote: Some(remote),
    })
}

fn endpoint(snapshot: &StatsSnapshot, id: &str) -> Result<CandidateEndpoint, DiagnosticsError> {
    match snapshot.get(id) {
        Some(StatsEntry::Candidate {
            candidate_type,
            address,
            port,
        }) => Ok(CandidateEndpoint {
            candidate_type: candidate_type.clone(),
            address: address.clone(),
            port: *port,
        }),
        _ => Err(DiagnosticsError::MissingEntry(id.to_string())),
    }
}

pub async fn inspect(transport: &dyn PeerTransport) -> Result<DiagnosticResult, DiagnosticsError> {
    let snapshot = transport.stats_snapshot().await?;
    resolve(&snapshot)
}

/// Inspect the path and print what was found. Never fails: anything that
/// goes wrong is printed and reported as [`PathKind::Unknown`].
pub async fn describe(transport: &dyn PeerTransport, terminal: &dyn Terminal) -> DiagnosticResult {
    match inspect(transport).await {
        Ok(result) => {
            debug!(target = "diagnostics", path = ?result.path, "connection path resolved");
            for line in result.report_lines() {
                terminal.line(&line);
            }
            result
        }
        Err(DiagnosticsError::NoSelectedPair) => {
            terminal.line(NO_SELECTED_PAIR);
            DiagnosticResult::unknown()
        }
        Err(err) => {
            warn!(target = "diagnostics", error = %err, "connection info unavailable");
            terminal.line(&format!("Failed to get connection info: {err}"));
            DiagnosticResult::unknown()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::CaptureTerminal;
    use peer_transport::LoopbackNetwork;

    #[test]
    fn relay_wins_in_either_position() {
        assert_eq!(classify("relay", "host"), PathKind::Relayed);
        assert_eq!(classify("host", "relay"), PathKind::Relayed);
        assert_eq!(classify("srflx", "relay"), PathKind::Relayed);
    }

    #[test]
    fn srflx_beats_host() {
        assert_eq!(classify("host", "srflx"), PathKind::NatAssisted);
        assert_eq!(classify("srflx", "host"), PathKind::NatAssisted);
    }

    #[test]
    fn host_pair_is_direct_and_others_unknown() {
        assert_eq!(classify("host", "host"), PathKind::Direct);
        assert_eq!(classify("prflx", "prflx"), PathKind::Unknown);
        assert_eq!(classify("", "unspecified"), PathKind::Unknown);
    }

    #[test]
    fn resolves_selected_pair() {
        let snapshot = StatsSnapshot::single_pair(("srflx", "203.0.113.7", 61000), ("host", "192.168.1.4", 5000));
        let result = resolve(&snapshot).unwrap();
        assert_eq!(result.path, PathKind::NatAssisted);
        assert_eq!(
            result.report_lines(),
            vec![
                "Connected via:",
                "Local: srflx 203.0.113.7:61000",
                "Remote: host 192.168.1.4:5000",
                "NAT traversal via STUN (srflx)",
            ]
        );
    }

    #[test]
    fn transport_without_selection_is_no_pair() {
        let snapshot = StatsSnapshot::new().with(
            "T01",
            StatsEntry::Transport {
                selected_candidate_pair_id: None,
            },
        );
        assert!(matches!(resolve(&snapshot), Err(DiagnosticsError::NoSelectedPair)));
    }

    #[test]
    fn dangling_candidate_reference_is_reported() {
        let snapshot = StatsSnapshot::single_pair(("host", "10.0.0.1", 1), ("host", "10.0.0.2", 2));
        let mut entries = StatsSnapshot::new();
        for (id, entry) in snapshot.entries() {
            if id != "R01" {
                entries.insert(id, entry.clone());
            }
        }
        assert!(matches!(resolve(&entries), Err(DiagnosticsError::MissingEntry(id)) if id == "R01"));
    }

    #[tokio::test]
    async fn stats_failure_reports_unknown() {
        let network = LoopbackNetwork::new();
        let peer = network.peer();
        peer.set_stats(None);
        let terminal = CaptureTerminal::new();
        let result = describe(&peer, &terminal).await;
        assert_eq!(result, DiagnosticResult::unknown());
        assert!(terminal.contains("Failed to get connection info:"));
    }

    #[tokio::test]
    async fn missing_pair_prints_notice() {
        let network = LoopbackNetwork::new();
        let peer = network.peer();
        peer.set_stats(Some(StatsSnapshot::new()));
        let terminal = CaptureTerminal::new();
        let result = describe(&peer, &terminal).await;
        assert_eq!(result.path, PathKind::Unknown);
        assert_eq!(terminal.lines(), vec![NO_SELECTED_PAIR.to_string()]);
    }
}
