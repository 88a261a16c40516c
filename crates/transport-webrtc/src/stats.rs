use std::time::Instant;

use peer_transport::{StatsEntry, StatsSnapshot};
use webrtc::ice::candidate::CandidatePairState;
use webrtc::stats::{StatsReport, StatsReportType};

/// What decides whether a candidate pair counts as the one in use.
#[derive(Debug, Clone, Copy)]
struct PairStanding<'a> {
    id: &'a str,
    nominated: bool,
    state: CandidatePairState,
    last_received: Instant,
}

/// webrtc-rs transport stats do not name the selected pair. Take the
/// nominated pair whose checks succeeded; among several, the one that most
/// recently received traffic, then the lowest id.
fn selected_pair<'a>(pairs: impl IntoIterator<Item = PairStanding<'a>>) -> Option<&'a str> {
    pairs
        .into_iter()
        .filter(|pair| pair.nominated && pair.state == CandidatePairState::Succeeded)
        .max_by(|a, b| {
            a.last_received
                .cmp(&b.last_received)
                .then_with(|| b.id.cmp(a.id))
        })
        .map(|pair| pair.id)
}

/// Reduce a webrtc-rs report to the boundary snapshot. Every transport entry
/// carries the selected pair; a synthetic `transport` entry is added when the
/// report has a selected pair but no transport stats.
pub(crate) fn snapshot_from_report(report: &StatsReport) -> StatsSnapshot {
    let mut snapshot = StatsSnapshot::new();
    let mut transports = Vec::new();
    let mut standings = Vec::new();

    for (id, entry) in &report.reports {
        match entry {
            StatsReportType::CandidatePair(pair) => {
                standings.push(PairStanding {
                    id: id.as_str(),
                    nominated: pair.nominated,
                    state: pair.state,
                    last_received: pair.last_packet_received_timestamp.into(),
                });
                snapshot.insert(
                    id.clone(),
                    StatsEntry::CandidatePair {
                        local_candidate_id: pair.local_candidate_id.clone(),
                        remote_candidate_id: pair.remote_candidate_id.clone(),
                    },
                );
            }
            StatsReportType::LocalCandidate(candidate)
            | StatsReportType::RemoteCandidate(candidate) => {
                snapshot.insert(
                    id.clone(),
                    StatsEntry::Candidate {
                        candidate_type: candidate.candidate_type.to_string(),
                        address: candidate.ip.clone(),
                        port: candidate.port,
                    },
                );
            }
            StatsReportType::Transport(_) => transports.push(id.clone()),
            _ => snapshot.insert(
                id.clone(),
                StatsEntry::Other {
                    kind: "other".into(),
                },
            ),
        }
    }

    let selected = selected_pair(standings).map(str::to_string);
    if transports.is_empty() && selected.is_some() {
        transports.push("transport".to_string());
    }
    for id in transports {
        snapshot.insert(
            id,
            StatsEntry::Transport {
                selected_candidate_pair_id: selected.clone(),
            },
        );
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn standing(id: &str, nominated: bool, state: CandidatePairState, at: Instant) -> PairStanding<'_> {
        PairStanding {
            id,
            nominated,
            state,
            last_received: at,
        }
    }

    #[test]
    fn nominated_pair_must_have_succeeded() {
        let now = Instant::now();
        let pairs = [
            standing("a-b", true, CandidatePairState::InProgress, now),
            standing("c-d", false, CandidatePairState::Succeeded, now),
        ];
        assert_eq!(selected_pair(pairs), None);

        let pairs = [
            standing("a-b", true, CandidatePairState::InProgress, now),
            standing("e-f", true, CandidatePairState::Succeeded, now),
        ];
        assert_eq!(selected_pair(pairs), Some("e-f"));
    }

    #[test]
    fn choice_among_several_does_not_depend_on_order() {
        let earlier = Instant::now();
        let later = earlier + Duration::from_millis(5);
        let mut pairs = vec![
            standing("x-y", true, CandidatePairState::Succeeded, earlier),
            standing("m-n", true, CandidatePairState::Succeeded, later),
            standing("b-c", true, CandidatePairState::Succeeded, later),
        ];
        assert_eq!(selected_pair(pairs.clone()), Some("b-c"));
        pairs.reverse();
        assert_eq!(selected_pair(pairs), Some("b-c"));
    }
}
