use std::collections::HashMap;

/// One entry of a transport statistics report, reduced to the fields the
/// path diagnostics need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsEntry {
    Transport {
        selected_candidate_pair_id: Option<String>,
    },
    CandidatePair {
        local_candidate_id: String,
        remote_candidate_id: String,
    },
    Candidate {
        candidate_type: String,
        address: String,
        port: u16,
    },
    Other {
        kind: String,
    },
}

impl StatsEntry {
    pub fn kind(&self) -> &str {
        match self {
            StatsEntry::Transport { .. } => "transport",
            StatsEntry::CandidatePair { .. } => "candidate-pair",
            StatsEntry::Candidate { .. } => "candidate",
            StatsEntry::Other { kind } => kind,
        }
    }
}

/// Point-in-time statistics keyed by entry id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    entries: HashMap<String, StatsEntry>,
}

impl StatsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, entry: StatsEntry) {
        self.entries.insert(id.into(), entry);
    }

    pub fn with(mut self, id: impl Into<String>, entry: StatsEntry) -> Self {
        self.insert(id, entry);
        self
    }

    pub fn get(&self, id: &str) -> Option<&StatsEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &StatsEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A snapshot describing one selected pair between two candidates.
    pub fn single_pair(
        local: (&str, &str, u16),
        remote: (&str, &str, u16),
    ) -> Self {
        StatsSnapshot::new()
            .with(
                "T01",
                StatsEntry::Transport {
                    selected_candidate_pair_id: Some("CP01".into()),
                },
            )
            .with(
                "CP01",
                StatsEntry::CandidatePair {
                    local_candidate_id: "L01".into(),
                    remote_candidate_id: "R01".into(),
                },
            )
            .with(
                "L01",
                StatsEntry::Candidate {
                    candidate_type: local.0.into(),
                    address: local.1.into(),
                    port: local.2,
                },
            )
            .with(
                "R01",
                StatsEntry::Candidate {
                    candidate_type: remote.0.into(),
                    address: remote.1.into(),
                    port: remote.2,
                },
            )
    }
}
