use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Creates the channel and the offer.
    Initiator,
    /// Accepts the offer and answers it.
    Responder,
}

impl PeerRole {
    /// Every state the role passes through, in order.
    pub fn sequence(self) -> &'static [SessionState] {
        use SessionState::*;
        match self {
            PeerRole::Initiator => &[
                Idle,
                LocalOfferCreated,
                OfferEncryptedAndDisplayed,
                AwaitingEncryptedAnswer,
                AnswerDecrypted,
                RemoteDescriptionSet,
                Connected,
            ],
            PeerRole::Responder => &[
                Idle,
                AwaitingEncryptedOffer,
                OfferDecrypted,
                RemoteDescriptionSet,
                LocalAnswerCreated,
                AnswerEncryptedAndDisplayed,
                Connected,
            ],
        }
    }

    /// Whether `to` is the state directly after `from` for this role.
    pub fn permits(self, from: SessionState, to: SessionState) -> bool {
        self.sequence()
            .windows(2)
            .any(|step| step[0] == from && step[1] == to)
    }

    /// The state after which an open channel (plus, for the responder, the
    /// first inbound message) completes the session.
    pub fn ready_state(self) -> SessionState {
        match self {
            PeerRole::Initiator => SessionState::RemoteDescriptionSet,
            PeerRole::Responder => SessionState::AnswerEncryptedAndDisplayed,
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Initiator => f.write_str("initiator"),
            PeerRole::Responder => f.write_str("responder"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    LocalOfferCreated,
    OfferEncryptedAndDisplayed,
    AwaitingEncryptedAnswer,
    AnswerDecrypted,
    AwaitingEncryptedOffer,
    OfferDecrypted,
    RemoteDescriptionSet,
    LocalAnswerCreated,
    AnswerEncryptedAndDisplayed,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_roles_start_idle_and_end_connected() {
        for role in [PeerRole::Initiator, PeerRole::Responder] {
            let sequence = role.sequence();
            assert_eq!(sequence.first(), Some(&SessionState::Idle));
            assert_eq!(sequence.last(), Some(&SessionState::Connected));
        }
    }

    #[test]
    fn only_the_next_state_is_permitted() {
        let role = PeerRole::Initiator;
        assert!(role.permits(SessionState::Idle, SessionState::LocalOfferCreated));
        assert!(!role.permits(SessionState::Idle, SessionState::AnswerDecrypted));
        assert!(!role.permits(SessionState::AnswerDecrypted, SessionState::LocalOfferCreated));
        assert!(!role.permits(SessionState::AnswerDecrypted, SessionState::Connected));
    }

    #[test]
    fn responder_sets_remote_before_answering() {
        let role = PeerRole::Responder;
        assert!(role.permits(SessionState::OfferDecrypted, SessionState::RemoteDescriptionSet));
        assert!(role.permits(SessionState::RemoteDescriptionSet, SessionState::LocalAnswerCreated));
        assert!(!role.permits(SessionState::RemoteDescriptionSet, SessionState::Connected));
        assert!(!role.permits(SessionState::Idle, SessionState::LocalOfferCreated));
    }
}
