use std::fmt;

/// Where an offer is in its handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferReceived,
    ConnectionCreated,
    SessionBound,
    MediaAttached,
    RemoteSet,
    AnswerCreated,
    SubsystemsStarting,
    GatheringCandidates,
    Answered,
    Aborted,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Answered | NegotiationState::Aborted)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
