use crate::errors::AppError;
use crate::models::{CandidateStatus, TriggerEvent};

/// The side-effect bundle attached to an allowed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// `registered -> prospecting`: requires source tracking, auto-assigns a consultant.
    StartProspecting,
    /// `prospecting -> committed`: issues tuition (and optional dormitory) billing.
    Commit,
    /// `committed -> enrolled`: checklist guard, student number, referral code.
    Enroll,
    /// `* -> lost` from any non-terminal status.
    MarkLost,
}

impl TransitionKind {
    /// Commission trigger fired by this transition, if any.
    pub const fn trigger_event(self) -> Option<TriggerEvent> {
        match self {
            TransitionKind::Commit => Some(TriggerEvent::Commitment),
            TransitionKind::Enroll => Some(TriggerEvent::Enrollment),
            TransitionKind::StartProspecting | TransitionKind::MarkLost => None,
        }
    }
}

/// The only place that decides whether a status move is legal.
pub const ALLOWED_EDGES: &[(CandidateStatus, CandidateStatus, TransitionKind)] = &[
    (
        CandidateStatus::Registered,
        CandidateStatus::Prospecting,
        TransitionKind::StartProspecting,
    ),
    (
        CandidateStatus::Prospecting,
        CandidateStatus::Committed,
        TransitionKind::Commit,
    ),
    (
        CandidateStatus::Committed,
        CandidateStatus::Enrolled,
        TransitionKind::Enroll,
    ),
    (
        CandidateStatus::Registered,
        CandidateStatus::Lost,
        TransitionKind::MarkLost,
    ),
    (
        CandidateStatus::Prospecting,
        CandidateStatus::Lost,
        TransitionKind::MarkLost,
    ),
    (
        CandidateStatus::Committed,
        CandidateStatus::Lost,
        TransitionKind::MarkLost,
    ),
];

pub fn transition_kind(from: CandidateStatus, to: CandidateStatus) -> Option<TransitionKind> {
    ALLOWED_EDGES
        .iter()
        .find(|(edge_from, edge_to, _)| *edge_from == from && *edge_to == to)
        .map(|(_, _, kind)| *kind)
}

/// Statuses reachable in one step from `from`.
pub fn allowed_targets(from: CandidateStatus) -> Vec<CandidateStatus> {
    ALLOWED_EDGES
        .iter()
        .filter(|(edge_from, _, _)| *edge_from == from)
        .map(|(_, to, _)| *to)
        .collect()
}

pub fn validate_transition(
    from: CandidateStatus,
    to: CandidateStatus,
) -> Result<TransitionKind, AppError> {
    transition_kind(from, to).ok_or(AppError::InvalidTransition { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;
    use CandidateStatus::*;

    #[test]
    fn forward_edges_are_allowed() {
        assert_eq!(
            validate_transition(Registered, Prospecting).unwrap(),
            TransitionKind::StartProspecting
        );
        assert_eq!(
            validate_transition(Prospecting, Committed).unwrap(),
            TransitionKind::Commit
        );
        assert_eq!(
            validate_transition(Committed, Enrolled).unwrap(),
            TransitionKind::Enroll
        );
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for to in CandidateStatus::ALL {
            assert!(validate_transition(Enrolled, to).is_err());
            assert!(validate_transition(Lost, to).is_err());
        }
        assert!(allowed_targets(Enrolled).is_empty());
        assert!(allowed_targets(Lost).is_empty());
    }

    #[test]
    fn skipping_and_reverting_are_rejected() {
        assert!(matches!(
            validate_transition(Registered, Enrolled),
            Err(AppError::InvalidTransition {
                from: Registered,
                to: Enrolled
            })
        ));
        assert!(validate_transition(Committed, Prospecting).is_err());
        assert!(validate_transition(Prospecting, Registered).is_err());
        assert!(validate_transition(Prospecting, Prospecting).is_err());
    }

    #[test]
    fn lost_is_reachable_from_every_non_terminal_status() {
        for from in CandidateStatus::ALL {
            let reachable = transition_kind(from, Lost).is_some();
            assert_eq!(reachable, !from.is_terminal(), "from {}", from);
        }
    }

    #[test]
    fn triggers_follow_kinds() {
        assert_eq!(
            TransitionKind::Commit.trigger_event(),
            Some(TriggerEvent::Commitment)
        );
        assert_eq!(
            TransitionKind::Enroll.trigger_event(),
            Some(TriggerEvent::Enrollment)
        );
        assert_eq!(TransitionKind::MarkLost.trigger_event(), None);
    }
}
