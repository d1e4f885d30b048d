use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::AlgorithmCode;

/// How the active assignment algorithm picks a consultant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStrategy {
    /// Consultant whose latest assignment is oldest; never-assigned consultants first.
    RoundRobin,
    /// Consultant with the fewest non-terminal candidates.
    LoadBalanced,
}

impl AssignmentStrategy {
    pub fn for_code(code: &AlgorithmCode) -> Self {
        match code {
            AlgorithmCode::RoundRobin => AssignmentStrategy::RoundRobin,
            AlgorithmCode::LoadBalanced => AssignmentStrategy::LoadBalanced,
            AlgorithmCode::Other(other) => {
                tracing::warn!(
                    "Unknown assignment algorithm '{}', falling back to round robin",
                    other
                );
                AssignmentStrategy::RoundRobin
            }
        }
    }
}

/// Per-consultant snapshot the selector works from. Only active consultants are listed.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ConsultantWorkload {
    pub consultant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_assigned_at: Option<DateTime<Utc>>,
    pub active_candidates: i64,
}

/// Picks a consultant, breaking ties by account creation order and then id.
/// Returns `None` when there are no active consultants.
pub fn select_consultant(
    strategy: AssignmentStrategy,
    workloads: &[ConsultantWorkload],
) -> Option<Uuid> {
    let chosen = match strategy {
        // `None < Some(_)`, so never-assigned consultants sort first.
        AssignmentStrategy::RoundRobin => workloads
            .iter()
            .min_by_key(|w| (w.last_assigned_at, w.created_at, w.consultant_id)),
        AssignmentStrategy::LoadBalanced => workloads
            .iter()
            .min_by_key(|w| (w.active_candidates, w.created_at, w.consultant_id)),
    };
    chosen.map(|w| w.consultant_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 8, minute, 0).unwrap()
    }

    fn workload(created: u32, last: Option<u32>, active: i64) -> ConsultantWorkload {
        ConsultantWorkload {
            consultant_id: Uuid::new_v4(),
            created_at: at(created),
            last_assigned_at: last.map(at),
            active_candidates: active,
        }
    }

    #[test]
    fn round_robin_prefers_never_assigned() {
        let busy = workload(0, Some(10), 0);
        let fresh = workload(5, None, 9);
        let picked = select_consultant(AssignmentStrategy::RoundRobin, &[busy, fresh.clone()]);
        assert_eq!(picked, Some(fresh.consultant_id));
    }

    #[test]
    fn round_robin_picks_oldest_assignment_then_creation_order() {
        let a = workload(3, Some(20), 0);
        let b = workload(1, Some(15), 0);
        let c = workload(0, Some(15), 0);
        let picked = select_consultant(AssignmentStrategy::RoundRobin, &[a, b, c.clone()]);
        assert_eq!(picked, Some(c.consultant_id));
    }

    #[test]
    fn load_balanced_picks_fewest_active() {
        let a = workload(0, None, 4);
        let b = workload(1, Some(59), 2);
        let c = workload(2, None, 2);
        let picked = select_consultant(AssignmentStrategy::LoadBalanced, &[a, b.clone(), c]);
        assert_eq!(picked, Some(b.consultant_id));
    }

    #[test]
    fn no_consultants_means_no_pick() {
        assert_eq!(select_consultant(AssignmentStrategy::RoundRobin, &[]), None);
    }

    #[test]
    fn unknown_codes_default_to_round_robin() {
        let code = AlgorithmCode::Other("weighted".to_string());
        assert_eq!(
            AssignmentStrategy::for_code(&code),
            AssignmentStrategy::RoundRobin
        );
        assert_eq!(
            AssignmentStrategy::for_code(&AlgorithmCode::LoadBalanced),
            AssignmentStrategy::LoadBalanced
        );
    }
}
