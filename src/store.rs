use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::assignment::ConsultantWorkload;
use crate::errors::AppError;
use crate::models::{
    AssignmentAlgorithm, Billing, BillingStatus, BillingType, Candidate, CandidateDocument,
    CandidateStatus, Commission, CommissionStatus, Consultant, DocumentStatus, DocumentType,
    FeeStructure, Interaction, LostReason, Program, Referrer, ReferrerType, RewardConfig,
    SourceTracking, TriggerEvent,
};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

/// Exact-match lookup on a deterministically encrypted contact field.
/// Values must already be normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactLookup {
    Email(String),
    Phone(String),
    ExternalIdentity(String),
}

/// Structured candidate search. Every set field narrows the result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateFilter {
    #[serde(default)]
    pub statuses: Vec<CandidateStatus>,
    pub consultant_id: Option<Uuid>,
    pub referrer_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Normalized email, matched through its search token.
    pub email: Option<String>,
    /// E.164 phone, matched through its search token.
    pub phone: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl CandidateFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// In-process evaluation of the predicate, used where rows are filtered in memory.
    pub fn matches(&self, candidate: &Candidate) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&candidate.status) {
            return false;
        }
        if self.consultant_id.is_some() && self.consultant_id != candidate.assigned_consultant_id
        {
            return false;
        }
        if self.referrer_id.is_some() && self.referrer_id != candidate.referrer_id {
            return false;
        }
        if self.program_id.is_some() && self.program_id != candidate.program_id {
            return false;
        }
        if self.campaign_id.is_some() && self.campaign_id != candidate.campaign_id {
            return false;
        }
        if self.created_from.is_some_and(|from| candidate.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| candidate.created_at >= to) {
            return false;
        }
        if self.email.is_some() && self.email != candidate.email {
            return false;
        }
        if self.phone.is_some() && self.phone != candidate.phone {
            return false;
        }
        true
    }
}

/// Everything a status transition persists, applied as one unit of work.
///
/// The write only succeeds if the candidate still holds `expected_status`; otherwise
/// nothing is written.
#[derive(Debug, Clone)]
pub struct TransitionWrite {
    pub candidate_id: Uuid,
    pub expected_status: CandidateStatus,
    pub new_status: CandidateStatus,
    /// Consultant picked by the selector, stamped with `at`.
    pub assign_consultant: Option<Uuid>,
    pub source: Option<SourceTracking>,
    /// Required when `new_status` is `lost`; `lost_at` is then `at`.
    pub lost_reason_id: Option<Uuid>,
    pub student_number: Option<String>,
    pub referral_code: Option<String>,
    pub billings: Vec<Billing>,
    /// Inserted unless the `(referrer, candidate, trigger)` entry already exists.
    pub commission: Option<Commission>,
    pub interaction: Interaction,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionApplied {
    /// False when no commission was planned or an identical entry already existed.
    pub commission_created: bool,
}

/// Guarded commission ledger advance applied to a batch of ids.
#[derive(Debug, Clone)]
pub struct CommissionUpdate {
    pub from: CommissionStatus,
    pub to: CommissionStatus,
    pub actor_id: Option<Uuid>,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

/// Data access for the engine. Implementations take and return plaintext models and seal
/// PII on the way in, opening it on the way out.
#[async_trait]
pub trait AdmissionsStore: Send + Sync {
    // ---- candidates ----

    async fn candidate(&self, id: Uuid) -> Result<Option<Candidate>, AppError>;

    /// Fails with `Conflict` if a contact or external identity is already registered.
    async fn insert_candidate(&self, candidate: &Candidate) -> Result<(), AppError>;

    async fn find_candidate_by_contact(
        &self,
        lookup: &ContactLookup,
    ) -> Result<Option<Candidate>, AppError>;

    async fn candidate_by_referral_code(&self, code: &str)
        -> Result<Option<Candidate>, AppError>;

    async fn list_candidates(&self, filter: &CandidateFilter) -> Result<Vec<Candidate>, AppError>;

    async fn apply_transition(&self, write: &TransitionWrite)
        -> Result<TransitionApplied, AppError>;

    /// Sets the consultant of a non-terminal candidate and records the interaction.
    /// Returns false if the candidate is missing or terminal.
    async fn reassign_consultant(
        &self,
        candidate_id: Uuid,
        consultant_id: Uuid,
        interaction: &Interaction,
    ) -> Result<bool, AppError>;

    async fn interactions(&self, candidate_id: Uuid) -> Result<Vec<Interaction>, AppError>;

    // ---- reference data ----

    async fn program(&self, id: Uuid) -> Result<Option<Program>, AppError>;

    async fn lost_reason(&self, id: Uuid) -> Result<Option<LostReason>, AppError>;

    /// Number of student numbers already issued under `prefix`.
    async fn count_student_numbers(&self, prefix: &str) -> Result<i64, AppError>;

    // ---- referrers ----

    async fn referrer(&self, id: Uuid) -> Result<Option<Referrer>, AppError>;

    async fn referrer_by_code(&self, code: &str) -> Result<Option<Referrer>, AppError>;

    async fn insert_referrer(&self, referrer: &Referrer) -> Result<(), AppError>;

    async fn active_reward_config(
        &self,
        referrer_type: ReferrerType,
        trigger_event: TriggerEvent,
    ) -> Result<Option<RewardConfig>, AppError>;

    // ---- commissions ----

    /// Returns false when the `(referrer, candidate, trigger)` entry already exists.
    async fn insert_commission(&self, commission: &Commission) -> Result<bool, AppError>;

    async fn commission(&self, id: Uuid) -> Result<Option<Commission>, AppError>;

    /// Advances every id currently in `update.from`; returns how many moved.
    async fn advance_commissions(
        &self,
        ids: &[Uuid],
        update: &CommissionUpdate,
    ) -> Result<u64, AppError>;

    // ---- billing ----

    async fn active_fee_structures(
        &self,
        fee_type: BillingType,
        academic_year: &str,
    ) -> Result<Vec<FeeStructure>, AppError>;

    async fn billings_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<Billing>, AppError>;

    async fn insert_billings(&self, billings: &[Billing]) -> Result<(), AppError>;

    async fn billing(&self, id: Uuid) -> Result<Option<Billing>, AppError>;

    /// Compare-and-set on billing status; returns false if the row was not in `from`.
    async fn update_billing_status(
        &self,
        id: Uuid,
        from: BillingStatus,
        to: BillingStatus,
        actor_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    // ---- documents ----

    async fn document_types(&self) -> Result<Vec<DocumentType>, AppError>;

    async fn candidate_documents(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<CandidateDocument>, AppError>;

    async fn set_document_status(
        &self,
        document_id: Uuid,
        status: DocumentStatus,
        actor_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    // ---- assignment ----

    async fn consultant(&self, id: Uuid) -> Result<Option<Consultant>, AppError>;

    async fn active_assignment_algorithm(&self) -> Result<Option<AssignmentAlgorithm>, AppError>;

    /// Workload snapshot of every active consultant.
    async fn consultant_workloads(&self) -> Result<Vec<ConsultantWorkload>, AppError>;

    /// Deactivates every algorithm and activates `id` atomically.
    /// Returns `None` (and changes nothing) if `id` does not exist.
    async fn activate_assignment_algorithm(
        &self,
        id: Uuid,
    ) -> Result<Option<AssignmentAlgorithm>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(status: CandidateStatus) -> Candidate {
        let now = Utc::now();
        Candidate {
            id: Uuid::new_v4(),
            name: "Dewi".to_string(),
            email: Some("dewi@example.com".to_string()),
            phone: None,
            external_id: None,
            email_verified: false,
            phone_verified: false,
            address: None,
            city: None,
            province: None,
            school_name: None,
            graduation_year: None,
            program_id: None,
            campaign_id: None,
            referrer_id: None,
            referred_by_candidate_id: None,
            assigned_consultant_id: None,
            assigned_at: None,
            source_type: None,
            source_detail: None,
            status,
            lost_reason_id: None,
            lost_at: None,
            student_number: None,
            referral_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = CandidateFilter::default();
        assert!(filter.matches(&candidate(CandidateStatus::Lost)));
        assert_eq!(filter.effective_limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(filter.effective_offset(), 0);
    }

    #[test]
    fn filter_fields_narrow() {
        let c = candidate(CandidateStatus::Prospecting);
        let by_status = CandidateFilter {
            statuses: vec![CandidateStatus::Registered],
            ..Default::default()
        };
        assert!(!by_status.matches(&c));

        let by_email = CandidateFilter {
            email: Some("dewi@example.com".to_string()),
            ..Default::default()
        };
        assert!(by_email.matches(&c));

        let by_consultant = CandidateFilter {
            consultant_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        assert!(!by_consultant.matches(&c));
    }

    #[test]
    fn page_size_is_clamped() {
        let filter = CandidateFilter {
            limit: Some(10_000),
            offset: Some(-3),
            ..Default::default()
        };
        assert_eq!(filter.effective_limit(), MAX_PAGE_SIZE);
        assert_eq!(filter.effective_offset(), 0);
    }
}
