use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============ Persisted Enums ============
//
// The string forms below are stored verbatim in the database and must not change.

/// Error returned when a stored enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    /// Name of the enum being parsed.
    pub kind: &'static str,
    /// The rejected raw value.
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Position of a candidate in the admissions funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Registered,
    Prospecting,
    Committed,
    Enrolled,
    Lost,
}

impl CandidateStatus {
    pub const ALL: [CandidateStatus; 5] = [
        CandidateStatus::Registered,
        CandidateStatus::Prospecting,
        CandidateStatus::Committed,
        CandidateStatus::Enrolled,
        CandidateStatus::Lost,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            CandidateStatus::Registered => "registered",
            CandidateStatus::Prospecting => "prospecting",
            CandidateStatus::Committed => "committed",
            CandidateStatus::Enrolled => "enrolled",
            CandidateStatus::Lost => "lost",
        }
    }

    /// `enrolled` and `lost` are never left.
    pub const fn is_terminal(self) -> bool {
        matches!(self, CandidateStatus::Enrolled | CandidateStatus::Lost)
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandidateStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "registered" => Ok(CandidateStatus::Registered),
            "prospecting" => Ok(CandidateStatus::Prospecting),
            "committed" => Ok(CandidateStatus::Committed),
            "enrolled" => Ok(CandidateStatus::Enrolled),
            "lost" => Ok(CandidateStatus::Lost),
            other => Err(ParseEnumError::new("candidate status", other)),
        }
    }
}

impl TryFrom<String> for CandidateStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Payment state of a single billing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Unpaid,
    PendingVerification,
    Paid,
}

impl BillingStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            BillingStatus::Unpaid => "unpaid",
            BillingStatus::PendingVerification => "pending_verification",
            BillingStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unpaid" => Ok(BillingStatus::Unpaid),
            "pending_verification" => Ok(BillingStatus::PendingVerification),
            "paid" => Ok(BillingStatus::Paid),
            other => Err(ParseEnumError::new("billing status", other)),
        }
    }
}

impl TryFrom<String> for BillingStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// What a billing (and the fee structure behind it) charges for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    Registration,
    Tuition,
    Dormitory,
}

impl BillingType {
    pub const fn as_str(self) -> &'static str {
        match self {
            BillingType::Registration => "registration",
            BillingType::Tuition => "tuition",
            BillingType::Dormitory => "dormitory",
        }
    }
}

impl fmt::Display for BillingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingType {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "registration" => Ok(BillingType::Registration),
            "tuition" => Ok(BillingType::Tuition),
            "dormitory" => Ok(BillingType::Dormitory),
            other => Err(ParseEnumError::new("billing type", other)),
        }
    }
}

impl TryFrom<String> for BillingType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Commission ledger state: `pending -> approved -> paid` or `pending -> cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Approved,
    Paid,
    Cancelled,
}

impl CommissionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Approved => "approved",
            CommissionStatus::Paid => "paid",
            CommissionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommissionStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(CommissionStatus::Pending),
            "approved" => Ok(CommissionStatus::Approved),
            "paid" => Ok(CommissionStatus::Paid),
            "cancelled" => Ok(CommissionStatus::Cancelled),
            other => Err(ParseEnumError::new("commission status", other)),
        }
    }
}

impl TryFrom<String> for CommissionStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Kind of external party that refers candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferrerType {
    Alumni,
    Teacher,
    Student,
    Partner,
    Staff,
}

impl ReferrerType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReferrerType::Alumni => "alumni",
            ReferrerType::Teacher => "teacher",
            ReferrerType::Student => "student",
            ReferrerType::Partner => "partner",
            ReferrerType::Staff => "staff",
        }
    }
}

impl fmt::Display for ReferrerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferrerType {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "alumni" => Ok(ReferrerType::Alumni),
            "teacher" => Ok(ReferrerType::Teacher),
            "student" => Ok(ReferrerType::Student),
            "partner" => Ok(ReferrerType::Partner),
            "staff" => Ok(ReferrerType::Staff),
            other => Err(ParseEnumError::new("referrer type", other)),
        }
    }
}

impl TryFrom<String> for ReferrerType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Milestone that causes a commission to be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Commitment,
    Enrollment,
}

impl TriggerEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            TriggerEvent::Commitment => "commitment",
            TriggerEvent::Enrollment => "enrollment",
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerEvent {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "commitment" => Ok(TriggerEvent::Commitment),
            "enrollment" => Ok(TriggerEvent::Enrollment),
            other => Err(ParseEnumError::new("trigger event", other)),
        }
    }
}

impl TryFrom<String> for TriggerEvent {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Review state of an uploaded candidate document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Approved,
    Rejected,
}

impl DocumentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Approved => "approved",
            DocumentStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(DocumentStatus::Pending),
            "approved" => Ok(DocumentStatus::Approved),
            "rejected" => Ok(DocumentStatus::Rejected),
            other => Err(ParseEnumError::new("document status", other)),
        }
    }
}

impl TryFrom<String> for DocumentStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Audit trail entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    StatusChange,
    Reassignment,
}

impl InteractionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            InteractionKind::StatusChange => "status_change",
            InteractionKind::Reassignment => "reassignment",
        }
    }
}

impl FromStr for InteractionKind {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "status_change" => Ok(InteractionKind::StatusChange),
            "reassignment" => Ok(InteractionKind::Reassignment),
            other => Err(ParseEnumError::new("interaction kind", other)),
        }
    }
}

impl TryFrom<String> for InteractionKind {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Code of an assignment algorithm row. The set is open: codes this build does not know
/// are kept as `Other` and resolved to the default strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlgorithmCode {
    RoundRobin,
    LoadBalanced,
    Other(String),
}

impl AlgorithmCode {
    pub fn as_str(&self) -> &str {
        match self {
            AlgorithmCode::RoundRobin => "round_robin",
            AlgorithmCode::LoadBalanced => "load_balanced",
            AlgorithmCode::Other(code) => code,
        }
    }
}

impl From<String> for AlgorithmCode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "round_robin" => AlgorithmCode::RoundRobin,
            "load_balanced" => AlgorithmCode::LoadBalanced,
            _ => AlgorithmCode::Other(value),
        }
    }
}

impl From<AlgorithmCode> for String {
    fn from(value: AlgorithmCode) -> Self {
        value.as_str().to_string()
    }
}

// ============ Domain Records ============

/// A prospective student moving through the admissions funnel.
///
/// PII fields hold plaintext here; they are only ever encrypted at the storage boundary
/// (see `sealed`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    /// Full name (probabilistically encrypted at rest).
    pub name: String,
    /// Normalized lowercase email (deterministically encrypted at rest).
    pub email: Option<String>,
    /// E.164 phone number (deterministically encrypted at rest).
    pub phone: Option<String>,
    /// Subject id from the OAuth identity provider (deterministically encrypted at rest).
    pub external_id: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub address: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub school_name: Option<String>,
    pub graduation_year: Option<i32>,
    pub program_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub referrer_id: Option<Uuid>,
    /// Peer ("member-get-member") referral by another candidate.
    pub referred_by_candidate_id: Option<Uuid>,
    pub assigned_consultant_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub source_type: Option<String>,
    pub source_detail: Option<String>,
    pub status: CandidateStatus,
    /// Present if and only if `status == Lost`.
    pub lost_reason_id: Option<Uuid>,
    pub lost_at: Option<DateTime<Utc>>,
    /// Student number (NIM), issued at enrollment.
    pub student_number: Option<String>,
    /// The candidate's own code for referring peers, issued at enrollment.
    pub referral_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a candidate came from (campaign, walk-in, social media, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTracking {
    pub source_type: String,
    pub source_detail: Option<String>,
}

/// Signup payload for a new candidate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCandidate {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub external_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub school_name: Option<String>,
    pub graduation_year: Option<i32>,
    pub program_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    /// Either a referrer code or another student's referral code.
    pub referral_code: Option<String>,
    pub source: Option<SourceTracking>,
}

/// Bank account used to pay out commissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub bank_name: String,
    pub account_number: String,
    pub account_holder: String,
}

/// External party (teacher, alumnus, partner, staff) who refers candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referrer {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub referrer_type: ReferrerType,
    /// Flat commission that takes precedence over the reward table.
    pub commission_override: Option<i64>,
    pub payout_preference: Option<String>,
    pub bank: Option<BankDetails>,
    pub code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Payload for registering a referrer.
#[derive(Debug, Clone, Deserialize)]
pub struct NewReferrer {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub referrer_type: ReferrerType,
    pub commission_override: Option<i64>,
    pub payout_preference: Option<String>,
    pub bank: Option<BankDetails>,
    pub code: Option<String>,
}

/// Fallback commission schedule keyed by `(referrer_type, trigger_event)`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct RewardConfig {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub referrer_type: ReferrerType,
    #[sqlx(try_from = "String")]
    pub trigger_event: TriggerEvent,
    /// Flat amount, or a whole percentage when `is_percentage` is set.
    pub amount: i64,
    pub is_percentage: bool,
    pub reward_type: String,
    pub is_active: bool,
}

/// Commission ledger entry; unique per `(referrer_id, candidate_id, trigger_event)`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Commission {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub candidate_id: Uuid,
    #[sqlx(try_from = "String")]
    pub trigger_event: TriggerEvent,
    pub amount: i64,
    #[sqlx(try_from = "String")]
    pub status: CommissionStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_by: Option<Uuid>,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Amount owed by a candidate; installments are independent rows.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Billing {
    pub id: Uuid,
    pub candidate_id: Uuid,
    #[sqlx(try_from = "String")]
    pub billing_type: BillingType,
    pub academic_year: String,
    pub amount: i64,
    /// 1-based position within the split.
    pub installment_number: i32,
    pub installment_count: i32,
    pub due_date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub status: BillingStatus,
    pub verified_by: Option<Uuid>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fee schedule row; `program_id = None` is the program-agnostic rate.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct FeeStructure {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub fee_type: BillingType,
    pub program_id: Option<Uuid>,
    pub academic_year: String,
    pub amount: i64,
    pub is_active: bool,
}

/// Study program a candidate applies to.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Program {
    pub id: Uuid,
    /// Short code embedded in student numbers.
    pub code: String,
    pub name: String,
}

/// Admissions consultant that owns candidates.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Consultant {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Selectable consultant assignment strategy; exactly one row is active.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct AssignmentAlgorithm {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub code: AlgorithmCode,
    pub name: String,
    pub is_active: bool,
}

/// Document a candidate must (or may) provide.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DocumentType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub is_required: bool,
    /// Required, but may be submitted after enrollment.
    pub is_deferred: bool,
}

/// An uploaded document and its review state.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CandidateDocument {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub document_type_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: DocumentStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
}

/// Reason recorded when a candidate is marked lost.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct LostReason {
    pub id: Uuid,
    pub label: String,
    pub is_active: bool,
}

/// Append-only audit record for a candidate.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub consultant_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub kind: InteractionKind,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_status_round_trips_through_storage_strings() {
        for status in CandidateStatus::ALL {
            assert_eq!(status.as_str().parse::<CandidateStatus>(), Ok(status));
        }
        assert!("withdrawn".parse::<CandidateStatus>().is_err());
    }

    #[test]
    fn persisted_strings_match_schema() {
        assert_eq!(BillingStatus::PendingVerification.as_str(), "pending_verification");
        assert_eq!(CommissionStatus::Cancelled.as_str(), "cancelled");
        assert_eq!(ReferrerType::Alumni.as_str(), "alumni");
        assert_eq!(BillingType::Dormitory.as_str(), "dormitory");
        assert_eq!(
            serde_json::to_value(BillingStatus::PendingVerification).unwrap(),
            serde_json::json!("pending_verification")
        );
    }

    #[test]
    fn unknown_algorithm_codes_are_preserved() {
        let code = AlgorithmCode::from("weighted_random".to_string());
        assert_eq!(code, AlgorithmCode::Other("weighted_random".to_string()));
        assert_eq!(code.as_str(), "weighted_random");
        assert_eq!(
            AlgorithmCode::from("round_robin".to_string()),
            AlgorithmCode::RoundRobin
        );
    }
}
