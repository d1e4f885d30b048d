use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::assignment::ConsultantWorkload;
use crate::errors::AppError;
use crate::identifiers::is_student_number_under;
use crate::models::{
    AlgorithmCode, AssignmentAlgorithm, Billing, BillingStatus, BillingType, Candidate,
    CandidateDocument, CandidateStatus, Commission, CommissionStatus, Consultant,
    DocumentStatus, DocumentType, FeeStructure, Interaction, LostReason, Program, Referrer,
    ReferrerType, RewardConfig, TriggerEvent,
};
use crate::pii::{PiiCodec, PiiField};
use crate::sealed::{SealedCandidate, SealedReferrer};
use crate::store::{
    AdmissionsStore, CandidateFilter, CommissionUpdate, ContactLookup, TransitionApplied,
    TransitionWrite,
};

#[derive(Default)]
struct MemoryState {
    candidates: HashMap<Uuid, SealedCandidate>,
    referrers: HashMap<Uuid, SealedReferrer>,
    reward_configs: Vec<RewardConfig>,
    commissions: Vec<Commission>,
    billings: Vec<Billing>,
    fee_structures: Vec<FeeStructure>,
    programs: HashMap<Uuid, Program>,
    consultants: Vec<Consultant>,
    algorithms: Vec<AssignmentAlgorithm>,
    document_types: Vec<DocumentType>,
    documents: Vec<CandidateDocument>,
    lost_reasons: HashMap<Uuid, LostReason>,
    interactions: Vec<Interaction>,
    clock: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Strictly increasing timestamps so ordering-based selection never ties.
    fn tick(&mut self, at: DateTime<Utc>) -> DateTime<Utc> {
        let stamp = match self.clock {
            Some(previous) if previous >= at => previous + Duration::microseconds(1),
            _ => at,
        };
        self.clock = Some(stamp);
        stamp
    }

    fn contact_taken(&self, sealed: &SealedCandidate) -> bool {
        let same = |a: &Option<String>, b: &Option<String>| a.is_some() && a == b;
        self.candidates.values().any(|existing| {
            existing.id != sealed.id
                && (same(&existing.email_enc, &sealed.email_enc)
                    || same(&existing.phone_enc, &sealed.phone_enc)
                    || same(&existing.external_id_enc, &sealed.external_id_enc))
        })
    }

    fn commission_exists(&self, commission: &Commission) -> bool {
        self.commissions.iter().any(|c| {
            c.referrer_id == commission.referrer_id
                && c.candidate_id == commission.candidate_id
                && c.trigger_event == commission.trigger_event
        })
    }
}

/// In-process [`AdmissionsStore`] holding the same sealed rows and uniqueness rules as the
/// database. All state sits behind one mutex that is never held across an await.
pub struct MemoryStore {
    codec: Arc<PiiCodec>,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(codec: Arc<PiiCodec>) -> Self {
        Self {
            codec,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::InternalError("memory store lock poisoned".to_string()))
    }

    fn open_all(&self, rows: Vec<SealedCandidate>) -> Result<Vec<Candidate>, AppError> {
        rows.into_iter().map(|row| row.open(&self.codec)).collect()
    }

    // ---- seeding (reference data is administered outside the engine) ----

    pub fn add_consultant(&self, name: &str) -> Result<Consultant, AppError> {
        let mut state = self.lock()?;
        let consultant = Consultant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_active: true,
            created_at: state.tick(Utc::now()),
        };
        state.consultants.push(consultant.clone());
        Ok(consultant)
    }

    pub fn set_consultant_active(&self, id: Uuid, is_active: bool) -> Result<(), AppError> {
        let mut state = self.lock()?;
        let consultant = state
            .consultants
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| AppError::NotFound(format!("consultant {}", id)))?;
        consultant.is_active = is_active;
        Ok(())
    }

    pub fn add_program(&self, code: &str, name: &str) -> Result<Program, AppError> {
        let program = Program {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
        };
        self.lock()?.programs.insert(program.id, program.clone());
        Ok(program)
    }

    pub fn add_fee_structure(
        &self,
        fee_type: BillingType,
        program_id: Option<Uuid>,
        academic_year: &str,
        amount: i64,
    ) -> Result<FeeStructure, AppError> {
        let fee = FeeStructure {
            id: Uuid::new_v4(),
            fee_type,
            program_id,
            academic_year: academic_year.to_string(),
            amount,
            is_active: true,
        };
        self.lock()?.fee_structures.push(fee.clone());
        Ok(fee)
    }

    pub fn add_reward_config(
        &self,
        referrer_type: ReferrerType,
        trigger_event: TriggerEvent,
        amount: i64,
        is_percentage: bool,
    ) -> Result<RewardConfig, AppError> {
        let reward = RewardConfig {
            id: Uuid::new_v4(),
            referrer_type,
            trigger_event,
            amount,
            is_percentage,
            reward_type: "cash".to_string(),
            is_active: true,
        };
        self.lock()?.reward_configs.push(reward.clone());
        Ok(reward)
    }

    pub fn add_document_type(
        &self,
        code: &str,
        name: &str,
        is_required: bool,
        is_deferred: bool,
    ) -> Result<DocumentType, AppError> {
        let doc_type = DocumentType {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
            is_required,
            is_deferred,
        };
        self.lock()?.document_types.push(doc_type.clone());
        Ok(doc_type)
    }

    pub fn add_candidate_document(
        &self,
        candidate_id: Uuid,
        document_type_id: Uuid,
        status: DocumentStatus,
    ) -> Result<CandidateDocument, AppError> {
        let document = CandidateDocument {
            id: Uuid::new_v4(),
            candidate_id,
            document_type_id,
            status,
            reviewed_by: None,
            reviewed_at: None,
            uploaded_at: Utc::now(),
        };
        self.lock()?.documents.push(document.clone());
        Ok(document)
    }

    pub fn add_lost_reason(&self, label: &str) -> Result<LostReason, AppError> {
        let reason = LostReason {
            id: Uuid::new_v4(),
            label: label.to_string(),
            is_active: true,
        };
        self.lock()?.lost_reasons.insert(reason.id, reason.clone());
        Ok(reason)
    }

    /// Adds an algorithm row; adding an active one deactivates the rest.
    pub fn add_assignment_algorithm(
        &self,
        code: AlgorithmCode,
        name: &str,
        is_active: bool,
    ) -> Result<AssignmentAlgorithm, AppError> {
        let mut state = self.lock()?;
        if is_active {
            for algorithm in state.algorithms.iter_mut() {
                algorithm.is_active = false;
            }
        }
        let algorithm = AssignmentAlgorithm {
            id: Uuid::new_v4(),
            code,
            name: name.to_string(),
            is_active,
        };
        state.algorithms.push(algorithm.clone());
        Ok(algorithm)
    }

    pub fn commissions(&self) -> Result<Vec<Commission>, AppError> {
        Ok(self.lock()?.commissions.clone())
    }

    pub fn assignment_algorithms(&self) -> Result<Vec<AssignmentAlgorithm>, AppError> {
        Ok(self.lock()?.algorithms.clone())
    }

    /// The row exactly as stored, for asserting that PII is encrypted at rest.
    pub fn sealed_candidate(&self, id: Uuid) -> Result<Option<SealedCandidate>, AppError> {
        Ok(self.lock()?.candidates.get(&id).cloned())
    }
}

#[async_trait]
impl AdmissionsStore for MemoryStore {
    async fn candidate(&self, id: Uuid) -> Result<Option<Candidate>, AppError> {
        let row = self.lock()?.candidates.get(&id).cloned();
        row.map(|r| r.open(&self.codec)).transpose()
    }

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<(), AppError> {
        let sealed = SealedCandidate::seal(candidate, &self.codec)?;
        let mut state = self.lock()?;
        if state.contact_taken(&sealed) {
            return Err(AppError::Conflict(
                "a candidate with this contact is already registered".to_string(),
            ));
        }
        state.candidates.insert(sealed.id, sealed);
        Ok(())
    }

    async fn find_candidate_by_contact(
        &self,
        lookup: &ContactLookup,
    ) -> Result<Option<Candidate>, AppError> {
        let (field, value) = match lookup {
            ContactLookup::Email(v) => (PiiField::Email, v),
            ContactLookup::Phone(v) => (PiiField::Phone, v),
            ContactLookup::ExternalIdentity(v) => (PiiField::ExternalIdentity, v),
        };
        let token = Some(self.codec.search_token(field, value)?);

        let row = {
            let state = self.lock()?;
            state
                .candidates
                .values()
                .find(|c| match field {
                    PiiField::Email => c.email_enc == token,
                    PiiField::Phone => c.phone_enc == token,
                    _ => c.external_id_enc == token,
                })
                .cloned()
        };
        row.map(|r| r.open(&self.codec)).transpose()
    }

    async fn candidate_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<Candidate>, AppError> {
        let row = self
            .lock()?
            .candidates
            .values()
            .find(|c| c.referral_code.as_deref() == Some(code))
            .cloned();
        row.map(|r| r.open(&self.codec)).transpose()
    }

    async fn list_candidates(&self, filter: &CandidateFilter) -> Result<Vec<Candidate>, AppError> {
        let rows: Vec<SealedCandidate> = self.lock()?.candidates.values().cloned().collect();
        let mut matched: Vec<Candidate> = self
            .open_all(rows)?
            .into_iter()
            .filter(|c| filter.matches(c))
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(matched
            .into_iter()
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .collect())
    }

    async fn apply_transition(
        &self,
        write: &TransitionWrite,
    ) -> Result<TransitionApplied, AppError> {
        let mut state = self.lock()?;

        // Validate everything before the first mutation.
        let current = state
            .candidates
            .get(&write.candidate_id)
            .map(|c| c.status)
            .ok_or_else(|| AppError::NotFound(format!("candidate {}", write.candidate_id)))?;
        if current != write.expected_status {
            return Err(AppError::Conflict(format!(
                "candidate {} is {}, expected {}",
                write.candidate_id, current, write.expected_status
            )));
        }
        if let Some(number) = &write.student_number {
            if state
                .candidates
                .values()
                .any(|c| c.student_number.as_ref() == Some(number))
            {
                return Err(AppError::Conflict(format!(
                    "student number {} already issued",
                    number
                )));
            }
        }
        if let Some(code) = &write.referral_code {
            if state
                .candidates
                .values()
                .any(|c| c.referral_code.as_ref() == Some(code))
            {
                return Err(AppError::Conflict(format!(
                    "referral code {} already issued",
                    code
                )));
            }
        }
        let insert_commission = write
            .commission
            .as_ref()
            .filter(|c| !state.commission_exists(c))
            .cloned();

        let assigned_at = write.assign_consultant.map(|_| state.tick(write.at));

        let Some(row) = state.candidates.get_mut(&write.candidate_id) else {
            return Err(AppError::NotFound(format!(
                "candidate {}",
                write.candidate_id
            )));
        };
        row.status = write.new_status;
        row.updated_at = write.at;
        if let (Some(consultant), Some(stamp)) = (write.assign_consultant, assigned_at) {
            row.assigned_consultant_id = Some(consultant);
            row.assigned_at = Some(stamp);
        }
        if let Some(source) = &write.source {
            row.source_type = Some(source.source_type.clone());
            row.source_detail = source.source_detail.clone();
        }
        if write.new_status == CandidateStatus::Lost {
            row.lost_reason_id = write.lost_reason_id;
            row.lost_at = Some(write.at);
        }
        if write.student_number.is_some() {
            row.student_number = write.student_number.clone();
        }
        if write.referral_code.is_some() {
            row.referral_code = write.referral_code.clone();
        }

        state.billings.extend(write.billings.iter().cloned());
        let commission_created = insert_commission.is_some();
        if let Some(commission) = insert_commission {
            state.commissions.push(commission);
        }
        state.interactions.push(write.interaction.clone());

        Ok(TransitionApplied { commission_created })
    }

    async fn reassign_consultant(
        &self,
        candidate_id: Uuid,
        consultant_id: Uuid,
        interaction: &Interaction,
    ) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        let terminal = match state.candidates.get(&candidate_id) {
            Some(row) => row.status.is_terminal(),
            None => return Ok(false),
        };
        if terminal {
            return Ok(false);
        }
        let stamp = state.tick(interaction.created_at);
        if let Some(row) = state.candidates.get_mut(&candidate_id) {
            row.assigned_consultant_id = Some(consultant_id);
            row.assigned_at = Some(stamp);
            row.updated_at = interaction.created_at;
        }
        state.interactions.push(interaction.clone());
        Ok(true)
    }

    async fn interactions(&self, candidate_id: Uuid) -> Result<Vec<Interaction>, AppError> {
        Ok(self
            .lock()?
            .interactions
            .iter()
            .filter(|i| i.candidate_id == candidate_id)
            .cloned()
            .collect())
    }

    async fn program(&self, id: Uuid) -> Result<Option<Program>, AppError> {
        Ok(self.lock()?.programs.get(&id).cloned())
    }

    async fn lost_reason(&self, id: Uuid) -> Result<Option<LostReason>, AppError> {
        Ok(self.lock()?.lost_reasons.get(&id).cloned())
    }

    async fn count_student_numbers(&self, prefix: &str) -> Result<i64, AppError> {
        let count = self
            .lock()?
            .candidates
            .values()
            .filter(|c| {
                c.student_number
                    .as_deref()
                    .is_some_and(|n| is_student_number_under(n, prefix))
            })
            .count();
        Ok(count as i64)
    }

    async fn referrer(&self, id: Uuid) -> Result<Option<Referrer>, AppError> {
        let row = self.lock()?.referrers.get(&id).cloned();
        row.map(|r| r.open(&self.codec)).transpose()
    }

    async fn referrer_by_code(&self, code: &str) -> Result<Option<Referrer>, AppError> {
        let row = self
            .lock()?
            .referrers
            .values()
            .find(|r| r.code == code)
            .cloned();
        row.map(|r| r.open(&self.codec)).transpose()
    }

    async fn insert_referrer(&self, referrer: &Referrer) -> Result<(), AppError> {
        let sealed = SealedReferrer::seal(referrer, &self.codec)?;
        let mut state = self.lock()?;
        if state.referrers.values().any(|r| r.code == sealed.code) {
            return Err(AppError::Conflict(format!(
                "referrer code {} already exists",
                sealed.code
            )));
        }
        state.referrers.insert(sealed.id, sealed);
        Ok(())
    }

    async fn active_reward_config(
        &self,
        referrer_type: ReferrerType,
        trigger_event: TriggerEvent,
    ) -> Result<Option<RewardConfig>, AppError> {
        Ok(self
            .lock()?
            .reward_configs
            .iter()
            .find(|r| {
                r.is_active && r.referrer_type == referrer_type && r.trigger_event == trigger_event
            })
            .cloned())
    }

    async fn insert_commission(&self, commission: &Commission) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        if state.commission_exists(commission) {
            return Ok(false);
        }
        state.commissions.push(commission.clone());
        Ok(true)
    }

    async fn commission(&self, id: Uuid) -> Result<Option<Commission>, AppError> {
        Ok(self
            .lock()?
            .commissions
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn advance_commissions(
        &self,
        ids: &[Uuid],
        update: &CommissionUpdate,
    ) -> Result<u64, AppError> {
        let mut state = self.lock()?;
        let mut affected = 0;
        for commission in state
            .commissions
            .iter_mut()
            .filter(|c| ids.contains(&c.id) && c.status == update.from)
        {
            commission.status = update.to;
            match update.to {
                CommissionStatus::Approved => {
                    commission.approved_by = update.actor_id;
                    commission.approved_at = Some(update.at);
                }
                CommissionStatus::Paid => {
                    commission.paid_by = update.actor_id;
                    commission.paid_at = Some(update.at);
                }
                CommissionStatus::Pending | CommissionStatus::Cancelled => {}
            }
            if update.notes.is_some() {
                commission.notes = update.notes.clone();
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn active_fee_structures(
        &self,
        fee_type: BillingType,
        academic_year: &str,
    ) -> Result<Vec<FeeStructure>, AppError> {
        Ok(self
            .lock()?
            .fee_structures
            .iter()
            .filter(|f| f.is_active && f.fee_type == fee_type && f.academic_year == academic_year)
            .cloned()
            .collect())
    }

    async fn billings_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<Billing>, AppError> {
        let mut billings: Vec<Billing> = self
            .lock()?
            .billings
            .iter()
            .filter(|b| b.candidate_id == candidate_id)
            .cloned()
            .collect();
        billings.sort_by(|a, b| {
            (a.billing_type, &a.academic_year, a.installment_number).cmp(&(
                b.billing_type,
                &b.academic_year,
                b.installment_number,
            ))
        });
        Ok(billings)
    }

    async fn insert_billings(&self, billings: &[Billing]) -> Result<(), AppError> {
        self.lock()?.billings.extend(billings.iter().cloned());
        Ok(())
    }

    async fn billing(&self, id: Uuid) -> Result<Option<Billing>, AppError> {
        Ok(self.lock()?.billings.iter().find(|b| b.id == id).cloned())
    }

    async fn update_billing_status(
        &self,
        id: Uuid,
        from: BillingStatus,
        to: BillingStatus,
        actor_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        let Some(billing) = state
            .billings
            .iter_mut()
            .find(|b| b.id == id && b.status == from)
        else {
            return Ok(false);
        };
        billing.status = to;
        if from == BillingStatus::PendingVerification {
            billing.verified_by = actor_id;
        }
        if to == BillingStatus::Paid {
            billing.paid_at = Some(at);
        }
        Ok(true)
    }

    async fn document_types(&self) -> Result<Vec<DocumentType>, AppError> {
        Ok(self.lock()?.document_types.clone())
    }

    async fn candidate_documents(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<CandidateDocument>, AppError> {
        Ok(self
            .lock()?
            .documents
            .iter()
            .filter(|d| d.candidate_id == candidate_id)
            .cloned()
            .collect())
    }

    async fn set_document_status(
        &self,
        document_id: Uuid,
        status: DocumentStatus,
        actor_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        let Some(document) = state.documents.iter_mut().find(|d| d.id == document_id) else {
            return Ok(false);
        };
        document.status = status;
        document.reviewed_by = actor_id;
        document.reviewed_at = Some(at);
        Ok(true)
    }

    async fn consultant(&self, id: Uuid) -> Result<Option<Consultant>, AppError> {
        Ok(self
            .lock()?
            .consultants
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn active_assignment_algorithm(
        &self,
    ) -> Result<Option<AssignmentAlgorithm>, AppError> {
        Ok(self
            .lock()?
            .algorithms
            .iter()
            .find(|a| a.is_active)
            .cloned())
    }

    async fn consultant_workloads(&self) -> Result<Vec<ConsultantWorkload>, AppError> {
        let state = self.lock()?;
        let workloads = state
            .consultants
            .iter()
            .filter(|c| c.is_active)
            .map(|consultant| {
                let owned = state
                    .candidates
                    .values()
                    .filter(|c| c.assigned_consultant_id == Some(consultant.id));
                ConsultantWorkload {
                    consultant_id: consultant.id,
                    created_at: consultant.created_at,
                    last_assigned_at: owned.clone().filter_map(|c| c.assigned_at).max(),
                    active_candidates: owned.filter(|c| !c.status.is_terminal()).count() as i64,
                }
            })
            .collect();
        Ok(workloads)
    }

    async fn activate_assignment_algorithm(
        &self,
        id: Uuid,
    ) -> Result<Option<AssignmentAlgorithm>, AppError> {
        let mut state = self.lock()?;
        if !state.algorithms.iter().any(|a| a.id == id) {
            return Ok(None);
        }
        let mut activated = None;
        for algorithm in state.algorithms.iter_mut() {
            algorithm.is_active = algorithm.id == id;
            if algorithm.is_active {
                activated = Some(algorithm.clone());
            }
        }
        Ok(activated)
    }
}
