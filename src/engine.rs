use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::assignment::{select_consultant, AssignmentStrategy};
use crate::billing::{build_billings, resolve_fee, BillingSchedule};
use crate::commission::build_commission;
use crate::contact::{normalize_contacts, normalize_email, normalize_phone};
use crate::enrollment::{evaluate_enrollment, EnrollmentChecklist, MissingRequirement};
use crate::errors::AppError;
use crate::identifiers::{
    format_student_number, generate_referral_code, student_number_prefix, REFERRER_CODE_PREFIX,
    STUDENT_REFERRAL_PREFIX,
};
use crate::models::{
    AssignmentAlgorithm, Billing, BillingStatus, BillingType, Candidate, CandidateStatus,
    Commission, CommissionStatus, DocumentStatus, Interaction, InteractionKind, NewCandidate,
    NewReferrer, Referrer, SourceTracking, TriggerEvent,
};
use crate::notifications::{Notification, NotificationDispatcher};
use crate::status::{validate_transition, TransitionKind};
use crate::store::{
    AdmissionsStore, CandidateFilter, CommissionUpdate, ContactLookup, TransitionWrite,
};

const CODE_GENERATION_ATTEMPTS: usize = 5;

/// Tunables that are not reference data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Academic year used when a caller does not name one, e.g. `"2025/2026"`.
    pub current_academic_year: String,
    pub billing_first_due_days: u64,
    pub installment_interval_months: u32,
}

impl EngineSettings {
    /// Academic years start in July.
    pub fn academic_year_for(date: NaiveDate) -> String {
        let start = if date.month() >= 7 {
            date.year()
        } else {
            date.year() - 1
        };
        format!("{}/{}", start, start + 1)
    }

    fn schedule(&self) -> BillingSchedule {
        BillingSchedule::starting(
            Utc::now().date_naive(),
            self.billing_first_due_days,
            self.installment_interval_months,
        )
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            current_academic_year: Self::academic_year_for(Utc::now().date_naive()),
            billing_first_due_days: 14,
            installment_interval_months: 1,
        }
    }
}

/// Caller-supplied inputs for a status transition. Each kind reads only its own fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionParams {
    /// `registered -> prospecting`: lead source, if not recorded at signup.
    pub source: Option<SourceTracking>,
    /// Commit / enroll: overrides the current academic year.
    pub academic_year: Option<String>,
    pub tuition_installments: Option<u32>,
    #[serde(default)]
    pub include_dorm: bool,
    pub dorm_installments: Option<u32>,
    /// Required for `-> lost`.
    pub lost_reason_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub candidate_id: Uuid,
    pub from: CandidateStatus,
    pub to: CandidateStatus,
    /// Consultant picked during this transition, if any.
    pub assigned_consultant_id: Option<Uuid>,
    pub billings: Vec<Billing>,
    pub commission: Option<Commission>,
    /// False if no commission was owed or the ledger already had the entry.
    pub commission_created: bool,
    pub student_number: Option<String>,
    pub referral_code: Option<String>,
}

/// Status Transition Engine.
///
/// Every operation loads what it needs, plans all side-effect records up front, and persists
/// them through a single store call. A failure while planning leaves the store untouched.
/// Notifications are dispatched only after the store reports success.
pub struct AdmissionsEngine<S> {
    store: Arc<S>,
    settings: EngineSettings,
    notifications: Option<NotificationDispatcher>,
}

impl<S> Clone for AdmissionsEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
            notifications: self.notifications.clone(),
        }
    }
}

impl<S: AdmissionsStore> AdmissionsEngine<S> {
    pub fn new(store: Arc<S>, settings: EngineSettings) -> Self {
        Self {
            store,
            settings,
            notifications: None,
        }
    }

    pub fn with_notifications(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.notifications = Some(dispatcher);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn notify(&self, notification: Notification) {
        if let Some(dispatcher) = &self.notifications {
            dispatcher.dispatch(notification);
        }
    }

    async fn load_candidate(&self, id: Uuid) -> Result<Candidate, AppError> {
        self.store
            .candidate(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Candidate {} not found", id)))
    }

    // ============ Status transitions ============

    /// Validates and applies a status change with all of its side effects.
    ///
    /// Guard failures come back as `RequirementsUnmet` with every outstanding item; edges
    /// outside the transition table come back as `InvalidTransition`.
    pub async fn transition_status(
        &self,
        candidate_id: Uuid,
        target: CandidateStatus,
        params: TransitionParams,
    ) -> Result<TransitionOutcome, AppError> {
        let candidate = self.load_candidate(candidate_id).await?;
        let from = candidate.status;
        let kind = validate_transition(from, target)?;
        let now = Utc::now();

        let mut write = TransitionWrite {
            candidate_id,
            expected_status: from,
            new_status: target,
            assign_consultant: None,
            source: None,
            lost_reason_id: None,
            student_number: None,
            referral_code: None,
            billings: Vec::new(),
            commission: None,
            interaction: Interaction {
                id: Uuid::new_v4(),
                candidate_id,
                actor_id: params.actor_id,
                consultant_id: candidate.assigned_consultant_id,
                kind: InteractionKind::StatusChange,
                notes: Some(
                    params
                        .notes
                        .clone()
                        .unwrap_or_else(|| format!("{} -> {}", from, target)),
                ),
                created_at: now,
            },
            at: now,
        };

        match kind {
            TransitionKind::StartProspecting => {
                self.plan_prospecting(&candidate, &params, &mut write)
                    .await?
            }
            TransitionKind::Commit => self.plan_commit(&candidate, &params, &mut write).await?,
            TransitionKind::Enroll => self.plan_enroll(&candidate, &params, &mut write).await?,
            TransitionKind::MarkLost => self.plan_lost(&params, &mut write).await?,
        }

        if let Some(trigger) = kind.trigger_event() {
            write.commission = self
                .plan_commission(&candidate, trigger, &write.billings)
                .await?;
        }

        let applied = self.store.apply_transition(&write).await?;

        tracing::info!(
            "Candidate {} moved {} -> {} ({} billings, commission created: {})",
            candidate_id,
            from,
            target,
            write.billings.len(),
            applied.commission_created
        );

        self.notify(Notification::StatusChanged {
            candidate_id,
            from,
            to: target,
            at: now,
        });
        if let Some(consultant_id) = write.assign_consultant {
            self.notify(Notification::ConsultantAssigned {
                candidate_id,
                consultant_id,
                reassigned: false,
            });
        }
        if let (true, Some(commission)) = (applied.commission_created, &write.commission) {
            self.notify(Notification::CommissionRecorded {
                commission_id: commission.id,
                referrer_id: commission.referrer_id,
                candidate_id,
                trigger_event: commission.trigger_event,
                amount: commission.amount,
            });
        }

        Ok(TransitionOutcome {
            candidate_id,
            from,
            to: target,
            assigned_consultant_id: write.assign_consultant,
            billings: write.billings,
            commission: write.commission,
            commission_created: applied.commission_created,
            student_number: write.student_number,
            referral_code: write.referral_code,
        })
    }

    async fn plan_prospecting(
        &self,
        candidate: &Candidate,
        params: &TransitionParams,
        write: &mut TransitionWrite,
    ) -> Result<(), AppError> {
        let recorded = candidate
            .source_type
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        let supplied = params
            .source
            .as_ref()
            .filter(|s| !s.source_type.trim().is_empty());

        if !recorded && supplied.is_none() {
            return Err(AppError::RequirementsUnmet(vec![
                MissingRequirement::SourceNotRecorded,
            ]));
        }
        write.source = supplied.cloned();

        if candidate.assigned_consultant_id.is_none() {
            write.assign_consultant = self.pick_consultant(candidate.id).await?;
            if write.assign_consultant.is_some() {
                write.interaction.consultant_id = write.assign_consultant;
            }
        }
        Ok(())
    }

    async fn plan_commit(
        &self,
        candidate: &Candidate,
        params: &TransitionParams,
        write: &mut TransitionWrite,
    ) -> Result<(), AppError> {
        let academic_year = params
            .academic_year
            .clone()
            .unwrap_or_else(|| self.settings.current_academic_year.clone());
        let schedule = self.settings.schedule();

        let tuition = self
            .resolve_fee(BillingType::Tuition, candidate.program_id, &academic_year)
            .await?;
        write.billings = build_billings(
            candidate.id,
            BillingType::Tuition,
            &academic_year,
            tuition,
            params.tuition_installments.unwrap_or(1),
            &schedule,
        )?;

        if params.include_dorm {
            let dorm = self
                .resolve_fee(BillingType::Dormitory, candidate.program_id, &academic_year)
                .await?;
            write.billings.extend(build_billings(
                candidate.id,
                BillingType::Dormitory,
                &academic_year,
                dorm,
                params.dorm_installments.unwrap_or(1),
                &schedule,
            )?);
        }
        Ok(())
    }

    async fn plan_enroll(
        &self,
        candidate: &Candidate,
        params: &TransitionParams,
        write: &mut TransitionWrite,
    ) -> Result<(), AppError> {
        let checklist = self.enrollment_checklist(candidate).await?;
        if !checklist.is_eligible() {
            tracing::info!(
                "Enrollment of candidate {} refused: {} outstanding items",
                candidate.id,
                checklist.missing.len()
            );
            return Err(AppError::RequirementsUnmet(checklist.missing));
        }

        // The checklist already guarantees a program.
        let program_id = candidate.program_id.ok_or_else(|| {
            AppError::RequirementsUnmet(vec![MissingRequirement::ProgramNotSelected])
        })?;
        let program = self
            .store
            .program(program_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Program {} not found", program_id)))?;

        let academic_year = params
            .academic_year
            .clone()
            .unwrap_or_else(|| self.settings.current_academic_year.clone());
        let prefix = student_number_prefix(&academic_year, &program.code);
        let issued = self.store.count_student_numbers(&prefix).await?;
        let sequence = u32::try_from(issued + 1).map_err(|_| {
            AppError::InternalError(format!("student number overflow for {}", prefix))
        })?;

        write.student_number = Some(format_student_number(&prefix, sequence));
        write.referral_code = Some(self.unused_code(STUDENT_REFERRAL_PREFIX).await?);
        Ok(())
    }

    async fn plan_lost(
        &self,
        params: &TransitionParams,
        write: &mut TransitionWrite,
    ) -> Result<(), AppError> {
        let reason_id = params.lost_reason_id.ok_or_else(|| {
            AppError::BadRequest("A lost reason is required to mark a candidate lost".to_string())
        })?;
        let reason = self
            .store
            .lost_reason(reason_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lost reason {} not found", reason_id)))?;

        write.lost_reason_id = Some(reason.id);
        if params.notes.is_none() {
            write.interaction.notes = Some(format!("lost: {}", reason.label));
        }
        Ok(())
    }

    async fn resolve_fee(
        &self,
        fee_type: BillingType,
        program_id: Option<Uuid>,
        academic_year: &str,
    ) -> Result<i64, AppError> {
        let structures = self
            .store
            .active_fee_structures(fee_type, academic_year)
            .await?;
        resolve_fee(&structures, fee_type, program_id, academic_year)
    }

    /// Generates a referral code unused by both candidates and referrers.
    async fn unused_code(&self, prefix: &str) -> Result<String, AppError> {
        for _ in 0..CODE_GENERATION_ATTEMPTS {
            let code = generate_referral_code(prefix);
            if self.store.candidate_by_referral_code(&code).await?.is_none()
                && self.store.referrer_by_code(&code).await?.is_none()
            {
                return Ok(code);
            }
        }
        Err(AppError::Conflict(format!(
            "could not generate an unused {} code",
            prefix
        )))
    }

    // ============ Consultant assignment ============

    async fn pick_consultant(&self, candidate_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let Some(algorithm) = self.store.active_assignment_algorithm().await? else {
            tracing::warn!(
                "No active assignment algorithm; candidate {} stays unassigned",
                candidate_id
            );
            return Ok(None);
        };

        let strategy = AssignmentStrategy::for_code(&algorithm.code);
        let workloads = self.store.consultant_workloads().await?;
        let picked = select_consultant(strategy, &workloads);

        match picked {
            Some(consultant_id) => tracing::debug!(
                "{:?} picked consultant {} for candidate {}",
                strategy,
                consultant_id,
                candidate_id
            ),
            None => tracing::warn!(
                "No active consultants; candidate {} stays unassigned",
                candidate_id
            ),
        }
        Ok(picked)
    }

    /// Sets the owner of a non-terminal candidate directly, bypassing the selector.
    /// Role checks belong to the caller.
    pub async fn reassign_consultant(
        &self,
        candidate_id: Uuid,
        consultant_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> Result<Candidate, AppError> {
        let candidate = self.load_candidate(candidate_id).await?;
        if candidate.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Candidate {} is {} and cannot be reassigned",
                candidate_id, candidate.status
            )));
        }

        let consultant = self
            .store
            .consultant(consultant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Consultant {} not found", consultant_id)))?;
        if !consultant.is_active {
            return Err(AppError::BadRequest(format!(
                "Consultant {} is inactive",
                consultant_id
            )));
        }

        let previous = candidate
            .assigned_consultant_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unassigned".to_string());
        let interaction = Interaction {
            id: Uuid::new_v4(),
            candidate_id,
            actor_id,
            consultant_id: Some(consultant_id),
            kind: InteractionKind::Reassignment,
            notes: Some(format!("reassigned from {} to {}", previous, consultant_id)),
            created_at: Utc::now(),
        };

        if !self
            .store
            .reassign_consultant(candidate_id, consultant_id, &interaction)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "Candidate {} changed while reassigning",
                candidate_id
            )));
        }

        tracing::info!(
            "Candidate {} reassigned to consultant {}",
            candidate_id,
            consultant_id
        );
        self.notify(Notification::ConsultantAssigned {
            candidate_id,
            consultant_id,
            reassigned: true,
        });

        self.load_candidate(candidate_id).await
    }

    /// Makes `algorithm_id` the only active assignment algorithm.
    pub async fn set_active_assignment_algorithm(
        &self,
        algorithm_id: Uuid,
    ) -> Result<AssignmentAlgorithm, AppError> {
        let algorithm = self
            .store
            .activate_assignment_algorithm(algorithm_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Assignment algorithm {} not found", algorithm_id))
            })?;
        tracing::info!(
            "Assignment algorithm {} ({}) activated",
            algorithm.id,
            algorithm.code.as_str()
        );
        Ok(algorithm)
    }

    // ============ Commissions ============

    async fn plan_commission(
        &self,
        candidate: &Candidate,
        trigger: TriggerEvent,
        pending_billings: &[Billing],
    ) -> Result<Option<Commission>, AppError> {
        let Some(referrer_id) = candidate.referrer_id else {
            return Ok(None);
        };
        let Some(referrer) = self.store.referrer(referrer_id).await? else {
            tracing::warn!(
                "Referrer {} of candidate {} no longer exists; no commission",
                referrer_id,
                candidate.id
            );
            return Ok(None);
        };

        let reward = if referrer.commission_override.is_some() {
            None
        } else {
            self.store
                .active_reward_config(referrer.referrer_type, trigger)
                .await?
        };

        let base_amount = match &reward {
            Some(rule) if rule.is_percentage => {
                let existing = self.store.billings_for_candidate(candidate.id).await?;
                existing
                    .iter()
                    .chain(pending_billings)
                    .filter(|b| b.billing_type == BillingType::Tuition)
                    .map(|b| b.amount)
                    .sum()
            }
            _ => 0,
        };

        let commission = build_commission(
            &referrer,
            candidate.id,
            trigger,
            reward.as_ref(),
            base_amount,
        );
        if commission.is_none() {
            tracing::debug!(
                "No {} commission owed to referrer {} for candidate {}",
                trigger,
                referrer.id,
                candidate.id
            );
        }
        Ok(commission)
    }

    /// Records the commission for `trigger` outside a status transition.
    /// Returns false when nothing is owed or the entry already exists.
    pub async fn compute_and_record_commission(
        &self,
        candidate_id: Uuid,
        trigger: TriggerEvent,
    ) -> Result<bool, AppError> {
        let candidate = self.load_candidate(candidate_id).await?;
        let Some(commission) = self.plan_commission(&candidate, trigger, &[]).await? else {
            return Ok(false);
        };

        let created = self.store.insert_commission(&commission).await?;
        if created {
            tracing::info!(
                "Recorded {} commission {} of {} for candidate {}",
                trigger,
                commission.id,
                commission.amount,
                candidate_id
            );
            self.notify(Notification::CommissionRecorded {
                commission_id: commission.id,
                referrer_id: commission.referrer_id,
                candidate_id,
                trigger_event: trigger,
                amount: commission.amount,
            });
        } else {
            tracing::debug!(
                "{} commission for candidate {} already recorded",
                trigger,
                candidate_id
            );
        }
        Ok(created)
    }

    async fn advance_commission(
        &self,
        commission_id: Uuid,
        to: CommissionStatus,
        actor_id: Option<Uuid>,
        notes: Option<String>,
    ) -> Result<Commission, AppError> {
        let from = to.required_prior().ok_or_else(|| {
            AppError::BadRequest(format!("Commissions cannot be moved to {}", to))
        })?;
        let update = CommissionUpdate {
            from,
            to,
            actor_id,
            notes,
            at: Utc::now(),
        };

        let affected = self
            .store
            .advance_commissions(&[commission_id], &update)
            .await?;

        let commission = self.store.commission(commission_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Commission {} not found", commission_id))
        })?;
        if affected == 0 {
            return Err(AppError::Conflict(format!(
                "Commission {} is {}, expected {}",
                commission_id, commission.status, from
            )));
        }

        tracing::info!("Commission {} {} -> {}", commission_id, from, to);
        Ok(commission)
    }

    async fn advance_commission_batch(
        &self,
        ids: &[Uuid],
        to: CommissionStatus,
        actor_id: Option<Uuid>,
        notes: Option<String>,
    ) -> Result<u64, AppError> {
        let from = to.required_prior().ok_or_else(|| {
            AppError::BadRequest(format!("Commissions cannot be moved to {}", to))
        })?;
        let update = CommissionUpdate {
            from,
            to,
            actor_id,
            notes,
            at: Utc::now(),
        };

        let affected = self.store.advance_commissions(ids, &update).await?;
        tracing::info!(
            "Batch {} -> {}: {} of {} commissions updated",
            from,
            to,
            affected,
            ids.len()
        );
        Ok(affected)
    }

    pub async fn approve_commission(
        &self,
        commission_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> Result<Commission, AppError> {
        self.advance_commission(commission_id, CommissionStatus::Approved, actor_id, None)
            .await
    }

    pub async fn mark_commission_paid(
        &self,
        commission_id: Uuid,
        actor_id: Option<Uuid>,
        notes: Option<String>,
    ) -> Result<Commission, AppError> {
        self.advance_commission(commission_id, CommissionStatus::Paid, actor_id, notes)
            .await
    }

    pub async fn cancel_commission(
        &self,
        commission_id: Uuid,
        actor_id: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<Commission, AppError> {
        self.advance_commission(commission_id, CommissionStatus::Cancelled, actor_id, reason)
            .await
    }

    /// Approves every pending id; others are skipped. Returns how many were approved.
    pub async fn approve_commissions(
        &self,
        ids: &[Uuid],
        actor_id: Option<Uuid>,
    ) -> Result<u64, AppError> {
        self.advance_commission_batch(ids, CommissionStatus::Approved, actor_id, None)
            .await
    }

    /// Marks every approved id paid; others are skipped. Returns how many were paid.
    pub async fn mark_commissions_paid(
        &self,
        ids: &[Uuid],
        actor_id: Option<Uuid>,
        notes: Option<String>,
    ) -> Result<u64, AppError> {
        self.advance_commission_batch(ids, CommissionStatus::Paid, actor_id, notes)
            .await
    }

    // ============ Billing ============

    /// Resolves the fee and issues `installments` unpaid billing rows.
    pub async fn generate_billing(
        &self,
        candidate_id: Uuid,
        fee_type: BillingType,
        academic_year: Option<String>,
        installments: u32,
    ) -> Result<Vec<Billing>, AppError> {
        let candidate = self.load_candidate(candidate_id).await?;
        let academic_year =
            academic_year.unwrap_or_else(|| self.settings.current_academic_year.clone());

        let total = self
            .resolve_fee(fee_type, candidate.program_id, &academic_year)
            .await?;
        let billings = build_billings(
            candidate_id,
            fee_type,
            &academic_year,
            total,
            installments,
            &self.settings.schedule(),
        )?;
        self.store.insert_billings(&billings).await?;

        tracing::info!(
            "Issued {} {} billing(s) totalling {} for candidate {}",
            billings.len(),
            fee_type,
            total,
            candidate_id
        );
        Ok(billings)
    }

    async fn move_billing(
        &self,
        billing_id: Uuid,
        to: BillingStatus,
        actor_id: Option<Uuid>,
    ) -> Result<Billing, AppError> {
        let billing = self
            .store
            .billing(billing_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Billing {} not found", billing_id)))?;
        let from = billing.status;
        if !from.can_transition_to(to) {
            return Err(AppError::Conflict(format!(
                "Billing {} is {} and cannot become {}",
                billing_id, from, to
            )));
        }

        if !self
            .store
            .update_billing_status(billing_id, from, to, actor_id, Utc::now())
            .await?
        {
            return Err(AppError::Conflict(format!(
                "Billing {} changed concurrently",
                billing_id
            )));
        }

        tracing::info!("Billing {} {} -> {}", billing_id, from, to);
        self.store
            .billing(billing_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Billing {} not found", billing_id)))
    }

    /// `unpaid -> pending_verification` once the candidate reports a payment.
    pub async fn submit_billing_payment(&self, billing_id: Uuid) -> Result<Billing, AppError> {
        self.move_billing(billing_id, BillingStatus::PendingVerification, None)
            .await
    }

    /// Finance verification: paid when approved, back to unpaid when rejected.
    pub async fn verify_billing_payment(
        &self,
        billing_id: Uuid,
        actor_id: Option<Uuid>,
        approved: bool,
    ) -> Result<Billing, AppError> {
        let to = if approved {
            BillingStatus::Paid
        } else {
            BillingStatus::Unpaid
        };
        self.move_billing(billing_id, to, actor_id).await
    }

    // ============ Enrollment checklist & documents ============

    async fn enrollment_checklist(
        &self,
        candidate: &Candidate,
    ) -> Result<EnrollmentChecklist, AppError> {
        let billings = self.store.billings_for_candidate(candidate.id).await?;
        let document_types = self.store.document_types().await?;
        let documents = self.store.candidate_documents(candidate.id).await?;

        let mut checklist =
            evaluate_enrollment(candidate.id, &billings, &document_types, &documents);
        if candidate.program_id.is_none() {
            checklist.missing.push(MissingRequirement::ProgramNotSelected);
        }
        Ok(checklist)
    }

    /// Everything still standing between the candidate and enrollment.
    pub async fn check_enrollment_eligibility(
        &self,
        candidate_id: Uuid,
    ) -> Result<EnrollmentChecklist, AppError> {
        let candidate = self.load_candidate(candidate_id).await?;
        self.enrollment_checklist(&candidate).await
    }

    pub async fn review_document(
        &self,
        document_id: Uuid,
        actor_id: Option<Uuid>,
        status: DocumentStatus,
    ) -> Result<(), AppError> {
        let updated = self
            .store
            .set_document_status(document_id, status, actor_id, Utc::now())
            .await?;
        if !updated {
            return Err(AppError::NotFound(format!(
                "Document {} not found",
                document_id
            )));
        }
        tracing::info!("Document {} reviewed as {}", document_id, status.as_str());
        Ok(())
    }

    // ============ Registration & lookup ============

    /// Creates a `registered` candidate.
    ///
    /// Requires a name and at least one of email/phone. A referral code may name either a
    /// referrer or an enrolled student.
    pub async fn register_candidate(&self, input: NewCandidate) -> Result<Candidate, AppError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Candidate name is required".to_string()));
        }

        let contacts = normalize_contacts(input.email.as_deref(), input.phone.as_deref())?;
        let external_id = input
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let mut lookups = Vec::new();
        if let Some(email) = &contacts.email {
            lookups.push(ContactLookup::Email(email.clone()));
        }
        if let Some(phone) = &contacts.phone {
            lookups.push(ContactLookup::Phone(phone.clone()));
        }
        if let Some(id) = &external_id {
            lookups.push(ContactLookup::ExternalIdentity(id.clone()));
        }
        for lookup in &lookups {
            if self.store.find_candidate_by_contact(lookup).await?.is_some() {
                return Err(AppError::Conflict(
                    "A candidate with this contact is already registered".to_string(),
                ));
            }
        }

        let (referrer_id, referred_by_candidate_id) = match input
            .referral_code
            .as_deref()
            .map(|code| code.trim().to_uppercase())
            .filter(|code| !code.is_empty())
        {
            Some(code) => self.resolve_referral_code(&code).await?,
            None => (None, None),
        };

        let now = Utc::now();
        let (source_type, source_detail) = match input.source {
            Some(source) if !source.source_type.trim().is_empty() => {
                (Some(source.source_type), source.source_detail)
            }
            _ => (None, None),
        };

        let candidate = Candidate {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: contacts.email,
            phone: contacts.phone,
            external_id,
            email_verified: false,
            phone_verified: false,
            address: input.address,
            city: input.city,
            province: input.province,
            school_name: input.school_name,
            graduation_year: input.graduation_year,
            program_id: input.program_id,
            campaign_id: input.campaign_id,
            referrer_id,
            referred_by_candidate_id,
            assigned_consultant_id: None,
            assigned_at: None,
            source_type,
            source_detail,
            status: CandidateStatus::Registered,
            lost_reason_id: None,
            lost_at: None,
            student_number: None,
            referral_code: None,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_candidate(&candidate).await?;
        tracing::info!("Registered candidate {}", candidate.id);
        Ok(candidate)
    }

    async fn resolve_referral_code(
        &self,
        code: &str,
    ) -> Result<(Option<Uuid>, Option<Uuid>), AppError> {
        if let Some(referrer) = self.store.referrer_by_code(code).await? {
            if !referrer.is_active {
                return Err(AppError::BadRequest(format!(
                    "Referral code {} is no longer active",
                    code
                )));
            }
            return Ok((Some(referrer.id), None));
        }
        if let Some(peer) = self.store.candidate_by_referral_code(code).await? {
            return Ok((None, Some(peer.id)));
        }
        Err(AppError::BadRequest(format!("Unknown referral code {}", code)))
    }

    pub async fn register_referrer(&self, input: NewReferrer) -> Result<Referrer, AppError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Referrer name is required".to_string()));
        }
        if input.commission_override.is_some_and(|amount| amount <= 0) {
            return Err(AppError::BadRequest(
                "Commission override must be positive".to_string(),
            ));
        }

        let email = input
            .email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .map(normalize_email)
            .transpose()?;
        let phone = input
            .phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(normalize_phone)
            .transpose()?;

        let code = match input
            .code
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
        {
            Some(code) => code,
            None => self.unused_code(REFERRER_CODE_PREFIX).await?,
        };

        let referrer = Referrer {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email,
            phone,
            referrer_type: input.referrer_type,
            commission_override: input.commission_override,
            payout_preference: input.payout_preference,
            bank: input.bank,
            code,
            is_active: true,
            created_at: Utc::now(),
        };

        self.store.insert_referrer(&referrer).await?;
        tracing::info!(
            "Registered {} referrer {} with code {}",
            referrer.referrer_type,
            referrer.id,
            referrer.code
        );
        Ok(referrer)
    }

    pub async fn candidate(&self, candidate_id: Uuid) -> Result<Candidate, AppError> {
        self.load_candidate(candidate_id).await
    }

    pub async fn candidate_interactions(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<Interaction>, AppError> {
        self.store.interactions(candidate_id).await
    }

    /// Exact-match lookup; the value is normalized before its search token is computed.
    pub async fn find_candidate_by_contact(
        &self,
        lookup: ContactLookup,
    ) -> Result<Option<Candidate>, AppError> {
        let normalized = match lookup {
            ContactLookup::Email(email) => ContactLookup::Email(normalize_email(&email)?),
            ContactLookup::Phone(phone) => ContactLookup::Phone(normalize_phone(&phone)?),
            ContactLookup::ExternalIdentity(id) => {
                ContactLookup::ExternalIdentity(id.trim().to_string())
            }
        };
        self.store.find_candidate_by_contact(&normalized).await
    }

    pub async fn list_candidates(
        &self,
        mut filter: CandidateFilter,
    ) -> Result<Vec<Candidate>, AppError> {
        filter.email = filter
            .email
            .as_deref()
            .map(normalize_email)
            .transpose()?;
        filter.phone = filter
            .phone
            .as_deref()
            .map(normalize_phone)
            .transpose()?;
        self.store.list_candidates(&filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn academic_year_switches_in_july() {
        let june = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let july = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        assert_eq!(EngineSettings::academic_year_for(june), "2024/2025");
        assert_eq!(EngineSettings::academic_year_for(july), "2025/2026");
    }

    #[test]
    fn transition_params_default_to_single_installments() {
        let params: TransitionParams = serde_json::from_str("{}").unwrap();
        assert!(!params.include_dorm);
        assert!(params.tuition_installments.is_none());
    }
}
