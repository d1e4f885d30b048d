use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use uuid::Uuid;

use crate::assignment::ConsultantWorkload;
use crate::errors::{AppError, ResultExt};
use crate::models::{
    AssignmentAlgorithm, Billing, BillingStatus, BillingType, Candidate, CandidateDocument,
    CandidateStatus, Commission, CommissionStatus, Consultant, DocumentStatus, DocumentType,
    FeeStructure, Interaction, LostReason, Program, Referrer, ReferrerType, RewardConfig,
    TriggerEvent,
};
use crate::pii::{PiiCodec, PiiField};
use crate::sealed::{SealedCandidate, SealedReferrer};
use crate::store::{
    AdmissionsStore, CandidateFilter, CommissionUpdate, ContactLookup, TransitionApplied,
    TransitionWrite,
};

const CANDIDATE_COLUMNS: &str = "id, name_enc, email_enc, phone_enc, external_id_enc, \
     email_verified, phone_verified, address_enc, city_enc, province_enc, school_name, \
     graduation_year, program_id, campaign_id, referrer_id, referred_by_candidate_id, \
     assigned_consultant_id, assigned_at, source_type, source_detail, status, lost_reason_id, \
     lost_at, student_number, referral_code, created_at, updated_at";

const REFERRER_COLUMNS: &str = "id, name_enc, email_enc, phone_enc, referrer_type, \
     commission_override, payout_preference, bank_name_enc, bank_account_number_enc, \
     bank_account_holder_enc, code, is_active, created_at";

const COMMISSION_COLUMNS: &str = "id, referrer_id, candidate_id, trigger_event, amount, status, \
     approved_by, approved_at, paid_by, paid_at, notes, created_at";

const BILLING_COLUMNS: &str = "id, candidate_id, billing_type, academic_year, amount, \
     installment_number, installment_count, due_date, status, verified_by, paid_at, created_at";

/// PostgreSQL storage for the admissions schema.
///
/// PII columns (`*_enc`) only ever hold codec output; lookups on email, phone and external
/// identity compare deterministic search tokens.
pub struct AdmissionsStorage {
    pool: PgPool,
    codec: Arc<PiiCodec>,
}

impl AdmissionsStorage {
    pub fn new(pool: PgPool, codec: Arc<PiiCodec>) -> Self {
        Self { pool, codec }
    }

    fn open_all(&self, rows: Vec<SealedCandidate>) -> Result<Vec<Candidate>, AppError> {
        rows.into_iter().map(|row| row.open(&self.codec)).collect()
    }

    async fn insert_interaction<'c, E>(
        executor: E,
        interaction: &Interaction,
    ) -> Result<(), AppError>
    where
        E: sqlx::PgExecutor<'c>,
    {
        sqlx::query(
            "INSERT INTO admissions.interactions \
             (id, candidate_id, actor_id, consultant_id, kind, notes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(interaction.id)
        .bind(interaction.candidate_id)
        .bind(interaction.actor_id)
        .bind(interaction.consultant_id)
        .bind(interaction.kind.as_str())
        .bind(&interaction.notes)
        .bind(interaction.created_at)
        .execute(executor)
        .await
        .context("Failed to record interaction")?;
        Ok(())
    }

    async fn insert_billing<'c, E>(executor: E, billing: &Billing) -> Result<(), AppError>
    where
        E: sqlx::PgExecutor<'c>,
    {
        sqlx::query(&format!(
            "INSERT INTO admissions.billings ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            BILLING_COLUMNS
        ))
        .bind(billing.id)
        .bind(billing.candidate_id)
        .bind(billing.billing_type.as_str())
        .bind(&billing.academic_year)
        .bind(billing.amount)
        .bind(billing.installment_number)
        .bind(billing.installment_count)
        .bind(billing.due_date)
        .bind(billing.status.as_str())
        .bind(billing.verified_by)
        .bind(billing.paid_at)
        .bind(billing.created_at)
        .execute(executor)
        .await
        .context("Failed to insert billing")?;
        Ok(())
    }

    /// Inserts a ledger row unless its `(referrer, candidate, trigger)` triple exists.
    async fn insert_commission_row<'c, E>(
        executor: E,
        commission: &Commission,
    ) -> Result<bool, AppError>
    where
        E: sqlx::PgExecutor<'c>,
    {
        let result = sqlx::query(&format!(
            "INSERT INTO admissions.commissions ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (referrer_id, candidate_id, trigger_event) DO NOTHING",
            COMMISSION_COLUMNS
        ))
        .bind(commission.id)
        .bind(commission.referrer_id)
        .bind(commission.candidate_id)
        .bind(commission.trigger_event.as_str())
        .bind(commission.amount)
        .bind(commission.status.as_str())
        .bind(commission.approved_by)
        .bind(commission.approved_at)
        .bind(commission.paid_by)
        .bind(commission.paid_at)
        .bind(&commission.notes)
        .bind(commission.created_at)
        .execute(executor)
        .await
        .context("Failed to insert commission")?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl AdmissionsStore for AdmissionsStorage {
    async fn candidate(&self, id: Uuid) -> Result<Option<Candidate>, AppError> {
        let row = sqlx::query_as::<_, SealedCandidate>(&format!(
            "SELECT {} FROM admissions.candidates WHERE id = $1",
            CANDIDATE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.open(&self.codec)).transpose()
    }

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<(), AppError> {
        let row = SealedCandidate::seal(candidate, &self.codec)?;

        sqlx::query(&format!(
            "INSERT INTO admissions.candidates ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
              $19, $20, $21, $22, $23, $24, $25, $26, $27)",
            CANDIDATE_COLUMNS
        ))
        .bind(row.id)
        .bind(&row.name_enc)
        .bind(&row.email_enc)
        .bind(&row.phone_enc)
        .bind(&row.external_id_enc)
        .bind(row.email_verified)
        .bind(row.phone_verified)
        .bind(&row.address_enc)
        .bind(&row.city_enc)
        .bind(&row.province_enc)
        .bind(&row.school_name)
        .bind(row.graduation_year)
        .bind(row.program_id)
        .bind(row.campaign_id)
        .bind(row.referrer_id)
        .bind(row.referred_by_candidate_id)
        .bind(row.assigned_consultant_id)
        .bind(row.assigned_at)
        .bind(&row.source_type)
        .bind(&row.source_detail)
        .bind(row.status.as_str())
        .bind(row.lost_reason_id)
        .bind(row.lost_at)
        .bind(&row.student_number)
        .bind(&row.referral_code)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Inserted candidate {}", row.id);
        Ok(())
    }

    async fn find_candidate_by_contact(
        &self,
        lookup: &ContactLookup,
    ) -> Result<Option<Candidate>, AppError> {
        let (column, field, value) = match lookup {
            ContactLookup::Email(v) => ("email_enc", PiiField::Email, v),
            ContactLookup::Phone(v) => ("phone_enc", PiiField::Phone, v),
            ContactLookup::ExternalIdentity(v) => {
                ("external_id_enc", PiiField::ExternalIdentity, v)
            }
        };
        let token = self.codec.search_token(field, value)?;

        let row = sqlx::query_as::<_, SealedCandidate>(&format!(
            "SELECT {} FROM admissions.candidates WHERE {} = $1",
            CANDIDATE_COLUMNS, column
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.open(&self.codec)).transpose()
    }

    async fn candidate_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<Candidate>, AppError> {
        let row = sqlx::query_as::<_, SealedCandidate>(&format!(
            "SELECT {} FROM admissions.candidates WHERE referral_code = $1",
            CANDIDATE_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.open(&self.codec)).transpose()
    }

    async fn list_candidates(&self, filter: &CandidateFilter) -> Result<Vec<Candidate>, AppError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM admissions.candidates WHERE TRUE",
            CANDIDATE_COLUMNS
        ));

        if !filter.statuses.is_empty() {
            let statuses: Vec<String> = filter
                .statuses
                .iter()
                .map(|s| s.as_str().to_string())
                .collect();
            qb.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        if let Some(consultant_id) = filter.consultant_id {
            qb.push(" AND assigned_consultant_id = ").push_bind(consultant_id);
        }
        if let Some(referrer_id) = filter.referrer_id {
            qb.push(" AND referrer_id = ").push_bind(referrer_id);
        }
        if let Some(program_id) = filter.program_id {
            qb.push(" AND program_id = ").push_bind(program_id);
        }
        if let Some(campaign_id) = filter.campaign_id {
            qb.push(" AND campaign_id = ").push_bind(campaign_id);
        }
        if let Some(from) = filter.created_from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.created_to {
            qb.push(" AND created_at < ").push_bind(to);
        }
        if let Some(email) = &filter.email {
            let token = self.codec.search_token(PiiField::Email, email)?;
            qb.push(" AND email_enc = ").push_bind(token);
        }
        if let Some(phone) = &filter.phone {
            let token = self.codec.search_token(PiiField::Phone, phone)?;
            qb.push(" AND phone_enc = ").push_bind(token);
        }

        qb.push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(filter.effective_limit())
            .push(" OFFSET ")
            .push_bind(filter.effective_offset());

        let rows = qb
            .build_query_as::<SealedCandidate>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to list candidates")?;

        self.open_all(rows)
    }

    async fn apply_transition(
        &self,
        write: &TransitionWrite,
    ) -> Result<TransitionApplied, AppError> {
        let mut tx = self.pool.begin().await?;

        let (source_type, source_detail) = match &write.source {
            Some(source) => (Some(source.source_type.clone()), source.source_detail.clone()),
            None => (None, None),
        };
        let lost_at = (write.new_status == CandidateStatus::Lost).then_some(write.at);

        // Conditional on the status read by the engine; a concurrent transition makes this
        // match zero rows.
        let updated = sqlx::query(
            "UPDATE admissions.candidates SET \
                 status = $3, \
                 assigned_consultant_id = COALESCE($4, assigned_consultant_id), \
                 assigned_at = CASE WHEN $4::uuid IS NULL THEN assigned_at ELSE $5 END, \
                 source_type = COALESCE($6, source_type), \
                 source_detail = CASE WHEN $6::text IS NULL THEN source_detail ELSE $7 END, \
                 lost_reason_id = CASE WHEN $8::timestamptz IS NULL THEN lost_reason_id ELSE $9 END, \
                 lost_at = COALESCE($8, lost_at), \
                 student_number = COALESCE($10, student_number), \
                 referral_code = COALESCE($11, referral_code), \
                 updated_at = $5 \
             WHERE id = $1 AND status = $2",
        )
        .bind(write.candidate_id)
        .bind(write.expected_status.as_str())
        .bind(write.new_status.as_str())
        .bind(write.assign_consultant)
        .bind(write.at)
        .bind(source_type)
        .bind(source_detail)
        .bind(lost_at)
        .bind(write.lost_reason_id)
        .bind(&write.student_number)
        .bind(&write.referral_code)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::Conflict(format!(
                "candidate {} is no longer {}",
                write.candidate_id, write.expected_status
            )));
        }

        for billing in &write.billings {
            Self::insert_billing(&mut *tx, billing).await?;
        }

        let commission_created = match &write.commission {
            Some(commission) => Self::insert_commission_row(&mut *tx, commission).await?,
            None => false,
        };

        Self::insert_interaction(&mut *tx, &write.interaction).await?;

        tx.commit().await?;

        Ok(TransitionApplied { commission_created })
    }

    async fn reassign_consultant(
        &self,
        candidate_id: Uuid,
        consultant_id: Uuid,
        interaction: &Interaction,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE admissions.candidates \
             SET assigned_consultant_id = $2, assigned_at = $3, updated_at = $3 \
             WHERE id = $1 AND status NOT IN ('enrolled', 'lost')",
        )
        .bind(candidate_id)
        .bind(consultant_id)
        .bind(interaction.created_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::insert_interaction(&mut *tx, interaction).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn interactions(&self, candidate_id: Uuid) -> Result<Vec<Interaction>, AppError> {
        let rows = sqlx::query_as::<_, Interaction>(
            "SELECT id, candidate_id, actor_id, consultant_id, kind, notes, created_at \
             FROM admissions.interactions WHERE candidate_id = $1 ORDER BY created_at",
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn program(&self, id: Uuid) -> Result<Option<Program>, AppError> {
        let program = sqlx::query_as::<_, Program>(
            "SELECT id, code, name FROM admissions.programs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(program)
    }

    async fn lost_reason(&self, id: Uuid) -> Result<Option<LostReason>, AppError> {
        let reason = sqlx::query_as::<_, LostReason>(
            "SELECT id, label, is_active FROM admissions.lost_reasons WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reason)
    }

    async fn count_student_numbers(&self, prefix: &str) -> Result<i64, AppError> {
        // Prefix compared literally; the remainder must be the numeric sequence only
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM admissions.candidates \
             WHERE left(student_number, length($1)) = $1 \
               AND substr(student_number, length($1) + 1) ~ '^[0-9]+$'",
        )
        .bind(prefix)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn referrer(&self, id: Uuid) -> Result<Option<Referrer>, AppError> {
        let row = sqlx::query_as::<_, SealedReferrer>(&format!(
            "SELECT {} FROM admissions.referrers WHERE id = $1",
            REFERRER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.open(&self.codec)).transpose()
    }

    async fn referrer_by_code(&self, code: &str) -> Result<Option<Referrer>, AppError> {
        let row = sqlx::query_as::<_, SealedReferrer>(&format!(
            "SELECT {} FROM admissions.referrers WHERE code = $1",
            REFERRER_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.open(&self.codec)).transpose()
    }

    async fn insert_referrer(&self, referrer: &Referrer) -> Result<(), AppError> {
        let row = SealedReferrer::seal(referrer, &self.codec)?;

        sqlx::query(&format!(
            "INSERT INTO admissions.referrers ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            REFERRER_COLUMNS
        ))
        .bind(row.id)
        .bind(&row.name_enc)
        .bind(&row.email_enc)
        .bind(&row.phone_enc)
        .bind(row.referrer_type.as_str())
        .bind(row.commission_override)
        .bind(&row.payout_preference)
        .bind(&row.bank_name_enc)
        .bind(&row.bank_account_number_enc)
        .bind(&row.bank_account_holder_enc)
        .bind(&row.code)
        .bind(row.is_active)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_reward_config(
        &self,
        referrer_type: ReferrerType,
        trigger_event: TriggerEvent,
    ) -> Result<Option<RewardConfig>, AppError> {
        let reward = sqlx::query_as::<_, RewardConfig>(
            "SELECT id, referrer_type, trigger_event, amount, is_percentage, reward_type, is_active \
             FROM admissions.reward_configs \
             WHERE referrer_type = $1 AND trigger_event = $2 AND is_active \
             ORDER BY id LIMIT 1",
        )
        .bind(referrer_type.as_str())
        .bind(trigger_event.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(reward)
    }

    async fn insert_commission(&self, commission: &Commission) -> Result<bool, AppError> {
        Self::insert_commission_row(&self.pool, commission).await
    }

    async fn commission(&self, id: Uuid) -> Result<Option<Commission>, AppError> {
        let commission = sqlx::query_as::<_, Commission>(&format!(
            "SELECT {} FROM admissions.commissions WHERE id = $1",
            COMMISSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(commission)
    }

    async fn advance_commissions(
        &self,
        ids: &[Uuid],
        update: &CommissionUpdate,
    ) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE admissions.commissions SET status = ");
        qb.push_bind(update.to.as_str());
        match update.to {
            CommissionStatus::Approved => {
                qb.push(", approved_by = ")
                    .push_bind(update.actor_id)
                    .push(", approved_at = ")
                    .push_bind(update.at);
            }
            CommissionStatus::Paid => {
                qb.push(", paid_by = ")
                    .push_bind(update.actor_id)
                    .push(", paid_at = ")
                    .push_bind(update.at);
            }
            CommissionStatus::Pending | CommissionStatus::Cancelled => {}
        }
        if let Some(notes) = &update.notes {
            qb.push(", notes = ").push_bind(notes.clone());
        }
        qb.push(" WHERE id = ANY(")
            .push_bind(ids.to_vec())
            .push(") AND status = ")
            .push_bind(update.from.as_str());

        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .context("Failed to advance commissions")?;

        Ok(result.rows_affected())
    }

    async fn active_fee_structures(
        &self,
        fee_type: BillingType,
        academic_year: &str,
    ) -> Result<Vec<FeeStructure>, AppError> {
        let rows = sqlx::query_as::<_, FeeStructure>(
            "SELECT id, fee_type, program_id, academic_year, amount, is_active \
             FROM admissions.fee_structures \
             WHERE fee_type = $1 AND academic_year = $2 AND is_active",
        )
        .bind(fee_type.as_str())
        .bind(academic_year)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn billings_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<Billing>, AppError> {
        let rows = sqlx::query_as::<_, Billing>(&format!(
            "SELECT {} FROM admissions.billings WHERE candidate_id = $1 \
             ORDER BY billing_type, academic_year, installment_number",
            BILLING_COLUMNS
        ))
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_billings(&self, billings: &[Billing]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        for billing in billings {
            Self::insert_billing(&mut *tx, billing).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn billing(&self, id: Uuid) -> Result<Option<Billing>, AppError> {
        let billing = sqlx::query_as::<_, Billing>(&format!(
            "SELECT {} FROM admissions.billings WHERE id = $1",
            BILLING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(billing)
    }

    async fn update_billing_status(
        &self,
        id: Uuid,
        from: BillingStatus,
        to: BillingStatus,
        actor_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let verified_by = (from == BillingStatus::PendingVerification)
            .then_some(actor_id)
            .flatten();
        let paid_at = (to == BillingStatus::Paid).then_some(at);

        let result = sqlx::query(
            "UPDATE admissions.billings \
             SET status = $3, verified_by = COALESCE($4, verified_by), paid_at = COALESCE($5, paid_at) \
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(verified_by)
        .bind(paid_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn document_types(&self) -> Result<Vec<DocumentType>, AppError> {
        let rows = sqlx::query_as::<_, DocumentType>(
            "SELECT id, code, name, is_required, is_deferred FROM admissions.document_types ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn candidate_documents(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<CandidateDocument>, AppError> {
        let rows = sqlx::query_as::<_, CandidateDocument>(
            "SELECT id, candidate_id, document_type_id, status, reviewed_by, reviewed_at, uploaded_at \
             FROM admissions.candidate_documents WHERE candidate_id = $1",
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_document_status(
        &self,
        document_id: Uuid,
        status: DocumentStatus,
        actor_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE admissions.candidate_documents \
             SET status = $2, reviewed_by = $3, reviewed_at = $4 WHERE id = $1",
        )
        .bind(document_id)
        .bind(status.as_str())
        .bind(actor_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn consultant(&self, id: Uuid) -> Result<Option<Consultant>, AppError> {
        let consultant = sqlx::query_as::<_, Consultant>(
            "SELECT id, name, is_active, created_at FROM admissions.consultants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(consultant)
    }

    async fn active_assignment_algorithm(
        &self,
    ) -> Result<Option<AssignmentAlgorithm>, AppError> {
        let algorithm = sqlx::query_as::<_, AssignmentAlgorithm>(
            "SELECT id, code, name, is_active FROM admissions.assignment_algorithms WHERE is_active",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(algorithm)
    }

    async fn consultant_workloads(&self) -> Result<Vec<ConsultantWorkload>, AppError> {
        let rows = sqlx::query_as::<_, ConsultantWorkload>(
            "SELECT c.id AS consultant_id, c.created_at, \
                    MAX(cand.assigned_at) AS last_assigned_at, \
                    COUNT(cand.id) FILTER (WHERE cand.status NOT IN ('enrolled', 'lost')) AS active_candidates \
             FROM admissions.consultants c \
             LEFT JOIN admissions.candidates cand ON cand.assigned_consultant_id = c.id \
             WHERE c.is_active \
             GROUP BY c.id, c.created_at",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load consultant workloads")?;
        Ok(rows)
    }

    async fn activate_assignment_algorithm(
        &self,
        id: Uuid,
    ) -> Result<Option<AssignmentAlgorithm>, AppError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM admissions.assignment_algorithms WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query("UPDATE admissions.assignment_algorithms SET is_active = FALSE WHERE is_active")
            .execute(&mut *tx)
            .await?;

        let activated = sqlx::query_as::<_, AssignmentAlgorithm>(
            "UPDATE admissions.assignment_algorithms SET is_active = TRUE WHERE id = $1 \
             RETURNING id, code, name, is_active",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(activated))
    }
}
