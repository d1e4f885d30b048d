use crate::engine::{AdmissionsEngine, TransitionOutcome, TransitionParams};
use crate::enrollment::EnrollmentChecklist;
use crate::errors::AppError;
use crate::models::*;
use crate::store::{AdmissionsStore, CandidateFilter, ContactLookup};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

/// Shared application state injected into handlers.
pub struct AppState<S> {
    pub engine: AdmissionsEngine<S>,
}

type SharedState<S> = State<Arc<AppState<S>>>;

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-admissions-engine",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Admissions API routes without state. Callers add rate limiting and attach the state.
pub fn api_routes<S: AdmissionsStore + 'static>() -> Router<Arc<AppState<S>>> {
    Router::new()
        .route(
            "/api/v1/candidates",
            post(register_candidate::<S>).get(list_candidates::<S>),
        )
        .route("/api/v1/candidates/lookup", get(lookup_candidate::<S>))
        .route("/api/v1/candidates/:id", get(get_candidate::<S>))
        .route(
            "/api/v1/candidates/:id/interactions",
            get(candidate_interactions::<S>),
        )
        .route("/api/v1/candidates/:id/status", post(transition_status::<S>))
        .route(
            "/api/v1/candidates/:id/consultant",
            put(reassign_consultant::<S>),
        )
        .route(
            "/api/v1/candidates/:id/enrollment-checklist",
            get(enrollment_checklist::<S>),
        )
        .route("/api/v1/candidates/:id/billings", post(generate_billing::<S>))
        .route(
            "/api/v1/candidates/:id/commissions",
            post(record_commission::<S>),
        )
        .route("/api/v1/referrers", post(register_referrer::<S>))
        .route("/api/v1/commissions/approve", post(approve_commissions::<S>))
        .route("/api/v1/commissions/pay", post(pay_commissions::<S>))
        .route(
            "/api/v1/commissions/:id/approve",
            post(approve_commission::<S>),
        )
        .route("/api/v1/commissions/:id/pay", post(pay_commission::<S>))
        .route("/api/v1/commissions/:id/cancel", post(cancel_commission::<S>))
        .route("/api/v1/billings/:id/payment", post(submit_payment::<S>))
        .route(
            "/api/v1/billings/:id/verification",
            post(verify_payment::<S>),
        )
        .route("/api/v1/documents/:id/review", post(review_document::<S>))
        .route(
            "/api/v1/assignment-algorithms/:id/activate",
            put(activate_algorithm::<S>),
        )
}

/// Complete application without rate limiting: health check plus the API with a 1MB body cap.
pub fn router<S: AdmissionsStore + 'static>(engine: AdmissionsEngine<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes::<S>().layer(RequestBodyLimitLayer::new(1024 * 1024)))
        .with_state(Arc::new(AppState { engine }))
}

// ============ Candidates ============

/// POST /api/v1/candidates
pub async fn register_candidate<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Json(payload): Json<NewCandidate>,
) -> Result<(StatusCode, Json<Candidate>), AppError> {
    let candidate = state.engine.register_candidate(payload).await?;
    Ok((StatusCode::CREATED, Json(candidate)))
}

/// Query string form of [`CandidateFilter`]; `status` is comma separated.
#[derive(Debug, Default, Deserialize)]
pub struct CandidateListQuery {
    pub status: Option<String>,
    pub consultant_id: Option<Uuid>,
    pub referrer_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TryFrom<CandidateListQuery> for CandidateFilter {
    type Error = AppError;

    fn try_from(query: CandidateListQuery) -> Result<Self, Self::Error> {
        let statuses = query
            .status
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<CandidateStatus>()
                    .map_err(|e| AppError::BadRequest(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CandidateFilter {
            statuses,
            consultant_id: query.consultant_id,
            referrer_id: query.referrer_id,
            program_id: query.program_id,
            campaign_id: query.campaign_id,
            created_from: query.created_from,
            created_to: query.created_to,
            email: query.email,
            phone: query.phone,
            limit: query.limit,
            offset: query.offset,
        })
    }
}

/// GET /api/v1/candidates
pub async fn list_candidates<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Query(query): Query<CandidateListQuery>,
) -> Result<Json<Vec<Candidate>>, AppError> {
    let filter = CandidateFilter::try_from(query)?;
    tracing::debug!(
        "GET /candidates - statuses: {:?}, limit: {}",
        filter.statuses,
        filter.effective_limit()
    );
    Ok(Json(state.engine.list_candidates(filter).await?))
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub external_id: Option<String>,
}

/// GET /api/v1/candidates/lookup
///
/// Exact match on exactly one of `email`, `phone` or `external_id`.
pub async fn lookup_candidate<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Candidate>, AppError> {
    let lookup = match (query.email, query.phone, query.external_id) {
        (Some(email), None, None) => ContactLookup::Email(email),
        (None, Some(phone), None) => ContactLookup::Phone(phone),
        (None, None, Some(id)) => ContactLookup::ExternalIdentity(id),
        _ => {
            return Err(AppError::BadRequest(
                "Exactly one of email, phone or external_id is required".to_string(),
            ))
        }
    };

    state
        .engine
        .find_candidate_by_contact(lookup)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No candidate matches this contact".to_string()))
}

/// GET /api/v1/candidates/:id
pub async fn get_candidate<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
) -> Result<Json<Candidate>, AppError> {
    Ok(Json(state.engine.candidate(id).await?))
}

/// GET /api/v1/candidates/:id/interactions
pub async fn candidate_interactions<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Interaction>>, AppError> {
    Ok(Json(state.engine.candidate_interactions(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: CandidateStatus,
    #[serde(flatten)]
    pub params: TransitionParams,
}

/// POST /api/v1/candidates/:id/status
///
/// Moves the candidate along the funnel. Unmet guards answer 422 with the full list of
/// outstanding requirements.
pub async fn transition_status<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<TransitionOutcome>, AppError> {
    tracing::info!("POST /candidates/{}/status -> {}", id, request.status);
    let outcome = state
        .engine
        .transition_status(id, request.status, request.params)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ReassignRequest {
    pub consultant_id: Uuid,
    pub actor_id: Option<Uuid>,
}

/// PUT /api/v1/candidates/:id/consultant
pub async fn reassign_consultant<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReassignRequest>,
) -> Result<Json<Candidate>, AppError> {
    let candidate = state
        .engine
        .reassign_consultant(id, request.consultant_id, request.actor_id)
        .await?;
    Ok(Json(candidate))
}

/// GET /api/v1/candidates/:id/enrollment-checklist
pub async fn enrollment_checklist<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let checklist: EnrollmentChecklist = state.engine.check_enrollment_eligibility(id).await?;
    let descriptions: Vec<String> = checklist.missing.iter().map(|m| m.describe()).collect();
    Ok(Json(json!({
        "candidate_id": checklist.candidate_id,
        "eligible": checklist.is_eligible(),
        "missing": checklist.missing,
        "descriptions": descriptions,
    })))
}

#[derive(Debug, Deserialize)]
pub struct BillingRequest {
    pub billing_type: BillingType,
    pub academic_year: Option<String>,
    pub installments: Option<u32>,
}

/// POST /api/v1/candidates/:id/billings
pub async fn generate_billing<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Json(request): Json<BillingRequest>,
) -> Result<(StatusCode, Json<Vec<Billing>>), AppError> {
    let billings = state
        .engine
        .generate_billing(
            id,
            request.billing_type,
            request.academic_year,
            request.installments.unwrap_or(1),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(billings)))
}

#[derive(Debug, Deserialize)]
pub struct CommissionRequest {
    pub trigger_event: TriggerEvent,
}

/// POST /api/v1/candidates/:id/commissions
pub async fn record_commission<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Json(request): Json<CommissionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let created = state
        .engine
        .compute_and_record_commission(id, request.trigger_event)
        .await?;
    Ok(Json(json!({ "created": created })))
}

// ============ Referrers & commissions ============

/// POST /api/v1/referrers
pub async fn register_referrer<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Json(payload): Json<NewReferrer>,
) -> Result<(StatusCode, Json<Referrer>), AppError> {
    let referrer = state.engine.register_referrer(payload).await?;
    Ok((StatusCode::CREATED, Json(referrer)))
}

#[derive(Debug, Default, Deserialize)]
pub struct LedgerAction {
    pub actor_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchLedgerAction {
    pub ids: Vec<Uuid>,
    pub actor_id: Option<Uuid>,
    pub notes: Option<String>,
}

/// POST /api/v1/commissions/:id/approve
pub async fn approve_commission<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Json(action): Json<LedgerAction>,
) -> Result<Json<Commission>, AppError> {
    Ok(Json(state.engine.approve_commission(id, action.actor_id).await?))
}

/// POST /api/v1/commissions/:id/pay
pub async fn pay_commission<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Json(action): Json<LedgerAction>,
) -> Result<Json<Commission>, AppError> {
    let commission = state
        .engine
        .mark_commission_paid(id, action.actor_id, action.notes)
        .await?;
    Ok(Json(commission))
}

/// POST /api/v1/commissions/:id/cancel
pub async fn cancel_commission<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Json(action): Json<LedgerAction>,
) -> Result<Json<Commission>, AppError> {
    let commission = state
        .engine
        .cancel_commission(id, action.actor_id, action.notes)
        .await?;
    Ok(Json(commission))
}

/// POST /api/v1/commissions/approve
pub async fn approve_commissions<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Json(action): Json<BatchLedgerAction>,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state
        .engine
        .approve_commissions(&action.ids, action.actor_id)
        .await?;
    Ok(Json(json!({ "requested": action.ids.len(), "updated": updated })))
}

/// POST /api/v1/commissions/pay
pub async fn pay_commissions<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Json(action): Json<BatchLedgerAction>,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state
        .engine
        .mark_commissions_paid(&action.ids, action.actor_id, action.notes)
        .await?;
    Ok(Json(json!({ "requested": action.ids.len(), "updated": updated })))
}

// ============ Billing & documents ============

/// POST /api/v1/billings/:id/payment
pub async fn submit_payment<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
) -> Result<Json<Billing>, AppError> {
    Ok(Json(state.engine.submit_billing_payment(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct VerificationRequest {
    pub approved: bool,
    pub actor_id: Option<Uuid>,
}

/// POST /api/v1/billings/:id/verification
pub async fn verify_payment<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Json(request): Json<VerificationRequest>,
) -> Result<Json<Billing>, AppError> {
    let billing = state
        .engine
        .verify_billing_payment(id, request.actor_id, request.approved)
        .await?;
    Ok(Json(billing))
}

#[derive(Debug, Deserialize)]
pub struct DocumentReview {
    pub status: DocumentStatus,
    pub actor_id: Option<Uuid>,
}

/// POST /api/v1/documents/:id/review
pub async fn review_document<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Json(review): Json<DocumentReview>,
) -> Result<StatusCode, AppError> {
    state
        .engine
        .review_document(id, review.actor_id, review.status)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/assignment-algorithms/:id/activate
pub async fn activate_algorithm<S: AdmissionsStore>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssignmentAlgorithm>, AppError> {
    Ok(Json(state.engine.set_active_assignment_algorithm(id).await?))
}
