use std::env;
use std::sync::Arc;
use uuid::Uuid;

use rust_admissions_engine::db::Database;
use rust_admissions_engine::db_storage::AdmissionsStorage;
use rust_admissions_engine::engine::{AdmissionsEngine, EngineSettings, TransitionParams};
use rust_admissions_engine::models::{
    CandidateStatus, NewCandidate, NewReferrer, ReferrerType, SourceTracking, TriggerEvent,
};
use rust_admissions_engine::pii::PiiCodec;
use rust_admissions_engine::store::{AdmissionsStore, ContactLookup};

async fn engine() -> anyhow::Result<(AdmissionsEngine<AdmissionsStorage>, Arc<AdmissionsStorage>)> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    db.ensure_schema().await?;

    let codec = Arc::new(PiiCodec::new(&[11u8; 32]).map_err(|e| anyhow::anyhow!(e))?);
    let storage = Arc::new(AdmissionsStorage::new(db.pool.clone(), codec));
    Ok((
        AdmissionsEngine::new(Arc::clone(&storage), EngineSettings::default()),
        storage,
    ))
}

fn unique_email(tag: &str) -> String {
    format!("{}-{}@example.com", tag, Uuid::new_v4().simple())
}

/// Registration and lookup through deterministic search tokens.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn register_and_lookup_smoke_test() -> anyhow::Result<()> {
    let (engine, storage) = engine().await?;
    let email = unique_email("smoke");

    let candidate = engine
        .register_candidate(NewCandidate {
            name: "Smoke Test".to_string(),
            email: Some(email.clone()),
            address: Some("Jl. Sudirman 1".to_string()),
            source: Some(SourceTracking {
                source_type: "test".to_string(),
                source_detail: None,
            }),
            ..Default::default()
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let found = storage
        .find_candidate_by_contact(&ContactLookup::Email(email.clone()))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .ok_or_else(|| anyhow::anyhow!("candidate not found by email token"))?;
    assert_eq!(found.id, candidate.id);
    assert_eq!(found.address.as_deref(), Some("Jl. Sudirman 1"));

    // Unique contact token rejects the duplicate
    let duplicate = engine
        .register_candidate(NewCandidate {
            name: "Smoke Copy".to_string(),
            email: Some(email),
            ..Default::default()
        })
        .await;
    assert!(duplicate.is_err());

    let outcome = engine
        .transition_status(candidate.id, CandidateStatus::Prospecting, TransitionParams::default())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(outcome.to, CandidateStatus::Prospecting);

    let interactions = engine
        .candidate_interactions(candidate.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(interactions.len(), 1);

    Ok(())
}

/// The commission triple constraint turns repeated requests into no-ops.
#[tokio::test]
#[ignore]
async fn duplicate_commission_is_a_noop_smoke_test() -> anyhow::Result<()> {
    let (engine, _) = engine().await?;

    let referrer = engine
        .register_referrer(NewReferrer {
            name: "Smoke Referrer".to_string(),
            email: None,
            phone: None,
            referrer_type: ReferrerType::Staff,
            commission_override: Some(150_000),
            payout_preference: None,
            bank: None,
            code: None,
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let candidate = engine
        .register_candidate(NewCandidate {
            name: "Referred Smoke".to_string(),
            email: Some(unique_email("referred")),
            referral_code: Some(referrer.code.clone()),
            ..Default::default()
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let engine = engine.clone();
            let id = candidate.id;
            tokio::spawn(async move {
                engine
                    .compute_and_record_commission(id, TriggerEvent::Enrollment)
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        if task.await?.map_err(|e| anyhow::anyhow!(e.to_string()))? {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    Ok(())
}
