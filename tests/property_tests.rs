/// Property-based tests using proptest
/// Invariants of the pure building blocks: installment splitting, consultant selection,
/// the transition table, commission amounts and the PII codec.
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use rust_admissions_engine::assignment::{select_consultant, AssignmentStrategy, ConsultantWorkload};
use rust_admissions_engine::billing::split_installments;
use rust_admissions_engine::commission::commission_amount;
use rust_admissions_engine::contact::{normalize_email, normalize_phone};
use rust_admissions_engine::models::{
    CandidateStatus, Referrer, ReferrerType, RewardConfig, TriggerEvent,
};
use rust_admissions_engine::pii::{PiiCodec, PiiField};
use rust_admissions_engine::status::transition_kind;

fn codec() -> PiiCodec {
    PiiCodec::new(&[42u8; 32]).unwrap()
}

fn referrer(commission_override: Option<i64>) -> Referrer {
    Referrer {
        id: Uuid::new_v4(),
        name: "Referrer".to_string(),
        email: None,
        phone: None,
        referrer_type: ReferrerType::Teacher,
        commission_override,
        payout_preference: None,
        bank: None,
        code: "REF-TEST0001".to_string(),
        is_active: true,
        created_at: Utc::now(),
    }
}

// Property: installments always sum to the total
proptest! {
    #[test]
    fn installments_sum_to_total(total in 0i64..=10_000_000_000, count in 0u32..=24) {
        let parts = split_installments(total, count);
        prop_assert_eq!(parts.len(), count.max(1) as usize);
        prop_assert_eq!(parts.iter().sum::<i64>(), total);
        // Remainder lands on the first installment only
        let rest = &parts[1..];
        prop_assert!(rest.windows(2).all(|w| w[0] == w[1]));
        prop_assert!(parts[0] >= rest.first().copied().unwrap_or(0));
    }
}

// Property: round robin visits every consultant floor(N/M) or ceil(N/M) times
proptest! {
    #[test]
    fn round_robin_is_fair(consultants in 1usize..=8, rounds in 0usize..=60) {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
        let mut workloads: Vec<ConsultantWorkload> = (0..consultants)
            .map(|i| ConsultantWorkload {
                consultant_id: Uuid::new_v4(),
                created_at: base + Duration::minutes(i as i64),
                last_assigned_at: None,
                active_candidates: 0,
            })
            .collect();

        let mut counts = vec![0usize; consultants];
        for round in 0..rounds {
            let picked = select_consultant(AssignmentStrategy::RoundRobin, &workloads).unwrap();
            let index = workloads.iter().position(|w| w.consultant_id == picked).unwrap();
            counts[index] += 1;
            let stamp = base + Duration::days(1) + Duration::seconds(round as i64);
            workloads[index].last_assigned_at = Some(stamp);
            workloads[index].active_candidates += 1;
        }

        let floor = rounds / consultants;
        let ceil = rounds.div_ceil(consultants);
        prop_assert!(counts.iter().all(|c| *c == floor || *c == ceil));
    }

    #[test]
    fn load_balanced_picks_a_minimum(loads in proptest::collection::vec(0i64..50, 1..10)) {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
        let workloads: Vec<ConsultantWorkload> = loads
            .iter()
            .enumerate()
            .map(|(i, load)| ConsultantWorkload {
                consultant_id: Uuid::new_v4(),
                created_at: base + Duration::minutes(i as i64),
                last_assigned_at: None,
                active_candidates: *load,
            })
            .collect();

        let picked = select_consultant(AssignmentStrategy::LoadBalanced, &workloads).unwrap();
        let chosen = workloads.iter().find(|w| w.consultant_id == picked).unwrap();
        let minimum = loads.iter().min().copied().unwrap();
        prop_assert_eq!(chosen.active_candidates, minimum);
        // Earliest-created among the tied
        let first_minimum = workloads.iter().find(|w| w.active_candidates == minimum).unwrap();
        prop_assert_eq!(first_minimum.consultant_id, picked);
    }
}

// Property: terminal statuses have no outgoing edges, and nothing moves backwards except into lost
proptest! {
    #[test]
    fn transitions_never_revert(from_index in 0usize..5, to_index in 0usize..5) {
        let from = CandidateStatus::ALL[from_index];
        let to = CandidateStatus::ALL[to_index];
        if transition_kind(from, to).is_some() {
            prop_assert!(!from.is_terminal());
            prop_assert!(to == CandidateStatus::Lost || to_index == from_index + 1);
        }
    }
}

// Property: overrides are used verbatim whatever the reward table says
proptest! {
    #[test]
    fn override_always_wins(
        override_amount in 1i64..=100_000_000,
        reward_amount in 0i64..=100_000_000,
        is_percentage in any::<bool>(),
        base in 0i64..=1_000_000_000,
    ) {
        let reward = RewardConfig {
            id: Uuid::new_v4(),
            referrer_type: ReferrerType::Teacher,
            trigger_event: TriggerEvent::Enrollment,
            amount: reward_amount,
            is_percentage,
            reward_type: "cash".to_string(),
            is_active: true,
        };
        prop_assert_eq!(
            commission_amount(&referrer(Some(override_amount)), Some(&reward), base),
            override_amount
        );
    }
}

// Property: codec round trips and mode behaviour
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn deterministic_fields_round_trip_and_repeat(value in "\\PC{0,64}") {
        let codec = codec();
        let first = codec.encrypt(PiiField::Email, &value).unwrap();
        let second = codec.encrypt(PiiField::Email, &value).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(codec.decrypt(PiiField::Email, &first).unwrap(), value);
    }

    #[test]
    fn probabilistic_fields_round_trip_and_vary(value in "\\PC{0,64}") {
        let codec = codec();
        let first = codec.encrypt(PiiField::Name, &value).unwrap();
        let second = codec.encrypt(PiiField::Name, &value).unwrap();
        prop_assert_ne!(&first, &second);
        prop_assert_eq!(codec.decrypt(PiiField::Name, &first).unwrap(), value.clone());
        prop_assert_eq!(codec.decrypt(PiiField::Name, &second).unwrap(), value);
    }

    #[test]
    fn deterministic_ciphertexts_differ_per_field(value in "[a-z0-9]{1,32}") {
        let codec = codec();
        let as_email = codec.encrypt(PiiField::Email, &value).unwrap();
        let as_phone = codec.encrypt(PiiField::Phone, &value).unwrap();
        prop_assert_ne!(as_email, as_phone);
    }
}

// Property: normalization never panics and is idempotent when it succeeds
proptest! {
    #[test]
    fn email_normalization_never_panics(email in "\\PC*") {
        let _ = normalize_email(&email);
    }

    #[test]
    fn valid_emails_normalize_idempotently(
        local in "[A-Za-z0-9._]{1,12}",
        domain in "[a-z]{2,10}",
        tld in "[a-z]{2,4}"
    ) {
        let email = format!("{}@{}.{}", local, domain, tld);
        if let Ok(normalized) = normalize_email(&email) {
            prop_assert_eq!(normalized.clone(), normalized.to_lowercase());
            prop_assert_eq!(normalize_email(&normalized).unwrap(), normalized);
        }
    }

    #[test]
    fn phone_normalization_never_panics(phone in "\\PC*") {
        let _ = normalize_phone(&phone);
    }

    #[test]
    fn normalized_phones_are_e164(number in 10_000_000u64..=9_999_999_999u64) {
        let raw = format!("08{}", number);
        if let Ok(normalized) = normalize_phone(&raw) {
            prop_assert!(normalized.starts_with("+62"));
            prop_assert!(normalized[1..].chars().all(|c| c.is_ascii_digit()));
        }
    }
}
