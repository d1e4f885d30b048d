use chrono::Utc;
use uuid::Uuid;

use crate::models::{Commission, CommissionStatus, Referrer, RewardConfig, TriggerEvent};

/// Commission owed to `referrer`.
///
/// A referrer override is used verbatim. Otherwise an active reward rule applies, either as a
/// flat amount or as a whole percentage of `base_amount`. No rule means zero.
pub fn commission_amount(
    referrer: &Referrer,
    reward: Option<&RewardConfig>,
    base_amount: i64,
) -> i64 {
    if let Some(amount) = referrer.commission_override {
        return amount;
    }

    match reward {
        Some(rule) if rule.is_active && rule.referrer_type == referrer.referrer_type => {
            if rule.is_percentage {
                base_amount.saturating_mul(rule.amount) / 100
            } else {
                rule.amount
            }
        }
        _ => 0,
    }
}

/// Ledger entry for a trigger, or `None` when nothing is owed.
pub fn build_commission(
    referrer: &Referrer,
    candidate_id: Uuid,
    trigger_event: TriggerEvent,
    reward: Option<&RewardConfig>,
    base_amount: i64,
) -> Option<Commission> {
    let amount = commission_amount(referrer, reward, base_amount);
    if amount <= 0 {
        return None;
    }

    Some(Commission {
        id: Uuid::new_v4(),
        referrer_id: referrer.id,
        candidate_id,
        trigger_event,
        amount,
        status: CommissionStatus::Pending,
        approved_by: None,
        approved_at: None,
        paid_by: None,
        paid_at: None,
        notes: None,
        created_at: Utc::now(),
    })
}

impl CommissionStatus {
    /// One-way ledger advances. There is no way back to `pending`.
    pub const fn can_advance_to(self, next: CommissionStatus) -> bool {
        matches!(
            (self, next),
            (CommissionStatus::Pending, CommissionStatus::Approved)
                | (CommissionStatus::Approved, CommissionStatus::Paid)
                | (CommissionStatus::Pending, CommissionStatus::Cancelled)
        )
    }

    /// Status a commission must hold before moving to `self`.
    pub const fn required_prior(self) -> Option<CommissionStatus> {
        match self {
            CommissionStatus::Approved | CommissionStatus::Cancelled => {
                Some(CommissionStatus::Pending)
            }
            CommissionStatus::Paid => Some(CommissionStatus::Approved),
            CommissionStatus::Pending => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReferrerType;

    fn referrer(referrer_type: ReferrerType, commission_override: Option<i64>) -> Referrer {
        Referrer {
            id: Uuid::new_v4(),
            name: "Pak Joko".to_string(),
            email: None,
            phone: None,
            referrer_type,
            commission_override,
            payout_preference: None,
            bank: None,
            code: "REF-TEST".to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn reward(referrer_type: ReferrerType, amount: i64, is_percentage: bool) -> RewardConfig {
        RewardConfig {
            id: Uuid::new_v4(),
            referrer_type,
            trigger_event: TriggerEvent::Enrollment,
            amount,
            is_percentage,
            reward_type: "cash".to_string(),
            is_active: true,
        }
    }

    #[test]
    fn override_beats_reward_table() {
        let r = referrer(ReferrerType::Teacher, Some(750_000));
        let rule = reward(ReferrerType::Teacher, 500_000, false);
        assert_eq!(commission_amount(&r, Some(&rule), 8_000_000), 750_000);

        let pct = reward(ReferrerType::Teacher, 10, true);
        assert_eq!(commission_amount(&r, Some(&pct), 8_000_000), 750_000);
    }

    #[test]
    fn reward_table_applies_without_override() {
        let r = referrer(ReferrerType::Teacher, None);
        let rule = reward(ReferrerType::Teacher, 500_000, false);
        assert_eq!(commission_amount(&r, Some(&rule), 8_000_000), 500_000);
    }

    #[test]
    fn percentage_rewards_use_base_amount() {
        let r = referrer(ReferrerType::Alumni, None);
        let rule = reward(ReferrerType::Alumni, 5, true);
        assert_eq!(commission_amount(&r, Some(&rule), 8_000_000), 400_000);
    }

    #[test]
    fn no_rule_means_no_commission() {
        let r = referrer(ReferrerType::Partner, None);
        assert_eq!(commission_amount(&r, None, 8_000_000), 0);
        assert!(build_commission(&r, Uuid::new_v4(), TriggerEvent::Commitment, None, 0).is_none());

        let mut inactive = reward(ReferrerType::Partner, 100_000, false);
        inactive.is_active = false;
        assert_eq!(commission_amount(&r, Some(&inactive), 0), 0);
    }

    #[test]
    fn new_commissions_start_pending() {
        let r = referrer(ReferrerType::Staff, Some(250_000));
        let candidate = Uuid::new_v4();
        let c = build_commission(&r, candidate, TriggerEvent::Enrollment, None, 0).unwrap();
        assert_eq!(c.status, CommissionStatus::Pending);
        assert_eq!(c.referrer_id, r.id);
        assert_eq!(c.candidate_id, candidate);
        assert_eq!(c.amount, 250_000);
    }

    #[test]
    fn ledger_only_moves_forward() {
        use CommissionStatus::*;
        assert!(Pending.can_advance_to(Approved));
        assert!(Approved.can_advance_to(Paid));
        assert!(Pending.can_advance_to(Cancelled));
        assert!(!Pending.can_advance_to(Paid));
        assert!(!Approved.can_advance_to(Pending));
        assert!(!Approved.can_advance_to(Cancelled));
        assert!(!Paid.can_advance_to(Cancelled));
        assert_eq!(Paid.required_prior(), Some(Approved));
    }
}
