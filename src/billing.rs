use chrono::{Days, Months, NaiveDate, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Billing, BillingStatus, BillingType, FeeStructure};

/// Upper bound on installments per billing run.
pub const MAX_INSTALLMENTS: u32 = 24;

/// Resolves the fee for `(fee_type, program, academic_year)`.
///
/// An active program-specific row wins; otherwise the program-agnostic row for the same
/// fee type and year applies. Missing both is a configuration error, never a zero bill.
/// More than one active row at the winning level is also a configuration error.
pub fn resolve_fee(
    structures: &[FeeStructure],
    fee_type: BillingType,
    program_id: Option<Uuid>,
    academic_year: &str,
) -> Result<i64, AppError> {
    let active: Vec<&FeeStructure> = structures
        .iter()
        .filter(|fs| fs.is_active && fs.fee_type == fee_type && fs.academic_year == academic_year)
        .collect();

    let specific: Vec<&FeeStructure> = match program_id {
        Some(program) => active
            .iter()
            .copied()
            .filter(|fs| fs.program_id == Some(program))
            .collect(),
        None => Vec::new(),
    };
    let level: Vec<&FeeStructure> = if specific.is_empty() {
        active
            .iter()
            .copied()
            .filter(|fs| fs.program_id.is_none())
            .collect()
    } else {
        specific
    };

    match level.as_slice() {
        [] => Err(AppError::MissingConfiguration(format!(
            "no active {} fee structure for academic year {}",
            fee_type, academic_year
        ))),
        [fs] if fs.amount > 0 => Ok(fs.amount),
        [fs] => Err(AppError::MissingConfiguration(format!(
            "{} fee {} for {} has non-positive amount {}",
            fee_type, fs.id, academic_year, fs.amount
        ))),
        many => Err(AppError::MissingConfiguration(format!(
            "{} active {} fee structures match academic year {}",
            many.len(),
            fee_type,
            academic_year
        ))),
    }
}

/// Checks a requested installment count against the total it splits.
/// Zero is read as a single installment.
pub fn check_installments(total: i64, count: u32) -> Result<u32, AppError> {
    let count = count.max(1);
    if count > MAX_INSTALLMENTS {
        return Err(AppError::BadRequest(format!(
            "at most {} installments allowed, got {}",
            MAX_INSTALLMENTS, count
        )));
    }
    if i64::from(count) > total {
        return Err(AppError::BadRequest(format!(
            "{} installments would leave zero-amount billings on a total of {}",
            count, total
        )));
    }
    Ok(count)
}

/// Splits `total` into `count` installments that sum exactly to `total`.
/// The division remainder is added to the first installment.
pub fn split_installments(total: i64, count: u32) -> Vec<i64> {
    if count <= 1 {
        return vec![total];
    }

    let n = i64::from(count);
    let base = total / n;
    let remainder = total - base * n;

    let mut parts = vec![base; count as usize];
    parts[0] += remainder;
    parts
}

/// Due-date policy for generated billings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingSchedule {
    pub first_due: NaiveDate,
    pub interval_months: u32,
}

impl BillingSchedule {
    pub fn starting(issue_date: NaiveDate, first_due_days: u64, interval_months: u32) -> Self {
        let first_due = issue_date
            .checked_add_days(Days::new(first_due_days))
            .unwrap_or(issue_date);
        Self {
            first_due,
            interval_months,
        }
    }

    /// Due date of the zero-based installment `index`.
    pub fn due_date(&self, index: u32) -> NaiveDate {
        self.first_due
            .checked_add_months(Months::new(index.saturating_mul(self.interval_months)))
            .unwrap_or(self.first_due)
    }
}

/// Builds unpaid billing rows for a resolved total. Rows are not persisted here.
pub fn build_billings(
    candidate_id: Uuid,
    billing_type: BillingType,
    academic_year: &str,
    total: i64,
    installments: u32,
    schedule: &BillingSchedule,
) -> Result<Vec<Billing>, AppError> {
    let installments = check_installments(total, installments)?;
    let now = Utc::now();

    Ok(split_installments(total, installments)
        .into_iter()
        .zip(0..installments)
        .map(|(amount, index)| Billing {
            id: Uuid::new_v4(),
            candidate_id,
            billing_type,
            academic_year: academic_year.to_string(),
            amount,
            installment_number: (index + 1) as i32,
            installment_count: installments as i32,
            due_date: schedule.due_date(index),
            status: BillingStatus::Unpaid,
            verified_by: None,
            paid_at: None,
            created_at: now,
        })
        .collect())
}

impl BillingStatus {
    /// `unpaid -> pending_verification -> paid`, with rejection back to `unpaid`.
    pub const fn can_transition_to(self, next: BillingStatus) -> bool {
        matches!(
            (self, next),
            (BillingStatus::Unpaid, BillingStatus::PendingVerification)
                | (BillingStatus::PendingVerification, BillingStatus::Paid)
                | (BillingStatus::PendingVerification, BillingStatus::Unpaid)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fee(
        fee_type: BillingType,
        program_id: Option<Uuid>,
        year: &str,
        amount: i64,
    ) -> FeeStructure {
        FeeStructure {
            id: Uuid::new_v4(),
            fee_type,
            program_id,
            academic_year: year.to_string(),
            amount,
            is_active: true,
        }
    }

    #[test]
    fn program_specific_fee_wins_over_generic() {
        let program = Uuid::new_v4();
        let structures = vec![
            fee(BillingType::Tuition, None, "2025/2026", 7_000_000),
            fee(BillingType::Tuition, Some(program), "2025/2026", 8_000_000),
        ];
        let amount =
            resolve_fee(&structures, BillingType::Tuition, Some(program), "2025/2026").unwrap();
        assert_eq!(amount, 8_000_000);
    }

    #[test]
    fn duplicate_active_fees_are_a_configuration_error() {
        let program = Uuid::new_v4();
        let structures = vec![
            fee(BillingType::Tuition, Some(program), "2025/2026", 8_000_000),
            fee(BillingType::Tuition, Some(program), "2025/2026", 8_500_000),
            fee(BillingType::Tuition, None, "2025/2026", 7_000_000),
            fee(BillingType::Tuition, None, "2025/2026", 7_500_000),
        ];
        let err =
            resolve_fee(&structures, BillingType::Tuition, Some(program), "2025/2026").unwrap_err();
        assert!(matches!(err, AppError::MissingConfiguration(_)));

        let err = resolve_fee(&structures, BillingType::Tuition, None, "2025/2026").unwrap_err();
        assert!(matches!(err, AppError::MissingConfiguration(_)));

        // A single specific row still wins over duplicated generic rows
        let resolved = resolve_fee(
            &structures[1..],
            BillingType::Tuition,
            Some(program),
            "2025/2026",
        )
        .unwrap();
        assert_eq!(resolved, 8_500_000);
    }

    #[test]
    fn falls_back_to_program_agnostic_fee() {
        let structures = vec![
            fee(BillingType::Tuition, None, "2025/2026", 7_000_000),
            fee(BillingType::Tuition, Some(Uuid::new_v4()), "2025/2026", 9_000_000),
        ];
        let amount = resolve_fee(
            &structures,
            BillingType::Tuition,
            Some(Uuid::new_v4()),
            "2025/2026",
        )
        .unwrap();
        assert_eq!(amount, 7_000_000);
    }

    #[test]
    fn missing_or_inactive_fee_is_a_configuration_error() {
        let mut inactive = fee(BillingType::Dormitory, None, "2025/2026", 3_000_000);
        inactive.is_active = false;
        let structures = vec![
            inactive,
            fee(BillingType::Dormitory, None, "2024/2025", 3_000_000),
        ];
        let err = resolve_fee(&structures, BillingType::Dormitory, None, "2025/2026").unwrap_err();
        assert!(matches!(err, AppError::MissingConfiguration(_)));
    }

    #[test]
    fn zero_fee_is_refused() {
        let structures = vec![fee(BillingType::Registration, None, "2025/2026", 0)];
        assert!(resolve_fee(&structures, BillingType::Registration, None, "2025/2026").is_err());
    }

    #[test]
    fn remainder_goes_to_first_installment() {
        assert_eq!(split_installments(1_000, 3), vec![334, 333, 333]);
        assert_eq!(split_installments(900, 3), vec![300, 300, 300]);
        assert_eq!(split_installments(8_000_000, 0), vec![8_000_000]);
        assert_eq!(split_installments(8_000_000, 1), vec![8_000_000]);
    }

    #[test]
    fn built_billings_are_numbered_and_scheduled() {
        let issue = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let schedule = BillingSchedule::starting(issue, 14, 1);
        let rows = build_billings(
            Uuid::new_v4(),
            BillingType::Dormitory,
            "2025/2026",
            3_000_001,
            3,
            &schedule,
        )
        .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().map(|b| b.amount).sum::<i64>(), 3_000_001);
        assert_eq!(rows[0].installment_number, 1);
        assert_eq!(rows[2].installment_number, 3);
        assert!(rows.iter().all(|b| b.installment_count == 3));
        assert!(rows.iter().all(|b| b.status == BillingStatus::Unpaid));
        assert_eq!(rows[0].due_date, NaiveDate::from_ymd_opt(2025, 2, 14).unwrap());
        assert_eq!(rows[1].due_date, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
    }

    #[test]
    fn installment_count_is_bounded() {
        assert_eq!(check_installments(8_000_000, 0).unwrap(), 1);
        assert_eq!(check_installments(8_000_000, MAX_INSTALLMENTS).unwrap(), MAX_INSTALLMENTS);
        assert!(matches!(
            check_installments(8_000_000, MAX_INSTALLMENTS + 1),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(check_installments(5, 10), Err(AppError::BadRequest(_))));
        assert!(matches!(
            check_installments(i64::MAX, u32::MAX),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn payment_lifecycle_edges() {
        use BillingStatus::*;
        assert!(Unpaid.can_transition_to(PendingVerification));
        assert!(PendingVerification.can_transition_to(Paid));
        assert!(PendingVerification.can_transition_to(Unpaid));
        assert!(!Unpaid.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Unpaid));
    }
}
