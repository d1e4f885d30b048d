use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Billing, BillingStatus, BillingType, CandidateDocument, DocumentStatus, DocumentType,
};

/// One unmet transition requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingRequirement {
    /// `registered -> prospecting` needs a recorded lead source.
    SourceNotRecorded,
    /// Student number generation needs a program.
    ProgramNotSelected,
    BillingNotIssued {
        billing_type: BillingType,
    },
    UnpaidBilling {
        billing_id: Uuid,
        billing_type: BillingType,
        installment_number: i32,
        amount: i64,
        status: BillingStatus,
    },
    DocumentMissing {
        document_type_id: Uuid,
        code: String,
        name: String,
    },
    DocumentNotApproved {
        document_type_id: Uuid,
        code: String,
        name: String,
        status: DocumentStatus,
    },
}

impl MissingRequirement {
    pub fn describe(&self) -> String {
        match self {
            MissingRequirement::SourceNotRecorded => "lead source not recorded".to_string(),
            MissingRequirement::ProgramNotSelected => "study program not selected".to_string(),
            MissingRequirement::BillingNotIssued { billing_type } => {
                format!("{} billing not issued", billing_type)
            }
            MissingRequirement::UnpaidBilling {
                billing_type,
                installment_number,
                amount,
                status,
                ..
            } => format!(
                "{} billing installment {} ({}) is {}",
                billing_type, installment_number, amount, status
            ),
            MissingRequirement::DocumentMissing { name, .. } => {
                format!("document {} not uploaded", name)
            }
            MissingRequirement::DocumentNotApproved { name, status, .. } => {
                format!("document {} is {}", name, status.as_str())
            }
        }
    }
}

/// Outcome of the `committed -> enrolled` guard: every outstanding item, not a boolean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentChecklist {
    pub candidate_id: Uuid,
    pub missing: Vec<MissingRequirement>,
}

impl EnrollmentChecklist {
    pub fn is_eligible(&self) -> bool {
        self.missing.is_empty()
    }
}

fn unpaid(billing: &Billing) -> MissingRequirement {
    MissingRequirement::UnpaidBilling {
        billing_id: billing.id,
        billing_type: billing.billing_type,
        installment_number: billing.installment_number,
        amount: billing.amount,
        status: billing.status,
    }
}

/// Checks registration billing, the first tuition installment and every required,
/// non-deferred document.
pub fn evaluate_enrollment(
    candidate_id: Uuid,
    billings: &[Billing],
    document_types: &[DocumentType],
    documents: &[CandidateDocument],
) -> EnrollmentChecklist {
    let mut missing = Vec::new();

    let registration: Vec<&Billing> = billings
        .iter()
        .filter(|b| b.billing_type == BillingType::Registration)
        .collect();
    if registration.is_empty() {
        missing.push(MissingRequirement::BillingNotIssued {
            billing_type: BillingType::Registration,
        });
    }
    missing.extend(
        registration
            .into_iter()
            .filter(|b| b.status != BillingStatus::Paid)
            .map(unpaid),
    );

    let first_tuition = billings
        .iter()
        .filter(|b| b.billing_type == BillingType::Tuition)
        .min_by(|a, b| {
            (&a.academic_year, a.installment_number).cmp(&(&b.academic_year, b.installment_number))
        });
    match first_tuition {
        None => missing.push(MissingRequirement::BillingNotIssued {
            billing_type: BillingType::Tuition,
        }),
        Some(billing) if billing.status != BillingStatus::Paid => missing.push(unpaid(billing)),
        Some(_) => {}
    }

    for doc_type in document_types
        .iter()
        .filter(|dt| dt.is_required && !dt.is_deferred)
    {
        let uploaded: Vec<&CandidateDocument> = documents
            .iter()
            .filter(|d| d.document_type_id == doc_type.id)
            .collect();

        if uploaded.iter().any(|d| d.status == DocumentStatus::Approved) {
            continue;
        }

        let latest = uploaded.iter().max_by_key(|d| d.uploaded_at);
        missing.push(match latest {
            None => MissingRequirement::DocumentMissing {
                document_type_id: doc_type.id,
                code: doc_type.code.clone(),
                name: doc_type.name.clone(),
            },
            Some(doc) => MissingRequirement::DocumentNotApproved {
                document_type_id: doc_type.id,
                code: doc_type.code.clone(),
                name: doc_type.name.clone(),
                status: doc.status,
            },
        });
    }

    EnrollmentChecklist {
        candidate_id,
        missing,
    }
}
