use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{BankDetails, Candidate, CandidateStatus, Referrer, ReferrerType};
use crate::pii::{PiiCodec, PiiField};

/// A candidate row as stored in `admissions.candidates`. Stores keep only sealed rows.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SealedCandidate {
    pub id: Uuid,
    pub name_enc: String,
    pub email_enc: Option<String>,
    pub phone_enc: Option<String>,
    pub external_id_enc: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub address_enc: Option<String>,
    pub city_enc: Option<String>,
    pub province_enc: Option<String>,
    pub school_name: Option<String>,
    pub graduation_year: Option<i32>,
    pub program_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub referrer_id: Option<Uuid>,
    pub referred_by_candidate_id: Option<Uuid>,
    pub assigned_consultant_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub source_type: Option<String>,
    pub source_detail: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: CandidateStatus,
    pub lost_reason_id: Option<Uuid>,
    pub lost_at: Option<DateTime<Utc>>,
    pub student_number: Option<String>,
    pub referral_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SealedCandidate {
    pub fn seal(candidate: &Candidate, codec: &PiiCodec) -> Result<Self, AppError> {
        Ok(Self {
            id: candidate.id,
            name_enc: codec.encrypt(PiiField::Name, &candidate.name)?,
            email_enc: codec.encrypt_opt(PiiField::Email, candidate.email.as_deref())?,
            phone_enc: codec.encrypt_opt(PiiField::Phone, candidate.phone.as_deref())?,
            external_id_enc: codec
                .encrypt_opt(PiiField::ExternalIdentity, candidate.external_id.as_deref())?,
            email_verified: candidate.email_verified,
            phone_verified: candidate.phone_verified,
            address_enc: codec.encrypt_opt(PiiField::Address, candidate.address.as_deref())?,
            city_enc: codec.encrypt_opt(PiiField::City, candidate.city.as_deref())?,
            province_enc: codec.encrypt_opt(PiiField::Province, candidate.province.as_deref())?,
            school_name: candidate.school_name.clone(),
            graduation_year: candidate.graduation_year,
            program_id: candidate.program_id,
            campaign_id: candidate.campaign_id,
            referrer_id: candidate.referrer_id,
            referred_by_candidate_id: candidate.referred_by_candidate_id,
            assigned_consultant_id: candidate.assigned_consultant_id,
            assigned_at: candidate.assigned_at,
            source_type: candidate.source_type.clone(),
            source_detail: candidate.source_detail.clone(),
            status: candidate.status,
            lost_reason_id: candidate.lost_reason_id,
            lost_at: candidate.lost_at,
            student_number: candidate.student_number.clone(),
            referral_code: candidate.referral_code.clone(),
            created_at: candidate.created_at,
            updated_at: candidate.updated_at,
        })
    }

    pub fn open(self, codec: &PiiCodec) -> Result<Candidate, AppError> {
        Ok(Candidate {
            id: self.id,
            name: codec.decrypt(PiiField::Name, &self.name_enc)?,
            email: codec.decrypt_opt(PiiField::Email, self.email_enc.as_deref())?,
            phone: codec.decrypt_opt(PiiField::Phone, self.phone_enc.as_deref())?,
            external_id: codec
                .decrypt_opt(PiiField::ExternalIdentity, self.external_id_enc.as_deref())?,
            email_verified: self.email_verified,
            phone_verified: self.phone_verified,
            address: codec.decrypt_opt(PiiField::Address, self.address_enc.as_deref())?,
            city: codec.decrypt_opt(PiiField::City, self.city_enc.as_deref())?,
            province: codec.decrypt_opt(PiiField::Province, self.province_enc.as_deref())?,
            school_name: self.school_name,
            graduation_year: self.graduation_year,
            program_id: self.program_id,
            campaign_id: self.campaign_id,
            referrer_id: self.referrer_id,
            referred_by_candidate_id: self.referred_by_candidate_id,
            assigned_consultant_id: self.assigned_consultant_id,
            assigned_at: self.assigned_at,
            source_type: self.source_type,
            source_detail: self.source_detail,
            status: self.status,
            lost_reason_id: self.lost_reason_id,
            lost_at: self.lost_at,
            student_number: self.student_number,
            referral_code: self.referral_code,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// A referrer row as stored in `admissions.referrers`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SealedReferrer {
    pub id: Uuid,
    pub name_enc: String,
    pub email_enc: Option<String>,
    pub phone_enc: Option<String>,
    #[sqlx(try_from = "String")]
    pub referrer_type: ReferrerType,
    pub commission_override: Option<i64>,
    pub payout_preference: Option<String>,
    pub bank_name_enc: Option<String>,
    pub bank_account_number_enc: Option<String>,
    pub bank_account_holder_enc: Option<String>,
    pub code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl SealedReferrer {
    pub fn seal(referrer: &Referrer, codec: &PiiCodec) -> Result<Self, AppError> {
        let bank = referrer.bank.as_ref();
        Ok(Self {
            id: referrer.id,
            name_enc: codec.encrypt(PiiField::Name, &referrer.name)?,
            email_enc: codec.encrypt_opt(PiiField::Email, referrer.email.as_deref())?,
            phone_enc: codec.encrypt_opt(PiiField::Phone, referrer.phone.as_deref())?,
            referrer_type: referrer.referrer_type,
            commission_override: referrer.commission_override,
            payout_preference: referrer.payout_preference.clone(),
            bank_name_enc: codec
                .encrypt_opt(PiiField::BankName, bank.map(|b| b.bank_name.as_str()))?,
            bank_account_number_enc: codec.encrypt_opt(
                PiiField::BankAccountNumber,
                bank.map(|b| b.account_number.as_str()),
            )?,
            bank_account_holder_enc: codec.encrypt_opt(
                PiiField::BankAccountHolder,
                bank.map(|b| b.account_holder.as_str()),
            )?,
            code: referrer.code.clone(),
            is_active: referrer.is_active,
            created_at: referrer.created_at,
        })
    }

    pub fn open(self, codec: &PiiCodec) -> Result<Referrer, AppError> {
        let bank_name = codec.decrypt_opt(PiiField::BankName, self.bank_name_enc.as_deref())?;
        let account_number = codec.decrypt_opt(
            PiiField::BankAccountNumber,
            self.bank_account_number_enc.as_deref(),
        )?;
        let account_holder = codec.decrypt_opt(
            PiiField::BankAccountHolder,
            self.bank_account_holder_enc.as_deref(),
        )?;

        // Bank details are written all-or-nothing.
        let bank = match (bank_name, account_number, account_holder) {
            (Some(bank_name), Some(account_number), Some(account_holder)) => Some(BankDetails {
                bank_name,
                account_number,
                account_holder,
            }),
            _ => None,
        };

        Ok(Referrer {
            id: self.id,
            name: codec.decrypt(PiiField::Name, &self.name_enc)?,
            email: codec.decrypt_opt(PiiField::Email, self.email_enc.as_deref())?,
            phone: codec.decrypt_opt(PiiField::Phone, self.phone_enc.as_deref())?,
            referrer_type: self.referrer_type,
            commission_override: self.commission_override,
            payout_preference: self.payout_preference,
            bank,
            code: self.code,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> PiiCodec {
        PiiCodec::new(&[3u8; 32]).unwrap()
    }

    #[test]
    fn sealed_referrer_hides_bank_details() {
        let codec = codec();
        let referrer = Referrer {
            id: Uuid::new_v4(),
            name: "Ibu Sari".to_string(),
            email: Some("sari@example.com".to_string()),
            phone: None,
            referrer_type: ReferrerType::Teacher,
            commission_override: None,
            payout_preference: Some("transfer".to_string()),
            bank: Some(BankDetails {
                bank_name: "BCA".to_string(),
                account_number: "1234567890".to_string(),
                account_holder: "Sari".to_string(),
            }),
            code: "REF-ABCDEFGH".to_string(),
            is_active: true,
            created_at: Utc::now(),
        };

        let sealed = SealedReferrer::seal(&referrer, &codec).unwrap();
        assert!(sealed
            .bank_account_number_enc
            .as_deref()
            .is_some_and(|v| !v.contains("1234567890")));
        assert!(!sealed.name_enc.contains("Sari"));
        assert_eq!(sealed.open(&codec).unwrap(), referrer);
    }
}
