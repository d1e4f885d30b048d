use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;

use crate::errors::AppError;

/// Trims, lowercases and validates an email address.
///
/// Contacts are normalized before encryption so that `Siti@Example.com` and
/// `siti@example.com` yield the same search token.
pub fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();

    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return Err(AppError::BadRequest(format!("invalid email address: {}", raw.trim())));
    }

    // RFC 5322 simplified: local@domain.tld
    let email_regex = Regex::new(
        r"^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)+$"
    )
    .map_err(|e| AppError::InternalError(format!("email pattern failed to compile: {}", e)))?;

    if !email_regex.is_match(&email) {
        tracing::debug!("Rejected malformed email address");
        return Err(AppError::BadRequest(format!("invalid email address: {}", raw.trim())));
    }

    Ok(email)
}

/// Parses a phone number (Indonesian by default) and returns it in E.164 form.
pub fn normalize_phone(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.len() < 8 {
        return Err(AppError::BadRequest("phone number too short".to_string()));
    }

    let number = phonenumber::parse(Some(CountryId::ID), trimmed)
        .map_err(|e| AppError::BadRequest(format!("unparseable phone number: {:?}", e)))?;

    if !phonenumber::is_valid(&number) {
        return Err(AppError::BadRequest(format!("invalid phone number: {}", trimmed)));
    }

    Ok(number.format().mode(Mode::E164).to_string())
}

/// Normalized contact pair. At least one of the two is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactDetails {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Normalizes signup contacts and enforces that an email or a phone was given.
/// Blank strings count as absent.
pub fn normalize_contacts(
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<ContactDetails, AppError> {
    let email = email
        .filter(|e| !e.trim().is_empty())
        .map(normalize_email)
        .transpose()?;
    let phone = phone
        .filter(|p| !p.trim().is_empty())
        .map(normalize_phone)
        .transpose()?;

    if email.is_none() && phone.is_none() {
        return Err(AppError::BadRequest(
            "either an email address or a phone number is required".to_string(),
        ));
    }

    Ok(ContactDetails { email, phone })
}
