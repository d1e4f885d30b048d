use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const DETERMINISTIC_TAG: &str = "d1";
const PROBABILISTIC_TAG: &str = "p1";
const AEAD_KEY_LABEL: &[u8] = b"admissions-pii-aead-v1";
const NONCE_KEY_LABEL: &[u8] = b"admissions-pii-nonce-v1";

/// Whether a field's ciphertext is stable across encryptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiMode {
    Deterministic,
    Probabilistic,
}

impl PiiMode {
    const fn tag(self) -> &'static str {
        match self {
            PiiMode::Deterministic => DETERMINISTIC_TAG,
            PiiMode::Probabilistic => PROBABILISTIC_TAG,
        }
    }
}

/// Every encrypted column, each bound to exactly one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiField {
    Email,
    Phone,
    ExternalIdentity,
    Name,
    Address,
    City,
    Province,
    BankName,
    BankAccountNumber,
    BankAccountHolder,
}

impl PiiField {
    pub const fn mode(self) -> PiiMode {
        match self {
            PiiField::Email | PiiField::Phone | PiiField::ExternalIdentity => {
                PiiMode::Deterministic
            }
            PiiField::Name
            | PiiField::Address
            | PiiField::City
            | PiiField::Province
            | PiiField::BankName
            | PiiField::BankAccountNumber
            | PiiField::BankAccountHolder => PiiMode::Probabilistic,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            PiiField::Email => "email",
            PiiField::Phone => "phone",
            PiiField::ExternalIdentity => "external_id",
            PiiField::Name => "name",
            PiiField::Address => "address",
            PiiField::City => "city",
            PiiField::Province => "province",
            PiiField::BankName => "bank_name",
            PiiField::BankAccountNumber => "bank_account_number",
            PiiField::BankAccountHolder => "bank_account_holder",
        }
    }
}

/// Codec failures. None of these ever yield plaintext.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid PII key: {0}")]
    InvalidKey(String),
    #[error("malformed ciphertext for field {0}")]
    Malformed(&'static str),
    #[error("field {field} expects {expected:?} ciphertext")]
    ModeMismatch {
        field: &'static str,
        expected: PiiMode,
    },
    #[error("field {0} is not searchable")]
    NotSearchable(&'static str),
    #[error("encryption failed for field {0}")]
    EncryptionFailed(&'static str),
    #[error("decryption failed for field {0}")]
    DecryptionFailed(&'static str),
}

/// Encrypts and decrypts PII fields. Cheap to clone.
///
/// Deterministic fields (email, phone, external identity id) derive the nonce from an
/// HMAC-SHA256 of the field label and plaintext, so equal plaintexts can be looked up by
/// equality. Probabilistic fields (name, address, bank details) use a fresh random nonce.
/// Stored values are `<mode tag>:<base64(nonce || ciphertext)>`; decrypting under the wrong
/// mode is an error.
#[derive(Clone)]
pub struct PiiCodec {
    cipher: Aes256Gcm,
    nonce_key: [u8; 32],
}

impl fmt::Debug for PiiCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PiiCodec { .. }")
    }
}

impl PiiCodec {
    /// Builds a codec from a 32-byte master key. The AEAD key and the nonce-derivation key
    /// are both derived from it, so one secret is configured per deployment.
    pub fn new(master_key: &[u8; 32]) -> Result<Self, CodecError> {
        let aead_key = derive_subkey(master_key, AEAD_KEY_LABEL)?;
        let nonce_key = derive_subkey(master_key, NONCE_KEY_LABEL)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&aead_key));
        Ok(Self { cipher, nonce_key })
    }

    /// Builds a codec from a hex-encoded 32-byte key (64 hex characters).
    pub fn from_hex(hex_key: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| CodecError::InvalidKey(format!("not valid hex: {}", e)))?;
        let key: [u8; 32] = bytes.try_into().map_err(|raw: Vec<u8>| {
            CodecError::InvalidKey(format!("expected 32 bytes, got {}", raw.len()))
        })?;
        Self::new(&key)
    }

    /// Encrypts `plaintext` using the mode bound to `field`.
    pub fn encrypt(&self, field: PiiField, plaintext: &str) -> Result<String, CodecError> {
        let nonce_bytes: [u8; NONCE_LEN] = match field.mode() {
            PiiMode::Deterministic => self.synthetic_nonce(field, plaintext)?,
            PiiMode::Probabilistic => Aes256Gcm::generate_nonce(&mut OsRng).into(),
        };

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CodecError::EncryptionFailed(field.label()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(format!("{}:{}", field.mode().tag(), STANDARD.encode(payload)))
    }

    /// Decrypts a stored value for `field`, rejecting values written under the other mode.
    pub fn decrypt(&self, field: PiiField, stored: &str) -> Result<String, CodecError> {
        let (tag, encoded) = stored
            .split_once(':')
            .ok_or(CodecError::Malformed(field.label()))?;

        let expected = field.mode();
        if tag != expected.tag() {
            return Err(CodecError::ModeMismatch {
                field: field.label(),
                expected,
            });
        }

        let payload = STANDARD
            .decode(encoded)
            .map_err(|_| CodecError::Malformed(field.label()))?;
        if payload.len() <= NONCE_LEN {
            return Err(CodecError::Malformed(field.label()));
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::DecryptionFailed(field.label()))?;

        String::from_utf8(plaintext).map_err(|_| CodecError::DecryptionFailed(field.label()))
    }

    pub fn encrypt_opt(
        &self,
        field: PiiField,
        plaintext: Option<&str>,
    ) -> Result<Option<String>, CodecError> {
        plaintext.map(|value| self.encrypt(field, value)).transpose()
    }

    pub fn decrypt_opt(
        &self,
        field: PiiField,
        stored: Option<&str>,
    ) -> Result<Option<String>, CodecError> {
        stored.map(|value| self.decrypt(field, value)).transpose()
    }

    /// Equality-search token for a deterministic field. Probabilistic fields cannot be
    /// searched and are refused.
    pub fn search_token(&self, field: PiiField, plaintext: &str) -> Result<String, CodecError> {
        if field.mode() != PiiMode::Deterministic {
            return Err(CodecError::NotSearchable(field.label()));
        }
        self.encrypt(field, plaintext)
    }

    fn synthetic_nonce(
        &self,
        field: PiiField,
        plaintext: &str,
    ) -> Result<[u8; NONCE_LEN], CodecError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.nonce_key)
            .map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        mac.update(field.label().as_bytes());
        mac.update(&[0]);
        mac.update(plaintext.as_bytes());
        let digest = mac.finalize().into_bytes();

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        Ok(nonce)
    }
}

fn derive_subkey(master_key: &[u8; 32], label: &[u8]) -> Result<[u8; 32], CodecError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(master_key)
        .map_err(|e| CodecError::InvalidKey(e.to_string()))?;
    mac.update(label);
    let digest = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    Ok(key)
}
