//! Admissions engine library.
//!
//! Candidate lifecycle for a university admissions office: registration, consultant
//! assignment, the status funnel with its billing and enrollment guards, the referral
//! commission ledger, and PII encryption at rest.
//!
//! # Modules
//!
//! - `models`: Domain records and persisted enums.
//! - `errors`: Error handling types.
//! - `pii`: Field-level PII encryption and search tokens.
//! - `sealed`: Encrypted row forms of candidates and referrers.
//! - `status`: Candidate transition table.
//! - `billing`: Fee resolution and installment scheduling.
//! - `enrollment`: Enrollment eligibility checklist.
//! - `commission`: Commission computation and ledger transitions.
//! - `assignment`: Consultant selection strategies.
//! - `identifiers`: Student numbers and referral codes.
//! - `contact`: Email and phone normalization.
//! - `store`: Storage trait used by the engine.
//! - `memory_store`: In-process store.
//! - `db_storage`: PostgreSQL store.
//! - `engine`: Status transition engine and admissions operations.
//! - `notifications`: Post-commit notification delivery.
//! - `circuit_breaker`: Circuit breaker for the notification gateway.
//! - `config`: Configuration management.
//! - `db`: Database connection and schema checks.
//! - `handlers`: HTTP handlers and routes.

pub mod assignment;
pub mod billing;
pub mod circuit_breaker;
pub mod commission;
pub mod config;
pub mod contact;
pub mod db;
pub mod db_storage;
pub mod engine;
pub mod enrollment;
pub mod errors;
pub mod handlers;
pub mod identifiers;
pub mod memory_store;
pub mod models;
pub mod notifications;
pub mod pii;
pub mod sealed;
pub mod status;
pub mod store;
