//! Reference compliance profiles
//!
//! - **CBN**: Central Bank of Nigeria: 7-year retention, tamper-evident
//!   logging, financial transaction and authentication tracking.
//! - **NDPA**: Nigeria Data Protection Act: 6-year retention, PII must be
//!   masked before it reaches storage.

use crate::error::{AuditError, Result};
use crate::processor::compliance::ComplianceProfile;
use crate::processor::masking::{HASH_MARKER, REDACTED_PLACEHOLDER};
use crate::types::{AuditEvent, ComplianceMetadata, DataClassification};
use chrono::{Days, NaiveDate, Utc};
use std::sync::Arc;

const CBN_RETENTION_DAYS: i64 = 2555;
const NDPA_RETENTION_DAYS: i64 = 365 * 6;

const CBN_REQUIRED_EVENTS: &[&str] = &[
    "FINANCIAL_TRANSACTION",
    "USER_LOGIN",
    "USER_LOGOUT",
    "PERMISSION_CHANGE",
    "SYSTEM_ACCESS",
    "DATA_EXPORT",
];

const CBN_SENSITIVE_FIELDS: &[&str] = &[
    "accountNumber",
    "transactionAmount",
    "customerName",
    "bvn",
    "pin",
    "password",
];

const NDPA_REQUIRED_EVENTS: &[&str] = &[
    "DATA_ACCESS",
    "DATA_MODIFICATION",
    "DATA_DELETION",
    "CONSENT_GIVEN",
    "CONSENT_WITHDRAWN",
    "DATA_BREACH",
];

const NDPA_PII_FIELDS: &[&str] = &[
    "email",
    "phoneNumber",
    "bvn",
    "nin",
    "address",
    "dateOfBirth",
    "passport",
    "firstName",
    "lastName",
];

/// The built-in profiles, in application order
pub fn default_profiles() -> Vec<Arc<dyn ComplianceProfile>> {
    vec![Arc::new(CbnProfile::new()), Arc::new(NdpaProfile::new())]
}

/// Whether the request payload mentions any of `fields`
fn mentions_any(event: &AuditEvent, fields: &[&str]) -> bool {
    event
        .request_payload
        .as_deref()
        .map(|payload| fields.iter().any(|f| payload.contains(f)))
        .unwrap_or(false)
}

fn retention_date(days: i64) -> Option<NaiveDate> {
    Utc::now()
        .date_naive()
        .checked_add_days(Days::new(days.max(0) as u64))
}

fn with_metadata(event: &AuditEvent, metadata: ComplianceMetadata) -> AuditEvent {
    let merged = event.compliance.merge(&metadata);
    event.clone().with_compliance(merged)
}

/// Central Bank of Nigeria profile
#[derive(Debug, Clone, Copy, Default)]
pub struct CbnProfile;

impl CbnProfile {
    pub const CODE: &'static str = "CBN";

    pub fn new() -> Self {
        Self
    }
}

impl ComplianceProfile for CbnProfile {
    fn regulation_code(&self) -> &str {
        Self::CODE
    }

    fn required_event_types(&self) -> &[&str] {
        CBN_REQUIRED_EVENTS
    }

    fn retention_period(&self) -> chrono::Duration {
        chrono::Duration::days(CBN_RETENTION_DAYS)
    }

    fn requires_tamper_evidence(&self) -> bool {
        true
    }

    fn sensitive_fields(&self) -> &[&str] {
        CBN_SENSITIVE_FIELDS
    }

    fn enrich(&self, event: &AuditEvent) -> Result<AuditEvent> {
        let mut metadata = ComplianceMetadata::empty()
            .with_tag(Self::CODE)
            .with_classification(DataClassification::Restricted)
            .with_pii(mentions_any(event, CBN_SENSITIVE_FIELDS))
            .with_purpose("REGULATORY_COMPLIANCE")
            .with_purpose("FINANCIAL_AUDIT");
        if let Some(date) = retention_date(CBN_RETENTION_DAYS) {
            metadata = metadata.with_retention_until(date);
        }
        Ok(with_metadata(event, metadata))
    }

    fn validate(&self, event: &AuditEvent) -> Result<()> {
        if event.user_id.is_none() {
            return Err(AuditError::violation(
                Self::CODE,
                "User ID is required for all audit events",
            ));
        }
        if self.requires_tamper_evidence() && event.event_hash.is_none() {
            return Err(AuditError::violation(
                Self::CODE,
                "Tamper-evident hashing is required",
            ));
        }
        Ok(())
    }
}

/// Nigeria Data Protection Act profile
#[derive(Debug, Clone, Copy, Default)]
pub struct NdpaProfile;

impl NdpaProfile {
    pub const CODE: &'static str = "NDPA";

    pub fn new() -> Self {
        Self
    }

    fn contains_pii(event: &AuditEvent) -> bool {
        mentions_any(event, NDPA_PII_FIELDS)
    }

    fn is_pii_masked(event: &AuditEvent) -> bool {
        match event.request_payload.as_deref() {
            None => true,
            Some(payload) => {
                payload.contains(HASH_MARKER) || payload.contains(REDACTED_PLACEHOLDER)
            }
        }
    }
}

impl ComplianceProfile for NdpaProfile {
    fn regulation_code(&self) -> &str {
        Self::CODE
    }

    fn required_event_types(&self) -> &[&str] {
        NDPA_REQUIRED_EVENTS
    }

    fn retention_period(&self) -> chrono::Duration {
        chrono::Duration::days(NDPA_RETENTION_DAYS)
    }

    fn requires_tamper_evidence(&self) -> bool {
        true
    }

    fn sensitive_fields(&self) -> &[&str] {
        NDPA_PII_FIELDS
    }

    fn enrich(&self, event: &AuditEvent) -> Result<AuditEvent> {
        let contains_pii = Self::contains_pii(event);
        let classification = if contains_pii {
            DataClassification::Restricted
        } else {
            DataClassification::Confidential
        };

        let mut metadata = ComplianceMetadata::empty()
            .with_tag(Self::CODE)
            .with_classification(classification)
            .with_pii(contains_pii)
            .with_purpose("DATA_PROTECTION")
            .with_purpose("LEGAL_COMPLIANCE");
        if let Some(date) = retention_date(NDPA_RETENTION_DAYS) {
            metadata = metadata.with_retention_until(date);
        }
        Ok(with_metadata(event, metadata))
    }

    fn validate(&self, event: &AuditEvent) -> Result<()> {
        if Self::contains_pii(event) && !Self::is_pii_masked(event) {
            return Err(AuditError::violation(
                Self::CODE,
                "PII must be masked in audit logs",
            ));
        }
        Ok(())
    }
}
