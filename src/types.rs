//! Core audit types for the a3s-audit pipeline
//!
//! All types use camelCase JSON serialization for wire compatibility.
//! Events are values: every processor stage builds a new `AuditEvent`
//! from the previous one instead of mutating it in place.

use crate::error::{AuditError, Result};
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Maximum size of a request/response payload in bytes
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024;

/// Severity of an audited occurrence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditSeverity {
    /// Informational (e.g., user login, data view)
    #[default]
    Info,
    /// Warning (e.g., failed login attempt, validation error)
    Warn,
    /// Critical (e.g., financial transaction, security breach)
    Critical,
}

impl fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Data classification level, ordered from least to most restricted
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataClassification {
    /// No restrictions
    Public,
    /// Normal business operations
    #[default]
    Internal,
    /// Restricted access
    Confidential,
    /// Highest sensitivity: PII, financial data
    Restricted,
}

/// Regulatory metadata attached to every audit event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceMetadata {
    /// Regulations this event falls under (e.g., "CBN", "NDPA")
    #[serde(default)]
    pub regulatory_tags: BTreeSet<String>,

    #[serde(default)]
    pub data_classification: DataClassification,

    /// Earliest date the event may be deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_until: Option<NaiveDate>,

    /// Whether the payloads were found to carry personal data
    #[serde(default, rename = "containsPII")]
    pub contains_pii: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_reference: Option<String>,

    #[serde(default)]
    pub processing_purposes: BTreeSet<String>,
}

impl ComplianceMetadata {
    /// Empty metadata (no tags, INTERNAL classification)
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.regulatory_tags.insert(tag.into());
        self
    }

    pub fn with_classification(mut self, classification: DataClassification) -> Self {
        self.data_classification = classification;
        self
    }

    pub fn with_retention_until(mut self, date: NaiveDate) -> Self {
        self.retention_until = Some(date);
        self
    }

    pub fn with_pii(mut self, contains_pii: bool) -> Self {
        self.contains_pii = contains_pii;
        self
    }

    pub fn with_consent_reference(mut self, reference: impl Into<String>) -> Self {
        self.consent_reference = Some(reference.into());
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.processing_purposes.insert(purpose.into());
        self
    }

    /// Combine two metadata records when several regulations apply
    ///
    /// Tags and purposes accumulate, the stricter classification and the
    /// later retention date win, and the PII flag is sticky.
    pub fn merge(&self, other: &ComplianceMetadata) -> ComplianceMetadata {
        ComplianceMetadata {
            regulatory_tags: self
                .regulatory_tags
                .union(&other.regulatory_tags)
                .cloned()
                .collect(),
            data_classification: self.data_classification.max(other.data_classification),
            retention_until: match (self.retention_until, other.retention_until) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
            contains_pii: self.contains_pii || other.contains_pii,
            consent_reference: self
                .consent_reference
                .clone()
                .or_else(|| other.consent_reference.clone()),
            processing_purposes: self
                .processing_purposes
                .union(&other.processing_purposes)
                .cloned()
                .collect(),
        }
    }
}

/// A single audit occurrence
///
/// Built once by a capture component, then passed by value through the
/// processor chain. Identity is the `event_id`: two events describe the
/// same audit record iff their ids match (see [`AuditEvent::same_record`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Globally unique, time-ordered identifier (UUIDv7)
    pub event_id: String,

    /// Per-process monotonic sequence number (0 when unassigned)
    #[serde(default)]
    pub sequence_number: u64,

    /// When the audited occurrence happened (millisecond precision)
    pub timestamp: DateTime<Utc>,

    /// Event type (e.g., "USER_LOGIN", "FINANCIAL_TRANSACTION")
    pub event_type: String,

    pub severity: AuditSeverity,

    // Actor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    // Target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    // Correlation
    /// Session or correlation id linking related events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    // Payloads, bounded to MAX_PAYLOAD_BYTES
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_payload: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,

    #[serde(default)]
    pub compliance: ComplianceMetadata,

    // Hash chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_event_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_hash: Option<String>,

    // Provenance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_instance: Option<String>,
}

impl AuditEvent {
    /// Create a new event with an auto-generated UUIDv7 id and current timestamp
    pub fn new(event_type: impl Into<String>, severity: AuditSeverity) -> Self {
        Self {
            event_id: crate::id::next_event_id(),
            sequence_number: 0,
            timestamp: Utc::now().trunc_subsecs(3),
            event_type: event_type.into(),
            severity,
            user_id: None,
            username: None,
            ip_address: None,
            user_agent: None,
            resource: None,
            action: None,
            session_id: None,
            tenant_id: None,
            request_payload: None,
            response_payload: None,
            http_status_code: None,
            compliance: ComplianceMetadata::default(),
            previous_event_hash: None,
            event_hash: None,
            captured_by: None,
            application_name: None,
            application_instance: None,
        }
    }

    pub fn with_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    pub fn with_sequence(mut self, sequence_number: u64) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    /// Set the timestamp, truncated to millisecond precision
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.trunc_subsecs(3);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Attach a request payload, truncated to `MAX_PAYLOAD_BYTES`
    pub fn with_request_payload(mut self, payload: impl Into<String>) -> Self {
        self.request_payload = Some(bound_payload(payload.into()));
        self
    }

    /// Attach a response payload, truncated to `MAX_PAYLOAD_BYTES`
    pub fn with_response_payload(mut self, payload: impl Into<String>) -> Self {
        self.response_payload = Some(bound_payload(payload.into()));
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status_code = Some(status);
        self
    }

    pub fn with_compliance(mut self, compliance: ComplianceMetadata) -> Self {
        self.compliance = compliance;
        self
    }

    pub fn with_captured_by(mut self, captured_by: impl Into<String>) -> Self {
        self.captured_by = Some(captured_by.into());
        self
    }

    pub fn with_application(
        mut self,
        name: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        self.application_name = Some(name.into());
        self.application_instance = Some(instance.into());
        self
    }

    /// Check the mandatory fields
    pub fn validate(&self) -> Result<()> {
        if self.event_id.trim().is_empty() {
            return Err(AuditError::InvalidEvent("eventId is required".to_string()));
        }
        if self.event_type.trim().is_empty() {
            return Err(AuditError::InvalidEvent(format!(
                "eventType is required (event {})",
                self.event_id
            )));
        }
        Ok(())
    }

    /// Whether two values describe the same audit record
    pub fn same_record(&self, other: &AuditEvent) -> bool {
        self.event_id == other.event_id
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AuditEvent{{eventId={}, timestamp={}, eventType={}, severity={}, userId={}, resource={}, action={}}}",
            self.event_id,
            self.timestamp.to_rfc3339(),
            self.event_type,
            self.severity,
            self.user_id.as_deref().unwrap_or("-"),
            self.resource.as_deref().unwrap_or("-"),
            self.action.as_deref().unwrap_or("-"),
        )
    }
}

/// Truncate a payload to `MAX_PAYLOAD_BYTES` on a char boundary
fn bound_payload(mut payload: String) -> String {
    if payload.len() > MAX_PAYLOAD_BYTES {
        let mut end = MAX_PAYLOAD_BYTES;
        while !payload.is_char_boundary(end) {
            end -= 1;
        }
        payload.truncate(end);
    }
    payload
}

/// Caller information captured alongside an event
///
/// Passed explicitly into the pipeline (and carried through the queue)
/// so enrichment never depends on thread-local state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
}

impl AuditContext {
    /// Context with no caller information
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>, username: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.username = Some(username.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_request(mut self, method: impl Into<String>, uri: impl Into<String>) -> Self {
        self.http_method = Some(method.into());
        self.request_uri = Some(uri.into());
        self
    }
}

/// Health of a storage backend or sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

impl HealthStatus {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: "OK".to_string(),
            component: Some(component.into()),
        }
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            component: Some(component.into()),
        }
    }
}
