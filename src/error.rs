//! Error types for a3s-audit

use crate::types::AuditEvent;
use thiserror::Error;

/// Errors that can occur in the audit pipeline
#[derive(Debug, Error)]
pub enum AuditError {
    /// A processor stage failed; the chain keeps the pre-stage event
    #[error("Processor '{processor}' failed: {reason}")]
    Processor {
        processor: String,
        reason: String,
    },

    /// An event does not satisfy a regulation's requirements
    #[error("Compliance violation [{regulation}]: {rule}")]
    ComplianceViolation {
        regulation: String,
        rule: String,
    },

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Storage failure that is expected to clear on retry (connectivity, timeouts)
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// Persistence exhausted all retry attempts
    ///
    /// Carries the event so callers can dead-letter it.
    #[error("Failed to persist event '{}' after {attempts} attempts: {reason}", event.event_id)]
    Processing {
        event: Box<AuditEvent>,
        attempts: u32,
        reason: String,
    },

    /// External sink delivery failure (never propagated out of the pipeline)
    #[error("Sink error: {0}")]
    Sink(String),

    /// Queue admission refused under the reject policy
    #[error("Audit queue full, rejecting event: {event_id}")]
    QueueFull { event_id: String },

    /// Queue no longer admits events
    #[error("Audit queue is shut down")]
    QueueShutdown,

    /// Event is missing a mandatory field
    #[error("Invalid audit event: {0}")]
    InvalidEvent(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML configuration parse failure
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuditError {
    /// Build a compliance violation for a regulation
    pub fn violation(regulation: impl Into<String>, rule: impl Into<String>) -> Self {
        Self::ComplianceViolation {
            regulation: regulation.into(),
            rule: rule.into(),
        }
    }

    /// The event carried by a processing failure, if any
    pub fn failed_event(&self) -> Option<&AuditEvent> {
        match self {
            Self::Processing { event, .. } => Some(event),
            _ => None,
        }
    }
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
