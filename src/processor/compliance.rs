//! Regulatory compliance stage
//!
//! Applies every active `ComplianceProfile` in registration order:
//! `enrich` first, then `validate`. Violations are reported through
//! logging only; they never block persistence.

use super::AuditProcessor;
use crate::error::{AuditError, Result};
use crate::types::{AuditContext, AuditEvent};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Rule set for one regulatory regime
pub trait ComplianceProfile: Send + Sync {
    /// Regulation code matched against configuration (e.g., "CBN")
    fn regulation_code(&self) -> &str;

    /// Event types the regulation requires to be audited
    fn required_event_types(&self) -> &[&str];

    /// Minimum retention period
    fn retention_period(&self) -> chrono::Duration;

    /// Whether events must carry a tamper-evident hash
    fn requires_tamper_evidence(&self) -> bool;

    /// Payload fields holding personal data that must be masked
    fn sensitive_fields(&self) -> &[&str];

    /// Attach this regulation's metadata to an event
    fn enrich(&self, event: &AuditEvent) -> Result<AuditEvent>;

    /// Check the event against the regulation
    ///
    /// Fails with `AuditError::ComplianceViolation` naming the unmet rule.
    fn validate(&self, event: &AuditEvent) -> Result<()>;
}

/// Applies active compliance profiles (order 100)
pub struct ComplianceProcessor {
    profiles: Vec<Arc<dyn ComplianceProfile>>,
    active: BTreeSet<String>,
}

impl ComplianceProcessor {
    /// Create a processor over the available profiles and active regulation codes
    pub fn new<I, S>(profiles: Vec<Arc<dyn ComplianceProfile>>, active_regulations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            profiles,
            active: active_regulations.into_iter().map(Into::into).collect(),
        }
    }

    /// Profiles that will actually run, in order
    pub fn active_profiles(&self) -> impl Iterator<Item = &Arc<dyn ComplianceProfile>> {
        self.profiles
            .iter()
            .filter(|p| self.active.contains(p.regulation_code()))
    }

    /// Union of the sensitive fields of all active profiles
    pub fn sensitive_fields(&self) -> BTreeSet<String> {
        self.active_profiles()
            .flat_map(|p| p.sensitive_fields().iter().map(|f| f.to_string()))
            .collect()
    }

    /// Whether any active profile demands tamper-evident hashing
    pub fn requires_tamper_evidence(&self) -> bool {
        self.active_profiles().any(|p| p.requires_tamper_evidence())
    }
}

impl AuditProcessor for ComplianceProcessor {
    fn process(&self, event: &AuditEvent, _ctx: &AuditContext) -> Result<AuditEvent> {
        let mut current = event.clone();

        for profile in self.active_profiles() {
            let code = profile.regulation_code();
            match profile.enrich(&current) {
                Ok(enriched) => current = enriched,
                Err(e) => {
                    tracing::error!(
                        regulation = code,
                        event_id = %current.event_id,
                        error = %e,
                        "Failed to apply compliance profile"
                    );
                    continue;
                }
            }

            match profile.validate(&current) {
                Ok(()) => {}
                Err(AuditError::ComplianceViolation { regulation, rule }) => {
                    tracing::warn!(
                        regulation = %regulation,
                        event_id = %current.event_id,
                        rule = %rule,
                        "Compliance violation"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        regulation = code,
                        event_id = %current.event_id,
                        error = %e,
                        "Compliance validation failed"
                    );
                }
            }
        }

        Ok(current)
    }

    fn order(&self) -> i32 {
        100
    }

    fn name(&self) -> &str {
        "compliance-processor"
    }
}
