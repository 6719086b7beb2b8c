//! Context enrichment stages
//!
//! Both enrichers read from the explicit `AuditContext` handed to the
//! chain and only fill fields the event does not already carry.

use super::AuditProcessor;
use crate::error::Result;
use crate::types::{AuditContext, AuditEvent};

/// Fills actor fields from the capture context (order 100)
#[derive(Debug, Clone, Copy, Default)]
pub struct UserContextEnricher;

impl UserContextEnricher {
    pub fn new() -> Self {
        Self
    }
}

impl AuditProcessor for UserContextEnricher {
    fn process(&self, event: &AuditEvent, ctx: &AuditContext) -> Result<AuditEvent> {
        let mut enriched = event.clone();

        if enriched.user_id.is_none() && (ctx.user_id.is_some() || ctx.username.is_some()) {
            enriched.user_id = ctx.user_id.clone();
            if enriched.username.is_none() {
                enriched.username = ctx.username.clone();
            }
        }
        if enriched.tenant_id.is_none() {
            enriched.tenant_id = ctx.tenant_id.clone();
        }
        if enriched.ip_address.is_none() {
            enriched.ip_address = ctx.ip_address.clone();
        }

        Ok(enriched)
    }

    fn order(&self) -> i32 {
        100
    }

    fn name(&self) -> &str {
        "user-context-enricher"
    }
}

/// Assigns a session/correlation id when the event has none (order 200)
///
/// Preference: context correlation id, then context session id, then a
/// fresh random UUID.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationIdEnricher;

impl CorrelationIdEnricher {
    pub fn new() -> Self {
        Self
    }
}

impl AuditProcessor for CorrelationIdEnricher {
    fn process(&self, event: &AuditEvent, ctx: &AuditContext) -> Result<AuditEvent> {
        if event.session_id.is_some() {
            return Ok(event.clone());
        }

        let correlation_id = ctx
            .correlation_id
            .clone()
            .or_else(|| ctx.session_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(event.clone().with_session_id(correlation_id))
    }

    fn order(&self) -> i32 {
        200
    }

    fn name(&self) -> &str {
        "correlation-id-enricher"
    }
}
