//! Holding area for audit events that never reached storage
//!
//! The asynchronous pipeline has no caller to report a failure to, so an
//! event that exhausts its storage retries goes to a `DlqHandler`. So does
//! an event `BatchWriter` turns away while its backlog is full.

use crate::error::{AuditError, Result};
use crate::types::AuditEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An audit event persistence gave up on, kept for replay
#[derive(Debug, Clone)]
pub struct DeadLetterEvent {
    /// The event as it left the processor chain
    pub event: AuditEvent,

    /// Last storage error, or why the event was turned away
    pub reason: String,

    /// Persistence attempts made before giving up
    pub attempts: u32,

    /// Unix milliseconds at hand-off
    pub dead_lettered_at: u64,
}

impl DeadLetterEvent {
    pub fn new(event: AuditEvent, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            event,
            reason: reason.into(),
            attempts,
            dead_lettered_at: now_millis(),
        }
    }

    /// Build from a pipeline error that carries its event
    pub fn from_error(error: &AuditError) -> Option<Self> {
        match error {
            AuditError::Processing {
                event,
                attempts,
                reason,
            } => Some(Self::new((**event).clone(), reason.clone(), *attempts)),
            _ => None,
        }
    }
}

/// Receives audit events whose persistence was exhausted
///
/// The event keeps its hash and previous hash. Storing it again later
/// restores the hash chain gap its absence leaves behind.
#[async_trait]
pub trait DlqHandler: Send + Sync {
    async fn handle(&self, event: DeadLetterEvent) -> Result<()>;

    /// Events currently retained
    async fn count(&self) -> Result<usize>;

    /// Newest first
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEvent>>;
}

/// Retains unpersisted audit events in memory, up to `max_events`
///
/// Past the bound the oldest entries are discarded. `0` keeps everything.
pub struct MemoryDlqHandler {
    events: Arc<RwLock<Vec<DeadLetterEvent>>>,
    max_events: usize,
}

impl MemoryDlqHandler {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            max_events,
        }
    }
}

impl Default for MemoryDlqHandler {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DlqHandler for MemoryDlqHandler {
    async fn handle(&self, event: DeadLetterEvent) -> Result<()> {
        tracing::warn!(
            event_id = %event.event.event_id,
            event_type = %event.event.event_type,
            sequence = event.event.sequence_number,
            event_hash = event.event.event_hash.as_deref().unwrap_or("-"),
            attempts = event.attempts,
            reason = %event.reason,
            "Audit event not persisted, held for replay"
        );

        let mut events = self.events.write().await;
        events.push(event);

        if self.max_events > 0 && events.len() > self.max_events {
            let evicted = events.len() - self.max_events;
            events.drain(..evicted);
            tracing::error!(
                evicted,
                retained = self.max_events,
                "Unpersisted audit events evicted from memory"
            );
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let events = self.events.read().await;
        Ok(events.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
