//! External sinks, best-effort forwarding after persistence
//!
//! A sink receives every stored event (SIEM, message bus, archive). Sink
//! failures are logged by the pipeline and never fail an event.

use crate::error::{AuditError, Result};
use crate::types::{AuditEvent, HealthStatus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Destination for processed audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Forward one event, returning whether the sink accepted it
    async fn send(&self, event: &AuditEvent) -> Result<bool>;

    /// Forward several events, returning how many were accepted
    async fn send_batch(&self, events: &[AuditEvent]) -> Result<usize> {
        let mut sent = 0;
        for event in events {
            if self.send(event).await? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    async fn check_health(&self) -> HealthStatus;

    /// Release connections; the default does nothing
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Sink that collects events in memory
#[derive(Default)]
pub struct MemorySink {
    events: Arc<RwLock<Vec<AuditEvent>>>,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `send` fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Events received so far, in arrival order
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn send(&self, event: &AuditEvent) -> Result<bool> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Sink(format!(
                "memory sink rejected event {}",
                event.event_id
            )));
        }
        if self.is_closed() {
            return Ok(false);
        }
        self.events.write().await.push(event.clone());
        Ok(true)
    }

    async fn check_health(&self) -> HealthStatus {
        if self.failing.load(Ordering::SeqCst) {
            HealthStatus::unhealthy(self.name(), "sink marked failing")
        } else {
            HealthStatus::healthy(self.name())
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory-sink"
    }
}
