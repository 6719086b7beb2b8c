//! Processor chain: ordered transformations applied before persistence
//!
//! Every stage implements `AuditProcessor`. The chain sorts stages by
//! `order()` once, at construction, and keeps registration order for ties.
//!
//! | Stage                   | Order |
//! |-------------------------|-------|
//! | `UserContextEnricher`   | 100   |
//! | `ComplianceProcessor`   | 100   |
//! | `CorrelationIdEnricher` | 200   |
//! | `PiiMasker`             | 300   |
//! | `HashCalculator`        | 900   |
//!
//! A failing stage (error or panic) is logged and skipped; the event value
//! from the previous stage continues down the chain.

use crate::error::Result;
use crate::types::{AuditContext, AuditEvent};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub mod compliance;
pub mod enrichment;
pub mod integrity;
pub mod masking;

pub use compliance::ComplianceProcessor;
pub use enrichment::{CorrelationIdEnricher, UserContextEnricher};
pub use integrity::{compute_event_hash, HashAlgorithm, HashCalculator};
pub use masking::{MaskingStrategy, PiiMasker};

/// A single transformation stage
///
/// Implementations must not mutate the input; they return a new event
/// built from it (or a clone when they have nothing to change).
pub trait AuditProcessor: Send + Sync {
    /// Transform an event
    fn process(&self, event: &AuditEvent, ctx: &AuditContext) -> Result<AuditEvent>;

    /// Position in the chain, lower runs first
    fn order(&self) -> i32 {
        0
    }

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Ordered, immutable list of processors
#[derive(Clone, Default)]
pub struct ProcessorChain {
    processors: Vec<Arc<dyn AuditProcessor>>,
}

impl ProcessorChain {
    /// Build a chain, sorting stages by `order()` (stable)
    pub fn new(mut processors: Vec<Arc<dyn AuditProcessor>>) -> Self {
        processors.sort_by_key(|p| p.order());
        Self { processors }
    }

    /// An empty chain (events pass through unchanged)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Processor names in execution order
    pub fn names(&self) -> Vec<String> {
        self.processors.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run every stage in order
    pub fn apply(&self, event: AuditEvent, ctx: &AuditContext) -> AuditEvent {
        let mut current = event;
        for processor in &self.processors {
            let outcome = catch_unwind(AssertUnwindSafe(|| processor.process(&current, ctx)));
            match outcome {
                Ok(Ok(next)) => current = next,
                Ok(Err(e)) => {
                    tracing::error!(
                        processor = processor.name(),
                        event_id = %current.event_id,
                        error = %e,
                        "Processor failed, continuing with previous event"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        processor = processor.name(),
                        event_id = %current.event_id,
                        "Processor panicked, continuing with previous event"
                    );
                }
            }
        }
        current
    }
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("processors", &self.names())
            .finish()
    }
}
