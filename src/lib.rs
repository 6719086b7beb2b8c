//! # a3s-audit
//!
//! Tamper-evident audit event pipeline for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-audit` takes audit events from capture code, runs them through an
//! ordered processor chain (context enrichment, regulatory compliance, PII
//! masking, hash chaining) and persists them with bounded retry. Events can
//! be processed inline or handed to a bounded, backpressure-aware queue
//! drained by a worker pool.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_audit::{AuditConfig, AuditContext, AuditEvent, AuditService, AuditSeverity};
//! use a3s_audit::{CaptureOutcome, MemoryStorage, ProcessingMode};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_audit::Result<()> {
//! let mut config = AuditConfig::default();
//! config.processing.mode = ProcessingMode::Sync;
//!
//! let service = AuditService::builder(config)
//!     .storage(Arc::new(MemoryStorage::new()))
//!     .build()
//!     .await?;
//!
//! let event = AuditEvent::new("FUNDS_TRANSFER", AuditSeverity::Info)
//!     .with_resource("account/42")
//!     .with_action("debit");
//! let ctx = AuditContext::empty().with_user("u-7", "ada");
//!
//! if let CaptureOutcome::Stored(stored) = service.capture(event, &ctx).await? {
//!     println!("{} -> {:?}", stored.event_id, stored.event_hash);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **AuditProcessor** trait: one chain stage; `ProcessorChain` orders them
//! - **SyncPipeline** / **AsyncPipeline**: validate, process, persist, forward
//! - **AuditQueue**: bounded buffer with DROP, BLOCK or REJECT backpressure
//! - **AuditStorage** / **AuditSink** / **DlqHandler**: collaborator traits
//! - **AuditService**: builds everything from `AuditConfig`

pub mod batch;
pub mod config;
pub mod dlq;
pub mod error;
pub mod id;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod profiles;
pub mod queue;
pub mod service;
pub mod sink;
pub mod storage;
pub mod types;

// Re-export core types
pub use batch::BatchWriter;
pub use config::AuditConfig;
pub use dlq::{DeadLetterEvent, DlqHandler, MemoryDlqHandler};
pub use error::{AuditError, Result};
pub use id::{next_event_id, IdGenerator, SequenceGenerator, UuidV7Generator};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{
    AsyncPipeline, AuditPipeline, PipelineCore, PipelineHooks, ProcessingMode, QueuedEvent,
    RetryPolicy, SyncPipeline,
};
pub use processor::compliance::ComplianceProfile;
pub use processor::{
    compute_event_hash, AuditProcessor, ComplianceProcessor, CorrelationIdEnricher,
    HashAlgorithm, HashCalculator, MaskingStrategy, PiiMasker, ProcessorChain,
    UserContextEnricher,
};
pub use profiles::{default_profiles, CbnProfile, NdpaProfile};
pub use queue::{AuditQueue, BackpressureStrategy, QueueSettings, QueueStats};
pub use service::{AuditService, AuditServiceBuilder, CaptureOutcome};
pub use sink::{AuditSink, MemorySink};
pub use storage::{
    AuditStorage, IntegrityReport, IntegrityViolation, LoggingStorage, MemoryStorage,
    QueryCriteria, SortDirection,
};
pub use types::{
    AuditContext, AuditEvent, AuditSeverity, ComplianceMetadata, DataClassification,
    HealthStatus,
};
