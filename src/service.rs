//! Audit service facade
//!
//! Builds the processor chain from `AuditConfig`, wires storage, sink and
//! dead letter handler, and dispatches captured events to the configured
//! processing mode.
//!
//! ```rust,no_run
//! use a3s_audit::{AuditConfig, AuditContext, AuditEvent, AuditService, AuditSeverity};
//!
//! # async fn example() -> a3s_audit::Result<()> {
//! let service = AuditService::builder(AuditConfig::default()).build().await?;
//!
//! let event = AuditEvent::new("USER_LOGIN", AuditSeverity::Info).with_resource("session");
//! let ctx = AuditContext::empty().with_user("u-1", "alice");
//! service.capture(event, &ctx).await?;
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::batch::BatchWriter;
use crate::config::AuditConfig;
use crate::dlq::{DlqHandler, MemoryDlqHandler};
use crate::error::Result;
use crate::id::SequenceGenerator;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{
    AsyncPipeline, AuditPipeline, PipelineCore, PipelineHooks, ProcessingMode, SyncPipeline,
};
use crate::processor::compliance::ComplianceProfile;
use crate::processor::{
    AuditProcessor, ComplianceProcessor, CorrelationIdEnricher, HashCalculator, PiiMasker,
    ProcessorChain, UserContextEnricher,
};
use crate::profiles::default_profiles;
use crate::queue::{AuditQueue, QueueStats};
use crate::sink::AuditSink;
use crate::storage::{AuditStorage, IntegrityReport, LoggingStorage};
use crate::types::{AuditContext, AuditEvent, HealthStatus};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

/// What happened to a captured event
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Processed inline and persisted (SYNC mode)
    Stored(AuditEvent),
    /// Admitted to the work queue (ASYNC mode)
    Queued,
    /// Discarded by the DROP backpressure strategy
    Dropped,
    /// Auditing is switched off
    Disabled,
}

enum Dispatch {
    Disabled,
    Sync(SyncPipeline),
    Async {
        pipeline: Arc<AsyncPipeline>,
        queue: AuditQueue,
    },
}

/// Entry point for capture components
pub struct AuditService {
    config: AuditConfig,
    storage: Arc<dyn AuditStorage>,
    sink: Option<Arc<dyn AuditSink>>,
    dlq: Option<Arc<dyn DlqHandler>>,
    hasher: Option<Arc<HashCalculator>>,
    sequence: SequenceGenerator,
    dispatch: Dispatch,
}

/// Builder for [`AuditService`]
pub struct AuditServiceBuilder {
    config: AuditConfig,
    storage: Option<Arc<dyn AuditStorage>>,
    sink: Option<Arc<dyn AuditSink>>,
    dlq: Option<Arc<dyn DlqHandler>>,
    profiles: Vec<Arc<dyn ComplianceProfile>>,
    processors: Vec<Arc<dyn AuditProcessor>>,
    hooks: Vec<Arc<dyn PipelineHooks>>,
}

impl AuditServiceBuilder {
    pub fn new(config: AuditConfig) -> Self {
        Self {
            config,
            storage: None,
            sink: None,
            dlq: None,
            profiles: default_profiles(),
            processors: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Storage backend (default: `LoggingStorage`)
    pub fn storage(mut self, storage: Arc<dyn AuditStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Dead letter handler for ASYNC mode (default: `MemoryDlqHandler`)
    pub fn dlq(mut self, dlq: Arc<dyn DlqHandler>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    /// Replace the available compliance profiles (default: CBN and NDPA)
    pub fn profiles(mut self, profiles: Vec<Arc<dyn ComplianceProfile>>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Register an extra processor; it is sorted into the chain by `order()`
    pub fn processor(mut self, processor: Arc<dyn AuditProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn PipelineHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Validate the configuration, prepare storage and start the pipeline
    ///
    /// In ASYNC mode this spawns the queue workers and must run inside a
    /// tokio runtime.
    pub async fn build(self) -> Result<AuditService> {
        let config = self.config;
        config.validate()?;

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(LoggingStorage::new()) as Arc<dyn AuditStorage>);

        if !config.enabled {
            tracing::info!("Auditing disabled by configuration");
            return Ok(AuditService {
                config,
                storage,
                sink: self.sink,
                dlq: None,
                hasher: None,
                sequence: SequenceGenerator::new(),
                dispatch: Dispatch::Disabled,
            });
        }

        storage.initialize_schema().await?;

        let (chain, hasher) = build_chain(&config, self.profiles, self.processors)?;
        tracing::info!(
            mode = ?config.processing.mode,
            storage = storage.name(),
            processors = ?chain.names(),
            "Audit pipeline configured"
        );

        let mut core = PipelineCore::new(chain, storage.clone()).with_retry(config.retry_policy());
        if let Some(sink) = &self.sink {
            core = core.with_sink(sink.clone());
        }
        for hook in self.hooks {
            core = core.with_hook(hook);
        }

        let (dispatch, dlq) = match config.processing.mode {
            ProcessingMode::Sync => (Dispatch::Sync(SyncPipeline::new(core)), None),
            ProcessingMode::Async => {
                let settings = config.queue_settings();
                if settings.worker_count > 1 && hasher.as_ref().is_some_and(|h| h.chaining()) {
                    tracing::warn!(
                        workers = settings.worker_count,
                        "Hash chaining with several workers links events in processing order, \
                         not capture order; set worker_count = 1 for capture order"
                    );
                }

                let dlq = self
                    .dlq
                    .unwrap_or_else(|| Arc::new(MemoryDlqHandler::default()) as Arc<dyn DlqHandler>);
                let (pipeline, receiver) = AsyncPipeline::new(core, settings.effective_capacity());
                let pipeline = Arc::new(pipeline.with_dlq(dlq.clone()));
                let queue = AuditQueue::start(settings, pipeline.clone(), receiver)?;
                (Dispatch::Async { pipeline, queue }, Some(dlq))
            }
        };

        Ok(AuditService {
            config,
            storage,
            sink: self.sink,
            dlq,
            hasher,
            sequence: SequenceGenerator::new(),
            dispatch,
        })
    }
}

/// Assemble the processor chain described by the configuration
fn build_chain(
    config: &AuditConfig,
    profiles: Vec<Arc<dyn ComplianceProfile>>,
    extra: Vec<Arc<dyn AuditProcessor>>,
) -> Result<(ProcessorChain, Option<Arc<HashCalculator>>)> {
    let processing = &config.processing;
    let mut processors: Vec<Arc<dyn AuditProcessor>> = Vec::new();

    if processing.enrichment.enabled && processing.enrichment.user_context {
        processors.push(Arc::new(UserContextEnricher::new()));
    }

    let mut sensitive: BTreeSet<String> = BTreeSet::new();
    if !processing.compliance.regulations.is_empty() {
        let compliance =
            ComplianceProcessor::new(profiles, processing.compliance.regulations.iter().cloned());
        for code in &processing.compliance.regulations {
            if !compliance.active_profiles().any(|p| p.regulation_code() == code.as_str()) {
                tracing::warn!(regulation = %code, "No compliance profile for regulation");
            }
        }
        if compliance.requires_tamper_evidence() && !config.integrity.hashing.enabled {
            tracing::warn!(
                regulations = ?processing.compliance.regulations,
                "Active regulations require tamper evidence but hashing is disabled"
            );
        }
        sensitive = compliance.sensitive_fields();
        processors.push(Arc::new(compliance));
    }

    if processing.enrichment.enabled && processing.enrichment.correlation_id {
        processors.push(Arc::new(CorrelationIdEnricher::new()));
    }

    let masking = &processing.compliance.pii_masking;
    if masking.enabled {
        sensitive.extend(masking.fields.iter().cloned());
        if !sensitive.is_empty() {
            processors.push(Arc::new(PiiMasker::new(sensitive, masking.strategy)));
        }
    }

    let hashing = &config.integrity.hashing;
    let hasher = if hashing.enabled {
        let hasher = Arc::new(HashCalculator::with_algorithm(
            config.hash_algorithm()?,
            hashing.include_previous_hash,
        ));
        processors.push(hasher.clone());
        Some(hasher)
    } else {
        None
    };

    processors.extend(extra);
    Ok((ProcessorChain::new(processors), hasher))
}

impl AuditService {
    pub fn builder(config: AuditConfig) -> AuditServiceBuilder {
        AuditServiceBuilder::new(config)
    }

    /// Record one audit event
    ///
    /// Assigns a sequence number when the event has none. In SYNC mode the
    /// stored event (or the exhausted-persistence error) is returned; in
    /// ASYNC mode the result only reports admission.
    pub async fn capture(&self, mut event: AuditEvent, ctx: &AuditContext) -> Result<CaptureOutcome> {
        if event.sequence_number == 0 {
            event.sequence_number = self.sequence.next();
        }

        match &self.dispatch {
            Dispatch::Disabled => Ok(CaptureOutcome::Disabled),
            Dispatch::Sync(pipeline) => pipeline
                .process(event, ctx)
                .await
                .map(CaptureOutcome::Stored),
            Dispatch::Async { queue, .. } => {
                if queue.enqueue_with_context(event, ctx.clone()).await? {
                    Ok(CaptureOutcome::Queued)
                } else {
                    Ok(CaptureOutcome::Dropped)
                }
            }
        }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.dispatch, Dispatch::Disabled)
    }

    /// Active processing mode, `None` when disabled
    pub fn mode(&self) -> Option<ProcessingMode> {
        match &self.dispatch {
            Dispatch::Disabled => None,
            Dispatch::Sync(pipeline) => Some(pipeline.mode()),
            Dispatch::Async { pipeline, .. } => Some(pipeline.mode()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn AuditStorage> {
        &self.storage
    }

    pub fn dlq(&self) -> Option<&Arc<dyn DlqHandler>> {
        self.dlq.as_ref()
    }

    /// Hash of the last chained event, if hashing is enabled
    pub fn last_hash(&self) -> Option<String> {
        self.hasher.as_ref().and_then(|h| h.last_hash())
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        match &self.dispatch {
            Dispatch::Disabled => None,
            Dispatch::Sync(pipeline) => Some(pipeline.metrics().snapshot()),
            Dispatch::Async { pipeline, .. } => Some(pipeline.metrics().snapshot()),
        }
    }

    pub fn queue_stats(&self) -> Option<QueueStats> {
        match &self.dispatch {
            Dispatch::Async { queue, .. } => Some(queue.stats()),
            _ => None,
        }
    }

    /// Batch writer over the service's storage, sized from configuration
    ///
    /// Backlog overflow goes to the service's dead letter handler when it
    /// has one.
    pub fn batch_writer(&self) -> BatchWriter {
        let writer = BatchWriter::new(
            self.storage.clone(),
            self.config.processing.async_processing.batch_size,
            self.config.batch_timeout(),
        );
        match &self.dlq {
            Some(dlq) => writer.with_dlq(dlq.clone()),
            None => writer,
        }
    }

    pub async fn verify_integrity(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<IntegrityReport> {
        self.storage.verify_integrity(from, to).await
    }

    /// Health of storage and, when configured, the sink
    pub async fn check_health(&self) -> Vec<HealthStatus> {
        let mut statuses = vec![self.storage.check_health().await];
        if let Some(sink) = &self.sink {
            statuses.push(sink.check_health().await);
        }
        statuses
    }

    /// Drain the queue and close the sink
    pub async fn shutdown(&self) {
        if let Dispatch::Async { queue, .. } = &self.dispatch {
            queue.shutdown().await;
        }
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.close().await {
                tracing::warn!(sink = sink.name(), error = %e, "Failed to close audit sink");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuditError;
    use crate::processor::masking::REDACTED_PLACEHOLDER;
    use crate::processor::MaskingStrategy;
    use crate::sink::MemorySink;
    use crate::storage::{MemoryStorage, QueryCriteria};
    use crate::types::AuditSeverity;

    fn sync_config() -> AuditConfig {
        let mut config = AuditConfig::default();
        config.processing.mode = ProcessingMode::Sync;
        config.processing.retry.base_delay_ms = 1;
        config
    }

    #[test]
    fn test_build_chain_default() {
        let (chain, hasher) = build_chain(&AuditConfig::default(), default_profiles(), vec![]).unwrap();
        assert_eq!(
            chain.names(),
            vec!["user-context-enricher", "correlation-id-enricher", "hash-calculator"]
        );
        assert!(hasher.unwrap().chaining());
    }

    #[test]
    fn test_build_chain_with_regulations() {
        let mut config = AuditConfig::default();
        config.processing.compliance.regulations = vec!["NDPA".to_string()];
        config.integrity.hashing.enabled = false;

        let (chain, hasher) = build_chain(&config, default_profiles(), vec![]).unwrap();
        assert_eq!(
            chain.names(),
            vec![
                "user-context-enricher",
                "compliance-processor",
                "correlation-id-enricher",
                "pii-masker",
            ]
        );
        assert!(hasher.is_none());
    }

    #[test]
    fn test_build_chain_flags_off() {
        let mut config = AuditConfig::default();
        config.processing.enrichment.enabled = false;
        config.processing.compliance.pii_masking.fields = vec!["iban".to_string()];
        config.processing.compliance.pii_masking.enabled = false;

        let (chain, _) = build_chain(&config, default_profiles(), vec![]).unwrap();
        assert_eq!(chain.names(), vec!["hash-calculator"]);
    }

    #[tokio::test]
    async fn test_sync_capture_stores_event() {
        let storage = Arc::new(MemoryStorage::new());
        let sink = Arc::new(MemorySink::new());
        let service = AuditService::builder(sync_config())
            .storage(storage.clone())
            .sink(sink.clone())
            .build()
            .await
            .unwrap();
        assert_eq!(service.mode(), Some(ProcessingMode::Sync));

        let ctx = AuditContext::empty().with_user("u-1", "alice");
        let outcome = service
            .capture(AuditEvent::new("USER_LOGIN", AuditSeverity::Info), &ctx)
            .await
            .unwrap();

        let CaptureOutcome::Stored(stored) = outcome else {
            panic!("expected stored event");
        };
        assert_eq!(stored.sequence_number, 1);
        assert_eq!(stored.user_id.as_deref(), Some("u-1"));
        assert!(stored.session_id.is_some());
        assert_eq!(service.last_hash(), stored.event_hash);

        assert_eq!(storage.len().await, 1);
        assert_eq!(sink.len().await, 1);
        assert_eq!(service.metrics().unwrap().succeeded, 1);
        assert!(service.queue_stats().is_none());
    }

    #[tokio::test]
    async fn test_sync_capture_masks_configured_fields() {
        let mut config = sync_config();
        config.processing.compliance.pii_masking.strategy = MaskingStrategy::Redact;
        config.processing.compliance.pii_masking.fields = vec!["iban".to_string()];
        let storage = Arc::new(MemoryStorage::new());
        let service = AuditService::builder(config)
            .storage(storage.clone())
            .build()
            .await
            .unwrap();

        let event = AuditEvent::new("TRANSFER", AuditSeverity::Info)
            .with_request_payload(r#"{"iban":"NG00123","amount":10}"#);
        service.capture(event, &AuditContext::empty()).await.unwrap();

        let stored = &storage.all().await[0];
        let payload: serde_json::Value =
            serde_json::from_str(stored.request_payload.as_deref().unwrap()).unwrap();
        assert_eq!(payload["iban"], REDACTED_PLACEHOLDER);
        assert_eq!(payload["amount"], 10);
    }

    #[tokio::test]
    async fn test_sync_capture_surfaces_exhausted_storage() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_unavailable(true);
        let service = AuditService::builder(sync_config())
            .storage(storage.clone())
            .build()
            .await
            .unwrap();

        let result = service
            .capture(AuditEvent::new("TEST", AuditSeverity::Info), &AuditContext::empty())
            .await;
        assert!(matches!(result, Err(AuditError::Processing { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_async_capture_queues_and_drains() {
        let mut config = AuditConfig::default();
        config.processing.async_processing.worker_count = 1;
        config.processing.async_processing.poll_interval_ms = 10;
        let storage = Arc::new(MemoryStorage::new());
        let service = AuditService::builder(config)
            .storage(storage.clone())
            .build()
            .await
            .unwrap();
        assert_eq!(service.mode(), Some(ProcessingMode::Async));

        for _ in 0..5 {
            let outcome = service
                .capture(AuditEvent::new("TEST", AuditSeverity::Info), &AuditContext::empty())
                .await
                .unwrap();
            assert_eq!(outcome, CaptureOutcome::Queued);
        }
        service.shutdown().await;

        assert_eq!(storage.len().await, 5);
        let stats = service.queue_stats().unwrap();
        assert_eq!(stats.enqueued, 5);
        assert_eq!(stats.processed, 5);

        let result = service
            .capture(AuditEvent::new("TEST", AuditSeverity::Info), &AuditContext::empty())
            .await;
        assert!(matches!(result, Err(AuditError::QueueShutdown)));
    }

    #[tokio::test]
    async fn test_async_failure_dead_lettered() {
        let mut config = AuditConfig::default();
        config.processing.async_processing.worker_count = 1;
        config.processing.async_processing.poll_interval_ms = 10;
        config.processing.retry.max_attempts = 2;
        config.processing.retry.base_delay_ms = 1;
        let storage = Arc::new(MemoryStorage::new());
        storage.set_unavailable(true);
        let service = AuditService::builder(config)
            .storage(storage.clone())
            .build()
            .await
            .unwrap();

        service
            .capture(AuditEvent::new("TEST", AuditSeverity::Info), &AuditContext::empty())
            .await
            .unwrap();
        service.shutdown().await;

        let dlq = service.dlq().unwrap();
        assert_eq!(dlq.count().await.unwrap(), 1);
        assert_eq!(dlq.list(1).await.unwrap()[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_disabled_service() {
        let mut config = AuditConfig::default();
        config.enabled = false;
        let storage = Arc::new(MemoryStorage::new());
        let service = AuditService::builder(config)
            .storage(storage.clone())
            .build()
            .await
            .unwrap();

        let outcome = service
            .capture(AuditEvent::new("TEST", AuditSeverity::Info), &AuditContext::empty())
            .await
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::Disabled);
        assert!(!service.is_enabled());
        assert!(service.mode().is_none());
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = AuditConfig::default();
        config.integrity.hashing.algorithm = "CRC32".to_string();
        assert!(matches!(
            AuditService::builder(config).build().await,
            Err(AuditError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_integrity_and_health() {
        let storage = Arc::new(MemoryStorage::new());
        let service = AuditService::builder(sync_config())
            .storage(storage.clone())
            .build()
            .await
            .unwrap();

        for _ in 0..3 {
            service
                .capture(AuditEvent::new("TEST", AuditSeverity::Info), &AuditContext::empty())
                .await
                .unwrap();
        }

        let from = Utc::now() - chrono::Duration::minutes(1);
        let to = Utc::now() + chrono::Duration::minutes(1);
        let report = service.verify_integrity(from, to).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.verified_events, 3);

        let health = service.check_health().await;
        assert_eq!(health.len(), 1);
        assert!(health[0].healthy);

        let found = storage.query(&QueryCriteria::new().with_event_type("TEST")).await.unwrap();
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn test_batch_writer_uses_config() {
        let mut config = sync_config();
        config.processing.async_processing.batch_size = 2;
        let storage = Arc::new(MemoryStorage::new());
        let service = AuditService::builder(config)
            .storage(storage.clone())
            .build()
            .await
            .unwrap();

        let writer = service.batch_writer();
        assert_eq!(writer.max_pending(), 20);
        writer.add(AuditEvent::new("A", AuditSeverity::Info)).await.unwrap();
        assert_eq!(writer.add(AuditEvent::new("B", AuditSeverity::Info)).await.unwrap(), 2);
        assert_eq!(storage.len().await, 2);
    }
}
