//! Pipeline orchestrators
//!
//! Both orchestrators share `PipelineCore`: validate, run the processor
//! chain, persist with bounded retry, forward best-effort to the sink.
//!
//! - `SyncPipeline` runs inline and returns the stored event or the error
//! - `AsyncPipeline` owns the producer side of the work queue; workers call
//!   its `process`, and exhausted events go to the dead letter queue

use crate::dlq::{DeadLetterEvent, DlqHandler};
use crate::error::{AuditError, Result};
use crate::metrics::PipelineMetrics;
use crate::processor::ProcessorChain;
use crate::sink::AuditSink;
use crate::storage::AuditStorage;
use crate::types::{AuditContext, AuditEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Bounded retry with linear backoff (`attempt × base_delay`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

/// Observer called around every processed event
///
/// All methods default to no-ops.
pub trait PipelineHooks: Send + Sync {
    fn on_before(&self, _event: &AuditEvent) {}

    fn on_after(&self, _event: &AuditEvent) {}

    fn on_error(&self, _event: &AuditEvent, _error: &AuditError) {}
}

/// An event waiting in the work queue together with its capture context
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: AuditEvent,
    pub context: AuditContext,
}

/// How a pipeline hands events to storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingMode {
    /// Inline in the caller's task
    Sync,
    /// Through the work queue
    #[default]
    Async,
}

/// Common entry point of both orchestrators
#[async_trait]
pub trait AuditPipeline: Send + Sync {
    /// Run the chain and persist one event
    async fn process(&self, event: AuditEvent, ctx: &AuditContext) -> Result<AuditEvent>;

    fn mode(&self) -> ProcessingMode;

    fn metrics(&self) -> &PipelineMetrics;
}

/// Shared processing steps
pub struct PipelineCore {
    chain: ProcessorChain,
    storage: Arc<dyn AuditStorage>,
    sink: Option<Arc<dyn AuditSink>>,
    retry: RetryPolicy,
    hooks: Vec<Arc<dyn PipelineHooks>>,
    metrics: PipelineMetrics,
}

impl PipelineCore {
    pub fn new(chain: ProcessorChain, storage: Arc<dyn AuditStorage>) -> Self {
        Self {
            chain,
            storage,
            sink: None,
            retry: RetryPolicy::default(),
            hooks: Vec::new(),
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PipelineHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn chain(&self) -> &ProcessorChain {
        &self.chain
    }

    pub fn storage(&self) -> &Arc<dyn AuditStorage> {
        &self.storage
    }

    pub fn sink(&self) -> Option<&Arc<dyn AuditSink>> {
        self.sink.as_ref()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Process one event, firing hooks and recording metrics
    async fn execute(&self, event: AuditEvent, ctx: &AuditContext) -> Result<AuditEvent> {
        let started = Instant::now();
        for hook in &self.hooks {
            hook.on_before(&event);
        }

        let result = self.run(&event, ctx).await;
        self.metrics.record_processing_time(started.elapsed());

        match &result {
            Ok(stored) => {
                self.metrics.record_success();
                for hook in &self.hooks {
                    hook.on_after(stored);
                }
            }
            Err(e) => {
                self.metrics.record_failure();
                for hook in &self.hooks {
                    hook.on_error(&event, e);
                }
            }
        }
        result
    }

    async fn run(&self, event: &AuditEvent, ctx: &AuditContext) -> Result<AuditEvent> {
        event.validate()?;

        let processed = self.chain.apply(event.clone(), ctx);
        self.persist(&processed).await?;
        self.forward(&processed).await;

        Ok(processed)
    }

    async fn persist(&self, event: &AuditEvent) -> Result<()> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.storage.store(event).await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    tracing::debug!(
                        event_id = %event.event_id,
                        storage = self.storage.name(),
                        "Event already stored"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Failed to store audit event"
                    );
                    last_error = Some(e);
                    if attempt < max_attempts {
                        self.metrics.record_retry();
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown storage failure".to_string());
        tracing::error!(
            event_id = %event.event_id,
            attempts = max_attempts,
            reason = %reason,
            "Exhausted retries storing audit event"
        );
        Err(AuditError::Processing {
            event: Box::new(event.clone()),
            attempts: max_attempts,
            reason,
        })
    }

    async fn forward(&self, event: &AuditEvent) {
        let Some(sink) = &self.sink else {
            return;
        };
        match sink.send(event).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    sink = sink.name(),
                    "Sink did not accept audit event"
                );
            }
            Err(e) => {
                self.metrics.record_sink_failure();
                tracing::warn!(
                    event_id = %event.event_id,
                    sink = sink.name(),
                    error = %e,
                    "Failed to forward audit event to sink"
                );
            }
        }
    }
}

/// Processes events inline in the caller's task
pub struct SyncPipeline {
    core: PipelineCore,
}

impl SyncPipeline {
    pub fn new(core: PipelineCore) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &PipelineCore {
        &self.core
    }
}

#[async_trait]
impl AuditPipeline for SyncPipeline {
    async fn process(&self, event: AuditEvent, ctx: &AuditContext) -> Result<AuditEvent> {
        tracing::debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            "Processing audit event synchronously"
        );
        self.core.execute(event, ctx).await
    }

    fn mode(&self) -> ProcessingMode {
        ProcessingMode::Sync
    }

    fn metrics(&self) -> &PipelineMetrics {
        self.core.metrics()
    }
}

/// Processes events on queue workers
///
/// Errors never reach producers: exhausted events are dead-lettered.
pub struct AsyncPipeline {
    core: PipelineCore,
    sender: mpsc::Sender<QueuedEvent>,
    dlq: Option<Arc<dyn DlqHandler>>,
}

impl AsyncPipeline {
    /// Create the pipeline and its bounded work channel
    ///
    /// The receiver goes to `AuditQueue::start`; size `capacity` with
    /// `QueueSettings::effective_capacity()` so the queue accepts it.
    pub fn new(core: PipelineCore, capacity: usize) -> (Self, mpsc::Receiver<QueuedEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                core,
                sender,
                dlq: None,
            },
            receiver,
        )
    }

    pub fn with_dlq(mut self, dlq: Arc<dyn DlqHandler>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    pub fn core(&self) -> &PipelineCore {
        &self.core
    }

    pub fn dlq(&self) -> Option<&Arc<dyn DlqHandler>> {
        self.dlq.as_ref()
    }

    /// Producer handle onto the work channel
    pub fn sender(&self) -> mpsc::Sender<QueuedEvent> {
        self.sender.clone()
    }

    /// Non-blocking admission with an empty context
    pub fn enqueue(&self, event: AuditEvent) -> bool {
        self.enqueue_with_context(event, AuditContext::empty())
    }

    /// Non-blocking admission, returns whether the event was accepted
    pub fn enqueue_with_context(&self, event: AuditEvent, context: AuditContext) -> bool {
        let event_id = event.event_id.clone();
        match self.sender.try_send(QueuedEvent { event, context }) {
            Ok(()) => {
                tracing::trace!(event_id = %event_id, "Audit event queued");
                true
            }
            Err(e) => {
                tracing::warn!(event_id = %event_id, error = %e, "Audit event not queued");
                false
            }
        }
    }

    async fn on_error(&self, error: &AuditError) {
        tracing::error!(error = %error, "Async audit processing failed");

        let (Some(dlq), Some(dead)) = (&self.dlq, DeadLetterEvent::from_error(error)) else {
            return;
        };
        let event_id = dead.event.event_id.clone();
        if let Err(e) = dlq.handle(dead).await {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to dead-letter audit event"
            );
        }
    }
}

#[async_trait]
impl AuditPipeline for AsyncPipeline {
    async fn process(&self, event: AuditEvent, ctx: &AuditContext) -> Result<AuditEvent> {
        tracing::trace!(event_id = %event.event_id, "Processing queued audit event");
        let result = self.core.execute(event, ctx).await;
        if let Err(e) = &result {
            self.on_error(e).await;
        }
        result
    }

    fn mode(&self) -> ProcessingMode {
        ProcessingMode::Async
    }

    fn metrics(&self) -> &PipelineMetrics {
        self.core.metrics()
    }
}
