//! Backpressure-aware work queue
//!
//! A bounded tokio channel between producers and a pool of workers that
//! feed the `AsyncPipeline`. When the buffer is full the configured
//! `BackpressureStrategy` decides what happens to the new event.
//!
//! Workers share the receiver behind an async mutex and poll it with a
//! timeout, so they notice shutdown even when the queue is idle.

use crate::error::{AuditError, Result};
use crate::pipeline::{AsyncPipeline, AuditPipeline, QueuedEvent};
use crate::types::{AuditContext, AuditEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// What to do with an event that does not fit in the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackpressureStrategy {
    /// Log and discard the new event
    #[default]
    #[serde(alias = "DROP_OLDEST")]
    Drop,
    /// Wait for space
    Block,
    /// Fail the producer with `AuditError::QueueFull`
    Reject,
}

impl fmt::Display for BackpressureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Drop => "DROP",
            Self::Block => "BLOCK",
            Self::Reject => "REJECT",
        };
        f.write_str(s)
    }
}

impl FromStr for BackpressureStrategy {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DROP" | "DROP_OLDEST" => Ok(Self::Drop),
            "BLOCK" => Ok(Self::Block),
            "REJECT" => Ok(Self::Reject),
            other => Err(AuditError::Config(format!(
                "Unknown backpressure strategy: {other}"
            ))),
        }
    }
}

/// Runtime settings for `AuditQueue`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub capacity: usize,
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
    pub backpressure_enabled: bool,
    pub threshold: usize,
    pub strategy: BackpressureStrategy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            worker_count: 4,
            poll_interval: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_millis(30_000),
            backpressure_enabled: true,
            threshold: 8_000,
            strategy: BackpressureStrategy::Drop,
        }
    }
}

impl QueueSettings {
    /// Admission bound: `min(capacity, threshold)` with backpressure enabled
    pub fn effective_capacity(&self) -> usize {
        let bound = if self.backpressure_enabled {
            self.capacity.min(self.threshold)
        } else {
            self.capacity
        };
        bound.max(1)
    }
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub blocked: u64,
    pub processed: u64,
    pub failed: u64,
    pub size: usize,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    blocked: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Bounded queue drained by a worker pool
pub struct AuditQueue {
    sender: mpsc::Sender<QueuedEvent>,
    settings: QueueSettings,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AuditQueue {
    /// Spawn `worker_count` workers draining `receiver` into `pipeline`
    ///
    /// Must be called from within a tokio runtime. The receiver must be the
    /// one returned alongside `pipeline` by `AsyncPipeline::new`, and the
    /// pipeline's channel must be sized to `settings.effective_capacity()`;
    /// admission relies on the channel bound to apply the threshold.
    pub fn start(
        settings: QueueSettings,
        pipeline: Arc<AsyncPipeline>,
        receiver: mpsc::Receiver<QueuedEvent>,
    ) -> Result<Self> {
        let channel_capacity = pipeline.sender().max_capacity();
        if channel_capacity != settings.effective_capacity() {
            return Err(AuditError::Config(format!(
                "pipeline channel holds {} events but the queue admits {}; \
                 create the pipeline with QueueSettings::effective_capacity()",
                channel_capacity,
                settings.effective_capacity()
            )));
        }

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let worker_count = settings.worker_count.max(1);

        let workers = (0..worker_count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    receiver.clone(),
                    pipeline.clone(),
                    running.clone(),
                    counters.clone(),
                    settings.poll_interval,
                ))
            })
            .collect();

        tracing::info!(
            capacity = settings.effective_capacity(),
            workers = worker_count,
            strategy = %settings.strategy,
            "Audit queue started"
        );

        Ok(Self {
            sender: pipeline.sender(),
            settings,
            running,
            counters,
            workers: Mutex::new(workers),
        })
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Admit an event with an empty context
    pub async fn enqueue(&self, event: AuditEvent) -> Result<bool> {
        self.enqueue_with_context(event, AuditContext::empty()).await
    }

    /// Admit an event, applying the backpressure strategy when full
    ///
    /// Returns `Ok(true)` when queued and `Ok(false)` when dropped.
    pub async fn enqueue_with_context(
        &self,
        event: AuditEvent,
        context: AuditContext,
    ) -> Result<bool> {
        if !self.is_running() {
            return Err(AuditError::QueueShutdown);
        }

        let event_id = event.event_id.clone();
        let item = match self.sender.try_send(QueuedEvent { event, context }) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(event_id = %event_id, "Audit event enqueued");
                return Ok(true);
            }
            Err(TrySendError::Closed(_)) => return Err(AuditError::QueueShutdown),
            Err(TrySendError::Full(item)) => item,
        };

        match self.settings.strategy {
            BackpressureStrategy::Drop => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event_id = %event_id,
                    queue_size = self.len(),
                    "Audit queue full, dropping event"
                );
                Ok(false)
            }
            BackpressureStrategy::Block => {
                self.counters.blocked.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(event_id = %event_id, "Audit queue full, waiting for space");
                self.sender
                    .send(item)
                    .await
                    .map_err(|_| AuditError::QueueShutdown)?;
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            BackpressureStrategy::Reject => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(AuditError::QueueFull { event_id })
            }
        }
    }

    /// Events currently buffered
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            blocked: self.counters.blocked.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    /// Stop admitting events and drain the queue
    ///
    /// Waits up to `shutdown_timeout` for workers to finish, then aborts
    /// them. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!(pending = self.len(), "Shutting down audit queue");

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *workers)
        };
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let drained = tokio::time::timeout(
            self.settings.shutdown_timeout,
            futures::future::join_all(handles),
        )
        .await;

        match drained {
            Ok(_) => tracing::info!(stats = ?self.stats(), "Audit queue drained"),
            Err(_) => {
                tracing::warn!(
                    remaining = self.len(),
                    "Audit queue did not drain before timeout, aborting workers"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

impl Drop for AuditQueue {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedEvent>>>,
    pipeline: Arc<AsyncPipeline>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    poll_interval: Duration,
) {
    tracing::debug!(worker = id, "Audit worker started");

    loop {
        let next = {
            let mut rx = receiver.lock().await;
            if running.load(Ordering::SeqCst) {
                match tokio::time::timeout(poll_interval, rx.recv()).await {
                    Ok(Some(item)) => Some(item),
                    Ok(None) => break,
                    Err(_) => None,
                }
            } else {
                // Drain what is left without waiting
                match rx.try_recv() {
                    Ok(item) => Some(item),
                    Err(_) => break,
                }
            }
        };

        let Some(QueuedEvent { event, context }) = next else {
            continue;
        };
        match pipeline.process(event, &context).await {
            Ok(_) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                // Already logged and dead-lettered by the pipeline
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    tracing::debug!(worker = id, "Audit worker stopped");
}
