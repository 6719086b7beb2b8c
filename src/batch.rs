//! Batched persistence
//!
//! `BatchWriter` buffers processed events and hands them to
//! `AuditStorage::store_batch` once `batch_size` events have accumulated or
//! `batch_timeout` has passed since the last flush.
//!
//! A failed flush keeps its events and backs off for one `batch_timeout`
//! before `add` tries again. The backlog is bounded by `max_pending`
//! (default `DEFAULT_PENDING_BATCHES × batch_size`); events arriving while it
//! is full overflow to the dead letter handler, or are dropped with a warning
//! when none is configured.

use crate::dlq::{DeadLetterEvent, DlqHandler};
use crate::error::Result;
use crate::storage::AuditStorage;
use crate::types::AuditEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Batches the backlog may hold while storage is failing
pub const DEFAULT_PENDING_BATCHES: usize = 10;

struct BatchState {
    events: Vec<AuditEvent>,
    last_flush: Instant,
    retry_after: Option<Instant>,
}

impl BatchState {
    fn backing_off(&self) -> bool {
        self.retry_after.is_some_and(|t| Instant::now() < t)
    }
}

/// Buffers events for bulk insertion
pub struct BatchWriter {
    storage: Arc<dyn AuditStorage>,
    dlq: Option<Arc<dyn DlqHandler>>,
    batch_size: usize,
    batch_timeout: Duration,
    max_pending: usize,
    state: Mutex<BatchState>,
    persisted: AtomicU64,
    overflowed: AtomicU64,
    closed: AtomicBool,
    stop: Notify,
    flusher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BatchWriter {
    pub fn new(storage: Arc<dyn AuditStorage>, batch_size: usize, batch_timeout: Duration) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            storage,
            dlq: None,
            batch_size,
            batch_timeout,
            max_pending: batch_size.saturating_mul(DEFAULT_PENDING_BATCHES),
            state: Mutex::new(BatchState {
                events: Vec::with_capacity(batch_size),
                last_flush: Instant::now(),
                retry_after: None,
            }),
            persisted: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stop: Notify::new(),
            flusher: std::sync::Mutex::new(None),
        }
    }

    /// Dead-letter events that do not fit in the backlog
    pub fn with_dlq(mut self, dlq: Arc<dyn DlqHandler>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    /// Bound on buffered events, at least one batch
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(self.batch_size);
        self
    }

    /// Buffer an event, flushing when the batch is full or stale
    ///
    /// Returns the number of events persisted by this call. While a failed
    /// flush is backing off, events are only buffered.
    pub async fn add(&self, event: AuditEvent) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.events.len() >= self.max_pending {
            drop(state);
            self.overflow(event).await;
            return Ok(0);
        }

        state.events.push(event);
        let due = state.events.len() >= self.batch_size
            || state.last_flush.elapsed() > self.batch_timeout;
        if due && !state.backing_off() {
            return self.flush_locked(&mut state).await;
        }
        Ok(0)
    }

    /// Persist everything buffered, ignoring any backoff
    pub async fn flush(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    /// Events waiting for the next flush
    pub async fn pending(&self) -> usize {
        self.state.lock().await.events.len()
    }

    /// Total events newly stored through this writer
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    /// Events turned away because the backlog was full
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Flush stale batches in the background every `batch_timeout`
    ///
    /// The task runs until `close` is called.
    pub fn spawn_flusher(self: &Arc<Self>) {
        let writer = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(writer.batch_timeout.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = writer.stop.notified() => break,
                }
                if writer.closed.load(Ordering::SeqCst) {
                    break;
                }
                let stale = {
                    let state = writer.state.lock().await;
                    !state.events.is_empty()
                        && !state.backing_off()
                        && state.last_flush.elapsed() >= writer.batch_timeout
                };
                if stale {
                    if let Err(e) = writer.flush().await {
                        tracing::error!(error = %e, "Background batch flush failed");
                    }
                }
            }
            tracing::debug!("Batch flusher stopped");
        });

        let mut slot = self.flusher.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the background flusher and persist what is left
    ///
    /// Calling it again only retries the final flush.
    pub async fn close(&self) -> Result<usize> {
        self.closed.store(true, Ordering::SeqCst);
        self.stop.notify_one();

        let handle = self
            .flusher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Batch flusher ended abnormally");
            }
        }
        self.flush().await
    }

    async fn overflow(&self, event: AuditEvent) {
        self.overflowed.fetch_add(1, Ordering::Relaxed);
        let reason = format!("batch backlog full ({} events)", self.max_pending);

        let Some(dlq) = &self.dlq else {
            tracing::warn!(
                event_id = %event.event_id,
                max_pending = self.max_pending,
                "Batch backlog full, dropping audit event"
            );
            return;
        };
        let event_id = event.event_id.clone();
        if let Err(e) = dlq.handle(DeadLetterEvent::new(event, reason, 0)).await {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to dead-letter overflowing audit event"
            );
        }
    }

    async fn flush_locked(&self, state: &mut BatchState) -> Result<usize> {
        if state.events.is_empty() {
            return Ok(0);
        }

        let batch = std::mem::take(&mut state.events);
        match self.storage.store_batch(&batch).await {
            Ok(stored) => {
                state.last_flush = Instant::now();
                state.retry_after = None;
                self.persisted.fetch_add(stored as u64, Ordering::Relaxed);
                tracing::debug!(
                    batch = batch.len(),
                    stored,
                    storage = self.storage.name(),
                    "Persisted audit batch"
                );
                Ok(stored)
            }
            Err(e) => {
                let now = Instant::now();
                state.last_flush = now;
                state.retry_after = Some(now + self.batch_timeout);
                tracing::error!(
                    batch = batch.len(),
                    retry_in_ms = self.batch_timeout.as_millis() as u64,
                    error = %e,
                    "Failed to persist audit batch, keeping events for the next flush"
                );
                let mut retained = batch;
                retained.append(&mut state.events);
                state.events = retained;
                Err(e)
            }
        }
    }
}
