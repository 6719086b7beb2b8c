//! Persistence contract and reference backends
//!
//! `AuditStorage` is the seam between the pipeline and a durable store.
//! Storage must be idempotent on `event_id`: storing the same record twice
//! returns `Ok(false)` the second time, which makes pipeline retries safe.
//!
//! Two backends ship with the crate:
//!
//! - `MemoryStorage`: full query and integrity support, used by tests
//! - `LoggingStorage`: writes each event to the log, the zero-config fallback

use crate::error::{AuditError, Result};
use crate::processor::integrity::{compute_event_hash, HashAlgorithm};
use crate::types::{AuditEvent, AuditSeverity, HealthStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Largest page a query may request
pub const MAX_PAGE_SIZE: usize = 1000;

/// Page size when none is given
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Sort order for query results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Filter, sort and paging options for `AuditStorage::query`
///
/// Every filter is optional; unset filters match everything. Time bounds
/// are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCriteria {
    pub event_id: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub resource: Option<String>,
    pub event_type: Option<String>,
    #[serde(default)]
    pub severities: Vec<AuditSeverity>,
    pub tenant_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: usize,
    pub size: usize,
    pub sort_by: String,
    pub sort_direction: SortDirection,
}

impl Default for QueryCriteria {
    fn default() -> Self {
        Self {
            event_id: None,
            user_id: None,
            username: None,
            resource: None,
            event_type: None,
            severities: Vec::new(),
            tenant_id: None,
            from: None,
            to: None,
            page: 0,
            size: DEFAULT_PAGE_SIZE,
            sort_by: "event_timestamp".to_string(),
            sort_direction: SortDirection::Desc,
        }
    }
}

impl QueryCriteria {
    /// Match everything, first page, newest first
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        if !self.severities.contains(&severity) {
            self.severities.push(severity);
        }
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    /// Page size, clamped to `1..=MAX_PAGE_SIZE`
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_by = field.into();
        self.sort_direction = direction;
        self
    }

    /// Number of results to skip
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.effective_size())
    }

    fn effective_size(&self) -> usize {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Whether an event passes every filter
    pub fn matches(&self, event: &AuditEvent) -> bool {
        fn eq(filter: &Option<String>, value: Option<&str>) -> bool {
            filter.as_deref().map_or(true, |f| value == Some(f))
        }

        eq(&self.event_id, Some(event.event_id.as_str()))
            && eq(&self.user_id, event.user_id.as_deref())
            && eq(&self.username, event.username.as_deref())
            && eq(&self.resource, event.resource.as_deref())
            && eq(&self.event_type, Some(event.event_type.as_str()))
            && eq(&self.tenant_id, event.tenant_id.as_deref())
            && (self.severities.is_empty() || self.severities.contains(&event.severity))
            && self.from.map_or(true, |from| event.timestamp >= from)
            && self.to.map_or(true, |to| event.timestamp <= to)
    }

    fn compare(&self, a: &AuditEvent, b: &AuditEvent) -> Ordering {
        let ordering = match self.sort_by.as_str() {
            "sequence_number" => a.sequence_number.cmp(&b.sequence_number),
            "event_type" => a.event_type.cmp(&b.event_type),
            "user_id" => a.user_id.cmp(&b.user_id),
            "severity" => (a.severity as u8).cmp(&(b.severity as u8)),
            _ => a.timestamp.cmp(&b.timestamp),
        }
        .then_with(|| a.event_id.cmp(&b.event_id));

        match self.sort_direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// A single integrity finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityViolation {
    pub event_id: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of verifying the hash chain over a time range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub valid: bool,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_events: u64,
    pub verified_events: u64,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    /// Report over a range with nothing in it
    pub fn empty(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            valid: true,
            from,
            to,
            total_events: 0,
            verified_events: 0,
            violations: Vec::new(),
        }
    }
}

/// Durable store for processed audit events
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Persist one event
    ///
    /// Returns `Ok(false)` when an event with the same id already exists.
    async fn store(&self, event: &AuditEvent) -> Result<bool>;

    /// Persist several events, returning how many were newly stored
    async fn store_batch(&self, events: &[AuditEvent]) -> Result<usize> {
        let mut stored = 0;
        for event in events {
            if self.store(event).await? {
                stored += 1;
            }
        }
        Ok(stored)
    }

    async fn find_by_id(&self, event_id: &str) -> Result<Option<AuditEvent>>;

    async fn query(&self, criteria: &QueryCriteria) -> Result<Vec<AuditEvent>>;

    /// Number of events matching the filters (paging ignored)
    async fn count(&self, criteria: &QueryCriteria) -> Result<u64>;

    async fn verify_integrity(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<IntegrityReport>;

    /// Create tables/indices if the backend needs them
    async fn initialize_schema(&self) -> Result<()>;

    async fn check_health(&self) -> HealthStatus;

    fn name(&self) -> &str;
}

#[derive(Default)]
struct MemoryInner {
    events: Vec<AuditEvent>,
    index: HashMap<String, usize>,
}

/// In-memory storage for development and testing
///
/// Supports the full query surface and integrity verification. Failures can
/// be injected to exercise retry and dead-letter paths.
pub struct MemoryStorage {
    inner: Arc<RwLock<MemoryInner>>,
    algorithm: HashAlgorithm,
    fail_next: AtomicU32,
    unavailable: AtomicBool,
    attempts: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_algorithm(HashAlgorithm::default())
    }

    /// Storage whose integrity check recomputes hashes with `algorithm`
    pub fn with_algorithm(algorithm: HashAlgorithm) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryInner::default())),
            algorithm,
            fail_next: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
        }
    }

    /// Fail the next `n` store calls with a transient error
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, AtomicOrdering::SeqCst);
    }

    /// Fail every store call until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Total store/store_batch invocations, including failed ones
    pub fn store_attempts(&self) -> u64 {
        self.attempts.load(AtomicOrdering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All stored events in insertion order
    pub async fn all(&self) -> Vec<AuditEvent> {
        self.inner.read().await.events.clone()
    }

    /// Overwrite a stored event in place, bypassing idempotency
    ///
    /// Simulates tampering with a persisted record.
    pub async fn replace(&self, event: AuditEvent) -> bool {
        let mut inner = self.inner.write().await;
        match inner.index.get(&event.event_id).copied() {
            Some(pos) => {
                inner.events[pos] = event;
                true
            }
            None => false,
        }
    }

    fn check_injected_failure(&self) -> Result<()> {
        self.attempts.fetch_add(1, AtomicOrdering::SeqCst);
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(AuditError::Storage("memory storage unavailable".to_string()));
        }
        let injected = self
            .fail_next
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok();
        if injected {
            return Err(AuditError::TransientStorage(
                "injected storage failure".to_string(),
            ));
        }
        Ok(())
    }

    fn insert(inner: &mut MemoryInner, event: &AuditEvent) -> bool {
        if inner.index.contains_key(&event.event_id) {
            return false;
        }
        inner.index.insert(event.event_id.clone(), inner.events.len());
        inner.events.push(event.clone());
        true
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStorage for MemoryStorage {
    async fn store(&self, event: &AuditEvent) -> Result<bool> {
        self.check_injected_failure()?;

        let mut inner = self.inner.write().await;
        let stored = Self::insert(&mut inner, event);
        if !stored {
            tracing::debug!(event_id = %event.event_id, "Duplicate audit event ignored");
        }
        Ok(stored)
    }

    async fn store_batch(&self, events: &[AuditEvent]) -> Result<usize> {
        self.check_injected_failure()?;

        let mut inner = self.inner.write().await;
        let stored = events
            .iter()
            .filter(|event| Self::insert(&mut inner, event))
            .count();
        Ok(stored)
    }

    async fn find_by_id(&self, event_id: &str) -> Result<Option<AuditEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .index
            .get(event_id)
            .map(|&pos| inner.events[pos].clone()))
    }

    async fn query(&self, criteria: &QueryCriteria) -> Result<Vec<AuditEvent>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&AuditEvent> =
            inner.events.iter().filter(|e| criteria.matches(e)).collect();
        matching.sort_by(|a, b| criteria.compare(a, b));

        Ok(matching
            .into_iter()
            .skip(criteria.offset())
            .take(criteria.effective_size())
            .cloned()
            .collect())
    }

    async fn count(&self, criteria: &QueryCriteria) -> Result<u64> {
        let inner = self.inner.read().await;
        Ok(inner.events.iter().filter(|e| criteria.matches(e)).count() as u64)
    }

    async fn verify_integrity(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<IntegrityReport> {
        let inner = self.inner.read().await;
        let known_hashes: HashSet<&str> = inner
            .events
            .iter()
            .filter_map(|e| e.event_hash.as_deref())
            .collect();

        let mut in_range: Vec<&AuditEvent> = inner
            .events
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .collect();
        in_range.sort_by_key(|e| e.timestamp);

        let mut report = IntegrityReport::empty(from, to);
        let mut referenced: HashSet<&str> = HashSet::new();

        for event in in_range {
            report.total_events += 1;

            let Some(hash) = event.event_hash.as_deref() else {
                continue;
            };
            let previous = event.previous_event_hash.as_deref();
            let mut problems = Vec::new();

            let expected = compute_event_hash(event, previous, self.algorithm);
            if expected != hash {
                problems.push(format!("Hash mismatch: expected {expected} but found {hash}"));
            }
            if let Some(prev) = previous {
                if !known_hashes.contains(prev) {
                    problems.push(format!(
                        "Missing predecessor: previous hash {prev} is not in storage \
                         (dead-lettered or never persisted)"
                    ));
                } else if !referenced.insert(prev) {
                    problems.push(format!("Hash chain forked at {prev}"));
                }
            }

            if problems.is_empty() {
                report.verified_events += 1;
            }
            for description in problems {
                report.violations.push(IntegrityViolation {
                    event_id: event.event_id.clone(),
                    description,
                    timestamp: event.timestamp,
                });
            }
        }

        report.valid = report.violations.is_empty();
        if !report.valid {
            tracing::warn!(
                violations = report.violations.len(),
                total = report.total_events,
                "Audit integrity verification failed"
            );
        }
        Ok(report)
    }

    async fn initialize_schema(&self) -> Result<()> {
        tracing::debug!("Memory storage needs no schema");
        Ok(())
    }

    async fn check_health(&self) -> HealthStatus {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            HealthStatus::unhealthy(self.name(), "storage marked unavailable")
        } else {
            HealthStatus::healthy(self.name())
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Storage that only logs events
///
/// Keeps nothing; queries return empty results.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStorage;

impl LoggingStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditStorage for LoggingStorage {
    async fn store(&self, event: &AuditEvent) -> Result<bool> {
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            severity = %event.severity,
            user_id = event.user_id.as_deref().unwrap_or("-"),
            resource = event.resource.as_deref().unwrap_or("-"),
            "AUDIT: {}",
            event
        );
        Ok(true)
    }

    async fn find_by_id(&self, _event_id: &str) -> Result<Option<AuditEvent>> {
        Ok(None)
    }

    async fn query(&self, _criteria: &QueryCriteria) -> Result<Vec<AuditEvent>> {
        Ok(Vec::new())
    }

    async fn count(&self, _criteria: &QueryCriteria) -> Result<u64> {
        Ok(0)
    }

    async fn verify_integrity(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<IntegrityReport> {
        Ok(IntegrityReport::empty(from, to))
    }

    async fn initialize_schema(&self) -> Result<()> {
        tracing::info!("Logging storage initialized (no schema needed)");
        Ok(())
    }

    async fn check_health(&self) -> HealthStatus {
        HealthStatus::healthy(self.name())
    }

    fn name(&self) -> &str {
        "logging"
    }
}
