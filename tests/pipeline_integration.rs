//! Pipeline integration tests
//!
//! End-to-end tests through the public API: processor chain composition,
//! sync and async orchestration, backpressure, dead-lettering, shutdown
//! draining, configuration-driven services and integrity verification.

use a3s_audit::{
    AsyncPipeline, AuditConfig, AuditContext, AuditError, AuditEvent, AuditPipeline,
    AuditProcessor, AuditQueue, AuditService, AuditSeverity, AuditStorage, BackpressureStrategy,
    CaptureOutcome, CorrelationIdEnricher, DeadLetterEvent, DlqHandler, HashCalculator,
    MemoryDlqHandler, MemorySink, MemoryStorage, PipelineCore, ProcessingMode, ProcessorChain,
    QueryCriteria, QueueSettings, RetryPolicy, SyncPipeline, UserContextEnricher,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

fn event(event_type: &str) -> AuditEvent {
    AuditEvent::new(event_type, AuditSeverity::Info)
}

fn scenario_chain() -> ProcessorChain {
    let processors: Vec<Arc<dyn AuditProcessor>> = vec![
        Arc::new(HashCalculator::new("SHA-256", true).unwrap()),
        Arc::new(CorrelationIdEnricher::new()),
        Arc::new(UserContextEnricher::new()),
    ];
    ProcessorChain::new(processors)
}

fn queue_settings(worker_count: usize, strategy: BackpressureStrategy) -> QueueSettings {
    QueueSettings {
        capacity: 10,
        worker_count,
        poll_interval: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(5),
        backpressure_enabled: true,
        threshold: 5,
        strategy,
    }
}

// ─── Processor Chain ─────────────────────────────────────────────

#[tokio::test]
async fn test_enrich_then_hash_scenario() {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = SyncPipeline::new(PipelineCore::new(scenario_chain(), storage.clone()));

    let stored = pipeline
        .process(
            event("USER_LOGIN").with_resource("portal"),
            &AuditContext::empty(),
        )
        .await
        .unwrap();

    let session = stored.session_id.as_deref().unwrap();
    assert!(uuid::Uuid::parse_str(session).is_ok());
    assert_eq!(stored.event_hash.as_deref().unwrap().len(), 44);
    assert!(stored.previous_event_hash.is_none());
    assert!(stored.user_id.is_none());

    let found = storage.find_by_id(&stored.event_id).await.unwrap().unwrap();
    assert_eq!(found, stored);
}

#[tokio::test]
async fn test_chain_links_sequential_events() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = SyncPipeline::new(PipelineCore::new(scenario_chain(), storage.clone()));
    let ctx = AuditContext::empty().with_correlation_id("corr-1");

    let mut previous: Option<String> = None;
    for _ in 0..5 {
        let stored = pipeline.process(event("DATA_ACCESS"), &ctx).await.unwrap();
        assert_eq!(stored.session_id.as_deref(), Some("corr-1"));
        assert_eq!(stored.previous_event_hash, previous);
        previous = stored.event_hash;
    }

    let report = storage
        .verify_integrity(
            Utc::now() - ChronoDuration::minutes(1),
            Utc::now() + ChronoDuration::minutes(1),
        )
        .await
        .unwrap();
    assert!(report.valid);
    assert_eq!(report.verified_events, 5);
}

// ─── Sync Pipeline ───────────────────────────────────────────────

#[tokio::test]
async fn test_retry_bound() {
    let storage = Arc::new(MemoryStorage::new());
    storage.fail_next(2);
    let pipeline = SyncPipeline::new(
        PipelineCore::new(ProcessorChain::empty(), storage.clone()).with_retry(fast_retry()),
    );

    pipeline
        .process(event("TEST"), &AuditContext::empty())
        .await
        .unwrap();

    assert_eq!(storage.store_attempts(), 3);
    assert_eq!(storage.len().await, 1);
    assert_eq!(pipeline.metrics().snapshot().retries, 2);
}

#[tokio::test]
async fn test_exhausted_retries_return_processing_error() {
    let storage = Arc::new(MemoryStorage::new());
    storage.fail_next(10);
    let pipeline = SyncPipeline::new(
        PipelineCore::new(ProcessorChain::empty(), storage.clone()).with_retry(fast_retry()),
    );

    let err = pipeline
        .process(event("TEST"), &AuditContext::empty())
        .await
        .unwrap_err();

    match err {
        AuditError::Processing {
            event, attempts, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(event.event_type, "TEST");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(storage.is_empty().await);
}

#[tokio::test]
async fn test_sink_failure_does_not_fail_processing() {
    let storage = Arc::new(MemoryStorage::new());
    let sink = Arc::new(MemorySink::new());
    sink.set_failing(true);
    let pipeline = SyncPipeline::new(
        PipelineCore::new(ProcessorChain::empty(), storage.clone()).with_sink(sink.clone()),
    );

    pipeline
        .process(event("TEST"), &AuditContext::empty())
        .await
        .unwrap();

    assert_eq!(storage.len().await, 1);
    assert!(sink.is_empty().await);
    assert_eq!(pipeline.metrics().snapshot().sink_failures, 1);
}

#[tokio::test]
async fn test_invalid_event_not_persisted() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = SyncPipeline::new(PipelineCore::new(scenario_chain(), storage.clone()));

    let result = pipeline
        .process(event("TEST").with_id(""), &AuditContext::empty())
        .await;

    assert!(matches!(result, Err(AuditError::InvalidEvent(_))));
    assert_eq!(storage.store_attempts(), 0);
}

// ─── Queue & Async Pipeline ──────────────────────────────────────

#[tokio::test]
async fn test_reject_backpressure_at_threshold() {
    let storage = Arc::new(MemoryStorage::new());
    let settings = queue_settings(1, BackpressureStrategy::Reject);
    let (pipeline, _receiver) = AsyncPipeline::new(
        PipelineCore::new(ProcessorChain::empty(), storage),
        settings.effective_capacity(),
    );
    let pipeline = Arc::new(pipeline);

    // No workers: nothing drains the buffer
    let (_, closed) = tokio::sync::mpsc::channel(1);
    let queue = AuditQueue::start(settings, pipeline, closed).unwrap();

    for _ in 0..5 {
        assert!(queue.enqueue(event("TEST")).await.unwrap());
    }
    let err = queue.enqueue(event("TEST")).await.unwrap_err();
    assert!(matches!(err, AuditError::QueueFull { .. }));

    let stats = queue.stats();
    assert_eq!(stats.enqueued, 5);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.size, 5);
}

#[tokio::test]
async fn test_async_exhaustion_lands_in_dlq() {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    storage.set_unavailable(true);
    let dlq = Arc::new(MemoryDlqHandler::new(100));
    let settings = queue_settings(2, BackpressureStrategy::Block);

    let (pipeline, receiver) = AsyncPipeline::new(
        PipelineCore::new(ProcessorChain::empty(), storage.clone()).with_retry(fast_retry()),
        settings.effective_capacity(),
    );
    let pipeline = Arc::new(pipeline.with_dlq(dlq.clone()));
    let queue = AuditQueue::start(settings, pipeline.clone(), receiver).unwrap();

    let failing = event("FINANCIAL_TRANSACTION");
    let failing_id = failing.event_id.clone();
    assert!(queue.enqueue(failing).await.unwrap());
    queue.shutdown().await;

    assert_eq!(dlq.count().await.unwrap(), 1);
    let dead = &dlq.list(10).await.unwrap()[0];
    assert_eq!(dead.event.event_id, failing_id);
    assert_eq!(dead.attempts, 3);
    assert!(dead.reason.contains("unavailable"));

    assert_eq!(queue.stats().failed, 1);
    assert_eq!(pipeline.metrics().snapshot().failed, 1);
}

#[tokio::test]
async fn test_shutdown_drains_queue() {
    let storage = Arc::new(MemoryStorage::new());
    let settings = queue_settings(3, BackpressureStrategy::Block);
    let (pipeline, receiver) = AsyncPipeline::new(
        PipelineCore::new(scenario_chain(), storage.clone()),
        settings.effective_capacity(),
    );
    let queue = AuditQueue::start(settings, Arc::new(pipeline), receiver).unwrap();

    for _ in 0..20 {
        assert!(queue.enqueue(event("TEST")).await.unwrap());
    }
    queue.shutdown().await;
    queue.shutdown().await;

    assert_eq!(storage.len().await, 20);
    let stats = queue.stats();
    assert_eq!(stats.enqueued, 20);
    assert_eq!(stats.processed, 20);
    assert_eq!(stats.size, 0);
    assert!(!queue.is_running());

    assert!(matches!(
        queue.enqueue(event("LATE")).await,
        Err(AuditError::QueueShutdown)
    ));
}

#[tokio::test]
async fn test_concurrent_producers_single_chain() {
    let storage = Arc::new(MemoryStorage::new());
    let settings = queue_settings(4, BackpressureStrategy::Block);
    let (pipeline, receiver) = AsyncPipeline::new(
        PipelineCore::new(scenario_chain(), storage.clone()),
        settings.effective_capacity(),
    );
    let queue = Arc::new(AuditQueue::start(settings, Arc::new(pipeline), receiver).unwrap());

    let mut producers = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        producers.push(tokio::spawn(async move {
            for _ in 0..25 {
                queue.enqueue(event("TEST")).await.unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    queue.shutdown().await;

    let events = storage.all().await;
    assert_eq!(events.len(), 100);
    let heads = events
        .iter()
        .filter(|e| e.previous_event_hash.is_none())
        .count();
    assert_eq!(heads, 1);

    let mut referenced: Vec<&str> = events
        .iter()
        .filter_map(|e| e.previous_event_hash.as_deref())
        .collect();
    referenced.sort_unstable();
    referenced.dedup();
    assert_eq!(referenced.len(), 99);
}

// ─── Service ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_service_from_toml_with_ndpa_masking() {
    init_tracing();
    let config = AuditConfig::from_toml_str(
        r#"
        [processing]
        mode = "SYNC"

        [processing.compliance]
        regulations = ["NDPA"]

        [processing.compliance.pii_masking]
        strategy = "HASH"
    "#,
    )
    .unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let service = AuditService::builder(config)
        .storage(storage.clone())
        .build()
        .await
        .unwrap();
    assert_eq!(service.mode(), Some(ProcessingMode::Sync));

    let outcome = service
        .capture(
            event("DATA_ACCESS")
                .with_request_payload(r#"{"email":"ada@example.com","plan":"gold"}"#),
            &AuditContext::empty().with_user("u-9", "ada"),
        )
        .await
        .unwrap();
    let CaptureOutcome::Stored(stored) = outcome else {
        panic!("expected stored outcome");
    };

    let payload: serde_json::Value =
        serde_json::from_str(stored.request_payload.as_deref().unwrap()).unwrap();
    assert!(payload["email"].as_str().unwrap().starts_with("SHA256:"));
    assert_eq!(payload["plan"], "gold");
    assert!(stored.compliance.contains_pii);
    assert!(stored.compliance.regulatory_tags.contains("NDPA"));
    assert!(stored.event_hash.is_some());

    let by_user = storage
        .query(&QueryCriteria::new().with_user_id("u-9"))
        .await
        .unwrap();
    assert_eq!(by_user.len(), 1);
}

#[tokio::test]
async fn test_service_async_with_sink() {
    let mut config = AuditConfig::default();
    config.processing.async_processing.worker_count = 1;
    config.processing.async_processing.poll_interval_ms = 10;
    let storage = Arc::new(MemoryStorage::new());
    let sink = Arc::new(MemorySink::new());
    let service = AuditService::builder(config)
        .storage(storage.clone())
        .sink(sink.clone())
        .build()
        .await
        .unwrap();

    for _ in 0..10 {
        let outcome = service
            .capture(event("TEST"), &AuditContext::empty())
            .await
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::Queued);
    }
    service.shutdown().await;

    assert_eq!(storage.len().await, 10);
    assert_eq!(sink.len().await, 10);
    assert!(sink.is_closed());

    let sequences: Vec<u64> = storage.all().await.iter().map(|e| e.sequence_number).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (1..=10).collect::<Vec<_>>());
}

// ─── Integrity ───────────────────────────────────────────────────

#[tokio::test]
async fn test_integrity_detects_tampering() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = SyncPipeline::new(PipelineCore::new(scenario_chain(), storage.clone()));
    let ctx = AuditContext::empty();

    let mut stored = Vec::new();
    for _ in 0..3 {
        stored.push(pipeline.process(event("TRANSFER"), &ctx).await.unwrap());
    }

    let mut tampered = stored[1].clone();
    tampered.resource = Some("account/999".to_string());
    assert!(storage.replace(tampered).await);

    let report = storage
        .verify_integrity(
            Utc::now() - ChronoDuration::minutes(1),
            Utc::now() + ChronoDuration::minutes(1),
        )
        .await
        .unwrap();

    assert!(!report.valid);
    assert_eq!(report.total_events, 3);
    assert_eq!(report.verified_events, 2);
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].event_id, stored[1].event_id);
}

#[tokio::test]
async fn test_replaying_dead_letter_closes_chain_gap() {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = SyncPipeline::new(
        PipelineCore::new(scenario_chain(), storage.clone()).with_retry(fast_retry()),
    );
    let ctx = AuditContext::empty();
    let window = || {
        (
            Utc::now() - ChronoDuration::minutes(1),
            Utc::now() + ChronoDuration::minutes(1),
        )
    };

    pipeline.process(event("TRANSFER"), &ctx).await.unwrap();
    storage.set_unavailable(true);
    let err = pipeline.process(event("TRANSFER"), &ctx).await.unwrap_err();
    storage.set_unavailable(false);
    let after = pipeline.process(event("TRANSFER"), &ctx).await.unwrap();

    let dead = DeadLetterEvent::from_error(&err).unwrap();
    assert_eq!(after.previous_event_hash, dead.event.event_hash);

    let (from, to) = window();
    let report = storage.verify_integrity(from, to).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].event_id, after.event_id);
    assert!(report.violations[0]
        .description
        .starts_with("Missing predecessor"));

    assert!(storage.store(&dead.event).await.unwrap());
    let (from, to) = window();
    let report = storage.verify_integrity(from, to).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.verified_events, 3);
}
