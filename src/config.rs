use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};
use crate::pipeline::{ProcessingMode, RetryPolicy};
use crate::processor::{HashAlgorithm, MaskingStrategy};
use crate::queue::{BackpressureStrategy, QueueSettings};

/// Settings for the audit pipeline, loaded from TOML.
///
/// Every key is optional; missing keys take the documented default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Master switch; when false captured events are ignored (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub integrity: IntegrityConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// SYNC or ASYNC (default: ASYNC)
    #[serde(default)]
    pub mode: ProcessingMode,

    #[serde(default, rename = "async")]
    pub async_processing: AsyncConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub compliance: ComplianceConfig,
}

/// Queue and worker settings for ASYNC mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncConfig {
    /// Maximum events buffered (default: 10000)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Worker tasks draining the queue (default: 4)
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Events per storage batch (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Longest a partial batch may wait before flushing (default: 5000)
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Worker poll timeout (default: 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Time allowed for draining on shutdown (default: 30000)
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Storage attempts per event (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit; attempt n waits n × base_delay_ms (default: 100)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fill actor fields from the capture context
    #[serde(default = "default_true")]
    pub user_context: bool,

    /// Assign a correlation id to events without a session
    #[serde(default = "default_true")]
    pub correlation_id: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Active regulation codes, e.g. ["CBN", "NDPA"] (default: none)
    #[serde(default)]
    pub regulations: Vec<String>,

    #[serde(default)]
    pub pii_masking: PiiMaskingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiMaskingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HASH, MASK or REDACT (default: HASH)
    #[serde(default)]
    pub strategy: MaskingStrategy,

    /// Extra payload fields to mask, on top of the active regulations' fields
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityConfig {
    #[serde(default)]
    pub hashing: HashingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// SHA-256, SHA-384 or SHA-512 (default: SHA-256)
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Link each hash to the previous one (default: true)
    #[serde(default = "default_true")]
    pub include_previous_hash: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default)]
    pub backpressure: BackpressureConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Queue depth at which the strategy kicks in (default: 8000)
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// DROP, BLOCK or REJECT (default: DROP)
    #[serde(default)]
    pub strategy: BackpressureStrategy,
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_worker_count() -> usize {
    4
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_algorithm() -> String {
    HashAlgorithm::Sha256.to_string()
}

fn default_threshold() -> usize {
    8_000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            processing: ProcessingConfig::default(),
            integrity: IntegrityConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_context: true,
            correlation_id: true,
        }
    }
}

impl Default for PiiMaskingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: MaskingStrategy::default(),
            fields: Vec::new(),
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: default_algorithm(),
            include_previous_hash: true,
        }
    }
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            strategy: BackpressureStrategy::default(),
        }
    }
}

impl AuditConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a file.
    /// Returns default config if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No audit config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuditError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Write the configuration as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AuditError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges and names.
    pub fn validate(&self) -> Result<()> {
        let async_cfg = &self.processing.async_processing;
        if async_cfg.queue_capacity < 1 {
            return Err(AuditError::Config(
                "processing.async.queue_capacity must be at least 1".to_string(),
            ));
        }
        if async_cfg.worker_count < 1 {
            return Err(AuditError::Config(
                "processing.async.worker_count must be at least 1".to_string(),
            ));
        }
        if async_cfg.batch_size < 1 {
            return Err(AuditError::Config(
                "processing.async.batch_size must be at least 1".to_string(),
            ));
        }
        if self.processing.retry.max_attempts < 1 {
            return Err(AuditError::Config(
                "processing.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let backpressure = &self.performance.backpressure;
        if backpressure.enabled && backpressure.threshold > async_cfg.queue_capacity {
            return Err(AuditError::Config(format!(
                "performance.backpressure.threshold ({}) exceeds queue_capacity ({})",
                backpressure.threshold, async_cfg.queue_capacity
            )));
        }
        self.hash_algorithm()?;
        Ok(())
    }

    pub fn hash_algorithm(&self) -> Result<HashAlgorithm> {
        self.integrity.hashing.algorithm.parse()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.processing.retry.max_attempts,
            Duration::from_millis(self.processing.retry.base_delay_ms),
        )
    }

    pub fn queue_settings(&self) -> QueueSettings {
        let async_cfg = &self.processing.async_processing;
        let backpressure = &self.performance.backpressure;
        QueueSettings {
            capacity: async_cfg.queue_capacity,
            worker_count: async_cfg.worker_count,
            poll_interval: Duration::from_millis(async_cfg.poll_interval_ms),
            shutdown_timeout: Duration::from_millis(async_cfg.shutdown_timeout_ms),
            backpressure_enabled: backpressure.enabled,
            threshold: backpressure.threshold,
            strategy: backpressure.strategy,
        }
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.processing.async_processing.batch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuditConfig::default();
        assert!(config.enabled);
        assert_eq!(config.processing.mode, ProcessingMode::Async);
        assert_eq!(config.processing.async_processing.queue_capacity, 10_000);
        assert_eq!(config.processing.async_processing.worker_count, 4);
        assert_eq!(config.processing.async_processing.poll_interval_ms, 1_000);
        assert_eq!(config.processing.retry.max_attempts, 3);
        assert_eq!(config.processing.retry.base_delay_ms, 100);
        assert!(config.processing.compliance.regulations.is_empty());
        assert_eq!(
            config.processing.compliance.pii_masking.strategy,
            MaskingStrategy::Hash
        );
        assert_eq!(config.integrity.hashing.algorithm, "SHA-256");
        assert_eq!(config.performance.backpressure.threshold, 8_000);
        assert_eq!(
            config.performance.backpressure.strategy,
            BackpressureStrategy::Drop
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
            [processing]
            mode = "SYNC"

            [processing.async]
            queue_capacity = 500
            worker_count = 1

            [processing.retry]
            max_attempts = 5
            base_delay_ms = 20

            [processing.enrichment]
            correlation_id = false

            [processing.compliance]
            regulations = ["CBN", "NDPA"]

            [processing.compliance.pii_masking]
            strategy = "REDACT"
            fields = ["iban"]

            [integrity.hashing]
            algorithm = "SHA-512"
            include_previous_hash = false

            [performance.backpressure]
            threshold = 400
            strategy = "REJECT"
        "#;
        let config = AuditConfig::from_toml_str(toml_str).unwrap();

        assert_eq!(config.processing.mode, ProcessingMode::Sync);
        assert_eq!(config.processing.async_processing.queue_capacity, 500);
        assert_eq!(config.processing.async_processing.batch_size, 100);
        assert_eq!(config.processing.retry.max_attempts, 5);
        assert!(config.processing.enrichment.user_context);
        assert!(!config.processing.enrichment.correlation_id);
        assert_eq!(config.processing.compliance.regulations, vec!["CBN", "NDPA"]);
        assert_eq!(
            config.processing.compliance.pii_masking.strategy,
            MaskingStrategy::Redact
        );
        assert_eq!(config.hash_algorithm().unwrap(), HashAlgorithm::Sha512);
        assert!(!config.integrity.hashing.include_previous_hash);
        assert_eq!(
            config.performance.backpressure.strategy,
            BackpressureStrategy::Reject
        );

        let settings = config.queue_settings();
        assert_eq!(settings.effective_capacity(), 400);
        assert_eq!(settings.worker_count, 1);

        let retry = config.retry_policy();
        assert_eq!(retry.delay_for(2), Duration::from_millis(40));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_drop_oldest_alias() {
        let config = AuditConfig::from_toml_str(
            r#"
            [performance.backpressure]
            strategy = "DROP_OLDEST"
        "#,
        )
        .unwrap();
        assert_eq!(
            config.performance.backpressure.strategy,
            BackpressureStrategy::Drop
        );
    }

    #[test]
    fn test_invalid_values_rejected_by_parser() {
        assert!(AuditConfig::from_toml_str("[processing]\nmode = \"BATCH\"").is_err());
        assert!(matches!(
            AuditConfig::from_toml_str("enabled = \"maybe\""),
            Err(AuditError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_validate() {
        let mut config = AuditConfig::default();
        config.processing.async_processing.worker_count = 0;
        assert!(config.validate().is_err());

        let mut config = AuditConfig::default();
        config.processing.async_processing.queue_capacity = 100;
        assert!(config.validate().is_err(), "threshold above capacity");
        config.performance.backpressure.enabled = false;
        assert!(config.validate().is_ok());

        let mut config = AuditConfig::default();
        config.processing.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AuditConfig::default();
        config.integrity.hashing.algorithm = "MD5".to_string();
        assert!(matches!(config.validate(), Err(AuditError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuditConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AuditConfig::default());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("audit.toml");

        let mut config = AuditConfig::default();
        config.processing.mode = ProcessingMode::Sync;
        config.processing.compliance.regulations = vec!["NDPA".to_string()];
        config.performance.backpressure.strategy = BackpressureStrategy::Block;
        config.save(&path).unwrap();

        let loaded = AuditConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
