//! Tamper-evident hashing stage
//!
//! Each event's hash covers its identifying fields and, when chaining is
//! enabled, the hash of the event hashed immediately before it on the same
//! calculator. The cursor lives behind a mutex, so concurrent workers still
//! produce a single linear chain (in lock-acquisition order).
//!
//! The cursor advances before persistence. An event that exhausts its
//! storage retries is still the predecessor of the next one, so integrity
//! checks report a missing predecessor until the dead-lettered event is
//! stored again. Its recorded hash is unchanged, which closes the gap.

use super::AuditProcessor;
use crate::error::{AuditError, Result};
use crate::types::{AuditContext, AuditEvent};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

/// Digest algorithm used for event hashes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl HashAlgorithm {
    /// Digest `input` and encode it as standard base64
    pub fn digest_base64(&self, input: &[u8]) -> String {
        match self {
            Self::Sha256 => STANDARD.encode(Sha256::digest(input)),
            Self::Sha384 => STANDARD.encode(Sha384::digest(input)),
            Self::Sha512 => STANDARD.encode(Sha512::digest(input)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        };
        f.write_str(s)
    }
}

impl FromStr for HashAlgorithm {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHA-256" | "SHA256" => Ok(Self::Sha256),
            "SHA-384" | "SHA384" => Ok(Self::Sha384),
            "SHA-512" | "SHA512" => Ok(Self::Sha512),
            other => Err(AuditError::Config(format!(
                "Unsupported hash algorithm: {other}"
            ))),
        }
    }
}

/// Hash of an event given the previous hash in the chain
///
/// The digest input is the `|`-joined list of event id, event type, user
/// id, resource, action, session id and timestamp (RFC 3339, millisecond
/// precision, `Z` suffix), followed by `previous` when present. Missing
/// optional fields contribute an empty string.
pub fn compute_event_hash(
    event: &AuditEvent,
    previous: Option<&str>,
    algorithm: HashAlgorithm,
) -> String {
    let timestamp = event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut parts: Vec<&str> = vec![
        event.event_id.as_str(),
        event.event_type.as_str(),
        event.user_id.as_deref().unwrap_or(""),
        event.resource.as_deref().unwrap_or(""),
        event.action.as_deref().unwrap_or(""),
        event.session_id.as_deref().unwrap_or(""),
        timestamp.as_str(),
    ];
    if let Some(prev) = previous {
        parts.push(prev);
    }
    algorithm.digest_base64(parts.join("|").as_bytes())
}

/// Computes event hashes and links them into a chain (order 900)
#[derive(Debug)]
pub struct HashCalculator {
    algorithm: HashAlgorithm,
    include_previous: bool,
    last_hash: Mutex<Option<String>>,
}

impl HashCalculator {
    /// Create a calculator for a named algorithm (`SHA-256`, `SHA-384`, `SHA-512`)
    pub fn new(algorithm: &str, include_previous: bool) -> Result<Self> {
        Ok(Self::with_algorithm(algorithm.parse()?, include_previous))
    }

    pub fn with_algorithm(algorithm: HashAlgorithm, include_previous: bool) -> Self {
        Self {
            algorithm,
            include_previous,
            last_hash: Mutex::new(None),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn chaining(&self) -> bool {
        self.include_previous
    }

    /// Hash of the most recently processed event
    pub fn last_hash(&self) -> Option<String> {
        self.last_hash
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Continue the chain from a persisted hash (e.g., after restart)
    pub fn resume_from(&self, hash: Option<String>) {
        *self.last_hash.lock().unwrap_or_else(|e| e.into_inner()) = hash;
    }
}

impl AuditProcessor for HashCalculator {
    fn process(&self, event: &AuditEvent, _ctx: &AuditContext) -> Result<AuditEvent> {
        let mut hashed = event.clone();

        let mut cursor = self.last_hash.lock().unwrap_or_else(|e| e.into_inner());
        let previous = if self.include_previous {
            cursor.clone()
        } else {
            None
        };
        let hash = compute_event_hash(&hashed, previous.as_deref(), self.algorithm);
        *cursor = Some(hash.clone());
        drop(cursor);

        hashed.previous_event_hash = previous;
        hashed.event_hash = Some(hash);
        Ok(hashed)
    }

    fn order(&self) -> i32 {
        900
    }

    fn name(&self) -> &str {
        "hash-calculator"
    }
}
