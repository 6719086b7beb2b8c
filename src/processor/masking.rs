//! PII masking stage
//!
//! Walks JSON request/response payloads and rewrites the string values of
//! sensitive fields. Payloads that are not JSON objects or arrays are left
//! alone.

use super::AuditProcessor;
use crate::error::{AuditError, Result};
use crate::types::{AuditContext, AuditEvent};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Prefix of hashed values
pub const HASH_MARKER: &str = "SHA256:";

/// Replacement for redacted values
pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

const MASK: &str = "****";

/// How sensitive values are replaced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaskingStrategy {
    /// `SHA256:` followed by the base64 digest of the value
    #[default]
    Hash,
    /// Keep the first and last two characters
    Mask,
    /// Replace with `[REDACTED]`
    Redact,
}

impl MaskingStrategy {
    /// Replacement for a single value
    pub fn apply(&self, value: &str) -> String {
        match self {
            Self::Hash => {
                if value.starts_with(HASH_MARKER) {
                    return value.to_string();
                }
                let digest = Sha256::digest(value.as_bytes());
                format!("{}{}", HASH_MARKER, STANDARD.encode(digest))
            }
            Self::Mask => {
                let chars: Vec<char> = value.chars().collect();
                if chars.len() <= 4 {
                    return MASK.to_string();
                }
                let head: String = chars[..2].iter().collect();
                let tail: String = chars[chars.len() - 2..].iter().collect();
                format!("{head}{MASK}{tail}")
            }
            Self::Redact => REDACTED_PLACEHOLDER.to_string(),
        }
    }
}

impl fmt::Display for MaskingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hash => "HASH",
            Self::Mask => "MASK",
            Self::Redact => "REDACT",
        };
        f.write_str(s)
    }
}

impl FromStr for MaskingStrategy {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HASH" => Ok(Self::Hash),
            "MASK" => Ok(Self::Mask),
            "REDACT" => Ok(Self::Redact),
            other => Err(AuditError::Config(format!(
                "Unknown masking strategy: {other}"
            ))),
        }
    }
}

/// Masks sensitive payload fields (order 300)
#[derive(Debug, Clone)]
pub struct PiiMasker {
    fields: BTreeSet<String>,
    strategy: MaskingStrategy,
}

impl PiiMasker {
    pub fn new<I, S>(fields: I, strategy: MaskingStrategy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            strategy,
        }
    }

    pub fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    pub fn strategy(&self) -> MaskingStrategy {
        self.strategy
    }

    /// Mask one payload, returning `None` when nothing changed
    fn mask_payload(&self, payload: &str) -> Option<String> {
        if payload.trim().is_empty() {
            return None;
        }
        let mut value: Value = match serde_json::from_str(payload) {
            Ok(v @ (Value::Object(_) | Value::Array(_))) => v,
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "Payload is not JSON, skipping masking");
                return None;
            }
        };

        if !self.mask_value(&mut value) {
            return None;
        }
        match serde_json::to_string(&value) {
            Ok(masked) => Some(masked),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize masked payload");
                None
            }
        }
    }

    fn mask_value(&self, value: &mut Value) -> bool {
        let mut changed = false;
        match value {
            Value::Object(map) => {
                for (key, field) in map.iter_mut() {
                    match field {
                        Value::String(s) if self.fields.contains(key) => {
                            if s.is_empty() {
                                continue;
                            }
                            let masked = self.strategy.apply(s);
                            if masked != *s {
                                *s = masked;
                                changed = true;
                            }
                        }
                        Value::Object(_) | Value::Array(_) => {
                            changed |= self.mask_value(field);
                        }
                        _ => {}
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    changed |= self.mask_value(item);
                }
            }
            _ => {}
        }
        changed
    }
}

impl AuditProcessor for PiiMasker {
    fn process(&self, event: &AuditEvent, _ctx: &AuditContext) -> Result<AuditEvent> {
        if self.fields.is_empty() {
            return Ok(event.clone());
        }

        let request = event
            .request_payload
            .as_deref()
            .and_then(|p| self.mask_payload(p));
        let response = event
            .response_payload
            .as_deref()
            .and_then(|p| self.mask_payload(p));

        if request.is_none() && response.is_none() {
            return Ok(event.clone());
        }

        let mut masked = event.clone();
        if let Some(p) = request {
            masked.request_payload = Some(p);
        }
        if let Some(p) = response {
            masked.response_payload = Some(p);
        }
        Ok(masked)
    }

    fn order(&self) -> i32 {
        300
    }

    fn name(&self) -> &str {
        "pii-masker"
    }
}
