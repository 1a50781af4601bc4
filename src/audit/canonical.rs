//! Canonical serialization for audit entries
//!
//! Deterministic bytes used as hash input. Keys are sorted, output is
//! compact UTF-8, timestamps are UTC ISO-8601. The payload is embedded as
//! structured data when its stored text parses as JSON, and as a literal
//! string otherwise, so the different representations of "no payload"
//! (absent, JSON null, stored "null") hash identically.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::audit::entry::AuditEntry;

/// Audit payload as a tagged variant rather than an ambiguous string.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditPayload {
    Empty,
    Structured(Value),
    Opaque(String),
}

impl AuditPayload {
    /// Reconstruct the tag from the stored TEXT column.
    pub fn from_stored(stored: Option<&str>) -> Self {
        match stored {
            None => Self::Empty,
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) => Self::Structured(value),
                Err(_) => Self::Opaque(text.to_string()),
            },
        }
    }

    /// Serialize for the TEXT column. Structured data is stored as compact
    /// JSON, opaque strings literally, absent as NULL.
    pub fn to_stored(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Structured(value) => Some(value.to_string()),
            Self::Opaque(text) => Some(text.clone()),
        }
    }

    /// Value embedded into the canonical body.
    pub fn canonical_value(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Structured(value) => value.clone(),
            Self::Opaque(text) => Value::String(text.clone()),
        }
    }

    pub fn structured(value: Value) -> Self {
        Self::Structured(value)
    }

    pub fn opaque(text: impl Into<String>) -> Self {
        Self::Opaque(text.into())
    }
}

/// UTC ISO-8601 with `+00:00` offset; fractional seconds only when nonzero.
pub fn canonical_timestamp(dt: &DateTime<Utc>) -> String {
    if dt.timestamp_subsec_micros() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S+00:00").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
    }
}

/// Canonical bytes for one entry. Pure function of its semantic fields;
/// serde_json's default map is BTreeMap-backed, so keys serialize sorted.
pub fn canonical_bytes(entry: &AuditEntry) -> Vec<u8> {
    let payload = AuditPayload::from_stored(entry.payload.as_deref());

    let body = json!({
        "organization_id": entry.organization_id.to_string(),
        "actor_id": entry.actor_id.clone().unwrap_or_default(),
        "entity_type": entry.entity_type,
        "entity_id": entry.entity_id,
        "action": entry.action,
        "payload": payload.canonical_value(),
        "created_at": canonical_timestamp(&entry.created_at),
        "seq": entry.seq,
    });

    body.to_string().into_bytes()
}

/// Chain digest: SHA-256 over `prev_hash || "\n" || canonical`, hex-encoded.
pub fn compute_hash(prev_hash: Option<&str>, canonical: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.unwrap_or("").as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical);
    hex::encode(hasher.finalize())
}
