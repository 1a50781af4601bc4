//! Audit Entry
//!
//! One immutable fact within an organization's hash chain. Entries are
//! created only by `ledger::append_entry` and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::audit::canonical::AuditPayload;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub actor_id: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    /// Stored text form; see `AuditPayload` for the tagged view.
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
    /// 1-based, contiguous within the organization.
    pub seq: i64,
    pub prev_hash: Option<String>,
    pub hash: String,
}

impl AuditEntry {
    pub fn payload_tagged(&self) -> AuditPayload {
        AuditPayload::from_stored(self.payload.as_deref())
    }

    pub(crate) fn from_row(row: &SqliteRow) -> CoreResult<Self> {
        let id: String = row.try_get("id")?;
        let organization_id: String = row.try_get("organization_id")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self {
            id: parse_uuid(&id)?,
            organization_id: parse_uuid(&organization_id)?,
            actor_id: row.try_get("actor_id")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            action: row.try_get("action")?,
            payload: row.try_get("payload")?,
            created_at: parse_timestamp(&created_at)?,
            seq: row.try_get("seq")?,
            prev_hash: row.try_get("prev_hash")?,
            hash: row.try_get("hash")?,
        })
    }
}

/// Input for a new ledger append. `seq`, `prev_hash` and `hash` are assigned
/// by the ledger itself.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub payload: AuditPayload,
    /// Only honored outside production; deterministic test/demo seeding.
    pub created_at_override: Option<DateTime<Utc>>,
}

impl NewAuditEntry {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
        payload: AuditPayload,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            payload,
            created_at_override: None,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at_override = Some(created_at);
        self
    }
}

pub(crate) fn parse_uuid(value: &str) -> CoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| CoreError::Serialization(format!("Invalid UUID {:?}: {}", value, e)))
}

pub(crate) fn parse_timestamp(value: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::Serialization(format!("Invalid timestamp {:?}: {}", value, e)))
}
