//! Audit Ledger
//!
//! Append-only writes and ordered reads over the per-organization hash
//! chain. Append executes inside the caller's transaction, with the caller
//! holding the organization's append lock (`Database::org_lock`), so `seq`
//! assignment cannot race and later appends in the same transaction chain
//! onto rows written earlier in it.

use chrono::{DateTime, Timelike, Utc};
use sqlx::{Row, SqliteConnection};
use tracing::debug;
use uuid::Uuid;

use crate::audit::canonical::{canonical_bytes, canonical_timestamp, compute_hash};
use crate::audit::entry::{AuditEntry, NewAuditEntry};
use crate::config::Environment;
use crate::context::RequestContext;
use crate::error::{CoreError, CoreResult};

/// Current UTC time truncated to microseconds, matching the stored and
/// canonical timestamp precision.
pub(crate) fn now_utc() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.timestamp_subsec_micros() * 1000)
        .unwrap_or(now)
}

/// Append one entry to the organization's chain.
///
/// `created_at_override` is honored only outside production; in prod it is
/// rejected outright so backdating code can never ship live.
pub async fn append_entry(
    conn: &mut SqliteConnection,
    ctx: &RequestContext,
    environment: Environment,
    new: NewAuditEntry,
) -> CoreResult<AuditEntry> {
    if new.created_at_override.is_some() && environment.is_prod() {
        return Err(CoreError::TimestampOverrideForbidden);
    }

    let last = last_entry(conn, ctx.organization_id).await?;
    let next_seq = last.as_ref().map(|e| e.seq + 1).unwrap_or(1);
    let prev_hash = last.map(|e| e.hash);

    let effective_created_at = match new.created_at_override {
        Some(dt) => dt.with_timezone(&Utc),
        None => now_utc(),
    };

    let mut entry = AuditEntry {
        id: Uuid::new_v4(),
        organization_id: ctx.organization_id,
        actor_id: ctx.actor_id.map(|id| id.to_string()),
        entity_type: new.entity_type,
        entity_id: new.entity_id,
        action: new.action,
        payload: new.payload.to_stored(),
        created_at: effective_created_at,
        seq: next_seq,
        prev_hash,
        hash: String::new(),
    };

    let canonical = canonical_bytes(&entry);
    entry.hash = compute_hash(entry.prev_hash.as_deref(), &canonical);

    sqlx::query(
        r#"
        INSERT INTO audit_log
            (id, organization_id, actor_id, entity_type, entity_id, action,
             payload, created_at, seq, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.organization_id.to_string())
    .bind(entry.actor_id.clone())
    .bind(entry.entity_type.clone())
    .bind(entry.entity_id.clone())
    .bind(entry.action.clone())
    .bind(entry.payload.clone())
    .bind(canonical_timestamp(&entry.created_at))
    .bind(entry.seq)
    .bind(entry.prev_hash.clone())
    .bind(entry.hash.clone())
    .execute(&mut *conn)
    .await?;

    debug!(
        action = %entry.action,
        organization_id = %entry.organization_id,
        seq = entry.seq,
        correlation_id = %ctx.correlation_id,
        "Appended audit entry"
    );

    Ok(entry)
}

/// Standalone append: acquires the organization lock and runs the append in
/// its own transaction. Callers that bundle the append with other mutations
/// use `append_entry` inside their own lock/transaction instead.
pub async fn append(
    db: &crate::database::Database,
    ctx: &RequestContext,
    environment: Environment,
    new: NewAuditEntry,
) -> CoreResult<AuditEntry> {
    let _org_guard = db.org_lock(ctx.organization_id).await;
    let mut tx = db.pool().begin().await?;
    let entry = append_entry(&mut tx, ctx, environment, new).await?;
    tx.commit().await?;
    Ok(entry)
}

/// Latest entry (maximum `seq`) for an organization, if any.
pub async fn last_entry(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
) -> CoreResult<Option<AuditEntry>> {
    let row = sqlx::query(
        "SELECT * FROM audit_log WHERE organization_id = ? ORDER BY seq DESC LIMIT 1",
    )
    .bind(organization_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(AuditEntry::from_row).transpose()
}

pub async fn max_seq(conn: &mut SqliteConnection, organization_id: Uuid) -> CoreResult<i64> {
    let row = sqlx::query("SELECT COALESCE(MAX(seq), 0) AS max_seq FROM audit_log WHERE organization_id = ?")
        .bind(organization_id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get("max_seq")?)
}

pub async fn count_entries(conn: &mut SqliteConnection, organization_id: Uuid) -> CoreResult<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM audit_log WHERE organization_id = ?")
        .bind(organization_id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get("n")?)
}

/// Hash of the entry at an exact sequence position, used to seed window
/// verification.
pub async fn hash_at_seq(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    seq: i64,
) -> CoreResult<Option<String>> {
    let row = sqlx::query("SELECT hash FROM audit_log WHERE organization_id = ? AND seq = ?")
        .bind(organization_id.to_string())
        .bind(seq)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| r.try_get("hash").map_err(CoreError::from))
        .transpose()
}

/// Ordered, paginated read access for export and reporting collaborators.
pub async fn list_entries(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    limit: i64,
    offset: i64,
) -> CoreResult<Vec<AuditEntry>> {
    let limit = limit.clamp(1, 1000);
    let offset = offset.max(0);

    let rows = sqlx::query(
        "SELECT * FROM audit_log WHERE organization_id = ? ORDER BY seq ASC LIMIT ? OFFSET ?",
    )
    .bind(organization_id.to_string())
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(AuditEntry::from_row).collect()
}

/// All entries from `from_seq` onward, ordered ascending.
pub async fn entries_from_seq(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    from_seq: i64,
) -> CoreResult<Vec<AuditEntry>> {
    let rows = sqlx::query(
        "SELECT * FROM audit_log WHERE organization_id = ? AND seq >= ? ORDER BY seq ASC",
    )
    .bind(organization_id.to_string())
    .bind(from_seq)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(AuditEntry::from_row).collect()
}
