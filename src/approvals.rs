//! Pending approvals (two-person control)
//!
//! Generic four-eyes primitive: at most one outstanding request per
//! `(organization, subject, target)`, created by the first actor and
//! resolved only by a second, distinct actor. The unique constraint on the
//! key is the backstop against concurrent duplicate creation; callers wrap
//! the check-then-act sequence in a transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use crate::audit::canonical::canonical_timestamp;
use crate::audit::entry::{parse_timestamp, parse_uuid};
use crate::audit::ledger::now_utc;
use crate::context::RequestContext;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub subject_id: String,
    /// What the approval unblocks, e.g. a target stage name or a
    /// `rollback:{module}:{version}` tag.
    pub target: String,
    pub requested_by: Uuid,
    pub requested_at: DateTime<Utc>,
}

impl PendingApproval {
    fn from_row(row: &SqliteRow) -> CoreResult<Self> {
        let id: String = row.try_get("id")?;
        let organization_id: String = row.try_get("organization_id")?;
        let requested_by: String = row.try_get("requested_by")?;
        let requested_at: String = row.try_get("requested_at")?;
        Ok(Self {
            id: parse_uuid(&id)?,
            organization_id: parse_uuid(&organization_id)?,
            subject_id: row.try_get("subject_id")?,
            target: row.try_get("target")?,
            requested_by: parse_uuid(&requested_by)?,
            requested_at: parse_timestamp(&requested_at)?,
        })
    }
}

/// Outcome of presenting an actor to the four-eyes protocol.
#[derive(Debug, Clone)]
pub enum FourEyesDecision {
    /// No outstanding request: this actor initiates one.
    Initiate,
    /// A different actor requested earlier: this actor approves.
    Approve(PendingApproval),
}

/// Resolve the protocol step for `actor` given the current pending state.
/// The requester may never approve their own request.
pub fn decide(existing: Option<PendingApproval>, actor: Uuid) -> CoreResult<FourEyesDecision> {
    match existing {
        None => Ok(FourEyesDecision::Initiate),
        Some(pending) if pending.requested_by == actor => Err(CoreError::SelfApprovalForbidden),
        Some(pending) => Ok(FourEyesDecision::Approve(pending)),
    }
}

/// Create a pending approval iff none exists for the key. A concurrent
/// duplicate insert surfaces as `PendingConflict` via the unique constraint.
pub async fn try_create(
    conn: &mut SqliteConnection,
    ctx: &RequestContext,
    subject_id: &str,
    target: &str,
) -> CoreResult<PendingApproval> {
    let requested_by = ctx.actor_id.ok_or_else(|| {
        CoreError::ConfigError("pending approvals require a resolved actor".to_string())
    })?;

    let pending = PendingApproval {
        id: Uuid::new_v4(),
        organization_id: ctx.organization_id,
        subject_id: subject_id.to_string(),
        target: target.to_string(),
        requested_by,
        requested_at: now_utc(),
    };

    let result = sqlx::query(
        r#"
        INSERT INTO pending_approval
            (id, organization_id, subject_id, target, requested_by, requested_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(pending.id.to_string())
    .bind(pending.organization_id.to_string())
    .bind(&pending.subject_id)
    .bind(&pending.target)
    .bind(pending.requested_by.to_string())
    .bind(canonical_timestamp(&pending.requested_at))
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(pending),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(CoreError::PendingConflict)
        }
        Err(e) => Err(e.into()),
    }
}

/// Fetch the outstanding request for the key, if any. Callers run this
/// inside the transaction that will act on the result, so near-simultaneous
/// approve attempts cannot both succeed.
pub async fn get(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    subject_id: &str,
    target: &str,
) -> CoreResult<Option<PendingApproval>> {
    let row = sqlx::query(
        "SELECT * FROM pending_approval WHERE organization_id = ? AND subject_id = ? AND target = ?",
    )
    .bind(organization_id.to_string())
    .bind(subject_id)
    .bind(target)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(PendingApproval::from_row).transpose()
}

/// Remove the record; called the instant a second distinct actor approves.
pub async fn delete(conn: &mut SqliteConnection, pending: &PendingApproval) -> CoreResult<()> {
    sqlx::query("DELETE FROM pending_approval WHERE id = ?")
        .bind(pending.id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Pending request with its age, for dashboards and compliance snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApprovalView {
    #[serde(flatten)]
    pub pending: PendingApproval,
    pub age_seconds: i64,
}

pub async fn list_pending(
    conn: &mut SqliteConnection,
    ctx: &RequestContext,
    limit: i64,
    offset: i64,
) -> CoreResult<Vec<PendingApprovalView>> {
    let limit = limit.clamp(1, 200);
    let offset = offset.max(0);
    let now = now_utc();

    let rows = sqlx::query(
        r#"
        SELECT * FROM pending_approval
        WHERE organization_id = ?
        ORDER BY requested_at DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(ctx.organization_id.to_string())
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        let pending = PendingApproval::from_row(row)?;
        let age_seconds = (now - pending.requested_at).num_seconds().max(0);
        items.push(PendingApprovalView {
            pending,
            age_seconds,
        });
    }

    info!(
        organization_id = %ctx.organization_id,
        count = items.len(),
        correlation_id = %ctx.correlation_id,
        "Listed pending approvals"
    );

    Ok(items)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSummary {
    pub total_pending: i64,
    pub avg_pending_age_seconds: f64,
    pub oldest_pending_age_seconds: i64,
}

pub async fn approval_summary(
    conn: &mut SqliteConnection,
    ctx: &RequestContext,
) -> CoreResult<ApprovalSummary> {
    let rows = sqlx::query("SELECT requested_at FROM pending_approval WHERE organization_id = ?")
        .bind(ctx.organization_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    let now = now_utc();
    let mut total: i64 = 0;
    let mut total_age: f64 = 0.0;
    let mut oldest: i64 = 0;

    for row in &rows {
        let requested_at: String = row.try_get("requested_at")?;
        let requested_at = parse_timestamp(&requested_at)?;
        let age = (now - requested_at).num_seconds().max(0);
        total += 1;
        total_age += age as f64;
        oldest = oldest.max(age);
    }

    let avg = if total > 0 {
        total_age / total as f64
    } else {
        0.0
    };

    Ok(ApprovalSummary {
        total_pending: total,
        avg_pending_age_seconds: avg,
        oldest_pending_age_seconds: oldest,
    })
}
