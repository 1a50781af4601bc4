//! Audit Chain Verification
//!
//! Advisory integrity checking over a window of the per-organization chain.
//! Never mutates state; tampering is only ever a verification result, never
//! an append-time failure.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;
use uuid::Uuid;

use crate::audit::canonical::{canonical_bytes, compute_hash};
use crate::audit::entry::AuditEntry;
use crate::audit::ledger::{entries_from_seq, hash_at_seq, max_seq};
use crate::context::RequestContext;
use crate::error::CoreResult;

pub const DEFAULT_VERIFY_LIMIT: i64 = 1000;
pub const MAX_VERIFY_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NonContiguousSequence,
    PrevHashMismatch,
    HashMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationError {
    pub seq: i64,
    pub audit_log_id: Uuid,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub ok: bool,
    pub checked: i64,
    pub first_seq: Option<i64>,
    pub last_seq: Option<i64>,
    pub error: Option<VerificationError>,
}

impl VerificationResult {
    fn trivially_ok() -> Self {
        Self {
            ok: true,
            checked: 0,
            first_seq: None,
            last_seq: None,
            error: None,
        }
    }
}

/// Verify the most recent `limit` entries of the organization's chain.
/// `limit` defaults to 1000 and is clamped to [1, 10_000].
pub async fn verify_chain(
    conn: &mut SqliteConnection,
    ctx: &RequestContext,
    limit: Option<i64>,
) -> CoreResult<VerificationResult> {
    let limit = limit.unwrap_or(DEFAULT_VERIFY_LIMIT).clamp(1, MAX_VERIFY_LIMIT);

    let chain_max = max_seq(conn, ctx.organization_id).await?;
    if chain_max == 0 {
        return Ok(VerificationResult::trivially_ok());
    }

    let start_seq = (chain_max - limit + 1).max(1);
    let seed = seed_prev_hash(conn, ctx.organization_id, start_seq).await?;
    let rows = entries_from_seq(conn, ctx.organization_id, start_seq).await?;

    let result = walk(&rows, start_seq, seed);
    info!(
        organization_id = %ctx.organization_id,
        checked = result.checked,
        ok = result.ok,
        correlation_id = %ctx.correlation_id,
        "Audit chain verified"
    );
    Ok(result)
}

/// Verify an explicit, caller-supplied set of entries (e.g. a compliance
/// export slice). Rows are sorted by `seq` before walking.
pub async fn verify_rows(
    conn: &mut SqliteConnection,
    ctx: &RequestContext,
    rows: &[AuditEntry],
) -> CoreResult<VerificationResult> {
    if rows.is_empty() {
        return Ok(VerificationResult::trivially_ok());
    }

    let mut sorted: Vec<&AuditEntry> = rows.iter().collect();
    sorted.sort_by_key(|e| e.seq);

    let start_seq = sorted[0].seq;
    let seed = seed_prev_hash(conn, ctx.organization_id, start_seq).await?;

    let owned: Vec<AuditEntry> = sorted.into_iter().cloned().collect();
    Ok(walk(&owned, start_seq, seed))
}

async fn seed_prev_hash(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    start_seq: i64,
) -> CoreResult<Option<String>> {
    if start_seq <= 1 {
        return Ok(None);
    }
    hash_at_seq(conn, organization_id, start_seq - 1).await
}

fn walk(rows: &[AuditEntry], start_seq: i64, seed_prev: Option<String>) -> VerificationResult {
    let mut prev_hash = seed_prev;
    let mut expected_seq = start_seq;
    let mut checked: i64 = 0;

    for row in rows {
        let fail = |reason: FailureReason| VerificationResult {
            ok: false,
            checked,
            first_seq: Some(start_seq),
            last_seq: if checked > 0 {
                Some(expected_seq - 1)
            } else {
                None
            },
            error: Some(VerificationError {
                seq: row.seq,
                audit_log_id: row.id,
                reason,
            }),
        };

        if row.seq != expected_seq {
            return fail(FailureReason::NonContiguousSequence);
        }

        if row.prev_hash != prev_hash {
            return fail(FailureReason::PrevHashMismatch);
        }

        let canonical = canonical_bytes(row);
        let expected_hash = compute_hash(prev_hash.as_deref(), &canonical);
        if row.hash != expected_hash {
            return fail(FailureReason::HashMismatch);
        }

        prev_hash = Some(row.hash.clone());
        expected_seq += 1;
        checked += 1;
    }

    VerificationResult {
        ok: true,
        checked,
        first_seq: Some(start_seq),
        last_seq: rows.last().map(|r| r.seq),
        error: None,
    }
}
