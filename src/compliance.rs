//! Compliance export
//!
//! Read-only bundle for auditors: a bounded slice of the organization's
//! ledger, a verification result over exactly that slice, and a snapshot of
//! outstanding approvals. When the chain exceeds the export cap the slice is
//! truncated to the most recent entries and the truncation is recorded
//! alongside the verification result.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::approvals::{approval_summary, list_pending, ApprovalSummary, PendingApprovalView};
use crate::audit::entry::AuditEntry;
use crate::audit::ledger::{count_entries, entries_from_seq, max_seq};
use crate::audit::verify::{verify_rows, VerificationResult};
use crate::context::RequestContext;
use crate::database::Database;
use crate::error::CoreResult;

pub const MAX_AUDIT_ENTRIES: i64 = 200_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub verification: VerificationResult,
    pub export_truncated: bool,
    pub exported_count: i64,
    pub total_count: i64,
    pub audit_chain: Vec<AuditEntry>,
    pub pending_approvals: Vec<PendingApprovalView>,
    pub approvals: ApprovalSummary,
}

pub async fn generate_compliance_report(
    db: &Database,
    ctx: &RequestContext,
) -> CoreResult<ComplianceReport> {
    let mut conn = db.pool().acquire().await?;

    let total_count = count_entries(&mut conn, ctx.organization_id).await?;
    let chain_max = max_seq(&mut conn, ctx.organization_id).await?;

    let export_truncated = total_count > MAX_AUDIT_ENTRIES;
    let start_seq = if export_truncated && chain_max > 0 {
        (chain_max - MAX_AUDIT_ENTRIES + 1).max(1)
    } else {
        1
    };

    let audit_chain = entries_from_seq(&mut conn, ctx.organization_id, start_seq).await?;
    let verification = verify_rows(&mut conn, ctx, &audit_chain).await?;

    let pending_approvals = list_pending(&mut conn, ctx, 200, 0).await?;
    let approvals = approval_summary(&mut conn, ctx).await?;

    info!(
        organization_id = %ctx.organization_id,
        exported = audit_chain.len(),
        truncated = export_truncated,
        ok = verification.ok,
        correlation_id = %ctx.correlation_id,
        "Compliance report generated"
    );

    Ok(ComplianceReport {
        verification,
        export_truncated,
        exported_count: audit_chain.len() as i64,
        total_count,
        audit_chain,
        pending_approvals,
        approvals,
    })
}
