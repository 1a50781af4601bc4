//! Governance policy configuration
//!
//! Per-organization policy flags (four-eyes gates, SLA, retention) and the
//! governed module-config store with its audited rollback path. Policy
//! mutations append to the ledger inside the same transaction; the rollback
//! path reuses the generic four-eyes primitive when the policy flag gates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use crate::approvals::{self, FourEyesDecision};
use crate::audit::canonical::{canonical_timestamp, AuditPayload};
use crate::audit::entry::{parse_timestamp, NewAuditEntry};
use crate::audit::ledger::{append_entry, now_utc};
use crate::config::Environment;
use crate::context::RequestContext;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub organization_id: Uuid,
    pub require_4eyes_on_hire: bool,
    pub require_4eyes_on_config_rollback: bool,
    pub stage_aging_sla_days: i64,
    pub candidate_retention_days: Option<i64>,
    pub audit_retention_days: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PolicyConfig {
    fn defaults(organization_id: Uuid) -> Self {
        let now = now_utc();
        Self {
            organization_id,
            require_4eyes_on_hire: false,
            require_4eyes_on_config_rollback: false,
            stage_aging_sla_days: 7,
            candidate_retention_days: None,
            audit_retention_days: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn from_row(row: &SqliteRow) -> CoreResult<Self> {
        let organization_id: String = row.try_get("organization_id")?;
        let hire: i64 = row.try_get("require_4eyes_on_hire")?;
        let rollback: i64 = row.try_get("require_4eyes_on_config_rollback")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(Self {
            organization_id: crate::audit::entry::parse_uuid(&organization_id)?,
            require_4eyes_on_hire: hire != 0,
            require_4eyes_on_config_rollback: rollback != 0,
            stage_aging_sla_days: row.try_get("stage_aging_sla_days")?,
            candidate_retention_days: row.try_get("candidate_retention_days")?,
            audit_retention_days: row.try_get("audit_retention_days")?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }

    fn snapshot(&self) -> Value {
        json!({
            "organization_id": self.organization_id.to_string(),
            "require_4eyes_on_hire": self.require_4eyes_on_hire,
            "require_4eyes_on_config_rollback": self.require_4eyes_on_config_rollback,
            "stage_aging_sla_days": self.stage_aging_sla_days,
            "candidate_retention_days": self.candidate_retention_days,
            "audit_retention_days": self.audit_retention_days,
        })
    }
}

/// Partial update; absent fields stay untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyPatch {
    pub require_4eyes_on_hire: Option<bool>,
    pub require_4eyes_on_config_rollback: Option<bool>,
    pub stage_aging_sla_days: Option<i64>,
    pub candidate_retention_days: Option<Option<i64>>,
    pub audit_retention_days: Option<Option<i64>>,
}

/// Read the organization's policy, creating defaults on first read.
pub async fn get_policy(
    conn: &mut SqliteConnection,
    ctx: &RequestContext,
) -> CoreResult<PolicyConfig> {
    let row = sqlx::query("SELECT * FROM policy_config WHERE organization_id = ?")
        .bind(ctx.organization_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    if let Some(row) = row {
        return PolicyConfig::from_row(&row);
    }

    let policy = PolicyConfig::defaults(ctx.organization_id);
    insert_policy(conn, &policy).await?;
    Ok(policy)
}

async fn insert_policy(conn: &mut SqliteConnection, policy: &PolicyConfig) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO policy_config
            (organization_id, require_4eyes_on_hire, require_4eyes_on_config_rollback,
             stage_aging_sla_days, candidate_retention_days, audit_retention_days,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(policy.organization_id.to_string())
    .bind(policy.require_4eyes_on_hire as i64)
    .bind(policy.require_4eyes_on_config_rollback as i64)
    .bind(policy.stage_aging_sla_days)
    .bind(policy.candidate_retention_days)
    .bind(policy.audit_retention_days)
    .bind(canonical_timestamp(&policy.created_at))
    .bind(canonical_timestamp(&policy.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Apply a policy patch and append a `policy_updated` ledger entry carrying
/// the full post-update snapshot, atomically.
pub async fn update_policy(
    db: &Database,
    environment: Environment,
    ctx: &RequestContext,
    patch: PolicyPatch,
) -> CoreResult<PolicyConfig> {
    let _org_guard = db.org_lock(ctx.organization_id).await;
    let mut tx = db.pool().begin().await?;

    let mut policy = get_policy(&mut tx, ctx).await?;

    if let Some(v) = patch.require_4eyes_on_hire {
        policy.require_4eyes_on_hire = v;
    }
    if let Some(v) = patch.require_4eyes_on_config_rollback {
        policy.require_4eyes_on_config_rollback = v;
    }
    if let Some(v) = patch.stage_aging_sla_days {
        policy.stage_aging_sla_days = v;
    }
    if let Some(v) = patch.candidate_retention_days {
        policy.candidate_retention_days = v;
    }
    if let Some(v) = patch.audit_retention_days {
        policy.audit_retention_days = v;
    }
    policy.updated_at = now_utc();

    sqlx::query(
        r#"
        UPDATE policy_config
        SET require_4eyes_on_hire = ?, require_4eyes_on_config_rollback = ?,
            stage_aging_sla_days = ?, candidate_retention_days = ?,
            audit_retention_days = ?, updated_at = ?
        WHERE organization_id = ?
        "#,
    )
    .bind(policy.require_4eyes_on_hire as i64)
    .bind(policy.require_4eyes_on_config_rollback as i64)
    .bind(policy.stage_aging_sla_days)
    .bind(policy.candidate_retention_days)
    .bind(policy.audit_retention_days)
    .bind(canonical_timestamp(&policy.updated_at))
    .bind(policy.organization_id.to_string())
    .execute(&mut *tx)
    .await?;

    append_entry(
        &mut tx,
        ctx,
        environment,
        NewAuditEntry::new(
            "policy",
            ctx.organization_id.to_string(),
            "policy_updated",
            AuditPayload::structured(policy.snapshot()),
        ),
    )
    .await?;

    tx.commit().await?;

    info!(
        action = "policy_updated",
        organization_id = %ctx.organization_id,
        actor_id = %ctx.actor_str(),
        correlation_id = %ctx.correlation_id,
        "Policy updated"
    );

    Ok(policy)
}

fn module_entity_id(organization_id: Uuid, module: &str) -> String {
    format!("{}:{}", organization_id, module)
}

/// Store a module's config and append a `config_updated` ledger entry. The
/// audited history doubles as the version store for rollback.
pub async fn upsert_module_config(
    db: &Database,
    environment: Environment,
    ctx: &RequestContext,
    module: &str,
    config: Value,
) -> CoreResult<()> {
    let module = module.trim();
    if module.is_empty() {
        return Err(CoreError::ConfigError("module is required".to_string()));
    }

    let _org_guard = db.org_lock(ctx.organization_id).await;
    let mut tx = db.pool().begin().await?;

    write_module_config(&mut tx, ctx.organization_id, module, &config).await?;

    append_entry(
        &mut tx,
        ctx,
        environment,
        NewAuditEntry::new(
            "module_config",
            module_entity_id(ctx.organization_id, module),
            "config_updated",
            AuditPayload::structured(json!({ "module": module, "config": config })),
        ),
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

async fn write_module_config(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    module: &str,
    config: &Value,
) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO module_config (organization_id, module, config, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (organization_id, module)
        DO UPDATE SET config = excluded.config, updated_at = excluded.updated_at
        "#,
    )
    .bind(organization_id.to_string())
    .bind(module)
    .bind(config.to_string())
    .bind(canonical_timestamp(&now_utc()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_module_config(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    module: &str,
) -> CoreResult<Option<Value>> {
    let row = sqlx::query("SELECT config FROM module_config WHERE organization_id = ? AND module = ?")
        .bind(organization_id.to_string())
        .bind(module)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        None => Ok(None),
        Some(row) => {
            let text: String = row.try_get("config")?;
            Ok(Some(serde_json::from_str(&text)?))
        }
    }
}

/// Result of a rollback request under the four-eyes gate.
#[derive(Debug, Clone)]
pub enum RollbackOutcome {
    Applied(Value),
    Pending { pending_id: Uuid },
}

/// Roll a module's config back to its `version`-th audited `config_updated`
/// entry (1-based). Gated by `require_4eyes_on_config_rollback`; the gate
/// reuses the same pending-approval protocol as stage transitions, with
/// target `rollback:{module}:{version}`.
pub async fn rollback_module_config(
    db: &Database,
    environment: Environment,
    ctx: &RequestContext,
    module: &str,
    version: i64,
) -> CoreResult<RollbackOutcome> {
    let module = module.trim();
    if module.is_empty() {
        return Err(CoreError::ConfigError("module is required".to_string()));
    }
    if version < 1 {
        return Err(CoreError::ConfigVersionNotFound(version));
    }

    let _org_guard = db.org_lock(ctx.organization_id).await;
    let mut tx = db.pool().begin().await?;

    let entity_id = module_entity_id(ctx.organization_id, module);
    let snapshot = config_at_version(&mut tx, ctx.organization_id, &entity_id, version)
        .await?
        .ok_or(CoreError::ConfigVersionNotFound(version))?;

    let policy = get_policy(&mut tx, ctx).await?;

    if !policy.require_4eyes_on_config_rollback {
        apply_rollback(&mut tx, ctx, environment, module, &snapshot, version, None).await?;
        tx.commit().await?;
        return Ok(RollbackOutcome::Applied(snapshot));
    }

    let actor_id = ctx.actor_id.ok_or_else(|| {
        CoreError::ConfigError("gated rollbacks require a resolved actor".to_string())
    })?;

    let target = format!("rollback:{}:{}", module, version);
    let existing = approvals::get(&mut tx, ctx.organization_id, &entity_id, &target).await?;

    match approvals::decide(existing, actor_id)? {
        FourEyesDecision::Initiate => {
            let pending = approvals::try_create(&mut tx, ctx, &entity_id, &target).await?;

            append_entry(
                &mut tx,
                ctx,
                environment,
                NewAuditEntry::new(
                    "module_config",
                    entity_id.clone(),
                    "config_rollback_pending",
                    AuditPayload::structured(json!({
                        "module": module,
                        "rolled_back_to_version": version,
                        "pending_id": pending.id.to_string(),
                    })),
                ),
            )
            .await?;

            tx.commit().await?;

            info!(
                action = "config_rollback_pending",
                organization_id = %ctx.organization_id,
                module = %module,
                pending_id = %pending.id,
                correlation_id = %ctx.correlation_id,
                "Config rollback awaiting second approval"
            );

            Ok(RollbackOutcome::Pending {
                pending_id: pending.id,
            })
        }
        FourEyesDecision::Approve(pending) => {
            apply_rollback(
                &mut tx,
                ctx,
                environment,
                module,
                &snapshot,
                version,
                Some(&pending),
            )
            .await?;
            approvals::delete(&mut tx, &pending).await?;
            tx.commit().await?;
            Ok(RollbackOutcome::Applied(snapshot))
        }
    }
}

async fn apply_rollback(
    conn: &mut SqliteConnection,
    ctx: &RequestContext,
    environment: Environment,
    module: &str,
    snapshot: &Value,
    version: i64,
    pending: Option<&approvals::PendingApproval>,
) -> CoreResult<()> {
    write_module_config(conn, ctx.organization_id, module, snapshot).await?;

    let entity_id = module_entity_id(ctx.organization_id, module);
    let (action, payload) = match pending {
        None => (
            "config_rollback",
            json!({ "module": module, "rolled_back_to_version": version }),
        ),
        Some(pending) => (
            "config_rollback_approved",
            json!({
                "module": module,
                "rolled_back_to_version": version,
                "pending_id": pending.id.to_string(),
                "initiated_by_user_id": pending.requested_by.to_string(),
                "approved_by_user_id": ctx.actor_str(),
            }),
        ),
    };

    append_entry(
        conn,
        ctx,
        environment,
        NewAuditEntry::new(
            "module_config",
            entity_id,
            action,
            AuditPayload::structured(payload),
        ),
    )
    .await?;

    Ok(())
}

/// The `version`-th (1-based, seq order) audited config snapshot for a
/// module, read back out of the ledger.
async fn config_at_version(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    entity_id: &str,
    version: i64,
) -> CoreResult<Option<Value>> {
    let row = sqlx::query(
        r#"
        SELECT payload FROM audit_log
        WHERE organization_id = ? AND entity_type = 'module_config'
          AND action = 'config_updated' AND entity_id = ?
        ORDER BY seq ASC
        LIMIT 1 OFFSET ?
        "#,
    )
    .bind(organization_id.to_string())
    .bind(entity_id)
    .bind(version - 1)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let payload: Option<String> = row.try_get("payload")?;
    let Some(payload) = payload else {
        return Ok(None);
    };

    let value: Value = serde_json::from_str(&payload)?;
    Ok(value.get("config").cloned())
}
