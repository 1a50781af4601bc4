//! Workflow policy and application subjects
//!
//! Applications move through workflow-defined stages. Transitions are
//! read-only policy rows owned by a workflow-editor collaborator; each
//! legal `(from, to)` pair optionally requires two-person approval.

pub mod engine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::audit::canonical::canonical_timestamp;
use crate::audit::entry::{parse_timestamp, parse_uuid};
use crate::error::{CoreError, CoreResult};

pub use engine::{MoveOutcome, StageTransitionEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Active,
    Closed,
}

impl ApplicationStatus {
    fn parse(value: &str) -> CoreResult<Self> {
        match value {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(CoreError::Serialization(format!(
                "Unknown application status: {}",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

/// Subject of stage transitions. Closed applications are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub workflow_id: Uuid,
    pub stage: String,
    pub status: ApplicationStatus,
    pub stage_entered_at: DateTime<Utc>,
}

impl Application {
    fn from_row(row: &SqliteRow) -> CoreResult<Self> {
        let id: String = row.try_get("id")?;
        let organization_id: String = row.try_get("organization_id")?;
        let workflow_id: String = row.try_get("workflow_id")?;
        let status: String = row.try_get("status")?;
        let stage_entered_at: String = row.try_get("stage_entered_at")?;
        Ok(Self {
            id: parse_uuid(&id)?,
            organization_id: parse_uuid(&organization_id)?,
            workflow_id: parse_uuid(&workflow_id)?,
            stage: row.try_get("stage")?,
            status: ApplicationStatus::parse(&status)?,
            stage_entered_at: parse_timestamp(&stage_entered_at)?,
        })
    }
}

/// One legal `(from, to)` pair in a workflow's policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowedTransition {
    pub to_stage: String,
    pub requires_approval: bool,
}

pub async fn load_application(
    conn: &mut SqliteConnection,
    application_id: Uuid,
) -> CoreResult<Option<Application>> {
    let row = sqlx::query("SELECT * FROM application WHERE id = ?")
        .bind(application_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(Application::from_row).transpose()
}

/// Persist a stage mutation within the caller's transaction.
pub async fn save_stage(conn: &mut SqliteConnection, app: &Application) -> CoreResult<()> {
    sqlx::query("UPDATE application SET stage = ?, stage_entered_at = ? WHERE id = ?")
        .bind(&app.stage)
        .bind(canonical_timestamp(&app.stage_entered_at))
        .bind(app.id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Allowed target stages for `from_stage` under one workflow's policy.
pub async fn allowed_transitions(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    workflow_id: Uuid,
    from_stage: &str,
) -> CoreResult<Vec<AllowedTransition>> {
    let rows = sqlx::query(
        r#"
        SELECT to_stage, requires_approval FROM workflow_transition
        WHERE organization_id = ? AND workflow_id = ? AND from_stage = ?
        ORDER BY to_stage ASC
        "#,
    )
    .bind(organization_id.to_string())
    .bind(workflow_id.to_string())
    .bind(from_stage)
    .fetch_all(&mut *conn)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let requires: i64 = row.try_get("requires_approval")?;
        out.push(AllowedTransition {
            to_stage: row.try_get("to_stage")?,
            requires_approval: requires != 0,
        });
    }
    Ok(out)
}
