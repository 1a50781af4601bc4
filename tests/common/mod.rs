//! Shared fixtures for governance-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use uuid::Uuid;

use governance_core::Database;

pub struct TestEnv {
    pub db: Arc<Database>,
    pub org: Uuid,
    pub workflow: Uuid,
}

/// In-memory database with one organization and a hiring workflow:
/// applied -> screening -> interview -> offer -> hired, where the last two
/// hops require two-person approval.
pub async fn setup() -> TestEnv {
    let db = Database::new_in_memory().await.expect("in-memory database");
    db.run_migrations().await.expect("schema");

    let org = Uuid::new_v4();
    insert_organization(&db, org, "Acme Recruiting").await;

    let workflow = Uuid::new_v4();
    for (from, to, requires_approval) in [
        ("applied", "screening", false),
        ("screening", "interview", false),
        ("screening", "rejected", false),
        ("interview", "offer", true),
        ("offer", "hired", true),
    ] {
        insert_transition(&db, org, workflow, from, to, requires_approval).await;
    }

    TestEnv {
        db: Arc::new(db),
        org,
        workflow,
    }
}

pub async fn insert_organization(db: &Database, id: Uuid, name: &str) {
    sqlx::query("INSERT INTO organization (id, name) VALUES (?, ?)")
        .bind(id.to_string())
        .bind(name)
        .execute(db.pool())
        .await
        .expect("insert organization");
}

pub async fn insert_transition(
    db: &Database,
    org: Uuid,
    workflow: Uuid,
    from_stage: &str,
    to_stage: &str,
    requires_approval: bool,
) {
    sqlx::query(
        r#"
        INSERT INTO workflow_transition
            (id, organization_id, workflow_id, from_stage, to_stage, requires_approval)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(org.to_string())
    .bind(workflow.to_string())
    .bind(from_stage)
    .bind(to_stage)
    .bind(requires_approval as i64)
    .execute(db.pool())
    .await
    .expect("insert transition");
}

pub async fn seed_application(env: &TestEnv, stage: &str, status: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO application
            (id, organization_id, workflow_id, stage, status, stage_entered_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(env.org.to_string())
    .bind(env.workflow.to_string())
    .bind(stage)
    .bind(status)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(env.db.pool())
    .await
    .expect("insert application");
    id
}

pub async fn audit_count(db: &Database, org: Uuid) -> i64 {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log WHERE organization_id = ?")
        .bind(org.to_string())
        .fetch_one(db.pool())
        .await
        .expect("count audit rows");
    row.0
}

pub async fn pending_count(db: &Database, org: Uuid) -> i64 {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pending_approval WHERE organization_id = ?")
            .bind(org.to_string())
            .fetch_one(db.pool())
            .await
            .expect("count pending rows");
    row.0
}

pub async fn last_audit_row(db: &Database, org: Uuid) -> (String, Option<String>, i64) {
    sqlx::query_as(
        "SELECT action, payload, seq FROM audit_log WHERE organization_id = ? ORDER BY seq DESC LIMIT 1",
    )
    .bind(org.to_string())
    .fetch_one(db.pool())
    .await
    .expect("last audit row")
}
