//! Stage Transition Engine
//!
//! Validates workflow transitions, runs the optional four-eyes protocol,
//! and mutates the application atomically with the ledger append. Any error
//! drops the transaction whole: no partial ledger entry, no partial subject
//! mutation, no orphaned pending record.

use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::approvals::{self, FourEyesDecision};
use crate::audit::canonical::AuditPayload;
use crate::audit::entry::NewAuditEntry;
use crate::audit::ledger::{append_entry, now_utc};
use crate::config::Environment;
use crate::context::RequestContext;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::sinks::{dispatch, DomainEvent, EventSink, NullSink};
use crate::workflow::{
    allowed_transitions, load_application, save_stage, Application, ApplicationStatus,
};

/// Result of a `move_stage` call. Pending is a first-class outcome, not an
/// error: the caller surfaces it as "accepted, awaiting second approval".
#[derive(Debug, Clone)]
pub enum MoveOutcome {
    Applied(Application),
    Pending { pending_id: Uuid },
}

pub struct StageTransitionEngine {
    db: Arc<Database>,
    environment: Environment,
    sink: Arc<dyn EventSink>,
}

impl StageTransitionEngine {
    pub fn new(db: Arc<Database>, environment: Environment) -> Self {
        Self {
            db,
            environment,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Move an application to `target_stage` under its workflow's policy.
    pub async fn move_stage(
        &self,
        ctx: &RequestContext,
        application_id: Uuid,
        target_stage: &str,
    ) -> CoreResult<MoveOutcome> {
        // Serialize ledger appends for this organization across the whole
        // read/mutate/append sequence.
        let _org_guard = self.db.org_lock(ctx.organization_id).await;
        let mut tx = self.db.pool().begin().await?;

        let app = load_application(&mut tx, application_id)
            .await?
            .ok_or(CoreError::SubjectNotFound)?;

        if app.organization_id != ctx.organization_id {
            return Err(CoreError::CrossTenantAccess);
        }
        if app.status == ApplicationStatus::Closed {
            return Err(CoreError::AlreadyClosed);
        }

        let from_stage = app.stage.clone();
        let allowed = allowed_transitions(
            &mut tx,
            ctx.organization_id,
            app.workflow_id,
            &from_stage,
        )
        .await?;

        let Some(transition) = allowed.iter().find(|t| t.to_stage == target_stage) else {
            return Err(CoreError::InvalidTransition {
                from: from_stage,
                to: target_stage.to_string(),
                allowed: allowed.iter().map(|t| t.to_stage.clone()).collect(),
            });
        };
        let requires_approval = transition.requires_approval;

        if !requires_approval {
            let app = self
                .apply_direct(&mut *tx, ctx, app, target_stage)
                .await?;
            tx.commit().await?;
            self.notify_stage_changed(ctx, &app, &from_stage, target_stage);
            return Ok(MoveOutcome::Applied(app));
        }

        // Four-eyes protocol: first actor requests, a distinct second actor
        // approves.
        let actor_id = ctx.actor_id.ok_or_else(|| {
            CoreError::ConfigError("gated transitions require a resolved actor".to_string())
        })?;

        let existing = approvals::get(
            &mut tx,
            ctx.organization_id,
            &app.id.to_string(),
            target_stage,
        )
        .await?;

        match approvals::decide(existing, actor_id)? {
            FourEyesDecision::Initiate => {
                let pending = approvals::try_create(
                    &mut tx,
                    ctx,
                    &app.id.to_string(),
                    target_stage,
                )
                .await?;

                info!(
                    action = "stage_transition_pending",
                    organization_id = %ctx.organization_id,
                    actor_id = %actor_id,
                    entity_id = %app.id,
                    from_stage = %from_stage,
                    to_stage = %target_stage,
                    pending_id = %pending.id,
                    correlation_id = %ctx.correlation_id,
                    "Stage transition awaiting second approval"
                );

                append_entry(
                    &mut tx,
                    ctx,
                    self.environment,
                    NewAuditEntry::new(
                        "application",
                        app.id.to_string(),
                        "stage_transition_pending",
                        AuditPayload::structured(json!({
                            "workflow_id": app.workflow_id.to_string(),
                            "from_stage": from_stage,
                            "to_stage": target_stage,
                            "pending_id": pending.id.to_string(),
                        })),
                    ),
                )
                .await?;

                tx.commit().await?;

                dispatch(
                    self.sink.as_ref(),
                    &DomainEvent {
                        event_type: "application.stage_transition_pending".to_string(),
                        organization_id: ctx.organization_id,
                        entity_type: "application".to_string(),
                        entity_id: app.id.to_string(),
                        payload: json!({
                            "from_stage": app.stage,
                            "to_stage": target_stage,
                            "pending_id": pending.id.to_string(),
                        }),
                    },
                );

                Ok(MoveOutcome::Pending {
                    pending_id: pending.id,
                })
            }
            FourEyesDecision::Approve(pending) => {
                info!(
                    action = "stage_transition_approved",
                    organization_id = %ctx.organization_id,
                    actor_id = %actor_id,
                    entity_id = %app.id,
                    from_stage = %from_stage,
                    to_stage = %target_stage,
                    pending_id = %pending.id,
                    correlation_id = %ctx.correlation_id,
                    "Stage transition approved by second actor"
                );

                let mut app = app;
                app.stage = target_stage.to_string();
                app.stage_entered_at = now_utc();
                save_stage(&mut tx, &app).await?;

                append_entry(
                    &mut tx,
                    ctx,
                    self.environment,
                    NewAuditEntry::new(
                        "application",
                        app.id.to_string(),
                        "stage_transition_approved",
                        AuditPayload::structured(json!({
                            "workflow_id": app.workflow_id.to_string(),
                            "from_stage": from_stage,
                            "to_stage": target_stage,
                            "pending_id": pending.id.to_string(),
                            "initiated_by_user_id": pending.requested_by.to_string(),
                            "approved_by_user_id": actor_id.to_string(),
                        })),
                    ),
                )
                .await?;

                approvals::delete(&mut tx, &pending).await?;
                tx.commit().await?;
                self.notify_stage_changed(ctx, &app, &from_stage, target_stage);

                Ok(MoveOutcome::Applied(app))
            }
        }
    }

    async fn apply_direct(
        &self,
        conn: &mut sqlx::SqliteConnection,
        ctx: &RequestContext,
        mut app: Application,
        target_stage: &str,
    ) -> CoreResult<Application> {
        let from_stage = app.stage.clone();

        info!(
            action = "application_stage_moved",
            organization_id = %ctx.organization_id,
            actor_id = %ctx.actor_str(),
            entity_id = %app.id,
            from_stage = %from_stage,
            to_stage = %target_stage,
            correlation_id = %ctx.correlation_id,
            "Application stage moved"
        );

        app.stage = target_stage.to_string();
        app.stage_entered_at = now_utc();
        save_stage(conn, &app).await?;

        // Historical compact wire format; reporting collaborators parse it.
        append_entry(
            conn,
            ctx,
            self.environment,
            NewAuditEntry::new(
                "application",
                app.id.to_string(),
                "stage_changed",
                AuditPayload::opaque(format!("{}->{}", from_stage, target_stage)),
            ),
        )
        .await?;

        Ok(app)
    }

    fn notify_stage_changed(
        &self,
        ctx: &RequestContext,
        app: &Application,
        from_stage: &str,
        to_stage: &str,
    ) {
        dispatch(
            self.sink.as_ref(),
            &DomainEvent {
                event_type: "application.stage_changed".to_string(),
                organization_id: ctx.organization_id,
                entity_type: "application".to_string(),
                entity_id: app.id.to_string(),
                payload: json!({
                    "workflow_id": app.workflow_id.to_string(),
                    "from_stage": from_stage,
                    "to_stage": to_stage,
                }),
            },
        );
    }
}
