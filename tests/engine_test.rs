//! Integration tests for the stage transition engine and the four-eyes
//! approval protocol.

mod common;

use uuid::Uuid;

use governance_core::approvals;
use governance_core::audit::verify_chain;
use governance_core::workflow::{MoveOutcome, StageTransitionEngine};
use governance_core::{CoreError, Environment, RequestContext};

fn engine(env: &common::TestEnv) -> StageTransitionEngine {
    StageTransitionEngine::new(env.db.clone(), Environment::Test)
}

#[tokio::test]
async fn test_direct_transition_mutates_and_audits() {
    let env = common::setup().await;
    let app_id = common::seed_application(&env, "applied", "active").await;
    let ctx = RequestContext::new(env.org, Uuid::new_v4());

    let outcome = engine(&env)
        .move_stage(&ctx, app_id, "screening")
        .await
        .unwrap();

    let app = match outcome {
        MoveOutcome::Applied(app) => app,
        other => panic!("expected applied outcome, got {:?}", other),
    };
    assert_eq!(app.stage, "screening");

    let (action, payload, seq) = common::last_audit_row(&env.db, env.org).await;
    assert_eq!(action, "stage_changed");
    // Historical compact payload form, not structured JSON.
    assert_eq!(payload.as_deref(), Some("applied->screening"));
    assert_eq!(seq, 1);
}

#[tokio::test]
async fn test_unknown_application_fails() {
    let env = common::setup().await;
    let ctx = RequestContext::new(env.org, Uuid::new_v4());

    let err = engine(&env)
        .move_stage(&ctx, Uuid::new_v4(), "screening")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::SubjectNotFound));
}

#[tokio::test]
async fn test_cross_tenant_access_is_forbidden() {
    let env = common::setup().await;
    let app_id = common::seed_application(&env, "applied", "active").await;

    let other_org = Uuid::new_v4();
    common::insert_organization(&env.db, other_org, "Other Org").await;
    let ctx = RequestContext::new(other_org, Uuid::new_v4());

    let err = engine(&env)
        .move_stage(&ctx, app_id, "screening")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CrossTenantAccess));
    assert_eq!(common::audit_count(&env.db, env.org).await, 0);
}

#[tokio::test]
async fn test_closed_application_is_immutable() {
    let env = common::setup().await;
    let app_id = common::seed_application(&env, "applied", "closed").await;
    let ctx = RequestContext::new(env.org, Uuid::new_v4());

    let err = engine(&env)
        .move_stage(&ctx, app_id, "screening")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::AlreadyClosed));
}

#[tokio::test]
async fn test_invalid_transition_surfaces_allowed_set() {
    let env = common::setup().await;
    let app_id = common::seed_application(&env, "applied", "active").await;
    let ctx = RequestContext::new(env.org, Uuid::new_v4());

    let err = engine(&env)
        .move_stage(&ctx, app_id, "hired")
        .await
        .unwrap_err();

    match err {
        CoreError::InvalidTransition { from, to, allowed } => {
            assert_eq!(from, "applied");
            assert_eq!(to, "hired");
            assert_eq!(allowed, vec!["screening".to_string()]);
        }
        other => panic!("expected InvalidTransition, got {:?}", other),
    }
    // Failed moves leave no ledger entry behind.
    assert_eq!(common::audit_count(&env.db, env.org).await, 0);
}

#[tokio::test]
async fn test_four_eyes_full_protocol() {
    let env = common::setup().await;
    let app_id = common::seed_application(&env, "interview", "active").await;

    let actor_a = Uuid::new_v4();
    let actor_b = Uuid::new_v4();
    let ctx_a = RequestContext::new(env.org, actor_a);
    let ctx_b = RequestContext::new(env.org, actor_b);

    // First actor requests: pending outcome, no subject mutation.
    let outcome = engine(&env)
        .move_stage(&ctx_a, app_id, "offer")
        .await
        .unwrap();
    let pending_id = match outcome {
        MoveOutcome::Pending { pending_id } => pending_id,
        other => panic!("expected pending outcome, got {:?}", other),
    };
    assert_eq!(common::pending_count(&env.db, env.org).await, 1);

    let (action, payload, _) = common::last_audit_row(&env.db, env.org).await;
    assert_eq!(action, "stage_transition_pending");
    let payload: serde_json::Value = serde_json::from_str(&payload.unwrap()).unwrap();
    assert_eq!(payload["pending_id"], pending_id.to_string());
    assert_eq!(payload["from_stage"], "interview");
    assert_eq!(payload["to_stage"], "offer");

    // Same actor again: self-approval forbidden, nothing new recorded.
    let before = common::audit_count(&env.db, env.org).await;
    let err = engine(&env)
        .move_stage(&ctx_a, app_id, "offer")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::SelfApprovalForbidden));
    assert_eq!(common::audit_count(&env.db, env.org).await, before);
    assert_eq!(common::pending_count(&env.db, env.org).await, 1);

    // Distinct second actor approves: subject mutates, pending is deleted.
    let outcome = engine(&env)
        .move_stage(&ctx_b, app_id, "offer")
        .await
        .unwrap();
    let app = match outcome {
        MoveOutcome::Applied(app) => app,
        other => panic!("expected applied outcome, got {:?}", other),
    };
    assert_eq!(app.stage, "offer");
    assert_eq!(common::pending_count(&env.db, env.org).await, 0);

    let (action, payload, _) = common::last_audit_row(&env.db, env.org).await;
    assert_eq!(action, "stage_transition_approved");
    let payload: serde_json::Value = serde_json::from_str(&payload.unwrap()).unwrap();
    assert_eq!(payload["initiated_by_user_id"], actor_a.to_string());
    assert_eq!(payload["approved_by_user_id"], actor_b.to_string());
    assert_eq!(payload["pending_id"], pending_id.to_string());

    // The whole exchange leaves a valid chain.
    let mut conn = env.db.pool().acquire().await.unwrap();
    let result = verify_chain(&mut conn, &ctx_b, None).await.unwrap();
    assert!(result.ok);
    assert_eq!(result.checked, 2);
}

#[tokio::test]
async fn test_pending_key_is_per_target_stage() {
    let env = common::setup().await;
    // Second gated target from the same stage.
    common::insert_transition(&env.db, env.org, env.workflow, "interview", "hold", true).await;
    let app_id = common::seed_application(&env, "interview", "active").await;

    let ctx = RequestContext::new(env.org, Uuid::new_v4());

    let first = engine(&env)
        .move_stage(&ctx, app_id, "offer")
        .await
        .unwrap();
    assert!(matches!(first, MoveOutcome::Pending { .. }));

    // A different target stage may be pending simultaneously for the same
    // subject; the key is (organization, subject, target).
    let second = engine(&env).move_stage(&ctx, app_id, "hold").await.unwrap();
    assert!(matches!(second, MoveOutcome::Pending { .. }));
    assert_eq!(common::pending_count(&env.db, env.org).await, 2);
}

#[tokio::test]
async fn test_duplicate_pending_key_is_a_conflict() {
    let env = common::setup().await;
    let ctx = RequestContext::new(env.org, Uuid::new_v4());

    let mut conn = env.db.pool().acquire().await.unwrap();
    approvals::try_create(&mut conn, &ctx, "app-1", "offer")
        .await
        .unwrap();

    // A concurrent initiator that raced past the existence check lands on
    // the unique key constraint.
    let err = approvals::try_create(&mut conn, &ctx, "app-1", "offer")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PendingConflict));

    // A different target is a different key and still inserts.
    approvals::try_create(&mut conn, &ctx, "app-1", "hold")
        .await
        .unwrap();
    drop(conn);
    assert_eq!(common::pending_count(&env.db, env.org).await, 2);
}

#[tokio::test]
async fn test_pending_does_not_mutate_subject() {
    let env = common::setup().await;
    let app_id = common::seed_application(&env, "interview", "active").await;
    let ctx = RequestContext::new(env.org, Uuid::new_v4());

    engine(&env)
        .move_stage(&ctx, app_id, "offer")
        .await
        .unwrap();

    let (stage,): (String,) = sqlx::query_as("SELECT stage FROM application WHERE id = ?")
        .bind(app_id.to_string())
        .fetch_one(env.db.pool())
        .await
        .unwrap();
    assert_eq!(stage, "interview");
}
