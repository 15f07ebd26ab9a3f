//! Integration tests for the `tasks` table: leasing, completion, retry,
//! dead-lettering, heartbeats, and the single-active-task-per-build
//! invariant enforced by the partial unique index.

use chrono::{Duration as ChronoDuration, Utc};
use patchwright_db::errors::TransitionError;
use patchwright_db::models::{TaskKind, TaskStatus};
use patchwright_db::queries::{builds, tasks};

use patchwright_test_utils::{create_test_db, drop_test_db};

fn sample(job: &str, build_number: i64) -> builds::NewBuild {
    builds::NewBuild {
        job: job.to_owned(),
        build_number,
        branch: "main".to_owned(),
        repository_url: "https://example.invalid/svc.git".to_owned(),
        commit_sha: "abc123".to_owned(),
        ingress_payload: serde_json::json!({}),
    }
}

#[tokio::test]
async fn lease_next_task_marks_in_progress_and_bumps_attempt() {
    let (pool, db_name) = create_test_db().await;

    let build = builds::create_build(&pool, sample("svc", 1)).await.unwrap();

    let leased = tasks::lease_next_task(&pool, "worker-a", ChronoDuration::seconds(60))
        .await
        .unwrap()
        .expect("a pending task should be available");

    assert_eq!(leased.build_id, build.id);
    assert_eq!(leased.status, TaskStatus::InProgress);
    assert_eq!(leased.attempt, 1);
    assert_eq!(leased.lease_owner.as_deref(), Some("worker-a"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrent_leases_never_return_the_same_task() {
    let (pool, db_name) = create_test_db().await;

    builds::create_build(&pool, sample("svc", 1)).await.unwrap();

    let first = tasks::lease_next_task(&pool, "worker-a", ChronoDuration::seconds(60))
        .await
        .unwrap();
    let second = tasks::lease_next_task(&pool, "worker-b", ChronoDuration::seconds(60))
        .await
        .unwrap();

    assert!(first.is_some());
    assert!(second.is_none(), "only one seed task exists per build");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn complete_success_requires_matching_lease_owner() {
    let (pool, db_name) = create_test_db().await;

    builds::create_build(&pool, sample("svc", 1)).await.unwrap();
    let task = tasks::lease_next_task(&pool, "worker-a", ChronoDuration::seconds(60))
        .await
        .unwrap()
        .unwrap();

    let wrong_owner = tasks::complete_success(&pool, task.id, "worker-b").await;
    assert!(matches!(wrong_owner, Err(TransitionError::Conflict(_))));

    tasks::complete_success(&pool, task.id, "worker-a").await.unwrap();

    let refreshed = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, TaskStatus::Completed);
    assert!(refreshed.lease_owner.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn transition_on_unknown_task_is_not_found() {
    let (pool, db_name) = create_test_db().await;

    let result = tasks::complete_success(&pool, uuid::Uuid::new_v4(), "worker-a").await;
    assert!(matches!(result, Err(TransitionError::NotFound(_))));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn retry_pending_resets_status_and_sets_not_before() {
    let (pool, db_name) = create_test_db().await;

    builds::create_build(&pool, sample("svc", 1)).await.unwrap();
    let task = tasks::lease_next_task(&pool, "worker-a", ChronoDuration::seconds(60))
        .await
        .unwrap()
        .unwrap();

    let not_before = Utc::now() + ChronoDuration::seconds(30);
    tasks::retry_pending(&pool, task.id, "worker-a", "transient error", not_before)
        .await
        .unwrap();

    let refreshed = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, TaskStatus::Pending);
    assert_eq!(refreshed.last_error.as_deref(), Some("transient error"));
    assert!(refreshed.lease_owner.is_none());
    assert!(refreshed.not_before.is_some());

    // Not yet due, so it should not be leasable.
    let leased_again = tasks::lease_next_task(&pool, "worker-b", ChronoDuration::seconds(60))
        .await
        .unwrap();
    assert!(leased_again.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn dead_letter_is_terminal_and_listed() {
    let (pool, db_name) = create_test_db().await;

    builds::create_build(&pool, sample("svc", 1)).await.unwrap();
    let task = tasks::lease_next_task(&pool, "worker-a", ChronoDuration::seconds(60))
        .await
        .unwrap()
        .unwrap();

    tasks::dead_letter(&pool, task.id, "worker-a", "exhausted retries")
        .await
        .unwrap();

    let refreshed = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, TaskStatus::DeadLetter);

    let dead_letters = tasks::list_dead_letters(&pool).await.unwrap();
    assert!(dead_letters.iter().any(|t| t.id == task.id));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn heartbeat_extends_lease_for_current_owner_only() {
    let (pool, db_name) = create_test_db().await;

    builds::create_build(&pool, sample("svc", 1)).await.unwrap();
    let task = tasks::lease_next_task(&pool, "worker-a", ChronoDuration::seconds(10))
        .await
        .unwrap()
        .unwrap();

    tasks::heartbeat(&pool, task.id, "worker-a", ChronoDuration::seconds(120))
        .await
        .unwrap();

    let refreshed = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    let remaining = refreshed.lease_expires_at.unwrap() - Utc::now();
    assert!(remaining > ChronoDuration::seconds(60));

    let wrong_owner = tasks::heartbeat(&pool, task.id, "worker-b", ChronoDuration::seconds(120)).await;
    assert!(matches!(wrong_owner, Err(TransitionError::Conflict(_))));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn expired_lease_is_recoverable_by_another_worker() {
    let (pool, db_name) = create_test_db().await;

    builds::create_build(&pool, sample("svc", 1)).await.unwrap();

    // Lease with a TTL already in the past.
    let leased = tasks::lease_next_task(&pool, "worker-a", ChronoDuration::seconds(-1))
        .await
        .unwrap()
        .unwrap();

    let recovered = tasks::lease_next_task(&pool, "worker-b", ChronoDuration::seconds(60))
        .await
        .unwrap()
        .expect("expired lease should be recoverable");

    assert_eq!(recovered.id, leased.id);
    assert_eq!(recovered.lease_owner.as_deref(), Some("worker-b"));
    assert_eq!(recovered.attempt, 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn insert_next_task_rejected_while_predecessor_still_active() {
    let (pool, db_name) = create_test_db().await;

    let build = builds::create_build(&pool, sample("svc", 1)).await.unwrap();

    // The seed PLAN task is still pending (active), so a second active task
    // for the same build must be rejected by the partial unique index.
    let result = tasks::insert_next_task(
        &pool,
        build.id,
        TaskKind::Retrieve,
        serde_json::json!({}),
        3,
    )
    .await;

    assert!(result.is_err(), "P1 should reject a second active task per build");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn insert_next_task_succeeds_once_predecessor_completes() {
    let (pool, db_name) = create_test_db().await;

    let build = builds::create_build(&pool, sample("svc", 1)).await.unwrap();
    let task = tasks::lease_next_task(&pool, "worker-a", ChronoDuration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    tasks::complete_success(&pool, task.id, "worker-a").await.unwrap();

    let next = tasks::insert_next_task(&pool, build.id, TaskKind::Retrieve, serde_json::json!({}), 3)
        .await
        .unwrap();

    assert_eq!(next.kind, TaskKind::Retrieve);
    assert_eq!(next.status, TaskStatus::Pending);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn force_retry_resets_dead_lettered_task() {
    let (pool, db_name) = create_test_db().await;

    builds::create_build(&pool, sample("svc", 1)).await.unwrap();
    let task = tasks::lease_next_task(&pool, "worker-a", ChronoDuration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    tasks::dead_letter(&pool, task.id, "worker-a", "exhausted retries")
        .await
        .unwrap();

    let affected = tasks::force_retry(&pool, task.id).await.unwrap();
    assert_eq!(affected, 1);

    let refreshed = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, TaskStatus::Pending);
    assert_eq!(refreshed.attempt, 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}
