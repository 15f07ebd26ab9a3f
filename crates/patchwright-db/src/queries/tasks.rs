//! Database query functions for the `tasks` table: the lease/complete/
//! heartbeat primitives the dispatcher is built on.

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::TransitionError;
use crate::models::{Task, TaskKind, TaskStatus};

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List all tasks for a build, oldest first -- its history in pipeline order.
pub async fn list_tasks_for_build(pool: &PgPool, build_id: Uuid) -> anyhow::Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for build")?;

    Ok(tasks)
}

/// The task for a build currently in `pending` or `in_progress`, if any.
/// At most one such row can exist per build (P1).
pub async fn get_active_task_for_build(
    pool: &PgPool,
    build_id: Uuid,
) -> anyhow::Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE build_id = $1 AND status IN ('pending', 'in_progress')",
    )
    .bind(build_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch active task for build")?;

    Ok(task)
}

/// Atomically select one ready task, transition it to `in_progress`, and
/// return it. A task is ready if it is `pending`, or `in_progress` with an
/// expired lease (stuck-task recovery), and its `not_before` has passed.
/// Ties broken by oldest `updated_at`. Uses `FOR UPDATE SKIP LOCKED` so
/// concurrent callers never return the same row.
pub async fn lease_next_task(
    pool: &PgPool,
    worker_id: &str,
    lease_ttl: chrono::Duration,
) -> anyhow::Result<Option<Task>> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start lease transaction")?;

    let candidate: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM tasks \
         WHERE (status = 'pending' OR (status = 'in_progress' AND lease_expires_at < now())) \
           AND (not_before IS NULL OR not_before <= now()) \
         ORDER BY updated_at ASC \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED",
    )
    .fetch_optional(&mut *tx)
    .await
    .context("failed to select next ready task")?;

    let Some((task_id,)) = candidate else {
        tx.commit().await.context("failed to commit empty lease")?;
        return Ok(None);
    };

    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'in_progress', \
             lease_owner = $1, \
             lease_expires_at = now() + $2::interval, \
             attempt = attempt + 1, \
             not_before = NULL, \
             updated_at = now() \
         WHERE id = $3 \
         RETURNING *",
    )
    .bind(worker_id)
    .bind(lease_ttl)
    .bind(task_id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to lease task")?;

    tx.commit().await.context("failed to commit lease")?;

    Ok(Some(task))
}

/// Extend the lease on a task still owned by `worker_id`.
pub async fn heartbeat(
    pool: &PgPool,
    task_id: Uuid,
    worker_id: &str,
    extension: chrono::Duration,
) -> Result<(), TransitionError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET lease_expires_at = now() + $1::interval, updated_at = now() \
         WHERE id = $2 AND lease_owner = $3 AND status = 'in_progress'",
    )
    .bind(extension)
    .bind(task_id)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to extend lease")?;

    if result.rows_affected() == 0 {
        return Err(conflict_or_not_found(pool, task_id).await);
    }

    Ok(())
}

/// Mark a leased task `completed`. Caller must hold the lease.
pub async fn complete_success(
    pool: &PgPool,
    task_id: Uuid,
    worker_id: &str,
) -> Result<(), TransitionError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'completed', last_error = NULL, \
             lease_owner = NULL, lease_expires_at = NULL, updated_at = now() \
         WHERE id = $1 AND lease_owner = $2 AND status = 'in_progress'",
    )
    .bind(task_id)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to complete task")?;

    if result.rows_affected() == 0 {
        return Err(conflict_or_not_found(pool, task_id).await);
    }

    Ok(())
}

/// Re-enqueue a leased task as `pending` after a `RETRY` outcome, with a
/// `not_before` delay. Caller must hold the lease and must have already
/// checked `attempt < max_attempts`.
pub async fn retry_pending(
    pool: &PgPool,
    task_id: Uuid,
    worker_id: &str,
    error: &str,
    not_before: DateTime<Utc>,
) -> Result<(), TransitionError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', last_error = $1, not_before = $2, \
             lease_owner = NULL, lease_expires_at = NULL, updated_at = now() \
         WHERE id = $3 AND lease_owner = $4 AND status = 'in_progress'",
    )
    .bind(error)
    .bind(not_before)
    .bind(task_id)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to re-enqueue task for retry")?;

    if result.rows_affected() == 0 {
        return Err(conflict_or_not_found(pool, task_id).await);
    }

    Ok(())
}

/// Transition a leased task to `dead_letter` after exhausting its retry
/// budget. Caller must hold the lease.
pub async fn dead_letter(
    pool: &PgPool,
    task_id: Uuid,
    worker_id: &str,
    error: &str,
) -> Result<(), TransitionError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'dead_letter', last_error = $1, \
             lease_owner = NULL, lease_expires_at = NULL, updated_at = now() \
         WHERE id = $2 AND lease_owner = $3 AND status = 'in_progress'",
    )
    .bind(error)
    .bind(task_id)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to dead-letter task")?;

    if result.rows_affected() == 0 {
        return Err(conflict_or_not_found(pool, task_id).await);
    }

    Ok(())
}

/// Transition a leased task to terminal `failed`. Caller must hold the lease.
pub async fn fail(
    pool: &PgPool,
    task_id: Uuid,
    worker_id: &str,
    error: &str,
) -> Result<(), TransitionError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'failed', last_error = $1, \
             lease_owner = NULL, lease_expires_at = NULL, updated_at = now() \
         WHERE id = $2 AND lease_owner = $3 AND status = 'in_progress'",
    )
    .bind(error)
    .bind(task_id)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to fail task")?;

    if result.rows_affected() == 0 {
        return Err(conflict_or_not_found(pool, task_id).await);
    }

    Ok(())
}

/// Transaction-scoped completion for the dispatcher's single commit
/// transaction (task completion, artifact writes, and the successor task
/// insert all land together or not at all). Bails instead of distinguishing
/// conflict from not-found: the caller already holds the lease it leased
/// moments earlier, so a zero-rows result means the lease was lost and the
/// whole commit must roll back, leaving the task `in_progress` for
/// lease-expiry recovery to pick back up.
pub async fn complete_success_in_tx(
    conn: &mut sqlx::PgConnection,
    task_id: Uuid,
    worker_id: &str,
) -> anyhow::Result<()> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'completed', last_error = NULL, \
             lease_owner = NULL, lease_expires_at = NULL, updated_at = now() \
         WHERE id = $1 AND lease_owner = $2 AND status = 'in_progress'",
    )
    .bind(task_id)
    .bind(worker_id)
    .execute(conn)
    .await
    .context("failed to complete task")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {task_id} lease lost before commit");
    }

    Ok(())
}

/// Transaction-scoped dead-lettering, paired with [`complete_success_in_tx`].
pub async fn dead_letter_in_tx(
    conn: &mut sqlx::PgConnection,
    task_id: Uuid,
    worker_id: &str,
    error: &str,
) -> anyhow::Result<()> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'dead_letter', last_error = $1, \
             lease_owner = NULL, lease_expires_at = NULL, updated_at = now() \
         WHERE id = $2 AND lease_owner = $3 AND status = 'in_progress'",
    )
    .bind(error)
    .bind(task_id)
    .bind(worker_id)
    .execute(conn)
    .await
    .context("failed to dead-letter task")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {task_id} lease lost before commit");
    }

    Ok(())
}

/// Transaction-scoped terminal failure, paired with [`complete_success_in_tx`].
pub async fn fail_in_tx(
    conn: &mut sqlx::PgConnection,
    task_id: Uuid,
    worker_id: &str,
    error: &str,
) -> anyhow::Result<()> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'failed', last_error = $1, \
             lease_owner = NULL, lease_expires_at = NULL, updated_at = now() \
         WHERE id = $2 AND lease_owner = $3 AND status = 'in_progress'",
    )
    .bind(error)
    .bind(task_id)
    .bind(worker_id)
    .execute(conn)
    .await
    .context("failed to fail task")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {task_id} lease lost before commit");
    }

    Ok(())
}

/// Transaction-scoped successor insert, paired with [`complete_success_in_tx`].
pub async fn insert_next_task_in_tx(
    conn: &mut sqlx::PgConnection,
    build_id: Uuid,
    kind: TaskKind,
    payload: serde_json::Value,
    max_attempts: i32,
) -> anyhow::Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (build_id, kind, status, payload, max_attempts) \
         VALUES ($1, $2, 'pending', $3, $4) \
         RETURNING *",
    )
    .bind(build_id)
    .bind(kind)
    .bind(payload)
    .bind(max_attempts)
    .fetch_one(conn)
    .await
    .context("failed to insert successor task")?;

    Ok(task)
}

/// Insert the next-stage task for a build. Must be called after the
/// predecessor has already left the active set (`completed`/terminal) in the
/// same transaction, or the single-active-task partial index will reject it.
pub async fn insert_next_task(
    pool: &PgPool,
    build_id: Uuid,
    kind: TaskKind,
    payload: serde_json::Value,
    max_attempts: i32,
) -> anyhow::Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (build_id, kind, status, payload, max_attempts) \
         VALUES ($1, $2, 'pending', $3, $4) \
         RETURNING *",
    )
    .bind(build_id)
    .bind(kind)
    .bind(payload)
    .bind(max_attempts)
    .fetch_one(pool)
    .await
    .context("failed to insert successor task")?;

    Ok(task)
}

/// Operator override: reset a `dead_letter` task back to `pending` with a
/// reset attempt counter, bypassing the normal retry budget.
pub async fn force_retry(pool: &PgPool, task_id: Uuid) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', attempt = 0, last_error = NULL, \
             lease_owner = NULL, lease_expires_at = NULL, not_before = NULL, \
             updated_at = now() \
         WHERE id = $1 AND status = 'dead_letter'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to force-retry dead-lettered task")?;

    Ok(result.rows_affected())
}

/// Enumerate dead-lettered tasks across all builds.
pub async fn list_dead_letters(pool: &PgPool) -> anyhow::Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE status = 'dead_letter' ORDER BY updated_at DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list dead-lettered tasks")?;

    Ok(tasks)
}

/// Counts of tasks grouped by status, for the operational surface.
pub async fn count_tasks_by_status(pool: &PgPool) -> anyhow::Result<Vec<(TaskStatus, i64)>> {
    let rows: Vec<(TaskStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .fetch_all(pool)
            .await
            .context("failed to count tasks by status")?;

    Ok(rows)
}

/// Distinguish "row missing" from "row exists but lock/lease no longer
/// matches" for a clearer error after a zero-rows-affected update.
async fn conflict_or_not_found(pool: &PgPool, task_id: Uuid) -> TransitionError {
    match get_task(pool, task_id).await {
        Ok(Some(_)) => TransitionError::Conflict(task_id),
        Ok(None) => TransitionError::NotFound(task_id),
        Err(e) => TransitionError::Other(e),
    }
}
