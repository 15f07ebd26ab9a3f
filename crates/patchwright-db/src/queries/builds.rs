//! Database query functions for the `builds` table and the ingress boundary.

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::CreateBuildError;
use crate::models::{Build, BuildStatus, DEFAULT_MAX_ATTEMPTS, Task, TaskKind, TaskStatus};

/// Fields supplied by the ingress adapter to start a new build.
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub job: String,
    pub build_number: i64,
    pub branch: String,
    pub repository_url: String,
    pub commit_sha: String,
    pub ingress_payload: serde_json::Value,
}

/// Insert a Build and, in the same transaction, a seed `PLAN` task in
/// `PENDING`. Fails with [`CreateBuildError::Duplicate`] if `(job,
/// build_number)` already exists.
pub async fn create_build(pool: &PgPool, fields: NewBuild) -> Result<Build, CreateBuildError> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start create_build transaction")?;

    let inserted = sqlx::query_as::<_, Build>(
        "INSERT INTO builds (job, build_number, branch, repository_url, commit_sha, ingress_payload) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(&fields.job)
    .bind(fields.build_number)
    .bind(&fields.branch)
    .bind(&fields.repository_url)
    .bind(&fields.commit_sha)
    .bind(&fields.ingress_payload)
    .fetch_one(&mut *tx)
    .await;

    let build = match inserted {
        Ok(build) => build,
        Err(sqlx::Error::Database(ref db_err)) if db_err.code().as_deref() == Some("23505") => {
            return Err(CreateBuildError::Duplicate {
                job: fields.job,
                build_number: fields.build_number,
            });
        }
        Err(e) => return Err(CreateBuildError::Other(anyhow::Error::new(e).context("failed to insert build"))),
    };

    sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (build_id, kind, status, max_attempts) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(build.id)
    .bind(TaskKind::Plan)
    .bind(TaskStatus::Pending)
    .bind(DEFAULT_MAX_ATTEMPTS)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert seed plan task")?;

    tx.commit().await.context("failed to commit create_build")?;

    Ok(build)
}

/// Fetch a single build by ID.
pub async fn get_build(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Build>> {
    let build = sqlx::query_as::<_, Build>("SELECT * FROM builds WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch build")?;

    Ok(build)
}

/// List all builds, newest first.
pub async fn list_builds(pool: &PgPool) -> anyhow::Result<Vec<Build>> {
    let builds = sqlx::query_as::<_, Build>("SELECT * FROM builds ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
        .context("failed to list builds")?;

    Ok(builds)
}

/// Atomically move a build from `from` to `to` iff it is still `from`.
/// Returns `None` if the row doesn't exist or has already moved on -- the
/// optimistic-lock conflict case, which the build-state-machine layer above
/// this turns into a clearer error.
pub async fn transition_build_status(
    pool: &PgPool,
    id: Uuid,
    from: BuildStatus,
    to: BuildStatus,
) -> anyhow::Result<Option<Build>> {
    let build = sqlx::query_as::<_, Build>(
        "UPDATE builds SET status = $1, updated_at = now() \
         WHERE id = $2 AND status = $3 \
         RETURNING *",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .fetch_optional(pool)
    .await
    .context("failed to transition build status")?;

    Ok(build)
}

/// Transaction-scoped variant of [`transition_build_status`], for dispatcher
/// commit paths that must land the build transition atomically alongside
/// other writes in the same transaction.
pub async fn transition_build_status_in_tx(
    conn: &mut sqlx::PgConnection,
    id: Uuid,
    from: BuildStatus,
    to: BuildStatus,
) -> anyhow::Result<Option<Build>> {
    let build = sqlx::query_as::<_, Build>(
        "UPDATE builds SET status = $1, updated_at = now() \
         WHERE id = $2 AND status = $3 \
         RETURNING *",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .fetch_optional(conn)
    .await
    .context("failed to transition build status")?;

    Ok(build)
}

/// Count of builds grouped by status, for the operational surface.
pub async fn count_builds_by_status(pool: &PgPool) -> anyhow::Result<Vec<(BuildStatus, i64)>> {
    let rows: Vec<(BuildStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM builds GROUP BY status")
            .fetch_all(pool)
            .await
            .context("failed to count builds by status")?;

    Ok(rows)
}
