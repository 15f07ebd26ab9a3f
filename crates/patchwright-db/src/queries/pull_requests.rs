//! Database query functions for the `pull_requests` table: at most one per
//! build, produced by the `CREATE_PR` agent.

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::PullRequest;

/// Parameters for inserting a pull request; server assigns `id` and
/// `created_at`.
#[derive(Debug, Clone)]
pub struct NewPullRequest {
    pub build_id: Uuid,
    pub branch_name: String,
    pub pr_number: i64,
    pub url: String,
    pub status: String,
}

/// Insert the pull request for a build, as part of the dispatcher's
/// task-completion transaction. The `UNIQUE (build_id)` constraint makes a
/// second call for the same build an idempotency signal rather than a
/// genuine error -- callers should check [`get_pull_request_for_build`]
/// first when replaying a `CREATE_PR` task.
pub async fn insert_pull_request(
    conn: &mut sqlx::PgConnection,
    fields: NewPullRequest,
) -> anyhow::Result<PullRequest> {
    let row = sqlx::query_as::<_, PullRequest>(
        "INSERT INTO pull_requests (build_id, branch_name, pr_number, url, status) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(fields.build_id)
    .bind(fields.branch_name)
    .bind(fields.pr_number)
    .bind(fields.url)
    .bind(fields.status)
    .fetch_one(conn)
    .await
    .context("failed to insert pull request")?;

    Ok(row)
}

/// Fetch the pull request for a build, if `CREATE_PR` has already run.
pub async fn get_pull_request_for_build(
    pool: &PgPool,
    build_id: Uuid,
) -> anyhow::Result<Option<PullRequest>> {
    let row = sqlx::query_as::<_, PullRequest>("SELECT * FROM pull_requests WHERE build_id = $1")
        .bind(build_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch pull request for build")?;

    Ok(row)
}
