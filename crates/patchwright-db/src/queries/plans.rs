//! Database query functions for the `plans` table -- one planning artifact
//! per build, produced by the `PLAN` agent.

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Plan;

/// Insert the plan for a build, as part of the dispatcher's task-completion
/// transaction. Idempotent under replay: a second insert for the same build
/// is rejected by the table's `UNIQUE (build_id)` and the caller should treat
/// that as "already persisted" rather than an error.
pub async fn insert_plan(
    conn: &mut sqlx::PgConnection,
    build_id: Uuid,
    summary: &str,
    steps: serde_json::Value,
) -> anyhow::Result<Plan> {
    let plan = sqlx::query_as::<_, Plan>(
        "INSERT INTO plans (build_id, summary, steps) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(build_id)
    .bind(summary)
    .bind(steps)
    .fetch_one(conn)
    .await
    .context("failed to insert plan")?;

    Ok(plan)
}

/// Fetch the plan for a build, if the `PLAN` agent has already run.
pub async fn get_plan_for_build(pool: &PgPool, build_id: Uuid) -> anyhow::Result<Option<Plan>> {
    let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE build_id = $1")
        .bind(build_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch plan for build")?;

    Ok(plan)
}
