//! Database query functions for the `patches` table, produced by the
//! `PATCH` agent and consumed by `VALIDATE`.

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Patch;

/// Parameters for inserting a patch; server assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewPatch {
    pub build_id: Uuid,
    pub file_path: String,
    pub diff: String,
    pub applied: bool,
    pub apply_log: Option<String>,
}

/// Insert a patch, as part of the dispatcher's task-completion transaction.
pub async fn insert_patch(conn: &mut sqlx::PgConnection, fields: NewPatch) -> anyhow::Result<Patch> {
    let row = sqlx::query_as::<_, Patch>(
        "INSERT INTO patches (build_id, file_path, diff, applied, apply_log) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(fields.build_id)
    .bind(fields.file_path)
    .bind(fields.diff)
    .bind(fields.applied)
    .bind(fields.apply_log)
    .fetch_one(conn)
    .await
    .context("failed to insert patch")?;

    Ok(row)
}

/// List all patches for a build in the order they were proposed.
pub async fn list_patches_for_build(pool: &PgPool, build_id: Uuid) -> anyhow::Result<Vec<Patch>> {
    let rows = sqlx::query_as::<_, Patch>(
        "SELECT * FROM patches WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .context("failed to list patches for build")?;

    Ok(rows)
}
