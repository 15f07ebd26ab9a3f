//! Database query functions for the `validations` table, produced by the
//! `VALIDATE` agent.

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Validation, ValidationKind};

/// Parameters for inserting a validation run; server assigns `id` and
/// `created_at`.
#[derive(Debug, Clone)]
pub struct NewValidation {
    pub build_id: Uuid,
    pub kind: ValidationKind,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Insert a validation run, as part of the dispatcher's task-completion
/// transaction.
pub async fn insert_validation(
    conn: &mut sqlx::PgConnection,
    fields: NewValidation,
) -> anyhow::Result<Validation> {
    let row = sqlx::query_as::<_, Validation>(
        "INSERT INTO validations (build_id, kind, exit_code, stdout, stderr) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(fields.build_id)
    .bind(fields.kind)
    .bind(fields.exit_code)
    .bind(fields.stdout)
    .bind(fields.stderr)
    .fetch_one(conn)
    .await
    .context("failed to insert validation")?;

    Ok(row)
}

/// List all validation runs for a build, oldest first.
pub async fn list_validations_for_build(
    pool: &PgPool,
    build_id: Uuid,
) -> anyhow::Result<Vec<Validation>> {
    let rows = sqlx::query_as::<_, Validation>(
        "SELECT * FROM validations WHERE build_id = $1 ORDER BY created_at ASC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .context("failed to list validations for build")?;

    Ok(rows)
}

/// The most recent validation run for a build, if any.
pub async fn latest_validation_for_build(
    pool: &PgPool,
    build_id: Uuid,
) -> anyhow::Result<Option<Validation>> {
    let row = sqlx::query_as::<_, Validation>(
        "SELECT * FROM validations WHERE build_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(build_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest validation for build")?;

    Ok(row)
}
