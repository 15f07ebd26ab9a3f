//! Database query functions for the `candidate_files` table, produced by the
//! `RETRIEVE` agent and consumed by the `PATCH` agent.

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::CandidateFile;

/// Parameters for inserting a candidate file; server assigns `id` and
/// `created_at`.
#[derive(Debug, Clone)]
pub struct NewCandidateFile {
    pub build_id: Uuid,
    pub file_path: String,
    pub rank_score: f64,
    pub reason: String,
}

/// Insert a candidate file, as part of the dispatcher's task-completion
/// transaction.
pub async fn insert_candidate_file(
    conn: &mut sqlx::PgConnection,
    fields: NewCandidateFile,
) -> anyhow::Result<CandidateFile> {
    let row = sqlx::query_as::<_, CandidateFile>(
        "INSERT INTO candidate_files (build_id, file_path, rank_score, reason) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(fields.build_id)
    .bind(fields.file_path)
    .bind(fields.rank_score)
    .bind(fields.reason)
    .fetch_one(conn)
    .await
    .context("failed to insert candidate file")?;

    Ok(row)
}

/// List candidate files for a build, highest-ranked first.
pub async fn list_candidate_files_for_build(
    pool: &PgPool,
    build_id: Uuid,
) -> anyhow::Result<Vec<CandidateFile>> {
    let rows = sqlx::query_as::<_, CandidateFile>(
        "SELECT * FROM candidate_files WHERE build_id = $1 ORDER BY rank_score DESC",
    )
    .bind(build_id)
    .fetch_all(pool)
    .await
    .context("failed to list candidate files for build")?;

    Ok(rows)
}
