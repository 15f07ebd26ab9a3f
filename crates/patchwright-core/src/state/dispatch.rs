//! Convenience wrappers that name the build-state-machine transitions the
//! dispatcher drives, each guarded by [`super::BuildStateMachine`] and a
//! single optimistic-locking `UPDATE ... WHERE status = $from` -- no
//! read-then-write gap for a concurrent transition to land in.

use anyhow::bail;
use sqlx::PgPool;
use uuid::Uuid;

use patchwright_db::models::BuildStatus;
use patchwright_db::queries::builds;

use super::BuildStateMachine;

async fn transition_build(pool: &PgPool, build_id: Uuid, from: BuildStatus, to: BuildStatus) -> anyhow::Result<()> {
    if !BuildStateMachine::is_valid_transition(from, to) {
        bail!("invalid build state transition: {from} -> {to} for build {build_id}");
    }

    let updated = builds::transition_build_status(pool, build_id, from, to).await?;

    if updated.is_none() {
        match builds::get_build(pool, build_id).await? {
            None => bail!("build {build_id} not found"),
            Some(b) => bail!(
                "optimistic lock failed: build {build_id} has status {}, expected {from}",
                b.status
            ),
        }
    }

    Ok(())
}

/// Transaction-scoped variant of `transition_build`, for dispatcher commit
/// paths that need the build transition to land atomically alongside other
/// writes. Skips the diagnostic re-read on conflict since the whole
/// transaction rolls back anyway.
async fn transition_build_in_tx(
    conn: &mut sqlx::PgConnection,
    build_id: Uuid,
    from: BuildStatus,
    to: BuildStatus,
) -> anyhow::Result<()> {
    if !BuildStateMachine::is_valid_transition(from, to) {
        bail!("invalid build state transition: {from} -> {to} for build {build_id}");
    }

    let updated = builds::transition_build_status_in_tx(conn, build_id, from, to).await?;

    if updated.is_none() {
        bail!("optimistic lock failed: build {build_id} is no longer {from}");
    }

    Ok(())
}

/// The dispatcher leased the build's first task: `received -> processing`.
pub async fn start_processing(pool: &PgPool, build_id: Uuid) -> anyhow::Result<()> {
    transition_build(pool, build_id, BuildStatus::Received, BuildStatus::Processing).await
}

/// The terminal `NOTIFY` task succeeded: `processing -> completed`.
pub async fn complete_build(pool: &PgPool, build_id: Uuid) -> anyhow::Result<()> {
    transition_build(pool, build_id, BuildStatus::Processing, BuildStatus::Completed).await
}

/// A task reported `FAILED`: `processing -> failed`.
pub async fn fail_build(pool: &PgPool, build_id: Uuid) -> anyhow::Result<()> {
    transition_build(pool, build_id, BuildStatus::Processing, BuildStatus::Failed).await
}

/// A task exhausted its retry budget and dead-lettered:
/// `processing -> manual_intervention_required`.
pub async fn require_manual_intervention(pool: &PgPool, build_id: Uuid) -> anyhow::Result<()> {
    transition_build(
        pool,
        build_id,
        BuildStatus::Processing,
        BuildStatus::ManualInterventionRequired,
    )
    .await
}

/// Transaction-scoped `received -> processing`, paired with
/// [`transition_build_in_tx`]'s other wrappers below.
pub async fn start_processing_in_tx(conn: &mut sqlx::PgConnection, build_id: Uuid) -> anyhow::Result<()> {
    transition_build_in_tx(conn, build_id, BuildStatus::Received, BuildStatus::Processing).await
}

/// Transaction-scoped `processing -> failed`.
pub async fn fail_build_in_tx(conn: &mut sqlx::PgConnection, build_id: Uuid) -> anyhow::Result<()> {
    transition_build_in_tx(conn, build_id, BuildStatus::Processing, BuildStatus::Failed).await
}

/// Transaction-scoped `processing -> manual_intervention_required`.
pub async fn require_manual_intervention_in_tx(conn: &mut sqlx::PgConnection, build_id: Uuid) -> anyhow::Result<()> {
    transition_build_in_tx(
        conn,
        build_id,
        BuildStatus::Processing,
        BuildStatus::ManualInterventionRequired,
    )
    .await
}
