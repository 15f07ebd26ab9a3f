//! `patchwright retry` command: operator override to reset a dead-lettered
//! task back to pending, bypassing the normal retry budget.

use anyhow::{Context, Result, bail};
use sqlx::PgPool;
use uuid::Uuid;

use patchwright_db::queries::tasks;

pub async fn run_retry(pool: &PgPool, task_id_str: &str, force: bool) -> Result<()> {
    let task_id =
        Uuid::parse_str(task_id_str).with_context(|| format!("invalid task ID: {task_id_str}"))?;

    if !force {
        bail!("refusing to retry task {task_id} without --force (dead-letter is a terminal state)");
    }

    let affected = tasks::force_retry(pool, task_id).await?;
    if affected == 0 {
        bail!("task {task_id} is not dead-lettered (nothing to retry)");
    }

    println!("Task {task_id} reset to pending for retry.");
    Ok(())
}
