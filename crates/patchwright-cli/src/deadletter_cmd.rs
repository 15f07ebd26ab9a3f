//! `patchwright dead-letters` command: enumerate dead-lettered tasks across
//! all builds for operator triage.

use anyhow::Result;
use sqlx::PgPool;

use patchwright_db::queries::tasks;

pub async fn run_dead_letters(pool: &PgPool) -> Result<()> {
    let dead_letters = tasks::list_dead_letters(pool).await?;

    if dead_letters.is_empty() {
        println!("No dead-lettered tasks.");
        return Ok(());
    }

    println!(
        "{:<38} {:<38} {:<12} {:>8} {:<30}",
        "TASK ID", "BUILD ID", "KIND", "ATTEMPT", "LAST ERROR"
    );
    println!("{}", "-".repeat(130));

    for task in &dead_letters {
        let last_error = task.last_error.as_deref().unwrap_or("-");
        println!(
            "{:<38} {:<38} {:<12} {:>8} {:<30}",
            task.id, task.build_id, task.kind, task.attempt, last_error
        );
    }

    Ok(())
}
