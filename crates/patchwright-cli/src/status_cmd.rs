//! `patchwright status` command: show build progress and per-task status.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use patchwright_db::queries::builds as build_db;
use patchwright_db::queries::tasks as task_db;

/// Run the status command.
///
/// When `build_id_str` is `Some`, shows detailed status for that build.
/// When `None`, lists all builds with a one-line summary.
pub async fn run_status(pool: &PgPool, build_id_str: Option<&str>) -> Result<()> {
    match build_id_str {
        Some(id_str) => run_build_status(pool, id_str).await,
        None => run_fleet_status(pool).await,
    }
}

/// Show detailed status for a single build.
async fn run_build_status(pool: &PgPool, build_id_str: &str) -> Result<()> {
    let build_id =
        Uuid::parse_str(build_id_str).with_context(|| format!("invalid build ID: {build_id_str}"))?;

    let build = build_db::get_build(pool, build_id)
        .await?
        .with_context(|| format!("build {build_id} not found"))?;

    println!("Build: {} #{} ({})", build.job, build.build_number, build.id);
    println!("Status: {}", build.status);
    println!("Branch: {}", build.branch);
    println!("Commit: {}", build.commit_sha);
    println!("Created: {}", build.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();

    let tasks = task_db::list_tasks_for_build(pool, build_id).await?;
    println!("Tasks:");
    for task in &tasks {
        let status_icon = match task.status.to_string().as_str() {
            "pending" => ".",
            "in_progress" => "*",
            "completed" => "+",
            "failed" => "!",
            "dead_letter" => "X",
            _ => " ",
        };
        println!(
            "  [{}] {} (attempt {}/{}, {})",
            status_icon, task.kind, task.attempt, task.max_attempts, task.status
        );
        if let Some(err) = &task.last_error {
            println!("      last error: {err}");
        }
    }

    Ok(())
}

/// List all builds with a one-line summary.
async fn run_fleet_status(pool: &PgPool) -> Result<()> {
    let builds = build_db::list_builds(pool).await?;

    if builds.is_empty() {
        println!("No builds found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:>6} {:<30}",
        "ID", "JOB", "#", "STATUS"
    );
    println!("{}", "-".repeat(98));

    for build in &builds {
        println!(
            "{:<38} {:<20} {:>6} {:<30}",
            build.id, build.job, build.build_number, build.status
        );
    }

    Ok(())
}
