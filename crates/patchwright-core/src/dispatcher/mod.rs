//! The task dispatcher: a fixed pool of worker loops that lease tasks,
//! invoke the registered agent, persist the result, and schedule the next
//! stage.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::Duration as ChronoDuration;
use patchwright_db::models::{Build, BuildStatus, Task, TaskKind, TaskStatus};
use patchwright_db::queries::{builds, candidate_files, patches, plans, pull_requests, tasks, validations};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::contract::{Agent, AgentResult, Artifact, BuildContext};
use crate::state::dispatch as build_dispatch;

/// Reason string used when a task kind has no registered agent. Terminal,
/// no retry, matching the spec's error taxonomy.
pub const NO_AGENT_REGISTERED: &str = "NO_AGENT_REGISTERED";

/// Reason string used when an agent's `SUCCESS` result names more than one
/// successor task. The default pipeline is a strict chain and the
/// single-active-task invariant (P1) cannot accommodate branching, so this
/// is treated as a terminal dispatcher-level error rather than silently
/// picking one successor.
pub const MULTIPLE_SUCCESSORS_UNSUPPORTED: &str = "MULTIPLE_SUCCESSORS_UNSUPPORTED";

/// Tunables for the dispatcher. `base`/`max` are the backoff parameters
/// from spec §4.3; `lease_ttl` must exceed `agent_timeout` (design note in
/// spec §9) so a well-behaved agent never loses its lease mid-execution.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub worker_count: usize,
    pub lease_ttl: StdDuration,
    pub agent_timeout: StdDuration,
    pub backoff_base: StdDuration,
    pub backoff_max: StdDuration,
    pub poll_interval: StdDuration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            lease_ttl: StdDuration::from_secs(60),
            agent_timeout: StdDuration::from_secs(45),
            backoff_base: StdDuration::from_secs(2),
            backoff_max: StdDuration::from_secs(120),
            poll_interval: StdDuration::from_millis(500),
        }
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1) * rand(0.5, 1.5)`,
/// clamped to `max`.
pub fn backoff(attempt: i32, base: StdDuration, max: StdDuration) -> StdDuration {
    let exponent = (attempt - 1).max(0);
    let scaled = base.as_secs_f64() * 2f64.powi(exponent);
    let jitter = 0.5 + rand::random::<f64>();
    let secs = (scaled * jitter).min(max.as_secs_f64()).max(0.0);
    StdDuration::from_secs_f64(secs)
}

/// A pool of workers that lease, execute, and complete tasks until
/// cancelled. Construct with [`Dispatcher::new`] and drive with
/// [`Dispatcher::run`].
pub struct Dispatcher {
    pool: PgPool,
    registry: Arc<crate::contract::AgentRegistry>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(pool: PgPool, registry: crate::contract::AgentRegistry, config: DispatcherConfig) -> Self {
        Self {
            pool,
            registry: Arc::new(registry),
            config,
        }
    }

    /// Run `worker_count` independent worker loops until `cancel` fires,
    /// then wait up to `grace` for in-flight tasks to finish before
    /// returning. Tasks still in flight past `grace` are left `in_progress`
    /// with an intact lease that expires naturally (§5).
    pub async fn run(&self, cancel: CancellationToken, grace: StdDuration) {
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.config.worker_count);

        for i in 0..self.config.worker_count {
            let pool = self.pool.clone();
            let registry = Arc::clone(&self.registry);
            let config = self.config.clone();
            let worker_cancel = cancel.clone();
            let worker_id = format!("worker-{i}");

            handles.push(tokio::spawn(async move {
                worker_loop(pool, registry, config, worker_id, worker_cancel).await;
            }));
        }

        cancel.cancelled().await;
        info!("dispatcher shutdown requested, draining workers");

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("grace period elapsed with workers still in flight; leaving leases to expire");
        }
    }
}

async fn worker_loop(
    pool: PgPool,
    registry: Arc<crate::contract::AgentRegistry>,
    config: DispatcherConfig,
    worker_id: String,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let lease_ttl = ChronoDuration::from_std(config.lease_ttl).unwrap_or(ChronoDuration::seconds(60));

        match tasks::lease_next_task(&pool, &worker_id, lease_ttl).await {
            Ok(Some(task)) => {
                run_task(&pool, &registry, &config, &worker_id, task).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(jittered_poll(config.poll_interval)) => {}
                    _ = cancel.cancelled() => return,
                }
            }
            Err(e) => {
                error!(worker = %worker_id, error = %e, "lease_next_task failed");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
}

fn jittered_poll(base: StdDuration) -> StdDuration {
    let jitter = 0.5 + rand::random::<f64>();
    StdDuration::from_secs_f64((base.as_secs_f64() * jitter).max(0.0))
}

async fn run_task(
    pool: &PgPool,
    registry: &crate::contract::AgentRegistry,
    config: &DispatcherConfig,
    worker_id: &str,
    task: Task,
) {
    let mut build = match builds::get_build(pool, task.build_id).await {
        Ok(Some(b)) => b,
        Ok(None) => {
            error!(task_id = %task.id, build_id = %task.build_id, "leased task references missing build");
            return;
        }
        Err(e) => {
            error!(task_id = %task.id, error = %e, "failed to load build for leased task");
            return;
        }
    };

    if build.status == BuildStatus::Received {
        match build_dispatch::start_processing(pool, build.id).await {
            Ok(()) => build.status = BuildStatus::Processing,
            Err(e) => warn!(build_id = %build.id, error = %e, "failed to transition build to processing"),
        }
    }

    let Some(agent) = registry.get(task.kind) else {
        finish_terminal_failure(pool, &task, worker_id, &build, NO_AGENT_REGISTERED).await;
        return;
    };

    let ctx = BuildContext {
        build_id: build.id,
        job: build.job.clone(),
        build_number: build.build_number,
        branch: build.branch.clone(),
        repository_url: build.repository_url.clone(),
        commit_sha: build.commit_sha.clone(),
        ingress_payload: build.ingress_payload.clone(),
        attempt: task.attempt,
        created_at: build.created_at,
    };

    let heartbeat = spawn_heartbeat(pool.clone(), task.id, worker_id.to_owned(), config.lease_ttl);

    let outcome = match tokio::time::timeout(config.agent_timeout, agent.handle(&ctx, &task.payload)).await {
        Ok(result) => result,
        Err(_) => AgentResult::Retry {
            error: "TIMEOUT".to_owned(),
            retry_after: None,
        },
    };

    heartbeat.abort();

    translate_and_commit(pool, config, worker_id, &task, outcome).await;
}

fn spawn_heartbeat(pool: PgPool, task_id: Uuid, worker_id: String, lease_ttl: StdDuration) -> JoinHandle<()> {
    let interval = lease_ttl / 3;
    tokio::spawn(async move {
        let chrono_ttl = ChronoDuration::from_std(lease_ttl).unwrap_or(ChronoDuration::seconds(60));
        loop {
            tokio::time::sleep(interval).await;
            if tasks::heartbeat(&pool, task_id, &worker_id, chrono_ttl).await.is_err() {
                // Lease already lost (completed elsewhere, or expired); stop extending it.
                return;
            }
        }
    })
}

async fn translate_and_commit(
    pool: &PgPool,
    config: &DispatcherConfig,
    worker_id: &str,
    task: &Task,
    outcome: AgentResult,
) {
    match outcome {
        AgentResult::Success {
            next_tasks,
            persisted_artifacts,
        } => handle_success(pool, task, worker_id, next_tasks, persisted_artifacts).await,
        AgentResult::Retry { error, retry_after } => {
            handle_retry(pool, config, task, worker_id, error, retry_after).await
        }
        AgentResult::Failed { error } => handle_failed(pool, task, worker_id, error).await,
    }
}

async fn handle_success(
    pool: &PgPool,
    task: &Task,
    worker_id: &str,
    next_tasks: Vec<(TaskKind, serde_json::Value)>,
    persisted_artifacts: Vec<Artifact>,
) {
    if next_tasks.len() > 1 {
        handle_failed(pool, task, worker_id, MULTIPLE_SUCCESSORS_UNSUPPORTED.to_owned()).await;
        return;
    }

    let next_task = next_tasks.into_iter().next();
    let has_next = next_task.is_some();

    if let Err(e) = commit_success(pool, task, worker_id, persisted_artifacts, next_task).await {
        warn!(task_id = %task.id, error = %e, "failed to commit task completion (lease lost?)");
        return;
    }

    if !has_next && task.kind == TaskKind::Notify {
        if let Ok(Some(build)) = builds::get_build(pool, task.build_id).await {
            if build.status == BuildStatus::Processing {
                if let Err(e) = build_dispatch::complete_build(pool, task.build_id).await {
                    error!(build_id = %task.build_id, error = %e, "failed to mark build completed");
                }
            }
        }
    }
}

/// Commit a SUCCESS outcome as a single transaction: artifacts, the task's
/// own completion, and the successor task all land together or not at all,
/// so a crash mid-commit never leaves a `completed` task with no successor
/// (or artifacts orphaned against a task that never finished).
async fn commit_success(
    pool: &PgPool,
    task: &Task,
    worker_id: &str,
    persisted_artifacts: Vec<Artifact>,
    next_task: Option<(TaskKind, serde_json::Value)>,
) -> anyhow::Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start task-completion transaction")?;

    for artifact in persisted_artifacts {
        persist_artifact(&mut tx, task.build_id, artifact).await?;
    }

    tasks::complete_success_in_tx(&mut tx, task.id, worker_id).await?;

    if let Some((kind, payload)) = next_task {
        tasks::insert_next_task_in_tx(&mut tx, task.build_id, kind, payload, patchwright_db::models::DEFAULT_MAX_ATTEMPTS)
            .await?;
    }

    tx.commit().await.context("failed to commit task completion")?;
    Ok(())
}

async fn persist_artifact(conn: &mut sqlx::PgConnection, build_id: Uuid, artifact: Artifact) -> anyhow::Result<()> {
    match artifact {
        Artifact::Plan { summary, steps } => {
            plans::insert_plan(conn, build_id, &summary, steps).await?;
        }
        Artifact::CandidateFile {
            file_path,
            rank_score,
            reason,
        } => {
            candidate_files::insert_candidate_file(
                conn,
                candidate_files::NewCandidateFile {
                    build_id,
                    file_path,
                    rank_score,
                    reason,
                },
            )
            .await?;
        }
        Artifact::Patch {
            file_path,
            diff,
            applied,
            apply_log,
        } => {
            patches::insert_patch(
                conn,
                patches::NewPatch {
                    build_id,
                    file_path,
                    diff,
                    applied,
                    apply_log,
                },
            )
            .await?;
        }
        Artifact::Validation {
            kind,
            exit_code,
            stdout,
            stderr,
        } => {
            validations::insert_validation(
                conn,
                validations::NewValidation {
                    build_id,
                    kind,
                    exit_code,
                    stdout,
                    stderr,
                },
            )
            .await?;
        }
        Artifact::PullRequest {
            branch_name,
            pr_number,
            url,
            status,
        } => {
            pull_requests::insert_pull_request(
                conn,
                pull_requests::NewPullRequest {
                    build_id,
                    branch_name,
                    pr_number,
                    url,
                    status,
                },
            )
            .await?;
        }
    }
    Ok(())
}

async fn handle_retry(
    pool: &PgPool,
    config: &DispatcherConfig,
    task: &Task,
    worker_id: &str,
    error: String,
    retry_after: Option<StdDuration>,
) {
    if task.attempt < task.max_attempts {
        let delay = retry_after.unwrap_or_else(|| backoff(task.attempt, config.backoff_base, config.backoff_max));
        let not_before = chrono::Utc::now()
            + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero());

        if let Err(e) = tasks::retry_pending(pool, task.id, worker_id, &error, not_before).await {
            warn!(task_id = %task.id, error = %e, "failed to re-enqueue task for retry (lease lost?)");
        }
        return;
    }

    if let Err(e) = commit_dead_letter(pool, task, worker_id, &error).await {
        warn!(task_id = %task.id, error = %e, "failed to commit dead-letter (lease lost?)");
    }
}

/// Commit an exhausted-retries outcome atomically: the task's dead-letter,
/// the build's `manual_intervention_required` transition, and the terminal
/// `NOTIFY` task all land in one transaction (mirrors [`commit_success`]).
async fn commit_dead_letter(pool: &PgPool, task: &Task, worker_id: &str, error: &str) -> anyhow::Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start dead-letter-commit transaction")?;

    tasks::dead_letter_in_tx(&mut tx, task.id, worker_id, error).await?;
    build_dispatch::require_manual_intervention_in_tx(&mut tx, task.build_id).await?;

    let payload = serde_json::json!({ "cause": format!("manual intervention required: {error}") });
    tasks::insert_next_task_in_tx(&mut tx, task.build_id, TaskKind::Notify, payload, patchwright_db::models::DEFAULT_MAX_ATTEMPTS)
        .await?;

    tx.commit().await.context("failed to commit dead-letter")?;
    Ok(())
}

async fn handle_failed(pool: &PgPool, task: &Task, worker_id: &str, error: String) {
    if let Err(e) = commit_failure(pool, task, worker_id, &error).await {
        warn!(task_id = %task.id, error = %e, "failed to commit task failure (lease lost?)");
    }
}

/// Commit a FAILED outcome atomically: the task's own failure, the build's
/// `failed` transition, and the terminal `NOTIFY` task (mirrors
/// [`commit_success`]).
async fn commit_failure(pool: &PgPool, task: &Task, worker_id: &str, error: &str) -> anyhow::Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start failure-commit transaction")?;

    tasks::fail_in_tx(&mut tx, task.id, worker_id, error).await?;
    build_dispatch::fail_build_in_tx(&mut tx, task.build_id).await?;

    let payload = serde_json::json!({ "cause": error });
    tasks::insert_next_task_in_tx(&mut tx, task.build_id, TaskKind::Notify, payload, patchwright_db::models::DEFAULT_MAX_ATTEMPTS)
        .await?;

    tx.commit().await.context("failed to commit task failure")?;
    Ok(())
}

async fn finish_terminal_failure(pool: &PgPool, task: &Task, worker_id: &str, build: &Build, reason: &str) {
    if let Err(e) = commit_terminal_failure(pool, task, worker_id, build, reason).await {
        warn!(task_id = %task.id, error = %e, "failed to commit terminal failure (lease lost?)");
    }
}

/// Commit the no-agent-registered outcome atomically: the task's failure,
/// the build's transition(s) into `failed`, and the terminal `NOTIFY` task.
/// The build may still be `received` (the dispatcher hadn't yet flipped it
/// to `processing` before discovering the missing agent), in which case it
/// is walked through `processing` first to keep the transition graph legal.
async fn commit_terminal_failure(
    pool: &PgPool,
    task: &Task,
    worker_id: &str,
    build: &Build,
    reason: &str,
) -> anyhow::Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start terminal-failure transaction")?;

    tasks::fail_in_tx(&mut tx, task.id, worker_id, reason).await?;

    if build.status == BuildStatus::Received {
        build_dispatch::start_processing_in_tx(&mut tx, build.id).await?;
    }
    if build.status == BuildStatus::Received || build.status == BuildStatus::Processing {
        build_dispatch::fail_build_in_tx(&mut tx, build.id).await?;
    }

    let payload = serde_json::json!({ "cause": reason });
    tasks::insert_next_task_in_tx(&mut tx, build.id, TaskKind::Notify, payload, patchwright_db::models::DEFAULT_MAX_ATTEMPTS)
        .await?;

    tx.commit().await.context("failed to commit terminal failure")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_monotonic_in_attempt_before_clamp() {
        let base = StdDuration::from_secs(1);
        let max = StdDuration::from_secs(1000);
        // With jitter in [0.5, 1.5], attempt 4's lower bound exceeds attempt
        // 1's upper bound, so repeated sampling should show growth.
        let low = backoff(1, base, max);
        let high = backoff(6, base, max);
        assert!(high > low);
    }

    #[test]
    fn backoff_clamps_to_max() {
        let base = StdDuration::from_secs(1);
        let max = StdDuration::from_secs(5);
        for attempt in 1..20 {
            assert!(backoff(attempt, base, max) <= max);
        }
    }

    #[test]
    fn backoff_never_negative_for_first_attempt() {
        let base = StdDuration::from_secs(2);
        let max = StdDuration::from_secs(100);
        assert!(backoff(1, base, max) >= StdDuration::from_secs(1));
    }
}
