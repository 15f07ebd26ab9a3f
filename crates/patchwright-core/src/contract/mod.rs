//! The agent contract: a uniform call surface every pluggable agent
//! (planner, retriever, patcher, validator, PR-maker, notifier) satisfies,
//! plus the registry that maps task kinds to implementations.

pub mod registry;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patchwright_db::models::{TaskKind, ValidationKind};
use serde_json::Value;
use uuid::Uuid;

pub use registry::AgentRegistry;

/// Read-only snapshot of a build, passed to every agent invocation.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub build_id: Uuid,
    pub job: String,
    pub build_number: i64,
    pub branch: String,
    pub repository_url: String,
    pub commit_sha: String,
    pub ingress_payload: Value,
    /// The attempt number of the task currently being handled (1-based).
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
}

/// A non-Task entity an agent persists as a side effect of a successful
/// `handle` call. The dispatcher writes these in the same transaction as
/// the task completion.
#[derive(Debug, Clone)]
pub enum Artifact {
    Plan {
        summary: String,
        steps: Value,
    },
    CandidateFile {
        file_path: String,
        rank_score: f64,
        reason: String,
    },
    Patch {
        file_path: String,
        diff: String,
        applied: bool,
        apply_log: Option<String>,
    },
    Validation {
        kind: ValidationKind,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    PullRequest {
        branch_name: String,
        pr_number: i64,
        url: String,
        status: String,
    },
}

/// The outcome of one `Agent::handle` call.
#[derive(Debug, Clone)]
pub enum AgentResult {
    /// The agent finished its work. `next_tasks` names the successor stage
    /// or stages to enqueue; in practice the pipeline is a strict chain, so
    /// the dispatcher treats more than one successor as a programming error
    /// (see [`crate::dispatcher`]).
    Success {
        next_tasks: Vec<(TaskKind, Value)>,
        persisted_artifacts: Vec<Artifact>,
    },
    /// Transient failure; the dispatcher will re-enqueue the task with
    /// backoff, up to the task's `max_attempts`.
    Retry {
        error: String,
        retry_after: Option<Duration>,
    },
    /// Permanent failure; the task and its build end in a terminal state.
    Failed { error: String },
}

/// A pluggable handler for one task kind.
///
/// Implementations must be safe under at-least-once replay: either detect
/// prior completion via persisted artifacts and short-circuit, or perform
/// externally-idempotent actions. The dispatcher provides no automatic
/// dedup beyond "an agent runs at most once per lease."
#[async_trait]
pub trait Agent: Send + Sync {
    async fn handle(&self, ctx: &BuildContext, payload: &Value) -> AgentResult;
}

// Compile-time proof that `Agent` is object-safe, matching the assertion
// pattern used for the harness trait this contract is modeled on.
const _: () = {
    fn assert_object_safe(_: &dyn Agent) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAgent;

    #[async_trait]
    impl Agent for NoopAgent {
        async fn handle(&self, _ctx: &BuildContext, _payload: &Value) -> AgentResult {
            AgentResult::Success {
                next_tasks: vec![],
                persisted_artifacts: vec![],
            }
        }
    }

    fn sample_ctx() -> BuildContext {
        BuildContext {
            build_id: Uuid::nil(),
            job: "svc".to_owned(),
            build_number: 1,
            branch: "main".to_owned(),
            repository_url: "https://example.invalid/svc.git".to_owned(),
            commit_sha: "abc123".to_owned(),
            ingress_payload: Value::Null,
            attempt: 1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn noop_agent_is_object_safe_and_callable() {
        let agent: Box<dyn Agent> = Box::new(NoopAgent);
        let result = agent.handle(&sample_ctx(), &Value::Null).await;
        assert!(matches!(result, AgentResult::Success { .. }));
    }
}
