//! A deterministic [`Agent`] implementation driven by a pre-recorded script
//! of results, for dispatcher and end-to-end tests that need specific
//! success/retry/failure sequences without a real planner, patcher, or CI
//! runner behind them.

use async_trait::async_trait;
use patchwright_core::contract::{Agent, AgentResult, BuildContext};
use serde_json::Value;
use tokio::sync::Mutex;

/// Replays `results` in order, one per `handle` call; fails closed with
/// `AgentResult::Failed { error: "SCRIPTED_AGENT_EXHAUSTED" }` once the
/// script runs out, rather than panicking, so a dispatcher loop that polls
/// past the end of a short script degrades to a terminal failure instead of
/// crashing the test.
pub struct ScriptedAgent {
    results: Mutex<Vec<AgentResult>>,
}

impl ScriptedAgent {
    /// `results` is consumed front-to-back: index 0 is returned on the first
    /// call, index 1 on the second, and so on.
    pub fn new(results: Vec<AgentResult>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().rev().collect()),
        }
    }

    /// Convenience for a script that always reports the same terminal result.
    pub fn always(result: AgentResult) -> Self {
        Self::new(vec![result])
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn handle(&self, _ctx: &BuildContext, _payload: &Value) -> AgentResult {
        let mut results = self.results.lock().await;
        match results.pop() {
            Some(result) => result,
            None => AgentResult::Failed {
                error: "SCRIPTED_AGENT_EXHAUSTED".to_owned(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn ctx() -> BuildContext {
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
    async fn replays_results_in_order() {
        let agent = ScriptedAgent::new(vec![
            AgentResult::Retry {
                error: "first".to_owned(),
                retry_after: None,
            },
            AgentResult::Success {
                next_tasks: vec![],
                persisted_artifacts: vec![],
            },
        ]);

        let first = agent.handle(&ctx(), &Value::Null).await;
        assert!(matches!(first, AgentResult::Retry { .. }));

        let second = agent.handle(&ctx(), &Value::Null).await;
        assert!(matches!(second, AgentResult::Success { .. }));
    }

    #[tokio::test]
    async fn exhausted_script_fails_closed() {
        let agent = ScriptedAgent::new(vec![]);
        let result = agent.handle(&ctx(), &Value::Null).await;
        assert!(matches!(result, AgentResult::Failed { .. }));
    }
}
