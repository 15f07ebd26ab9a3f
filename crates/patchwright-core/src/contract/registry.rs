//! Maps task kinds to the agent that handles them.

use std::collections::HashMap;
use std::fmt;

use patchwright_db::models::TaskKind;

use super::Agent;

/// A concrete mapping initialized at startup -- no runtime discovery.
/// Missing a mapping for a kind is a terminal `FAILED(NO_AGENT_REGISTERED)`,
/// handled by the dispatcher rather than by this type.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<TaskKind, Box<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: TaskKind, agent: Box<dyn Agent>) {
        self.agents.insert(kind, agent);
    }

    pub fn get(&self, kind: TaskKind) -> Option<&dyn Agent> {
        self.agents.get(&kind).map(|boxed| boxed.as_ref())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        self.agents.keys().copied().collect()
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::contract::{AgentResult, BuildContext};

    struct StubAgent;

    #[async_trait]
    impl Agent for StubAgent {
        async fn handle(&self, _ctx: &BuildContext, _payload: &Value) -> AgentResult {
            AgentResult::Failed {
                error: "stub".to_owned(),
            }
        }
    }

    #[test]
    fn empty_registry_has_no_kinds() {
        let registry = AgentRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.get(TaskKind::Plan).is_none());
    }

    #[test]
    fn register_and_get_roundtrip() {
        let mut registry = AgentRegistry::new();
        registry.register(TaskKind::Plan, Box::new(StubAgent));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(TaskKind::Plan).is_some());
        assert!(registry.get(TaskKind::Retrieve).is_none());
    }
}
