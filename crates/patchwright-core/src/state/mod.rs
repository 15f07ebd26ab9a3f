//! Build and task state machines.
//!
//! These types hold the *valid transition graphs* from the spec (pure,
//! side-effect-free predicates) used to guard the I/O-performing
//! transitions in [`crate::dispatcher`] and in [`dispatch`]'s semantic
//! wrappers over the build state machine. Task transitions themselves are
//! executed by `patchwright-db::queries::tasks`, whose lease-owner check
//! subsumes the optimistic-locking role this module plays for builds.

pub mod dispatch;

use patchwright_db::models::{BuildStatus, TaskStatus};

/// The task state machine:
///
/// ```text
/// pending      -> in_progress  (leased)
/// in_progress  -> completed    (agent success)
/// in_progress  -> pending      (agent retry, attempt < max, or lease expiry)
/// in_progress  -> dead_letter  (agent retry, attempt >= max)
/// in_progress  -> failed       (agent failure)
/// ```
///
/// `completed`, `failed`, and `dead_letter` are terminal: no edge leaves them.
pub struct TaskStateMachine;

impl TaskStateMachine {
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        matches!(
            (from, to),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Pending)
                | (TaskStatus::InProgress, TaskStatus::DeadLetter)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

/// The build state machine, driven entirely by the dispatcher (never by an
/// agent directly):
///
/// ```text
/// received    -> processing                     (first task leased)
/// processing  -> completed                      (final NOTIFY on success)
/// processing  -> failed                         (any task FAILED)
/// processing  -> manual_intervention_required    (any task DEAD_LETTER)
/// ```
///
/// `completed`, `failed`, and `manual_intervention_required` are terminal.
pub struct BuildStateMachine;

impl BuildStateMachine {
    pub fn is_valid_transition(from: BuildStatus, to: BuildStatus) -> bool {
        matches!(
            (from, to),
            (BuildStatus::Received, BuildStatus::Processing)
                | (BuildStatus::Processing, BuildStatus::Completed)
                | (BuildStatus::Processing, BuildStatus::Failed)
                | (
                    BuildStatus::Processing,
                    BuildStatus::ManualInterventionRequired
                )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_transitions_match_spec_table() {
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Pending,
            TaskStatus::InProgress
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::InProgress,
            TaskStatus::Completed
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::InProgress,
            TaskStatus::Pending
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::InProgress,
            TaskStatus::DeadLetter
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::InProgress,
            TaskStatus::Failed
        ));
    }

    #[test]
    fn terminal_task_states_have_no_outgoing_edges() {
        for terminal in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::DeadLetter,
        ] {
            for to in [
                TaskStatus::Pending,
                TaskStatus::InProgress,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::DeadLetter,
            ] {
                assert!(
                    !TaskStateMachine::is_valid_transition(terminal, to),
                    "{terminal} should have no outgoing edge to {to}"
                );
            }
        }
    }

    #[test]
    fn build_transitions_match_spec_table() {
        assert!(BuildStateMachine::is_valid_transition(
            BuildStatus::Received,
            BuildStatus::Processing
        ));
        assert!(BuildStateMachine::is_valid_transition(
            BuildStatus::Processing,
            BuildStatus::Completed
        ));
        assert!(BuildStateMachine::is_valid_transition(
            BuildStatus::Processing,
            BuildStatus::Failed
        ));
        assert!(BuildStateMachine::is_valid_transition(
            BuildStatus::Processing,
            BuildStatus::ManualInterventionRequired
        ));
    }

    #[test]
    fn terminal_build_states_have_no_outgoing_edges() {
        for terminal in [
            BuildStatus::Completed,
            BuildStatus::Failed,
            BuildStatus::ManualInterventionRequired,
        ] {
            for to in [
                BuildStatus::Received,
                BuildStatus::Processing,
                BuildStatus::Completed,
                BuildStatus::Failed,
                BuildStatus::ManualInterventionRequired,
            ] {
                assert!(!BuildStateMachine::is_valid_transition(terminal, to));
            }
        }
    }
}
