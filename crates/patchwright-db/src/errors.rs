//! Typed errors for the small number of outcomes callers must branch on.
//! Everything else flows through `anyhow::Result`.

use thiserror::Error;
use uuid::Uuid;

/// Failure modes of [`crate::queries::builds::create_build`].
#[derive(Debug, Error)]
pub enum CreateBuildError {
    /// A build with the same `(job, build_number)` already exists.
    #[error("build {job}#{build_number} already exists")]
    Duplicate { job: String, build_number: i64 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure modes of a task state transition (lease, complete, heartbeat).
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The row did not exist at all.
    #[error("task {0} not found")]
    NotFound(Uuid),
    /// The row existed but was not in the expected `from` state, or the
    /// lease was held by a different worker -- the caller lost a race.
    #[error("task {0} is no longer in the expected state")]
    Conflict(Uuid),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
