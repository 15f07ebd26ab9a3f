use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a build, driven by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Received,
    Processing,
    Completed,
    Failed,
    ManualInterventionRequired,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::ManualInterventionRequired => "manual_intervention_required",
        };
        f.write_str(s)
    }
}

impl FromStr for BuildStatus {
    type Err = BuildStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "manual_intervention_required" => Ok(Self::ManualInterventionRequired),
            other => Err(BuildStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`BuildStatus`] string.
#[derive(Debug, Clone)]
pub struct BuildStatusParseError(pub String);

impl fmt::Display for BuildStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid build status: {:?}", self.0)
    }
}

impl std::error::Error for BuildStatusParseError {}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::ManualInterventionRequired
        )
    }
}

// ---------------------------------------------------------------------------

/// Kind of task in the remediation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Plan,
    Retrieve,
    Patch,
    Validate,
    CreatePr,
    Notify,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plan => "plan",
            Self::Retrieve => "retrieve",
            Self::Patch => "patch",
            Self::Validate => "validate",
            Self::CreatePr => "create_pr",
            Self::Notify => "notify",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = TaskKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Self::Plan),
            "retrieve" => Ok(Self::Retrieve),
            "patch" => Ok(Self::Patch),
            "validate" => Ok(Self::Validate),
            "create_pr" => Ok(Self::CreatePr),
            "notify" => Ok(Self::Notify),
            other => Err(TaskKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskKind`] string.
#[derive(Debug, Clone)]
pub struct TaskKindParseError(pub String);

impl fmt::Display for TaskKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task kind: {:?}", self.0)
    }
}

impl std::error::Error for TaskKindParseError {}

// ---------------------------------------------------------------------------

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    DeadLetter,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::DeadLetter)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

// ---------------------------------------------------------------------------

/// Kind of validation run against the project's build/test harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Compile,
    Test,
    Build,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Compile => "compile",
            Self::Test => "test",
            Self::Build => "build",
        };
        f.write_str(s)
    }
}

impl FromStr for ValidationKind {
    type Err = ValidationKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compile" => Ok(Self::Compile),
            "test" => Ok(Self::Test),
            "build" => Ok(Self::Build),
            other => Err(ValidationKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ValidationKind`] string.
#[derive(Debug, Clone)]
pub struct ValidationKindParseError(pub String);

impl fmt::Display for ValidationKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid validation kind: {:?}", self.0)
    }
}

impl std::error::Error for ValidationKindParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A build -- one CI job execution the system is asked to fix.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Build {
    pub id: Uuid,
    pub job: String,
    pub build_number: i64,
    pub branch: String,
    pub repository_url: String,
    pub commit_sha: String,
    pub ingress_payload: serde_json::Value,
    pub status: BuildStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A task -- a single unit of work for an agent, owned by a build.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub build_id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub attempt: i32,
    pub max_attempts: i32,
    pub payload: serde_json::Value,
    pub last_error: Option<String>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Default per-task retry budget, matching spec-stated `max-attempts (default 3)`.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// One planning artifact per build.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub build_id: Uuid,
    pub summary: String,
    pub steps: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A file the retriever judges relevant to the fix, ranked by score.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateFile {
    pub id: Uuid,
    pub build_id: Uuid,
    pub file_path: String,
    pub rank_score: f64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// A unified diff proposed by the patcher against a single file.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Patch {
    pub id: Uuid,
    pub build_id: Uuid,
    pub file_path: String,
    pub diff: String,
    pub applied: bool,
    pub apply_log: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The outcome of running the project's own build/test harness.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Validation {
    pub id: Uuid,
    pub build_id: Uuid,
    pub kind: ValidationKind,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub created_at: DateTime<Utc>,
}

impl Validation {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// At most one pull request per build.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PullRequest {
    pub id: Uuid,
    pub build_id: Uuid,
    pub branch_name: String,
    pub pr_number: i64,
    pub url: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_status_display_roundtrip() {
        let variants = [
            BuildStatus::Received,
            BuildStatus::Processing,
            BuildStatus::Completed,
            BuildStatus::Failed,
            BuildStatus::ManualInterventionRequired,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: BuildStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn build_status_invalid() {
        assert!("bogus".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn build_status_terminal() {
        assert!(BuildStatus::Completed.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
        assert!(BuildStatus::ManualInterventionRequired.is_terminal());
        assert!(!BuildStatus::Received.is_terminal());
        assert!(!BuildStatus::Processing.is_terminal());
    }

    #[test]
    fn task_kind_display_roundtrip() {
        let variants = [
            TaskKind::Plan,
            TaskKind::Retrieve,
            TaskKind::Patch,
            TaskKind::Validate,
            TaskKind::CreatePr,
            TaskKind::Notify,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskKind = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_kind_invalid() {
        assert!("bogus".parse::<TaskKind>().is_err());
    }

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::DeadLetter,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("nope".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_status_terminal_and_active() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::DeadLetter.is_terminal());
        assert!(TaskStatus::Pending.is_active());
        assert!(TaskStatus::InProgress.is_active());
        assert!(!TaskStatus::Completed.is_active());
    }

    #[test]
    fn validation_kind_display_roundtrip() {
        let variants = [
            ValidationKind::Compile,
            ValidationKind::Test,
            ValidationKind::Build,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: ValidationKind = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn validation_kind_invalid() {
        assert!("magic".parse::<ValidationKind>().is_err());
    }

    #[test]
    fn validation_succeeded_iff_zero_exit() {
        let base = Validation {
            id: Uuid::nil(),
            build_id: Uuid::nil(),
            kind: ValidationKind::Test,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            created_at: Utc::now(),
        };
        assert!(base.succeeded());
        let mut failing = base.clone();
        failing.exit_code = 1;
        assert!(!failing.succeeded());
    }
}
