//! Records of individual task invocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{RunId, TaskName};

/// Structured outcome of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Body succeeded; the normal schedule resumes.
    Success,
    /// Body failed inside the retry budget; re-invoke soon.
    Retry,
    /// Body failed and the budget is spent for this period.
    Failure,
}

impl Outcome {
    /// Stable string form used by persistent backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Retry => "retry",
            Outcome::Failure => "failure",
        }
    }

    /// Parse the string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Outcome::Success),
            "retry" => Some(Outcome::Retry),
            "failure" => Some(Outcome::Failure),
            _ => None,
        }
    }
}

/// One completed execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    /// Unique run identifier.
    pub id: RunId,
    /// Task this run belongs to.
    pub name: TaskName,
    /// Failures recorded in the period before this run started.
    pub attempt: u32,
    /// Result of the run.
    pub outcome: Outcome,
    /// When the body started.
    pub started_at: DateTime<Utc>,
    /// When the outcome was recorded.
    pub finished_at: DateTime<Utc>,
    /// Error message for failed runs.
    pub error: Option<String>,
}
