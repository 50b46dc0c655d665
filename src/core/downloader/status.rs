use serde::Serialize;

/// Lifecycle of a fetch unit, and the result type every pipeline stage reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    InProgress,
    Finished,
    Failed,
}

impl JobStatus {
    /// `Finished` and `Failed` are terminal; nothing moves a unit out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::NotStarted => write!(f, "not started"),
            JobStatus::InProgress => write!(f, "in progress"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}
