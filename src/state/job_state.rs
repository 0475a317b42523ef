/// Job state definitions for the persisted job state machine
///
/// The legal trajectory is `Pending -> Running -> {Completed | Pending (retry) |
/// DeadLettered}`. `Cancelled` is reachable from `Pending` and `Running`, and an
/// operator may return a `DeadLettered` job to `Pending`.
use serde::Serialize;
use std::fmt;

/// Represents the current state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    // ===== Active States =====
    /// Waiting for a worker (possibly until `next_retry_at`)
    Pending,

    /// Leased to exactly one worker
    Running,

    // ===== Terminal States =====
    /// Acked by its worker
    Completed,

    /// Retries exhausted or failed permanently; needs operator intervention
    DeadLettered,

    /// Withdrawn by a caller before it completed
    Cancelled,
}

impl JobState {
    /// Returns true if no worker will ever pick this job up again on its own
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Returns true if the job is still owned by the queue
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true if moving from `self` to `next` follows the state graph
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Pending)
                | (Running, DeadLettered)
                | (Running, Cancelled)
                | (DeadLettered, Pending)
        )
    }

    /// Converts the job state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::DeadLettered => "dead_lettered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a job state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "dead_lettered" => Some(Self::DeadLettered),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns all job states
    pub fn all_states() -> [Self; 5] {
        [
            Self::Pending,
            Self::Running,
            Self::Completed,
            Self::DeadLettered,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
