//! Task references and the task status state machine.
//!
//! The bus never executes tasks. It only tracks which agent owns which task
//! and the last status that agent reported, so it can hand unfinished work to
//! someone else when the owner goes silent.

use serde::{Deserialize, Serialize};

/// Lifecycle of a task as reported by its owning agent.
///
/// ```text
/// NOT_STARTED -> IN_PROGRESS -> COMPLETED | FAILED | CANCELLED   (terminal)
///                IN_PROGRESS -> BLOCKED | WAITING_FOR_DEPENDENCY
///     BLOCKED | WAITING_FOR_DEPENDENCY -> IN_PROGRESS
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Blocked,
    WaitingForDependency,
}

impl TaskStatus {
    /// Completed, failed and cancelled tasks never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether a status report may move a task from `self` to `next`.
    ///
    /// Re-reporting the current status is always accepted.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        if self == next {
            return true;
        }
        match self {
            NotStarted => next == InProgress,
            InProgress => matches!(
                next,
                Completed | Failed | Cancelled | Blocked | WaitingForDependency
            ),
            Blocked | WaitingForDependency => next == InProgress,
            Completed | Failed | Cancelled => false,
        }
    }
}

/// The bus's record of one task assigned to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
}

impl TaskRef {
    pub fn new(task_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            status: TaskStatus::NotStarted,
        }
    }
}
