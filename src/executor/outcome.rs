use crate::policy::classify::FailureKind;
use anyhow::{Error, Result};

/// Which deadline expired when a task is recorded as timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineScope {
    Task,
    Batch,
}

/// Failures produced by the runner itself rather than by a task. These are
/// never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerError {
    TimedOut { scope: DeadlineScope },
    Cancelled,
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerError::TimedOut {
                scope: DeadlineScope::Task,
            } => write!(f, "task deadline elapsed before the task completed"),
            RunnerError::TimedOut {
                scope: DeadlineScope::Batch,
            } => write!(f, "batch deadline elapsed before the task completed"),
            RunnerError::Cancelled => write!(f, "batch run cancelled before the task completed"),
        }
    }
}

impl std::error::Error for RunnerError {}

/// Final disposition of a single task.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Success(T),
    Failure(Error),
}

impl<T> TaskOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failure(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            TaskOutcome::Success(value) => Some(value),
            TaskOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            TaskOutcome::Success(_) => None,
            TaskOutcome::Failure(err) => Some(err),
        }
    }

    /// Returns the runner-level cause when the runner, not the task, ended it.
    pub fn runner_error(&self) -> Option<&RunnerError> {
        self.error().and_then(|err| err.downcast_ref::<RunnerError>())
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error().map(FailureKind::classify)
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            TaskOutcome::Success(value) => Ok(value),
            TaskOutcome::Failure(err) => Err(err),
        }
    }
}

impl<T> From<Result<T>> for TaskOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => TaskOutcome::Success(value),
            Err(err) => TaskOutcome::Failure(err),
        }
    }
}

/// Per-kind tally of a finished batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub overloaded: usize,
    pub invalid_input: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub other: usize,
}

impl BatchSummary {
    pub fn from_outcomes<T>(outcomes: &[TaskOutcome<T>]) -> Self {
        let mut summary = BatchSummary {
            total: outcomes.len(),
            ..BatchSummary::default()
        };

        for kind in outcomes.iter().map(TaskOutcome::failure_kind) {
            let Some(kind) = kind else {
                summary.succeeded += 1;
                continue;
            };
            summary.failed += 1;
            match kind {
                FailureKind::Overloaded => summary.overloaded += 1,
                FailureKind::InvalidInput => summary.invalid_input += 1,
                FailureKind::TimedOut => summary.timed_out += 1,
                FailureKind::Cancelled => summary.cancelled += 1,
                FailureKind::Other => summary.other += 1,
            }
        }

        summary
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn accessors_reflect_variant() {
        let ok: TaskOutcome<u32> = TaskOutcome::Success(7);
        assert!(ok.is_success());
        assert_eq!(ok.value(), Some(&7));
        assert!(ok.error().is_none());
        assert_eq!(ok.into_result().unwrap(), 7);

        let failed: TaskOutcome<u32> = TaskOutcome::Failure(anyhow!("boom"));
        assert!(failed.is_failure());
        assert!(failed.value().is_none());
        assert!(failed.runner_error().is_none());
        assert_eq!(failed.failure_kind(), Some(FailureKind::Other));
    }

    #[test]
    fn runner_error_is_recoverable() {
        let outcome: TaskOutcome<()> = TaskOutcome::Failure(RunnerError::Cancelled.into());
        assert_eq!(outcome.runner_error(), Some(&RunnerError::Cancelled));
        assert_eq!(
            format!("{}", outcome.error().unwrap()),
            "batch run cancelled before the task completed"
        );
    }

    #[test]
    fn summary_counts_each_kind() {
        let outcomes: Vec<TaskOutcome<u8>> = vec![
            TaskOutcome::Success(1),
            TaskOutcome::Failure(anyhow!("503 Service Unavailable")),
            TaskOutcome::Failure(anyhow!("400 Bad Request")),
            TaskOutcome::Failure(
                RunnerError::TimedOut {
                    scope: DeadlineScope::Task,
                }
                .into(),
            ),
            TaskOutcome::Failure(RunnerError::Cancelled.into()),
            TaskOutcome::Failure(anyhow!("Network error")),
            TaskOutcome::Success(2),
        ];

        let summary = BatchSummary::from_outcomes(&outcomes);
        assert_eq!(
            summary,
            BatchSummary {
                total: 7,
                succeeded: 2,
                failed: 5,
                overloaded: 1,
                invalid_input: 1,
                timed_out: 1,
                cancelled: 1,
                other: 1,
            }
        );
        assert!(!summary.all_succeeded());
    }

    #[test]
    fn empty_batch_counts_as_success() {
        let summary = BatchSummary::from_outcomes::<()>(&[]);
        assert_eq!(summary.total, 0);
        assert!(summary.all_succeeded());
    }
}
