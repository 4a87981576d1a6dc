use crate::policy::classify::FailureKind;
use anyhow::Result;
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

pub type TaskFuture<T> = BoxFuture<'static, Result<T>>;

/// Type-erased task, for batches that mix different closures.
pub type BoxedTask<T> = Box<dyn FnMut() -> TaskFuture<T> + Send>;

pub fn boxed_task<T, F, Fut>(mut task: F) -> BoxedTask<T>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Box::new(move || Box::pin(task()))
}

/// Lifecycle position of a task inside a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    RetryScheduled,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Admitted {
        index: usize,
        attempt: usize,
    },
    RetryScheduled {
        index: usize,
        attempt: usize,
        delay: Duration,
    },
    /// The retry delay elapsed and the task is waiting for a free slot.
    Requeued {
        index: usize,
    },
    Succeeded {
        index: usize,
        attempts: usize,
    },
    Failed {
        index: usize,
        attempts: usize,
        kind: FailureKind,
    },
}

impl TaskEvent {
    pub fn index(&self) -> usize {
        match self {
            TaskEvent::Admitted { index, .. }
            | TaskEvent::RetryScheduled { index, .. }
            | TaskEvent::Requeued { index }
            | TaskEvent::Succeeded { index, .. }
            | TaskEvent::Failed { index, .. } => *index,
        }
    }

    /// State the task entered when this event was emitted.
    pub fn state(&self) -> TaskState {
        match self {
            TaskEvent::Admitted { .. } => TaskState::Running,
            TaskEvent::RetryScheduled { .. } => TaskState::RetryScheduled,
            TaskEvent::Requeued { .. } => TaskState::Queued,
            TaskEvent::Succeeded { .. } => TaskState::Succeeded,
            TaskEvent::Failed { .. } => TaskState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state(), TaskState::Succeeded | TaskState::Failed)
    }
}

pub type TaskEventSender = mpsc::UnboundedSender<TaskEvent>;
pub type TaskEventReceiver = mpsc::UnboundedReceiver<TaskEvent>;

pub fn task_event_channel() -> (TaskEventSender, TaskEventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn boxed_task_can_be_invoked_repeatedly() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_task = calls.clone();
        let mut task = boxed_task(move || {
            let calls = calls_for_task.clone();
            async move { Ok(calls.fetch_add(1, Ordering::SeqCst)) }
        });

        assert_eq!(task().await.unwrap(), 0);
        assert_eq!(task().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn events_map_to_lifecycle_states() {
        let admitted = TaskEvent::Admitted {
            index: 3,
            attempt: 1,
        };
        assert_eq!(admitted.index(), 3);
        assert_eq!(admitted.state(), TaskState::Running);
        assert!(!admitted.is_terminal());

        let requeued = TaskEvent::Requeued { index: 1 };
        assert_eq!(requeued.state(), TaskState::Queued);

        let failed = TaskEvent::Failed {
            index: 0,
            attempts: 3,
            kind: FailureKind::Overloaded,
        };
        assert_eq!(failed.state(), TaskState::Failed);
        assert!(failed.is_terminal());
    }
}
