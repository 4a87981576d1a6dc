//! Batch execution: the bounded retry runner, its ordered result slots, task
//! lifecycle events and the sequential candidate probe.

mod log;
pub mod outcome;
pub mod probe;
mod results;
pub mod runner;
pub mod task;

pub use outcome::{BatchSummary, DeadlineScope, RunnerError, TaskOutcome};
pub use probe::ProbeReport;
pub use runner::{run, BoundedRetryRunner};
pub use task::{
    boxed_task, task_event_channel, BoxedTask, TaskEvent, TaskEventReceiver, TaskEventSender,
    TaskFuture, TaskState,
};
