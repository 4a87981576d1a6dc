pub mod executor;
pub mod policy;
pub mod runtime;

pub use executor::outcome::{BatchSummary, DeadlineScope, RunnerError, TaskOutcome};
pub use executor::probe::ProbeReport;
pub use executor::runner::{run, BoundedRetryRunner};
pub use executor::task::{
    boxed_task, task_event_channel, BoxedTask, TaskEvent, TaskEventReceiver, TaskEventSender,
    TaskState,
};
pub use policy::backoff::BackoffSchedule;
pub use policy::classify::{user_message, FailureKind, RetryPredicate};
pub use runtime::config::{RunnerConfig, RunnerConfigBuilder, RunnerConfigParams};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
