//! Shared logging context and canned message templates used by the runner so
//! batch runs and candidate probes report attempts in a consistent shape.

use anyhow::Error;
use std::time::Duration;

macro_rules! log_with_batch_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        tracing::$level!(batch = $ctx.label, $($rest)*);
    }};
}

/// Logging labels that describe how a particular operation reports
/// admissions, retries, and terminal failures.
#[derive(Clone, Copy)]
pub(crate) struct RunMessages {
    pub(crate) started: &'static str,
    pub(crate) admitted: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) terminal: &'static str,
    pub(crate) succeeded: &'static str,
    pub(crate) timed_out: &'static str,
    pub(crate) cancelled: &'static str,
    pub(crate) finished: &'static str,
}

#[derive(Clone, Copy)]
pub(crate) struct BatchLog<'a> {
    label: &'a str,
    messages: &'a RunMessages,
}

impl<'a> BatchLog<'a> {
    pub(crate) fn new(label: &'a str, messages: &'a RunMessages) -> Self {
        Self { label, messages }
    }

    pub(crate) fn log_started(&self, tasks: usize, max_concurrency: usize) {
        log_with_batch_ctx!(debug, self, tasks, max_concurrency, "{}", self.messages.started);
    }

    pub(crate) fn log_admitted(&self, task: usize, attempt: usize, in_flight: usize) {
        log_with_batch_ctx!(
            trace,
            self,
            task,
            attempt,
            in_flight,
            "{}",
            self.messages.admitted
        );
    }

    pub(crate) fn log_retry(&self, task: usize, attempt: usize, backoff: Duration, err: &Error) {
        log_with_batch_ctx!(
            warn,
            self,
            task,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            error = %err,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_exhausted(&self, task: usize, attempt: usize, err: &Error) {
        log_with_batch_ctx!(error, self, task, attempt, error = %err, "{}", self.messages.exhausted);
    }

    pub(crate) fn log_terminal(&self, task: usize, attempt: usize, err: &Error) {
        log_with_batch_ctx!(warn, self, task, attempt, error = %err, "{}", self.messages.terminal);
    }

    pub(crate) fn log_succeeded(&self, task: usize, attempt: usize) {
        log_with_batch_ctx!(debug, self, task, attempt, "{}", self.messages.succeeded);
    }

    pub(crate) fn log_timed_out(&self, tasks: &[usize]) {
        if !tasks.is_empty() {
            log_with_batch_ctx!(warn, self, tasks = ?tasks, "{}", self.messages.timed_out);
        }
    }

    pub(crate) fn log_cancelled(&self, tasks: &[usize]) {
        if !tasks.is_empty() {
            log_with_batch_ctx!(warn, self, tasks = ?tasks, "{}", self.messages.cancelled);
        }
    }

    pub(crate) fn log_finished(&self, succeeded: usize, failed: usize, elapsed: Duration) {
        log_with_batch_ctx!(
            info,
            self,
            succeeded,
            failed,
            elapsed_ms = duration_to_millis(elapsed),
            "{}",
            self.messages.finished
        );
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

pub(crate) const BATCH_RUN: RunMessages = RunMessages {
    started: "bounded batch run started",
    admitted: "task attempt admitted",
    retry: "task attempt failed with retryable error; retrying",
    exhausted: "task exhausted retries",
    terminal: "task failed with non-retryable error",
    succeeded: "task attempt succeeded",
    timed_out: "deadline elapsed; recording pending tasks as timed out",
    cancelled: "batch cancelled; recording pending tasks as cancelled",
    finished: "bounded batch run finished",
};

pub(crate) const CANDIDATE_PROBE: RunMessages = RunMessages {
    started: "probing candidate",
    admitted: "candidate attempt admitted",
    retry: "candidate attempt failed with retryable error; retrying",
    exhausted: "candidate exhausted retries",
    terminal: "candidate failed with non-retryable error",
    succeeded: "candidate responded",
    timed_out: "candidate deadline elapsed",
    cancelled: "candidate probe cancelled",
    finished: "candidate probe finished",
};
