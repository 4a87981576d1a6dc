//! Bounded-concurrency batch execution. A single driver future owns the
//! admission window, the ready queue and the retry timers, so the running
//! count and the result slots are only ever touched from one place.

use super::log::{BatchLog, RunMessages, BATCH_RUN};
use super::outcome::{DeadlineScope, RunnerError, TaskOutcome};
use super::results::OrderedResults;
use super::task::{TaskEvent, TaskEventSender};
use crate::policy::classify::FailureKind;
use crate::runtime::config::RunnerConfig;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use anyhow::{anyhow, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::future::{pending, Future};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// How one admitted attempt ended. Only `DeadlineElapsed` is produced by the
/// runner; task errors always go through the retry predicate.
enum Attempt<T> {
    Finished(Result<T>),
    DeadlineElapsed,
}

/// Runs batches of independent tasks with at most `max_concurrency` attempts
/// in flight, retrying retryable failures with exponential backoff.
pub struct BoundedRetryRunner {
    config: RunnerConfig,
    telemetry: Arc<Telemetry>,
    events: Option<TaskEventSender>,
    shutdown: CancellationToken,
}

impl BoundedRetryRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            telemetry: Arc::new(Telemetry::default()),
            events: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Shares an existing telemetry sink, e.g. across several runners.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Streams lifecycle events of every batch run to `events`.
    pub fn with_events(mut self, events: TaskEventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Uses `token` as the root cancellation token. Cancelling it resolves
    /// every pending task of the current run as cancelled.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Installs a fresh root token so runs can resume after a cancellation.
    pub fn reset_cancellation_token(&mut self) {
        self.shutdown = CancellationToken::new();
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Runs every task to a terminal outcome. The returned vector has one
    /// entry per task, at the task's input index.
    pub async fn run<T, F, Fut>(&self, tasks: Vec<F>) -> Vec<TaskOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.drive(tasks, &self.shutdown, &BATCH_RUN, self.events.as_ref())
            .await
    }

    /// Runs a single task with the configured retry policy.
    pub async fn run_one<T, F, Fut>(&self, task: F) -> TaskOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(vec![task])
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| TaskOutcome::Failure(anyhow!("single-task run produced no outcome")))
    }

    /// Runs a batch and cancels whatever is still pending when Ctrl-C (SIGINT)
    /// is received.
    pub async fn run_until_ctrl_c<T, F, Fut>(&self, tasks: Vec<F>) -> Vec<TaskOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = self.shutdown.child_token();
        let run = self.drive(tasks, &token, &BATCH_RUN, self.events.as_ref());
        tokio::pin!(run);

        tokio::select! {
            outcomes = &mut run => outcomes,
            signal = signal::ctrl_c() => {
                match signal {
                    Ok(()) => {
                        tracing::info!(
                            batch = self.config.label(),
                            "Ctrl-C received; cancelling pending tasks"
                        );
                        token.cancel();
                    }
                    Err(err) => {
                        tracing::warn!(
                            batch = self.config.label(),
                            error = %err,
                            "failed to listen for Ctrl-C; batch continues uncancellable by signal"
                        );
                    }
                }
                run.await
            }
        }
    }

    pub(crate) async fn drive<T, F, Fut>(
        &self,
        mut tasks: Vec<F>,
        cancel: &CancellationToken,
        messages: &RunMessages,
        events: Option<&TaskEventSender>,
    ) -> Vec<TaskOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let log = BatchLog::new(self.config.label(), messages);
        let max_concurrency = self.config.max_concurrency();
        let max_attempts = self.config.max_attempts();
        let backoff = self.config.backoff();

        let mut results = OrderedResults::new(tasks.len());
        let total = results.len();
        self.telemetry.record_submitted(total);
        log.log_started(total, max_concurrency);

        let started = Instant::now();
        let batch_deadline = self
            .config
            .batch_deadline()
            .map(|deadline| instant_after(started, deadline));
        let mut attempts = vec![0usize; total];
        let mut task_deadlines: Vec<Option<Instant>> = vec![None; total];
        let mut ready: VecDeque<usize> = (0..total).collect();
        let mut running = FuturesUnordered::new();
        let mut delayed = FuturesUnordered::new();
        let mut expiries = FuturesUnordered::new();

        let reporter_shutdown = CancellationToken::new();
        let reporter = self
            .config
            .metrics_interval()
            .filter(|_| total > 0)
            .map(|interval| {
                spawn_metrics_reporter(
                    self.config.label().to_owned(),
                    self.telemetry.clone(),
                    reporter_shutdown.clone(),
                    interval,
                )
            });

        while !results.is_complete() {
            if cancel.is_cancelled() {
                self.abandon(
                    &mut results,
                    &attempts,
                    running.len(),
                    RunnerError::Cancelled,
                    &log,
                    events,
                );
                break;
            }

            if batch_deadline.is_some_and(|deadline| deadline <= Instant::now()) {
                self.abandon(
                    &mut results,
                    &attempts,
                    running.len(),
                    RunnerError::TimedOut {
                        scope: DeadlineScope::Batch,
                    },
                    &log,
                    events,
                );
                break;
            }

            while running.len() < max_concurrency {
                let Some(index) = ready.pop_front() else {
                    break;
                };

                let now = Instant::now();
                if attempts[index] == 0 {
                    task_deadlines[index] = self
                        .config
                        .task_timeout()
                        .map(|timeout| instant_after(now, timeout));
                    if let Some(deadline) = task_deadlines[index] {
                        expiries.push(async move {
                            sleep_until(deadline).await;
                            index
                        });
                    }
                }

                let deadline = task_deadlines[index];
                if deadline.is_some_and(|deadline| deadline <= now) {
                    self.record_task_timeout(&mut results, index, attempts[index], &log, events);
                    continue;
                }

                attempts[index] += 1;
                let attempt = attempts[index];
                self.telemetry.record_admission();
                log.log_admitted(index, attempt, running.len() + 1);
                emit(events, TaskEvent::Admitted { index, attempt });

                let task = &mut tasks[index];
                let call = task();
                running.push(async move {
                    let result = match deadline {
                        Some(deadline) => timeout_at(deadline, call)
                            .await
                            .map_or(Attempt::DeadlineElapsed, Attempt::Finished),
                        None => Attempt::Finished(call.await),
                    };
                    (index, attempt, result)
                });
            }

            if running.is_empty() && delayed.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                _ = wait_until(batch_deadline) => continue,
                Some((index, attempt, result)) = running.next(), if !running.is_empty() => {
                    self.telemetry.record_release(1);
                    match result {
                        Attempt::DeadlineElapsed => {
                            self.record_task_timeout(&mut results, index, attempt, &log, events);
                        }
                        Attempt::Finished(Ok(value)) => {
                            self.telemetry.record_success();
                            log.log_succeeded(index, attempt);
                            emit(events, TaskEvent::Succeeded { index, attempts: attempt });
                            results.record(index, TaskOutcome::Success(value));
                        }
                        Attempt::Finished(Err(err)) => {
                            let retryable = self.config.is_retryable(&err);

                            if retryable && attempt < max_attempts {
                                let delay = backoff.delay_for(attempt);
                                self.telemetry.record_retry();
                                log.log_retry(index, attempt, delay, &err);
                                emit(events, TaskEvent::RetryScheduled { index, attempt, delay });

                                let mut wake_at = instant_after(Instant::now(), delay);
                                if let Some(deadline) = task_deadlines[index] {
                                    wake_at = wake_at.min(deadline);
                                }
                                delayed.push(async move {
                                    sleep_until(wake_at).await;
                                    index
                                });
                                continue;
                            }

                            self.telemetry.record_failure();
                            if retryable {
                                log.log_exhausted(index, attempt, &err);
                            } else {
                                log.log_terminal(index, attempt, &err);
                            }

                            emit(
                                events,
                                TaskEvent::Failed {
                                    index,
                                    attempts: attempt,
                                    kind: FailureKind::classify(&err),
                                },
                            );
                            results.record(index, TaskOutcome::Failure(err));
                        }
                    }
                }
                Some(index) = delayed.next(), if !delayed.is_empty() => {
                    if task_deadlines[index].is_some_and(|deadline| deadline <= Instant::now()) {
                        self.record_task_timeout(&mut results, index, attempts[index], &log, events);
                    } else {
                        emit(events, TaskEvent::Requeued { index });
                        ready.push_back(index);
                    }
                }
                Some(index) = expiries.next(), if !expiries.is_empty() => {
                    // Running and delayed tasks observe their own deadline.
                    if let Some(position) = ready.iter().position(|&queued| queued == index) {
                        ready.remove(position);
                        self.record_task_timeout(&mut results, index, attempts[index], &log, events);
                    }
                }
            }
        }

        drop(running);
        drop(delayed);
        drop(expiries);

        reporter_shutdown.cancel();
        if let Some(handle) = reporter {
            if let Err(err) = handle.await {
                tracing::warn!(batch = self.config.label(), error = %err, "metrics reporter task failed");
            }
        }

        let outcomes = results.into_outcomes();
        let succeeded = outcomes.iter().filter(|outcome| outcome.is_success()).count();
        log.log_finished(succeeded, total - succeeded, started.elapsed());
        outcomes
    }

    fn record_task_timeout<T>(
        &self,
        results: &mut OrderedResults<T>,
        index: usize,
        attempts: usize,
        log: &BatchLog<'_>,
        events: Option<&TaskEventSender>,
    ) {
        let error = RunnerError::TimedOut {
            scope: DeadlineScope::Task,
        };
        if results.record(index, TaskOutcome::Failure(error.into())) {
            self.telemetry.record_timeout();
            log.log_timed_out(&[index]);
            emit(
                events,
                TaskEvent::Failed {
                    index,
                    attempts,
                    kind: FailureKind::TimedOut,
                },
            );
        }
    }

    /// Records every non-terminal task as failed with `error`. In-flight
    /// attempts are dropped by the caller right after.
    fn abandon<T>(
        &self,
        results: &mut OrderedResults<T>,
        attempts: &[usize],
        in_flight: usize,
        error: RunnerError,
        log: &BatchLog<'_>,
        events: Option<&TaskEventSender>,
    ) {
        self.telemetry.record_release(in_flight);
        let failed = results.fail_pending(|| error.into());
        let kind = match error {
            RunnerError::TimedOut { .. } => FailureKind::TimedOut,
            RunnerError::Cancelled => FailureKind::Cancelled,
        };

        for &index in &failed {
            match error {
                RunnerError::TimedOut { .. } => self.telemetry.record_timeout(),
                RunnerError::Cancelled => self.telemetry.record_cancellation(),
            }
            emit(
                events,
                TaskEvent::Failed {
                    index,
                    attempts: attempts.get(index).copied().unwrap_or_default(),
                    kind,
                },
            );
        }

        match error {
            RunnerError::TimedOut { .. } => log.log_timed_out(&failed),
            RunnerError::Cancelled => log.log_cancelled(&failed),
        }
    }
}

/// Runs `tasks` with a one-off runner built from `config`.
pub async fn run<T, F, Fut>(tasks: Vec<F>, config: RunnerConfig) -> Vec<TaskOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    BoundedRetryRunner::new(config).run(tasks).await
}

fn emit(events: Option<&TaskEventSender>, event: TaskEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

fn instant_after(start: Instant, delay: Duration) -> Instant {
    start
        .checked_add(delay)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}
