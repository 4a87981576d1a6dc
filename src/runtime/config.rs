use crate::policy::backoff::BackoffSchedule;
use crate::policy::classify::{marker_predicate, transient_markers, RetryPredicate};
use anyhow::{bail, Context, Error, Result};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_LABEL: &str = "batch";
const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_JITTER_MS: u64 = 1_000;

const ENV_PREFIX: &str = "BOUNDRUN_";

/// Runtime configuration for a bounded retry run.
///
/// All instances must be constructed via [`RunnerConfig::builder`] or [`RunnerConfig::new`]
/// so invariants are validated before any run observes the values.
#[derive(Clone)]
pub struct RunnerConfig {
    label: String,
    max_concurrency: usize,
    max_attempts: usize,
    base_delay: Duration,
    max_jitter: Duration,
    max_delay: Option<Duration>,
    task_timeout: Option<Duration>,
    batch_deadline: Option<Duration>,
    metrics_interval: Option<Duration>,
    is_retryable: RetryPredicate,
}

pub struct RunnerConfigParams {
    pub label: String,
    pub max_concurrency: usize,
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_jitter: Duration,
    pub max_delay: Option<Duration>,
    pub task_timeout: Option<Duration>,
    pub batch_deadline: Option<Duration>,
    pub metrics_interval: Option<Duration>,
    pub is_retryable: RetryPredicate,
}

impl RunnerConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: RunnerConfigParams) -> Result<Self> {
        let RunnerConfigParams {
            label,
            max_concurrency,
            max_attempts,
            base_delay,
            max_jitter,
            max_delay,
            task_timeout,
            batch_deadline,
            metrics_interval,
            is_retryable,
        } = params;

        let config = Self {
            label: label.trim().to_owned(),
            max_concurrency,
            max_attempts,
            base_delay,
            max_jitter,
            max_delay,
            task_timeout,
            batch_deadline,
            metrics_interval,
            is_retryable,
        };

        config.validate()?;
        Ok(config)
    }

    /// Name attached to every log line of a run.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Maximum number of task attempts in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Maximum number of invocations per task, first attempt included.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Deadline for one task, measured from its first admission and covering
    /// every attempt and backoff wait.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout
    }

    /// Deadline for the whole batch, measured from the start of the run.
    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline
    }

    pub fn metrics_interval(&self) -> Option<Duration> {
        self.metrics_interval
    }

    pub fn is_retryable(&self, err: &Error) -> bool {
        (self.is_retryable)(err)
    }

    pub fn retry_predicate(&self) -> RetryPredicate {
        self.is_retryable.clone()
    }

    pub fn backoff(&self) -> BackoffSchedule {
        let schedule = BackoffSchedule::new(self.base_delay, self.max_jitter);
        match self.max_delay {
            Some(cap) => schedule.with_max_delay(cap),
            None => schedule,
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.label.is_empty() {
            bail!("label cannot be empty");
        }

        if self.max_concurrency == 0 {
            bail!("max_concurrency must be greater than 0");
        }

        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }

        if let Some(max_delay) = self.max_delay {
            if max_delay < self.base_delay {
                bail!(
                    "max_delay ({max_delay:?}) must not be shorter than base_delay ({:?})",
                    self.base_delay
                );
            }
        }

        ensure_positive(self.task_timeout, "task_timeout")?;
        ensure_positive(self.batch_deadline, "batch_deadline")?;
        ensure_positive(self.metrics_interval, "metrics_interval")?;

        Ok(())
    }
}

impl std::fmt::Debug for RunnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerConfig")
            .field("label", &self.label)
            .field("max_concurrency", &self.max_concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_jitter", &self.max_jitter)
            .field("max_delay", &self.max_delay)
            .field("task_timeout", &self.task_timeout)
            .field("batch_deadline", &self.batch_deadline)
            .field("metrics_interval", &self.metrics_interval)
            .finish_non_exhaustive()
    }
}

#[derive(Default, Clone)]
pub struct RunnerConfigBuilder {
    label: Option<String>,
    max_concurrency: Option<usize>,
    max_attempts: Option<usize>,
    base_delay: Option<Duration>,
    max_jitter: Option<Duration>,
    max_delay: Option<Duration>,
    task_timeout: Option<Duration>,
    batch_deadline: Option<Duration>,
    metrics_interval: Option<Duration>,
    is_retryable: Option<RetryPredicate>,
}

impl RunnerConfigBuilder {
    /// Seeds a builder from `BOUNDRUN_*` environment variables. Unset
    /// variables leave the corresponding field untouched.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(|value| (key, value))
        };

        let mut builder = Self::default();

        if let Some((_, label)) = read("LABEL") {
            builder = builder.label(label);
        }
        if let Some((key, value)) = read("MAX_CONCURRENCY") {
            builder = builder.max_concurrency(parse_value(&key, &value)?);
        }
        if let Some((key, value)) = read("MAX_ATTEMPTS") {
            builder = builder.max_attempts(parse_value(&key, &value)?);
        }
        if let Some((key, value)) = read("BASE_DELAY_MS") {
            builder = builder.base_delay(parse_millis(&key, &value)?);
        }
        if let Some((key, value)) = read("MAX_JITTER_MS") {
            builder = builder.max_jitter(parse_millis(&key, &value)?);
        }
        if let Some((key, value)) = read("MAX_DELAY_MS") {
            builder = builder.max_delay(parse_millis(&key, &value)?);
        }
        if let Some((key, value)) = read("TASK_TIMEOUT_MS") {
            builder = builder.task_timeout(parse_millis(&key, &value)?);
        }
        if let Some((key, value)) = read("BATCH_DEADLINE_MS") {
            builder = builder.batch_deadline(parse_millis(&key, &value)?);
        }
        if let Some((key, value)) = read("METRICS_INTERVAL_MS") {
            builder = builder.metrics_interval(parse_millis(&key, &value)?);
        }
        if let Some((_, markers)) = read("RETRY_MARKERS") {
            builder = builder.retry_predicate(marker_predicate(
                markers.split(',').map(|marker| marker.trim().to_owned()),
            ));
        }

        Ok(builder)
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    pub fn max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = Some(jitter);
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn batch_deadline(mut self, deadline: Duration) -> Self {
        self.batch_deadline = Some(deadline);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.is_retryable = Some(predicate);
        self
    }

    pub fn retry_when<F>(self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate(Arc::new(predicate))
    }

    pub fn build(self) -> Result<RunnerConfig> {
        let params = RunnerConfigParams {
            label: self.label.unwrap_or_else(|| DEFAULT_LABEL.to_owned()),
            max_concurrency: self
                .max_concurrency
                .context("max_concurrency is required")?,
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            base_delay: self
                .base_delay
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_BASE_DELAY_MS)),
            max_jitter: self
                .max_jitter
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_MAX_JITTER_MS)),
            max_delay: self.max_delay,
            task_timeout: self.task_timeout,
            batch_deadline: self.batch_deadline,
            metrics_interval: self.metrics_interval,
            is_retryable: self.is_retryable.unwrap_or_else(transient_markers),
        };

        RunnerConfig::new(params)
    }
}

fn ensure_positive(value: Option<Duration>, field: &str) -> Result<()> {
    if matches!(value, Some(duration) if duration.is_zero()) {
        bail!("{field} must be greater than 0 when set");
    }
    Ok(())
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("failed to parse {key}='{value}'"))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    parse_value::<u64>(key, value).map(Duration::from_millis)
}
