use super::log::CANDIDATE_PROBE;
use super::outcome::{RunnerError, TaskOutcome};
use super::runner::BoundedRetryRunner;
use anyhow::{anyhow, bail, Error, Result};
use std::future::Future;

/// The first candidate that produced a value, plus what went wrong with the
/// ones tried before it.
#[derive(Debug)]
pub struct ProbeReport<T> {
    pub index: usize,
    pub value: T,
    pub failures: Vec<(usize, Error)>,
}

impl BoundedRetryRunner {
    /// Tries `candidates` one after another, each with the runner's retry
    /// policy and deadlines, and returns the first success.
    ///
    /// Fails when every candidate fails or when the runner is cancelled
    /// before a candidate succeeds.
    pub async fn first_success<T, F, Fut>(&self, candidates: Vec<F>) -> Result<ProbeReport<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let total = candidates.len();
        if total == 0 {
            bail!("no candidates to probe");
        }

        let token = self.cancellation_token();
        let mut failures = Vec::new();

        for (index, candidate) in candidates.into_iter().enumerate() {
            let outcome = self
                .drive(vec![candidate], &token, &CANDIDATE_PROBE, None)
                .await
                .into_iter()
                .next()
                .unwrap_or_else(|| TaskOutcome::Failure(anyhow!("candidate produced no outcome")));

            match outcome {
                TaskOutcome::Success(value) => {
                    tracing::info!(
                        batch = self.config().label(),
                        candidate = index,
                        skipped = failures.len(),
                        "candidate selected"
                    );
                    return Ok(ProbeReport {
                        index,
                        value,
                        failures,
                    });
                }
                TaskOutcome::Failure(err) => {
                    let cancelled =
                        matches!(err.downcast_ref::<RunnerError>(), Some(RunnerError::Cancelled));
                    tracing::warn!(
                        batch = self.config().label(),
                        candidate = index,
                        error = %err,
                        "candidate unavailable"
                    );
                    failures.push((index, err));
                    if cancelled {
                        bail!(
                            "candidate probe cancelled after {} of {total} candidates",
                            failures.len()
                        );
                    }
                }
            }
        }

        let detail = failures
            .iter()
            .map(|(index, err)| format!("#{index}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(anyhow!("all {total} candidates failed ({detail})"))
    }
}
