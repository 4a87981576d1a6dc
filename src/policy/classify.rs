//! Error classification: which failures are worth retrying, and how a final
//! failure should be described to an end user.

use crate::executor::outcome::RunnerError;
use anyhow::Error;
use std::sync::Arc;

/// Predicate deciding whether a failed attempt may be retried.
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Markers that upstream generative-language APIs use for rate limiting and
/// transient overload.
pub const TRANSIENT_MARKERS: &[&str] = &["429", "503", "overloaded", "Service Unavailable"];

/// Markers that identify malformed-request or validation failures.
pub const INVALID_INPUT_MARKERS: &[&str] = &["400", "constraint"];

const OVERLOADED_MESSAGE: &str = "AI service is temporarily overloaded. Please try again later.";
const INVALID_INPUT_MESSAGE: &str = "Data validation error. Please check the input and try again.";
const TIMED_OUT_MESSAGE: &str = "The request did not complete before its deadline.";
const CANCELLED_MESSAGE: &str = "The request was cancelled before it completed.";

/// Returns true when the rendered error chain contains any of `markers`.
pub fn message_contains_any<S: AsRef<str>>(err: &Error, markers: &[S]) -> bool {
    let rendered = format!("{err:#}");
    markers
        .iter()
        .any(|marker| rendered.contains(marker.as_ref()))
}

/// Returns true for rate-limit and overload errors.
pub fn is_transient(err: &Error) -> bool {
    message_contains_any(err, TRANSIENT_MARKERS)
}

/// Default predicate: retry rate-limit and overload errors only.
pub fn transient_markers() -> RetryPredicate {
    Arc::new(is_transient)
}

/// Predicate that retries errors whose message chain contains any marker.
pub fn marker_predicate<I, S>(markers: I) -> RetryPredicate
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let markers: Vec<String> = markers
        .into_iter()
        .map(Into::into)
        .filter(|marker| !marker.is_empty())
        .collect();
    Arc::new(move |err: &Error| message_contains_any(err, markers.as_slice()))
}

/// Predicate that treats every error as terminal.
pub fn never_retry() -> RetryPredicate {
    Arc::new(|_: &Error| false)
}

/// Coarse category of a terminal failure, used for summaries and
/// user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Overloaded,
    InvalidInput,
    TimedOut,
    Cancelled,
    Other,
}

impl FailureKind {
    pub fn classify(err: &Error) -> Self {
        if let Some(runner_error) = err.downcast_ref::<RunnerError>() {
            return match runner_error {
                RunnerError::TimedOut { .. } => FailureKind::TimedOut,
                RunnerError::Cancelled => FailureKind::Cancelled,
            };
        }

        if is_transient(err) {
            FailureKind::Overloaded
        } else if message_contains_any(err, INVALID_INPUT_MARKERS) {
            FailureKind::InvalidInput
        } else {
            FailureKind::Other
        }
    }
}

/// Message suitable for showing to the person who triggered the work.
pub fn user_message(err: &Error) -> String {
    match FailureKind::classify(err) {
        FailureKind::Overloaded => OVERLOADED_MESSAGE.to_string(),
        FailureKind::InvalidInput => INVALID_INPUT_MESSAGE.to_string(),
        FailureKind::TimedOut => TIMED_OUT_MESSAGE.to_string(),
        FailureKind::Cancelled => CANCELLED_MESSAGE.to_string(),
        FailureKind::Other => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::outcome::DeadlineScope;
    use anyhow::{anyhow, Context};

    #[test]
    fn transient_markers_match_overload_errors() {
        let predicate = transient_markers();
        assert!(predicate(&anyhow!(
            "503 Service Unavailable The model is overloaded"
        )));
        assert!(predicate(&anyhow!("429 Too Many Requests")));
        assert!(predicate(&anyhow!("upstream overloaded")));
        assert!(!predicate(&anyhow!(
            "400 Bad Request null value in column \"content\" violates not-null constraint"
        )));
        assert!(!predicate(&anyhow!("Network error")));
    }

    #[test]
    fn classification_sees_the_whole_chain() {
        let err = Err::<(), _>(anyhow!("503 Service Unavailable"))
            .context("analyze document failed")
            .unwrap_err();
        assert!(is_transient(&err));
    }

    #[test]
    fn custom_markers_replace_defaults() {
        let predicate = marker_predicate(["RESOURCE_EXHAUSTED", ""]);
        assert!(predicate(&anyhow!("grpc status RESOURCE_EXHAUSTED")));
        assert!(!predicate(&anyhow!("503 Service Unavailable")));
    }

    #[test]
    fn never_retry_rejects_everything() {
        let predicate = never_retry();
        assert!(!predicate(&anyhow!("503 Service Unavailable")));
    }

    #[test]
    fn failure_kinds_follow_markers() {
        assert_eq!(
            FailureKind::classify(&anyhow!("503 Service Unavailable")),
            FailureKind::Overloaded
        );
        assert_eq!(
            FailureKind::classify(&anyhow!("400 Bad Request")),
            FailureKind::InvalidInput
        );
        assert_eq!(
            FailureKind::classify(&anyhow!("violates not-null constraint")),
            FailureKind::InvalidInput
        );
        assert_eq!(
            FailureKind::classify(&anyhow!("Unknown error")),
            FailureKind::Other
        );
    }

    #[test]
    fn runner_errors_have_dedicated_kinds() {
        let timed_out: Error = RunnerError::TimedOut {
            scope: DeadlineScope::Batch,
        }
        .into();
        let cancelled: Error = RunnerError::Cancelled.into();

        assert_eq!(FailureKind::classify(&timed_out), FailureKind::TimedOut);
        assert_eq!(FailureKind::classify(&cancelled), FailureKind::Cancelled);
    }

    #[test]
    fn user_messages_hide_transport_details() {
        assert_eq!(
            user_message(&anyhow!("503 Service Unavailable The model is overloaded")),
            OVERLOADED_MESSAGE
        );
        assert_eq!(
            user_message(&anyhow!(
                "400 Bad Request null value in column \"content\" violates not-null constraint"
            )),
            INVALID_INPUT_MESSAGE
        );
        assert_eq!(user_message(&anyhow!("Network error")), "Network error");
    }
}
