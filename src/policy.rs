//! Retry policy primitives: the backoff schedule and the error classification
//! that decides whether a failed attempt is retried.

pub mod backoff;
pub mod classify;

pub use backoff::BackoffSchedule;
pub use classify::{
    is_transient, marker_predicate, never_retry, transient_markers, user_message, FailureKind,
    RetryPredicate,
};
