use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing what the runner has done so far.
#[derive(Default, Debug)]
pub struct Telemetry {
    submitted: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Telemetry {
    pub fn record_submitted(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.submitted.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records one attempt entering the running state.
    pub fn record_admission(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
    }

    /// Records `count` attempts leaving the running state.
    pub fn record_release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(count))
            });
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            peak_in_flight: self.peak_in_flight(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub submitted: u64,
    pub attempts: u64,
    pub retries: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

impl TelemetrySnapshot {
    /// Tasks that have reached a terminal outcome.
    pub fn finished(&self) -> u64 {
        self.succeeded.saturating_add(self.failed)
    }
}

/// Spawns a background task that periodically logs attempt throughput,
/// in-flight attempts and failure counters until `shutdown` is cancelled.
pub fn spawn_metrics_reporter(
    label: String,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "boundrun::metrics", batch = %label, "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let attempts_delta = current.attempts.saturating_sub(last_snapshot.attempts);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        attempts_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "boundrun::metrics",
                        batch = %label,
                        attempts_per_sec = format!("{throughput:.2}"),
                        submitted = current.submitted,
                        finished = current.finished(),
                        in_flight = current.in_flight,
                        retries = current.retries,
                        failed = current.failed,
                        timed_out = current.timed_out,
                        "runner metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn telemetry_records_counters() {
        let telemetry = Telemetry::default();
        telemetry.record_submitted(4);
        telemetry.record_admission();
        telemetry.record_admission();
        telemetry.record_release(1);
        telemetry.record_admission();
        telemetry.record_retry();
        telemetry.record_success();
        telemetry.record_failure();
        telemetry.record_timeout();
        telemetry.record_cancellation();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.submitted, 4);
        assert_eq!(snapshot.attempts, 3);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 3);
        assert_eq!(snapshot.timed_out, 1);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.in_flight, 2);
        assert_eq!(snapshot.peak_in_flight, 2);
        assert_eq!(snapshot.finished(), 4);
    }

    #[test]
    fn release_never_underflows() {
        let telemetry = Telemetry::default();
        telemetry.record_admission();
        telemetry.record_release(5);
        assert_eq!(telemetry.in_flight(), 0);
        assert_eq!(telemetry.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn metrics_reporter_logs_until_shutdown() {
        let telemetry = Arc::new(Telemetry::default());
        telemetry.record_submitted(10);

        let shutdown = CancellationToken::new();
        let handle = spawn_metrics_reporter(
            "test".to_string(),
            telemetry,
            shutdown.clone(),
            Duration::from_millis(10),
        );

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop promptly")
            .expect("task should not panic");
    }
}
