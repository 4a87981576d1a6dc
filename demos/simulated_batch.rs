//! Runs a handful of simulated upstream calls through the bounded runner with a
//! concurrency limit of one. Each attempt randomly fails with a 503 so retries
//! and backoff are visible in the progress output.
//!
//! `cargo run --example simulated_batch`, tuned with `BOUNDRUN_*` variables.

use std::env;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use boundrun::{
    task_event_channel, user_message, BatchSummary, BoundedRetryRunner, RunnerConfig,
    RunnerConfigBuilder, TaskEvent, TaskEventReceiver, TaskOutcome,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::sleep;

const DEFAULT_LOG_DIRECTIVE: &str = "warn";
const DEFAULT_MAX_CONCURRENCY: usize = 1;
const TASK_COUNT: usize = 4;
const FAILURE_RATE: f64 = 0.4;

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let config = demo_config()?;
    let bar = build_progress_bar(TASK_COUNT);
    bar.println(format!(
        "Running {TASK_COUNT} simulated calls with max_concurrency={} max_attempts={}",
        config.max_concurrency(),
        config.max_attempts()
    ));

    let (events_tx, events_rx) = task_event_channel();
    let progress_handle = spawn_progress(bar.clone(), events_rx);

    let runner = BoundedRetryRunner::new(config).with_events(events_tx);
    let tasks: Vec<_> = (1..=TASK_COUNT)
        .map(|id| move || simulated_call(id))
        .collect();

    let started = Instant::now();
    let outcomes = runner.run_until_ctrl_c(tasks).await;
    let telemetry = runner.telemetry().snapshot();
    drop(runner);
    progress_handle.await?;
    bar.finish_with_message("done");

    for (index, outcome) in outcomes.iter().enumerate() {
        match outcome {
            TaskOutcome::Success(response) => bar.println(format!("Task {}: {response}", index + 1)),
            TaskOutcome::Failure(err) => {
                bar.println(format!("Task {}: {}", index + 1, user_message(err)))
            }
        }
    }

    let summary = BatchSummary::from_outcomes(&outcomes);
    bar.println(format!(
        "{}/{} succeeded ({} overloaded, {} other) after {} attempts and {} retries in {:.2}s",
        summary.succeeded,
        summary.total,
        summary.overloaded,
        summary.failed - summary.overloaded,
        telemetry.attempts,
        telemetry.retries,
        started.elapsed().as_secs_f64()
    ));

    Ok(())
}

async fn simulated_call(id: usize) -> Result<String> {
    let (latency_ms, overloaded) = {
        let mut rng = rand::rng();
        (rng.random_range(200..600), rng.random_bool(FAILURE_RATE))
    };
    sleep(Duration::from_millis(latency_ms)).await;

    if overloaded {
        return Err(anyhow!(
            "[503 Service Unavailable] The model is overloaded. Please try again later."
        ));
    }
    Ok(format!("Response {id}"))
}

fn demo_config() -> Result<RunnerConfig> {
    let mut builder = RunnerConfigBuilder::from_env()?.label("simulated");
    if env::var_os("BOUNDRUN_MAX_CONCURRENCY").is_none() {
        builder = builder.max_concurrency(DEFAULT_MAX_CONCURRENCY);
    }
    builder.build()
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    boundrun::init_tracing();
}

fn build_progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(len as u64), ProgressDrawTarget::stdout_with_hz(12));
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} tasks {msg}",
    )
    .expect("valid progress bar template")
    .progress_chars("=>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn spawn_progress(bar: ProgressBar, mut events: TaskEventReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TaskEvent::Admitted { index, attempt } => {
                    bar.set_message(format!("task {} attempt {attempt}", index + 1));
                }
                TaskEvent::RetryScheduled {
                    index,
                    attempt,
                    delay,
                } => {
                    bar.println(format!(
                        "Task {} attempt {attempt} overloaded; retrying in {}ms",
                        index + 1,
                        delay.as_millis()
                    ));
                }
                TaskEvent::Requeued { .. } => {}
                TaskEvent::Succeeded { .. } | TaskEvent::Failed { .. } => bar.inc(1),
            }
        }
    })
}
