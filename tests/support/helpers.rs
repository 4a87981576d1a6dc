use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::anyhow;
use boundrun::{boxed_task, BoxedTask};
use once_cell::sync::Lazy;
use tokio::time::{sleep, Instant};
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Counts concurrent invocations across a batch of tasks.
#[derive(Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A task that replays a fixed script: each listed error message is returned
/// by one invocation, after which every invocation succeeds with `value`.
#[derive(Clone)]
pub struct ScriptedTask<T> {
    failures: Arc<Mutex<VecDeque<String>>>,
    persistent_failure: Option<String>,
    calls: Arc<AtomicUsize>,
    started_at: Arc<Mutex<Vec<Instant>>>,
    latency: Duration,
    value: T,
    probe: Option<ConcurrencyProbe>,
}

impl<T> ScriptedTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn succeeding(value: T) -> Self {
        Self::failing_with(Vec::<String>::new(), value)
    }

    pub fn failing_with<I, S>(failures: I, value: T) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failures: Arc::new(Mutex::new(failures.into_iter().map(Into::into).collect())),
            persistent_failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
            started_at: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
            value,
            probe: None,
        }
    }

    /// Fails every invocation with `message`; `value` is never returned.
    pub fn always_failing(message: &str, value: T) -> Self {
        Self {
            persistent_failure: Some(message.to_owned()),
            ..Self::succeeding(value)
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_probe(mut self, probe: ConcurrencyProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Instants at which each invocation started.
    pub fn started_at(&self) -> Vec<Instant> {
        self.started_at.lock().unwrap().clone()
    }

    pub fn task(&self) -> BoxedTask<T> {
        let script = self.clone();
        boxed_task(move || {
            let script = script.clone();
            async move {
                script.calls.fetch_add(1, Ordering::SeqCst);
                script.started_at.lock().unwrap().push(Instant::now());
                if let Some(probe) = &script.probe {
                    probe.enter();
                }

                if !script.latency.is_zero() {
                    sleep(script.latency).await;
                }

                if let Some(probe) = &script.probe {
                    probe.exit();
                }

                let next_failure = match &script.persistent_failure {
                    Some(message) => Some(message.clone()),
                    None => script.failures.lock().unwrap().pop_front(),
                };
                match next_failure {
                    Some(message) => Err(anyhow!(message)),
                    None => Ok(script.value.clone()),
                }
            }
        })
    }
}
