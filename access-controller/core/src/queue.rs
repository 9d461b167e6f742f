//! A keyed work queue that drives a [`Reconcile`] implementation.
//!
//! Keys are deduplicated while they wait to be processed. A key is handled by
//! at most one worker at a time; if it is enqueued again while a reconcile is
//! in flight, it is processed once more after that reconcile completes.
//! Distinct keys are processed concurrently, up to [`Config::workers`].
//!
//! Delayed retries are timed by kube's [`scheduler`], which keeps the earliest
//! request per key.

use crate::metrics::ControllerMetrics;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use futures::prelude::*;
use kube::runtime::scheduler::{scheduler, ScheduleRequest};
use std::{collections::VecDeque, fmt, hash::Hash, panic::AssertUnwindSafe, sync::Arc};
use tokio::{
    sync::mpsc,
    task::JoinSet,
    time::{Duration, Instant},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, info_span, warn, Instrument};

/// The outcome of a successful reconcile.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Nothing further to do until the key is enqueued again.
    Done,
    /// Reconcile the key again after the given delay.
    Requeue(Duration),
}

#[async_trait::async_trait]
pub trait Reconcile<K>: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Drives the state identified by `key` toward its desired state.
    ///
    /// Implementations should not start new remote calls once `deadline` has
    /// passed.
    async fn reconcile(&self, key: &K, deadline: Instant) -> Result<Action, Self::Error>;

    /// Returns the delay before a failed key is retried, given the number of
    /// consecutive failures for that key (starting at 1).
    fn retry_after(&self, error: &Self::Error, failures: u32) -> Duration {
        let _ = error;
        Backoff::default().delay(failures)
    }
}

/// Exponential backoff.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// Maximum number of keys reconciled concurrently.
    pub workers: usize,
    /// Time budget for a single reconcile.
    pub timeout: Duration,
}

/// A handle used to enqueue keys.
#[derive(Debug)]
pub struct Queue<K> {
    tx: mpsc::UnboundedSender<K>,
}

pub struct Controller<K, R> {
    name: &'static str,
    reconciler: Arc<R>,
    config: Config,
    metrics: ControllerMetrics,
    queue: Queue<K>,
    rx: mpsc::UnboundedReceiver<K>,
}

/// Bookkeeping for keys that are waiting, running or scheduled for later.
#[derive(Debug)]
struct State<K> {
    ready: VecDeque<K>,
    queued: HashSet<K>,
    active: HashSet<K>,
    dirty: HashSet<K>,
    failures: HashMap<K, u32>,
    retries: HashMap<K, Instant>,
}

// === impl Backoff ===

impl Backoff {
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exp).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(300),
        }
    }
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout: Duration::from_secs(60),
        }
    }
}

// === impl Queue ===

impl<K> Queue<K> {
    /// Creates a queue handle and the receiver a [`Controller`] drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<K>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, key: K) {
        if self.tx.send(key).is_err() {
            warn!("Work queue is closed; dropping key");
        }
    }
}

impl<K> Clone for Queue<K> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

// === impl Controller ===

impl<K, R> Controller<K, R>
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    R: Reconcile<K>,
{
    pub fn new(
        name: &'static str,
        reconciler: R,
        config: Config,
        metrics: ControllerMetrics,
    ) -> Self {
        let (queue, rx) = Queue::channel();
        Self {
            name,
            reconciler: Arc::new(reconciler),
            config,
            metrics,
            queue,
            rx,
        }
    }

    pub fn queue(&self) -> Queue<K> {
        self.queue.clone()
    }

    /// Processes keys until shutdown is signaled. In-flight reconciles are
    /// allowed to complete before shutdown is released.
    pub async fn run(mut self, drain: drain::Watch) {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel::<ScheduleRequest<K>>();
        let retries = scheduler(UnboundedReceiverStream::new(retry_rx));
        tokio::pin!(retries);
        let mut state = State::default();
        let mut tasks = JoinSet::new();

        let shutdown = drain.signaled();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                handle = &mut shutdown => {
                    info!(in_flight = tasks.len(), "Shutting down");
                    handle
                        .release_after(async { while tasks.join_next().await.is_some() {} })
                        .await;
                    return;
                }

                Some(res) = tasks.join_next(), if !tasks.is_empty() => match res {
                    Ok((key, outcome)) => self.complete(&mut state, &retry_tx, key, outcome),
                    Err(error) => warn!(%error, "Reconcile task failed"),
                },

                Some(key) = retries.next() => match state.retries.get(&key).copied() {
                    // Superseded by a successful reconcile.
                    None => {}
                    Some(at) if at <= Instant::now() => {
                        state.retries.remove(&key);
                        state.push(key);
                    }
                    // The scheduler fired for an earlier request than the
                    // one now pending.
                    Some(at) => {
                        let _ = retry_tx.send(ScheduleRequest { message: key, run_at: at });
                    }
                },

                key = self.rx.recv() => match key {
                    Some(key) => {
                        state.push(key);
                        // Take everything already queued so duplicates
                        // coalesce before any of them are dispatched.
                        while let Ok(key) = self.rx.try_recv() {
                            state.push(key);
                        }
                    }
                    None => {
                        debug!("Work queue closed");
                        while tasks.join_next().await.is_some() {}
                        return;
                    }
                },
            }

            while tasks.len() < self.config.workers.max(1) {
                let Some(key) = state.next() else {
                    break;
                };
                self.spawn(&mut tasks, key);
            }
        }
    }

    fn spawn(&self, tasks: &mut JoinSet<(K, Outcome<R::Error>)>, key: K) {
        let reconciler = self.reconciler.clone();
        let metrics = self.metrics.clone();
        let deadline = Instant::now() + self.config.timeout;
        let span = info_span!("reconcile", controller = self.name, key = %key);
        tasks.spawn(
            async move {
                let start = metrics.started();
                let outcome = AssertUnwindSafe(reconciler.reconcile(&key, deadline))
                    .catch_unwind()
                    .await;
                let outcome = match outcome {
                    Ok(Ok(action)) => Outcome::Done(action),
                    Ok(Err(error)) => Outcome::Failed(error),
                    Err(_) => Outcome::Panicked,
                };
                metrics.finished(start, !matches!(outcome, Outcome::Done(_)));
                (key, outcome)
            }
            .instrument(span),
        );
    }

    fn complete(
        &self,
        state: &mut State<K>,
        retry_tx: &mpsc::UnboundedSender<ScheduleRequest<K>>,
        key: K,
        outcome: Outcome<R::Error>,
    ) {
        let delay = match outcome {
            Outcome::Done(action) => {
                state.failures.remove(&key);
                state.retries.remove(&key);
                match action {
                    Action::Done => None,
                    Action::Requeue(delay) => Some(delay),
                }
            }
            Outcome::Failed(error) => {
                let failures = state.failure(&key);
                let delay = self.reconciler.retry_after(&error, failures);
                warn!(controller = self.name, %key, %error, failures, ?delay, "Reconcile failed");
                Some(delay)
            }
            Outcome::Panicked => {
                let failures = state.failure(&key);
                let delay = Backoff::default().delay(failures);
                warn!(controller = self.name, %key, failures, ?delay, "Reconcile panicked");
                Some(delay)
            }
        };

        if let Some(delay) = delay {
            if let Some(run_at) = state.schedule(key.clone(), delay) {
                self.metrics.requeued();
                let _ = retry_tx.send(ScheduleRequest {
                    message: key.clone(),
                    run_at,
                });
            }
        }

        if state.finish(&key) {
            state.push(key);
        }
    }
}

enum Outcome<E> {
    Done(Action),
    Failed(E),
    Panicked,
}

// === impl State ===

impl<K> Default for State<K> {
    fn default() -> Self {
        Self {
            ready: VecDeque::new(),
            queued: HashSet::new(),
            active: HashSet::new(),
            dirty: HashSet::new(),
            failures: HashMap::new(),
            retries: HashMap::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> State<K> {
    fn push(&mut self, key: K) {
        if self.active.contains(&key) {
            self.dirty.insert(key);
            return;
        }
        if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
        }
    }

    fn next(&mut self) -> Option<K> {
        let key = self.ready.pop_front()?;
        self.queued.remove(&key);
        self.active.insert(key.clone());
        Some(key)
    }

    /// Marks a key as no longer in flight, returning true if it was enqueued
    /// while it was running.
    fn finish(&mut self, key: &K) -> bool {
        self.active.remove(key);
        self.dirty.remove(key)
    }

    fn failure(&mut self, key: &K) -> u32 {
        let failures = self.failures.entry(key.clone()).or_default();
        *failures = failures.saturating_add(1);
        *failures
    }

    /// Records a delayed retry, returning the time it is due unless an
    /// earlier retry is already pending.
    fn schedule(&mut self, key: K, delay: Duration) -> Option<Instant> {
        let at = Instant::now() + delay;
        match self.retries.get(&key) {
            Some(pending) if *pending <= at => None,
            _ => {
                self.retries.insert(key, at);
                Some(at)
            }
        }
    }
}
