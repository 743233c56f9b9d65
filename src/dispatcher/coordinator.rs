//! Dispatcher coordinator - the admission loop
//!
//! This module contains the [`Dispatcher`] handle and the single coordinator
//! task behind it. The coordinator:
//! - Drains the task queue into fetch workers, bounded by the concurrency limit
//! - Runs the pre-request gate for each popped task alongside everything
//!   else, reserving the task's slot until the gate answers
//! - Frees slots as workers finish and refills them
//! - Parks failed attempts behind the retry backoff, then queues them in the
//!   retry lane where they compete for slots like any other attempt
//! - Fires the end-of-queue hook and polls while the queue is empty
//!
//! Everything that wakes the coordinator (new tasks, lifecycle changes, worker
//! completions, gate answers, retry timers, poll ticks) is an event on one
//! `select!`, so the drain never re-enters itself and never waits.

use crate::dispatcher::fetcher::{execute, Attempt, AttemptOutcome, Fetcher};
use crate::dispatcher::hooks::HookRegistry;
use crate::dispatcher::{ProxySetting, Settings, TaskQueue};
use crate::state::RunState;
use crate::FetchError;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

/// Wake-ups sent from the [`Dispatcher`] handle to its coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    /// Work or settings changed; try to dispatch
    Wake,

    /// The run (re)entered `Running`; the next empty observation is fresh
    Started,
}

/// State guarded by one mutex: both are read-then-written in one step
#[derive(Debug, Default)]
struct Core {
    queue: TaskQueue,
    state: RunState,
    in_flight: usize,
    pending_retries: usize,
    /// Popped tasks still at the gate or waiting for a slot after it
    admitting: usize,
}

/// Shortest accepted empty-queue re-check period
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// State shared between the handle, the coordinator and the workers
#[derive(Debug, Default)]
struct Shared {
    core: Mutex<Core>,
    settings: RwLock<Arc<Settings>>,
    hooks: HookRegistry,
    fetcher: Fetcher,
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> Arc<Settings> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_settings(&self, change: impl FnOnce(&mut Settings)) {
        let mut current = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Settings::clone(&current);
        change(&mut next);
        *current = Arc::new(next);
    }
}

/// Concurrency-bounded fetch dispatcher
///
/// Cheap to clone; all clones drive the same queue. Setters return `&Self` so
/// configuration can be chained, and take effect on the next attempt issued.
///
/// # Example
///
/// ```no_run
/// use ripple_fetch::Dispatcher;
/// use std::time::Duration;
///
/// # async fn example() {
/// let dispatcher = Dispatcher::new();
/// dispatcher
///     .set_concurrency(4)
///     .set_retries(2)
///     .set_delay(Duration::from_millis(250))
///     .on_item(|content, id| println!("{}: {} bytes", id, content.len()))
///     .on_error(|error, id| eprintln!("{}: {}", id, error));
///
/// dispatcher.add_task("https://example.com/");
/// dispatcher.start();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
    signals: mpsc::UnboundedSender<Signal>,
    inbox: Arc<Mutex<Option<mpsc::UnboundedReceiver<Signal>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates an idle dispatcher with default settings
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Creates an idle dispatcher with the given settings
    pub fn with_settings(mut settings: Settings) -> Self {
        settings.concurrency = settings.concurrency.max(1);
        settings.poll_interval = settings.poll_interval.max(MIN_POLL_INTERVAL);
        let (signals, inbox) = mpsc::unbounded_channel();
        let shared = Shared {
            settings: RwLock::new(Arc::new(settings)),
            ..Shared::default()
        };

        Self {
            shared: Arc::new(shared),
            signals,
            inbox: Arc::new(Mutex::new(Some(inbox))),
        }
    }

    fn signal(&self, signal: Signal) {
        // The coordinator only exits once every handle is gone
        let _ = self.signals.send(signal);
    }

    // ===== Tasks =====

    /// Adds a task identifier unless it is already pending
    pub fn add_task(&self, id: impl Into<String>) -> &Self {
        let (added, active) = {
            let mut core = self.shared.core();
            (core.queue.append(id), core.state.is_active())
        };
        if added && active {
            self.signal(Signal::Wake);
        }
        self
    }

    /// Adds several task identifiers in order
    pub fn add_tasks<I, S>(&self, ids: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let active = {
            let mut core = self.shared.core();
            core.queue.extend(ids);
            core.state.is_active()
        };
        if active {
            self.signal(Signal::Wake);
        }
        self
    }

    /// Number of task identifiers waiting to be dispatched
    pub fn task_count(&self) -> usize {
        self.shared.core().queue.size()
    }

    // ===== Settings =====

    /// Sets the maximum number of concurrent fetches (clamped to at least 1)
    pub fn set_concurrency(&self, limit: usize) -> &Self {
        self.shared
            .update_settings(|settings| settings.concurrency = limit.max(1));
        self.signal(Signal::Wake);
        self
    }

    /// Sets how many times a failed task is retried
    pub fn set_retries(&self, retries: u32) -> &Self {
        self.shared.update_settings(|settings| settings.retries = retries);
        self
    }

    /// Sets the delay applied before every attempt
    pub fn set_delay(&self, delay: Duration) -> &Self {
        self.shared.update_settings(|settings| settings.delay = delay);
        self
    }

    /// Sets the pause between a failed attempt and its retry
    pub fn set_retry_backoff(&self, backoff: Duration) -> &Self {
        self.shared
            .update_settings(|settings| settings.retry_backoff = backoff);
        self
    }

    /// Sets how often an empty queue is re-checked (clamped to at least 10ms)
    pub fn set_poll_interval(&self, interval: Duration) -> &Self {
        let interval = interval.max(MIN_POLL_INTERVAL);
        self.shared
            .update_settings(|settings| settings.poll_interval = interval);
        self
    }

    /// Sets the per-request timeout
    pub fn set_timeout(&self, timeout: Duration) -> &Self {
        self.shared.update_settings(|settings| settings.timeout = timeout);
        self
    }

    /// Sets the proxy: `None`, a single address, or a pool
    pub fn set_proxy(&self, proxy: impl Into<ProxySetting>) -> &Self {
        let proxy = proxy.into();
        self.shared.update_settings(|settings| settings.proxy = proxy);
        self
    }

    /// Replaces the extra request headers
    pub fn set_headers<I, K, V>(&self, headers: I) -> &Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let headers: BTreeMap<String, String> = headers
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        self.shared.update_settings(|settings| settings.headers = headers);
        self
    }

    /// Sets the `Cookie` header value
    pub fn set_cookies(&self, cookies: impl Into<String>) -> &Self {
        let cookies = cookies.into();
        self.shared.update_settings(|settings| settings.cookies = cookies);
        self
    }

    /// Returns a snapshot of the current settings
    pub fn settings(&self) -> Arc<Settings> {
        self.shared.settings()
    }

    // ===== Hooks =====

    /// Sets the handler called once per task whose retries are exhausted
    pub fn on_error<F>(&self, handler: F) -> &Self
    where
        F: Fn(FetchError, &str) + Send + Sync + 'static,
    {
        self.shared.hooks.update(|hooks| hooks.set_on_error(handler));
        self
    }

    /// Sets the handler called with `(content, id)` for each fetched task
    pub fn on_item<F>(&self, handler: F) -> &Self
    where
        F: Fn(String, &str) + Send + Sync + 'static,
    {
        self.shared.hooks.update(|hooks| hooks.set_on_item(handler));
        self
    }

    /// Sets the handler called whenever the queue is observed empty while running
    pub fn on_end<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.hooks.update(|hooks| hooks.set_on_end(handler));
        self
    }

    /// Sets the gate consulted before a task takes a slot; `false` discards it
    pub fn before_request<F, Fut>(&self, gate: F) -> &Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.shared.hooks.update(|hooks| hooks.set_before_request(gate));
        self
    }

    // ===== Lifecycle =====

    /// Starts dispatching (`Idle`/`Stopped` → `Running`)
    ///
    /// The first call spawns the coordinator task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) -> &Self {
        {
            let mut core = self.shared.core();
            if !core.state.can_start() {
                tracing::warn!("start() ignored: dispatcher is already {}", core.state);
                return self;
            }
            core.state = RunState::Running;
        }

        let inbox = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::info!("Dispatcher started with {} pending tasks", self.task_count());
        match inbox {
            // A fresh coordinator drains as soon as it runs
            Some(inbox) => {
                let coordinator = Coordinator::new(self.shared.clone(), inbox);
                tokio::spawn(coordinator.run());
            }
            None => self.signal(Signal::Started),
        }
        self
    }

    /// Stops dispatching; in-flight fetches run to completion
    pub fn stop(&self) -> &Self {
        let previous = {
            let mut core = self.shared.core();
            std::mem::replace(&mut core.state, RunState::Stopped)
        };
        tracing::info!("Dispatcher stopped (was {})", previous);
        self.signal(Signal::Wake);
        self
    }

    /// Halts new dispatch (`Running` → `Paused`); in-flight fetches continue
    pub fn pause(&self) -> &Self {
        let mut core = self.shared.core();
        if core.state == RunState::Running {
            core.state = RunState::Paused;
            tracing::info!("Dispatcher paused");
        } else {
            tracing::warn!("pause() ignored: dispatcher is {}", core.state);
        }
        self
    }

    /// Resumes dispatch (`Paused` → `Running`)
    pub fn resume(&self) -> &Self {
        {
            let mut core = self.shared.core();
            if core.state != RunState::Paused {
                tracing::warn!("resume() ignored: dispatcher is {}", core.state);
                return self;
            }
            core.state = RunState::Running;
        }
        tracing::info!("Dispatcher resumed");
        self.signal(Signal::Started);
        self
    }

    // ===== Observation =====

    /// Current lifecycle state
    pub fn state(&self) -> RunState {
        self.shared.core().state
    }

    /// Number of attempts currently holding a concurrency slot
    pub fn in_flight(&self) -> usize {
        self.shared.core().in_flight
    }

    /// Number of retries waiting for their backoff or for a slot
    pub fn pending_retries(&self) -> usize {
        self.shared.core().pending_retries
    }

    /// True when nothing is queued, gated, in flight, or waiting to be retried
    pub fn is_idle(&self) -> bool {
        let core = self.shared.core();
        core.queue.is_empty()
            && core.admitting == 0
            && core.in_flight == 0
            && core.pending_retries == 0
    }
}

/// The single task that owns dispatch decisions
struct Coordinator {
    shared: Arc<Shared>,
    inbox: mpsc::UnboundedReceiver<Signal>,
    workers: JoinSet<AttemptOutcome>,
    backoffs: JoinSet<Attempt>,
    /// Gate evaluations in progress; each holds a slot reservation
    gates: JoinSet<(String, bool)>,
    retry_lane: VecDeque<Attempt>,
    /// Tasks the gate allowed, waiting for a slot
    admitted: VecDeque<String>,
    /// Next empty-queue re-check; `None` while work is flowing
    poll_at: Option<Instant>,
}

impl Coordinator {
    fn new(shared: Arc<Shared>, inbox: mpsc::UnboundedReceiver<Signal>) -> Self {
        Self {
            shared,
            inbox,
            workers: JoinSet::new(),
            backoffs: JoinSet::new(),
            gates: JoinSet::new(),
            retry_lane: VecDeque::new(),
            admitted: VecDeque::new(),
            poll_at: None,
        }
    }

    async fn run(mut self) {
        tracing::debug!("Coordinator started");

        loop {
            self.drain();

            let poll_at = self.poll_at;
            let poll = async move {
                match poll_at {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                signal = self.inbox.recv() => match signal {
                    Some(Signal::Started) => self.poll_at = None,
                    Some(Signal::Wake) => {}
                    None => break,
                },
                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => {
                    self.on_worker_finished(joined);
                }
                Some(joined) = self.backoffs.join_next(), if !self.backoffs.is_empty() => {
                    self.on_backoff_elapsed(joined);
                }
                Some(joined) = self.gates.join_next(), if !self.gates.is_empty() => {
                    self.on_gate_resolved(joined);
                }
                _ = poll => self.poll_at = None,
            }
        }

        tracing::debug!(
            "All dispatcher handles dropped; waiting for {} in-flight attempts",
            self.workers.len()
        );
        while let Some(joined) = self.workers.join_next().await {
            self.on_worker_finished(joined);
        }
    }

    /// Fills free slots from the retry lane, the admitted lane, then the queue
    ///
    /// A slot counts as taken while its task is in flight or still at the gate.
    /// The condition is re-checked on every iteration. Never awaits.
    fn drain(&mut self) {
        loop {
            let settings = self.shared.settings();
            let mut core = self.shared.core();
            if !core.state.is_dispatching() {
                return;
            }

            if core.in_flight + self.gates.len() >= settings.concurrency {
                let drained = core.queue.is_empty()
                    && self.retry_lane.is_empty()
                    && self.admitted.is_empty();
                drop(core);
                if drained {
                    self.on_queue_empty(&settings);
                }
                return;
            }

            if let Some(retry) = self.retry_lane.pop_front() {
                core.in_flight += 1;
                core.pending_retries = core.pending_retries.saturating_sub(1);
                drop(core);
                self.spawn_attempt(retry, settings);
                continue;
            }

            if let Some(id) = self.admitted.pop_front() {
                core.in_flight += 1;
                core.admitting = core.admitting.saturating_sub(1);
                drop(core);
                let attempt = Attempt::first(id, settings.retries);
                self.spawn_attempt(attempt, settings);
                continue;
            }

            let Some(id) = core.queue.pop_front() else {
                drop(core);
                self.on_queue_empty(&settings);
                return;
            };
            core.admitting += 1;
            drop(core);
            self.poll_at = None;

            let gate = self.shared.hooks.current().gate(&id);
            self.gates.spawn(async move {
                let allowed = gate.await;
                (id, allowed)
            });
        }
    }

    fn on_queue_empty(&mut self, settings: &Settings) {
        if self.poll_at.is_some() {
            return;
        }
        self.shared.hooks.current().end();
        self.poll_at = Some(Instant::now() + settings.poll_interval);
    }

    fn spawn_attempt(&mut self, attempt: Attempt, settings: Arc<Settings>) {
        tracing::debug!("Dispatching {}", attempt.id);
        let shared = self.shared.clone();
        self.workers.spawn(async move {
            execute(&shared.fetcher, &shared.hooks, settings, attempt).await
        });
    }

    fn on_gate_resolved(&mut self, joined: Result<(String, bool), JoinError>) {
        match joined {
            Ok((id, true)) => self.admitted.push_back(id),
            Ok((id, false)) => {
                tracing::debug!("Pre-request gate rejected {}", id);
                let mut core = self.shared.core();
                core.admitting = core.admitting.saturating_sub(1);
            }
            Err(error) => {
                tracing::error!("Pre-request gate aborted: {}", error);
                let mut core = self.shared.core();
                core.admitting = core.admitting.saturating_sub(1);
            }
        }
    }

    fn on_worker_finished(&mut self, joined: Result<AttemptOutcome, JoinError>) {
        let backoff = {
            let mut core = self.shared.core();
            core.in_flight = core.in_flight.saturating_sub(1);
            match &joined {
                Ok(AttemptOutcome::Retry(_)) => core.pending_retries += 1,
                Ok(_) => {}
                Err(error) => tracing::error!("Fetch worker aborted: {}", error),
            }
            self.shared.settings().retry_backoff
        };

        if let Ok(AttemptOutcome::Retry(attempt)) = joined {
            self.backoffs.spawn(async move {
                tokio::time::sleep(backoff).await;
                attempt
            });
        }
    }

    fn on_backoff_elapsed(&mut self, joined: Result<Attempt, JoinError>) {
        match joined {
            Ok(attempt) => self.retry_lane.push_back(attempt),
            Err(error) => {
                tracing::error!("Retry timer aborted: {}", error);
                let mut core = self.shared.core();
                core.pending_retries = core.pending_retries.saturating_sub(1);
            }
        }
    }
}
