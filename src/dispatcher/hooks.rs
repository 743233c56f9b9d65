//! Caller-supplied callbacks
//!
//! One slot per hook kind; setting a hook replaces the previous one. Each slot
//! starts out with a stub that only logs.

use crate::FetchError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

/// Called once per task whose retry budget is exhausted
pub type ErrorHook = Arc<dyn Fn(FetchError, &str) + Send + Sync>;

/// Called once per successfully fetched task with `(content, id)`
pub type ItemHook = Arc<dyn Fn(String, &str) + Send + Sync>;

/// Called each time the queue is observed empty while running
pub type EndHook = Arc<dyn Fn() + Send + Sync>;

/// Consulted before a popped task takes a concurrency slot
pub type GateHook = Arc<dyn Fn(String) -> BoxFuture<'static, bool> + Send + Sync>;

/// The four hook slots of a dispatcher
#[derive(Clone)]
pub struct Hooks {
    on_error: ErrorHook,
    on_item: ItemHook,
    on_end: EndHook,
    before_request: GateHook,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            on_error: Arc::new(|error: FetchError, id: &str| {
                tracing::error!("Fetch failed for {}: {}", id, error);
            }),
            on_item: Arc::new(|content: String, id: &str| {
                tracing::debug!("Fetched {} ({} bytes)", id, content.len());
            }),
            on_end: Arc::new(|| {
                tracing::trace!("Task queue is empty");
            }),
            before_request: Arc::new(|_: String| async { true }.boxed()),
        }
    }
}

impl Hooks {
    /// Replaces the error handler
    pub fn set_on_error<F>(&mut self, handler: F)
    where
        F: Fn(FetchError, &str) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(handler);
    }

    /// Replaces the item processor
    pub fn set_on_item<F>(&mut self, handler: F)
    where
        F: Fn(String, &str) + Send + Sync + 'static,
    {
        self.on_item = Arc::new(handler);
    }

    /// Replaces the end-of-queue handler
    pub fn set_on_end<F>(&mut self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_end = Arc::new(handler);
    }

    /// Replaces the pre-request gate
    pub fn set_before_request<F, Fut>(&mut self, gate: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.before_request = Arc::new(move |id| gate(id).boxed());
    }

    pub(crate) fn error(&self, error: FetchError, id: &str) {
        (self.on_error)(error, id)
    }

    pub(crate) fn item(&self, content: String, id: &str) {
        (self.on_item)(content, id)
    }

    pub(crate) fn end(&self) {
        (self.on_end)()
    }

    /// Returns the gate future for `id` without holding any borrow of `self`
    pub(crate) fn gate(&self, id: &str) -> BoxFuture<'static, bool> {
        (self.before_request)(id.to_string())
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

/// Shared, replaceable hook set
///
/// Readers take a cheap clone of the current [`Hooks`] and never hold the lock
/// while a hook runs.
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: RwLock<Hooks>,
}

impl HookRegistry {
    /// Returns the hooks as they are right now
    pub fn current(&self) -> Hooks {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `change` to the hook set
    pub fn update(&self, change: impl FnOnce(&mut Hooks)) {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        change(&mut hooks);
    }
}
