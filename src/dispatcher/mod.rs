//! Dispatcher module for bounded, retrying fetch work
//!
//! This module contains the core dispatch logic, including:
//! - The pending task queue with deduplication
//! - Request assembly (headers, cookie, proxy rotation)
//! - HTTP fetching and per-attempt retry accounting
//! - Caller hooks
//! - The admission loop that ties them together

mod coordinator;
mod fetcher;
mod hooks;
mod queue;
mod request;
mod settings;

pub use coordinator::Dispatcher;
pub use fetcher::{build_http_client, execute, Attempt, AttemptOutcome, Fetcher, USER_AGENT};
pub use hooks::{EndHook, ErrorHook, GateHook, HookRegistry, Hooks, ItemHook};
pub use queue::TaskQueue;
pub use request::{build_request, build_request_with, ProxySetting, RequestDescriptor};
pub use settings::{
    Settings, DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_BACKOFF,
};
