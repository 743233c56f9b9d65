//! State module for tracking dispatcher progress
//!
//! # Components
//!
//! - `RunState`: Lifecycle of a dispatcher (idle, running, paused, stopped)

mod run_state;

pub use run_state::RunState;
