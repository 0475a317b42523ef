//! State module for tracking job and host progress
//!
//! # Components
//!
//! - `JobState`: the persisted job state machine (pending, running, completed, ...)
//! - `HostState`: per-host throttle state used by the rate limiter

mod host_state;
mod job_state;

pub use host_state::{crawl_delay_duration, effective_interval, HostState, MAX_CRAWL_DELAY};
pub use job_state::JobState;
