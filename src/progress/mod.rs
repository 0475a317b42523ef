//! Progress tracking
//!
//! The tracker aggregates the stream of queue transitions into per-state
//! counts, a trailing-window throughput and an ETA. It only reads the events
//! it is given and never touches the queue.

mod report;
mod tracker;

pub use report::{print_report, ProgressReport};
pub use tracker::{ProgressEvent, ProgressTracker, THROUGHPUT_WINDOW};
