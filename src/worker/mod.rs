//! Worker pool and parallelism modes
//!
//! Workers lease jobs from the shared [`JobQueue`](crate::queue::JobQueue)
//! and run them against the collaborators handed to the pool. The mode
//! decides how workers map onto threads and runtimes:
//!
//! | Mode | Layout |
//! |------|--------|
//! | `sequential` | one worker on one thread, all job kinds |
//! | `async` | `concurrency` cooperative workers on one single-threaded runtime |
//! | `process` | `concurrency` OS threads, each with its own runtime and one worker |
//! | `hybrid` | Fetch jobs on an async runtime, Analyze jobs on `concurrency` OS threads |

mod executor;
mod pool;

pub use executor::{Collaborators, Executor};
pub use pool::{PoolSettings, WorkerPool};

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How workers are laid out over threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelismMode {
    Sequential,
    Async,
    Process,
    Hybrid,
}

impl ParallelismMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Async => "async",
            Self::Process => "process",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for ParallelismMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParallelismMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "async" => Ok(Self::Async),
            "process" => Ok(Self::Process),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}
