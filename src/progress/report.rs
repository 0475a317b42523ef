use serde::Serialize;
use std::time::Duration;

/// Point-in-time progress of the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub dead_lettered: u64,
    pub cancelled: u64,

    /// Failed attempts, including those that were retried
    pub failures: u64,

    /// Finished items per second over the trailing window
    pub throughput: f64,

    /// Estimated time until the pending jobs are done
    pub eta: Option<Duration>,

    /// Mean run time of a completed attempt
    pub avg_item_seconds: Option<f64>,

    /// Time since tracking started
    pub elapsed: Duration,
}

impl ProgressReport {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.dead_lettered + self.cancelled
    }

    pub fn finished(&self) -> u64 {
        self.completed + self.dead_lettered + self.cancelled
    }

    /// Share of known jobs that have finished, in percent
    pub fn percent_complete(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.finished() as f64 / total as f64 * 100.0
    }

    /// One-line summary for periodic log output
    pub fn summary_line(&self) -> String {
        format!(
            "{:.1}% done: {} pending, {} running, {} completed, {} dead-lettered, {:.2} items/s, ETA {}",
            self.percent_complete(),
            self.pending,
            self.running,
            self.completed,
            self.dead_lettered,
            self.throughput,
            format_eta(self.eta)
        )
    }
}

fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        None => "unknown".to_string(),
        Some(eta) => {
            let secs = eta.as_secs();
            if secs >= 3600 {
                format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
            } else if secs >= 60 {
                format!("{}m{:02}s", secs / 60, secs % 60)
            } else {
                format!("{}s", secs)
            }
        }
    }
}

/// Prints a progress report to stdout in a formatted manner
pub fn print_report(report: &ProgressReport) {
    println!("=== Ingest Progress ===\n");

    println!("Jobs by State:");
    let total = report.total();
    for (label, count) in [
        ("Pending", report.pending),
        ("Running", report.running),
        ("Completed", report.completed),
        ("DeadLettered", report.dead_lettered),
        ("Cancelled", report.cancelled),
    ] {
        let percentage = if total > 0 {
            count as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", label, count, percentage);
    }
    println!();

    println!("Throughput:");
    println!("  Items/sec (last minute): {:.2}", report.throughput);
    if let Some(avg) = report.avg_item_seconds {
        println!("  Average item time: {:.2}s", avg);
    }
    println!("  Failed attempts: {}", report.failures);
    println!("  ETA: {}", format_eta(report.eta));
    println!();

    println!(
        "Progress: {:.1}% ({} / {} jobs finished)",
        report.percent_complete(),
        report.finished(),
        total
    );
}
