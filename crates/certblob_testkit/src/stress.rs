//! Stress tests for the lock protocol.
//!
//! These runs hammer one lock from many fleet nodes at once and verify
//! that critical sections never overlap.

use certblob_storage::{CertStorage, Context};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total lock acquisitions attempted.
    pub total_ops: usize,
    /// Acquisitions that succeeded.
    pub successful_ops: usize,
    /// Acquisitions that failed (deadline or transport error).
    pub failed_ops: usize,
    /// Times a node entered the critical section while another was inside.
    pub overlaps: usize,
    /// Total duration.
    pub duration: Duration,
    /// Acquisitions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, overlaps: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            overlaps,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total acquisitions: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Overlaps: {}", self.overlaps);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} locks/sec", self.ops_per_second);
    }
}

/// Configuration for lock stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Acquisitions per node.
    pub rounds: usize,
    /// Time spent inside the critical section.
    pub hold: Duration,
    /// Deadline for each acquisition.
    pub acquire_timeout: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            hold: Duration::from_millis(5),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Runs `config.rounds` lock/unlock cycles on `key` from every node
/// concurrently.
pub async fn lock_contention(
    nodes: Vec<Arc<dyn CertStorage>>,
    key: &str,
    config: &StressConfig,
) -> StressTestResult {
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::with_capacity(nodes.len());

    for node in nodes {
        let key = key.to_string();
        let config = config.clone();
        let inside = Arc::clone(&inside);
        let overlaps = Arc::clone(&overlaps);
        let successful = Arc::clone(&successful);
        let failed = Arc::clone(&failed);

        handles.push(tokio::spawn(async move {
            for _ in 0..config.rounds {
                let ctx = Context::background().with_timeout(config.acquire_timeout);
                if node.lock(&ctx, &key).await.is_err() {
                    failed.fetch_add(1, Ordering::SeqCst);
                    continue;
                }

                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(config.hold).await;
                inside.fetch_sub(1, Ordering::SeqCst);

                node.unlock(&Context::background(), &key)
                    .await
                    .expect("Unlock failed");
                successful.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    for handle in handles {
        handle.await.expect("Stress task panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::SeqCst),
        failed.load(Ordering::SeqCst),
        overlaps.load(Ordering::SeqCst),
        start.elapsed(),
    )
}
