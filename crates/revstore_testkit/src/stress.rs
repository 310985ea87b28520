//! Stress helpers for revstore.
//!
//! These drive a database from several threads at once, mostly to
//! exercise lock sharding and snapshot readers under write load.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use revstore_core::{CoreError, Database, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
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
            duration,
            ops_per_second,
        }
    }

    /// Logs a summary of the run at info level.
    pub fn log_summary(&self, name: &str) {
        tracing::info!(
            name,
            total = self.total_ops,
            successful = self.successful_ops,
            failed = self.failed_ops,
            duration = ?self.duration,
            ops_per_second = self.ops_per_second,
            "stress run finished"
        );
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Total operations across all threads.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct keys (`k0` ...).
    pub key_space: usize,
    /// Seed for the per-thread generators.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            key_space: 1_000,
            seed: 0x5eed,
        }
    }
}

impl StressConfig {
    fn ops_per_thread(&self) -> usize {
        self.operations / self.threads.max(1)
    }
}

fn run_threads<F>(config: &StressConfig, op: F) -> StressTestResult
where
    F: Fn(&mut StdRng) -> bool + Send + Sync + 'static,
{
    let op = Arc::new(op);
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.ops_per_thread();

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads.max(1))
        .map(|t| {
            let op = Arc::clone(&op);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let seed = config.seed.wrapping_add(t as u64);

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..ops_per_thread {
                    if op(&mut rng) {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

fn random_key(rng: &mut StdRng, key_space: usize) -> String {
    format!("k{}", rng.gen_range(0..key_space.max(1)))
}

/// Concurrent puts to random keys of `collection`.
pub fn stress_concurrent_writers(
    db: Arc<Database>,
    collection: &str,
    config: &StressConfig,
) -> StressTestResult {
    let collection = collection.to_string();
    let key_space = config.key_space;
    run_threads(config, move |rng| {
        let key = random_key(rng, key_space);
        let body = Value::object([("n", Value::Integer(rng.gen()))]);
        db.put(&collection, &key, body, None).is_ok()
    })
}

/// Concurrent mix of puts, reads and removes on random keys.
///
/// Reading or removing a missing key counts as a success.
pub fn stress_mixed_operations(
    db: Arc<Database>,
    collection: &str,
    config: &StressConfig,
) -> StressTestResult {
    let collection = collection.to_string();
    let key_space = config.key_space;
    run_threads(config, move |rng| {
        let key = random_key(rng, key_space);
        let result = match rng.gen_range(0..3) {
            0 => db
                .put(&collection, &key, Value::object([("n", Value::Integer(rng.gen()))]), None)
                .map(drop),
            1 => db.get(&collection, &key).map(drop),
            _ => db.remove(&collection, &key, None).map(drop),
        };
        matches!(result, Ok(()) | Err(CoreError::DocumentNotFound { .. }))
    })
}
