//! Parallel item execution with stable output order.

use crate::error::{CoreError, CoreResult};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

/// Runs batch items, fanning out to worker threads for large batches.
///
/// Items are assigned to lanes by key hash, so items touching the same key
/// always run on one thread in input order. Results come back in input
/// order regardless of which lane finished first.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Executor {
    parallelism: usize,
    threshold: usize,
}

impl Executor {
    pub(crate) fn new(parallelism: usize, threshold: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            threshold,
        }
    }

    /// Runs `work` for every item whose key resolved.
    ///
    /// Items whose key is an error fail with a copy of that error.
    pub(crate) fn run<T, F>(&self, keys: &[CoreResult<String>], work: F) -> Vec<CoreResult<T>>
    where
        T: Send,
        F: Fn(usize, &str) -> CoreResult<T> + Sync,
    {
        let item = |i: usize| match &keys[i] {
            Ok(key) => work(i, key),
            Err(e) => Err(e.clone()),
        };

        let n = keys.len();
        if self.parallelism == 1 || n < self.threshold.max(2) {
            return (0..n).map(item).collect();
        }

        let lanes = self.parallelism.min(n);
        let mut assignments: Vec<Vec<usize>> = vec![Vec::new(); lanes];
        for (i, key) in keys.iter().enumerate() {
            let lane = match key {
                Ok(key) => lane_of(key, lanes),
                Err(_) => i % lanes,
            };
            assignments[lane].push(i);
        }

        let mut slots: Vec<Option<CoreResult<T>>> = (0..n).map(|_| None).collect();
        let item = &item;
        thread::scope(|scope| {
            let handles: Vec<_> = assignments
                .iter()
                .map(|indices| {
                    scope.spawn(move || {
                        indices
                            .iter()
                            .map(|&i| (i, item(i)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            for handle in handles {
                if let Ok(done) = handle.join() {
                    for (i, result) in done {
                        slots[i] = Some(result);
                    }
                }
            }
        });

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(CoreError::internal("batch worker panicked"))))
            .collect()
    }
}

fn lane_of(key: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn keys(n: usize) -> Vec<CoreResult<String>> {
        (0..n).map(|i| Ok(format!("k{}", i % 7))).collect()
    }

    #[test]
    fn sequential_below_threshold() {
        let executor = Executor::new(4, 100);
        let results = executor.run(&keys(10), |i, key| Ok((i, key.to_string())));
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), (i, format!("k{}", i % 7)));
        }
    }

    #[test]
    fn parallel_preserves_order() {
        let executor = Executor::new(4, 2);
        let results = executor.run(&keys(500), |i, _| Ok(i * 2));
        let values: Vec<usize> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, (0..500).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn same_key_runs_in_input_order() {
        let executor = Executor::new(8, 2);
        let seen = Mutex::new(Vec::new());
        executor.run(&keys(700), |i, key| {
            if key == "k3" {
                seen.lock().push(i);
            }
            Ok(())
        });
        let seen = seen.into_inner();
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        assert_eq!(seen, sorted);
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn key_errors_are_copied() {
        let executor = Executor::new(2, 1);
        let keys = vec![
            Ok("a".to_string()),
            Err(CoreError::invalid_argument("empty key")),
            Ok("b".to_string()),
        ];
        let results = executor.run(&keys, |_, key| Ok(key.len()));
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().unwrap_err(),
            &CoreError::invalid_argument("empty key")
        );
        assert!(results[2].is_ok());
    }
}
