//! Reconciliation of one collection between two replicas.
//!
//! A round makes the follower converge to the leader:
//!
//! 1. Snapshot the collection on both replicas.
//! 2. Build both revision trees and diff them.
//! 3. Page through the revisions each side holds in the differing ranges.
//! 4. Fetch the leader documents the follower lacks and apply them.
//! 5. Tombstone follower documents whose keys the leader no longer holds.
//! 6. Release both snapshots, also when the round fails.
//!
//! Reconciliation only reads snapshots, so it never holds ledger locks and
//! can be cancelled between any two requests or during a retry backoff.

use crate::config::ReconcileConfig;
use crate::endpoint::ReplicaEndpoint;
use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use revstore_core::{diff, BatchId, Document, Revision, RevisionRange};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest uninterrupted sleep while backing off.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Outcome of one reconciliation round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ranges reported by the tree diff.
    pub differing_ranges: usize,
    /// Leader revisions found in those ranges.
    pub revisions_fetched: u64,
    /// Leader documents stored on the follower.
    pub documents_applied: u64,
    /// Follower documents tombstoned.
    pub documents_removed: u64,
    /// Empty pages that still promised more data.
    pub empty_polls: u64,
    /// Requests retried after a retryable error.
    pub retries: u64,
}

/// Cumulative statistics of a reconciler.
#[derive(Debug, Clone, Default)]
pub struct ReconcileStats {
    /// Rounds that finished successfully.
    pub rounds_completed: u64,
    /// Rounds that failed.
    pub rounds_failed: u64,
    /// Documents applied over all rounds.
    pub documents_applied: u64,
    /// Documents removed over all rounds.
    pub documents_removed: u64,
    /// Retries over all rounds.
    pub retries: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Drives reconciliation rounds.
pub struct Reconciler {
    config: ReconcileConfig,
    cancelled: AtomicBool,
    stats: RwLock<ReconcileStats>,
}

/// Per-round bookkeeping.
struct Round<'a> {
    config: &'a ReconcileConfig,
    cancelled: &'a AtomicBool,
    deadline: Instant,
    report: ReconcileReport,
}

impl Reconciler {
    /// Creates a reconciler.
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            cancelled: AtomicBool::new(false),
            stats: RwLock::new(ReconcileStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> ReconcileStats {
        self.stats.read().clone()
    }

    /// Requests cancellation of the running round and all later ones until
    /// [`Reconciler::reset_cancel`] is called.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears the cancellation flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Makes `follower`'s copy of `collection` converge to `leader`'s.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if [`Reconciler::cancel`] was called, `Timeout`
    /// if revision polling outlived the deadline, and the first
    /// non-retryable endpoint error otherwise.
    pub fn reconcile(
        &self,
        collection: &str,
        leader: &dyn ReplicaEndpoint,
        follower: &dyn ReplicaEndpoint,
    ) -> SyncResult<ReconcileReport> {
        let start = Instant::now();
        let mut round = Round {
            config: &self.config,
            cancelled: &self.cancelled,
            deadline: start + self.config.deadline,
            report: ReconcileReport::default(),
        };

        let result = round.run(collection, leader, follower);
        let mut stats = self.stats.write();
        stats.retries += round.report.retries;
        match result {
            Ok(()) => {
                let report = round.report;
                stats.rounds_completed += 1;
                stats.documents_applied += report.documents_applied;
                stats.documents_removed += report.documents_removed;
                stats.last_error = None;
                info!(
                    collection,
                    ranges = report.differing_ranges,
                    fetched = report.revisions_fetched,
                    applied = report.documents_applied,
                    removed = report.documents_removed,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "reconciliation round complete"
                );
                Ok(report)
            }
            Err(e) => {
                stats.rounds_failed += 1;
                stats.last_error = Some(e.to_string());
                warn!(collection, error = %e, "reconciliation round failed");
                Err(e)
            }
        }
    }
}

impl Round<'_> {
    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Sleeps for `delay`, capped at the deadline, waking up regularly to
    /// notice cancellation.
    fn sleep(&self, delay: Duration) -> SyncResult<()> {
        let now = Instant::now();
        if now >= self.deadline {
            return Err(SyncError::Timeout);
        }
        let wake = (now + delay).min(self.deadline);
        loop {
            self.check_cancelled()?;
            let left = wake.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(());
            }
            std::thread::sleep(left.min(SLEEP_SLICE));
        }
    }

    /// Runs `f`, retrying retryable failures per the retry configuration.
    fn request<T>(&mut self, op: &str, mut f: impl FnMut() -> SyncResult<T>) -> SyncResult<T> {
        let config = self.config;
        let retry = &config.retry;
        let mut attempt = 0u32;
        loop {
            self.check_cancelled()?;
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    self.report.retries += 1;
                    warn!(op, attempt, error = %e, "retrying request");
                    self.sleep(retry.delay_for_attempt(attempt))?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run(
        &mut self,
        collection: &str,
        leader: &dyn ReplicaEndpoint,
        follower: &dyn ReplicaEndpoint,
    ) -> SyncResult<()> {
        let ttl = self.config.snapshot_ttl;
        let leader_batch =
            self.request("create_snapshot", || leader.create_snapshot(collection, ttl))?;
        let follower_batch =
            match self.request("create_snapshot", || follower.create_snapshot(collection, ttl)) {
                Ok(batch) => batch,
                Err(e) => {
                    release(leader, leader_batch);
                    return Err(e);
                }
            };

        let result = self.converge(collection, leader, leader_batch, follower, follower_batch);
        release(leader, leader_batch);
        release(follower, follower_batch);
        result
    }

    fn converge(
        &mut self,
        collection: &str,
        leader: &dyn ReplicaEndpoint,
        leader_batch: BatchId,
        follower: &dyn ReplicaEndpoint,
        follower_batch: BatchId,
    ) -> SyncResult<()> {
        let leader_tree = self.request("build_tree", || leader.build_tree(leader_batch))?;
        let follower_tree = self.request("build_tree", || follower.build_tree(follower_batch))?;
        let ranges = diff(&leader_tree, &follower_tree)?;
        self.report.differing_ranges = ranges.len();
        debug!(
            collection,
            leader_count = leader_tree.count(),
            follower_count = follower_tree.count(),
            ranges = ranges.len(),
            "diffed revision trees"
        );
        if ranges.is_empty() {
            return Ok(());
        }

        let leader_revisions = self.poll_revisions(leader, leader_batch, &ranges)?;
        let follower_revisions = self.poll_revisions(follower, follower_batch, &ranges)?;
        self.report.revisions_fetched = leader_revisions.len() as u64;

        let leader_set: HashSet<Revision> = leader_revisions.iter().copied().collect();
        let missing: Vec<Revision> = follower_revisions
            .iter()
            .copied()
            .filter(|r| !leader_set.contains(r))
            .collect();

        let leader_docs = self.fetch(leader, leader_batch, &leader_revisions)?;
        let stale_docs = self.fetch(follower, follower_batch, &missing)?;

        let leader_keys: HashSet<&str> = leader_docs.iter().map(Document::key).collect();
        let removals: Vec<Document> = stale_docs
            .iter()
            .filter(|d| !leader_keys.contains(d.key()))
            .filter_map(|d| {
                d.revision()
                    .checked_next()
                    .map(|r| Document::tombstone(d.key(), r))
            })
            .collect();

        for chunk in leader_docs.chunks(self.config.page_size) {
            self.check_cancelled()?;
            let applied = self.request("apply", || follower.apply(collection, chunk.to_vec()))?;
            self.report.documents_applied += applied as u64;
        }
        if !removals.is_empty() {
            self.check_cancelled()?;
            let removed = self.request("apply", || follower.apply(collection, removals.clone()))?;
            self.report.documents_removed += removed as u64;
        }
        Ok(())
    }

    /// Pages through every revision in `ranges`, tolerating empty pages
    /// until the deadline.
    fn poll_revisions(
        &mut self,
        endpoint: &dyn ReplicaEndpoint,
        batch: BatchId,
        ranges: &[RevisionRange],
    ) -> SyncResult<Vec<Revision>> {
        let mut revisions = Vec::new();
        let mut resume = None;
        let mut empty_streak = 0;
        loop {
            let page = self.request("revisions_in_ranges", || {
                endpoint.revisions_in_ranges(batch, ranges, resume)
            })?;

            if page.revisions.is_empty() && page.next_resume.is_some() {
                empty_streak += 1;
                self.report.empty_polls += 1;
                debug!(%batch, empty_streak, "empty page, polling again");
                if Instant::now() >= self.deadline {
                    return Err(SyncError::Timeout);
                }
                self.sleep(self.config.retry.delay_for_attempt(empty_streak))?;
                resume = page.next_resume;
                continue;
            }

            empty_streak = 0;
            if let (Some(last), Some(&first)) = (revisions.last(), page.revisions.first()) {
                if first <= *last {
                    return Err(SyncError::Protocol(format!(
                        "page starting at {first} does not follow {last}"
                    )));
                }
            }
            revisions.extend(page.revisions);
            match page.next_resume {
                Some(next) => resume = Some(next),
                None => return Ok(revisions),
            }
        }
    }

    /// Fetches the documents behind `revisions`, `page_size` at a time.
    fn fetch(
        &mut self,
        endpoint: &dyn ReplicaEndpoint,
        batch: BatchId,
        revisions: &[Revision],
    ) -> SyncResult<Vec<Document>> {
        let mut documents = Vec::with_capacity(revisions.len());
        for chunk in revisions.chunks(self.config.page_size) {
            let fetched = self.request("documents_for_revisions", || {
                endpoint.documents_for_revisions(batch, chunk)
            })?;
            if fetched.len() != chunk.len() {
                return Err(SyncError::Protocol(format!(
                    "asked for {} documents, got {}",
                    chunk.len(),
                    fetched.len()
                )));
            }
            documents.extend(fetched.into_iter().flatten());
        }
        Ok(dedupe_by_key(documents))
    }
}

/// Keeps the newest version per key.
fn dedupe_by_key(documents: Vec<Document>) -> Vec<Document> {
    let mut newest: HashMap<String, Document> = HashMap::with_capacity(documents.len());
    for doc in documents {
        match newest.get(doc.key()) {
            Some(existing) if existing.revision() >= doc.revision() => {}
            _ => {
                newest.insert(doc.key().to_string(), doc);
            }
        }
    }
    let mut out: Vec<Document> = newest.into_values().collect();
    out.sort_by_key(Document::revision);
    out
}

fn release(endpoint: &dyn ReplicaEndpoint, batch: BatchId) {
    if let Err(e) = endpoint.delete_snapshot(batch) {
        // The snapshot expires on its own.
        warn!(%batch, error = %e, "failed to release snapshot");
    }
}
