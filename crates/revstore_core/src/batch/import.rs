//! Bulk import.
//!
//! Import loads a list of raw entries into a collection and reports
//! aggregate counts instead of per-item results. Entries are processed in
//! order, so a duplicate key inside one import hits the duplicate policy
//! just like a key that existed before.
//!
//! In complete mode the first failing entry undoes everything the import
//! wrote (including the truncation requested by `overwrite`) and the call
//! fails with `Conflict`. Undo writes fresh revisions; it restores the
//! previous bodies, not the previous revisions. A key another writer
//! touched after the import wrote it keeps that writer's version.

use crate::collection::{Collection, OverwriteMode, WriteKind};
use crate::document::{Document, FROM_ATTRIBUTE, TO_ATTRIBUTE};
use crate::error::{CoreError, CoreResult};
use crate::ledger::{live, Mutation, MutationOutcome};
use crate::types::Revision;
use revstore_codec::{MergeOptions, Value};
use tracing::{debug, warn};

/// What to do when an imported key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Count the entry as an error and keep the original.
    #[default]
    Error,
    /// Merge the entry into the existing document.
    Update,
    /// Replace the existing document.
    Replace,
    /// Keep the existing document.
    Ignore,
}

/// Options of an import.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Duplicate key handling.
    pub on_duplicate: DuplicatePolicy,
    /// Abort and undo everything on the first error.
    pub complete: bool,
    /// Collect one diagnostic per failed entry.
    pub details: bool,
    /// Truncate the collection before loading.
    pub overwrite: bool,
    /// Collection prepended to bare `_from` values.
    pub from_prefix: Option<String>,
    /// Collection prepended to bare `_to` values.
    pub to_prefix: Option<String>,
    /// Wait for durability; `None` uses the collection default.
    pub wait_for_sync: Option<bool>,
}

impl ImportOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the duplicate policy.
    #[must_use]
    pub const fn on_duplicate(mut self, policy: DuplicatePolicy) -> Self {
        self.on_duplicate = policy;
        self
    }

    /// Sets complete mode.
    #[must_use]
    pub const fn complete(mut self, value: bool) -> Self {
        self.complete = value;
        self
    }

    /// Sets whether diagnostics are collected.
    #[must_use]
    pub const fn details(mut self, value: bool) -> Self {
        self.details = value;
        self
    }

    /// Sets whether the collection is truncated first.
    #[must_use]
    pub const fn overwrite(mut self, value: bool) -> Self {
        self.overwrite = value;
        self
    }

    /// Sets the `_from` prefix.
    #[must_use]
    pub fn from_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.from_prefix = Some(prefix.into());
        self
    }

    /// Sets the `_to` prefix.
    #[must_use]
    pub fn to_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.to_prefix = Some(prefix.into());
        self
    }

    /// Sets `wait_for_sync`.
    #[must_use]
    pub const fn wait_for_sync(mut self, value: bool) -> Self {
        self.wait_for_sync = Some(value);
        self
    }
}

/// Aggregate result of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Entries stored as new documents.
    pub created: u64,
    /// Entries that failed.
    pub errors: u64,
    /// Null or empty entries that were skipped.
    pub empty: u64,
    /// Entries merged into or replacing an existing document.
    pub updated: u64,
    /// Duplicate entries left alone.
    pub ignored: u64,
    /// One diagnostic per failed entry, when requested.
    pub details: Vec<String>,
}

enum Imported {
    Created,
    Updated,
    Ignored,
}

/// Previous state of a key touched by the import.
struct Undo {
    key: String,
    previous: Option<Document>,
    /// Revision the import left on the key.
    written: Revision,
}

impl Undo {
    fn from_outcome(key: String, outcome: MutationOutcome) -> Option<Self> {
        let written = outcome.new?.revision();
        Some(Self {
            key,
            previous: outcome.old,
            written,
        })
    }
}

impl Collection {
    /// Imports raw entries.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when a complete-mode import hits a failing entry
    /// (after undoing its writes) and `Durability` if a requested sync
    /// fails.
    pub fn import(&self, entries: &[Value], options: &ImportOptions) -> CoreResult<ImportStats> {
        let mut stats = ImportStats::default();
        let mut undo: Vec<Undo> = Vec::new();
        let mut last_written: Option<Revision> = None;

        if options.overwrite {
            if options.complete {
                for key in self.ledger().live_keys() {
                    match self.write(&key, WriteKind::Remove, None, None) {
                        Ok(outcome) => {
                            if let Some(entry) = Undo::from_outcome(key, outcome) {
                                last_written = Some(entry.written);
                                undo.push(entry);
                            }
                        }
                        // Removed by someone else in the meantime.
                        Err(CoreError::DocumentNotFound { .. }) => {}
                        Err(e) => {
                            warn!(collection = %self.name(), key = %key, error = %e, "import truncation failed");
                            self.undo_import(undo);
                            return Err(e);
                        }
                    }
                }
            } else if self.truncate()? > 0 {
                last_written = Some(self.high_water_revision());
            }
        }

        for (position, entry) in entries.iter().enumerate() {
            if entry.is_empty_document() {
                stats.empty += 1;
                continue;
            }

            match self.import_entry(entry, options) {
                Ok((key, imported, outcome)) => {
                    match imported {
                        Imported::Created => stats.created += 1,
                        Imported::Updated => stats.updated += 1,
                        Imported::Ignored => stats.ignored += 1,
                    }
                    if let Some(written) = outcome.new.as_ref().map(Document::revision) {
                        last_written = Some(written);
                    }
                    if options.complete {
                        undo.extend(Undo::from_outcome(key, outcome));
                    }
                }
                Err(message) => {
                    stats.errors += 1;
                    let detail = format!("at position {position}: {message}");
                    if options.complete {
                        self.undo_import(undo);
                        return Err(CoreError::conflict(format!("import aborted {detail}")));
                    }
                    if options.details {
                        stats.details.push(detail);
                    }
                }
            }
        }

        self.sync_if_requested(options.wait_for_sync, last_written)?;
        debug!(
            collection = %self.name(),
            created = stats.created,
            errors = stats.errors,
            empty = stats.empty,
            updated = stats.updated,
            ignored = stats.ignored,
            "import finished"
        );
        Ok(stats)
    }

    fn import_entry(
        &self,
        entry: &Value,
        options: &ImportOptions,
    ) -> Result<(String, Imported, MutationOutcome), String> {
        if !entry.is_object() {
            return Err(format!(
                "invalid JSON type (expecting object, got {})",
                entry.kind_name()
            ));
        }

        let mut body = entry.clone();
        if self.is_edge() {
            qualify_endpoint(&mut body, FROM_ATTRIBUTE, options.from_prefix.as_deref())?;
            qualify_endpoint(&mut body, TO_ATTRIBUTE, options.to_prefix.as_deref())?;
        }

        let key = self.resolve_key(None, &body).map_err(|e| e.to_string())?;
        let body = self.prepare_body(body).map_err(|e| e.to_string())?;

        let mode = match options.on_duplicate {
            DuplicatePolicy::Error => OverwriteMode::Conflict,
            DuplicatePolicy::Update => OverwriteMode::Update,
            DuplicatePolicy::Replace => OverwriteMode::Replace,
            DuplicatePolicy::Ignore => OverwriteMode::Ignore,
        };
        let kind = WriteKind::Create(mode, MergeOptions::default());

        let outcome = self
            .write(&key, kind, Some(&body), None)
            .map_err(|e| match e {
                CoreError::Conflict { .. } => format!("unique constraint violated for key {key}"),
                other => other.to_string(),
            })?;

        let imported = match (&outcome.old, &outcome.new) {
            (_, None) => Imported::Ignored,
            (None, Some(_)) => Imported::Created,
            (Some(_), Some(_)) => Imported::Updated,
        };
        Ok((key, imported, outcome))
    }

    /// Restores the state before the import. Returns how many keys were
    /// left alone because another writer changed them after the import.
    fn undo_import(&self, undo: Vec<Undo>) -> usize {
        let entries = undo.len();
        let mut superseded = 0;
        for Undo {
            key,
            previous,
            written,
        } in undo.into_iter().rev()
        {
            let mut foreign = false;
            let result = self.ledger().mutate(&key, |latest| {
                if latest.map(Document::revision) != Some(written) {
                    foreign = true;
                    return Ok(Mutation::Skip);
                }
                Ok(match (&previous, live(latest)) {
                    (Some(doc), _) => Mutation::Write(doc.body().clone()),
                    (None, Some(_)) => Mutation::Remove,
                    (None, None) => Mutation::Skip,
                })
            });
            if let Err(e) = result {
                warn!(collection = %self.name(), key = %key, error = %e, "import undo failed");
            } else if foreign {
                superseded += 1;
                warn!(collection = %self.name(), key = %key, "import undo skipped a key changed by another writer");
            }
        }
        debug!(collection = %self.name(), entries, superseded, "import rolled back");
        superseded
    }
}

fn qualify_endpoint(body: &mut Value, attribute: &str, prefix: Option<&str>) -> Result<(), String> {
    let endpoint = match body.get(attribute) {
        Some(Value::Text(endpoint)) => endpoint.clone(),
        _ => return Err(format!("missing or invalid {attribute} attribute")),
    };
    if let Some(prefix) = prefix {
        if !endpoint.contains('/') {
            body.insert(attribute, Value::Text(format!("{prefix}/{endpoint}")));
        }
    }
    Ok(())
}
