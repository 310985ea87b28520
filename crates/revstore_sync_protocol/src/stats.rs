//! Import statistics record.

use crate::fields::{decode_map, int};
use revstore_codec::{to_cbor, CodecError, CodecResult, Decode, Encode, Value};
use revstore_core::ImportStats;

/// The `{created, errors, empty, updated, ignored}` record of an import,
/// with its optional diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStatsRecord {
    /// Entries stored as new documents.
    pub created: u64,
    /// Entries that failed.
    pub errors: u64,
    /// Skipped null or empty entries.
    pub empty: u64,
    /// Entries merged into or replacing existing documents.
    pub updated: u64,
    /// Duplicates left alone.
    pub ignored: u64,
    /// One diagnostic per failed entry.
    pub details: Vec<String>,
}

impl From<&ImportStats> for ImportStatsRecord {
    fn from(stats: &ImportStats) -> Self {
        Self {
            created: stats.created,
            errors: stats.errors,
            empty: stats.empty,
            updated: stats.updated,
            ignored: stats.ignored,
            details: stats.details.clone(),
        }
    }
}

impl Encode for ImportStatsRecord {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut pairs = vec![
            ("created", int(self.created)),
            ("errors", int(self.errors)),
            ("empty", int(self.empty)),
            ("updated", int(self.updated)),
            ("ignored", int(self.ignored)),
        ];
        if !self.details.is_empty() {
            let details = self
                .details
                .iter()
                .map(|d| Value::from(d.as_str()))
                .collect();
            pairs.push(("details", Value::Array(details)));
        }
        to_cbor(&Value::object(pairs))
    }
}

impl Decode for ImportStatsRecord {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_map(bytes, |f| {
            let details = match f.get("details") {
                None => Vec::new(),
                Some(_) => f
                    .array("details")?
                    .iter()
                    .map(|d| {
                        d.as_text().map(str::to_string).ok_or_else(|| {
                            CodecError::invalid_structure("details must be text")
                        })
                    })
                    .collect::<CodecResult<_>>()?,
            };
            Ok(Self {
                created: f.u64("created")?,
                errors: f.u64("errors")?,
                empty: f.u64("empty")?,
                updated: f.u64("updated")?,
                ignored: f.u64("ignored")?,
                details,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revstore_codec::from_cbor;

    #[test]
    fn record_uses_the_five_counters() {
        let stats = ImportStats {
            created: 1,
            errors: 1,
            details: vec!["at position 1: unique constraint violated: e1".into()],
            ..ImportStats::default()
        };
        let record = ImportStatsRecord::from(&stats);
        let bytes = record.encode().unwrap();

        let raw = from_cbor(&bytes).unwrap();
        for field in ["created", "errors", "empty", "updated", "ignored"] {
            assert!(raw.get(field).is_some(), "missing {field}");
        }
        assert_eq!(ImportStatsRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn details_are_omitted_when_empty() {
        let bytes = ImportStatsRecord::default().encode().unwrap();
        assert!(from_cbor(&bytes).unwrap().get("details").is_none());
    }
}
