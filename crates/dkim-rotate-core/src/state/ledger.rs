// # Record Ledger
//
// Durable list of DKIM TXT records published by earlier runs that are still
// waiting to be retired by the retention sweep.
//
// ## File Format
//
// ```yaml
// - domain: example.com
//   selector: "202401"
//   creation_time: 2024-01-01
//   continuation_data:
//     record_id: 372e67954025e0ba6aaa6d586b9e0b59
// - domain: example.org
//   selector: "202401"
//   creation_time: 2024-01-01
//   continuation_data: null
// ```
//
// ## Failure Behavior
//
// A missing or unparsable ledger loads as empty with a warning. Losing the
// ledger only means old records are no longer retired; publishing is not
// affected.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Error;
use crate::state::file;
use crate::traits::PublishedRecord;

/// One published record tracked for eventual deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Mail domain
    pub domain: String,
    /// Rotation selector
    pub selector: String,
    /// Day the record was published (UTC)
    #[serde(with = "creation_date")]
    pub creation_time: NaiveDate,
    /// Provider-defined data needed to delete the record
    #[serde(default)]
    pub continuation_data: Option<serde_json::Value>,
}

impl LedgerEntry {
    /// Create a ledger entry
    pub fn new(
        domain: impl Into<String>,
        selector: impl Into<String>,
        creation_time: NaiveDate,
    ) -> Self {
        Self {
            domain: domain.into(),
            selector: selector.into(),
            creation_time,
            continuation_data: None,
        }
    }

    /// Attach provider continuation data
    pub fn with_continuation(mut self, data: serde_json::Value) -> Self {
        self.continuation_data = Some(data);
        self
    }

    /// Whether the record was created strictly before `cutoff`
    pub fn is_older_than(&self, cutoff: NaiveDate) -> bool {
        self.creation_time < cutoff
    }
}

impl From<PublishedRecord> for LedgerEntry {
    fn from(record: PublishedRecord) -> Self {
        Self {
            domain: record.domain,
            selector: record.selector,
            creation_time: record.created_at.date_naive(),
            continuation_data: record.continuation_data,
        }
    }
}

/// In-memory record ledger, loaded and saved as a whole
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordLedger {
    entries: Vec<LedgerEntry>,
}

impl RecordLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger from existing entries, keeping their order
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Self {
        Self { entries }
    }

    /// Load the ledger from `path`
    ///
    /// Never fails: a missing file, a read error, or a corrupt file without a
    /// usable backup all yield an empty ledger.
    pub async fn load(path: &Path) -> Self {
        match file::load_yaml_with_recovery::<Option<Vec<LedgerEntry>>>(path).await {
            Ok(Some(Some(entries))) => {
                tracing::debug!("Loaded ledger from {}: {} entries", path.display(), entries.len());
                Self { entries }
            }
            Ok(_) => {
                tracing::warn!(
                    "No record ledger at {}. Resuming without it.",
                    path.display()
                );
                Self::new()
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read record ledger {}: {}. Resuming without it.",
                    path.display(),
                    e
                );
                Self::new()
            }
        }
    }

    /// Write the whole ledger to `path`, replacing it atomically
    pub async fn save(&self, path: &Path) -> Result<(), Error> {
        file::save_yaml(path, &self.entries).await
    }

    /// All entries, in ledger order
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry
    pub fn push(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    /// All entries for `domain`, paired with their position in the ledger
    pub fn find(&self, domain: &str) -> Vec<(usize, &LedgerEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.domain == domain)
            .collect()
    }

    /// Remove the entries at `indices`
    ///
    /// Indices may be given in any order and may repeat. Removal always runs
    /// from the highest index down so earlier removals never shift the
    /// positions of later ones. Out-of-range indices are ignored.
    ///
    /// # Returns
    ///
    /// The removed entries, highest index first.
    pub fn remove_indices(&mut self, indices: impl IntoIterator<Item = usize>) -> Vec<LedgerEntry> {
        let mut indices: Vec<usize> = indices.into_iter().collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices.dedup();

        let len = self.entries.len();
        indices
            .into_iter()
            .filter(|&index| index < len)
            .map(|index| self.entries.remove(index))
            .collect()
    }
}

/// `creation_time` is written as `YYYY-MM-DD`; older files may carry a full
/// timestamp, which is truncated to its day.
mod creation_date {
    use chrono::{DateTime, NaiveDate, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(raw.trim()).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid creation_time '{}'", raw))
        })
    }

    fn parse(raw: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(raw, FORMAT)
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|t| t.date_naive()))
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                    .ok()
                    .map(|t| t.date())
            })
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                    .ok()
                    .map(|t| t.date())
            })
    }
}
