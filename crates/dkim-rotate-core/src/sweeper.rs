// # Retention Sweeper
//
// Retires records published by earlier rotations once they are older than the
// retention window (70 days by default, which keeps the last two monthly keys
// and drops the third).
//
// ## Outcome Handling
//
// | delete result | ledger entry |
// |---------------|--------------|
// | Succeeded     | removed      |
// | Unsupported   | removed      |
// | Failed        | kept, retried next run |
//
// A delete that does not finish within the call timeout counts as Failed.

use chrono::{Days, NaiveDate};
use std::time::Duration;

use crate::config::DomainConfig;
use crate::state::RecordLedger;
use crate::traits::{DeleteOutcome, DnsProvider};

/// Counts from one sweep of one domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub unsupported: usize,
    pub failed: usize,
}

impl SweepReport {
    /// Entries dropped from the ledger
    pub fn removed(&self) -> usize {
        self.deleted + self.unsupported
    }
}

/// Deletes expired records for one domain at a time
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    retention_days: u32,
    call_timeout: Duration,
}

impl RetentionSweeper {
    pub fn new(retention_days: u32, call_timeout: Duration) -> Self {
        Self {
            retention_days,
            call_timeout,
        }
    }

    /// Entries created before this day are expired
    pub fn cutoff(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_days(Days::new(u64::from(self.retention_days)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Delete expired records of `domain` and drop them from `ledger`
    ///
    /// Entries for `current_selector` are never touched, whatever their age:
    /// that record is the one the signing tables point at.
    pub async fn sweep(
        &self,
        ledger: &mut RecordLedger,
        domain: &DomainConfig,
        current_selector: Option<&str>,
        provider: &dyn DnsProvider,
        today: NaiveDate,
    ) -> SweepReport {
        let cutoff = self.cutoff(today);
        let mut report = SweepReport::default();
        let mut to_remove = Vec::new();

        let expired: Vec<_> = ledger
            .find(&domain.domain)
            .into_iter()
            .filter(|(_, entry)| entry.is_older_than(cutoff))
            .filter(|(_, entry)| Some(entry.selector.as_str()) != current_selector)
            .map(|(index, entry)| (index, entry.clone()))
            .collect();

        if !expired.is_empty() {
            tracing::info!(
                "Removing {} old record(s) for {} created before {}",
                expired.len(),
                domain.domain,
                cutoff
            );
        }

        for (index, entry) in expired {
            let outcome = match tokio::time::timeout(
                self.call_timeout,
                provider.delete(&domain.parameters, &entry),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!(
                        "Deleting {}:{} via {} timed out after {}s",
                        entry.domain,
                        entry.selector,
                        provider.provider_name(),
                        self.call_timeout.as_secs()
                    );
                    DeleteOutcome::Failed
                }
            };

            match outcome {
                DeleteOutcome::Succeeded => {
                    tracing::info!(
                        "Removed {}:{} created at {}",
                        entry.domain,
                        entry.selector,
                        entry.creation_time
                    );
                    report.deleted += 1;
                    to_remove.push(index);
                }
                DeleteOutcome::Unsupported => {
                    tracing::info!(
                        "No support for removing old record for {}:{} via {}",
                        entry.domain,
                        entry.selector,
                        provider.provider_name()
                    );
                    report.unsupported += 1;
                    to_remove.push(index);
                }
                DeleteOutcome::Failed => {
                    tracing::error!(
                        "Error removing old record for {}:{} via {}",
                        entry.domain,
                        entry.selector,
                        provider.provider_name()
                    );
                    report.failed += 1;
                }
            }
        }

        ledger.remove_indices(to_remove);
        report
    }
}
