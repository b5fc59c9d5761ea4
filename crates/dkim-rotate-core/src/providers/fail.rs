//! The `fail` provider, for exercising failure handling
//!
//! ```yaml
//! fail:
//!   type: fail
//!   operations: [delete]   # empty or absent: every operation fails
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::config::ProviderConfig;
use crate::state::LedgerEntry;
use crate::traits::{
    DeleteOutcome, DnsProvider, DnsProviderFactory, DomainParameters, PublishedRecord,
    RecordRequest,
};

/// Operations the `fail` provider can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailOperation {
    Add,
    Delete,
}

#[derive(Debug, Clone, Default)]
pub struct FailProvider {
    operations: Vec<FailOperation>,
}

impl FailProvider {
    /// Fail the listed operations; an empty list fails all of them
    pub fn new(operations: Vec<FailOperation>) -> Self {
        Self { operations }
    }

    fn fails(&self, operation: FailOperation) -> bool {
        self.operations.is_empty() || self.operations.contains(&operation)
    }
}

#[async_trait]
impl DnsProvider for FailProvider {
    fn provider_name(&self) -> &'static str {
        "fail"
    }

    async fn add(
        &self,
        _params: &DomainParameters,
        request: &RecordRequest,
    ) -> Result<PublishedRecord, Error> {
        if self.fails(FailOperation::Add) {
            return Err(Error::provider("fail", format!("add of {} failed", request.name)));
        }
        Ok(PublishedRecord::now(request).with_continuation(serde_json::json!("-")))
    }

    async fn delete(&self, _params: &DomainParameters, entry: &LedgerEntry) -> DeleteOutcome {
        if self.fails(FailOperation::Delete) {
            tracing::warn!("fail: delete of {}/{} failed", entry.domain, entry.selector);
            DeleteOutcome::Failed
        } else {
            DeleteOutcome::Succeeded
        }
    }
}

pub struct FailProviderFactory;

impl DnsProviderFactory for FailProviderFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>, Error> {
        match config {
            ProviderConfig::Fail { operations } => Ok(Box::new(FailProvider::new(operations.clone()))),
            _ => Err(Error::config("Invalid config for fail provider")),
        }
    }
}
