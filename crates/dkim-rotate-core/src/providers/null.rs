//! The `null` provider: publishing is done by hand
//!
//! Every `add` succeeds without touching DNS, nothing can be checked and
//! nothing can be deleted. Domains without a configured provider use it.

use async_trait::async_trait;

use crate::Error;
use crate::config::ProviderConfig;
use crate::traits::{DnsProvider, DnsProviderFactory, DomainParameters, PublishedRecord, RecordRequest};

#[derive(Debug, Default, Clone, Copy)]
pub struct NullProvider;

#[async_trait]
impl DnsProvider for NullProvider {
    fn provider_name(&self) -> &'static str {
        "null"
    }

    async fn add(
        &self,
        _params: &DomainParameters,
        request: &RecordRequest,
    ) -> Result<PublishedRecord, Error> {
        tracing::debug!("null: pretending to publish {}", request.name);
        Ok(PublishedRecord::now(request))
    }
}

pub struct NullProviderFactory;

impl DnsProviderFactory for NullProviderFactory {
    fn create(&self, _config: &ProviderConfig) -> Result<Box<dyn DnsProvider>, Error> {
        Ok(Box::new(NullProvider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LedgerEntry;
    use crate::traits::DeleteOutcome;

    #[tokio::test]
    async fn test_null_capabilities() {
        let request = RecordRequest {
            domain: "example.com".to_string(),
            selector: "202401".to_string(),
            name: "202401._domainkey.example.com".to_string(),
            content: "v=DKIM1; p=KEY".to_string(),
            chunked_content: "\"v=DKIM1; p=KEY\"".to_string(),
        };
        let params = DomainParameters::new();

        let published = NullProvider.add(&params, &request).await.unwrap();
        assert_eq!(published.domain, "example.com");
        assert!(published.continuation_data.is_none());

        assert!(!NullProvider.check(&params, &request).await.unwrap());

        let entry = LedgerEntry::new("example.com", "202301", published.created_at.date_naive());
        assert_eq!(NullProvider.delete(&params, &entry).await, DeleteOutcome::Unsupported);
    }
}
